//! QualityController: detects residual gendered language
//! inconsistent with the `TransformSpec` and issues bounded focused
//! re-transform passes to correct it.
//!
//! Detection is regex-based and word-bounded, case-insensitive, operating on
//! the assembled book's rendered text per chapter. Correction replaces only
//! the flagged paragraphs; a pass that errors never mutates already-accepted
//! text.

use crate::config::{InferenceConfig, QualityConfig};
use crate::data::{Book, Defect, DefectKind, Gender, Paragraph, QualityLevel, QualityReport, TransformSpec};
use crate::exceptions::{CastError, CastResult};
use crate::prompting::{build_character_context, build_focused_retry_messages};
use crate::providers::{Provider, ResponseFormat};
use regex::Regex;
use std::sync::OnceLock;
use tokio_util::sync::CancellationToken;

fn male_pronoun_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)\b(he|him|his|himself)\b").unwrap())
}

fn female_pronoun_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)\b(she|her|hers|herself)\b").unwrap())
}

fn male_title_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)\b(mr|sir|lord)\b\.?").unwrap())
}

fn female_title_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)\b(mrs|ms|miss|lady)\b\.?").unwrap())
}

fn nonbinary_agreement_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)\bthey\s+(is|was|has)\b").unwrap())
}

pub struct QualityController<'a> {
    provider: &'a dyn Provider,
    model: &'a str,
    inference: &'a InferenceConfig,
    config: &'a QualityConfig,
    cancellation: CancellationToken,
}

impl<'a> QualityController<'a> {
    pub fn new(
        provider: &'a dyn Provider,
        model: &'a str,
        inference: &'a InferenceConfig,
        config: &'a QualityConfig,
        cancellation: CancellationToken,
    ) -> Self {
        Self {
            provider,
            model,
            inference,
            config,
            cancellation,
        }
    }

    #[tracing::instrument(skip(self, book, registry))]
    pub async fn run(
        &self,
        mut book: Book,
        registry: &crate::data::CharacterRegistry,
        spec: &TransformSpec,
        level: QualityLevel,
    ) -> CastResult<(Book, QualityReport)> {
        if self.cancellation.is_cancelled() {
            return Err(CastError::cancelled("quality_control"));
        }

        let max_passes = level.max_passes();
        let mut report = QualityReport::default();

        if max_passes == 0 {
            report.score = 100.0;
            return Ok((book, report));
        }

        let mut defects = self.scan(&book, registry, spec);
        let defects_initial = defects.len();
        let mut previous_count = defects_initial;

        for pass_number in 1..=max_passes {
            if self.cancellation.is_cancelled() {
                return Err(CastError::cancelled("quality_control"));
            }

            crate::logging::report_progress(crate::logging::ProgressEvent::QualityPassStarted {
                pass_number,
                quality_level: format!("{level:?}"),
            });

            for defect in &defects {
                crate::logging::report_progress(crate::logging::ProgressEvent::QualityDefectFound {
                    chapter_index: defect.chapter_index,
                    kind: format!("{:?}", defect.kind),
                    evidence: defect.evidence.clone(),
                });
            }

            report.passes_run = pass_number;

            if defects.is_empty() {
                crate::logging::report_progress(crate::logging::ProgressEvent::QualityPassCompleted {
                    pass_number,
                    defects_remaining: 0,
                    score: 100.0,
                });
                break;
            }

            book = self.correct(book, &defects, registry, spec).await?;
            // Re-scan the corrected book: the score and budget_exceeded flag
            // must reflect defects remaining *after* correction, not the
            // pre-correction set that drove this pass's `correct` call.
            defects = self.scan(&book, registry, spec);
            let defects_remaining = defects.len();
            let score = self.score(defects_initial, defects_remaining);

            crate::logging::report_progress(crate::logging::ProgressEvent::QualityPassCompleted {
                pass_number,
                defects_remaining,
                score,
            });

            if defects_remaining == 0 {
                break;
            }
            if defects_remaining >= previous_count {
                report.budget_exceeded = true;
                break;
            }
            previous_count = defects_remaining;

            if pass_number == max_passes {
                report.budget_exceeded = true;
            }
        }

        report.defects = defects;
        report.score = self.score(defects_initial, report.defects.len());

        Ok((book, report))
    }

    fn score(&self, defects_initial: usize, defects_remaining: usize) -> f32 {
        100.0 * (1.0 - defects_remaining as f32 / defects_initial.max(1) as f32)
    }

    /// Scan every chapter of `book` for defects against `spec`'s target
    /// gender assignments.
    fn scan(&self, book: &Book, registry: &crate::data::CharacterRegistry, spec: &TransformSpec) -> Vec<Defect> {
        let mut defects = Vec::new();

        let forbids_male = matches!(spec, TransformSpec::AllFemale | TransformSpec::Nonbinary);
        let forbids_female = matches!(spec, TransformSpec::AllMale | TransformSpec::Nonbinary);
        let checks_nonbinary_grammar = matches!(spec, TransformSpec::Nonbinary);

        for (chapter_index, chapter) in book.chapters.iter().enumerate() {
            for (paragraph_index, paragraph) in chapter.paragraphs.iter().enumerate() {
                let text = paragraph.text();

                if forbids_male {
                    for m in male_pronoun_re().find_iter(&text) {
                        defects.push(Defect {
                            kind: DefectKind::PronounMismatch,
                            chapter_index,
                            paragraph_index,
                            evidence: m.as_str().to_string(),
                        });
                    }
                    for m in male_title_re().find_iter(&text) {
                        defects.push(Defect {
                            kind: DefectKind::TitleMismatch,
                            chapter_index,
                            paragraph_index,
                            evidence: m.as_str().to_string(),
                        });
                    }
                }
                if forbids_female {
                    for m in female_pronoun_re().find_iter(&text) {
                        defects.push(Defect {
                            kind: DefectKind::PronounMismatch,
                            chapter_index,
                            paragraph_index,
                            evidence: m.as_str().to_string(),
                        });
                    }
                    for m in female_title_re().find_iter(&text) {
                        defects.push(Defect {
                            kind: DefectKind::TitleMismatch,
                            chapter_index,
                            paragraph_index,
                            evidence: m.as_str().to_string(),
                        });
                    }
                }
                if checks_nonbinary_grammar {
                    for m in nonbinary_agreement_re().find_iter(&text) {
                        defects.push(Defect {
                            kind: DefectKind::GrammarAgreement,
                            chapter_index,
                            paragraph_index,
                            evidence: m.as_str().to_string(),
                        });
                    }
                }

                defects.extend(self.scan_named_character_mentions(&text, chapter_index, paragraph_index, registry, spec));
            }
        }

        defects
    }

    /// Within `self.config.mention_window_chars` after each known
    /// character's name, flag a pronoun inconsistent with that character's
    /// target gender.
    fn scan_named_character_mentions(
        &self,
        text: &str,
        chapter_index: usize,
        paragraph_index: usize,
        registry: &crate::data::CharacterRegistry,
        spec: &TransformSpec,
    ) -> Vec<Defect> {
        let mut defects = Vec::new();

        for character in registry.iter() {
            let Some(target) = spec.target_gender(character) else {
                continue;
            };

            let names = std::iter::once(character.canonical_name.as_str()).chain(character.variants.iter().map(String::as_str));

            for name in names {
                if name.is_empty() {
                    continue;
                }
                for (mention_at, _) in text.match_indices(name) {
                    let window_end = (mention_at + name.len() + self.config.mention_window_chars).min(text.len());
                    let window_end = floor_char_boundary(text, window_end);
                    let window = &text[mention_at..window_end];

                    let mismatched = match target {
                        Gender::Female => male_pronoun_re().find(window),
                        Gender::Male => female_pronoun_re().find(window),
                        _ => None,
                    };

                    if let Some(m) = mismatched {
                        defects.push(Defect {
                            kind: DefectKind::NamedCharacterMismatch,
                            chapter_index,
                            paragraph_index,
                            evidence: format!("'{}' near '{}'", m.as_str(), character.canonical_name),
                        });
                    }
                }
            }
        }

        defects
    }

    /// Issue focused re-transform requests for every paragraph with a
    /// defect, replacing only those paragraphs on success.
    async fn correct(
        &self,
        book: Book,
        defects: &[Defect],
        registry: &crate::data::CharacterRegistry,
        spec: &TransformSpec,
    ) -> CastResult<Book> {
        let context = build_character_context(registry, spec);
        let mut book = book;

        let mut flagged: std::collections::HashMap<(usize, usize), ()> = std::collections::HashMap::new();
        for defect in defects {
            flagged.insert((defect.chapter_index, defect.paragraph_index), ());
        }

        for ((chapter_index, paragraph_index), _) in flagged {
            let Some(chapter) = book.chapters.get(chapter_index) else { continue };
            let Some(paragraph) = chapter.paragraphs.get(paragraph_index) else { continue };

            let sentence_indices: Vec<usize> = (1..=paragraph.sentences.len()).collect();
            let pseudo_chunk = crate::data::Chunk {
                id: uuid::Uuid::new_v4(),
                chapter_index,
                paragraph_range: paragraph_index..paragraph_index + 1,
                sentences: sentence_indices
                    .iter()
                    .zip(paragraph.sentences.iter())
                    .map(|(i, s)| (*i, s.clone()))
                    .collect(),
                estimated_tokens: 0,
            };

            let messages = build_focused_retry_messages(&pseudo_chunk, &context, spec, &sentence_indices);
            let response = self
                .provider
                .complete(&messages, self.model, self.inference.temperature, ResponseFormat::Json, self.inference.max_tokens)
                .await;

            let Ok((raw, _usage)) = response else { continue };
            let Ok(transformed) = crate::resolver::parse_transform_response(&raw, &pseudo_chunk) else {
                continue;
            };
            if !transformed.alignment_ok(&pseudo_chunk) {
                continue;
            }

            let new_sentences: Vec<String> = sentence_indices
                .iter()
                .map(|i| transformed.sentences.get(i).cloned().unwrap_or_default())
                .collect();

            book.chapters[chapter_index].paragraphs[paragraph_index] = Paragraph::new(new_sentences);
        }

        Ok(book)
    }
}

fn floor_char_boundary(s: &str, mut index: usize) -> usize {
    while index > 0 && index < s.len() && !s.is_char_boundary(index) {
        index -= 1;
    }
    index
}
