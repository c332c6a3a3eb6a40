//! CharacterAnalyzer (spec.md §4.2): extracts the full cast of a book whose
//! text exceeds any single model's context window, via stratified sampling
//! and cross-window reconciliation.
//!
//! Strategy: try the whole book as one call if it fits in ~85% of the
//! context window; otherwise sample five overlapping windows by normalized
//! position and merge their extractions, applying the anti-merge rule so
//! family members with distinct given names never collapse into one entry.

use crate::config::{ChunkingConfig, InferenceConfig};
use crate::data::{
    given_name_token, strip_title, Book, Character, CharacterRegistry, Gender, Importance,
    NormalizedOffset,
};
use crate::exceptions::{CastError, CastResult};
use crate::providers::{ChatMessage, Provider, ResponseFormat};
use futures::stream::{self, StreamExt};
use serde::Deserialize;
use tokio_util::sync::CancellationToken;

/// The five overlapping sampling windows of spec.md §4.2 step 3.
const SAMPLING_WINDOWS: [(f32, f32); 5] = [
    (0.00, 0.25),
    (0.20, 0.40),
    (0.40, 0.60),
    (0.60, 0.80),
    (0.75, 1.00),
];

#[derive(Debug, Deserialize)]
struct ExtractedCharacter {
    name: String,
    #[serde(default)]
    gender: Option<String>,
    #[serde(default)]
    pronouns: Option<(String, String, String)>,
    #[serde(default)]
    titles: Vec<String>,
    #[serde(default)]
    aliases: Vec<String>,
    #[serde(default)]
    importance: Option<String>,
    #[serde(default)]
    confidence: Option<f32>,
    #[serde(default)]
    first_seen_hint: Option<f32>,
}

fn parse_gender(raw: Option<&str>) -> Gender {
    match raw.map(str::to_ascii_lowercase).as_deref() {
        Some("male") => Gender::Male,
        Some("female") => Gender::Female,
        Some("nonbinary") | Some("non-binary") => Gender::Nonbinary,
        _ => Gender::Unknown,
    }
}

fn parse_importance(raw: Option<&str>) -> Importance {
    match raw.map(str::to_ascii_lowercase).as_deref() {
        Some("main") => Importance::Main,
        Some("supporting") => Importance::Supporting,
        _ => Importance::Minor,
    }
}

pub struct CharacterAnalyzer<'a> {
    provider: &'a dyn Provider,
    model: &'a str,
    chunking: &'a ChunkingConfig,
    inference: &'a InferenceConfig,
    max_workers: usize,
    cancellation: CancellationToken,
}

impl<'a> CharacterAnalyzer<'a> {
    pub fn new(
        provider: &'a dyn Provider,
        model: &'a str,
        chunking: &'a ChunkingConfig,
        inference: &'a InferenceConfig,
        max_workers: usize,
        cancellation: CancellationToken,
    ) -> Self {
        Self {
            provider,
            model,
            chunking,
            inference,
            max_workers,
            cancellation,
        }
    }

    #[tracing::instrument(skip(self, book))]
    pub async fn analyze(&self, book: &Book) -> CastResult<CharacterRegistry> {
        if self.cancellation.is_cancelled() {
            return Err(CastError::cancelled("character_analysis"));
        }

        let whole_book_tokens = self.provider.count_tokens(&book.concatenated_text(), self.model);
        let window_tokens = (self.provider.context_window(self.model) as f32
            * self.chunking.analysis_budget_fraction) as usize;

        let extracted: Vec<ExtractedCharacter> = if whole_book_tokens <= window_tokens {
            crate::logging::report_progress(crate::logging::ProgressEvent::AnalysisSingleCall {
                total_tokens: whole_book_tokens,
            });
            self.extract_window(book, 0, (0.0, 1.0)).await?
        } else {
            crate::logging::report_progress(crate::logging::ProgressEvent::AnalysisWindowsPlanned {
                window_count: SAMPLING_WINDOWS.len(),
                total_tokens: whole_book_tokens,
            });

            let results: Vec<Vec<ExtractedCharacter>> = stream::iter(SAMPLING_WINDOWS.iter().enumerate())
                .map(|(index, &range)| async move {
                    tokio::select! {
                        biased;
                        _ = self.cancellation.cancelled() => Err(CastError::cancelled("character_analysis")),
                        result = self.extract_window(book, index, range) => result,
                    }
                })
                .buffer_unordered(self.max_workers)
                .filter_map(|result| async move { result.ok() })
                .collect()
                .await;

            results.into_iter().flatten().collect()
        };

        if self.cancellation.is_cancelled() {
            return Err(CastError::cancelled("character_analysis"));
        }

        self.merge(extracted)
    }

    async fn extract_window(
        &self,
        book: &Book,
        window_index: usize,
        range: (f32, f32),
    ) -> CastResult<Vec<ExtractedCharacter>> {
        crate::logging::report_progress(crate::logging::ProgressEvent::AnalysisWindowStarted {
            window_index,
            range,
        });

        let text = self.slice_by_normalized_position(book, range);
        let prompt = self.extraction_prompt(&text);

        let messages = vec![
            ChatMessage::system(
                "You extract every named character from a novel excerpt. Include every named \
                 character however minor. Never merge family members that have different given \
                 names, even if they share a surname. Mark gender 'unknown' if it cannot be \
                 inferred from the text rather than guessing. Respond with a JSON array only.",
            ),
            ChatMessage::user(prompt),
        ];

        let (response, _usage) = self
            .provider
            .complete(
                &messages,
                self.model,
                self.inference.temperature,
                ResponseFormat::Json,
                self.inference.max_tokens,
            )
            .await?;

        let characters: Vec<ExtractedCharacter> = crate::resolver::parse_json_array(&response)
            .map_err(|err| CastError::input("character_analysis", err.to_string()))?;

        crate::logging::report_progress(crate::logging::ProgressEvent::AnalysisWindowCompleted {
            window_index,
            characters_found: characters.len(),
        });

        Ok(characters)
    }

    fn extraction_prompt(&self, text: &str) -> String {
        format!(
            "Extract the cast of characters from the following excerpt. Respond with a JSON \
             array of objects: {{name, gender, pronouns: [subject, object, possessive], titles, \
             aliases, importance: one of minor|supporting|main, confidence: 0.0-1.0, \
             first_seen_hint: 0.0-1.0 normalized position within the excerpt}}.\n\n{text}"
        )
    }

    /// Select the whole paragraphs of `book` whose normalized position
    /// overlaps `[start, end]` and join them, never splitting a paragraph
    /// or a word at a window boundary.
    fn slice_by_normalized_position(&self, book: &Book, range: (f32, f32)) -> String {
        let paragraphs: Vec<String> = book.chapters.iter().flat_map(|c| &c.paragraphs).map(|p| p.text()).collect();

        // +1 accounts for the newline `concatenated_text` joins paragraphs
        // with, so offsets line up with the book's actual rendered length.
        let lengths: Vec<usize> = paragraphs.iter().map(|p| p.len() + 1).collect();
        let total: usize = lengths.iter().sum();
        if total == 0 {
            return String::new();
        }

        let start_offset = (range.0 * total as f32) as usize;
        let end_offset = (range.1 * total as f32) as usize;

        let mut cursor = 0usize;
        let mut selected = Vec::new();
        for (paragraph, length) in paragraphs.iter().zip(lengths.iter()) {
            let paragraph_start = cursor;
            let paragraph_end = cursor + length;
            cursor = paragraph_end;

            if paragraph_end > start_offset && paragraph_start < end_offset {
                selected.push(paragraph.clone());
            }
        }

        selected.join("\n\n")
    }

    /// Merge extracted entries from every window into a frozen registry,
    /// applying the anti-merge rule and confidence/majority tie-breaking of
    /// spec.md §4.2.
    fn merge(&self, extracted: Vec<ExtractedCharacter>) -> CastResult<CharacterRegistry> {
        crate::logging::report_progress(crate::logging::ProgressEvent::AnalysisMergeStarted {
            entry_count: extracted.len(),
        });

        let mut merged: Vec<Character> = Vec::new();

        for entry in extracted {
            let canonical = strip_title(&entry.name).to_string();
            let given = given_name_token(&entry.name).to_string();
            let gender = parse_gender(entry.gender.as_deref());

            let existing_index = merged.iter().position(|c| {
                if given_name_token(&c.canonical_name) != given {
                    return false;
                }
                c.canonical_name == canonical
                    || c.variants.iter().any(|v| v == &entry.name)
                    || entry.aliases.iter().any(|a| a == &c.canonical_name)
            });

            match existing_index {
                None => {
                    let mut character = Character::new(canonical, gender);
                    character.variants = entry.aliases.clone();
                    character.variants.push(entry.name.clone());
                    character.titles = entry.titles.clone();
                    character.importance = parse_importance(entry.importance.as_deref());
                    character.confidence = entry.confidence.unwrap_or(0.5);
                    character.first_seen = entry.first_seen_hint.unwrap_or(0.0) as NormalizedOffset;
                    if let Some(pronouns) = entry.pronouns.clone() {
                        character.pronouns = pronouns;
                    }
                    merged.push(character);
                }
                Some(index) => {
                    let existing = &mut merged[index];
                    for alias in entry.aliases.iter().chain(std::iter::once(&entry.name)) {
                        if !existing.variants.contains(alias) {
                            existing.variants.push(alias.clone());
                        }
                    }
                    existing.importance = existing.importance.max(parse_importance(entry.importance.as_deref()));
                    existing.first_seen = existing.first_seen.min(entry.first_seen_hint.unwrap_or(1.0));

                    let incoming_confidence = entry.confidence.unwrap_or(0.5);
                    if gender != Gender::Unknown && existing.gender != gender {
                        let resolved = if incoming_confidence > existing.confidence {
                            crate::logging::report_progress(crate::logging::ProgressEvent::AnalysisMergeConflict {
                                canonical_name: existing.canonical_name.clone(),
                                resolution: format!("higher-confidence window set gender to {gender:?}"),
                            });
                            gender
                        } else if incoming_confidence == existing.confidence && existing.gender != Gender::Unknown {
                            crate::logging::report_progress(crate::logging::ProgressEvent::AnalysisMergeConflict {
                                canonical_name: existing.canonical_name.clone(),
                                resolution: "tied confidence, genders disagreed -- marked unknown".to_string(),
                            });
                            Gender::Unknown
                        } else {
                            existing.gender
                        };
                        existing.gender = resolved;
                        existing.confidence = existing.confidence.max(incoming_confidence);
                    } else if existing.gender == Gender::Unknown && gender != Gender::Unknown {
                        existing.gender = gender;
                        existing.confidence = incoming_confidence;
                    }
                }
            }
        }

        let mut registry = CharacterRegistry::new();
        let character_count = merged.len();
        for character in merged {
            registry.insert(character);
        }
        registry.freeze();

        crate::logging::report_progress(crate::logging::ProgressEvent::AnalysisCompleted { character_count });

        Ok(registry)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_entry(name: &str, gender: &str, confidence: f32) -> ExtractedCharacter {
        ExtractedCharacter {
            name: name.to_string(),
            gender: Some(gender.to_string()),
            pronouns: None,
            titles: Vec::new(),
            aliases: Vec::new(),
            importance: Some("main".to_string()),
            confidence: Some(confidence),
            first_seen_hint: Some(0.1),
        }
    }

    fn analyzer_stub<'a>(
        provider: &'a dyn Provider,
        model: &'a str,
        chunking: &'a ChunkingConfig,
        inference: &'a InferenceConfig,
    ) -> CharacterAnalyzer<'a> {
        CharacterAnalyzer::new(provider, model, chunking, inference, 4, CancellationToken::new())
    }

    struct NoopProvider;

    #[async_trait::async_trait]
    impl Provider for NoopProvider {
        async fn complete(
            &self,
            _messages: &[ChatMessage],
            _model: &str,
            _temperature: f32,
            _response_format: ResponseFormat,
            _max_tokens: Option<usize>,
        ) -> CastResult<(String, crate::providers::Usage)> {
            unimplemented!()
        }
        fn count_tokens(&self, text: &str, _model: &str) -> usize {
            text.len() / 4
        }
        fn default_model(&self) -> &str {
            "noop"
        }
        fn context_window(&self, _model: &str) -> usize {
            8000
        }
        fn name(&self) -> &'static str {
            "noop"
        }
    }

    #[tokio::test]
    async fn analyze_rejects_pre_cancelled_token() {
        let provider = NoopProvider;
        let chunking = ChunkingConfig::default();
        let inference = InferenceConfig::default();
        let cancellation = CancellationToken::new();
        cancellation.cancel();
        let analyzer = CharacterAnalyzer::new(&provider, "noop", &chunking, &inference, 4, cancellation);

        let book = Book {
            metadata: crate::data::BookMetadata::default(),
            chapters: vec![crate::data::Chapter {
                number: crate::data::ChapterNumber::Ordinal(1),
                title: None,
                paragraphs: vec![crate::data::Paragraph::new(vec!["Hello.".to_string()])],
            }],
        };

        let result = analyzer.analyze(&book).await;
        assert!(matches!(result, Err(CastError::Cancelled { .. })));
    }

    #[test]
    fn anti_merge_keeps_distinct_given_names_separate() {
        let provider = NoopProvider;
        let chunking = ChunkingConfig::default();
        let inference = InferenceConfig::default();
        let analyzer = analyzer_stub(&provider, "noop", &chunking, &inference);

        let entries = vec![
            sample_entry("Harry Potter", "male", 0.9),
            sample_entry("Lily Potter", "female", 0.9),
        ];
        let registry = analyzer.merge(entries).unwrap();
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn same_character_from_two_windows_merges_into_one() {
        let provider = NoopProvider;
        let chunking = ChunkingConfig::default();
        let inference = InferenceConfig::default();
        let analyzer = analyzer_stub(&provider, "noop", &chunking, &inference);

        let entries = vec![
            sample_entry("Elizabeth Bennet", "female", 0.7),
            sample_entry("Elizabeth Bennet", "female", 0.95),
        ];
        let registry = analyzer.merge(entries).unwrap();
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn tied_confidence_conflicting_gender_resolves_to_unknown() {
        let provider = NoopProvider;
        let chunking = ChunkingConfig::default();
        let inference = InferenceConfig::default();
        let analyzer = analyzer_stub(&provider, "noop", &chunking, &inference);

        let entries = vec![
            sample_entry("Alex Rivera", "male", 0.5),
            sample_entry("Alex Rivera", "female", 0.5),
        ];
        let registry = analyzer.merge(entries).unwrap();
        let character = registry.get("Alex Rivera").unwrap();
        assert_eq!(character.gender, Gender::Unknown);
    }
}
