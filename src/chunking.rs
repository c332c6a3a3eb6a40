//! Chunker (spec.md §4.3): greedy token-bounded partitioning of a chapter's
//! paragraph stream into chunks sized to a fraction of the target model's
//! context window.
//!
//! Hard invariants: a chunk never splits a paragraph, never crosses a
//! chapter boundary, and an oversized single paragraph still becomes its own
//! (over-budget) chunk rather than being dropped or truncated.

use crate::config::ChunkingConfig;
use crate::data::{Book, Chunk};
use crate::providers::Provider;

pub struct Chunker<'a> {
    provider: &'a dyn Provider,
    model: &'a str,
    config: &'a ChunkingConfig,
}

impl<'a> Chunker<'a> {
    pub fn new(provider: &'a dyn Provider, model: &'a str, config: &'a ChunkingConfig) -> Self {
        Self { provider, model, config }
    }

    fn token_budget(&self) -> usize {
        let window = self.provider.context_window(self.model);
        ((window as f32) * self.config.target_budget_fraction) as usize
    }

    /// Partition every chapter of `book` into chunks, reporting progress per
    /// chapter.
    pub fn chunk_book(&self, book: &Book) -> Vec<Chunk> {
        let budget = self.token_budget();
        let mut chunks = Vec::new();
        let mut sentence_counter = 0usize;

        for (chapter_index, chapter) in book.chapters.iter().enumerate() {
            crate::logging::report_progress(crate::logging::ProgressEvent::ChunkingStarted {
                chapter_index,
                paragraph_count: chapter.paragraphs.len(),
            });

            let chapter_chunks = self.chunk_chapter(chapter_index, chapter, budget, &mut sentence_counter);

            crate::logging::report_progress(crate::logging::ProgressEvent::ChunkingCompleted {
                chapter_index,
                chunk_count: chapter_chunks.len(),
            });

            chunks.extend(chapter_chunks);
        }

        chunks
    }

    fn chunk_chapter(
        &self,
        chapter_index: usize,
        chapter: &crate::data::Chapter,
        budget: usize,
        sentence_counter: &mut usize,
    ) -> Vec<Chunk> {
        let mut chunks = Vec::new();
        let mut current_sentences: Vec<(usize, String)> = Vec::new();
        let mut current_tokens = 0usize;
        let mut range_start = 0usize;

        for (paragraph_index, paragraph) in chapter.paragraphs.iter().enumerate() {
            let paragraph_tokens: usize = paragraph
                .sentences
                .iter()
                .map(|s| self.provider.count_tokens(s, self.model))
                .sum();

            if !current_sentences.is_empty() && current_tokens + paragraph_tokens > budget {
                chunks.push(self.finalize_chunk(
                    chapter_index,
                    range_start..paragraph_index,
                    std::mem::take(&mut current_sentences),
                    current_tokens,
                ));
                current_tokens = 0;
                range_start = paragraph_index;
            }

            for sentence in &paragraph.sentences {
                *sentence_counter += 1;
                current_sentences.push((*sentence_counter, sentence.clone()));
            }
            current_tokens += paragraph_tokens;
        }

        if !current_sentences.is_empty() {
            chunks.push(self.finalize_chunk(
                chapter_index,
                range_start..chapter.paragraphs.len(),
                current_sentences,
                current_tokens,
            ));
        }

        chunks
    }

    fn finalize_chunk(
        &self,
        chapter_index: usize,
        paragraph_range: std::ops::Range<usize>,
        sentences: Vec<(usize, String)>,
        estimated_tokens: usize,
    ) -> Chunk {
        Chunk {
            id: uuid::Uuid::new_v4(),
            chapter_index,
            paragraph_range,
            sentences,
            estimated_tokens,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::{BookMetadata, Chapter, ChapterNumber, Paragraph};
    use async_trait::async_trait;

    struct FixedProvider;

    #[async_trait]
    impl Provider for FixedProvider {
        async fn complete(
            &self,
            _messages: &[crate::providers::ChatMessage],
            _model: &str,
            _temperature: f32,
            _response_format: crate::providers::ResponseFormat,
            _max_tokens: Option<usize>,
        ) -> crate::exceptions::CastResult<(String, crate::providers::Usage)> {
            unimplemented!("chunker never calls complete")
        }

        fn count_tokens(&self, text: &str, _model: &str) -> usize {
            text.split_whitespace().count()
        }

        fn default_model(&self) -> &str {
            "fixed"
        }

        fn context_window(&self, _model: &str) -> usize {
            100
        }

        fn name(&self) -> &'static str {
            "fixed"
        }
    }

    fn sample_book() -> Book {
        Book {
            metadata: BookMetadata::default(),
            chapters: vec![Chapter {
                number: ChapterNumber::Ordinal(1),
                title: None,
                paragraphs: vec![
                    Paragraph::new(vec!["one two three four five".to_string()]),
                    Paragraph::new(vec!["six seven eight nine ten".to_string()]),
                    Paragraph::new(vec!["eleven twelve thirteen".to_string()]),
                ],
            }],
        }
    }

    #[test]
    fn chunks_never_split_a_paragraph() {
        let provider = FixedProvider;
        let config = ChunkingConfig {
            target_budget_fraction: 0.08,
            analysis_budget_fraction: 0.85,
        };
        let chunker = Chunker::new(&provider, "fixed", &config);
        let book = sample_book();
        let chunks = chunker.chunk_book(&book);

        let mut seen_sentences = std::collections::HashSet::new();
        for chunk in &chunks {
            for (idx, _) in &chunk.sentences {
                assert!(seen_sentences.insert(*idx), "sentence {idx} appeared in two chunks");
            }
        }
        assert_eq!(seen_sentences.len(), 3);
    }

    #[test]
    fn oversized_paragraph_still_becomes_its_own_chunk() {
        let provider = FixedProvider;
        let config = ChunkingConfig {
            target_budget_fraction: 0.01,
            analysis_budget_fraction: 0.85,
        };
        let chunker = Chunker::new(&provider, "fixed", &config);
        let book = sample_book();
        let chunks = chunker.chunk_book(&book);
        assert!(!chunks.is_empty());
        assert!(chunks.iter().all(|c| !c.sentences.is_empty()));
    }
}
