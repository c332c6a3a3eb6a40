//! TransformEngine (spec.md §4.3): dispatches chunk-transform requests with
//! bounded concurrency, validates the alignment invariant, retries once with
//! a stricter reminder on violation, and falls back to passthrough with a
//! recorded defect if the second attempt still fails.

use crate::config::{ChunkingConfig, InferenceConfig};
use crate::data::{
    Book, Chapter, Chunk, Defect, DefectKind, Paragraph, TransformSpec, TransformedChunk,
};
use crate::exceptions::{CastError, CastResult};
use crate::prompting::{build_character_context, build_transform_messages};
use crate::providers::{Provider, ResponseFormat};
use futures::stream::{self, StreamExt};
use std::collections::HashMap;
use tokio_util::sync::CancellationToken;

pub struct TransformEngine<'a> {
    provider: &'a dyn Provider,
    model: &'a str,
    inference: &'a InferenceConfig,
    max_workers: usize,
    cancellation: CancellationToken,
}

impl<'a> TransformEngine<'a> {
    pub fn new(
        provider: &'a dyn Provider,
        model: &'a str,
        inference: &'a InferenceConfig,
        max_workers: usize,
        cancellation: CancellationToken,
    ) -> Self {
        Self {
            provider,
            model,
            inference,
            max_workers,
            cancellation,
        }
    }

    /// Transform every chunk of `book` against `spec`, returning the
    /// assembled book, the engine's fallback defects, and the raw transform
    /// results keyed by chunk id (handed to the quality controller for
    /// potential focused re-transforms).
    #[tracing::instrument(skip(self, book, chunks, registry))]
    pub async fn transform_chunks(
        &self,
        book: &Book,
        chunks: &[Chunk],
        registry: &crate::data::CharacterRegistry,
        spec: &TransformSpec,
    ) -> CastResult<(Book, Vec<Defect>)> {
        if self.cancellation.is_cancelled() {
            return Err(CastError::cancelled("transform"));
        }

        let context = build_character_context(registry, spec);

        crate::logging::report_progress(crate::logging::ProgressEvent::AssemblyStarted {
            chunk_count: chunks.len(),
        });

        let results: Vec<(Chunk, TransformedChunk)> = stream::iter(chunks.iter())
            .map(|chunk| async move {
                let transformed = tokio::select! {
                    biased;
                    _ = self.cancellation.cancelled() => TransformEngine::passthrough(chunk),
                    transformed = self.transform_one(chunk, &context, spec) => transformed,
                };
                (chunk.clone(), transformed)
            })
            .buffer_unordered(self.max_workers)
            .collect()
            .await;

        if self.cancellation.is_cancelled() {
            return Err(CastError::cancelled("transform"));
        }

        let mut by_chunk: HashMap<uuid::Uuid, TransformedChunk> = HashMap::new();
        let mut defects = Vec::new();
        for (chunk, transformed) in results {
            if transformed.was_fallback {
                defects.push(Defect {
                    kind: DefectKind::AlignmentFallback,
                    chapter_index: chunk.chapter_index,
                    paragraph_index: chunk.paragraph_range.start,
                    evidence: format!("chunk {} fell back to passthrough", chunk.id),
                });
            }
            by_chunk.insert(chunk.id, transformed);
        }

        let assembled = self.assemble(book, chunks, &by_chunk);

        crate::logging::report_progress(crate::logging::ProgressEvent::AssemblyCompleted {
            paragraph_count: assembled.paragraph_count(),
        });

        Ok((assembled, defects))
    }

    async fn transform_one(
        &self,
        chunk: &Chunk,
        context: &crate::data::CharacterContext,
        spec: &TransformSpec,
    ) -> TransformedChunk {
        crate::logging::report_progress(crate::logging::ProgressEvent::TransformChunkStarted {
            chunk_id: chunk.id,
            sentence_count: chunk.sentences.len(),
        });

        let result = self.attempt(chunk, context, spec, false).await;
        let result = match result {
            Some(transformed) if transformed.alignment_ok(chunk) => Some(transformed),
            _ => self.attempt(chunk, context, spec, true).await.filter(|t| t.alignment_ok(chunk)),
        };

        let transformed = result.unwrap_or_else(|| Self::passthrough(chunk));

        crate::logging::report_progress(crate::logging::ProgressEvent::TransformChunkCompleted {
            chunk_id: chunk.id,
            used_fallback: transformed.was_fallback,
        });

        transformed
    }

    async fn attempt(
        &self,
        chunk: &Chunk,
        context: &crate::data::CharacterContext,
        spec: &TransformSpec,
        stricter: bool,
    ) -> Option<TransformedChunk> {
        let messages = build_transform_messages(chunk, context, spec, stricter);
        let (response, _usage) = self
            .provider
            .complete(
                &messages,
                self.model,
                self.inference.temperature,
                ResponseFormat::Json,
                self.inference.max_tokens,
            )
            .await
            .ok()?;

        crate::resolver::parse_transform_response(&response, chunk).ok()
    }

    fn passthrough(chunk: &Chunk) -> TransformedChunk {
        TransformedChunk {
            chunk_id: chunk.id,
            sentences: chunk.sentences.iter().cloned().collect(),
            was_fallback: true,
        }
    }

    /// Reassemble chapters and paragraphs from the input book, replacing
    /// each sentence with its transformed form keyed by global sentence
    /// index. Chapter and paragraph structure is copied verbatim.
    fn assemble(&self, book: &Book, chunks: &[Chunk], by_chunk: &HashMap<uuid::Uuid, TransformedChunk>) -> Book {
        let mut sentence_map: HashMap<usize, String> = HashMap::new();
        for chunk in chunks {
            if let Some(transformed) = by_chunk.get(&chunk.id) {
                sentence_map.extend(transformed.sentences.iter().map(|(k, v)| (*k, v.clone())));
            }
        }

        let mut sentence_counter = 0usize;
        let chapters: Vec<Chapter> = book
            .chapters
            .iter()
            .map(|chapter| Chapter {
                number: chapter.number.clone(),
                title: chapter.title.clone(),
                paragraphs: chapter
                    .paragraphs
                    .iter()
                    .map(|paragraph| {
                        let sentences = paragraph
                            .sentences
                            .iter()
                            .map(|original| {
                                sentence_counter += 1;
                                sentence_map
                                    .get(&sentence_counter)
                                    .cloned()
                                    .unwrap_or_else(|| original.clone())
                            })
                            .collect();
                        Paragraph::new(sentences)
                    })
                    .collect(),
            })
            .collect();

        Book {
            metadata: book.metadata.clone(),
            chapters,
        }
    }
}
