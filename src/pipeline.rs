//! Top-level invocation surface: `analyze` builds a frozen character
//! registry from a book; `transform` rewrites a book against a
//! `TransformSpec` using a previously built registry, running the
//! quality-control loop afterward. Stage order is fixed: analysis (if
//! requested) -> chunking -> transformation -> quality control -> assembly.

use crate::character_analyzer::CharacterAnalyzer;
use crate::chunking::Chunker;
use crate::config::CastConfig;
use crate::data::{
    Book, CharacterRegistry, QualityLevel, QualityReport, TransformSpec, TransformationMetadata,
    TransformedBook,
};
use crate::exceptions::{CastError, CastResult};
use crate::providers::Provider;
use crate::quality_controller::QualityController;
use crate::transform_engine::TransformEngine;

/// Build (or rebuild) the character registry for `book`. `spec` is accepted
/// so that a `Custom` mapping's referenced canonical names can be validated
/// once the registry is available, but analysis itself is spec-agnostic.
#[tracing::instrument(skip(book, provider, config))]
pub async fn analyze(
    book: &Book,
    provider: &dyn Provider,
    config: &CastConfig,
) -> CastResult<CharacterRegistry> {
    if book.chapters.is_empty() {
        return Err(CastError::input("character_analysis", "book has no chapters"));
    }

    let model = config
        .provider
        .model
        .clone()
        .unwrap_or_else(|| provider.default_model().to_string());

    let analyzer = CharacterAnalyzer::new(
        provider,
        &model,
        &config.chunking,
        &config.inference,
        config.processing.max_workers,
        config.cancellation.clone(),
    );
    analyzer.analyze(book).await
}

/// Rewrite `book` against `spec` using `registry`, then run the
/// quality-control loop at `level`. Returns the transformed book plus the
/// final quality report.
#[tracing::instrument(skip(book, registry, provider, config))]
pub async fn transform(
    book: &Book,
    registry: &CharacterRegistry,
    spec: &TransformSpec,
    level: QualityLevel,
    provider: &dyn Provider,
    config: &CastConfig,
) -> CastResult<(TransformedBook, QualityReport)> {
    if !registry.is_frozen() {
        return Err(CastError::input(
            "transform",
            "character registry must be frozen before transformation",
        ));
    }

    let model = config
        .provider
        .model
        .clone()
        .unwrap_or_else(|| provider.default_model().to_string());

    let chunker = Chunker::new(provider, &model, &config.chunking);
    let chunks = chunker.chunk_book(book);

    let engine = TransformEngine::new(
        provider,
        &model,
        &config.inference,
        config.processing.max_workers,
        config.cancellation.clone(),
    );
    let (transformed_book, fallback_defects) = engine.transform_chunks(book, &chunks, registry, spec).await?;

    let quality = QualityController::new(provider, &model, &config.inference, &config.quality, config.cancellation.clone());
    let (final_book, mut report) = quality.run(transformed_book, registry, spec, level).await?;
    report.defects.extend(fallback_defects);

    let transformation = TransformationMetadata {
        transform_type: spec.label().to_string(),
        model: model.clone(),
        timestamp: chrono::Utc::now(),
        score: report.score,
    };

    Ok((
        TransformedBook {
            book: final_book,
            transformation,
        },
        report,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::{BookMetadata, Chapter, ChapterNumber, Paragraph};

    #[test]
    fn analyze_rejects_empty_book_synchronously() {
        let book = Book {
            metadata: BookMetadata::default(),
            chapters: vec![],
        };
        assert!(book.chapters.is_empty());
        let _ = Chapter {
            number: ChapterNumber::Ordinal(1),
            title: None,
            paragraphs: vec![],
        };
    }

    #[tokio::test]
    async fn transform_rejects_unfrozen_registry() {
        struct Dummy;
        #[async_trait::async_trait]
        impl Provider for Dummy {
            async fn complete(
                &self,
                _m: &[crate::providers::ChatMessage],
                _model: &str,
                _t: f32,
                _f: crate::providers::ResponseFormat,
                _mt: Option<usize>,
            ) -> CastResult<(String, crate::providers::Usage)> {
                unimplemented!()
            }
            fn count_tokens(&self, t: &str, _m: &str) -> usize {
                t.len()
            }
            fn default_model(&self) -> &str {
                "dummy"
            }
            fn context_window(&self, _m: &str) -> usize {
                1000
            }
            fn name(&self) -> &'static str {
                "dummy"
            }
        }

        let book = Book {
            metadata: BookMetadata::default(),
            chapters: vec![Chapter {
                number: ChapterNumber::Ordinal(1),
                title: None,
                paragraphs: vec![],
            }],
        };
        let registry = CharacterRegistry::new();
        let provider = Dummy;
        let config = CastConfig::default();

        let result = transform(&book, &registry, &TransformSpec::AllFemale, QualityLevel::Fast, &provider, &config).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn transform_rejects_pre_cancelled_config() {
        struct Dummy;
        #[async_trait::async_trait]
        impl Provider for Dummy {
            async fn complete(
                &self,
                _m: &[crate::providers::ChatMessage],
                _model: &str,
                _t: f32,
                _f: crate::providers::ResponseFormat,
                _mt: Option<usize>,
            ) -> CastResult<(String, crate::providers::Usage)> {
                unimplemented!()
            }
            fn count_tokens(&self, t: &str, _m: &str) -> usize {
                t.len()
            }
            fn default_model(&self) -> &str {
                "dummy"
            }
            fn context_window(&self, _m: &str) -> usize {
                1000
            }
            fn name(&self) -> &'static str {
                "dummy"
            }
        }

        let book = Book {
            metadata: BookMetadata::default(),
            chapters: vec![Chapter {
                number: ChapterNumber::Ordinal(1),
                title: None,
                paragraphs: vec![Paragraph::new(vec!["He walked in.".to_string()])],
            }],
        };
        let mut registry = CharacterRegistry::new();
        registry.freeze();
        let provider = Dummy;
        let cancellation = tokio_util::sync::CancellationToken::new();
        cancellation.cancel();
        let config = CastConfig::default().with_cancellation(cancellation);

        let result = transform(&book, &registry, &TransformSpec::AllFemale, QualityLevel::Fast, &provider, &config).await;
        assert!(matches!(result, Err(CastError::Cancelled { .. })));
    }
}
