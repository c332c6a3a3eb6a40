//! Error taxonomy for the pipeline (spec.md §7).
//!
//! Transient provider failures are retried internally and never reach this
//! type unless the retry budget is exhausted. Model-quality defects (residual
//! gendered language, low QC scores) are never errors — they become
//! `QualityReport` entries. `MergeConflict` during character analysis is
//! logged, not raised, since spec.md §7 states it "never aborts". `Cancelled`
//! covers spec.md §5's external-cancellation contract: any stage observing a
//! triggered `CancellationToken` aborts and discards its partial work by
//! returning this variant rather than a partially built result.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CastError {
    #[error("input error in {stage}: {message}")]
    Input { stage: String, message: String },

    #[error("provider '{provider}' transient failure after {attempts} attempts: {message}")]
    ProviderTransient {
        provider: String,
        attempts: u32,
        message: String,
    },

    #[error("provider '{provider}' permanent failure: {message}")]
    ProviderPermanent { provider: String, message: String },

    #[error("alignment invariant violated for chunk {chunk_id}: {message}")]
    Alignment {
        chunk_id: uuid::Uuid,
        message: String,
    },

    #[error("configuration error: {0}")]
    Config(String),

    #[error("{stage} cancelled before completion")]
    Cancelled { stage: String },

    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl CastError {
    pub fn input(stage: impl Into<String>, message: impl Into<String>) -> Self {
        CastError::Input {
            stage: stage.into(),
            message: message.into(),
        }
    }

    pub fn provider_permanent(provider: impl Into<String>, message: impl Into<String>) -> Self {
        CastError::ProviderPermanent {
            provider: provider.into(),
            message: message.into(),
        }
    }

    pub fn provider_transient(
        provider: impl Into<String>,
        attempts: u32,
        message: impl Into<String>,
    ) -> Self {
        CastError::ProviderTransient {
            provider: provider.into(),
            attempts,
            message: message.into(),
        }
    }

    pub fn alignment(chunk_id: uuid::Uuid, message: impl Into<String>) -> Self {
        CastError::Alignment {
            chunk_id,
            message: message.into(),
        }
    }

    pub fn cancelled(stage: impl Into<String>) -> Self {
        CastError::Cancelled { stage: stage.into() }
    }

    /// Whether this error category is safe to retry at a higher level (the
    /// transform engine falls back to passthrough rather than retrying
    /// alignment errors a second time; this distinguishes that from a hard
    /// provider failure which aborts the pipeline).
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            CastError::Input { .. }
                | CastError::ProviderPermanent { .. }
                | CastError::Config(_)
                | CastError::Cancelled { .. }
        )
    }
}

pub type CastResult<T> = Result<T, CastError>;
