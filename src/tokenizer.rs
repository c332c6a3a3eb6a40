//! Token counting — chunk and analysis-window budgets are expressed in
//! tokens. Uses `tiktoken-rs`'s `cl100k_base` encoding, the
//! closest practical approximation across OpenAI, Anthropic, and local
//! models; falls back to a chars/4 heuristic if the encoder cannot be built.

use std::sync::OnceLock;
use tiktoken_rs::CoreBPE;

fn encoder() -> Option<&'static CoreBPE> {
    static ENCODER: OnceLock<Option<CoreBPE>> = OnceLock::new();
    ENCODER.get_or_init(|| tiktoken_rs::cl100k_base().ok()).as_ref()
}

/// Estimate the token count of `text`. `model` is currently unused for
/// selecting an encoding (all supported providers tokenize closely enough to
/// `cl100k_base` for budgeting purposes) but is kept in the signature so a
/// model-specific encoder can be plugged in later without changing callers.
pub fn count_tokens(text: &str, _model: &str) -> usize {
    match encoder() {
        Some(bpe) => bpe.encode_ordinary(text).len(),
        None => text.len().div_ceil(4),
    }
}
