//! Logging and progress reporting for the gender-transform pipeline.
//!
//! A `ProgressEvent` enum, a `ProgressHandler` trait with console/log/silent
//! implementations, a process-wide handler set once at startup, and
//! convenience macros covering the pipeline's four stages: analysis,
//! chunking, transformation, and quality control.

use std::sync::Arc;

/// Progress event types for the pipeline's stages.
#[derive(Debug, Clone)]
pub enum ProgressEvent {
    /// Character analysis: whole-book single-call path chosen.
    AnalysisSingleCall { total_tokens: usize },
    /// Character analysis: stratified sampling windows chosen.
    AnalysisWindowsPlanned { window_count: usize, total_tokens: usize },
    /// One sampling window was issued to the provider.
    AnalysisWindowStarted { window_index: usize, range: (f32, f32) },
    /// One sampling window's extraction prompt returned.
    AnalysisWindowCompleted { window_index: usize, characters_found: usize },
    /// Registry merge step running across all windows.
    AnalysisMergeStarted { entry_count: usize },
    /// A merge conflict was resolved (never fatal — spec.md §7).
    AnalysisMergeConflict { canonical_name: String, resolution: String },
    /// Registry frozen and ready for transformation.
    AnalysisCompleted { character_count: usize },
    /// Chunking started for one chapter.
    ChunkingStarted { chapter_index: usize, paragraph_count: usize },
    /// Chunking produced N chunks for one chapter.
    ChunkingCompleted { chapter_index: usize, chunk_count: usize },
    /// A chunk transform request is about to be issued.
    TransformChunkStarted { chunk_id: uuid::Uuid, sentence_count: usize },
    /// A chunk transform request finished (success or fallback).
    TransformChunkCompleted { chunk_id: uuid::Uuid, used_fallback: bool },
    /// Assembly of all transformed chunks into the final book.
    AssemblyStarted { chunk_count: usize },
    AssemblyCompleted { paragraph_count: usize },
    /// One quality-control pass over the assembled book.
    QualityPassStarted { pass_number: usize, quality_level: String },
    QualityDefectFound { chapter_index: usize, kind: String, evidence: String },
    QualityPassCompleted { pass_number: usize, defects_remaining: usize, score: f32 },
    /// A retry of a provider call.
    RetryAttempt { operation: String, attempt: u32, max_attempts: u32, delay_ms: u64 },
    /// A provider call and its outcome.
    ProviderCall { provider: String, model: String, input_chars: usize },
    ProviderResponse { success: bool, output_chars: Option<usize> },
    /// An error occurred; operation names the stage, detail names the
    /// failing artifact (chunk id / chapter index / character name).
    Error { operation: String, error: String },
    Debug { operation: String, details: String },
}

/// Trait for handling progress events.
pub trait ProgressHandler: Send + Sync {
    fn handle_progress(&self, event: ProgressEvent);
}

/// Console progress handler: prints stage-tagged lines to stdout/stderr.
pub struct ConsoleProgressHandler {
    pub show_progress: bool,
    pub show_debug: bool,
}

impl ConsoleProgressHandler {
    pub fn new() -> Self {
        Self {
            show_progress: true,
            show_debug: false,
        }
    }

    pub fn quiet() -> Self {
        Self {
            show_progress: false,
            show_debug: false,
        }
    }

    pub fn verbose() -> Self {
        Self {
            show_progress: true,
            show_debug: true,
        }
    }

    fn format_message(&self, tag: &str, message: &str) -> String {
        format!("[{tag}] {message}")
    }
}

impl Default for ConsoleProgressHandler {
    fn default() -> Self {
        Self::new()
    }
}

impl ProgressHandler for ConsoleProgressHandler {
    fn handle_progress(&self, event: ProgressEvent) {
        match event {
            ProgressEvent::AnalysisSingleCall { total_tokens } => {
                if self.show_progress {
                    println!("{}", self.format_message("analyze", &format!("whole-book single call ({total_tokens} tokens)")));
                }
            }
            ProgressEvent::AnalysisWindowsPlanned { window_count, total_tokens } => {
                if self.show_progress {
                    println!("{}", self.format_message("analyze", &format!("{window_count} stratified windows ({total_tokens} tokens total)")));
                }
            }
            ProgressEvent::AnalysisWindowStarted { window_index, range } => {
                if self.show_debug {
                    println!("{}", self.format_message("analyze", &format!("window {window_index} [{:.2}, {:.2}]", range.0, range.1)));
                }
            }
            ProgressEvent::AnalysisWindowCompleted { window_index, characters_found } => {
                if self.show_progress {
                    println!("{}", self.format_message("analyze", &format!("window {window_index}: {characters_found} characters")));
                }
            }
            ProgressEvent::AnalysisMergeStarted { entry_count } => {
                if self.show_debug {
                    println!("{}", self.format_message("analyze", &format!("merging {entry_count} extracted entries")));
                }
            }
            ProgressEvent::AnalysisMergeConflict { canonical_name, resolution } => {
                if self.show_progress {
                    println!("{}", self.format_message("analyze", &format!("merge conflict on '{canonical_name}': {resolution}")));
                }
            }
            ProgressEvent::AnalysisCompleted { character_count } => {
                if self.show_progress {
                    println!("{}", self.format_message("analyze", &format!("registry frozen: {character_count} characters")));
                }
            }
            ProgressEvent::ChunkingStarted { chapter_index, paragraph_count } => {
                if self.show_debug {
                    println!("{}", self.format_message("chunk", &format!("chapter {chapter_index}: {paragraph_count} paragraphs")));
                }
            }
            ProgressEvent::ChunkingCompleted { chapter_index, chunk_count } => {
                if self.show_progress {
                    println!("{}", self.format_message("chunk", &format!("chapter {chapter_index}: {chunk_count} chunks")));
                }
            }
            ProgressEvent::TransformChunkStarted { chunk_id, sentence_count } => {
                if self.show_debug {
                    println!("{}", self.format_message("transform", &format!("chunk {chunk_id}: {sentence_count} sentences")));
                }
            }
            ProgressEvent::TransformChunkCompleted { chunk_id, used_fallback } => {
                if self.show_progress {
                    let note = if used_fallback { " (fallback passthrough)" } else { "" };
                    println!("{}", self.format_message("transform", &format!("chunk {chunk_id} done{note}")));
                }
            }
            ProgressEvent::AssemblyStarted { chunk_count } => {
                if self.show_debug {
                    println!("{}", self.format_message("assemble", &format!("reassembling {chunk_count} chunks")));
                }
            }
            ProgressEvent::AssemblyCompleted { paragraph_count } => {
                if self.show_progress {
                    println!("{}", self.format_message("assemble", &format!("{paragraph_count} paragraphs reassembled")));
                }
            }
            ProgressEvent::QualityPassStarted { pass_number, quality_level } => {
                if self.show_progress {
                    println!("{}", self.format_message("qc", &format!("pass {pass_number} ({quality_level})")));
                }
            }
            ProgressEvent::QualityDefectFound { chapter_index, kind, evidence } => {
                if self.show_debug {
                    println!("{}", self.format_message("qc", &format!("chapter {chapter_index}: {kind} -- {evidence}")));
                }
            }
            ProgressEvent::QualityPassCompleted { pass_number, defects_remaining, score } => {
                if self.show_progress {
                    println!("{}", self.format_message("qc", &format!("pass {pass_number} done: {defects_remaining} defects remaining, score {score:.1}")));
                }
            }
            ProgressEvent::RetryAttempt { operation, attempt, max_attempts, delay_ms } => {
                if self.show_progress {
                    println!("{}", self.format_message("retry", &format!("{operation} attempt {attempt}/{max_attempts}, waiting {delay_ms}ms")));
                }
            }
            ProgressEvent::ProviderCall { provider, model, input_chars } => {
                if self.show_debug {
                    println!("{}", self.format_message("provider", &format!("{provider}/{model} -- {input_chars} chars in")));
                }
            }
            ProgressEvent::ProviderResponse { success, output_chars } => {
                if self.show_debug {
                    if success {
                        println!("{}", self.format_message("provider", &format!("response -- {} chars", output_chars.unwrap_or(0))));
                    } else {
                        println!("{}", self.format_message("provider", "no response"));
                    }
                }
            }
            ProgressEvent::Error { operation, error } => {
                eprintln!("{}", self.format_message("error", &format!("{operation}: {error}")));
            }
            ProgressEvent::Debug { operation, details } => {
                if self.show_debug {
                    println!("{}", self.format_message("debug", &format!("{operation}: {details}")));
                }
            }
        }
    }
}

/// Silent progress handler that does nothing.
pub struct SilentProgressHandler;

impl ProgressHandler for SilentProgressHandler {
    fn handle_progress(&self, _event: ProgressEvent) {}
}

/// Progress handler that forwards to the `log`/`tracing` crates.
pub struct LogProgressHandler;

impl ProgressHandler for LogProgressHandler {
    fn handle_progress(&self, event: ProgressEvent) {
        match event {
            ProgressEvent::AnalysisSingleCall { total_tokens } => {
                log::info!("character analysis: single call, {total_tokens} tokens");
            }
            ProgressEvent::AnalysisWindowsPlanned { window_count, total_tokens } => {
                log::info!("character analysis: {window_count} windows, {total_tokens} tokens");
            }
            ProgressEvent::AnalysisWindowStarted { window_index, range } => {
                log::debug!("window {window_index} [{:.2}, {:.2}] started", range.0, range.1);
            }
            ProgressEvent::AnalysisWindowCompleted { window_index, characters_found } => {
                log::debug!("window {window_index}: {characters_found} characters found");
            }
            ProgressEvent::AnalysisMergeStarted { entry_count } => {
                log::debug!("merging {entry_count} extracted entries");
            }
            ProgressEvent::AnalysisMergeConflict { canonical_name, resolution } => {
                log::warn!("merge conflict on '{canonical_name}': {resolution}");
            }
            ProgressEvent::AnalysisCompleted { character_count } => {
                log::info!("registry frozen with {character_count} characters");
            }
            ProgressEvent::ChunkingStarted { chapter_index, paragraph_count } => {
                log::debug!("chunking chapter {chapter_index}: {paragraph_count} paragraphs");
            }
            ProgressEvent::ChunkingCompleted { chapter_index, chunk_count } => {
                log::debug!("chapter {chapter_index} chunked into {chunk_count} chunks");
            }
            ProgressEvent::TransformChunkStarted { chunk_id, sentence_count } => {
                log::debug!("transforming chunk {chunk_id} ({sentence_count} sentences)");
            }
            ProgressEvent::TransformChunkCompleted { chunk_id, used_fallback } => {
                if used_fallback {
                    log::warn!("chunk {chunk_id} fell back to passthrough");
                } else {
                    log::debug!("chunk {chunk_id} transformed");
                }
            }
            ProgressEvent::AssemblyStarted { chunk_count } => {
                log::debug!("assembling {chunk_count} chunks");
            }
            ProgressEvent::AssemblyCompleted { paragraph_count } => {
                log::info!("assembled {paragraph_count} paragraphs");
            }
            ProgressEvent::QualityPassStarted { pass_number, quality_level } => {
                log::info!("quality pass {pass_number} ({quality_level})");
            }
            ProgressEvent::QualityDefectFound { chapter_index, kind, evidence } => {
                log::debug!("chapter {chapter_index}: {kind} -- {evidence}");
            }
            ProgressEvent::QualityPassCompleted { pass_number, defects_remaining, score } => {
                log::info!("pass {pass_number} complete: {defects_remaining} defects, score {score:.1}");
            }
            ProgressEvent::RetryAttempt { operation, attempt, max_attempts, delay_ms } => {
                log::warn!("retry {attempt}/{max_attempts} for {operation}, waiting {delay_ms}ms");
            }
            ProgressEvent::ProviderCall { provider, model, input_chars } => {
                log::debug!("calling {provider}/{model} with {input_chars} chars");
            }
            ProgressEvent::ProviderResponse { success, output_chars } => {
                if success {
                    log::debug!("provider response: {} chars", output_chars.unwrap_or(0));
                } else {
                    log::warn!("provider call failed");
                }
            }
            ProgressEvent::Error { operation, error } => {
                log::error!("{operation}: {error}");
            }
            ProgressEvent::Debug { operation, details } => {
                log::debug!("{operation}: {details}");
            }
        }
    }
}

/// Global progress handler, set once at startup.
static PROGRESS_HANDLER: std::sync::OnceLock<Arc<dyn ProgressHandler>> = std::sync::OnceLock::new();

/// Initialize the global progress handler. Subsequent calls are ignored
/// (matches `OnceLock` semantics -- the first handler wins).
pub fn init_progress_handler(handler: Arc<dyn ProgressHandler>) {
    let _ = PROGRESS_HANDLER.set(handler);
}

fn get_progress_handler() -> Arc<dyn ProgressHandler> {
    PROGRESS_HANDLER
        .get_or_init(|| Arc::new(ConsoleProgressHandler::new()))
        .clone()
}

pub fn report_progress(event: ProgressEvent) {
    get_progress_handler().handle_progress(event);
}

#[macro_export]
macro_rules! progress_debug {
    ($operation:expr, $($arg:tt)*) => {
        $crate::logging::report_progress($crate::logging::ProgressEvent::Debug {
            operation: $operation.to_string(),
            details: format!($($arg)*),
        });
    };
}

#[macro_export]
macro_rules! progress_error {
    ($operation:expr, $($arg:tt)*) => {
        $crate::logging::report_progress($crate::logging::ProgressEvent::Error {
            operation: $operation.to_string(),
            error: format!($($arg)*),
        });
    };
}
