// Domain errors - Error types for the domain layer

use std::fmt;

/// Domain-specific error types
#[derive(Debug, Clone, PartialEq)]
pub enum DomainError {
    /// Malformed script line or marker
    ParseError(String),
    /// Speech synthesis failed but may succeed on retry
    TransientSynthesis(String),
    /// Speech synthesis failed for good (retries exhausted or rejected request)
    PermanentSynthesis(String),
    /// No subtitle cues inside the segment's line range
    SelectionEmptyRange(String),
    /// LLM call failed or returned unusable output
    SelectionCollaborator(String),
    /// Extracted video length disagrees with the narration audio
    DurationMismatch { video: f64, audio: f64, tolerance: f64 },
    /// External media tool exited abnormally
    ExtractionTool(String),
    /// Final concatenation failed or had nothing to concatenate
    CompositionFailed(String),
    /// Missing credentials or input files, aborts the run
    FatalPrecondition(String),
    /// Cache storage failure
    CacheIo(String),
    /// Invalid configuration value
    Config(String),
    /// A pooled worker task panicked or was cancelled
    WorkerAborted(String),
}

impl DomainError {
    /// Whether a retry of the same call can reasonably succeed
    pub fn is_transient(&self) -> bool {
        matches!(self, DomainError::TransientSynthesis(_))
    }

    /// Short machine-friendly tag used in reports
    pub fn kind(&self) -> &'static str {
        match self {
            DomainError::ParseError(_) => "parse_error",
            DomainError::TransientSynthesis(_) => "transient_synthesis",
            DomainError::PermanentSynthesis(_) => "permanent_synthesis",
            DomainError::SelectionEmptyRange(_) => "selection_empty_range",
            DomainError::SelectionCollaborator(_) => "selection_collaborator",
            DomainError::DurationMismatch { .. } => "duration_mismatch",
            DomainError::ExtractionTool(_) => "extraction_tool",
            DomainError::CompositionFailed(_) => "composition_failed",
            DomainError::FatalPrecondition(_) => "fatal_precondition",
            DomainError::CacheIo(_) => "cache_io",
            DomainError::Config(_) => "config",
            DomainError::WorkerAborted(_) => "worker_aborted",
        }
    }
}

impl fmt::Display for DomainError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DomainError::ParseError(msg) => write!(f, "Parse error: {}", msg),
            DomainError::TransientSynthesis(msg) => {
                write!(f, "Transient synthesis error: {}", msg)
            }
            DomainError::PermanentSynthesis(msg) => {
                write!(f, "Permanent synthesis error: {}", msg)
            }
            DomainError::SelectionEmptyRange(msg) => write!(f, "No cues in range: {}", msg),
            DomainError::SelectionCollaborator(msg) => {
                write!(f, "Clip selection collaborator error: {}", msg)
            }
            DomainError::DurationMismatch {
                video,
                audio,
                tolerance,
            } => write!(
                f,
                "Duration mismatch: video {:.2}s vs audio {:.2}s (difference {:.2}s > {:.1}s)",
                video,
                audio,
                (video - audio).abs(),
                tolerance
            ),
            DomainError::ExtractionTool(msg) => write!(f, "Media tool error: {}", msg),
            DomainError::CompositionFailed(msg) => write!(f, "Composition failed: {}", msg),
            DomainError::FatalPrecondition(msg) => write!(f, "Fatal precondition: {}", msg),
            DomainError::CacheIo(msg) => write!(f, "Cache I/O error: {}", msg),
            DomainError::Config(msg) => write!(f, "Configuration error: {}", msg),
            DomainError::WorkerAborted(msg) => write!(f, "Worker task aborted: {}", msg),
        }
    }
}

impl std::error::Error for DomainError {}
