//! Narracut Library
//!
//! Narration-to-video pipeline: script parsing, cached speech synthesis,
//! LLM-assisted clip selection over a subtitle track, and ffmpeg assembly.

pub mod adapters;
pub mod app;
pub mod cache;
pub mod cli;
pub mod domain;
pub mod error;
pub mod ports;
pub mod script;
pub mod stages;
pub mod subtitles;

// Re-export commonly used types
pub use app::{PipelineInteractor, PipelineRequest, PipelineSettings};
pub use domain::errors::DomainError;
pub use domain::model::{PipelineReport, ScriptSegment, SegmentOutcome};
pub use error::{NarracutError, NarracutResult};
