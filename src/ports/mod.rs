// Ports - Interface definitions (contracts) for the external collaborators

use std::path::{Path, PathBuf};

use async_trait::async_trait;

use crate::domain::errors::*;
use crate::domain::model::*;

/// Port for text-to-speech synthesis
#[async_trait]
pub trait SpeechSynthesisPort: Send + Sync {
    /// Synthesize `text` with the given voice and return encoded audio bytes
    async fn synthesize(&self, text: &str, speaker_id: &str) -> Result<Vec<u8>, DomainError>;
}

/// Everything the clip selector is told about one segment
#[derive(Debug, Clone)]
pub struct SelectionRequest<'a> {
    pub narration: &'a str,
    /// Cues inside the segment's line range, sorted by index
    pub cues: &'a [SubtitleCue],
    /// Narration length the clip should accompany
    pub target_duration: f64,
    pub window: DurationWindow,
}

/// Port for LLM-assisted clip selection
#[async_trait]
pub trait ClipSelectorPort: Send + Sync {
    /// Ask for a cue range; returns the raw, unvalidated JSON reply
    async fn select_clip(&self, request: &SelectionRequest<'_>) -> Result<String, DomainError>;
}

/// How a concatenation treats its streams
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ConcatMode {
    /// Join silent intermediate cuts of a multi-range stitch
    StitchVideo,
    /// Join finished clips; audio is re-encoded, video copied when allowed
    Final { copy_video: bool },
}

/// Video stream parameters that must agree for a stream-copy concat
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamSignature {
    pub codec: String,
    pub width: u32,
    pub height: u32,
    pub frame_rate: String,
}

/// Port for the external media toolkit
#[async_trait]
pub trait MediaToolkitPort: Send + Sync {
    /// Cut `[start, start + duration)` from `source` into a silent video
    async fn cut(
        &self,
        source: &Path,
        start: f64,
        duration: f64,
        output: &Path,
    ) -> Result<(), DomainError>;

    /// Replace audio with `audio`, burn `captions` (SRT) and fit the target frame
    async fn mux(
        &self,
        video: &Path,
        audio: &Path,
        captions: &Path,
        duration: f64,
        output: &Path,
    ) -> Result<(), DomainError>;

    /// Concatenate `inputs` in order
    async fn concat(
        &self,
        inputs: &[PathBuf],
        output: &Path,
        mode: ConcatMode,
    ) -> Result<(), DomainError>;

    /// Container duration in seconds
    async fn probe_duration(&self, path: &Path) -> Result<f64, DomainError>;

    /// Primary video stream parameters
    async fn probe_signature(&self, path: &Path) -> Result<StreamSignature, DomainError>;
}
