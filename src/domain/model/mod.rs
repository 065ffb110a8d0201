// Domain models - Core types and data structures

use std::fmt;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::errors::DomainError;

/// Seconds added to the narration length for the shortest acceptable clip
pub const MIN_PADDING_SECONDS: f64 = 0.5;
/// Seconds added to the narration length for the longest acceptable clip
pub const MAX_PADDING_SECONDS: f64 = 2.0;
/// Allowed gap between a cut clip and its narration audio
pub const EXTRACTION_TOLERANCE_SECONDS: f64 = 1.0;
/// Speaking rate used when no synthesized audio is available yet
pub const ESTIMATED_CHARS_PER_SECOND: f64 = 6.0;

/// Inclusive range of subtitle cue indices
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LineRange {
    pub start: u32,
    pub end: u32,
}

impl LineRange {
    /// Create a new range, rejecting reversed bounds
    pub fn new(start: u32, end: u32) -> Result<Self, DomainError> {
        if start > end {
            return Err(DomainError::ParseError(format!(
                "line range start {} is after end {}",
                start, end
            )));
        }
        Ok(Self { start, end })
    }

    /// Single-line range
    pub fn single(line: u32) -> Self {
        Self {
            start: line,
            end: line,
        }
    }

    pub fn contains(&self, index: u32) -> bool {
        self.start <= index && index <= self.end
    }

    /// Smallest range covering both
    pub fn union(&self, other: &LineRange) -> LineRange {
        LineRange {
            start: self.start.min(other.start),
            end: self.end.max(other.end),
        }
    }
}

impl fmt::Display for LineRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.start, self.end)
    }
}

/// One script-level unit of narration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScriptSegment {
    /// 1-based position in the script
    pub ordinal: usize,
    pub text: String,
    pub line_range: LineRange,
    /// Author-declared duration in seconds
    pub duration_hint: Option<f64>,
    /// Every marker range that contributed to `line_range`
    pub marker_ranges: Vec<LineRange>,
}

impl ScriptSegment {
    /// Narration length guess used before real audio exists
    pub fn estimated_duration(&self) -> f64 {
        estimate_speech_duration(&self.text)
    }

    /// Short preview for logs and reports
    pub fn preview(&self) -> String {
        preview_text(&self.text, 40)
    }
}

/// Estimate how long `text` takes to read aloud
pub fn estimate_speech_duration(text: &str) -> f64 {
    text.chars().count() as f64 / ESTIMATED_CHARS_PER_SECOND
}

/// Truncate on a character boundary
pub fn preview_text(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        text.to_string()
    } else {
        let head: String = text.chars().take(max_chars).collect();
        format!("{}...", head)
    }
}

/// One timed subtitle entry from the source track
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubtitleCue {
    /// 1-based index as numbered in the subtitle file
    pub index: u32,
    pub start_time: f64,
    pub end_time: f64,
    pub text: String,
}

impl SubtitleCue {
    pub fn duration(&self) -> f64 {
        self.end_time - self.start_time
    }
}

/// Qualitative bucket for selection confidence
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MatchLevel {
    Excellent,
    Good,
    Acceptable,
    Poor,
    None,
}

impl MatchLevel {
    /// Parse a level name, case-insensitive
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_lowercase().as_str() {
            "excellent" => Some(MatchLevel::Excellent),
            "good" => Some(MatchLevel::Good),
            "acceptable" => Some(MatchLevel::Acceptable),
            "poor" => Some(MatchLevel::Poor),
            "none" => Some(MatchLevel::None),
            _ => None,
        }
    }

    /// Bucket a 0-100 quality score
    pub fn from_score(score: u8) -> Self {
        match score {
            90..=100 => MatchLevel::Excellent,
            70..=89 => MatchLevel::Good,
            50..=69 => MatchLevel::Acceptable,
            30..=49 => MatchLevel::Poor,
            _ => MatchLevel::None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            MatchLevel::Excellent => "excellent",
            MatchLevel::Good => "good",
            MatchLevel::Acceptable => "acceptable",
            MatchLevel::Poor => "poor",
            MatchLevel::None => "none",
        }
    }
}

impl fmt::Display for MatchLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Half-open interval of source video time in seconds
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TimeRange {
    pub start: f64,
    pub end: f64,
}

impl TimeRange {
    pub fn new(start: f64, end: f64) -> Self {
        Self { start, end }
    }

    pub fn duration(&self) -> f64 {
        self.end - self.start
    }
}

/// A contiguous run of cues with the timing derived from them
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CueSpan {
    pub start_line: u32,
    pub end_line: u32,
    pub start_time: f64,
    pub end_time: f64,
}

impl CueSpan {
    pub fn duration(&self) -> f64 {
        self.end_time - self.start_time
    }

    pub fn time_range(&self) -> TimeRange {
        TimeRange::new(self.start_time, self.end_time)
    }
}

/// How a selection is cut out of the source video
#[derive(Debug, Clone, PartialEq)]
pub enum ClipPlan {
    /// One contiguous interval
    SingleRange(TimeRange),
    /// Several disjoint intervals stitched in order
    MultiRange(Vec<TimeRange>),
}

impl ClipPlan {
    pub fn ranges(&self) -> Vec<TimeRange> {
        match self {
            ClipPlan::SingleRange(range) => vec![*range],
            ClipPlan::MultiRange(ranges) => ranges.clone(),
        }
    }

    pub fn total_duration(&self) -> f64 {
        self.ranges().iter().map(TimeRange::duration).sum()
    }
}

/// The resolved source-video time range for one segment
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClipSelection {
    pub ordinal: usize,
    pub start_line: u32,
    pub end_line: u32,
    pub start_time: f64,
    pub end_time: f64,
    /// Total cut length; for stitched selections the sum of all spans
    pub duration: f64,
    pub confidence: f64,
    pub quality_score: u8,
    pub match_level: MatchLevel,
    pub reason: String,
    #[serde(default)]
    pub content_match: String,
    #[serde(default)]
    pub issues: Vec<String>,
    /// Present only for multi-range stitches, in playback order
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub spans: Vec<CueSpan>,
}

impl ClipSelection {
    /// Cutting plan for the extraction stage
    pub fn plan(&self) -> ClipPlan {
        if self.spans.len() > 1 {
            ClipPlan::MultiRange(self.spans.iter().map(CueSpan::time_range).collect())
        } else {
            ClipPlan::SingleRange(TimeRange::new(self.start_time, self.end_time))
        }
    }
}

/// Acceptable clip lengths for a narration of a given length
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DurationWindow {
    pub min: f64,
    pub max: f64,
}

impl DurationWindow {
    pub fn for_audio(audio_duration: f64) -> Self {
        Self {
            min: audio_duration + MIN_PADDING_SECONDS,
            max: audio_duration + MAX_PADDING_SECONDS,
        }
    }

    pub fn contains(&self, duration: f64) -> bool {
        duration >= self.min && duration <= self.max
    }
}

/// Synthesized narration for one segment
#[derive(Debug, Clone, PartialEq)]
pub struct AudioArtifact {
    pub ordinal: usize,
    pub path: PathBuf,
    pub duration: f64,
    pub from_cache: bool,
}

/// Finished per-segment clip
#[derive(Debug, Clone, PartialEq)]
pub struct VideoArtifact {
    pub ordinal: usize,
    pub path: PathBuf,
    pub from_cache: bool,
}

/// Final disposition of one segment
#[derive(Debug, Clone, PartialEq)]
pub enum SegmentOutcome {
    Succeeded(VideoArtifact),
    Skipped(String),
    Failed(DomainError),
}

impl SegmentOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, SegmentOutcome::Succeeded(_))
    }

    pub fn label(&self) -> &'static str {
        match self {
            SegmentOutcome::Succeeded(_) => "succeeded",
            SegmentOutcome::Skipped(_) => "skipped",
            SegmentOutcome::Failed(_) => "failed",
        }
    }

    /// Why the segment was dropped, if it was
    pub fn reason(&self) -> Option<String> {
        match self {
            SegmentOutcome::Succeeded(_) => None,
            SegmentOutcome::Skipped(reason) => Some(reason.clone()),
            SegmentOutcome::Failed(err) => Some(err.to_string()),
        }
    }
}

/// Report line for one segment
#[derive(Debug, Clone, Serialize)]
pub struct SegmentReport {
    pub ordinal: usize,
    pub text: String,
    pub line_range: LineRange,
    pub outcome: String,
    pub reason: Option<String>,
    pub match_level: Option<MatchLevel>,
    pub audio_cached: bool,
    pub selection_cached: bool,
    pub clip_cached: bool,
    pub clip_path: Option<PathBuf>,
}

/// Summary of a whole run
#[derive(Debug, Clone, Serialize)]
pub struct PipelineReport {
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub output: Option<PathBuf>,
    /// Why the final concatenation did not happen
    #[serde(skip_serializing_if = "Option::is_none")]
    pub composition_error: Option<String>,
    pub segments: Vec<SegmentReport>,
    pub included: usize,
    pub dropped: usize,
}

impl PipelineReport {
    pub fn is_success(&self) -> bool {
        self.output.is_some() && self.included > 0
    }
}
