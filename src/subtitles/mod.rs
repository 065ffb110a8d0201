//! Source subtitle track indexing and SRT helpers

use std::path::Path;
use std::sync::OnceLock;

use regex::Regex;
use tracing::{debug, warn};

use crate::domain::model::{LineRange, SubtitleCue};
use crate::domain::rules::CaptionFragment;
use crate::error::NarracutResult;

fn timing_line() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r"^(\d{1,2}):(\d{2}):(\d{2})[,.](\d{3})\s*-->\s*(\d{1,2}):(\d{2}):(\d{2})[,.](\d{3})",
        )
        .expect("timing pattern is valid")
    })
}

fn blank_line_split() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\n\s*\n").expect("block separator pattern is valid"))
}

/// Ordered, index-addressable view of a subtitle track
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SubtitleIndex {
    cues: Vec<SubtitleCue>,
}

impl SubtitleIndex {
    /// Build from cues in any order; sorted by index
    pub fn new(mut cues: Vec<SubtitleCue>) -> Self {
        cues.sort_by_key(|c| c.index);
        Self { cues }
    }

    /// Parse SRT text. Blocks that do not parse are skipped.
    pub fn parse(content: &str) -> Self {
        let normalized = content.replace("\r\n", "\n");
        let normalized = normalized.trim_start_matches('\u{feff}');
        let mut cues = Vec::new();
        let mut skipped = 0usize;

        for block in blank_line_split().split(normalized.trim()) {
            match parse_block(block) {
                Some(cue) => cues.push(cue),
                None => skipped += 1,
            }
        }

        if skipped > 0 {
            warn!("Skipped {} malformed subtitle blocks", skipped);
        }
        debug!("Indexed {} subtitle cues", cues.len());
        Self::new(cues)
    }

    /// Read and parse an SRT file
    pub fn load(path: &Path) -> NarracutResult<Self> {
        let content = std::fs::read_to_string(path)?;
        Ok(Self::parse(&content))
    }

    pub fn len(&self) -> usize {
        self.cues.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cues.is_empty()
    }

    pub fn cues(&self) -> &[SubtitleCue] {
        &self.cues
    }

    /// Cue with the given subtitle number
    pub fn cue(&self, index: u32) -> Option<&SubtitleCue> {
        self.cues
            .binary_search_by_key(&index, |c| c.index)
            .ok()
            .map(|pos| &self.cues[pos])
    }

    /// Cues whose index lies inside `range`, in order
    pub fn window(&self, range: LineRange) -> &[SubtitleCue] {
        let from = self.cues.partition_point(|c| c.index < range.start);
        let to = self.cues.partition_point(|c| c.index <= range.end);
        &self.cues[from..to.max(from)]
    }

    /// Closest cue indices below and above a range, for diagnosing misaligned scripts
    pub fn nearest_outside(&self, range: LineRange) -> (Option<u32>, Option<u32>) {
        let below = self
            .cues
            .iter()
            .rev()
            .find(|c| c.index < range.start)
            .map(|c| c.index);
        let above = self.cues.iter().find(|c| c.index > range.end).map(|c| c.index);
        (below, above)
    }
}

fn parse_block(block: &str) -> Option<SubtitleCue> {
    let mut lines = block.lines().map(str::trim_end);
    let index = lines.next()?.trim().parse::<u32>().ok()?;
    let caps = timing_line().captures(lines.next()?.trim())?;

    let field = |i: usize| caps[i].parse::<f64>().ok();
    let start_time = field(1)? * 3600.0 + field(2)? * 60.0 + field(3)? + field(4)? / 1000.0;
    let end_time = field(5)? * 3600.0 + field(6)? * 60.0 + field(7)? + field(8)? / 1000.0;

    let text = lines.collect::<Vec<_>>().join("\n");
    if text.trim().is_empty() {
        return None;
    }

    Some(SubtitleCue {
        index,
        start_time,
        end_time,
        text,
    })
}

/// Format seconds as an SRT timestamp `HH:MM:SS,mmm`
pub fn format_srt_time(seconds: f64) -> String {
    let total_ms = (seconds.max(0.0) * 1000.0).round() as u64;
    let hours = total_ms / 3_600_000;
    let minutes = (total_ms % 3_600_000) / 60_000;
    let secs = (total_ms % 60_000) / 1000;
    let millis = total_ms % 1000;
    format!("{:02}:{:02}:{:02},{:03}", hours, minutes, secs, millis)
}

/// Render caption fragments as an SRT document
pub fn render_srt(captions: &[CaptionFragment]) -> String {
    captions
        .iter()
        .enumerate()
        .map(|(i, caption)| {
            format!(
                "{}\n{} --> {}\n{}\n",
                i + 1,
                format_srt_time(caption.start),
                format_srt_time(caption.end),
                caption.text
            )
        })
        .collect::<Vec<_>>()
        .join("\n")
}
