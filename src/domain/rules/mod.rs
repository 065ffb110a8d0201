// Domain rules - Timing policies shared by the pipeline stages

use crate::domain::errors::*;
use crate::domain::model::*;

/// What reconciliation did to a span
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Adjustment {
    Unchanged,
    Trimmed,
    Extended,
}

/// Result of fitting a span into a duration window
#[derive(Debug, Clone, PartialEq)]
pub struct Reconciled {
    pub span: CueSpan,
    pub adjustment: Adjustment,
    pub issues: Vec<String>,
}

/// Business rules for fitting cue spans to narration length
pub struct DurationReconciler;

impl DurationReconciler {
    /// Fit one span into `window` by moving its end line.
    ///
    /// `cues` is the segment's cue window sorted by index. Too long spans are
    /// trimmed from their end, too short spans are extended with the cues
    /// that follow. When the window cannot be reached the closest span is
    /// kept and the shortfall is reported in `issues`.
    pub fn reconcile_span(cues: &[SubtitleCue], span: CueSpan, window: DurationWindow) -> Reconciled {
        let duration = span.duration();
        if duration > window.max {
            Self::trim(cues, span, window)
        } else if duration < window.min {
            Self::extend(cues, span, window)
        } else {
            Reconciled {
                span,
                adjustment: Adjustment::Unchanged,
                issues: Vec::new(),
            }
        }
    }

    /// Fit a stitched selection; only the last span is resized.
    pub fn reconcile_spans(
        cues: &[SubtitleCue],
        spans: &[CueSpan],
        window: DurationWindow,
    ) -> (Vec<CueSpan>, Vec<String>) {
        let mut spans = spans.to_vec();
        let mut issues = Vec::new();

        while spans.len() > 1 {
            let head: f64 = spans[..spans.len() - 1].iter().map(CueSpan::duration).sum();
            if head < window.max {
                break;
            }
            if let Some(dropped) = spans.pop() {
                issues.push(format!(
                    "dropped span {}-{}: earlier spans already fill {:.2}s",
                    dropped.start_line, dropped.end_line, head
                ));
            }
        }

        let Some(last) = spans.pop() else {
            return (spans, issues);
        };
        let head: f64 = spans.iter().map(CueSpan::duration).sum();
        let remaining = DurationWindow {
            min: (window.min - head).max(0.0),
            max: window.max - head,
        };
        let reconciled = Self::reconcile_span(cues, last, remaining);
        spans.push(reconciled.span);
        issues.extend(reconciled.issues);
        (spans, issues)
    }

    fn trim(cues: &[SubtitleCue], span: CueSpan, window: DurationWindow) -> Reconciled {
        let mut trimmed: Option<&SubtitleCue> = None;
        for cue in cues
            .iter()
            .filter(|c| c.index >= span.start_line && c.index <= span.end_line)
        {
            if cue.end_time - span.start_time <= window.max {
                trimmed = Some(cue);
            } else {
                break;
            }
        }

        let mut issues = Vec::new();
        let end_cue = match trimmed {
            Some(cue) => cue,
            None => {
                // Even the first cue overshoots; keep it rather than an empty cut.
                issues.push(format!(
                    "cue {} alone exceeds the {:.2}s maximum",
                    span.start_line, window.max
                ));
                match cues.iter().find(|c| c.index == span.start_line) {
                    Some(cue) => cue,
                    None => {
                        return Reconciled {
                            span,
                            adjustment: Adjustment::Unchanged,
                            issues,
                        }
                    }
                }
            }
        };

        let span = CueSpan {
            end_line: end_cue.index,
            end_time: end_cue.end_time,
            ..span
        };
        if span.duration() < window.min {
            issues.push(format!(
                "trimmed clip {:.2}s is shorter than the {:.2}s minimum",
                span.duration(),
                window.min
            ));
        }
        Reconciled {
            span,
            adjustment: Adjustment::Trimmed,
            issues,
        }
    }

    fn extend(cues: &[SubtitleCue], span: CueSpan, window: DurationWindow) -> Reconciled {
        let mut extended = span;
        for cue in cues.iter().filter(|c| c.index > span.end_line) {
            let candidate = cue.end_time - span.start_time;
            if candidate > window.max {
                break;
            }
            extended.end_line = cue.index;
            extended.end_time = cue.end_time;
            if candidate >= window.min {
                break;
            }
        }

        let mut issues = Vec::new();
        if extended.duration() < window.min {
            issues.push(format!(
                "not enough cues after line {} to reach {:.2}s (got {:.2}s)",
                span.end_line,
                window.min,
                extended.duration()
            ));
        }
        let adjustment = if extended.end_line > span.end_line {
            Adjustment::Extended
        } else {
            Adjustment::Unchanged
        };
        Reconciled {
            span: extended,
            adjustment,
            issues,
        }
    }

    /// Greedy pick used when the LLM is unavailable: take cues from the start
    /// of the window until the span reaches `target` seconds.
    pub fn greedy_span(cues: &[SubtitleCue], target: f64) -> Option<CueSpan> {
        let first = cues.first()?;
        let mut span = CueSpan {
            start_line: first.index,
            end_line: first.index,
            start_time: first.start_time,
            end_time: first.end_time,
        };
        for cue in cues.iter().skip(1) {
            if span.duration() >= target {
                break;
            }
            span.end_line = cue.index;
            span.end_time = cue.end_time;
        }
        Some(span)
    }
}

/// Business rules for validating extracted media
pub struct ExtractionRules;

impl ExtractionRules {
    /// Length to cut from the source; the narration bounds the final clip
    pub fn cut_length(selected: f64, audio_duration: f64) -> f64 {
        selected.min(audio_duration + EXTRACTION_TOLERANCE_SECONDS)
    }

    /// Per-range lengths for a stitch; the tail gives way so the total obeys `cut_length`
    pub fn stitch_lengths(ranges: &[TimeRange], audio_duration: f64) -> Vec<f64> {
        let total: f64 = ranges.iter().map(TimeRange::duration).sum();
        let mut budget = Self::cut_length(total, audio_duration);
        ranges
            .iter()
            .map(|range| {
                let length = range.duration().min(budget).max(0.0);
                budget -= length;
                length
            })
            .collect()
    }

    /// Reject clips whose length strays too far from the narration
    pub fn check_duration(video: f64, audio: f64) -> Result<(), DomainError> {
        if (video - audio).abs() > EXTRACTION_TOLERANCE_SECONDS {
            return Err(DomainError::DurationMismatch {
                video,
                audio,
                tolerance: EXTRACTION_TOLERANCE_SECONDS,
            });
        }
        Ok(())
    }
}

/// A burned-in caption with its time slice inside the clip
#[derive(Debug, Clone, PartialEq)]
pub struct CaptionFragment {
    pub start: f64,
    pub end: f64,
    pub text: String,
}

const CAPTION_BREAKS: &[char] = &['，', '。', ',', '!', '！', '?', '？', '；', ';'];
const CAPTION_LEADING_NOISE: &[char] = &['，', '。', ',', '.', ' ', '\t'];

/// Business rules for caption timing
pub struct CaptionLayout;

impl CaptionLayout {
    /// Split narration at clause punctuation, punctuation kept on the left
    pub fn split(text: &str) -> Vec<String> {
        let clean = text.trim_start_matches(CAPTION_LEADING_NOISE).trim_end();
        let mut fragments = Vec::new();
        let mut current = String::new();
        for ch in clean.chars() {
            current.push(ch);
            if CAPTION_BREAKS.contains(&ch) {
                if !current.trim().is_empty() {
                    fragments.push(current.trim().to_string());
                }
                current.clear();
            }
        }
        if !current.trim().is_empty() {
            fragments.push(current.trim().to_string());
        }
        fragments
    }

    /// Give each fragment a slice of `duration` proportional to its length
    pub fn layout(text: &str, duration: f64) -> Vec<CaptionFragment> {
        let fragments = Self::split(text);
        let total_chars: usize = fragments.iter().map(|f| f.chars().count()).sum();
        if total_chars == 0 {
            return Vec::new();
        }

        let mut captions = Vec::with_capacity(fragments.len());
        let mut cursor = 0.0;
        let last = fragments.len() - 1;
        for (i, fragment) in fragments.into_iter().enumerate() {
            let share = fragment.chars().count() as f64 / total_chars as f64 * duration;
            let end = if i == last { duration } else { cursor + share };
            captions.push(CaptionFragment {
                start: cursor,
                end,
                text: fragment,
            });
            cursor = end;
        }
        captions
    }
}
