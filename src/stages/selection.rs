// Clip selection stage - LLM-assisted cue range choice with validation

use std::sync::Arc;

use serde_json::Value;
use tokio::sync::Semaphore;
use tracing::{debug, info, warn};

use crate::cache::{CacheKey, ContentAddressedCache};
use crate::domain::errors::*;
use crate::domain::model::*;
use crate::domain::rules::*;
use crate::ports::*;
use crate::stages::{acquire, run_in_slots};
use crate::subtitles::SubtitleIndex;

/// A selector reply that passed schema validation
#[derive(Debug, Clone, PartialEq)]
pub struct ValidReply {
    /// Inclusive cue index pairs in playback order
    pub ranges: Vec<(u32, u32)>,
    pub confidence: f64,
    pub quality_score: u8,
    pub match_level: MatchLevel,
    pub reason: String,
    pub content_match: String,
    pub issues: Vec<String>,
}

/// Outcome of validating a raw selector reply
#[derive(Debug, Clone, PartialEq)]
pub enum LlmVerdict {
    Valid(ValidReply),
    Malformed(String),
}

impl LlmVerdict {
    /// Validate `raw` against the cue window offered to the selector.
    ///
    /// Line numbers must name cues in `cues`; any timestamps in the reply are
    /// ignored. Scores are clamped into range and a missing or unknown match
    /// level is derived from the quality score.
    pub fn parse(raw: &str, cues: &[SubtitleCue]) -> Self {
        let body = match (raw.find('{'), raw.rfind('}')) {
            (Some(open), Some(close)) if open < close => &raw[open..=close],
            _ => return LlmVerdict::Malformed("reply contains no JSON object".to_string()),
        };
        let value: Value = match serde_json::from_str(body) {
            Ok(value) => value,
            Err(e) => return LlmVerdict::Malformed(format!("reply is not valid JSON: {}", e)),
        };

        let ranges = match Self::ranges(&value) {
            Ok(ranges) => ranges,
            Err(reason) => return LlmVerdict::Malformed(reason),
        };
        for &(start, end) in &ranges {
            for line in [start, end] {
                if !cues.iter().any(|c| c.index == line) {
                    return LlmVerdict::Malformed(format!(
                        "line {} is not in the offered cue window",
                        line
                    ));
                }
            }
        }

        let quality_score = value
            .get("quality_score")
            .and_then(number)
            .map(|q| q.clamp(0.0, 100.0).round() as u8)
            .unwrap_or(50);
        let confidence = value
            .get("confidence")
            .and_then(number)
            .map(|c| c.clamp(0.0, 1.0))
            .unwrap_or(quality_score as f64 / 100.0);
        let match_level = value
            .get("match_level")
            .and_then(Value::as_str)
            .and_then(MatchLevel::parse)
            .unwrap_or_else(|| MatchLevel::from_score(quality_score));
        let text = |field: &str| {
            value
                .get(field)
                .and_then(Value::as_str)
                .unwrap_or_default()
                .trim()
                .to_string()
        };
        let issues = value
            .get("issues")
            .and_then(Value::as_array)
            .map(|items| {
                items
                    .iter()
                    .filter_map(Value::as_str)
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .map(String::from)
                    .collect()
            })
            .unwrap_or_default();

        LlmVerdict::Valid(ValidReply {
            ranges,
            confidence,
            quality_score,
            match_level,
            reason: text("reason"),
            content_match: text("content_match"),
            issues,
        })
    }

    fn ranges(value: &Value) -> Result<Vec<(u32, u32)>, String> {
        let pair = |item: &Value| -> Result<(u32, u32), String> {
            let start = item
                .get("start_line")
                .and_then(line_number)
                .ok_or("start_line missing or not a line number")?;
            let end = item
                .get("end_line")
                .and_then(line_number)
                .ok_or("end_line missing or not a line number")?;
            if start > end {
                return Err(format!("start_line {} is after end_line {}", start, end));
            }
            Ok((start, end))
        };

        let stitched = match value.get("ranges").and_then(Value::as_array) {
            Some(items) if !items.is_empty() => items.iter().map(pair).collect::<Result<Vec<_>, _>>()?,
            _ => return Ok(vec![pair(value)?]),
        };
        for window in stitched.windows(2) {
            if window[0].1 >= window[1].0 {
                return Err(format!(
                    "ranges {}-{} and {}-{} overlap or are out of order",
                    window[0].0, window[0].1, window[1].0, window[1].1
                ));
            }
        }
        Ok(stitched)
    }
}

fn number(value: &Value) -> Option<f64> {
    let n = match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    };
    n.filter(|n| n.is_finite())
}

fn line_number(value: &Value) -> Option<u32> {
    let n = number(value)?;
    if n >= 0.0 && n.fract() == 0.0 && n <= u32::MAX as f64 {
        Some(n as u32)
    } else {
        None
    }
}

/// What can be decided about a segment before its narration exists
#[derive(Debug, Clone, PartialEq)]
pub enum SelectionPrep {
    /// A previous run already chose a clip
    Cached(ClipSelection),
    /// Nothing to select from
    Skipped(String),
    /// Needs the selector once the narration length is known
    Pending(Vec<SubtitleCue>),
}

/// Per-segment selection result
#[derive(Debug, Clone, PartialEq)]
pub enum SelectionResult {
    Selected {
        selection: ClipSelection,
        from_cache: bool,
    },
    Skipped(String),
}

impl SelectionResult {
    pub fn selection(&self) -> Option<&ClipSelection> {
        match self {
            SelectionResult::Selected { selection, .. } => Some(selection),
            SelectionResult::Skipped(_) => None,
        }
    }
}

const FALLBACK_CONFIDENCE: f64 = 0.5;
const FALLBACK_QUALITY: u8 = 40;

/// Chooses which source cues accompany each segment
pub struct ClipSelectionStage {
    selector: Arc<dyn ClipSelectorPort>,
    cache: Arc<ContentAddressedCache>,
    subtitles: Arc<SubtitleIndex>,
    /// Tag cache keys for scripts parsed from inline markers
    embedded_keys: bool,
    workers: Semaphore,
}

impl ClipSelectionStage {
    pub fn new(
        selector: Arc<dyn ClipSelectorPort>,
        cache: Arc<ContentAddressedCache>,
        subtitles: Arc<SubtitleIndex>,
        embedded_keys: bool,
        workers: usize,
    ) -> Self {
        Self {
            selector,
            cache,
            subtitles,
            embedded_keys,
            workers: Semaphore::new(workers.max(1)),
        }
    }

    fn key(&self, segment: &ScriptSegment) -> CacheKey {
        CacheKey::clip_selection(segment.line_range, &segment.text, self.embedded_keys)
    }

    /// Cache lookup and cue-window restriction; needs no audio
    pub fn prepare(&self, segment: &ScriptSegment) -> SelectionPrep {
        if let Some(mut selection) = self.cache.get_json::<ClipSelection>(&self.key(segment)) {
            debug!(ordinal = segment.ordinal, cache_hit = true, "Clip selection reused");
            selection.ordinal = segment.ordinal;
            return SelectionPrep::Cached(selection);
        }

        let cues = self.subtitles.window(segment.line_range);
        if cues.is_empty() {
            let (below, above) = self.subtitles.nearest_outside(segment.line_range);
            let describe = |line: Option<u32>| line.map_or("none".to_string(), |l| l.to_string());
            let reason = DomainError::SelectionEmptyRange(format!(
                "{} (nearest cues: {} below, {} above)",
                segment.line_range,
                describe(below),
                describe(above)
            ))
            .to_string();
            warn!(ordinal = segment.ordinal, range = %segment.line_range, "Skipping segment: {}", reason);
            return SelectionPrep::Skipped(reason);
        }
        SelectionPrep::Pending(cues.to_vec())
    }

    /// Finish a prepared selection against the real narration length
    pub async fn resolve(
        &self,
        segment: &ScriptSegment,
        prep: SelectionPrep,
        audio_duration: f64,
    ) -> SelectionResult {
        let cues = match prep {
            SelectionPrep::Cached(selection) => {
                return SelectionResult::Selected {
                    selection,
                    from_cache: true,
                }
            }
            SelectionPrep::Skipped(reason) => return SelectionResult::Skipped(reason),
            SelectionPrep::Pending(cues) => cues,
        };

        let window = DurationWindow::for_audio(audio_duration);
        let verdict = {
            let _permit = match acquire(&self.workers).await {
                Ok(permit) => permit,
                Err(e) => return SelectionResult::Skipped(e.to_string()),
            };
            let request = SelectionRequest {
                narration: &segment.text,
                cues: &cues,
                target_duration: audio_duration,
                window,
            };
            debug!(ordinal = segment.ordinal, cues = cues.len(), "Querying clip selector");
            match self.selector.select_clip(&request).await {
                Ok(raw) => LlmVerdict::parse(&raw, &cues),
                Err(e) => LlmVerdict::Malformed(e.to_string()),
            }
        };

        let selection = match verdict {
            LlmVerdict::Valid(reply) => Self::from_reply(segment.ordinal, &cues, reply, window),
            LlmVerdict::Malformed(reason) => {
                warn!(
                    ordinal = segment.ordinal,
                    "Clip selector unusable ({}); using greedy fallback",
                    reason
                );
                Self::fallback(segment.ordinal, &cues, window, &reason)
            }
        };
        let Some(selection) = selection else {
            return SelectionResult::Skipped(format!(
                "no usable cues in range {}",
                segment.line_range
            ));
        };

        info!(
            ordinal = segment.ordinal,
            lines = %format!("{}-{}", selection.start_line, selection.end_line),
            duration = selection.duration,
            target_min = window.min,
            target_max = window.max,
            match_level = %selection.match_level,
            "Clip selected"
        );
        for issue in &selection.issues {
            debug!(ordinal = segment.ordinal, "Selection issue: {}", issue);
        }

        if let Err(e) = self.cache.put_json(&self.key(segment), &selection) {
            warn!("Could not cache clip selection: {}", e);
        }
        SelectionResult::Selected {
            selection,
            from_cache: false,
        }
    }

    /// Select a clip for one segment
    pub async fn select(&self, segment: &ScriptSegment, audio_duration: f64) -> SelectionResult {
        let prep = self.prepare(segment);
        self.resolve(segment, prep, audio_duration).await
    }

    /// Select for every segment. Missing durations fall back to the text estimate.
    pub async fn select_all(
        self: &Arc<Self>,
        segments: &[ScriptSegment],
        audio_durations: &[Option<f64>],
    ) -> Vec<Result<SelectionResult, DomainError>> {
        let jobs: Vec<(ScriptSegment, f64)> = segments
            .iter()
            .enumerate()
            .map(|(i, segment)| {
                let duration = audio_durations
                    .get(i)
                    .copied()
                    .flatten()
                    .unwrap_or_else(|| segment.estimated_duration());
                (segment.clone(), duration)
            })
            .collect();

        let stage = Arc::clone(self);
        run_in_slots(jobs, move |(segment, duration)| {
            let stage = Arc::clone(&stage);
            async move { Ok(stage.select(&segment, duration).await) }
        })
        .await
    }

    fn spans_for(cues: &[SubtitleCue], ranges: &[(u32, u32)]) -> Option<Vec<CueSpan>> {
        ranges
            .iter()
            .map(|&(start, end)| {
                let first = cues.iter().find(|c| c.index == start)?;
                let last = cues.iter().find(|c| c.index == end)?;
                Some(CueSpan {
                    start_line: start,
                    end_line: end,
                    start_time: first.start_time,
                    end_time: last.end_time,
                })
            })
            .collect()
    }

    fn from_reply(
        ordinal: usize,
        cues: &[SubtitleCue],
        reply: ValidReply,
        window: DurationWindow,
    ) -> Option<ClipSelection> {
        let spans = Self::spans_for(cues, &reply.ranges)?;
        let mut issues = reply.issues;
        let fitted = Self::fit(cues, &spans, window, &mut issues);
        Some(Self::assemble(
            ordinal,
            fitted,
            reply.confidence,
            reply.quality_score,
            reply.match_level,
            reply.reason,
            reply.content_match,
            issues,
        ))
    }

    fn fallback(
        ordinal: usize,
        cues: &[SubtitleCue],
        window: DurationWindow,
        reason: &str,
    ) -> Option<ClipSelection> {
        let span = DurationReconciler::greedy_span(cues, window.min)?;
        let mut issues = vec![format!("LLM query failed: {}", reason)];
        let fitted = Self::fit(cues, &[span], window, &mut issues);
        Some(Self::assemble(
            ordinal,
            fitted,
            FALLBACK_CONFIDENCE,
            FALLBACK_QUALITY,
            MatchLevel::Poor,
            "fallback: first cues of the range".to_string(),
            "selector unavailable, cues picked greedily".to_string(),
            issues,
        ))
    }

    fn fit(
        cues: &[SubtitleCue],
        spans: &[CueSpan],
        window: DurationWindow,
        issues: &mut Vec<String>,
    ) -> Vec<CueSpan> {
        if let [span] = spans {
            let reconciled = DurationReconciler::reconcile_span(cues, *span, window);
            if reconciled.adjustment != Adjustment::Unchanged {
                debug!(
                    "Span {}-{} {:?} to {}-{} ({:.2}s)",
                    span.start_line,
                    span.end_line,
                    reconciled.adjustment,
                    reconciled.span.start_line,
                    reconciled.span.end_line,
                    reconciled.span.duration()
                );
            }
            issues.extend(reconciled.issues);
            vec![reconciled.span]
        } else {
            let (fitted, reconcile_issues) = DurationReconciler::reconcile_spans(cues, spans, window);
            issues.extend(reconcile_issues);
            fitted
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn assemble(
        ordinal: usize,
        spans: Vec<CueSpan>,
        confidence: f64,
        quality_score: u8,
        match_level: MatchLevel,
        reason: String,
        content_match: String,
        issues: Vec<String>,
    ) -> ClipSelection {
        let first = spans.first().copied().unwrap_or(CueSpan {
            start_line: 0,
            end_line: 0,
            start_time: 0.0,
            end_time: 0.0,
        });
        let last = spans.last().copied().unwrap_or(first);
        let duration = spans.iter().map(CueSpan::duration).sum();
        ClipSelection {
            ordinal,
            start_line: first.start_line,
            end_line: last.end_line,
            start_time: first.start_time,
            end_time: last.end_time,
            duration,
            confidence,
            quality_score,
            match_level,
            reason,
            content_match,
            issues,
            spans: if spans.len() > 1 { spans } else { Vec::new() },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn cues(count: u32, length: f64) -> Vec<SubtitleCue> {
        (1..=count)
            .map(|i| SubtitleCue {
                index: i,
                start_time: (i - 1) as f64 * length,
                end_time: i as f64 * length,
                text: format!("line {}", i),
            })
            .collect()
    }

    struct ScriptedSelector {
        reply: Result<String, DomainError>,
        calls: AtomicUsize,
    }

    impl ScriptedSelector {
        fn new(reply: Result<&str, DomainError>) -> Arc<Self> {
            Arc::new(Self {
                reply: reply.map(String::from),
                calls: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait]
    impl ClipSelectorPort for ScriptedSelector {
        async fn select_clip(&self, _request: &SelectionRequest<'_>) -> Result<String, DomainError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.reply.clone()
        }
    }

    fn segment(range: LineRange) -> ScriptSegment {
        ScriptSegment {
            ordinal: 1,
            text: "narration".to_string(),
            line_range: range,
            duration_hint: None,
            marker_ranges: vec![range],
        }
    }

    fn stage(dir: &std::path::Path, selector: Arc<ScriptedSelector>, track: Vec<SubtitleCue>) -> ClipSelectionStage {
        ClipSelectionStage::new(
            selector,
            Arc::new(ContentAddressedCache::open(dir).unwrap()),
            Arc::new(SubtitleIndex::new(track)),
            false,
            2,
        )
    }

    #[test]
    fn test_verdict_ignores_llm_timestamps() {
        let window = cues(10, 2.0);
        let raw = r#"```json
        {"start_line": 2, "end_line": 4, "start_time": 999.0, "end_time": 1000.0,
         "confidence": 1.7, "quality_score": "85", "match_level": "GOOD",
         "reason": " fits ", "issues": ["", "slow pan", 3]}
        ```"#;
        let LlmVerdict::Valid(reply) = LlmVerdict::parse(raw, &window) else {
            panic!("expected a valid reply");
        };
        assert_eq!(reply.ranges, vec![(2, 4)]);
        assert_eq!(reply.confidence, 1.0);
        assert_eq!(reply.quality_score, 85);
        assert_eq!(reply.match_level, MatchLevel::Good);
        assert_eq!(reply.reason, "fits");
        assert_eq!(reply.issues, vec!["slow pan".to_string()]);

        let spans = ClipSelectionStage::spans_for(&window, &reply.ranges).unwrap();
        assert_eq!(spans[0].start_time, 2.0);
        assert_eq!(spans[0].end_time, 8.0);
    }

    #[test]
    fn test_verdict_rejects_bad_replies() {
        let window = cues(5, 1.0);
        for raw in [
            "sorry, I cannot help",
            "{\"start_line\": 4, \"end_line\": 2}",
            "{\"start_line\": 1, \"end_line\": 9}",
            "{\"end_line\": 3}",
            "{\"start_line\": 1.5, \"end_line\": 3}",
            "{\"ranges\": [{\"start_line\": 3, \"end_line\": 4}, {\"start_line\": 1, \"end_line\": 2}]}",
        ] {
            assert!(
                matches!(LlmVerdict::parse(raw, &window), LlmVerdict::Malformed(_)),
                "accepted: {}",
                raw
            );
        }
    }

    #[test]
    fn test_verdict_derives_level_from_score() {
        let window = cues(5, 1.0);
        let LlmVerdict::Valid(reply) =
            LlmVerdict::parse(r#"{"start_line": 1, "end_line": 2, "quality_score": 35}"#, &window)
        else {
            panic!("expected a valid reply");
        };
        assert_eq!(reply.match_level, MatchLevel::Poor);
        assert_eq!(reply.confidence, 0.35);
    }

    #[test]
    fn test_verdict_ignores_non_finite_numbers() {
        let window = cues(5, 1.0);
        let LlmVerdict::Valid(reply) = LlmVerdict::parse(
            r#"{"start_line": 1, "end_line": 2, "quality_score": 80, "confidence": "NaN"}"#,
            &window,
        ) else {
            panic!("expected a valid reply");
        };
        assert_eq!(reply.confidence, 0.8);
        assert_eq!(reply.match_level, MatchLevel::Good);

        let LlmVerdict::Valid(reply) = LlmVerdict::parse(
            r#"{"start_line": 1, "end_line": 2, "quality_score": "inf", "confidence": "-inf"}"#,
            &window,
        ) else {
            panic!("expected a valid reply");
        };
        assert_eq!(reply.quality_score, 50);
        assert_eq!(reply.confidence, 0.5);

        assert!(matches!(
            LlmVerdict::parse(r#"{"start_line": "NaN", "end_line": 2}"#, &window),
            LlmVerdict::Malformed(_)
        ));
    }

    #[tokio::test]
    async fn test_selection_is_reconciled_and_cached() {
        let dir = tempfile::tempdir().unwrap();
        let selector = ScriptedSelector::new(Ok(r#"{"start_line": 1, "end_line": 10, "match_level": "excellent"}"#));
        let stage = stage(dir.path(), selector.clone(), cues(10, 2.0));
        let seg = segment(LineRange::new(1, 10).unwrap());

        let result = stage.select(&seg, 10.0).await;
        let selection = result.selection().unwrap().clone();
        assert_eq!(selection.end_line, 6);
        assert!(DurationWindow::for_audio(10.0).contains(selection.duration));
        assert_eq!(selection.match_level, MatchLevel::Excellent);

        let again = stage.select(&seg, 10.0).await;
        assert_eq!(
            again,
            SelectionResult::Selected {
                selection,
                from_cache: true
            }
        );
        assert_eq!(selector.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_collaborator_failure_uses_greedy_fallback() {
        let dir = tempfile::tempdir().unwrap();
        let selector = ScriptedSelector::new(Err(DomainError::SelectionCollaborator("timeout".into())));
        let stage = stage(dir.path(), selector, cues(20, 1.0));

        let result = stage.select(&segment(LineRange::new(3, 20).unwrap()), 4.0).await;
        let selection = result.selection().unwrap();
        assert_eq!(selection.start_line, 3);
        assert_eq!(selection.match_level, MatchLevel::Poor);
        assert_eq!(selection.quality_score, 40);
        assert!(selection.duration >= 4.5 && selection.duration <= 6.0);
        assert!(selection.issues[0].contains("LLM query failed"));
    }

    #[tokio::test]
    async fn test_empty_range_is_skipped_and_not_cached() {
        let dir = tempfile::tempdir().unwrap();
        let selector = ScriptedSelector::new(Ok("{}"));
        let stage = stage(dir.path(), selector.clone(), cues(5, 1.0));
        let seg = segment(LineRange::new(40, 45).unwrap());

        let result = stage.select(&seg, 3.0).await;
        let SelectionResult::Skipped(reason) = result else {
            panic!("expected skip");
        };
        assert!(reason.contains("40-45"));
        assert!(reason.contains("5 below"));
        assert_eq!(selector.calls.load(Ordering::SeqCst), 0);
        assert!(matches!(stage.prepare(&seg), SelectionPrep::Skipped(_)));
    }

    #[tokio::test]
    async fn test_multi_range_reply_becomes_stitch() {
        let dir = tempfile::tempdir().unwrap();
        let selector = ScriptedSelector::new(Ok(
            r#"{"ranges": [{"start_line": 1, "end_line": 3}, {"start_line": 8, "end_line": 9}], "quality_score": 75}"#,
        ));
        let stage = stage(dir.path(), selector, cues(30, 1.0));

        let result = stage.select(&segment(LineRange::new(1, 30).unwrap()), 8.0).await;
        let selection = result.selection().unwrap();
        assert_eq!(selection.spans.len(), 2);
        assert!(matches!(selection.plan(), ClipPlan::MultiRange(ref r) if r.len() == 2));
        assert!(DurationWindow::for_audio(8.0).contains(selection.duration));
        assert_eq!(selection.start_line, 1);
    }
}
