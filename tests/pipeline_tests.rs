//! End-to-end pipeline tests against in-process fakes of the external services

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tempfile::TempDir;

use narracut::domain::errors::DomainError;
use narracut::ports::*;
use narracut::script::ScriptFormat;
use narracut::stages::RetryPolicy;
use narracut::{NarracutError, PipelineInteractor, PipelineReport, PipelineRequest, PipelineSettings};

const AUDIO_SECONDS: f64 = 3.5;

/// Returns `dur=<seconds>` payloads so the fake media probe can read them back
#[derive(Default)]
struct FakeTts {
    calls: AtomicUsize,
    delays: HashMap<String, u64>,
    rejected: Vec<String>,
    finished: Mutex<Vec<String>>,
}

#[async_trait]
impl SpeechSynthesisPort for FakeTts {
    async fn synthesize(&self, text: &str, _speaker_id: &str) -> Result<Vec<u8>, DomainError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some((_, ms)) = self.delays.iter().find(|(k, _)| text.contains(k.as_str())) {
            tokio::time::sleep(Duration::from_millis(*ms)).await;
        }
        if self.rejected.iter().any(|r| text.contains(r.as_str())) {
            return Err(DomainError::PermanentSynthesis("voice rejected the text".into()));
        }
        self.finished.lock().unwrap().push(text.to_string());
        Ok(format!("dur={}", AUDIO_SECONDS).into_bytes())
    }
}

/// Answers with the whole candidate range, or a fixed reply when one is set
#[derive(Default)]
struct FakeLlm {
    calls: AtomicUsize,
    fixed: Option<String>,
}

#[async_trait]
impl ClipSelectorPort for FakeLlm {
    async fn select_clip(&self, request: &SelectionRequest<'_>) -> Result<String, DomainError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(reply) = &self.fixed {
            return Ok(reply.clone());
        }
        let first = request.cues.first().map(|c| c.index).unwrap_or(0);
        let last = request.cues.last().map(|c| c.index).unwrap_or(0);
        Ok(format!(
            r#"{{"start_line": {}, "end_line": {}, "quality_score": 82, "match_level": "good", "reason": "same scene"}}"#,
            first, last
        ))
    }
}

/// Media toolkit that writes `dur=<seconds>` marker files instead of video
#[derive(Default)]
struct FakeMedia {
    cuts: AtomicUsize,
    /// Cuts starting here come back this much shorter
    short_cut_at: Option<(f64, f64)>,
    final_inputs: Mutex<Vec<PathBuf>>,
}

fn read_duration(path: &Path) -> Result<f64, DomainError> {
    std::fs::read_to_string(path)
        .ok()
        .and_then(|s| s.trim().strip_prefix("dur=").and_then(|d| d.parse().ok()))
        .ok_or_else(|| DomainError::ExtractionTool(format!("unreadable {}", path.display())))
}

fn write_duration(path: &Path, seconds: f64) -> Result<(), DomainError> {
    std::fs::write(path, format!("dur={}", seconds)).map_err(|e| DomainError::ExtractionTool(e.to_string()))
}

#[async_trait]
impl MediaToolkitPort for FakeMedia {
    async fn cut(&self, _source: &Path, start: f64, duration: f64, output: &Path) -> Result<(), DomainError> {
        self.cuts.fetch_add(1, Ordering::SeqCst);
        let shortfall = match self.short_cut_at {
            Some((at, by)) if (at - start).abs() < 1e-9 => by,
            _ => 0.0,
        };
        write_duration(output, duration - shortfall)
    }

    async fn mux(&self, _: &Path, _: &Path, _: &Path, duration: f64, output: &Path) -> Result<(), DomainError> {
        write_duration(output, duration)
    }

    async fn concat(&self, inputs: &[PathBuf], output: &Path, mode: ConcatMode) -> Result<(), DomainError> {
        let mut total = 0.0;
        for input in inputs {
            total += read_duration(input)?;
        }
        if matches!(mode, ConcatMode::Final { .. }) {
            *self.final_inputs.lock().unwrap() = inputs.to_vec();
        }
        write_duration(output, total)
    }

    async fn probe_duration(&self, path: &Path) -> Result<f64, DomainError> {
        read_duration(path)
    }

    async fn probe_signature(&self, _: &Path) -> Result<StreamSignature, DomainError> {
        Ok(StreamSignature {
            codec: "h264".into(),
            width: 1080,
            height: 1920,
            frame_rate: "30/1".into(),
        })
    }
}

/// Twelve two-second cues
fn subtitle_track() -> String {
    (1..=12)
        .map(|i| {
            let start = (i - 1) * 2;
            let end = i * 2;
            format!(
                "{}\n00:00:{:02},000 --> 00:00:{:02},000\ncue number {}\n\n",
                i, start, end, i
            )
        })
        .collect()
}

const SCRIPT: &str = "\
[3s] [1-4] The harbor wakes before dawn.
[3s] [5-8] Fishing boats slip past the lighthouse.
[3s] [9-12] Gulls follow them out to sea.
";

struct Workspace {
    dir: TempDir,
    request: PipelineRequest,
}

impl Workspace {
    fn new(script: &str) -> Self {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("script.txt"), script).unwrap();
        std::fs::write(dir.path().join("source.srt"), subtitle_track()).unwrap();
        std::fs::write(dir.path().join("source.mp4"), "dur=24").unwrap();
        let request = PipelineRequest {
            script: dir.path().join("script.txt"),
            subtitles: dir.path().join("source.srt"),
            source_video: dir.path().join("source.mp4"),
            output: dir.path().join("out").join("final.mp4"),
            format: ScriptFormat::Auto,
            force_clean: false,
        };
        Self { dir, request }
    }

    fn cache_dir(&self) -> PathBuf {
        self.dir.path().join("cache")
    }

    fn interactor(&self, tts: &Arc<FakeTts>, llm: &Arc<FakeLlm>, media: &Arc<FakeMedia>) -> PipelineInteractor {
        PipelineInteractor::new(
            tts.clone(),
            llm.clone(),
            media.clone(),
            PipelineSettings {
                cache_dir: self.cache_dir(),
                speaker_id: "narrator".to_string(),
                retry: RetryPolicy::new(3, Duration::from_millis(1)),
                synthesis_workers: 4,
                selection_workers: 3,
                extraction_workers: 3,
            },
        )
    }

    /// Durations of every cached clip selection
    fn selection_durations(&self) -> Vec<f64> {
        let mut durations: Vec<f64> = walkdir::WalkDir::new(self.cache_dir().join("meta"))
            .into_iter()
            .filter_map(Result::ok)
            .filter(|e| e.file_type().is_file())
            .filter(|e| !e.file_name().to_string_lossy().ends_with(".meta.json"))
            .map(|e| {
                let value: serde_json::Value =
                    serde_json::from_str(&std::fs::read_to_string(e.path()).unwrap()).unwrap();
                value["duration"].as_f64().unwrap()
            })
            .collect();
        durations.sort_by(|a, b| a.partial_cmp(b).unwrap());
        durations
    }
}

fn outcomes(report: &PipelineReport) -> Vec<&str> {
    report.segments.iter().map(|s| s.outcome.as_str()).collect()
}

fn clip_paths(report: &PipelineReport) -> Vec<PathBuf> {
    report.segments.iter().filter_map(|s| s.clip_path.clone()).collect()
}

#[tokio::test]
async fn test_full_run_composes_clips_in_script_order() {
    let ws = Workspace::new(SCRIPT);
    let (tts, llm, media) = (Arc::new(FakeTts::default()), Arc::new(FakeLlm::default()), Arc::new(FakeMedia::default()));

    let report = ws.interactor(&tts, &llm, &media).run(&ws.request).await.unwrap();

    assert!(report.is_success());
    assert_eq!(outcomes(&report), vec!["succeeded"; 3]);
    assert_eq!((report.included, report.dropped), (3, 0));
    assert_eq!(report.output.as_deref(), Some(ws.request.output.as_path()));
    assert!(ws.request.output.is_file());
    assert_eq!(*media.final_inputs.lock().unwrap(), clip_paths(&report));
    assert_eq!(tts.calls.load(Ordering::SeqCst), 3);
    assert_eq!(llm.calls.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn test_selections_land_in_the_narration_window() {
    let ws = Workspace::new(SCRIPT);
    let (tts, llm, media) = (Arc::new(FakeTts::default()), Arc::new(FakeLlm::default()), Arc::new(FakeMedia::default()));

    ws.interactor(&tts, &llm, &media).run(&ws.request).await.unwrap();

    // Each full range is 8s; the reconciler trims to two cues.
    let durations = ws.selection_durations();
    assert_eq!(durations.len(), 3);
    for duration in durations {
        assert!(
            (AUDIO_SECONDS + 0.5..=AUDIO_SECONDS + 2.0).contains(&duration),
            "selection of {}s is outside the window",
            duration
        );
    }
}

#[tokio::test]
async fn test_short_llm_pick_is_extended() {
    let ws = Workspace::new("[3s] [1-4] The harbor wakes before dawn.\n");
    let tts = Arc::new(FakeTts::default());
    let llm = Arc::new(FakeLlm {
        fixed: Some(r#"{"start_line": 1, "end_line": 1, "quality_score": 70}"#.to_string()),
        ..FakeLlm::default()
    });
    let media = Arc::new(FakeMedia::default());

    let report = ws.interactor(&tts, &llm, &media).run(&ws.request).await.unwrap();

    assert!(report.is_success());
    assert_eq!(ws.selection_durations(), vec![4.0]);
}

#[tokio::test]
async fn test_second_run_is_served_from_cache() {
    let ws = Workspace::new(SCRIPT);
    let (tts, llm, media) = (Arc::new(FakeTts::default()), Arc::new(FakeLlm::default()), Arc::new(FakeMedia::default()));
    let first = ws.interactor(&tts, &llm, &media).run(&ws.request).await.unwrap();

    let (tts2, llm2, media2) = (Arc::new(FakeTts::default()), Arc::new(FakeLlm::default()), Arc::new(FakeMedia::default()));
    let second = ws.interactor(&tts2, &llm2, &media2).run(&ws.request).await.unwrap();

    assert_eq!(tts2.calls.load(Ordering::SeqCst), 0);
    assert_eq!(llm2.calls.load(Ordering::SeqCst), 0);
    assert_eq!(media2.cuts.load(Ordering::SeqCst), 0);
    assert!(second
        .segments
        .iter()
        .all(|s| s.audio_cached && s.selection_cached && s.clip_cached));
    assert_eq!(clip_paths(&first), clip_paths(&second));
}

#[tokio::test]
async fn test_force_clean_recomputes_everything() {
    let mut ws = Workspace::new(SCRIPT);
    let (tts, llm, media) = (Arc::new(FakeTts::default()), Arc::new(FakeLlm::default()), Arc::new(FakeMedia::default()));
    ws.interactor(&tts, &llm, &media).run(&ws.request).await.unwrap();

    ws.request.force_clean = true;
    let tts2 = Arc::new(FakeTts::default());
    let report = ws.interactor(&tts2, &llm, &media).run(&ws.request).await.unwrap();

    assert_eq!(tts2.calls.load(Ordering::SeqCst), 3);
    assert!(report.segments.iter().all(|s| !s.audio_cached));
}

#[tokio::test]
async fn test_completion_order_does_not_change_output_order() {
    let ws = Workspace::new(SCRIPT);
    let tts = Arc::new(FakeTts {
        delays: HashMap::from([("harbor".to_string(), 150), ("boats".to_string(), 75)]),
        ..FakeTts::default()
    });
    let (llm, media) = (Arc::new(FakeLlm::default()), Arc::new(FakeMedia::default()));

    let report = ws.interactor(&tts, &llm, &media).run(&ws.request).await.unwrap();

    let finished = tts.finished.lock().unwrap().clone();
    assert!(finished[0].contains("Gulls"), "expected the last segment to finish first: {:?}", finished);
    let ordinals: Vec<usize> = report.segments.iter().map(|s| s.ordinal).collect();
    assert_eq!(ordinals, vec![1, 2, 3]);
    assert_eq!(*media.final_inputs.lock().unwrap(), clip_paths(&report));
}

#[tokio::test]
async fn test_duration_mismatch_drops_only_that_segment() {
    let ws = Workspace::new(SCRIPT);
    let (tts, llm) = (Arc::new(FakeTts::default()), Arc::new(FakeLlm::default()));
    // Segment 2 starts at cue 5, 8s into the source.
    let media = Arc::new(FakeMedia {
        short_cut_at: Some((8.0, 2.5)),
        ..FakeMedia::default()
    });

    let report = ws.interactor(&tts, &llm, &media).run(&ws.request).await.unwrap();

    assert!(report.is_success());
    assert_eq!(outcomes(&report), vec!["succeeded", "failed", "succeeded"]);
    assert!(report.segments[1].reason.as_deref().unwrap().contains("Duration mismatch"));
    assert_eq!((report.included, report.dropped), (2, 1));
    assert_eq!(media.final_inputs.lock().unwrap().len(), 2);
}

#[tokio::test]
async fn test_rejected_narration_drops_only_that_segment() {
    let ws = Workspace::new(SCRIPT);
    let tts = Arc::new(FakeTts {
        rejected: vec!["Gulls".to_string()],
        ..FakeTts::default()
    });
    let (llm, media) = (Arc::new(FakeLlm::default()), Arc::new(FakeMedia::default()));

    let report = ws.interactor(&tts, &llm, &media).run(&ws.request).await.unwrap();

    assert_eq!(outcomes(&report), vec!["succeeded", "succeeded", "failed"]);
    assert!(report.segments[2].reason.as_deref().unwrap().contains("Permanent synthesis"));
    assert_eq!(report.included, 2);
}

#[tokio::test]
async fn test_range_without_cues_is_skipped() {
    let ws = Workspace::new("[3s] [1-4] The harbor wakes before dawn.\n[3s] [40-45] Nothing was filmed here.\n");
    let (tts, llm, media) = (Arc::new(FakeTts::default()), Arc::new(FakeLlm::default()), Arc::new(FakeMedia::default()));

    let report = ws.interactor(&tts, &llm, &media).run(&ws.request).await.unwrap();

    assert_eq!(outcomes(&report), vec!["succeeded", "skipped"]);
    assert!(report.segments[1].reason.as_deref().unwrap().contains("12 below"));
    assert_eq!(llm.calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_unusable_llm_reply_falls_back_to_greedy_pick() {
    let ws = Workspace::new(SCRIPT);
    let tts = Arc::new(FakeTts::default());
    let llm = Arc::new(FakeLlm {
        fixed: Some("I think lines 3 to 5 look nice".to_string()),
        ..FakeLlm::default()
    });
    let media = Arc::new(FakeMedia::default());

    let report = ws.interactor(&tts, &llm, &media).run(&ws.request).await.unwrap();

    assert_eq!(report.included, 3);
    assert!(report
        .segments
        .iter()
        .all(|s| s.match_level.map(|l| l.as_str()) == Some("poor")));
}

#[tokio::test]
async fn test_nothing_composed_is_reported() {
    let ws = Workspace::new(SCRIPT);
    let tts = Arc::new(FakeTts {
        rejected: vec!["".to_string()],
        ..FakeTts::default()
    });
    let (llm, media) = (Arc::new(FakeLlm::default()), Arc::new(FakeMedia::default()));

    let report = ws.interactor(&tts, &llm, &media).run(&ws.request).await.unwrap();

    assert!(!report.is_success());
    assert!(report.output.is_none());
    assert!(report.composition_error.is_some());
    assert_eq!((report.included, report.dropped), (0, 3));
    assert!(!ws.request.output.exists());
}

#[tokio::test]
async fn test_missing_source_video_is_fatal() {
    let mut ws = Workspace::new(SCRIPT);
    ws.request.source_video = ws.dir.path().join("missing.mp4");
    let (tts, llm, media) = (Arc::new(FakeTts::default()), Arc::new(FakeLlm::default()), Arc::new(FakeMedia::default()));

    let err = ws.interactor(&tts, &llm, &media).run(&ws.request).await.unwrap_err();

    assert!(matches!(err, NarracutError::Domain(DomainError::FatalPrecondition(_))));
    assert_eq!(tts.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_script_without_segments_is_fatal() {
    let ws = Workspace::new("just some notes without any markers\n");
    let (tts, llm, media) = (Arc::new(FakeTts::default()), Arc::new(FakeLlm::default()), Arc::new(FakeMedia::default()));

    let err = ws.interactor(&tts, &llm, &media).run(&ws.request).await.unwrap_err();
    assert!(err.to_string().contains("no usable segments"));
}
