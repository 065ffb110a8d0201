// Pipeline interactor - Coordinates the per-segment stages into one run

use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::Utc;
use tracing::{error, info, warn};

use crate::cache::ContentAddressedCache;
use crate::domain::errors::*;
use crate::domain::model::*;
use crate::error::NarracutResult;
use crate::ports::*;
use crate::script::{ScriptFormat, ScriptSegmentParser};
use crate::stages::*;
use crate::subtitles::SubtitleIndex;

/// Inputs and output of one run
#[derive(Debug, Clone)]
pub struct PipelineRequest {
    pub script: PathBuf,
    pub subtitles: PathBuf,
    pub source_video: PathBuf,
    pub output: PathBuf,
    pub format: ScriptFormat,
    /// Wipe the cache namespace before starting
    pub force_clean: bool,
}

/// Knobs the coordinator needs from configuration
#[derive(Debug, Clone)]
pub struct PipelineSettings {
    pub cache_dir: PathBuf,
    pub speaker_id: String,
    pub retry: RetryPolicy,
    pub synthesis_workers: usize,
    pub selection_workers: usize,
    pub extraction_workers: usize,
}

/// Bookkeeping for one segment as it moves through the stages
#[derive(Debug, Clone)]
struct SegmentRun {
    outcome: SegmentOutcome,
    audio_cached: bool,
    selection_cached: bool,
    clip_cached: bool,
    match_level: Option<MatchLevel>,
}

impl SegmentRun {
    fn new(outcome: SegmentOutcome) -> Self {
        Self {
            outcome,
            audio_cached: false,
            selection_cached: false,
            clip_cached: false,
            match_level: None,
        }
    }
}

struct Stages {
    synthesis: SpeechSynthesisStage,
    selection: ClipSelectionStage,
    extraction: ClipExtractionStage,
}

/// Interactor for the narration-to-video use case
pub struct PipelineInteractor {
    synthesizer: Arc<dyn SpeechSynthesisPort>,
    selector: Arc<dyn ClipSelectorPort>,
    media: Arc<dyn MediaToolkitPort>,
    settings: PipelineSettings,
}

impl PipelineInteractor {
    /// Create new pipeline interactor with injected ports
    pub fn new(
        synthesizer: Arc<dyn SpeechSynthesisPort>,
        selector: Arc<dyn ClipSelectorPort>,
        media: Arc<dyn MediaToolkitPort>,
        settings: PipelineSettings,
    ) -> Self {
        Self {
            synthesizer,
            selector,
            media,
            settings,
        }
    }

    pub fn settings(&self) -> &PipelineSettings {
        &self.settings
    }

    /// Run the whole pipeline.
    ///
    /// Only fatal preconditions (missing inputs, an unusable script or
    /// subtitle track, an unopenable cache) return `Err`. Everything that
    /// goes wrong for a single segment is recorded in the report instead.
    pub async fn run(&self, request: &PipelineRequest) -> NarracutResult<PipelineReport> {
        let started_at = Utc::now();
        for (label, path) in [
            ("script", &request.script),
            ("subtitle track", &request.subtitles),
            ("source video", &request.source_video),
        ] {
            if !path.is_file() {
                return Err(DomainError::FatalPrecondition(format!(
                    "{} not found: {}",
                    label,
                    path.display()
                ))
                .into());
            }
        }

        let script = std::fs::read_to_string(&request.script)?;
        let parsed = ScriptSegmentParser::new(request.format).parse_with_diagnostics(&script);
        if parsed.segments.is_empty() {
            return Err(DomainError::FatalPrecondition(format!(
                "{} contains no usable segments",
                request.script.display()
            ))
            .into());
        }
        info!(
            "Parsed {} segments ({:?} form, {} diagnostics)",
            parsed.segments.len(),
            parsed.format,
            parsed.diagnostics.len()
        );

        let subtitles = SubtitleIndex::load(&request.subtitles)?;
        if subtitles.is_empty() {
            return Err(DomainError::FatalPrecondition(format!(
                "{} contains no subtitle cues",
                request.subtitles.display()
            ))
            .into());
        }

        let cache = ContentAddressedCache::open(&self.settings.cache_dir)?;
        if request.force_clean {
            cache.clear()?;
        }
        let cache = Arc::new(cache);

        let stages = Arc::new(Stages {
            synthesis: SpeechSynthesisStage::new(
                Arc::clone(&self.synthesizer),
                Arc::clone(&self.media),
                Arc::clone(&cache),
                self.settings.speaker_id.clone(),
                self.settings.retry,
                self.settings.synthesis_workers,
            ),
            selection: ClipSelectionStage::new(
                Arc::clone(&self.selector),
                Arc::clone(&cache),
                Arc::new(subtitles),
                parsed.format == ScriptFormat::Embedded,
                self.settings.selection_workers,
            ),
            extraction: ClipExtractionStage::new(
                Arc::clone(&self.media),
                Arc::clone(&cache),
                request.source_video.clone(),
                self.settings.extraction_workers,
            ),
        });

        let runs = Self::process_segments(&stages, &parsed.segments).await;
        let outcomes: Vec<SegmentOutcome> = runs.iter().map(|run| run.outcome.clone()).collect();

        let composer = VideoComposer::new(Arc::clone(&self.media));
        let (output, composition_error, included) =
            match composer.compose(&outcomes, &request.output).await {
                Ok(ordinals) => {
                    info!(
                        "Final video written to {} ({} segments)",
                        request.output.display(),
                        ordinals.len()
                    );
                    (Some(request.output.clone()), None, ordinals.len())
                }
                Err(e) => {
                    error!("{}", e);
                    (None, Some(e.to_string()), 0)
                }
            };

        let segments: Vec<SegmentReport> = parsed
            .segments
            .iter()
            .zip(runs)
            .map(|(segment, run)| Self::segment_report(segment, run))
            .collect();
        let dropped = segments.len() - included;

        Ok(PipelineReport {
            started_at,
            finished_at: Utc::now(),
            output,
            composition_error,
            segments,
            included,
            dropped,
        })
    }

    /// Drive every segment through the stages; slot `i` belongs to segment `i`
    async fn process_segments(stages: &Arc<Stages>, segments: &[ScriptSegment]) -> Vec<SegmentRun> {
        let stages = Arc::clone(stages);
        run_in_slots(segments.to_vec(), move |segment| {
            let stages = Arc::clone(&stages);
            async move { Ok(Self::process_segment(&stages, &segment).await) }
        })
        .await
        .into_iter()
        .map(|slot| slot.unwrap_or_else(|e| SegmentRun::new(SegmentOutcome::Failed(e))))
        .collect()
    }

    async fn process_segment(stages: &Stages, segment: &ScriptSegment) -> SegmentRun {
        // Narration and the audio-independent part of selection run side by side.
        let (audio, prep) = tokio::join!(stages.synthesis.process(segment), async {
            stages.selection.prepare(segment)
        });

        let audio = match audio {
            Ok(audio) => audio,
            Err(e) => {
                warn!(ordinal = segment.ordinal, "Segment dropped: {}", e);
                return SegmentRun::new(SegmentOutcome::Failed(e));
            }
        };

        let mut run = SegmentRun::new(SegmentOutcome::Skipped(String::new()));
        run.audio_cached = audio.from_cache;

        let selection = match stages.selection.resolve(segment, prep, audio.duration).await {
            SelectionResult::Selected {
                selection,
                from_cache,
            } => {
                run.selection_cached = from_cache;
                run.match_level = Some(selection.match_level);
                selection
            }
            SelectionResult::Skipped(reason) => {
                run.outcome = SegmentOutcome::Skipped(reason);
                return run;
            }
        };

        run.outcome = match stages.extraction.process(segment, &selection, &audio).await {
            Ok(clip) => {
                run.clip_cached = clip.from_cache;
                SegmentOutcome::Succeeded(clip)
            }
            Err(e) => {
                warn!(ordinal = segment.ordinal, "Segment dropped: {}", e);
                SegmentOutcome::Failed(e)
            }
        };
        run
    }

    fn segment_report(segment: &ScriptSegment, run: SegmentRun) -> SegmentReport {
        let clip_path = match &run.outcome {
            SegmentOutcome::Succeeded(clip) => Some(clip.path.clone()),
            _ => None,
        };
        SegmentReport {
            ordinal: segment.ordinal,
            text: segment.preview(),
            line_range: segment.line_range,
            outcome: run.outcome.label().to_string(),
            reason: run.outcome.reason(),
            match_level: run.match_level,
            audio_cached: run.audio_cached,
            selection_cached: run.selection_cached,
            clip_cached: run.clip_cached,
            clip_path,
        }
    }
}

/// Wipe the cache namespace at `dir`; returns how many entries were removed
pub fn clean_cache(dir: &Path) -> NarracutResult<usize> {
    let cache = ContentAddressedCache::open(dir)?;
    Ok(cache.clear()?.total())
}
