// Clip extraction stage - cut, check, caption and mux one clip per segment

use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde_json::json;
use tokio::sync::Semaphore;
use tracing::{debug, info};

use crate::cache::{CacheKey, ContentAddressedCache};
use crate::domain::errors::*;
use crate::domain::model::*;
use crate::domain::rules::*;
use crate::ports::*;
use crate::stages::{acquire, run_in_slots};
use crate::subtitles::render_srt;

/// Pieces shorter than this are not worth a tool invocation
const MIN_PIECE_SECONDS: f64 = 0.05;

/// Everything extraction needs for one segment
#[derive(Debug, Clone)]
pub struct ExtractionJob {
    pub segment: ScriptSegment,
    pub selection: ClipSelection,
    pub audio: AudioArtifact,
}

/// Produces the finished per-segment clips
pub struct ClipExtractionStage {
    media: Arc<dyn MediaToolkitPort>,
    cache: Arc<ContentAddressedCache>,
    source_video: PathBuf,
    workers: Semaphore,
}

impl ClipExtractionStage {
    pub fn new(
        media: Arc<dyn MediaToolkitPort>,
        cache: Arc<ContentAddressedCache>,
        source_video: impl Into<PathBuf>,
        workers: usize,
    ) -> Self {
        Self {
            media,
            cache,
            source_video: source_video.into(),
            workers: Semaphore::new(workers.max(1)),
        }
    }

    /// Build the clip for one segment from its selection and narration
    pub async fn process(
        &self,
        segment: &ScriptSegment,
        selection: &ClipSelection,
        audio: &AudioArtifact,
    ) -> Result<VideoArtifact, DomainError> {
        let plan = selection.plan();
        let key = CacheKey::video_clip(&plan, &audio.path, &segment.text);
        if let Some(entry) = self.cache.get(&key) {
            debug!(ordinal = segment.ordinal, cache_hit = true, "Clip reused");
            return Ok(VideoArtifact {
                ordinal: segment.ordinal,
                path: entry.path,
                from_cache: true,
            });
        }

        let _permit = acquire(&self.workers).await?;
        let scratch = tempfile::Builder::new()
            .prefix("narracut-clip-")
            .tempdir()
            .map_err(|e| DomainError::ExtractionTool(format!("cannot create scratch dir: {}", e)))?;

        let footage = match &plan {
            ClipPlan::SingleRange(range) => {
                self.cut_single(scratch.path(), *range, audio.duration).await?
            }
            ClipPlan::MultiRange(ranges) => {
                self.cut_stitched(scratch.path(), ranges, audio.duration).await?
            }
        };

        let video_duration = self.media.probe_duration(&footage).await?;
        ExtractionRules::check_duration(video_duration, audio.duration)?;

        let captions = CaptionLayout::layout(&segment.text, audio.duration);
        let srt_path = scratch.path().join("captions.srt");
        tokio::fs::write(&srt_path, render_srt(&captions))
            .await
            .map_err(|e| DomainError::ExtractionTool(format!("cannot write captions: {}", e)))?;

        let muxed = scratch.path().join("clip.mp4");
        self.media
            .mux(&footage, &audio.path, &srt_path, audio.duration, &muxed)
            .await?;

        let entry = self.cache.put_file(
            &key,
            &muxed,
            Some(&json!({
                "ordinal": segment.ordinal,
                "footage_duration": video_duration,
                "audio_duration": audio.duration,
                "captions": captions.len(),
            })),
        )?;
        info!(
            ordinal = segment.ordinal,
            video_duration,
            audio_duration = audio.duration,
            pieces = plan.ranges().len(),
            "Clip extracted"
        );
        Ok(VideoArtifact {
            ordinal: segment.ordinal,
            path: entry.path,
            from_cache: false,
        })
    }

    async fn cut_single(
        &self,
        scratch: &Path,
        range: TimeRange,
        audio_duration: f64,
    ) -> Result<PathBuf, DomainError> {
        let length = ExtractionRules::cut_length(range.duration(), audio_duration);
        let output = scratch.join("cut.mp4");
        debug!(start = range.start, length, "Cutting single range");
        self.media
            .cut(&self.source_video, range.start, length, &output)
            .await?;
        Ok(output)
    }

    async fn cut_stitched(
        &self,
        scratch: &Path,
        ranges: &[TimeRange],
        audio_duration: f64,
    ) -> Result<PathBuf, DomainError> {
        let lengths = ExtractionRules::stitch_lengths(ranges, audio_duration);
        let mut pieces = Vec::with_capacity(ranges.len());
        for (i, (range, length)) in ranges.iter().zip(lengths).enumerate() {
            if length < MIN_PIECE_SECONDS {
                debug!(piece = i, "Dropping stitch piece past the narration");
                continue;
            }
            let piece = scratch.join(format!("piece_{:03}.mp4", i));
            debug!(piece = i, start = range.start, length, "Cutting stitch piece");
            self.media
                .cut(&self.source_video, range.start, length, &piece)
                .await?;
            pieces.push(piece);
        }

        match pieces.len() {
            0 => Err(DomainError::ExtractionTool(
                "stitch has no pieces to cut".to_string(),
            )),
            1 => Ok(pieces.remove(0)),
            _ => {
                let stitched = scratch.join("stitched.mp4");
                self.media
                    .concat(&pieces, &stitched, ConcatMode::StitchVideo)
                    .await?;
                Ok(stitched)
            }
        }
    }

    /// Extract every job concurrently; results follow input order
    pub async fn extract_all(
        self: &Arc<Self>,
        jobs: Vec<ExtractionJob>,
    ) -> Vec<Result<VideoArtifact, DomainError>> {
        info!("Extracting {} clips", jobs.len());
        let stage = Arc::clone(self);
        run_in_slots(jobs, move |job| {
            let stage = Arc::clone(&stage);
            async move { stage.process(&job.segment, &job.selection, &job.audio).await }
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::Mutex;

    /// Writes `dur=<seconds>` files and reads them back when probing
    #[derive(Default)]
    struct RecordingMedia {
        calls: Mutex<Vec<String>>,
        /// Added to every cut, to simulate a source that ends early
        cut_offset: f64,
    }

    fn read_duration(path: &Path) -> Result<f64, DomainError> {
        let raw = std::fs::read_to_string(path)
            .map_err(|e| DomainError::ExtractionTool(e.to_string()))?;
        raw.trim()
            .strip_prefix("dur=")
            .and_then(|d| d.parse().ok())
            .ok_or_else(|| DomainError::ExtractionTool(format!("unreadable: {}", raw)))
    }

    #[async_trait]
    impl MediaToolkitPort for RecordingMedia {
        async fn cut(&self, _: &Path, start: f64, duration: f64, output: &Path) -> Result<(), DomainError> {
            self.calls.lock().unwrap().push(format!("cut {:.1}+{:.1}", start, duration));
            std::fs::write(output, format!("dur={}", duration + self.cut_offset)).unwrap();
            Ok(())
        }
        async fn mux(&self, video: &Path, _: &Path, captions: &Path, duration: f64, output: &Path) -> Result<(), DomainError> {
            assert!(std::fs::read_to_string(captions).unwrap().contains("-->"));
            let video = read_duration(video)?;
            self.calls.lock().unwrap().push("mux".to_string());
            std::fs::write(output, format!("dur={}", video.min(duration))).unwrap();
            Ok(())
        }
        async fn concat(&self, inputs: &[PathBuf], output: &Path, mode: ConcatMode) -> Result<(), DomainError> {
            assert_eq!(mode, ConcatMode::StitchVideo);
            let mut total = 0.0;
            for input in inputs {
                total += read_duration(input)?;
            }
            self.calls.lock().unwrap().push(format!("concat {}", inputs.len()));
            std::fs::write(output, format!("dur={}", total)).unwrap();
            Ok(())
        }
        async fn probe_duration(&self, path: &Path) -> Result<f64, DomainError> {
            read_duration(path)
        }
        async fn probe_signature(&self, _: &Path) -> Result<StreamSignature, DomainError> {
            unreachable!()
        }
    }

    fn job(spans: Vec<CueSpan>, start: f64, end: f64, audio: &Path, audio_duration: f64) -> ExtractionJob {
        ExtractionJob {
            segment: ScriptSegment {
                ordinal: 1,
                text: "第一句，第二句。".to_string(),
                line_range: LineRange::new(1, 20).unwrap(),
                duration_hint: None,
                marker_ranges: vec![],
            },
            selection: ClipSelection {
                ordinal: 1,
                start_line: 1,
                end_line: 20,
                start_time: start,
                end_time: end,
                duration: end - start,
                confidence: 0.9,
                quality_score: 90,
                match_level: MatchLevel::Excellent,
                reason: String::new(),
                content_match: String::new(),
                issues: vec![],
                spans,
            },
            audio: AudioArtifact {
                ordinal: 1,
                path: audio.to_path_buf(),
                duration: audio_duration,
                from_cache: false,
            },
        }
    }

    fn setup(media: Arc<RecordingMedia>) -> (tempfile::TempDir, ClipExtractionStage) {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("narration.wav"), b"RIFF").unwrap();
        let cache = Arc::new(ContentAddressedCache::open(dir.path().join("cache")).unwrap());
        let stage = ClipExtractionStage::new(media, cache, dir.path().join("source.mp4"), 2);
        (dir, stage)
    }

    #[tokio::test]
    async fn test_single_range_cut_is_clamped_and_cached() {
        let media = Arc::new(RecordingMedia::default());
        let (dir, stage) = setup(media.clone());
        let job = job(vec![], 30.0, 41.5, &dir.path().join("narration.wav"), 10.0);

        let clip = stage.process(&job.segment, &job.selection, &job.audio).await.unwrap();
        assert!(!clip.from_cache);
        assert_eq!(*media.calls.lock().unwrap(), vec!["cut 30.0+11.0", "mux"]);

        let again = stage.process(&job.segment, &job.selection, &job.audio).await.unwrap();
        assert!(again.from_cache);
        assert_eq!(again.path, clip.path);
        assert_eq!(media.calls.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_multi_range_is_stitched_before_mux() {
        let media = Arc::new(RecordingMedia::default());
        let (dir, stage) = setup(media.clone());
        let spans = vec![
            CueSpan { start_line: 1, end_line: 3, start_time: 0.0, end_time: 4.0 },
            CueSpan { start_line: 9, end_line: 12, start_time: 20.0, end_time: 27.0 },
        ];
        let job = job(spans, 0.0, 27.0, &dir.path().join("narration.wav"), 9.5);

        stage.process(&job.segment, &job.selection, &job.audio).await.unwrap();
        assert_eq!(
            *media.calls.lock().unwrap(),
            vec!["cut 0.0+4.0", "cut 20.0+6.5", "concat 2", "mux"]
        );
    }

    #[tokio::test]
    async fn test_short_footage_is_a_duration_mismatch() {
        let media = Arc::new(RecordingMedia {
            cut_offset: -3.0,
            ..Default::default()
        });
        let (dir, stage) = setup(media.clone());
        let job = job(vec![], 0.0, 11.0, &dir.path().join("narration.wav"), 10.0);

        let err = stage.process(&job.segment, &job.selection, &job.audio).await.unwrap_err();
        assert!(matches!(err, DomainError::DurationMismatch { .. }));
        assert!(!media.calls.lock().unwrap().contains(&"mux".to_string()));
    }
}
