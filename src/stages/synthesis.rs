// Speech synthesis stage - cached, retried text-to-speech per segment

use std::sync::Arc;

use serde_json::json;
use tokio::sync::Semaphore;
use tracing::{debug, info, warn};

use crate::cache::{CacheKey, ContentAddressedCache};
use crate::domain::errors::*;
use crate::domain::model::*;
use crate::ports::*;
use crate::stages::retry::RetryPolicy;
use crate::stages::{acquire, run_in_slots};

/// Turns segment text into narration audio
pub struct SpeechSynthesisStage {
    synthesizer: Arc<dyn SpeechSynthesisPort>,
    media: Arc<dyn MediaToolkitPort>,
    cache: Arc<ContentAddressedCache>,
    speaker_id: String,
    retry: RetryPolicy,
    workers: Semaphore,
}

impl SpeechSynthesisStage {
    pub fn new(
        synthesizer: Arc<dyn SpeechSynthesisPort>,
        media: Arc<dyn MediaToolkitPort>,
        cache: Arc<ContentAddressedCache>,
        speaker_id: impl Into<String>,
        retry: RetryPolicy,
        workers: usize,
    ) -> Self {
        Self {
            synthesizer,
            media,
            cache,
            speaker_id: speaker_id.into(),
            retry,
            workers: Semaphore::new(workers.max(1)),
        }
    }

    pub fn speaker_id(&self) -> &str {
        &self.speaker_id
    }

    /// Produce the narration for one segment.
    ///
    /// Cache hits never touch the worker pool. Misses call the synthesizer
    /// under the retry policy, store the audio and record its probed length
    /// as entry metadata so later runs skip the probe.
    pub async fn process(&self, segment: &ScriptSegment) -> Result<AudioArtifact, DomainError> {
        let key = CacheKey::tts(&self.speaker_id, &segment.text);

        if let Some(entry) = self.cache.get(&key) {
            let recorded = entry
                .metadata
                .as_ref()
                .and_then(|m| m.get("duration"))
                .and_then(|d| d.as_f64());
            let duration = match recorded {
                Some(duration) => duration,
                None => self.media.probe_duration(&entry.path).await?,
            };
            if duration > 0.0 {
                debug!(ordinal = segment.ordinal, cache_hit = true, duration, "Narration reused");
                return Ok(AudioArtifact {
                    ordinal: segment.ordinal,
                    path: entry.path,
                    duration,
                    from_cache: true,
                });
            }
            warn!(
                ordinal = segment.ordinal,
                "Cached narration has no playable length, synthesizing again"
            );
            self.cache.remove(&key)?;
        }

        let _permit = acquire(&self.workers).await?;
        info!(
            ordinal = segment.ordinal,
            cache_hit = false,
            "Synthesizing narration: {}",
            segment.preview()
        );

        let label = format!("speech synthesis for segment {}", segment.ordinal);
        let text = segment.text.as_str();
        let speaker = self.speaker_id.as_str();
        let audio = self
            .retry
            .run(&label, |attempt| {
                debug!(ordinal = segment.ordinal, attempt, "Calling speech synthesizer");
                self.synthesizer.synthesize(text, speaker)
            })
            .await?;

        if audio.is_empty() {
            return Err(DomainError::PermanentSynthesis(format!(
                "synthesizer returned no audio for segment {}",
                segment.ordinal
            )));
        }

        let entry = self.cache.put(&key, &audio, None)?;
        let probed = match self.media.probe_duration(&entry.path).await {
            Ok(duration) if duration > 0.0 => Ok(duration),
            Ok(_) => Err(DomainError::PermanentSynthesis(format!(
                "narration for segment {} has no playable length",
                segment.ordinal
            ))),
            Err(e) => Err(e),
        };
        let duration = match probed {
            Ok(duration) => duration,
            Err(e) => {
                // Unusable audio must not be served as a hit on the next run.
                if let Err(remove_err) = self.cache.remove(&key) {
                    warn!("Could not discard unusable narration: {}", remove_err);
                }
                return Err(e);
            }
        };
        if let Err(e) = self.cache.put_metadata(
            &key,
            &json!({ "duration": duration, "speaker": self.speaker_id }),
        ) {
            warn!("Could not record narration length: {}", e);
        }

        info!(
            ordinal = segment.ordinal,
            duration,
            bytes = audio.len(),
            "Narration ready"
        );
        Ok(AudioArtifact {
            ordinal: segment.ordinal,
            path: entry.path,
            duration,
            from_cache: false,
        })
    }

    /// Synthesize every segment concurrently; results follow input order
    pub async fn synthesize_all(
        self: &Arc<Self>,
        segments: &[ScriptSegment],
    ) -> Vec<Result<AudioArtifact, DomainError>> {
        info!("Synthesizing {} segments", segments.len());
        let stage = Arc::clone(self);
        run_in_slots(segments.to_vec(), move |segment| {
            let stage = Arc::clone(&stage);
            async move { stage.process(&segment).await }
        })
        .await
    }
}
