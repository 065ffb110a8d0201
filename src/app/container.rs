use std::sync::Arc;

use crate::adapters::{ChatClipSelector, FfmpegToolkit, HttpSpeechSynthesizer, PipelineConfig, Secrets};
use crate::app::pipeline_interactor::{PipelineInteractor, PipelineSettings};
use crate::domain::errors::DomainError;
use crate::ports::{ClipSelectorPort, MediaToolkitPort, SpeechSynthesisPort};
use crate::stages::RetryPolicy;

pub trait AppContainer: Send + Sync {
    fn pipeline_interactor(&self) -> Arc<PipelineInteractor>;
}

pub struct DefaultAppContainer {
    pipeline_interactor: Arc<PipelineInteractor>,
}

impl DefaultAppContainer {
    /// Wire the production adapters from configuration
    pub fn new(config: &PipelineConfig, secrets: &Secrets) -> Result<Self, DomainError> {
        let synthesizer = Arc::new(HttpSpeechSynthesizer::new(
            config.synthesis.clone(),
            secrets.tts_api_key.clone(),
        )?);
        let selector = Arc::new(ChatClipSelector::new(
            config.selection.clone(),
            secrets.llm_api_key.clone(),
        )?);
        let media = Arc::new(FfmpegToolkit::new(config.media.clone()));

        Ok(Self::with_ports(synthesizer, selector, media, Self::settings(config)))
    }

    /// Wire arbitrary port implementations
    pub fn with_ports(
        synthesizer: Arc<dyn SpeechSynthesisPort>,
        selector: Arc<dyn ClipSelectorPort>,
        media: Arc<dyn MediaToolkitPort>,
        settings: PipelineSettings,
    ) -> Self {
        Self {
            pipeline_interactor: Arc::new(PipelineInteractor::new(synthesizer, selector, media, settings)),
        }
    }

    pub fn settings(config: &PipelineConfig) -> PipelineSettings {
        PipelineSettings {
            cache_dir: config.cache.dir.clone(),
            speaker_id: config.synthesis.speaker.clone(),
            retry: RetryPolicy::new(config.synthesis.max_attempts, config.synthesis.backoff()),
            synthesis_workers: config.workers.synthesis,
            selection_workers: config.workers.selection,
            extraction_workers: config.workers.extraction,
        }
    }
}

impl AppContainer for DefaultAppContainer {
    fn pipeline_interactor(&self) -> Arc<PipelineInteractor> {
        Arc::clone(&self.pipeline_interactor)
    }
}
