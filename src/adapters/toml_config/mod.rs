// TOML config adapter - Layered pipeline configuration

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::{NarracutError, NarracutResult};

/// Per-stage worker pool sizes
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct WorkersConfig {
    pub synthesis: usize,
    pub selection: usize,
    pub extraction: usize,
}

impl Default for WorkersConfig {
    fn default() -> Self {
        Self {
            synthesis: 4,
            selection: 3,
            extraction: 3,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CacheConfig {
    pub dir: PathBuf,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from(".cache"),
        }
    }
}

/// Speech synthesis service settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SynthesisConfig {
    pub endpoint: String,
    pub model: String,
    pub speaker: String,
    pub format: String,
    pub sample_rate: u32,
    pub max_attempts: u32,
    pub backoff_ms: u64,
    pub timeout_secs: u64,
}

impl Default for SynthesisConfig {
    fn default() -> Self {
        Self {
            endpoint: "https://dashscope.aliyuncs.com/api/v1/services/audio/tts/SpeechSynthesizer"
                .to_string(),
            model: "cosyvoice-v2".to_string(),
            speaker: "longbaizhi".to_string(),
            format: "wav".to_string(),
            sample_rate: 22050,
            max_attempts: 3,
            backoff_ms: 2000,
            timeout_secs: 60,
        }
    }
}

impl SynthesisConfig {
    pub fn backoff(&self) -> Duration {
        Duration::from_millis(self.backoff_ms)
    }
}

/// Chat-completions endpoint used for clip selection
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SelectionConfig {
    pub endpoint: String,
    pub model: String,
    pub temperature: f32,
    pub timeout_secs: u64,
}

impl Default for SelectionConfig {
    fn default() -> Self {
        Self {
            endpoint: "https://api.deepseek.com/chat/completions".to_string(),
            model: "deepseek-chat".to_string(),
            temperature: 0.3,
            timeout_secs: 60,
        }
    }
}

/// External media tool binaries and the output profile
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct MediaConfig {
    pub ffmpeg: String,
    pub ffprobe: String,
    pub width: u32,
    pub height: u32,
    pub crf: u8,
    pub preset: String,
    pub clip_audio_bitrate: String,
    pub final_audio_bitrate: String,
    pub sample_rate: u32,
    pub channels: u8,
    pub caption_style: String,
    pub timeout_secs: u64,
}

impl Default for MediaConfig {
    fn default() -> Self {
        Self {
            ffmpeg: "ffmpeg".to_string(),
            ffprobe: "ffprobe".to_string(),
            width: 1080,
            height: 1920,
            crf: 23,
            preset: "ultrafast".to_string(),
            clip_audio_bitrate: "128k".to_string(),
            final_audio_bitrate: "192k".to_string(),
            sample_rate: 44100,
            channels: 2,
            caption_style: "Fontsize=8,PrimaryColour=&H00FFFFFF,OutlineColour=&H00000000,\
                            Outline=2,Shadow=1,MarginV=40,Alignment=2"
                .to_string(),
            timeout_secs: 120,
        }
    }
}

impl MediaConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// Complete pipeline configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PipelineConfig {
    pub workers: WorkersConfig,
    pub cache: CacheConfig,
    pub synthesis: SynthesisConfig,
    pub selection: SelectionConfig,
    pub media: MediaConfig,
}

impl PipelineConfig {
    /// Apply `NARRACUT_*` overrides read through `lookup`
    pub fn apply_env<F>(&mut self, lookup: F) -> NarracutResult<usize>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut applied = 0;
        let mut text = |key: &str, target: &mut String| {
            if let Some(value) = lookup(key).filter(|v| !v.trim().is_empty()) {
                debug!("Environment override: {}", key);
                *target = value;
                applied += 1;
            }
        };
        text("NARRACUT_SPEAKER", &mut self.synthesis.speaker);
        text("NARRACUT_TTS_ENDPOINT", &mut self.synthesis.endpoint);
        text("NARRACUT_TTS_MODEL", &mut self.synthesis.model);
        text("NARRACUT_LLM_ENDPOINT", &mut self.selection.endpoint);
        text("NARRACUT_LLM_MODEL", &mut self.selection.model);
        text("NARRACUT_FFMPEG", &mut self.media.ffmpeg);
        text("NARRACUT_FFPROBE", &mut self.media.ffprobe);

        if let Some(dir) = lookup("NARRACUT_CACHE_DIR").filter(|v| !v.trim().is_empty()) {
            self.cache.dir = PathBuf::from(dir);
            applied += 1;
        }

        for (key, target) in [
            ("NARRACUT_SYNTHESIS_WORKERS", &mut self.workers.synthesis),
            ("NARRACUT_SELECTION_WORKERS", &mut self.workers.selection),
            ("NARRACUT_EXTRACTION_WORKERS", &mut self.workers.extraction),
        ] {
            if let Some(value) = lookup(key) {
                *target = value.trim().parse().map_err(|_| NarracutError::ConfigError {
                    message: format!("{} must be a positive integer, got '{}'", key, value),
                })?;
                applied += 1;
            }
        }

        if applied > 0 {
            info!("Applied {} environment overrides", applied);
        }
        Ok(applied)
    }

    /// Reject values the pipeline cannot run with
    pub fn validate(&self) -> NarracutResult<()> {
        let invalid = |message: String| Err(NarracutError::ConfigError { message });

        for (name, count) in [
            ("synthesis", self.workers.synthesis),
            ("selection", self.workers.selection),
            ("extraction", self.workers.extraction),
        ] {
            if !(1..=64).contains(&count) {
                return invalid(format!("workers.{} must be between 1 and 64", name));
            }
        }
        if self.synthesis.max_attempts == 0 {
            return invalid("synthesis.max_attempts must be at least 1".to_string());
        }
        if self.synthesis.speaker.trim().is_empty() {
            return invalid("synthesis.speaker must not be empty".to_string());
        }
        if !(0.0..=2.0).contains(&self.selection.temperature) {
            return invalid("selection.temperature must be between 0 and 2".to_string());
        }
        if self.media.crf > 51 {
            return invalid("media.crf cannot exceed 51".to_string());
        }
        if self.media.width == 0 || self.media.height == 0 {
            return invalid("media.width and media.height must be positive".to_string());
        }
        if self.media.width % 2 != 0 || self.media.height % 2 != 0 {
            return invalid("media.width and media.height must be even for H.264".to_string());
        }

        let cpus = num_cpus::get();
        if self.workers.extraction > cpus {
            warn!(
                "{} extraction workers on {} CPUs; ffmpeg jobs will contend",
                self.workers.extraction, cpus
            );
        }
        Ok(())
    }
}

/// API keys resolved from the environment at startup
#[derive(Clone, PartialEq)]
pub struct Secrets {
    pub tts_api_key: String,
    pub llm_api_key: String,
}

impl std::fmt::Debug for Secrets {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Secrets")
            .field("tts_api_key", &"<redacted>")
            .field("llm_api_key", &"<redacted>")
            .finish()
    }
}

impl Secrets {
    pub const TTS_KEYS: &'static [&'static str] = &["NARRACUT_TTS_API_KEY", "DASHSCOPE_API_KEY"];
    pub const LLM_KEYS: &'static [&'static str] =
        &["NARRACUT_LLM_API_KEY", "DEEPSEEK_API_KEY", "OPENAI_API_KEY"];

    /// Resolve both keys; the first non-empty variable of each list wins
    pub fn resolve<F>(lookup: F) -> NarracutResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let first = |names: &[&str]| {
            names
                .iter()
                .find_map(|name| lookup(name).filter(|v| !v.trim().is_empty()))
                .ok_or_else(|| NarracutError::MissingCredential {
                    variable: names.join(" or "),
                })
        };
        Ok(Self {
            tts_api_key: first(Self::TTS_KEYS)?,
            llm_api_key: first(Self::LLM_KEYS)?,
        })
    }

    pub fn from_env() -> NarracutResult<Self> {
        Self::resolve(|name| std::env::var(name).ok())
    }
}

/// Loads [`PipelineConfig`] from TOML and the environment
pub struct TomlConfigAdapter;

impl TomlConfigAdapter {
    /// Picked up from the working directory when no path is given
    pub const DEFAULT_FILE: &'static str = "narracut.toml";

    /// Parse a TOML document; missing keys keep their defaults
    pub fn from_toml(content: &str) -> NarracutResult<PipelineConfig> {
        Ok(toml::from_str(content)?)
    }

    /// Defaults, then the config file, then the process environment.
    ///
    /// An explicit `path` must exist; the default file is optional.
    pub fn load(path: Option<&Path>) -> NarracutResult<PipelineConfig> {
        let file = match path {
            Some(path) if !path.is_file() => {
                return Err(NarracutError::InputFileNotFound {
                    path: path.display().to_string(),
                })
            }
            Some(path) => Some(path.to_path_buf()),
            None => Some(PathBuf::from(Self::DEFAULT_FILE)).filter(|p| p.is_file()),
        };

        let mut config = match &file {
            Some(file) => {
                info!("Loading configuration from: {}", file.display());
                Self::from_toml(&std::fs::read_to_string(file)?)?
            }
            None => {
                debug!("No configuration file, using defaults");
                PipelineConfig::default()
            }
        };
        config.apply_env(|name| std::env::var(name).ok())?;
        Ok(config)
    }

    /// Render a configuration as TOML, for writing a starter file
    pub fn to_toml(config: &PipelineConfig) -> NarracutResult<String> {
        toml::to_string_pretty(config).map_err(|e| NarracutError::ConfigError {
            message: e.to_string(),
        })
    }
}
