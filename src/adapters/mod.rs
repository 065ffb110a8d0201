// Adapters - External system implementations

pub mod exec_ffmpeg;
pub mod llm_openai;
pub mod toml_config;
pub mod tracing_log;
pub mod tts_http;

// Re-export adapters
pub use exec_ffmpeg::FfmpegToolkit;
pub use llm_openai::ChatClipSelector;
pub use toml_config::{PipelineConfig, Secrets, TomlConfigAdapter};
pub use tracing_log::{LogSettings, TracingLogAdapter};
pub use tts_http::HttpSpeechSynthesizer;
