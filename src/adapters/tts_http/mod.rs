// TTS HTTP adapter - Speech synthesis over a DashScope-style REST endpoint

use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::Serialize;
use serde_json::Value;
use tracing::debug;

use crate::adapters::toml_config::SynthesisConfig;
use crate::domain::errors::*;
use crate::ports::*;

#[derive(Debug, Serialize)]
struct SynthesisBody<'a> {
    model: &'a str,
    input: SynthesisInput<'a>,
}

#[derive(Debug, Serialize)]
struct SynthesisInput<'a> {
    text: &'a str,
    voice: &'a str,
    format: &'a str,
    sample_rate: u32,
}

/// Speech synthesis client
pub struct HttpSpeechSynthesizer {
    client: reqwest::Client,
    config: SynthesisConfig,
    api_key: String,
}

impl HttpSpeechSynthesizer {
    pub fn new(config: SynthesisConfig, api_key: String) -> Result<Self, DomainError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| DomainError::Config(format!("cannot build TTS client: {}", e)))?;
        Ok(Self {
            client,
            config,
            api_key,
        })
    }

    async fn download(&self, url: &str) -> Result<Vec<u8>, DomainError> {
        let response = self.client.get(url).send().await.map_err(transport_error)?;
        let status = response.status();
        if !status.is_success() {
            return Err(status_error(status, "audio download failed"));
        }
        let bytes = response.bytes().await.map_err(transport_error)?;
        Ok(bytes.to_vec())
    }
}

/// Network trouble is worth another attempt
fn transport_error(err: reqwest::Error) -> DomainError {
    DomainError::TransientSynthesis(err.to_string())
}

/// Throttling and server faults are retried; other rejections are final
fn status_error(status: StatusCode, body: &str) -> DomainError {
    let message = format!("TTS service returned {}: {}", status, body.trim());
    if status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error() {
        DomainError::TransientSynthesis(message)
    } else {
        DomainError::PermanentSynthesis(message)
    }
}

/// Audio location in a JSON reply; both nestings are seen in the wild
fn audio_url(reply: &Value) -> Option<&str> {
    reply
        .pointer("/output/audio/url")
        .or_else(|| reply.pointer("/output/audio_url"))
        .and_then(Value::as_str)
        .filter(|url| !url.is_empty())
}

#[async_trait]
impl SpeechSynthesisPort for HttpSpeechSynthesizer {
    async fn synthesize(&self, text: &str, speaker_id: &str) -> Result<Vec<u8>, DomainError> {
        let body = SynthesisBody {
            model: &self.config.model,
            input: SynthesisInput {
                text,
                voice: speaker_id,
                format: &self.config.format,
                sample_rate: self.config.sample_rate,
            },
        };

        let response = self
            .client
            .post(&self.config.endpoint)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(transport_error)?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(status_error(status, &text));
        }

        let is_audio = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(|v| v.starts_with("audio/") || v == "application/octet-stream")
            .unwrap_or(false);
        if is_audio {
            let bytes = response.bytes().await.map_err(transport_error)?;
            return Ok(bytes.to_vec());
        }

        let reply: Value = response
            .json()
            .await
            .map_err(|e| DomainError::PermanentSynthesis(format!("unreadable TTS reply: {}", e)))?;
        let url = audio_url(&reply).ok_or_else(|| {
            DomainError::PermanentSynthesis(format!("TTS reply carries no audio: {}", reply))
        })?;
        debug!("Downloading synthesized audio from {}", url);
        self.download(url).await
    }
}
