// LLM adapter - Clip selection through an OpenAI-compatible chat completions API

use std::fmt::Write as _;
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;
use tracing::debug;

use crate::adapters::toml_config::SelectionConfig;
use crate::domain::errors::*;
use crate::ports::*;

const SYSTEM_PROMPT: &str = "You are a video editing assistant. You read subtitle cues \
from a source video and choose the passage whose footage best illustrates a line of narration.";

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: String,
}

#[derive(Debug, Serialize)]
struct ResponseFormat {
    #[serde(rename = "type")]
    kind: &'static str,
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    temperature: f32,
    response_format: ResponseFormat,
}

/// Clip selector backed by a chat completions endpoint
pub struct ChatClipSelector {
    client: reqwest::Client,
    config: SelectionConfig,
    api_key: String,
}

impl ChatClipSelector {
    pub fn new(config: SelectionConfig, api_key: String) -> Result<Self, DomainError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| DomainError::Config(format!("cannot build LLM client: {}", e)))?;
        Ok(Self {
            client,
            config,
            api_key,
        })
    }

    fn request_body<'a>(&'a self, request: &SelectionRequest<'_>) -> ChatRequest<'a> {
        ChatRequest {
            model: &self.config.model,
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: SYSTEM_PROMPT.to_string(),
                },
                ChatMessage {
                    role: "user",
                    content: user_prompt(request),
                },
            ],
            temperature: self.config.temperature,
            response_format: ResponseFormat {
                kind: "json_object",
            },
        }
    }
}

/// Describe the narration, the candidate cues and the reply contract
fn user_prompt(request: &SelectionRequest<'_>) -> String {
    let mut prompt = String::new();
    let _ = writeln!(prompt, "Narration:\n{}\n", request.narration.trim());
    let _ = writeln!(
        prompt,
        "The narration lasts {:.2}s. The chosen footage must run between {:.2}s and {:.2}s.\n",
        request.target_duration, request.window.min, request.window.max
    );
    let _ = writeln!(prompt, "Candidate subtitle cues (line: start --> end  text):");
    for cue in request.cues {
        let _ = writeln!(
            prompt,
            "{}: {:.2} --> {:.2}  {}",
            cue.index,
            cue.start_time,
            cue.end_time,
            cue.text.replace('\n', " ")
        );
    }
    prompt.push_str(
        "\nPick consecutive cue lines that match the narration in meaning. \
         Reply with one JSON object only:\n\
         {\"start_line\": <first line>, \"end_line\": <last line>, \
         \"confidence\": <0 to 1>, \"quality_score\": <0 to 100>, \
         \"match_level\": \"excellent|good|acceptable|poor|none\", \"reason\": \"...\", \
         \"content_match\": \"...\", \"issues\": [\"...\"]}\n\
         If no single run fits, you may instead give \"ranges\": \
         [{\"start_line\": a, \"end_line\": b}, ...] in ascending, non-overlapping order. \
         Use only line numbers listed above; times are derived from the lines.",
    );
    prompt
}

/// The assistant message text, or why there is none
fn reply_content(reply: &Value) -> Result<String, DomainError> {
    reply
        .pointer("/choices/0/message/content")
        .and_then(Value::as_str)
        .filter(|content| !content.trim().is_empty())
        .map(str::to_string)
        .ok_or_else(|| DomainError::SelectionCollaborator("reply has no message content".to_string()))
}

#[async_trait]
impl ClipSelectorPort for ChatClipSelector {
    async fn select_clip(&self, request: &SelectionRequest<'_>) -> Result<String, DomainError> {
        let body = self.request_body(request);
        debug!(cues = request.cues.len(), "Querying {} for a clip", self.config.model);

        let response = self
            .client
            .post(&self.config.endpoint)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| DomainError::SelectionCollaborator(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(DomainError::SelectionCollaborator(format!(
                "LLM service returned {}: {}",
                status,
                text.trim()
            )));
        }

        let reply: Value = response
            .json()
            .await
            .map_err(|e| DomainError::SelectionCollaborator(format!("unreadable reply: {}", e)))?;
        reply_content(&reply)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::model::*;
    use serde_json::json;

    fn cues() -> Vec<SubtitleCue> {
        vec![
            SubtitleCue {
                index: 4,
                start_time: 10.0,
                end_time: 12.5,
                text: "first\nline".to_string(),
            },
            SubtitleCue {
                index: 5,
                start_time: 12.5,
                end_time: 15.0,
                text: "second".to_string(),
            },
        ]
    }

    #[test]
    fn test_prompt_lists_cues_and_window() {
        let cues = cues();
        let request = SelectionRequest {
            narration: " The storm arrives. ",
            cues: &cues,
            target_duration: 6.0,
            window: DurationWindow::for_audio(6.0),
        };
        let prompt = user_prompt(&request);
        assert!(prompt.starts_with("Narration:\nThe storm arrives.\n"));
        assert!(prompt.contains("between 6.50s and 8.00s"));
        assert!(prompt.contains("4: 10.00 --> 12.50  first line"));
        assert!(prompt.contains("5: 12.50 --> 15.00  second"));
        assert!(prompt.contains("\"ranges\""));
        assert!(prompt.contains("excellent|good|acceptable|poor|none"));
    }

    #[test]
    fn test_request_asks_for_json_object() {
        let selector = ChatClipSelector::new(SelectionConfig::default(), "k".to_string()).unwrap();
        let cues = cues();
        let request = SelectionRequest {
            narration: "x",
            cues: &cues,
            target_duration: 3.0,
            window: DurationWindow::for_audio(3.0),
        };
        let body = serde_json::to_value(selector.request_body(&request)).unwrap();
        assert_eq!(body["model"], "deepseek-chat");
        assert_eq!(body["response_format"], json!({"type": "json_object"}));
        assert_eq!(body["messages"][0]["role"], "system");
        assert_eq!(body["messages"][1]["role"], "user");
    }

    #[test]
    fn test_reply_content_extraction() {
        let reply = json!({"choices": [{"message": {"role": "assistant", "content": "{\"start_line\": 4}"}}]});
        assert_eq!(reply_content(&reply).unwrap(), "{\"start_line\": 4}");
        assert!(reply_content(&json!({"choices": []})).is_err());
        assert!(reply_content(&json!({"choices": [{"message": {"content": "  "}}]})).is_err());
    }
}
