//! OpenAI-compatible chat completion client with tool calling.
//!
//! Drives the tool loop: the model may answer with tool calls instead of
//! content, in which case every requested tool runs concurrently, the
//! results are appended to the transcript in call order, and the model is
//! asked again. A reply with no tool calls ends the loop.
//!
//! Retry strategy (chat and image endpoints alike):
//! - HTTP 429 or 5xx → retry with exponential backoff
//! - HTTP 4xx (not 429) → fail immediately
//! - Network error → retry

use std::time::Duration;

use anyhow::{bail, Context, Result};
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::LlmConfig;
use crate::models::ChatMessage;
use crate::tools::{self, ToolSpec};

/// Upper bound on LLM round trips for a single reply. Exceeding it is an
/// error rather than a forced answer: a model stuck requesting tools is
/// not in a state worth posting.
pub const MAX_TOOL_ROUNDS: usize = 10;

/// What a finished chat produced: the reply text plus any image URLs the
/// tool loop generated along the way.
#[derive(Debug, Default)]
pub struct ChatOutcome {
    pub message: String,
    pub image_urls: Vec<String>,
}

/// Client for an OpenAI-compatible API (chat completions and image
/// generations). Requires the `OPENAI_API_KEY` environment variable.
pub struct OpenAiClient {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
    model: String,
    image_model: String,
    max_retries: u32,
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    #[serde(skip_serializing_if = "Option::is_none")]
    tools: Option<&'a [ToolSpec]>,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: ChatMessage,
}

#[derive(Deserialize)]
struct ImageResponse {
    data: Vec<ImageDatum>,
}

#[derive(Deserialize)]
struct ImageDatum {
    url: String,
}

impl OpenAiClient {
    /// Build a client from configuration and the `OPENAI_API_KEY`
    /// environment variable.
    pub fn from_config(config: &LlmConfig) -> Result<Self> {
        let api_key = std::env::var("OPENAI_API_KEY")
            .context("OPENAI_API_KEY environment variable not set")?;

        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(Self {
            http,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key,
            model: config.model.clone(),
            image_model: config.image_model.clone(),
            max_retries: config.max_retries,
        })
    }

    /// Run the full tool loop and return the model's final text reply.
    ///
    /// Tool calls within one round run concurrently; their results are
    /// appended in the order the model requested them. Tool failures are
    /// reported back to the model as error strings and never abort the
    /// loop. Only exhausting [`MAX_TOOL_ROUNDS`] is fatal.
    pub async fn chat(&self, messages: Vec<ChatMessage>) -> Result<ChatOutcome> {
        let specs = tools::definitions();
        let mut transcript = messages;
        let mut image_urls: Vec<String> = Vec::new();

        for round in 0..MAX_TOOL_ROUNDS {
            let reply = self.chat_completion(&transcript, &specs).await?;

            let calls = match &reply.tool_calls {
                Some(calls) if !calls.is_empty() => calls.clone(),
                _ => {
                    return Ok(ChatOutcome {
                        message: reply.content.unwrap_or_default(),
                        image_urls,
                    });
                }
            };

            debug!(round, requested = calls.len(), "running tool calls");
            transcript.push(reply);

            let outputs = join_all(calls.iter().map(|call| tools::run_tool(self, call))).await;
            for (call, output) in calls.iter().zip(outputs) {
                image_urls.extend(output.image_urls);
                transcript.push(ChatMessage::tool(output.content, call.id.clone()));
            }
        }

        bail!(
            "model kept requesting tools after {} rounds without producing a reply",
            MAX_TOOL_ROUNDS
        )
    }

    /// One chat completion round trip. Returns the first choice's message.
    pub async fn chat_completion(
        &self,
        messages: &[ChatMessage],
        tools: &[ToolSpec],
    ) -> Result<ChatMessage> {
        let url = format!("{}/chat/completions", self.base_url);
        let request = ChatRequest {
            model: &self.model,
            messages,
            tools: if tools.is_empty() { None } else { Some(tools) },
        };

        let mut last_err = None;

        for attempt in 0..=self.max_retries {
            if attempt > 0 {
                // Exponential backoff: 1s, 2s, 4s, 8s, ...
                let delay = Duration::from_secs(1 << (attempt - 1).min(5));
                tokio::time::sleep(delay).await;
            }

            let resp = self
                .http
                .post(&url)
                .header("Authorization", format!("Bearer {}", self.api_key))
                .header("Content-Type", "application/json")
                .json(&request)
                .send()
                .await;

            match resp {
                Ok(response) => {
                    let status = response.status();

                    if status.is_success() {
                        let parsed: ChatResponse = response.json().await?;
                        let choice = parsed
                            .choices
                            .into_iter()
                            .next()
                            .ok_or_else(|| anyhow::anyhow!("chat response had no choices"))?;
                        return Ok(choice.message);
                    }

                    if status.as_u16() == 429 || status.is_server_error() {
                        let body_text = response.text().await.unwrap_or_default();
                        last_err =
                            Some(anyhow::anyhow!("LLM API error {}: {}", status, body_text));
                        continue;
                    }

                    let body_text = response.text().await.unwrap_or_default();
                    bail!("LLM API error {}: {}", status, body_text);
                }
                Err(e) => {
                    last_err = Some(e.into());
                    continue;
                }
            }
        }

        Err(last_err.unwrap_or_else(|| anyhow::anyhow!("chat completion failed after retries")))
    }

    /// Generate one image and return its URL.
    pub async fn generate_image(&self, prompt: &str) -> Result<String> {
        let url = format!("{}/images/generations", self.base_url);
        let body = serde_json::json!({
            "model": self.image_model,
            "prompt": prompt,
            "n": 1,
            "size": "1024x1024",
        });

        let mut last_err = None;

        for attempt in 0..=self.max_retries {
            if attempt > 0 {
                let delay = Duration::from_secs(1 << (attempt - 1).min(5));
                tokio::time::sleep(delay).await;
            }

            let resp = self
                .http
                .post(&url)
                .header("Authorization", format!("Bearer {}", self.api_key))
                .header("Content-Type", "application/json")
                .json(&body)
                .send()
                .await;

            match resp {
                Ok(response) => {
                    let status = response.status();

                    if status.is_success() {
                        let parsed: ImageResponse = response.json().await?;
                        let datum = parsed
                            .data
                            .into_iter()
                            .next()
                            .ok_or_else(|| anyhow::anyhow!("image response had no data"))?;
                        return Ok(datum.url);
                    }

                    if status.as_u16() == 429 || status.is_server_error() {
                        let body_text = response.text().await.unwrap_or_default();
                        last_err =
                            Some(anyhow::anyhow!("image API error {}: {}", status, body_text));
                        continue;
                    }

                    let body_text = response.text().await.unwrap_or_default();
                    bail!("image API error {}: {}", status, body_text);
                }
                Err(e) => {
                    last_err = Some(e.into());
                    continue;
                }
            }
        }

        Err(last_err.unwrap_or_else(|| anyhow::anyhow!("image generation failed after retries")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Role;

    #[test]
    fn chat_request_omits_empty_tools() {
        let messages = vec![ChatMessage::user("hi", None)];
        let request = ChatRequest {
            model: "test-model",
            messages: &messages,
            tools: None,
        };
        let json = serde_json::to_string(&request).unwrap();
        assert!(!json.contains("\"tools\""));
    }

    #[test]
    fn parses_chat_response_first_choice() {
        let raw = r#"{"choices":[{"message":{"role":"assistant","content":"hello"}}]}"#;
        let parsed: ChatResponse = serde_json::from_str(raw).unwrap();
        let message = parsed.choices.into_iter().next().unwrap().message;
        assert_eq!(message.role, Role::Assistant);
        assert_eq!(message.content.as_deref(), Some("hello"));
    }

    #[test]
    fn parses_tool_call_reply() {
        let raw = r#"{"choices":[{"message":{
            "role":"assistant",
            "content":null,
            "tool_calls":[{"id":"call_1","type":"function",
                "function":{"name":"get_version","arguments":"{}"}}]
        }}]}"#;
        let parsed: ChatResponse = serde_json::from_str(raw).unwrap();
        let message = parsed.choices.into_iter().next().unwrap().message;
        let calls = message.tool_calls.unwrap();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].function.name, "get_version");
    }
}
