//! Mastodon API client.
//!
//! Covers the endpoints the bot needs: credential verification, status
//! fetch, reply-tree context, posting, mention notifications, and media
//! upload. All calls authenticate with a bearer token; non-2xx responses
//! surface the status code and response body as the error.
//!
//! # Retry Strategy
//!
//! Idempotent GETs retry transient failures with exponential backoff:
//! - HTTP 429 (rate limited) and 5xx (server error) → retry
//! - HTTP 4xx (client error, not 429) → fail immediately
//! - Network errors → retry
//!
//! POSTs (status creation, media upload) are never retried; a retry after
//! an ambiguous failure could post twice.

use anyhow::{bail, Context as AnyhowContext, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::config::MastodonConfig;
use crate::resolver::ReplyTree;

/// A Mastodon user account.
#[derive(Debug, Clone, Deserialize)]
pub struct Account {
    pub id: String,
    pub username: String,
    pub acct: String,
    #[serde(default)]
    pub display_name: String,
}

/// A Mastodon post. `content` is HTML; use [`normalize_content`] before
/// feeding it anywhere text is expected.
#[derive(Debug, Clone, Deserialize)]
pub struct Status {
    pub id: String,
    pub account: Account,
    pub content: String,
    pub in_reply_to_id: Option<String>,
    pub visibility: String,
    #[serde(default)]
    pub created_at: String,
}

/// The reply tree around a status: ancestors root-first, then descendants.
#[derive(Debug, Clone, Deserialize)]
pub struct StatusContext {
    pub ancestors: Vec<Status>,
    pub descendants: Vec<Status>,
}

/// An inbound notification. `status` is present for mentions.
#[derive(Debug, Clone, Deserialize)]
pub struct Notification {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub account: Account,
    pub status: Option<Status>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MediaAttachment {
    pub id: String,
}

/// Body for `POST /api/v1/statuses`.
#[derive(Debug, Clone, Serialize)]
pub struct NewStatusParams {
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub in_reply_to_id: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub media_ids: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub visibility: Option<String>,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub sensitive: bool,
}

pub struct MastodonClient {
    http: reqwest::Client,
    base_url: String,
    token: String,
    max_retries: u32,
}

impl MastodonClient {
    pub fn new(base_url: &str, token: String, timeout_secs: u64, max_retries: u32) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()?;

        Ok(MastodonClient {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            token,
            max_retries,
        })
    }

    /// Builds a client from config, reading the access token from the
    /// `MASTODON_ACCESS_TOKEN` environment variable.
    pub fn from_config(config: &MastodonConfig) -> Result<Self> {
        if config.base_url.is_empty() {
            bail!("mastodon.base_url is not configured");
        }
        let token = std::env::var("MASTODON_ACCESS_TOKEN")
            .context("MASTODON_ACCESS_TOKEN environment variable not set")?;
        Self::new(&config.base_url, token, config.timeout_secs, config.max_retries)
    }

    pub async fn verify_credentials(&self) -> Result<Account> {
        self.get_json("/api/v1/accounts/verify_credentials", &[])
            .await
    }

    pub async fn get_status(&self, id: &str) -> Result<Status> {
        self.get_json(&format!("/api/v1/statuses/{}", id), &[]).await
    }

    /// Fetches the reply tree around a status. Ancestors come back
    /// root-first; the status itself is in neither list.
    pub async fn get_context(&self, id: &str) -> Result<StatusContext> {
        self.get_json(&format!("/api/v1/statuses/{}/context", id), &[])
            .await
    }

    pub async fn notifications(
        &self,
        since_id: Option<&str>,
        types: &[&str],
    ) -> Result<Vec<Notification>> {
        let mut query: Vec<(&str, String)> = Vec::new();
        if let Some(since) = since_id {
            query.push(("since_id", since.to_string()));
        }
        for t in types {
            query.push(("types[]", t.to_string()));
        }
        self.get_json("/api/v1/notifications", &query).await
    }

    pub async fn post_status(&self, params: &NewStatusParams) -> Result<Status> {
        let resp = self
            .http
            .post(format!("{}/api/v1/statuses", self.base_url))
            .header("Authorization", format!("Bearer {}", self.token))
            .json(params)
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            bail!("mastodon API error {}: {}", status, body);
        }

        Ok(resp.json().await?)
    }

    pub async fn upload_media(&self, bytes: Vec<u8>, filename: &str) -> Result<MediaAttachment> {
        let part = reqwest::multipart::Part::bytes(bytes).file_name(filename.to_string());
        let form = reqwest::multipart::Form::new().part("file", part);

        let resp = self
            .http
            .post(format!("{}/api/v2/media", self.base_url))
            .header("Authorization", format!("Bearer {}", self.token))
            .multipart(form)
            .send()
            .await?;

        // 200 = processed, 202 = still processing server-side; both carry
        // a usable media id.
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            bail!("mastodon API error {}: {}", status, body);
        }

        Ok(resp.json().await?)
    }

    async fn get_json<T: serde::de::DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, String)],
    ) -> Result<T> {
        let url = format!("{}{}", self.base_url, path);
        let mut last_err = None;

        for attempt in 0..=self.max_retries {
            if attempt > 0 {
                // Exponential backoff: 1s, 2s, 4s, 8s, ...
                let delay = Duration::from_secs(1 << (attempt - 1).min(5));
                tokio::time::sleep(delay).await;
            }

            let resp = self
                .http
                .get(&url)
                .header("Authorization", format!("Bearer {}", self.token))
                .query(query)
                .send()
                .await;

            match resp {
                Ok(response) => {
                    let status = response.status();

                    if status.is_success() {
                        return Ok(response.json().await?);
                    }

                    // Rate limited or server error — retry
                    if status.as_u16() == 429 || status.is_server_error() {
                        let body = response.text().await.unwrap_or_default();
                        last_err = Some(anyhow::anyhow!("mastodon API error {}: {}", status, body));
                        continue;
                    }

                    // Client error (not 429) — don't retry
                    let body = response.text().await.unwrap_or_default();
                    bail!("mastodon API error {}: {}", status, body);
                }
                Err(e) => {
                    last_err = Some(e.into());
                    continue;
                }
            }
        }

        Err(last_err.unwrap_or_else(|| anyhow::anyhow!("mastodon request failed after retries")))
    }
}

#[async_trait]
impl ReplyTree for MastodonClient {
    async fn ancestors(&self, status_id: &str) -> Result<Vec<Status>> {
        Ok(self.get_context(status_id).await?.ancestors)
    }
}

/// Converts a status body from HTML to plain text: tags are dropped (with
/// `<br>` and `</p>` becoming newlines) and entities are decoded.
pub fn normalize_content(html: &str) -> String {
    let mut text = String::with_capacity(html.len());
    let mut rest = html;

    while let Some(open) = rest.find('<') {
        text.push_str(&rest[..open]);
        match rest[open..].find('>') {
            Some(close) => {
                let tag = rest[open + 1..open + close].trim().to_ascii_lowercase();
                if tag.starts_with("br") || tag == "/p" {
                    text.push('\n');
                }
                rest = &rest[open + close + 1..];
            }
            None => {
                // Unterminated tag; drop the remainder
                rest = "";
            }
        }
    }
    text.push_str(rest);

    html_escape::decode_html_entities(&text).trim().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_strips_tags_and_decodes_entities() {
        let html = "<p><span class=\"h-card\"><a href=\"https://example.social/@bot\">@<span>bot</span></a></span> tell me about &lt;crabs&gt; &amp; shells</p>";
        assert_eq!(normalize_content(html), "@bot tell me about <crabs> & shells");
    }

    #[test]
    fn normalize_turns_breaks_and_paragraphs_into_newlines() {
        let html = "<p>first line<br>second line</p><p>second paragraph</p>";
        assert_eq!(
            normalize_content(html),
            "first line\nsecond line\nsecond paragraph"
        );
    }

    #[test]
    fn normalize_handles_self_closing_break() {
        assert_eq!(normalize_content("a<br />b"), "a\nb");
    }

    #[test]
    fn normalize_plain_text_passes_through() {
        assert_eq!(normalize_content("just text"), "just text");
    }

    #[test]
    fn normalize_drops_unterminated_tag() {
        assert_eq!(normalize_content("hello <a href="), "hello");
    }

    #[test]
    fn new_status_params_omit_empty_fields() {
        let params = NewStatusParams {
            status: "hi".to_string(),
            in_reply_to_id: None,
            media_ids: Vec::new(),
            visibility: None,
            sensitive: false,
        };
        let json = serde_json::to_value(&params).unwrap();
        assert_eq!(json, serde_json::json!({ "status": "hi" }));
    }
}
