//! The reply pipeline: everything between "a mention arrived" and "the
//! reply is on the network and on disk".
//!
//! Per status: resolve the thread, compile the context, run the LLM tool
//! loop, clean and split the reply, persist both turns, then post the
//! chunks as a chain. Persistence happens *before* posting so a crash
//! between the two loses a post, never history. Any failure aborts this
//! notification only; the caller gets a best-effort error reply posted in
//! its place.

use anyhow::{Context, Result};
use regex::Regex;
use sqlx::SqlitePool;
use tracing::{error, info, warn};

use crate::config::Config;
use crate::history;
use crate::llm::OpenAiClient;
use crate::mastodon::{MastodonClient, NewStatusParams, Status};
use crate::models::{ChatMessage, MessageKind, Privacy};
use crate::resolver::{self, ReplyTree};
use crate::store::{self, NewMessage};
use crate::textsplit::split_text;

/// Everything a reply needs: storage, both network clients, and config.
pub struct Bot {
    pub pool: SqlitePool,
    pub mastodon: MastodonClient,
    pub llm: OpenAiClient,
    pub config: Config,
    /// The bot's own account id, from `verify_credentials`. Used to infer
    /// roles during reconciliation.
    pub account_id: String,
}

/// What one handled status produced.
#[derive(Debug)]
pub struct ReplyOutcome {
    pub thread_id: String,
    /// The cleaned reply text, before chunk splitting.
    pub reply: String,
    /// Network post ids of the chunks, in chain order. Empty in dry-run.
    pub posted_ids: Vec<String>,
}

impl Bot {
    /// Runs the full pipeline for one status. With `post = false` the
    /// reply is persisted but printed by the caller instead of posted.
    pub async fn reply_to_status(&self, status: &Status, post: bool) -> Result<ReplyOutcome> {
        let thread_id = resolver::resolve_thread(
            &self.pool,
            &self.mastodon,
            &self.account_id,
            status,
        )
        .await
        .context("resolving thread")?;

        let transcript = self
            .compile_context(&thread_id, &status.account.acct)
            .await
            .context("compiling context")?;

        let user_chat = resolver::status_chat_message(&self.account_id, status);
        let mut messages = transcript;
        messages.push(user_chat.clone());

        let outcome = self.llm.chat(messages).await.context("LLM chat")?;

        let reply = sanitize_mentions(&strip_markdown(&outcome.message));
        let prefixed = format!("@{} {}", status.account.acct, reply);
        let chunks = split_text(&prefixed, self.config.bot.max_post_chars);
        info!(
            thread_id = %thread_id,
            chunks = chunks.len(),
            images = outcome.image_urls.len(),
            "reply ready"
        );

        // Persist both turns before touching the network again. The
        // assistant turn gets its status id after the first chunk posts.
        let privacy = Privacy::from_visibility(&status.visibility);
        store::save_message_in_thread(
            &self.pool,
            &NewMessage {
                kind: MessageKind::UserStatus,
                body: serde_json::to_string(&user_chat)?,
                author: status.account.acct.clone(),
                status_id: Some(status.id.clone()),
                privacy,
            },
            &thread_id,
        )
        .await
        .context("persisting user turn")?;

        let assistant_chat = ChatMessage::assistant(reply.clone());
        let assistant_msg = store::save_message_in_thread(
            &self.pool,
            &NewMessage {
                kind: MessageKind::AssistantReply,
                body: serde_json::to_string(&assistant_chat)?,
                author: "assistant".to_string(),
                status_id: None,
                privacy,
            },
            &thread_id,
        )
        .await
        .context("persisting assistant turn")?;

        if !post {
            return Ok(ReplyOutcome {
                thread_id,
                reply,
                posted_ids: Vec::new(),
            });
        }

        let media_ids = self
            .upload_images(&outcome.image_urls)
            .await
            .context("uploading media")?;

        let mut posted_ids = Vec::with_capacity(chunks.len());
        let mut reply_to = status.id.clone();

        for (i, chunk) in chunks.iter().enumerate() {
            let posted = self
                .mastodon
                .post_status(&NewStatusParams {
                    status: chunk.clone(),
                    in_reply_to_id: Some(reply_to.clone()),
                    media_ids: if i == 0 { media_ids.clone() } else { Vec::new() },
                    visibility: Some(status.visibility.clone()),
                    sensitive: false,
                })
                .await
                .with_context(|| format!("posting chunk {} of {}", i + 1, chunks.len()))?;

            if i == 0 {
                store::set_message_status_id(&self.pool, &assistant_msg.id, &posted.id).await?;
            } else {
                // Bookkeeping so a reply to a continuation chunk still
                // resolves to this thread.
                store::save_message_in_thread(
                    &self.pool,
                    &NewMessage {
                        kind: MessageKind::Pseudo,
                        body: serde_json::to_string(&ChatMessage::assistant(chunk.clone()))?,
                        author: "assistant".to_string(),
                        status_id: Some(posted.id.clone()),
                        privacy,
                    },
                    &thread_id,
                )
                .await
                .context("persisting continuation chunk")?;
            }

            reply_to = posted.id.clone();
            posted_ids.push(posted.id);
        }

        Ok(ReplyOutcome {
            thread_id,
            reply,
            posted_ids,
        })
    }

    /// Handles one mention end to end, converting any failure into a
    /// best-effort error reply. Never returns an error: failure isolation
    /// is the contract the polling loop relies on.
    pub async fn process_mention(&self, status: &Status) {
        match self.reply_to_status(status, true).await {
            Ok(outcome) => {
                info!(
                    status_id = %status.id,
                    thread_id = %outcome.thread_id,
                    posts = outcome.posted_ids.len(),
                    "mention handled"
                );
            }
            Err(err) => {
                error!(status_id = %status.id, error = %format!("{err:#}"), "mention failed");
                self.post_error_reply(status).await;
            }
        }
    }

    /// System persona + primer, then the resolved thread's turns.
    async fn compile_context(&self, thread_id: &str, acct: &str) -> Result<Vec<ChatMessage>> {
        let digest = history::per_user_thread_digest(&self.pool, acct).await?;
        let recent = history::recent_cross_user_context(
            &self.pool,
            self.config.bot.recent_context_messages,
        )
        .await?;
        let primer = history::render_primer(acct, &digest, &recent)?;

        let mut messages = vec![ChatMessage::system(format!(
            "{}\n\n{}",
            self.config.bot.persona, primer
        ))];

        for message in history::restore_thread(&self.pool, thread_id).await? {
            messages.push(message.chat_message()?);
        }
        Ok(messages)
    }

    /// Downloads each generated image and uploads it as media, returning
    /// the attachment ids for the first chunk.
    async fn upload_images(&self, urls: &[String]) -> Result<Vec<String>> {
        if urls.is_empty() {
            return Ok(Vec::new());
        }

        let http = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(60))
            .build()?;

        let mut media_ids = Vec::with_capacity(urls.len());
        for (i, url) in urls.iter().enumerate() {
            let resp = http.get(url).send().await?;
            if !resp.status().is_success() {
                anyhow::bail!("image download failed with {}", resp.status());
            }
            let bytes = resp.bytes().await?.to_vec();
            let attachment = self
                .mastodon
                .upload_media(bytes, &format!("generated-{}.png", i + 1))
                .await?;
            media_ids.push(attachment.id);
        }
        Ok(media_ids)
    }

    /// The fixed user-visible failure reply. Its own failure is swallowed.
    async fn post_error_reply(&self, status: &Status) {
        let params = NewStatusParams {
            status: format!(
                "@{} something went wrong, please try again later",
                status.account.acct
            ),
            in_reply_to_id: Some(status.id.clone()),
            media_ids: Vec::new(),
            visibility: Some(status.visibility.clone()),
            sensitive: false,
        };
        if let Err(err) = self.mastodon.post_status(&params).await {
            warn!(status_id = %status.id, error = %format!("{err:#}"), "error reply failed too");
        }
    }
}

/// Runs Reconciliation for a status id and returns the new thread id.
/// Thin wrapper so the CLI `reconcile` command goes through one door.
pub async fn reconcile(
    pool: &SqlitePool,
    tree: &impl ReplyTree,
    bot_account_id: &str,
    status_id: &str,
) -> Result<String> {
    resolver::reconcile_thread(pool, tree, bot_account_id, status_id).await
}

/// Collapses markdown image/link syntax to its label: Mastodon renders
/// `![alt](url)` and `[text](url)` literally.
pub fn strip_markdown(text: &str) -> String {
    // The pattern is fixed at compile time; it cannot fail to parse.
    let link = Regex::new(r"!?\[([^\]]*)\]\([^)]*\)").unwrap();
    link.replace_all(text, "$1").into_owned()
}

/// Defangs mentions in model output (`@` becomes `@ `) so the bot cannot
/// be talked into pinging arbitrary accounts. The author prefix is added
/// after this runs.
pub fn sanitize_mentions(text: &str) -> String {
    text.replace('@', "@ ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_markdown_links_to_labels() {
        assert_eq!(
            strip_markdown("see [the docs](https://example.com/docs) for more"),
            "see the docs for more"
        );
    }

    #[test]
    fn strips_markdown_images_entirely_when_unlabelled() {
        assert_eq!(strip_markdown("here ![](https://example.com/a.png) done"), "here  done");
    }

    #[test]
    fn keeps_image_alt_text() {
        assert_eq!(strip_markdown("![a crab](https://x/c.png)"), "a crab");
    }

    #[test]
    fn plain_text_is_untouched_by_stripping() {
        assert_eq!(strip_markdown("no [brackets here"), "no [brackets here");
    }

    #[test]
    fn sanitize_defangs_mentions() {
        assert_eq!(
            sanitize_mentions("ask @admin@example.social about it"),
            "ask @ admin@ example.social about it"
        );
    }

    #[test]
    fn sanitize_leaves_plain_text_alone() {
        assert_eq!(sanitize_mentions("nothing to do"), "nothing to do");
    }
}
