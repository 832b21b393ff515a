//! Thread resolution: which local thread does an incoming reply continue?
//!
//! Local threads are linear; the network's reply tree is not. A reply lands
//! in one of three cases:
//!
//! 1. its parent is the tip of a known thread → continue that thread;
//! 2. its parent is a known message but not any thread's tip → the
//!    conversation is forking; clone the thread up to the parent;
//! 3. its parent was never recorded → rebuild history from the network's
//!    own ancestor chain (reconciliation).
//!
//! Clone is all-or-nothing. Reconciliation is deliberately best-effort per
//! ancestor: partial history beats none.

use anyhow::Result;
use async_trait::async_trait;
use sqlx::SqlitePool;
use tracing::{info, warn};

use crate::mastodon::{normalize_content, Status};
use crate::models::{ChatMessage, MessageKind, Privacy};
use crate::store;

/// Network-side view of a reply tree. Implemented by
/// [`MastodonClient`](crate::mastodon::MastodonClient); tests stub it.
#[async_trait]
pub trait ReplyTree: Send + Sync {
    /// Ancestors of the given post, root first, excluding the post itself.
    async fn ancestors(&self, status_id: &str) -> Result<Vec<Status>>;
}

/// Returns the id of the thread a reply to `status` should extend,
/// creating, forking, or reconciling as needed.
pub async fn resolve_thread(
    pool: &SqlitePool,
    tree: &impl ReplyTree,
    bot_account_id: &str,
    status: &Status,
) -> Result<String> {
    let Some(parent_id) = status.in_reply_to_id.as_deref() else {
        // Root of a fresh conversation
        return store::create_thread(pool).await;
    };

    let Some(parent_msg) = store::message_by_status_id(pool, parent_id).await? else {
        // The network has a reply tree here but we never recorded it.
        return reconcile_thread(pool, tree, bot_account_id, &status.id).await;
    };

    let candidates = store::threads_containing(pool, &parent_msg.id).await?;
    if candidates.is_empty() {
        // Known message with no thread membership. Unlikely; start fresh.
        return store::create_thread(pool).await;
    }

    for thread_id in &candidates {
        if let Some(tip) = store::thread_tip(pool, thread_id).await? {
            if tip.message_id == parent_msg.id {
                // The reply continues this thread's tip; no fork.
                return Ok(thread_id.clone());
            }
        }
    }

    // The parent is not the tip of any thread: the user replied past the
    // point where the conversation already moved on. Fork by cloning one
    // candidate up to the parent.
    let source = &candidates[0];
    info!(
        source = %source,
        cutoff = %parent_msg.id,
        "reply targets a non-tip message, forking thread"
    );
    store::clone_thread_through(pool, source, &parent_msg.id).await
}

/// Rebuilds a thread from the network's ancestor chain of `status_id`.
///
/// The resulting thread contains the ancestors in root-first order and
/// never the triggering post itself. Ancestors already recorded are reused
/// by id; missing ones are recorded here. Per-ancestor failures are logged
/// and skipped, and whatever succeeded still commits.
pub async fn reconcile_thread(
    pool: &SqlitePool,
    tree: &impl ReplyTree,
    bot_account_id: &str,
    status_id: &str,
) -> Result<String> {
    let ancestors = tree.ancestors(status_id).await?;
    info!(
        status_id,
        ancestors = ancestors.len(),
        "reconciling thread from network history"
    );

    let mut tx = pool.begin().await?;

    let thread_id = store::new_id();
    sqlx::query("INSERT INTO threads (id, created_at) VALUES (?, ?)")
        .bind(&thread_id)
        .bind(chrono::Utc::now().timestamp())
        .execute(&mut *tx)
        .await?;

    let mut seq = 0i64;
    for ancestor in &ancestors {
        let existing: Result<Option<String>, sqlx::Error> = sqlx::query_scalar(
            "SELECT id FROM messages WHERE status_id = ? ORDER BY id DESC LIMIT 1",
        )
        .bind(&ancestor.id)
        .fetch_optional(&mut *tx)
        .await;

        let message_id = match existing {
            Ok(Some(id)) => id,
            Ok(None) => match record_status(&mut tx, bot_account_id, ancestor).await {
                Ok(id) => id,
                Err(err) => {
                    warn!(status_id = %ancestor.id, error = %err, "skipping ancestor: failed to record");
                    continue;
                }
            },
            Err(err) => {
                warn!(status_id = %ancestor.id, error = %err, "skipping ancestor: lookup failed");
                continue;
            }
        };

        seq += 1;
        let linked = sqlx::query(
            "INSERT INTO thread_entries (thread_id, message_id, seq) VALUES (?, ?, ?)",
        )
        .bind(&thread_id)
        .bind(&message_id)
        .bind(seq)
        .execute(&mut *tx)
        .await;

        if let Err(err) = linked {
            warn!(status_id = %ancestor.id, error = %err, "skipping ancestor: failed to link");
            seq -= 1;
        }
    }

    tx.commit().await?;
    Ok(thread_id)
}

/// Builds the chat turn for a network status: assistant when the author is
/// the bot itself, user (named by the author's handle) otherwise.
pub fn status_chat_message(bot_account_id: &str, status: &Status) -> ChatMessage {
    let content = normalize_content(&status.content);
    if status.account.id == bot_account_id {
        ChatMessage::assistant(content)
    } else {
        ChatMessage::user(content, Some(status.account.acct.clone()))
    }
}

async fn record_status(
    tx: &mut sqlx::Transaction<'_, sqlx::Sqlite>,
    bot_account_id: &str,
    status: &Status,
) -> Result<String> {
    let chat = status_chat_message(bot_account_id, status);
    let body = serde_json::to_string(&chat)?;
    let kind = if status.account.id == bot_account_id {
        MessageKind::AssistantReply
    } else {
        MessageKind::UserStatus
    };
    let created_at = chrono::DateTime::parse_from_rfc3339(&status.created_at)
        .map(|t| t.timestamp())
        .unwrap_or_else(|_| chrono::Utc::now().timestamp());

    let id = store::new_id();
    sqlx::query(
        "INSERT INTO messages (id, kind, body, author, status_id, created_at, privacy) \
         VALUES (?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(&id)
    .bind(kind.as_str())
    .bind(&body)
    .bind(&status.account.acct)
    .bind(&status.id)
    .bind(created_at)
    .bind(Privacy::from_visibility(&status.visibility).as_str())
    .execute(&mut **tx)
    .await?;

    Ok(id)
}
