//! History compilation: the bounded context handed to the LLM.
//!
//! Three surfaces feed a reply:
//! - the resolved thread itself, replayed in `seq` order;
//! - a system-wide slice of recent messages (flavor);
//! - a digest of the author's recent threads.
//!
//! Pseudo turns (bookkeeping for continuation chunks) carry no new content
//! and are excluded everywhere. Threads containing any private message are
//! excluded from the cross-user surfaces.

use anyhow::Result;
use sqlx::SqlitePool;

use crate::models::{ChatMessage, Message};
use crate::store;

/// Cap on threads in the per-user digest.
pub const MAX_DIGEST_THREADS: usize = 10;
/// How many recent thread memberships to scan when building the digest.
pub const MAX_RECENT_MEMBERSHIPS: i64 = 100;

/// All non-pseudo messages of a thread, ordered by `seq`.
///
/// A thread id with no rows yields an empty list, not an error.
pub async fn restore_thread(pool: &SqlitePool, thread_id: &str) -> Result<Vec<Message>> {
    let rows = sqlx::query(
        "SELECT m.id, m.kind, m.body, m.author, m.status_id, m.created_at, m.privacy \
         FROM thread_entries te \
         JOIN messages m ON m.id = te.message_id \
         WHERE te.thread_id = ? AND m.kind != 'pseudo' \
         ORDER BY te.seq",
    )
    .bind(thread_id)
    .fetch_all(pool)
    .await?;

    rows.iter().map(store::message_from_row).collect()
}

/// The most recent messages system-wide, newest first.
///
/// Excludes pseudo turns, private messages, and any message belonging to a
/// thread that contains a private message.
pub async fn recent_cross_user_context(pool: &SqlitePool, limit: i64) -> Result<Vec<Message>> {
    let rows = sqlx::query(
        "SELECT m.id, m.kind, m.body, m.author, m.status_id, m.created_at, m.privacy \
         FROM messages m \
         WHERE m.privacy = 'public' \
           AND m.kind != 'pseudo' \
           AND NOT EXISTS ( \
               SELECT 1 FROM thread_entries te \
               JOIN thread_entries sibling ON sibling.thread_id = te.thread_id \
               JOIN messages pm ON pm.id = sibling.message_id \
               WHERE te.message_id = m.id AND pm.privacy = 'private' \
           ) \
         ORDER BY m.id DESC \
         LIMIT ?",
    )
    .bind(limit)
    .fetch_all(pool)
    .await?;

    rows.iter().map(store::message_from_row).collect()
}

/// Recent threads the account has participated in, most recent first, each
/// as its full (non-pseudo) message list.
///
/// Scans the account's [`MAX_RECENT_MEMBERSHIPS`] most recent thread
/// memberships, deduplicates to threads, and caps at
/// [`MAX_DIGEST_THREADS`]. An account with no history yields an empty
/// list.
pub async fn per_user_thread_digest(pool: &SqlitePool, acct: &str) -> Result<Vec<Vec<Message>>> {
    let memberships: Vec<String> = sqlx::query_scalar(
        "SELECT te.thread_id \
         FROM thread_entries te \
         JOIN messages m ON m.id = te.message_id \
         WHERE m.author = ? \
         ORDER BY m.id DESC \
         LIMIT ?",
    )
    .bind(acct)
    .bind(MAX_RECENT_MEMBERSHIPS)
    .fetch_all(pool)
    .await?;

    let mut thread_ids: Vec<String> = Vec::new();
    for id in memberships {
        if !thread_ids.contains(&id) {
            thread_ids.push(id);
        }
        if thread_ids.len() == MAX_DIGEST_THREADS {
            break;
        }
    }

    let mut digest = Vec::with_capacity(thread_ids.len());
    for thread_id in &thread_ids {
        digest.push(restore_thread(pool, thread_id).await?);
    }
    Ok(digest)
}

/// Formats the digest and the recent slice into the auxiliary instruction
/// block prepended to the LLM call.
pub fn render_primer(acct: &str, digest: &[Vec<Message>], recent: &[Message]) -> Result<String> {
    let mut threads_payload: Vec<Vec<ChatMessage>> = Vec::with_capacity(digest.len());
    for thread in digest {
        let mut turns = Vec::with_capacity(thread.len());
        for message in thread {
            turns.push(message.chat_message()?);
        }
        threads_payload.push(turns);
    }

    let mut recent_payload: Vec<ChatMessage> = Vec::with_capacity(recent.len());
    for message in recent {
        recent_payload.push(message.chat_message()?);
    }

    Ok(format!(
        "Your recent conversation threads with {acct} are listed below.\n\
         <threads>\n{}\n</threads>\n\n\
         Your most recent exchanges with other users are listed below.\n\
         <recent_messages>\n{}\n</recent_messages>\n",
        serde_json::to_string(&threads_payload)?,
        serde_json::to_string(&recent_payload)?,
    ))
}
