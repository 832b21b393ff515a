//! Message and thread persistence.
//!
//! Messages are append-only; threads order shared messages through the
//! `thread_entries` edge table. Multi-row mutations (append, clone) run in
//! transactions so a thread is never left with a gap in its sequence.

use anyhow::{anyhow, bail, Result};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};
use uuid::Uuid;

use crate::models::{Message, MessageKind, Privacy, ThreadEntry};

/// Fields for a message about to be recorded.
#[derive(Debug, Clone)]
pub struct NewMessage {
    pub kind: MessageKind,
    pub body: String,
    pub author: String,
    pub status_id: Option<String>,
    pub privacy: Privacy,
}

pub(crate) fn new_id() -> String {
    Uuid::now_v7().to_string()
}

pub(crate) fn message_from_row(row: &SqliteRow) -> Result<Message> {
    let kind_str: String = row.get("kind");
    let kind = MessageKind::parse(&kind_str)
        .ok_or_else(|| anyhow!("unknown message kind in store: '{}'", kind_str))?;
    let privacy_str: String = row.get("privacy");
    let privacy = Privacy::parse(&privacy_str)
        .ok_or_else(|| anyhow!("unknown privacy in store: '{}'", privacy_str))?;

    Ok(Message {
        id: row.get("id"),
        kind,
        body: row.get("body"),
        author: row.get("author"),
        status_id: row.get("status_id"),
        created_at: row.get("created_at"),
        privacy,
    })
}

/// Records a message and appends it to a thread at `max(seq) + 1`, all in
/// one transaction so a failure never leaves an orphan message or a gap in
/// the sequence.
///
/// The read-then-write on `seq` is safe only while appends to a thread are
/// serialized; the polling loop processes notifications one at a time.
pub async fn save_message_in_thread(
    pool: &SqlitePool,
    new: &NewMessage,
    thread_id: &str,
) -> Result<Message> {
    let msg = Message {
        id: new_id(),
        kind: new.kind,
        body: new.body.clone(),
        author: new.author.clone(),
        status_id: new.status_id.clone(),
        created_at: chrono::Utc::now().timestamp(),
        privacy: new.privacy,
    };

    let mut tx = pool.begin().await?;

    let next_seq: i64 = sqlx::query_scalar(
        "SELECT COALESCE(MAX(seq), 0) + 1 FROM thread_entries WHERE thread_id = ?",
    )
    .bind(thread_id)
    .fetch_one(&mut *tx)
    .await?;

    sqlx::query(
        "INSERT INTO messages (id, kind, body, author, status_id, created_at, privacy) \
         VALUES (?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(&msg.id)
    .bind(msg.kind.as_str())
    .bind(&msg.body)
    .bind(&msg.author)
    .bind(&msg.status_id)
    .bind(msg.created_at)
    .bind(msg.privacy.as_str())
    .execute(&mut *tx)
    .await?;

    sqlx::query("INSERT INTO thread_entries (thread_id, message_id, seq) VALUES (?, ?, ?)")
        .bind(thread_id)
        .bind(&msg.id)
        .bind(next_seq)
        .execute(&mut *tx)
        .await?;

    tx.commit().await?;
    Ok(msg)
}

/// Records the network post id on an assistant message once the post has
/// actually succeeded. The only mutation messages ever receive.
pub async fn set_message_status_id(
    pool: &SqlitePool,
    message_id: &str,
    status_id: &str,
) -> Result<()> {
    sqlx::query("UPDATE messages SET status_id = ? WHERE id = ?")
        .bind(status_id)
        .bind(message_id)
        .execute(pool)
        .await?;
    Ok(())
}

/// Looks up the stored message for a network post. Reprocessing after a
/// crash can record the same post twice; the most recent record wins.
pub async fn message_by_status_id(pool: &SqlitePool, status_id: &str) -> Result<Option<Message>> {
    let row = sqlx::query(
        "SELECT id, kind, body, author, status_id, created_at, privacy \
         FROM messages WHERE status_id = ? ORDER BY id DESC LIMIT 1",
    )
    .bind(status_id)
    .fetch_optional(pool)
    .await?;

    row.as_ref().map(message_from_row).transpose()
}

pub async fn create_thread(pool: &SqlitePool) -> Result<String> {
    let id = new_id();
    sqlx::query("INSERT INTO threads (id, created_at) VALUES (?, ?)")
        .bind(&id)
        .bind(chrono::Utc::now().timestamp())
        .execute(pool)
        .await?;
    Ok(id)
}

/// Clones a thread up to and including the cutoff message into a new
/// thread, preserving the source `seq` values. All-or-nothing: a partial
/// clone would silently corrupt later continuations, so any failure rolls
/// the whole operation back.
pub async fn clone_thread_through(
    pool: &SqlitePool,
    source_thread_id: &str,
    cutoff_message_id: &str,
) -> Result<String> {
    let mut tx = pool.begin().await?;

    let cutoff_seq: Option<i64> = sqlx::query_scalar(
        "SELECT seq FROM thread_entries WHERE thread_id = ? AND message_id = ? \
         ORDER BY seq ASC LIMIT 1",
    )
    .bind(source_thread_id)
    .bind(cutoff_message_id)
    .fetch_optional(&mut *tx)
    .await?;

    let Some(cutoff_seq) = cutoff_seq else {
        bail!(
            "message {} is not part of thread {}",
            cutoff_message_id,
            source_thread_id
        );
    };

    let new_thread_id = new_id();
    sqlx::query("INSERT INTO threads (id, created_at) VALUES (?, ?)")
        .bind(&new_thread_id)
        .bind(chrono::Utc::now().timestamp())
        .execute(&mut *tx)
        .await?;

    sqlx::query(
        "INSERT INTO thread_entries (thread_id, message_id, seq) \
         SELECT ?, message_id, seq FROM thread_entries WHERE thread_id = ? AND seq <= ?",
    )
    .bind(&new_thread_id)
    .bind(source_thread_id)
    .bind(cutoff_seq)
    .execute(&mut *tx)
    .await?;

    tx.commit().await?;
    Ok(new_thread_id)
}

pub async fn thread_entries(pool: &SqlitePool, thread_id: &str) -> Result<Vec<ThreadEntry>> {
    let rows = sqlx::query(
        "SELECT thread_id, message_id, seq FROM thread_entries WHERE thread_id = ? ORDER BY seq",
    )
    .bind(thread_id)
    .fetch_all(pool)
    .await?;

    Ok(rows
        .iter()
        .map(|row| ThreadEntry {
            thread_id: row.get("thread_id"),
            message_id: row.get("message_id"),
            seq: row.get("seq"),
        })
        .collect())
}

/// All messages of a thread in `seq` order, pseudo turns included.
pub async fn thread_messages(pool: &SqlitePool, thread_id: &str) -> Result<Vec<Message>> {
    let rows = sqlx::query(
        "SELECT m.id, m.kind, m.body, m.author, m.status_id, m.created_at, m.privacy \
         FROM thread_entries te \
         JOIN messages m ON m.id = te.message_id \
         WHERE te.thread_id = ? ORDER BY te.seq",
    )
    .bind(thread_id)
    .fetch_all(pool)
    .await?;

    rows.iter().map(message_from_row).collect()
}

pub async fn threads_containing(pool: &SqlitePool, message_id: &str) -> Result<Vec<String>> {
    let ids: Vec<String> = sqlx::query_scalar(
        "SELECT DISTINCT thread_id FROM thread_entries WHERE message_id = ? ORDER BY thread_id",
    )
    .bind(message_id)
    .fetch_all(pool)
    .await?;
    Ok(ids)
}

/// The entry with the highest `seq`, or `None` for an empty thread.
pub async fn thread_tip(pool: &SqlitePool, thread_id: &str) -> Result<Option<ThreadEntry>> {
    let row = sqlx::query(
        "SELECT thread_id, message_id, seq FROM thread_entries WHERE thread_id = ? \
         ORDER BY seq DESC LIMIT 1",
    )
    .bind(thread_id)
    .fetch_optional(pool)
    .await?;

    Ok(row.map(|row| ThreadEntry {
        thread_id: row.get("thread_id"),
        message_id: row.get("message_id"),
        seq: row.get("seq"),
    }))
}

pub async fn get_cursor(pool: &SqlitePool, source: &str) -> Result<Option<String>> {
    let result: Option<String> =
        sqlx::query_scalar("SELECT cursor FROM checkpoints WHERE source = ?")
            .bind(source)
            .fetch_optional(pool)
            .await?;
    Ok(result)
}

pub async fn set_cursor(pool: &SqlitePool, source: &str, cursor: &str) -> Result<()> {
    let now = chrono::Utc::now().timestamp();
    sqlx::query(
        r#"
        INSERT INTO checkpoints (source, cursor, updated_at) VALUES (?, ?, ?)
        ON CONFLICT(source) DO UPDATE SET cursor = excluded.cursor, updated_at = excluded.updated_at
        "#,
    )
    .bind(source)
    .bind(cursor)
    .bind(now)
    .execute(pool)
    .await?;

    Ok(())
}
