use anyhow::Result;
use sqlx::SqlitePool;

pub async fn run_migrations(pool: &SqlitePool) -> Result<()> {
    // Create messages table
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS messages (
            id TEXT PRIMARY KEY,
            kind TEXT NOT NULL,
            body TEXT NOT NULL,
            author TEXT NOT NULL,
            status_id TEXT,
            created_at INTEGER NOT NULL,
            privacy TEXT NOT NULL DEFAULT 'public'
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Create threads table
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS threads (
            id TEXT PRIMARY KEY,
            created_at INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Create thread_entries table (thread membership, ordered by seq)
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS thread_entries (
            thread_id TEXT NOT NULL,
            message_id TEXT NOT NULL,
            seq INTEGER NOT NULL,
            PRIMARY KEY (thread_id, seq),
            FOREIGN KEY (thread_id) REFERENCES threads(id),
            FOREIGN KEY (message_id) REFERENCES messages(id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Create checkpoints table
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS checkpoints (
            source TEXT PRIMARY KEY,
            cursor TEXT NOT NULL,
            updated_at INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Create indexes
    // status_id is deliberately not unique: reprocessing a notification
    // after a crash records a fresh message for the same network post.
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_messages_status_id ON messages(status_id)")
        .execute(pool)
        .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_messages_author ON messages(author)")
        .execute(pool)
        .await?;
    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_thread_entries_message_id ON thread_entries(message_id)",
    )
    .execute(pool)
    .await?;

    Ok(())
}
