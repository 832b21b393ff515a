//! The polling daemon behind `tootloom serve`.
//!
//! One loop: read the cursor, fetch mention notifications since it,
//! process them strictly sequentially (failure-isolated, see
//! [`Bot::process_mention`]), advance the cursor to the numeric max of the
//! attempted ids, sleep, repeat. Cancellation is checked between
//! notifications and during the sleep, never mid-notification, so an
//! interrupted run leaves no half-written thread.

use std::time::Duration;

use anyhow::Result;
use sqlx::SqlitePool;
use tokio::sync::watch;
use tracing::{error, info, warn};

use crate::pipeline::Bot;
use crate::store;

/// Key for the notification watermark in the `checkpoints` table.
pub const CURSOR_SOURCE: &str = "notifications";

/// Runs the polling loop until `shutdown` flips to `true`.
pub async fn run(bot: &Bot, mut shutdown: watch::Receiver<bool>) -> Result<()> {
    let interval = Duration::from_secs(bot.config.bot.poll_interval_secs);
    info!(
        poll_interval_secs = bot.config.bot.poll_interval_secs,
        "polling for mentions"
    );

    loop {
        if *shutdown.borrow() {
            break;
        }

        if let Err(err) = poll_once(bot, &mut shutdown).await {
            // A failed cycle (e.g. the notification fetch itself) is not
            // fatal; the next cycle retries from the same cursor.
            error!(error = %format!("{err:#}"), "poll cycle failed");
        }

        tokio::select! {
            _ = tokio::time::sleep(interval) => {}
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    break;
                }
            }
        }
    }

    info!("shutting down");
    Ok(())
}

/// One poll cycle: fetch mentions since the cursor and handle each in
/// received order, advancing the cursor after every attempt.
async fn poll_once(bot: &Bot, shutdown: &mut watch::Receiver<bool>) -> Result<()> {
    let cursor = store::get_cursor(&bot.pool, CURSOR_SOURCE).await?;
    let notifications = bot
        .mastodon
        .notifications(cursor.as_deref(), &["mention"])
        .await?;

    if notifications.is_empty() {
        return Ok(());
    }
    info!(count = notifications.len(), "mentions to process");

    for notification in &notifications {
        if *shutdown.borrow() {
            break;
        }

        match &notification.status {
            Some(status) => bot.process_mention(status).await,
            None => {
                warn!(id = %notification.id, "mention notification without a status, skipping")
            }
        }

        advance_cursor(&bot.pool, &notification.id).await?;
    }

    Ok(())
}

/// Moves the stored cursor forward iff `id` is numerically greater than
/// the current watermark (or no watermark exists yet).
pub async fn advance_cursor(pool: &SqlitePool, id: &str) -> Result<()> {
    let current = store::get_cursor(pool, CURSOR_SOURCE).await?;
    let advanced = match &current {
        Some(current) => id_greater(id, current),
        None => true,
    };
    if advanced {
        store::set_cursor(pool, CURSOR_SOURCE, id).await?;
    }
    Ok(())
}

/// Numeric comparison of decimal-string ids: longer means greater, equal
/// lengths fall back to lexicographic order. Works beyond the u64 range,
/// which Mastodon snowflake ids exceed.
pub fn id_greater(a: &str, b: &str) -> bool {
    let a = a.trim_start_matches('0');
    let b = b.trim_start_matches('0');
    match a.len().cmp(&b.len()) {
        std::cmp::Ordering::Greater => true,
        std::cmp::Ordering::Less => false,
        std::cmp::Ordering::Equal => a > b,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn longer_id_is_greater() {
        assert!(id_greater("100", "99"));
        assert!(!id_greater("99", "100"));
    }

    #[test]
    fn equal_length_compares_lexicographically() {
        assert!(id_greater("110", "109"));
        assert!(!id_greater("109", "110"));
    }

    #[test]
    fn equal_ids_are_not_greater() {
        assert!(!id_greater("42", "42"));
    }

    #[test]
    fn leading_zeros_are_ignored() {
        assert!(id_greater("0100", "99"));
        assert!(!id_greater("007", "42"));
    }

    #[test]
    fn works_beyond_u64() {
        assert!(id_greater("111112604541652294364849", "111112604541652294364848"));
    }
}
