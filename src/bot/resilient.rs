//! Telegram API calls with automatic retry
//!
//! Transient network failures are retried with exponential backoff and
//! jitter. Long texts are split on line boundaries to stay under the
//! message limit.

use crate::config::{
    TELEGRAM_API_INITIAL_BACKOFF_MS, TELEGRAM_API_MAX_BACKOFF_MS, TELEGRAM_API_MAX_RETRIES,
    TELEGRAM_MESSAGE_LIMIT,
};
use anyhow::Result;
use std::time::Duration;
use teloxide::prelude::*;
use teloxide::types::{ChatId, InlineKeyboardMarkup, Message, ParseMode};
use tokio_retry::strategy::{jitter, ExponentialBackoff};
use tokio_retry::Retry;
use tracing::warn;

/// Retry a Telegram API operation with exponential backoff
///
/// - Initial delay: 500ms
/// - Max delay: 4s
/// - Max attempts: 3
///
/// # Errors
///
/// Returns the last error if all attempts fail.
pub async fn retry_telegram_operation<F, Fut, T>(operation: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T>>,
{
    let retry_strategy = ExponentialBackoff::from_millis(TELEGRAM_API_INITIAL_BACKOFF_MS)
        .max_delay(Duration::from_millis(TELEGRAM_API_MAX_BACKOFF_MS))
        .map(jitter)
        .take(TELEGRAM_API_MAX_RETRIES);

    Retry::spawn(retry_strategy, operation).await.map_err(|e| {
        warn!(
            "Telegram API operation failed after {} attempts: {}",
            TELEGRAM_API_MAX_RETRIES, e
        );
        e
    })
}

/// Send an HTML message with automatic retry on network failures.
///
/// # Errors
///
/// Returns an error after all retries are exhausted.
pub async fn send_message_resilient(
    bot: &Bot,
    chat_id: ChatId,
    text: impl Into<String>,
    markup: Option<InlineKeyboardMarkup>,
) -> Result<Message> {
    let text = text.into();
    retry_telegram_operation(|| async {
        let mut req = bot
            .send_message(chat_id, text.clone())
            .parse_mode(ParseMode::Html);
        if let Some(markup) = markup.clone() {
            req = req.reply_markup(markup);
        }
        req.await
            .map_err(|e| anyhow::anyhow!("Telegram send error: {e}"))
    })
    .await
}

/// Split `text` into parts of at most `limit` characters, preferring line breaks
#[must_use]
pub fn split_message(text: &str, limit: usize) -> Vec<String> {
    if text.is_empty() {
        return Vec::new();
    }
    if text.chars().count() <= limit {
        return vec![text.to_string()];
    }

    let mut parts = Vec::new();
    let mut current = String::new();
    let mut current_len = 0;

    for line in text.lines() {
        let mut line = line;
        // Lines longer than the limit are cut on char boundaries
        while line.chars().count() > limit {
            if !current.is_empty() {
                parts.push(std::mem::take(&mut current));
                current_len = 0;
            }
            let cut = line
                .char_indices()
                .nth(limit)
                .map_or(line.len(), |(pos, _)| pos);
            parts.push(line[..cut].to_string());
            line = &line[cut..];
        }

        let line_len = line.chars().count();
        let needed = if current.is_empty() { line_len } else { line_len + 1 };
        if current_len + needed > limit {
            parts.push(std::mem::take(&mut current));
            current_len = 0;
        }
        if !current.is_empty() {
            current.push('\n');
            current_len += 1;
        }
        current.push_str(line);
        current_len += line_len;
    }
    if !current.is_empty() {
        parts.push(current);
    }
    parts
}

/// Send a possibly long HTML message, the markup goes on the last part
///
/// # Errors
///
/// Returns an error if any part fails to send after retries.
pub async fn send_long_message(
    bot: &Bot,
    chat_id: ChatId,
    text: &str,
    markup: Option<InlineKeyboardMarkup>,
) -> Result<()> {
    let mut parts = split_message(text, TELEGRAM_MESSAGE_LIMIT);
    let last = parts.pop().unwrap_or_default();
    for part in parts {
        send_message_resilient(bot, chat_id, part, None).await?;
    }
    send_message_resilient(bot, chat_id, last, markup).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_short_message_is_single_part() {
        assert_eq!(split_message("привет", 10), vec!["привет"]);
        assert!(split_message("", 10).is_empty());
    }

    #[test]
    fn test_split_prefers_line_breaks() {
        let parts = split_message("aaaa\nbbbb\ncccc", 9);
        assert_eq!(parts, vec!["aaaa\nbbbb", "cccc"]);
    }

    #[test]
    fn test_long_line_is_cut() {
        let parts = split_message(&"я".repeat(25), 10);
        assert_eq!(parts.len(), 3);
        assert_eq!(parts[2].chars().count(), 5);
    }

    proptest! {
        #[test]
        fn test_parts_respect_limit(text in "[a-zа-я \n]{0,300}", limit in 5usize..50) {
            for part in split_message(&text, limit) {
                prop_assert!(part.chars().count() <= limit);
            }
        }
    }
}
