//! Telegram implementations of the outbound and file store seams

use super::resilient::{retry_telegram_operation, send_long_message};
use crate::engine::channel::{FileStoreError, OutboundError};
use crate::engine::{Choice, Document, FileStore, Outbound, Reply};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use teloxide::net::Download;
use teloxide::prelude::*;
use teloxide::types::{FileId, InlineKeyboardButton, InlineKeyboardMarkup, InputFile};
use tracing::{debug, info};

/// Maximum size of an uploaded document (20 MB)
const MAX_FILE_SIZE: u32 = 20 * 1024 * 1024;

/// Inline keyboard for a reply's choices, `None` when there are none
#[must_use]
pub fn keyboard(choices: &[Vec<Choice>]) -> Option<InlineKeyboardMarkup> {
    if choices.is_empty() {
        return None;
    }
    let rows = choices.iter().map(|row| {
        row.iter()
            .map(|choice| InlineKeyboardButton::callback(choice.label.clone(), choice.payload.clone()))
            .collect::<Vec<_>>()
    });
    Some(InlineKeyboardMarkup::new(rows))
}

/// Sends replies through the Bot API
#[derive(Clone)]
pub struct TelegramOutbound {
    bot: Bot,
}

impl TelegramOutbound {
    #[must_use]
    pub const fn new(bot: Bot) -> Self {
        Self { bot }
    }
}

#[async_trait]
impl Outbound for TelegramOutbound {
    async fn send(&self, chat_id: i64, reply: Reply) -> Result<(), OutboundError> {
        let chat = ChatId(chat_id);
        match reply {
            Reply::Text { text, choices } => {
                send_long_message(&self.bot, chat, &text, keyboard(&choices))
                    .await
                    .map_err(|e| OutboundError(e.to_string()))
            }
            Reply::Document { path, file_name } => {
                retry_telegram_operation(|| async {
                    let file = InputFile::file(&path).file_name(file_name.clone());
                    self.bot
                        .send_document(chat, file)
                        .await
                        .map_err(|e| anyhow::anyhow!("Telegram send_document error: {e}"))
                })
                .await
                .map(|_| debug!(chat_id, file_name, "Document sent"))
                .map_err(|e| OutboundError(e.to_string()))
            }
        }
    }
}

/// Keep only the final path component and drop characters unsafe on disk
#[must_use]
pub fn sanitize_file_name(name: &str) -> String {
    let base = name.rsplit(['/', '\\']).next().unwrap_or(name);
    let cleaned: String = base
        .chars()
        .filter(|c| !c.is_control() && !matches!(c, ':' | '*' | '?' | '"' | '<' | '>' | '|'))
        .collect();
    let cleaned = cleaned.trim_start_matches('.').trim();
    if cleaned.is_empty() {
        "file".to_string()
    } else {
        cleaned.to_string()
    }
}

/// Downloads uploaded documents into `upload_dir/<account>/`
#[derive(Clone)]
pub struct TelegramFileStore {
    bot: Bot,
    upload_dir: PathBuf,
}

impl TelegramFileStore {
    #[must_use]
    pub fn new(bot: Bot, upload_dir: impl AsRef<Path>) -> Self {
        Self {
            bot,
            upload_dir: upload_dir.as_ref().to_path_buf(),
        }
    }
}

#[async_trait]
impl FileStore for TelegramFileStore {
    async fn save(&self, owner: i64, document: &Document) -> Result<String, FileStoreError> {
        let file_id = FileId(document.file_id.clone());
        let buffer = retry_telegram_operation(|| async {
            let file = self.bot.get_file(file_id.clone()).await?;
            if file.size > MAX_FILE_SIZE {
                anyhow::bail!("File too large: {} bytes", file.size);
            }
            let mut buf = Vec::new();
            self.bot.download_file(&file.path, &mut buf).await?;
            Ok(buf)
        })
        .await
        .map_err(|e| FileStoreError(e.to_string()))?;

        let dir = self.upload_dir.join(owner.to_string());
        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(|e| FileStoreError(format!("create {}: {e}", dir.display())))?;
        let path = dir.join(format!(
            "{}_{}",
            uuid::Uuid::new_v4().simple(),
            sanitize_file_name(&document.file_name)
        ));
        tokio::fs::write(&path, &buffer)
            .await
            .map_err(|e| FileStoreError(format!("write {}: {e}", path.display())))?;

        info!(owner, bytes = buffer.len(), path = %path.display(), "Document downloaded");
        Ok(path.to_string_lossy().into_owned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_keyboard_mirrors_choice_rows() {
        assert!(keyboard(&[]).is_none());
        let markup = keyboard(&crate::views::feedback_choices());
        let rows = markup.map(|m| m.inline_keyboard).unwrap_or_default();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].len(), 2);
    }

    #[test]
    fn test_sanitize_file_name() {
        assert_eq!(sanitize_file_name("../../etc/passwd"), "passwd");
        assert_eq!(sanitize_file_name("C:\\Users\\a\\отчёт.pdf"), "отчёт.pdf");
        assert_eq!(sanitize_file_name("..."), "file");
        assert_eq!(sanitize_file_name("a?b.txt"), "ab.txt");
    }
}
