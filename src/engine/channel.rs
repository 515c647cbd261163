//! Outbound message channel and document store seams

use super::event::{Document, Reply};
use async_trait::async_trait;
use std::sync::Mutex;
use thiserror::Error;

/// Failure to deliver a reply
#[derive(Debug, Error)]
#[error("Outbound error: {0}")]
pub struct OutboundError(pub String);

/// Failure to persist an uploaded document
#[derive(Debug, Error)]
#[error("File store error: {0}")]
pub struct FileStoreError(pub String);

/// Sends replies to a chat
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Outbound: Send + Sync {
    async fn send(&self, chat_id: i64, reply: Reply) -> Result<(), OutboundError>;
}

/// Persists uploaded documents
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait FileStore: Send + Sync {
    /// Store the document and return the path it can be read back from
    async fn save(&self, owner: i64, document: &Document) -> Result<String, FileStoreError>;
}

/// Outbound that keeps every reply in memory
#[derive(Debug, Default)]
pub struct RecordingOutbound {
    sent: Mutex<Vec<(i64, Reply)>>,
}

impl RecordingOutbound {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Everything sent so far, in order
    #[must_use]
    pub fn sent(&self) -> Vec<(i64, Reply)> {
        self.sent.lock().map(|s| s.clone()).unwrap_or_default()
    }

    /// Texts of every reply sent so far
    #[must_use]
    pub fn texts(&self) -> Vec<String> {
        self.sent()
            .into_iter()
            .filter_map(|(_, reply)| reply.as_text().map(ToString::to_string))
            .collect()
    }

    /// Drain and return the texts sent so far
    #[must_use]
    pub fn take_texts(&self) -> Vec<String> {
        let drained = self
            .sent
            .lock()
            .map(|mut s| std::mem::take(&mut *s))
            .unwrap_or_default();
        drained
            .into_iter()
            .filter_map(|(_, reply)| reply.as_text().map(ToString::to_string))
            .collect()
    }
}

#[async_trait]
impl Outbound for RecordingOutbound {
    async fn send(&self, chat_id: i64, reply: Reply) -> Result<(), OutboundError> {
        self.sent
            .lock()
            .map_err(|_| OutboundError("recording lock poisoned".to_string()))?
            .push((chat_id, reply));
        Ok(())
    }
}

/// File store that only records names, for offline runs
#[derive(Debug, Default, Clone, Copy)]
pub struct MemoryFileStore;

#[async_trait]
impl FileStore for MemoryFileStore {
    async fn save(&self, owner: i64, document: &Document) -> Result<String, FileStoreError> {
        Ok(format!("memory://{owner}/{}", document.file_name))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_recording_outbound_keeps_order() -> Result<(), OutboundError> {
        let outbound = RecordingOutbound::new();
        outbound.send(1, Reply::text("first")).await?;
        outbound.send(1, Reply::document("/tmp/a.pdf", "a.pdf")).await?;
        outbound.send(2, Reply::text("second")).await?;

        assert_eq!(outbound.sent().len(), 3);
        assert_eq!(outbound.take_texts(), vec!["first", "second"]);
        assert!(outbound.texts().is_empty());
        Ok(())
    }
}
