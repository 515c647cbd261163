//! Shared fixtures for engine unit tests

use super::channel::{MemoryFileStore, RecordingOutbound};
use super::handler::{Handler, HandlerCtx, HandlerResult, Response};
use super::AppContext;
use crate::capabilities::CapabilityRegistry;
use crate::config::Settings;
use crate::storage::{SqliteStorage, StorageError};
use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// Context backed by a fresh in-memory database and a recording outbound
pub fn test_app() -> Result<(Arc<AppContext>, Arc<RecordingOutbound>), StorageError> {
    let outbound = Arc::new(RecordingOutbound::new());
    let (app, _timers) = AppContext::new(
        Settings::default(),
        Arc::new(SqliteStorage::open_in_memory()?),
        CapabilityRegistry::new(),
        Arc::new(MemoryFileStore),
        outbound.clone(),
    );
    Ok((app, outbound))
}

/// Handler that counts its calls and replies "stub"
pub struct Stub {
    name: &'static str,
    pub calls: Arc<AtomicUsize>,
}

impl Stub {
    pub fn named(name: &'static str) -> Self {
        Self {
            name,
            calls: Arc::default(),
        }
    }
}

impl Default for Stub {
    fn default() -> Self {
        Self::named("stub")
    }
}

#[async_trait]
impl Handler for Stub {
    fn name(&self) -> &'static str {
        self.name
    }

    async fn handle(&self, _ctx: &mut HandlerCtx<'_>) -> HandlerResult {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(Response::reply("stub"))
    }
}
