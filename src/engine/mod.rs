//! Conversation dispatch and session-state engine
//!
//! [`Engine::dispatch`] takes one inbound event through routing, the access
//! gate, instrumentation and the handler, applies the returned step to the
//! session and sends the replies. Events of the same session are serialized
//! by the session lock; different sessions run concurrently.

pub mod channel;
pub mod dialog;
pub mod error;
pub mod event;
pub mod gate;
pub mod handler;
pub mod identity_cache;
pub mod instrument;
pub mod router;
pub mod scheduler;
pub mod session;
#[cfg(test)]
pub mod testing;

pub use channel::{FileStore, Outbound};
pub use dialog::{Dialog, InputFilter};
pub use error::HandlerError;
pub use event::{Choice, Document, InboundEvent, Payload, Reply};
pub use gate::gated;
pub use handler::{Handler, HandlerCtx, HandlerResult, Response, Step};
pub use identity_cache::IdentityCache;
pub use instrument::{instrument, instrument_redacted};
pub use router::{Route, Router, RouterError};
pub use scheduler::{Scheduler, TimerCallbacks, TimerPayload, TimerPurpose, TimerReceiver};
pub use session::{Session, SessionKey, SessionStore};

use crate::capabilities::CapabilityRegistry;
use crate::config::Settings;
use crate::storage::StorageProvider;
use std::sync::Arc;
use tracing::{debug, warn};

/// Everything shared by handlers and timer callbacks, built once at startup
pub struct AppContext {
    pub settings: Settings,
    pub storage: Arc<dyn StorageProvider>,
    pub capabilities: CapabilityRegistry,
    pub files: Arc<dyn FileStore>,
    pub outbound: Arc<dyn Outbound>,
    pub scheduler: Scheduler,
    pub sessions: SessionStore,
    pub identities: IdentityCache,
}

impl AppContext {
    /// Build the context; the receiver feeds [`scheduler::spawn_timer_loop`]
    #[must_use]
    pub fn new(
        settings: Settings,
        storage: Arc<dyn StorageProvider>,
        capabilities: CapabilityRegistry,
        files: Arc<dyn FileStore>,
        outbound: Arc<dyn Outbound>,
    ) -> (Arc<Self>, TimerReceiver) {
        let (scheduler, timers) = Scheduler::new();
        let identities = IdentityCache::new(
            settings.identity_cache_ttl_secs,
            settings.identity_cache_max_size,
        );
        let app = Arc::new(Self {
            settings,
            storage,
            capabilities,
            files,
            outbound,
            scheduler,
            sessions: SessionStore::new(),
            identities,
        });
        (app, timers)
    }
}

/// Dispatches inbound events
#[derive(Clone)]
pub struct Engine {
    app: Arc<AppContext>,
    router: Arc<Router>,
}

impl Engine {
    #[must_use]
    pub fn new(app: Arc<AppContext>, router: Router) -> Self {
        Self {
            app,
            router: Arc::new(router),
        }
    }

    #[must_use]
    pub const fn app(&self) -> &Arc<AppContext> {
        &self.app
    }

    #[must_use]
    pub fn router(&self) -> &Router {
        &self.router
    }

    /// Process one event to completion, returns the handler that ran
    pub async fn dispatch(&self, event: InboundEvent) -> Option<&'static str> {
        let key = event.session_key();
        let ran = self.run(&event).await;
        self.app.sessions.release(&key).await;
        ran
    }

    async fn run(&self, event: &InboundEvent) -> Option<&'static str> {
        let chat_id = event.chat_id;
        let handle = self.app.sessions.get_or_create(event.session_key()).await;
        let mut session = handle.lock().await;

        let route = self.router.route(session.dialog(), event);
        let (handler, dialog) = match route {
            Route::Unmatched => {
                debug!(chat_id, "No route for event");
                return None;
            }
            Route::Handler(handler) => (handler, None),
            Route::Input(dialog, handler) => (handler, Some(dialog)),
            Route::Entry(dialog) => {
                session.clear_dialog();
                (dialog.entry(), Some(dialog))
            }
            Route::Escape(dialog) => {
                session.clear_dialog();
                (dialog.escape(), None)
            }
        };

        let name = handler.name();
        let snapshot = session.answers().clone();
        let result = handler
            .handle(&mut HandlerCtx::new(&self.app, event, &mut session))
            .await;

        let replies = match result {
            Ok(response) => {
                Self::apply_step(&mut session, dialog.as_deref(), response.step, snapshot);
                response.replies
            }
            Err(e) => {
                warn!(chat_id, handler = name, error = %e, "Handler failed, session reset");
                session.clear_dialog();
                vec![Reply::text(e.apology())]
            }
        };

        for reply in replies {
            if let Err(e) = self.app.outbound.send(chat_id, reply).await {
                warn!(chat_id, handler = name, error = %e, "Failed to send reply");
            }
        }
        Some(name)
    }

    fn apply_step(
        session: &mut Session,
        dialog: Option<&Dialog>,
        step: Step,
        snapshot: std::collections::HashMap<String, String>,
    ) {
        match (step, dialog) {
            (Step::Stay, _) => {}
            (Step::Retry, _) => session.restore_answers(snapshot),
            (Step::End, _) => session.clear_dialog(),
            (Step::Goto(state), Some(dialog)) if dialog.has_state(state) => {
                session.enter(dialog.name(), state);
            }
            (Step::Goto(state), dialog) => {
                warn!(
                    dialog = dialog.map(Dialog::name),
                    state, "Transition to undeclared state, session reset"
                );
                session.clear_dialog();
            }
        }
    }
}
