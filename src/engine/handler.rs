//! Handler trait and the values handlers return

use super::error::HandlerError;
use super::event::{Choice, InboundEvent, Reply};
use super::session::Session;
use super::AppContext;
use crate::capabilities::CapabilityRegistry;
use crate::storage::{ActivityOutcome, StorageProvider};
use async_trait::async_trait;
use std::sync::Arc;

/// What the dialog engine does after a handler returns
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Step {
    /// Keep the current state (or stay idle)
    #[default]
    Stay,
    /// Input rejected: keep the state and discard answers written by this call
    Retry,
    /// Move to another state of the active dialog
    Goto(&'static str),
    /// Leave the dialog
    End,
}

/// Result of a handler call
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    pub replies: Vec<Reply>,
    pub step: Step,
    /// Classified intent stored on the activity row
    pub intent: Option<String>,
    pub outcome: ActivityOutcome,
}

impl Default for Response {
    fn default() -> Self {
        Self {
            replies: Vec::new(),
            step: Step::Stay,
            intent: None,
            outcome: ActivityOutcome::Completed,
        }
    }
}

impl Response {
    /// Empty response
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Single text reply
    #[must_use]
    pub fn reply(text: impl Into<String>) -> Self {
        Self::new().text(text)
    }

    /// Denial issued by the access gate
    #[must_use]
    pub fn denied(text: impl Into<String>) -> Self {
        Self {
            outcome: ActivityOutcome::Denied,
            ..Self::reply(text)
        }
    }

    #[must_use]
    pub fn text(mut self, text: impl Into<String>) -> Self {
        self.replies.push(Reply::text(text));
        self
    }

    #[must_use]
    pub fn choices(mut self, text: impl Into<String>, choices: Vec<Vec<Choice>>) -> Self {
        self.replies.push(Reply::with_choices(text, choices));
        self
    }

    #[must_use]
    pub fn push(mut self, reply: Reply) -> Self {
        self.replies.push(reply);
        self
    }

    #[must_use]
    pub const fn goto(mut self, state: &'static str) -> Self {
        self.step = Step::Goto(state);
        self
    }

    #[must_use]
    pub const fn retry(mut self) -> Self {
        self.step = Step::Retry;
        self
    }

    #[must_use]
    pub const fn end(mut self) -> Self {
        self.step = Step::End;
        self
    }

    #[must_use]
    pub fn intent(mut self, label: impl Into<String>) -> Self {
        self.intent = Some(label.into());
        self
    }
}

pub type HandlerResult = Result<Response, HandlerError>;

/// Everything a handler may touch while processing one event
pub struct HandlerCtx<'a> {
    pub app: &'a Arc<AppContext>,
    pub event: &'a InboundEvent,
    pub session: &'a mut Session,
    account_id: Option<Option<i64>>,
}

impl<'a> HandlerCtx<'a> {
    #[must_use]
    pub fn new(app: &'a Arc<AppContext>, event: &'a InboundEvent, session: &'a mut Session) -> Self {
        Self {
            app,
            event,
            session,
            account_id: None,
        }
    }

    #[must_use]
    pub fn storage(&self) -> &dyn StorageProvider {
        self.app.storage.as_ref()
    }

    #[must_use]
    pub fn capabilities(&self) -> &CapabilityRegistry {
        &self.app.capabilities
    }

    /// Account linked to the sender's platform identity, resolved once per call
    ///
    /// # Errors
    ///
    /// Returns the storage error of the lookup.
    pub async fn account_id(&mut self) -> Result<Option<i64>, HandlerError> {
        if let Some(resolved) = self.account_id {
            return Ok(resolved);
        }
        let resolved = match self.event.user_id {
            Some(external) => {
                self.app
                    .identities
                    .resolve(self.app.storage.as_ref(), external)
                    .await?
            }
            None => None,
        };
        self.account_id = Some(resolved);
        Ok(resolved)
    }

    /// Drop the memoized account after the identity was (re)linked
    pub fn forget_account(&mut self) {
        self.account_id = None;
    }
}

/// A unit of work bound to a command, callback, dialog state or free text
#[async_trait]
pub trait Handler: Send + Sync {
    /// Name recorded on activity and error rows
    fn name(&self) -> &'static str;

    async fn handle(&self, ctx: &mut HandlerCtx<'_>) -> HandlerResult;
}

/// Declare a unit struct implementing [`Handler`]
#[macro_export]
macro_rules! handler {
    ($(#[$meta:meta])* $vis:vis $ty:ident, $name:literal, |$ctx:ident| { $($body:tt)* }) => {
        $(#[$meta])*
        $vis struct $ty;

        #[async_trait::async_trait]
        impl $crate::engine::Handler for $ty {
            fn name(&self) -> &'static str {
                $name
            }

            async fn handle(
                &self,
                $ctx: &mut $crate::engine::HandlerCtx<'_>,
            ) -> $crate::engine::HandlerResult {
                $($body)*
            }
        }
    };
}
