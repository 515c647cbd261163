//! Resolves an inbound event to the handler that should process it
//!
//! Order, first match wins:
//! 1. active dialog: escape, own entry command (if re-entry is allowed),
//!    then the input handlers of the current state; anything else is ignored
//! 2. dialog entry commands
//! 3. command table
//! 4. callback patterns, in registration order
//! 5. free-text handler

use super::dialog::Dialog;
use super::event::{InboundEvent, Payload};
use super::handler::Handler;
use super::session::ActiveDialog;
use regex::Regex;
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;
use tracing::warn;

/// Invalid router declaration
#[derive(Debug, Error)]
pub enum RouterError {
    #[error("Command /{0} is registered twice")]
    DuplicateCommand(String),
    #[error("Dialog '{0}' is declared twice")]
    DuplicateDialog(String),
    #[error("Invalid callback pattern: {0}")]
    InvalidPattern(#[from] regex::Error),
}

/// Where an event goes
#[derive(Clone)]
pub enum Route {
    /// Start, or restart, a dialog
    Entry(Arc<Dialog>),
    /// Leave the active dialog
    Escape(Arc<Dialog>),
    /// Input for the current state of the active dialog
    Input(Arc<Dialog>, Arc<dyn Handler>),
    /// A handler outside any dialog
    Handler(Arc<dyn Handler>),
    /// Nothing handles this event
    Unmatched,
}

impl Route {
    /// Name of the handler the route runs
    #[must_use]
    pub fn handler_name(&self) -> Option<&'static str> {
        match self {
            Self::Entry(dialog) => Some(dialog.entry().name()),
            Self::Escape(dialog) => Some(dialog.escape().name()),
            Self::Input(_, handler) | Self::Handler(handler) => Some(handler.name()),
            Self::Unmatched => None,
        }
    }
}

/// Immutable routing table
pub struct Router {
    dialogs: HashMap<&'static str, Arc<Dialog>>,
    entries: HashMap<&'static str, Arc<Dialog>>,
    commands: HashMap<&'static str, Arc<dyn Handler>>,
    callbacks: Vec<(Regex, Arc<dyn Handler>)>,
    free_text: Option<Arc<dyn Handler>>,
}

impl Router {
    #[must_use]
    pub fn builder() -> RouterBuilder {
        RouterBuilder::default()
    }

    /// Resolve the event for a session currently in `active`
    #[must_use]
    pub fn route(&self, active: Option<ActiveDialog>, event: &InboundEvent) -> Route {
        if let Some(active) = active {
            match self.dialogs.get(active.dialog) {
                Some(dialog) => return Self::route_in_dialog(dialog, active.state, event),
                None => warn!(dialog = active.dialog, "Session is in an unknown dialog"),
            }
        }

        match &event.payload {
            Payload::Command { name, .. } => {
                if let Some(dialog) = self.entries.get(name.as_str()) {
                    return Route::Entry(dialog.clone());
                }
                self.commands
                    .get(name.as_str())
                    .map_or(Route::Unmatched, |h| Route::Handler(h.clone()))
            }
            Payload::Callback(data) => self
                .callbacks
                .iter()
                .find(|(pattern, _)| pattern.is_match(data))
                .map_or(Route::Unmatched, |(_, h)| Route::Handler(h.clone())),
            Payload::Text(_) => self
                .free_text
                .clone()
                .map_or(Route::Unmatched, Route::Handler),
            Payload::Document(_) => Route::Unmatched,
        }
    }

    fn route_in_dialog(dialog: &Arc<Dialog>, state: &str, event: &InboundEvent) -> Route {
        if Dialog::is_escape(event) {
            return Route::Escape(dialog.clone());
        }
        if dialog.reentry_allowed() && event.command() == Some(dialog.entry_command()) {
            return Route::Entry(dialog.clone());
        }
        dialog
            .input_for(state, event)
            .map_or(Route::Unmatched, |h| Route::Input(dialog.clone(), h))
    }

    /// Dialog declared under `name`
    #[must_use]
    pub fn dialog(&self, name: &str) -> Option<Arc<Dialog>> {
        self.dialogs.get(name).cloned()
    }

    /// Every command that starts something, for the command menu
    #[must_use]
    pub fn command_names(&self) -> Vec<&'static str> {
        let mut names: Vec<_> = self
            .entries
            .keys()
            .chain(self.commands.keys())
            .copied()
            .collect();
        names.sort_unstable();
        names
    }
}

/// Collects routes and validates them in [`RouterBuilder::build`]
#[derive(Default)]
pub struct RouterBuilder {
    dialogs: Vec<Dialog>,
    commands: Vec<(&'static str, Arc<dyn Handler>)>,
    callbacks: Vec<(&'static str, Arc<dyn Handler>)>,
    free_text: Option<Arc<dyn Handler>>,
}

impl RouterBuilder {
    #[must_use]
    pub fn dialog(mut self, dialog: Dialog) -> Self {
        self.dialogs.push(dialog);
        self
    }

    #[must_use]
    pub fn command(mut self, name: &'static str, handler: Arc<dyn Handler>) -> Self {
        self.commands.push((name, handler));
        self
    }

    #[must_use]
    pub fn callback(mut self, pattern: &'static str, handler: Arc<dyn Handler>) -> Self {
        self.callbacks.push((pattern, handler));
        self
    }

    #[must_use]
    pub fn free_text(mut self, handler: Arc<dyn Handler>) -> Self {
        self.free_text = Some(handler);
        self
    }

    /// Validate and freeze the table
    ///
    /// # Errors
    ///
    /// Returns an error on a command or dialog declared twice, or on an
    /// invalid callback pattern.
    pub fn build(self) -> Result<Router, RouterError> {
        let mut dialogs = HashMap::new();
        let mut entries = HashMap::new();
        for dialog in self.dialogs {
            let dialog = Arc::new(dialog);
            if dialogs.insert(dialog.name(), dialog.clone()).is_some() {
                return Err(RouterError::DuplicateDialog(dialog.name().to_string()));
            }
            if entries.insert(dialog.entry_command(), dialog.clone()).is_some() {
                return Err(RouterError::DuplicateCommand(dialog.entry_command().to_string()));
            }
        }

        let mut commands = HashMap::new();
        for (name, handler) in self.commands {
            if entries.contains_key(name) || commands.insert(name, handler).is_some() {
                return Err(RouterError::DuplicateCommand(name.to_string()));
            }
        }

        let callbacks = self
            .callbacks
            .into_iter()
            .map(|(pattern, handler)| Ok((Regex::new(pattern)?, handler)))
            .collect::<Result<Vec<_>, RouterError>>()?;

        Ok(Router {
            dialogs,
            entries,
            commands,
            callbacks,
            free_text: self.free_text,
        })
    }
}
