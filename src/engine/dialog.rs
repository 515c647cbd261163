//! Declarative multi-step dialogs
//!
//! A dialog has an entry command, named states with one or more input
//! handlers each, and an escape handler that can preempt any state. The
//! escape is `/cancel` or the plain text "Отмена" / "cancel".

use super::event::{InboundEvent, Payload};
use super::handler::Handler;
use lazy_regex::lazy_regex;
use regex::Regex;
use std::sync::Arc;

/// Command that leaves any dialog
pub const ESCAPE_COMMAND: &str = "cancel";

static ESCAPE_TEXT: lazy_regex::Lazy<Regex> = lazy_regex!(r"(?i)^\s*(отмена|cancel)\s*$");

/// Which inputs a state handler accepts
#[derive(Debug, Clone)]
pub enum InputFilter {
    /// Plain text that is not a command
    Text,
    /// An attached document
    Document,
    /// A pressed choice whose payload matches
    Callback(Regex),
}

impl InputFilter {
    #[must_use]
    pub fn matches(&self, event: &InboundEvent) -> bool {
        match (self, &event.payload) {
            (Self::Text, Payload::Text(_)) | (Self::Document, Payload::Document(_)) => true,
            (Self::Callback(pattern), Payload::Callback(data)) => pattern.is_match(data),
            _ => false,
        }
    }
}

struct DialogState {
    name: &'static str,
    inputs: Vec<(InputFilter, Arc<dyn Handler>)>,
}

/// A declared dialog
pub struct Dialog {
    name: &'static str,
    entry_command: &'static str,
    entry: Arc<dyn Handler>,
    escape: Arc<dyn Handler>,
    states: Vec<DialogState>,
    allow_reentry: bool,
}

impl Dialog {
    /// Declare a dialog started by `/entry_command`
    #[must_use]
    pub fn new(
        name: &'static str,
        entry_command: &'static str,
        entry: Arc<dyn Handler>,
        escape: Arc<dyn Handler>,
    ) -> Self {
        Self {
            name,
            entry_command,
            entry,
            escape,
            states: Vec::new(),
            allow_reentry: false,
        }
    }

    /// Add an input handler to a state, declaring the state on first use
    #[must_use]
    pub fn state(mut self, name: &'static str, filter: InputFilter, handler: Arc<dyn Handler>) -> Self {
        if let Some(state) = self.states.iter_mut().find(|s| s.name == name) {
            state.inputs.push((filter, handler));
        } else {
            self.states.push(DialogState {
                name,
                inputs: vec![(filter, handler)],
            });
        }
        self
    }

    /// Let the entry command restart the dialog while it is active
    #[must_use]
    pub const fn allow_reentry(mut self) -> Self {
        self.allow_reentry = true;
        self
    }

    #[must_use]
    pub const fn name(&self) -> &'static str {
        self.name
    }

    #[must_use]
    pub const fn entry_command(&self) -> &'static str {
        self.entry_command
    }

    #[must_use]
    pub fn entry(&self) -> Arc<dyn Handler> {
        self.entry.clone()
    }

    #[must_use]
    pub fn escape(&self) -> Arc<dyn Handler> {
        self.escape.clone()
    }

    #[must_use]
    pub const fn reentry_allowed(&self) -> bool {
        self.allow_reentry
    }

    #[must_use]
    pub fn has_state(&self, name: &str) -> bool {
        self.states.iter().any(|s| s.name == name)
    }

    /// Names of declared states
    pub fn state_names(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.states.iter().map(|s| s.name)
    }

    /// `/cancel`, or "Отмена" / "cancel" typed as text
    #[must_use]
    pub fn is_escape(event: &InboundEvent) -> bool {
        match &event.payload {
            Payload::Command { name, .. } => name == ESCAPE_COMMAND,
            Payload::Text(text) => ESCAPE_TEXT.is_match(text),
            _ => false,
        }
    }

    /// First input handler of `state` that accepts the event
    #[must_use]
    pub fn input_for(&self, state: &str, event: &InboundEvent) -> Option<Arc<dyn Handler>> {
        self.states
            .iter()
            .find(|s| s.name == state)?
            .inputs
            .iter()
            .find(|(filter, _)| filter.matches(event))
            .map(|(_, handler)| handler.clone())
    }
}
