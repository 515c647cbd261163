//! Transport-agnostic inbound events and outbound replies

use super::session::SessionKey;

/// Maximum length of the raw input stored on activity rows
const QUERY_TEXT_LIMIT: usize = 100;

/// A document attached to a message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Document {
    /// Transport-specific handle used to fetch the content
    pub file_id: String,
    pub file_name: String,
}

/// What the user sent
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Payload {
    /// `/name arg1 arg2`, name lowercased and stripped of `@botname`
    Command { name: String, args: Vec<String> },
    Text(String),
    /// Opaque data of a pressed choice button
    Callback(String),
    Document(Document),
}

/// A single inbound event from any transport
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundEvent {
    pub chat_id: i64,
    /// Platform user, if the transport exposes one
    pub user_id: Option<i64>,
    pub payload: Payload,
}

/// Parse `/name@bot arg1 arg2` into a lowercased name and its arguments
#[must_use]
pub fn parse_command(text: &str) -> Option<(String, Vec<String>)> {
    let rest = text.trim().strip_prefix('/')?;
    let mut parts = rest.split_whitespace();
    let head = parts.next()?;
    let name = head.split('@').next().unwrap_or(head).to_lowercase();
    if name.is_empty() {
        return None;
    }
    Some((name, parts.map(ToString::to_string).collect()))
}

impl InboundEvent {
    /// Build an event from raw message text, recognising commands
    #[must_use]
    pub fn from_text(chat_id: i64, user_id: Option<i64>, text: &str) -> Self {
        let payload = match parse_command(text) {
            Some((name, args)) => Payload::Command { name, args },
            None => Payload::Text(text.to_string()),
        };
        Self {
            chat_id,
            user_id,
            payload,
        }
    }

    #[must_use]
    pub fn callback(chat_id: i64, user_id: Option<i64>, data: impl Into<String>) -> Self {
        Self {
            chat_id,
            user_id,
            payload: Payload::Callback(data.into()),
        }
    }

    #[must_use]
    pub fn document(chat_id: i64, user_id: Option<i64>, document: Document) -> Self {
        Self {
            chat_id,
            user_id,
            payload: Payload::Document(document),
        }
    }

    #[must_use]
    pub const fn session_key(&self) -> SessionKey {
        SessionKey {
            chat_id: self.chat_id,
            user_id: self.user_id,
        }
    }

    /// Command name, if this is a command
    #[must_use]
    pub fn command(&self) -> Option<&str> {
        match &self.payload {
            Payload::Command { name, .. } => Some(name),
            _ => None,
        }
    }

    /// Command arguments, empty for other payloads
    #[must_use]
    pub fn args(&self) -> &[String] {
        match &self.payload {
            Payload::Command { args, .. } => args,
            _ => &[],
        }
    }

    /// Plain text, trimmed
    #[must_use]
    pub fn text(&self) -> Option<&str> {
        match &self.payload {
            Payload::Text(text) => Some(text.trim()),
            _ => None,
        }
    }

    #[must_use]
    pub fn callback_data(&self) -> Option<&str> {
        match &self.payload {
            Payload::Callback(data) => Some(data),
            _ => None,
        }
    }

    #[must_use]
    pub const fn attached_document(&self) -> Option<&Document> {
        match &self.payload {
            Payload::Document(document) => Some(document),
            _ => None,
        }
    }

    /// Raw input as stored on activity rows
    #[must_use]
    pub fn query_text(&self) -> String {
        let raw = match &self.payload {
            Payload::Command { name, args } if args.is_empty() => format!("/{name}"),
            Payload::Command { name, args } => format!("/{name} {}", args.join(" ")),
            Payload::Text(text) => text.clone(),
            Payload::Callback(data) => data.clone(),
            Payload::Document(document) => document.file_name.clone(),
        };
        raw.chars().take(QUERY_TEXT_LIMIT).collect()
    }
}

/// A button offered with a reply
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Choice {
    pub label: String,
    /// Returned as a callback event when pressed
    pub payload: String,
}

impl Choice {
    #[must_use]
    pub fn new(label: impl Into<String>, payload: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            payload: payload.into(),
        }
    }
}

/// Something to send back to the chat
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    /// HTML-formatted text with rows of choices
    Text {
        text: String,
        choices: Vec<Vec<Choice>>,
    },
    /// A stored file
    Document { path: String, file_name: String },
}

impl Reply {
    #[must_use]
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text {
            text: text.into(),
            choices: Vec::new(),
        }
    }

    #[must_use]
    pub fn with_choices(text: impl Into<String>, choices: Vec<Vec<Choice>>) -> Self {
        Self::Text {
            text: text.into(),
            choices,
        }
    }

    #[must_use]
    pub fn document(path: impl Into<String>, file_name: impl Into<String>) -> Self {
        Self::Document {
            path: path.into(),
            file_name: file_name.into(),
        }
    }

    /// Text of a text reply
    #[must_use]
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text { text, .. } => Some(text),
            Self::Document { .. } => None,
        }
    }
}
