//! Analytic capabilities consumed by handlers
//!
//! Each capability accepts text and returns a label, a text, a list of
//! entities or per-document topics. Handlers only see the [`Capability`] trait and the registry.

mod chat;
mod remote;
pub mod summarize;

pub use chat::ChatCompletion;
pub use remote::HttpInference;
pub use summarize::TextRankSummarizer;

use crate::config::Settings;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;
use tracing::{info, warn};

/// Errors returned by capabilities
#[derive(Debug, Error)]
pub enum CapabilityError {
    /// Backing model or service is not loaded or unreachable
    #[error("Inference unavailable: {0}")]
    InferenceUnavailable(String),
    /// Input rejected by the capability
    #[error("Invalid input: {0}")]
    InvalidInput(String),
    /// Capability failed while computing the result
    #[error("Compute error: {0}")]
    ComputeError(String),
}

/// Known capabilities
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CapabilityKind {
    Intent,
    Sentiment,
    Summarize,
    Deadlines,
    Questions,
    Topics,
    Chat,
}

impl CapabilityKind {
    /// Remote task name
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Intent => "intent",
            Self::Sentiment => "sentiment",
            Self::Summarize => "summarize",
            Self::Deadlines => "deadlines",
            Self::Questions => "questions",
            Self::Topics => "topics",
            Self::Chat => "chat",
        }
    }
}

impl fmt::Display for CapabilityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Input of a capability call
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CapabilityRequest {
    pub text: String,
    /// Upper bound on output sentences, used by summarization
    pub max_sentences: Option<usize>,
    /// Separate documents, used by topic modeling
    pub documents: Vec<String>,
}

impl CapabilityRequest {
    #[must_use]
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            max_sentences: None,
            documents: Vec::new(),
        }
    }

    /// Several documents analysed independently; `text` holds them joined
    #[must_use]
    pub fn documents(documents: Vec<String>) -> Self {
        Self {
            text: documents.join("; "),
            max_sentences: None,
            documents,
        }
    }

    #[must_use]
    pub const fn with_max_sentences(mut self, n: usize) -> Self {
        self.max_sentences = Some(n);
        self
    }
}

/// A named span found in text (dates, times)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Entity {
    pub text: String,
    pub label: String,
}

/// Weight of one topic in a document, with the topic's top terms
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TopicScore {
    pub topic: u32,
    pub probability: f64,
    #[serde(default)]
    pub terms: Vec<String>,
}

/// Output of a capability call
#[derive(Debug, Clone, PartialEq)]
pub enum Inference {
    Label(String),
    Text(String),
    Entities(Vec<Entity>),
    /// Topic distribution per input document, in input order
    Topics(Vec<Vec<TopicScore>>),
}

/// An analytic capability
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Capability: Send + Sync {
    /// Run the capability on the given input
    async fn invoke(&self, request: &CapabilityRequest) -> Result<Inference, CapabilityError>;
}

/// Capabilities available to handlers, keyed by kind
#[derive(Clone, Default)]
pub struct CapabilityRegistry {
    entries: HashMap<CapabilityKind, Arc<dyn Capability>>,
}

impl CapabilityRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Build the registry from settings.
    ///
    /// Summarization is always local. Remote tasks are registered only when
    /// `inference_url` is set, open chat only when `chat_api_key` is set.
    #[must_use]
    pub fn from_settings(settings: &Settings) -> Self {
        let mut registry = Self::new().with(CapabilityKind::Summarize, TextRankSummarizer::new());

        if let Some(url) = settings.inference_url.as_deref() {
            for kind in [
                CapabilityKind::Intent,
                CapabilityKind::Sentiment,
                CapabilityKind::Deadlines,
                CapabilityKind::Questions,
                CapabilityKind::Topics,
            ] {
                registry.register(kind, HttpInference::new(kind, url, settings));
            }
            info!(url, "Remote inference capabilities registered");
        } else {
            warn!("INFERENCE_URL is not set, intent and sentiment analysis are disabled");
        }

        if let Some(key) = settings.chat_api_key.as_deref() {
            registry.register(CapabilityKind::Chat, ChatCompletion::new(key, settings));
            info!(model = %settings.chat_model, "Open chat capability registered");
        }

        registry
    }

    /// Register a capability, replacing any previous one of the same kind
    pub fn register(&mut self, kind: CapabilityKind, capability: impl Capability + 'static) {
        self.entries.insert(kind, Arc::new(capability));
    }

    #[must_use]
    pub fn with(mut self, kind: CapabilityKind, capability: impl Capability + 'static) -> Self {
        self.register(kind, capability);
        self
    }

    #[must_use]
    pub fn is_available(&self, kind: CapabilityKind) -> bool {
        self.entries.contains_key(&kind)
    }

    /// Invoke a capability
    ///
    /// # Errors
    ///
    /// Returns `InferenceUnavailable` if nothing is registered for `kind`,
    /// otherwise whatever the capability returns.
    pub async fn invoke(
        &self,
        kind: CapabilityKind,
        request: &CapabilityRequest,
    ) -> Result<Inference, CapabilityError> {
        let capability = self
            .entries
            .get(&kind)
            .ok_or_else(|| CapabilityError::InferenceUnavailable(format!("{kind} is not loaded")))?;
        capability.invoke(request).await
    }

    /// Invoke a capability that returns a label
    ///
    /// # Errors
    ///
    /// See [`Self::invoke`]; a non-label result is a `ComputeError`.
    pub async fn label(&self, kind: CapabilityKind, text: &str) -> Result<String, CapabilityError> {
        match self.invoke(kind, &CapabilityRequest::text(text)).await? {
            Inference::Label(label) => Ok(label),
            other => Err(unexpected(kind, &other)),
        }
    }

    /// Invoke a capability that returns text
    ///
    /// # Errors
    ///
    /// See [`Self::invoke`]; a non-text result is a `ComputeError`.
    pub async fn text(
        &self,
        kind: CapabilityKind,
        request: &CapabilityRequest,
    ) -> Result<String, CapabilityError> {
        match self.invoke(kind, request).await? {
            Inference::Text(text) => Ok(text),
            other => Err(unexpected(kind, &other)),
        }
    }

    /// Invoke a capability that returns entities
    ///
    /// # Errors
    ///
    /// See [`Self::invoke`]; a non-entity result is a `ComputeError`.
    pub async fn entities(
        &self,
        kind: CapabilityKind,
        text: &str,
    ) -> Result<Vec<Entity>, CapabilityError> {
        match self.invoke(kind, &CapabilityRequest::text(text)).await? {
            Inference::Entities(entities) => Ok(entities),
            other => Err(unexpected(kind, &other)),
        }
    }

    /// Topic distribution of each document
    ///
    /// # Errors
    ///
    /// See [`Self::invoke`]; a result that is not one distribution per
    /// document is a `ComputeError`.
    pub async fn topics(
        &self,
        documents: Vec<String>,
    ) -> Result<Vec<Vec<TopicScore>>, CapabilityError> {
        let expected = documents.len();
        let kind = CapabilityKind::Topics;
        match self.invoke(kind, &CapabilityRequest::documents(documents)).await? {
            Inference::Topics(topics) if topics.len() == expected => Ok(topics),
            other => Err(unexpected(kind, &other)),
        }
    }
}

fn unexpected(kind: CapabilityKind, got: &Inference) -> CapabilityError {
    CapabilityError::ComputeError(format!("{kind} returned unexpected output: {got:?}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_missing_capability_is_unavailable() {
        let registry = CapabilityRegistry::new();
        let result = registry.label(CapabilityKind::Intent, "hello").await;
        assert!(matches!(result, Err(CapabilityError::InferenceUnavailable(_))));
    }

    #[tokio::test]
    async fn test_label_dispatches_to_registered_capability() {
        let mut mock = MockCapability::new();
        mock.expect_invoke()
            .withf(|req| req.text == "хочу записаться на курс")
            .times(1)
            .returning(|_| Ok(Inference::Label("apply_course".to_string())));

        let registry = CapabilityRegistry::new().with(CapabilityKind::Intent, mock);
        let label = registry
            .label(CapabilityKind::Intent, "хочу записаться на курс")
            .await;
        assert_eq!(label.ok().as_deref(), Some("apply_course"));
    }

    #[tokio::test]
    async fn test_wrong_output_shape_is_compute_error() {
        let mut mock = MockCapability::new();
        mock.expect_invoke()
            .returning(|_| Ok(Inference::Text("not a label".to_string())));

        let registry = CapabilityRegistry::new().with(CapabilityKind::Sentiment, mock);
        let result = registry.label(CapabilityKind::Sentiment, "ok").await;
        assert!(matches!(result, Err(CapabilityError::ComputeError(_))));
    }

    #[tokio::test]
    async fn test_topics_sends_documents_separately() {
        let mut mock = MockCapability::new();
        mock.expect_invoke()
            .withf(|req| req.documents == ["экзамен", "стипендия"] && req.text == "экзамен; стипендия")
            .times(1)
            .returning(|req| {
                let per_document = req
                    .documents
                    .iter()
                    .map(|_| {
                        vec![TopicScore {
                            topic: 0,
                            probability: 1.0,
                            terms: vec!["учёба".to_string()],
                        }]
                    })
                    .collect();
                Ok(Inference::Topics(per_document))
            });

        let registry = CapabilityRegistry::new().with(CapabilityKind::Topics, mock);
        let topics = registry
            .topics(vec!["экзамен".to_string(), "стипендия".to_string()])
            .await;
        assert_eq!(topics.map(|t| t.len()).ok(), Some(2));
    }

    #[tokio::test]
    async fn test_topics_count_mismatch_is_compute_error() {
        let mut mock = MockCapability::new();
        mock.expect_invoke()
            .returning(|_| Ok(Inference::Topics(Vec::new())));

        let registry = CapabilityRegistry::new().with(CapabilityKind::Topics, mock);
        let result = registry.topics(vec!["экзамен".to_string()]).await;
        assert!(matches!(result, Err(CapabilityError::ComputeError(_))));
    }

    #[test]
    fn test_from_settings_with_remote() {
        let settings = Settings {
            inference_url: Some("http://models:8000".to_string()),
            ..Settings::default()
        };
        let registry = CapabilityRegistry::from_settings(&settings);
        assert!(registry.is_available(CapabilityKind::Topics));
        assert!(registry.is_available(CapabilityKind::Intent));
    }

    #[test]
    fn test_from_settings_without_remote() {
        let registry = CapabilityRegistry::from_settings(&Settings::default());
        assert!(registry.is_available(CapabilityKind::Summarize));
        assert!(!registry.is_available(CapabilityKind::Intent));
        assert!(!registry.is_available(CapabilityKind::Topics));
        assert!(!registry.is_available(CapabilityKind::Chat));
    }
}
