//! Client for the model-serving facade
//!
//! `POST {base}/predict` returns `{"intent": ...}`, the other tasks are served
//! under `POST {base}/predict/{task}`. Topic modeling also receives the
//! separate `documents` and answers with one distribution per document.

use super::{
    Capability, CapabilityError, CapabilityKind, CapabilityRequest, Entity, Inference, TopicScore,
};
use crate::config::Settings;
use async_trait::async_trait;
use reqwest::StatusCode;
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;
use tracing::debug;

/// Remote inference for a single task
pub struct HttpInference {
    kind: CapabilityKind,
    url: String,
    api_key: Option<String>,
    client: reqwest::Client,
}

#[derive(Debug, Default, Deserialize)]
struct PredictResponse {
    intent: Option<String>,
    label: Option<String>,
    question: Option<String>,
    entities: Option<Vec<Entity>>,
    topics: Option<Vec<Vec<TopicScore>>>,
}

impl HttpInference {
    #[must_use]
    pub fn new(kind: CapabilityKind, base_url: &str, settings: &Settings) -> Self {
        let timeout = Duration::from_secs(settings.inference_timeout_secs);
        let client = match reqwest::Client::builder().timeout(timeout).build() {
            Ok(client) => client,
            Err(_) => reqwest::Client::new(),
        };

        Self {
            kind,
            url: endpoint_url(base_url, kind),
            api_key: settings.inference_api_key.clone(),
            client,
        }
    }
}

fn endpoint_url(base_url: &str, kind: CapabilityKind) -> String {
    let base = base_url.trim_end_matches('/');
    match kind {
        CapabilityKind::Intent => format!("{base}/predict"),
        other => format!("{base}/predict/{}", other.as_str()),
    }
}

fn into_inference(kind: CapabilityKind, body: PredictResponse) -> Result<Inference, CapabilityError> {
    let missing = || CapabilityError::ComputeError(format!("{kind}: response has no result"));
    match kind {
        CapabilityKind::Intent => body
            .intent
            .or(body.label)
            .map(Inference::Label)
            .ok_or_else(missing),
        CapabilityKind::Sentiment => body.label.map(Inference::Label).ok_or_else(missing),
        CapabilityKind::Deadlines => Ok(Inference::Entities(body.entities.unwrap_or_default())),
        CapabilityKind::Questions => body.question.map(Inference::Text).ok_or_else(missing),
        CapabilityKind::Topics => body.topics.map(Inference::Topics).ok_or_else(missing),
        CapabilityKind::Summarize | CapabilityKind::Chat => Err(CapabilityError::InvalidInput(
            format!("{kind} is not served remotely"),
        )),
    }
}

fn status_error(status: StatusCode, body: &str) -> CapabilityError {
    let body: String = body.chars().take(300).collect();
    if status.is_client_error() {
        CapabilityError::InvalidInput(format!("{status}: {body}"))
    } else if status == StatusCode::SERVICE_UNAVAILABLE {
        CapabilityError::InferenceUnavailable(format!("{status}: {body}"))
    } else {
        CapabilityError::ComputeError(format!("{status}: {body}"))
    }
}

#[async_trait]
impl Capability for HttpInference {
    async fn invoke(&self, request: &CapabilityRequest) -> Result<Inference, CapabilityError> {
        if request.text.trim().is_empty() {
            return Err(CapabilityError::InvalidInput("empty text".to_string()));
        }
        debug!(task = %self.kind, url = %self.url, "Inference request");

        let payload = if request.documents.is_empty() {
            json!({ "text": request.text })
        } else {
            json!({ "text": request.text, "documents": request.documents })
        };
        let mut req = self.client.post(&self.url).json(&payload);
        if let Some(key) = &self.api_key {
            req = req.bearer_auth(key);
        }

        let response = req
            .send()
            .await
            .map_err(|e| CapabilityError::InferenceUnavailable(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(status_error(status, &text));
        }

        let body: PredictResponse = response
            .json()
            .await
            .map_err(|e| CapabilityError::ComputeError(e.to_string()))?;
        into_inference(self.kind, body)
    }
}
