//! Open chat through an OpenAI-compatible API

use super::{Capability, CapabilityError, CapabilityRequest, Inference};
use crate::config::Settings;
use async_openai::types::chat::{
    ChatCompletionRequestMessage, ChatCompletionRequestSystemMessageArgs,
    ChatCompletionRequestUserMessageArgs, CreateChatCompletionRequestArgs,
};
use async_openai::{config::OpenAIConfig, Client};
use async_trait::async_trait;

const DEFAULT_SYSTEM_MESSAGE: &str =
    "Ты — интеллектуальный ассистент учебного центра. Отвечай кратко и по делу.";
const CHAT_MAX_TOKENS: u32 = 512;
const CHAT_TEMPERATURE: f32 = 0.7;

/// Chat completion capability
pub struct ChatCompletion {
    client: Client<OpenAIConfig>,
    model: String,
    system_message: String,
}

impl ChatCompletion {
    #[must_use]
    pub fn new(api_key: &str, settings: &Settings) -> Self {
        let mut config = OpenAIConfig::new().with_api_key(api_key);
        if let Some(base) = settings.chat_api_base.as_deref() {
            config = config.with_api_base(base);
        }
        Self {
            client: Client::with_config(config),
            model: settings.chat_model.clone(),
            system_message: settings
                .system_message
                .clone()
                .unwrap_or_else(|| DEFAULT_SYSTEM_MESSAGE.to_string()),
        }
    }

    fn messages(&self, user_message: &str) -> Result<Vec<ChatCompletionRequestMessage>, CapabilityError> {
        Ok(vec![
            ChatCompletionRequestSystemMessageArgs::default()
                .content(self.system_message.as_str())
                .build()
                .map_err(|e| CapabilityError::ComputeError(e.to_string()))?
                .into(),
            ChatCompletionRequestUserMessageArgs::default()
                .content(user_message)
                .build()
                .map_err(|e| CapabilityError::ComputeError(e.to_string()))?
                .into(),
        ])
    }
}

#[async_trait]
impl Capability for ChatCompletion {
    async fn invoke(&self, request: &CapabilityRequest) -> Result<Inference, CapabilityError> {
        if request.text.trim().is_empty() {
            return Err(CapabilityError::InvalidInput("empty message".to_string()));
        }

        let request = CreateChatCompletionRequestArgs::default()
            .model(self.model.as_str())
            .messages(self.messages(&request.text)?)
            .max_tokens(CHAT_MAX_TOKENS)
            .temperature(CHAT_TEMPERATURE)
            .build()
            .map_err(|e| CapabilityError::ComputeError(e.to_string()))?;

        let response = self
            .client
            .chat()
            .create(request)
            .await
            .map_err(|e| CapabilityError::InferenceUnavailable(e.to_string()))?;

        response
            .choices
            .first()
            .and_then(|c| c.message.content.clone())
            .map(Inference::Text)
            .ok_or_else(|| CapabilityError::ComputeError("Empty response".to_string()))
    }
}
