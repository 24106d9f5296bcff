pub mod openai;
pub mod gemini;

use async_trait::async_trait;
use log::{ info, warn };
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::error::Error as StdError;
use std::sync::Arc;
use super::{ LlmConfig, LlmProvider, UpstreamError };
use self::openai::OpenAIChatClient;
use self::gemini::GeminiChatClient;
use crate::cli::Args;
use crate::credential::Credential;
use crate::models::chat::ChatMessage;

/// One (role, content) pair of the request history.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ChatTurn {
    pub role: String,
    pub content: String,
}

impl From<&ChatMessage> for ChatTurn {
    fn from(message: &ChatMessage) -> Self {
        Self {
            role: message.role.as_str().to_string(),
            content: message.content.clone(),
        }
    }
}

#[async_trait]
pub trait ChatProvider: Send + Sync {
    /// Sends the system prompt, `history` and `prompt` (as the newest user turn)
    /// and returns the first completion's text.
    async fn complete(
        &self,
        history: &[ChatTurn],
        prompt: &str,
        credential: &Credential
    ) -> Result<String, UpstreamError>;

    fn provider(&self) -> LlmProvider;

    fn model(&self) -> &str;
}

pub fn new_client(
    config: &LlmConfig
) -> Result<Arc<dyn ChatProvider>, Box<dyn StdError + Send + Sync>> {
    let client: Arc<dyn ChatProvider> = match config.provider {
        LlmProvider::OpenAI => {
            let specific_client = OpenAIChatClient::from_config(config)?;
            Arc::new(specific_client)
        }
        LlmProvider::Gemini => {
            let specific_client = GeminiChatClient::from_config(config)?;
            Arc::new(specific_client)
        }
    };
    Ok(client)
}

/// One client per provider; the credential's tag picks which one answers.
#[derive(Clone)]
pub struct ProviderSet {
    openai: Arc<dyn ChatProvider>,
    gemini: Arc<dyn ChatProvider>,
}

impl ProviderSet {
    pub fn new(openai: Arc<dyn ChatProvider>, gemini: Arc<dyn ChatProvider>) -> Self {
        Self { openai, gemini }
    }

    pub fn from_args(args: &Args) -> Result<Self, Box<dyn StdError + Send + Sync>> {
        let openai_config = LlmConfig {
            provider: LlmProvider::OpenAI,
            model: args.openai_model.clone(),
            base_url: args.openai_base_url.clone(),
        };
        let gemini_config = LlmConfig {
            provider: LlmProvider::Gemini,
            model: args.gemini_model.clone(),
            base_url: args.gemini_base_url.clone(),
        };
        let openai = new_client(&openai_config)?;
        let gemini = new_client(&gemini_config)?;
        info!("Chat providers configured: openai model={}, gemini model={}", openai.model(), gemini.model());
        Ok(Self::new(openai, gemini))
    }

    pub fn select(&self, provider: LlmProvider) -> Arc<dyn ChatProvider> {
        match provider {
            LlmProvider::OpenAI => self.openai.clone(),
            LlmProvider::Gemini => self.gemini.clone(),
        }
    }
}

/// Sends a prepared request and decodes the body, mapping failures onto the
/// upstream error kinds.
pub(crate) async fn send_for_json<T: DeserializeOwned>(
    request: reqwest::RequestBuilder,
    provider: LlmProvider
) -> Result<T, UpstreamError> {
    let response = request.send().await.map_err(|e| {
        warn!("{} request failed: {}", provider, e);
        UpstreamError::Transport(e.to_string())
    })?;

    let status = response.status();
    if !status.is_success() {
        warn!("{} answered with status {}", provider, status);
        return Err(UpstreamError::Status(status.as_u16()));
    }

    response.json::<T>().await.map_err(|e| {
        warn!("{} reply could not be decoded: {}", provider, e);
        UpstreamError::Malformed
    })
}
