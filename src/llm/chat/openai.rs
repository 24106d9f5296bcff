use async_trait::async_trait;
use log::info;
use reqwest::Client as HttpClient;
use serde::{ Deserialize, Serialize };

use super::{ send_for_json, ChatProvider, ChatTurn };
use crate::credential::Credential;
use crate::llm::{ LlmConfig, LlmProvider, UpstreamError, MAX_OUTPUT_TOKENS, SYSTEM_PROMPT, TEMPERATURE };

const DEFAULT_MODEL: &str = "gpt-4o";
const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";

pub struct OpenAIChatClient {
    http: HttpClient,
    model: String,
    base_url: String,
}

#[derive(Serialize, Debug, PartialEq)]
struct OpenAIMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Serialize, Debug)]
struct OpenAIChatRequest<'a> {
    model: &'a str,
    messages: Vec<OpenAIMessage<'a>>,
    temperature: f32,
    max_tokens: u32,
}

#[derive(Deserialize)]
struct OpenAIResponse {
    #[serde(default)]
    choices: Vec<OpenAIChoice>,
}

#[derive(Deserialize)]
struct OpenAIChoice {
    message: Option<OpenAIReply>,
}

#[derive(Deserialize)]
struct OpenAIReply {
    content: Option<String>,
}

impl OpenAIChatClient {
    pub fn new(model: Option<String>, base_url: Option<String>) -> Result<Self, reqwest::Error> {
        Ok(Self {
            http: HttpClient::builder().build()?,
            model: model.unwrap_or_else(|| DEFAULT_MODEL.to_string()),
            base_url: base_url.unwrap_or_else(|| DEFAULT_BASE_URL.to_string()),
        })
    }

    pub fn from_config(config: &LlmConfig) -> Result<Self, reqwest::Error> {
        Self::new(config.model.clone(), config.base_url.clone())
    }

    fn build_request<'a>(&'a self, history: &'a [ChatTurn], prompt: &'a str) -> OpenAIChatRequest<'a> {
        let mut messages = Vec::with_capacity(history.len() + 2);
        messages.push(OpenAIMessage { role: "system", content: SYSTEM_PROMPT });
        messages.extend(
            history.iter().map(|turn| OpenAIMessage { role: &turn.role, content: &turn.content })
        );
        messages.push(OpenAIMessage { role: "user", content: prompt });

        OpenAIChatRequest {
            model: &self.model,
            messages,
            temperature: TEMPERATURE,
            max_tokens: MAX_OUTPUT_TOKENS,
        }
    }
}

#[async_trait]
impl ChatProvider for OpenAIChatClient {
    async fn complete(
        &self,
        history: &[ChatTurn],
        prompt: &str,
        credential: &Credential
    ) -> Result<String, UpstreamError> {
        let url = format!("{}/chat/completions", self.base_url.trim_end_matches('/'));
        info!(
            "OpenAIChatClient::complete() → model={} history={} url={}",
            self.model,
            history.len(),
            url
        );

        let req = self.build_request(history, prompt);
        let request = self.http.post(&url).bearer_auth(&credential.api_key).json(&req);
        let resp: OpenAIResponse = send_for_json(request, LlmProvider::OpenAI).await?;

        resp.choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message)
            .and_then(|message| message.content)
            .ok_or(UpstreamError::Malformed)
    }

    fn provider(&self) -> LlmProvider {
        LlmProvider::OpenAI
    }

    fn model(&self) -> &str {
        &self.model
    }
}
