use async_trait::async_trait;
use log::info;
use reqwest::Client as HttpClient;
use serde::{ Deserialize, Serialize };

use super::{ send_for_json, ChatProvider, ChatTurn };
use crate::credential::Credential;
use crate::llm::{ LlmConfig, LlmProvider, UpstreamError, MAX_OUTPUT_TOKENS, SYSTEM_PROMPT, TEMPERATURE };

const DEFAULT_MODEL: &str = "gemini-pro";
const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GeminiRequest {
    contents: Vec<GeminiContent>,
    generation_config: GenerationConfig,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    temperature: f32,
    max_output_tokens: u32,
}

#[derive(Serialize)]
struct GeminiContent {
    parts: Vec<GeminiPart>,
}

#[derive(Serialize)]
struct GeminiPart {
    text: String,
}

#[derive(Deserialize)]
struct GoogleResponse {
    #[serde(default)]
    candidates: Vec<GoogleCandidate>,
}

#[derive(Deserialize)]
struct GoogleCandidate {
    content: Option<GoogleContent>,
}

#[derive(Deserialize)]
struct GoogleContent {
    #[serde(default)]
    parts: Vec<GooglePart>,
}

#[derive(Deserialize)]
struct GooglePart {
    text: Option<String>,
}

/// generateContent client. The request carries a single text part made of the
/// system prompt and the user turn; earlier history is not sent.
pub struct GeminiChatClient {
    http: HttpClient,
    model: String,
    base_url: String,
}

impl GeminiChatClient {
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

    fn build_request(prompt: &str) -> GeminiRequest {
        GeminiRequest {
            contents: vec![GeminiContent {
                parts: vec![GeminiPart {
                    text: format!("{}\n\n{}", SYSTEM_PROMPT, prompt),
                }],
            }],
            generation_config: GenerationConfig {
                temperature: TEMPERATURE,
                max_output_tokens: MAX_OUTPUT_TOKENS,
            },
        }
    }
}

#[async_trait]
impl ChatProvider for GeminiChatClient {
    async fn complete(
        &self,
        history: &[ChatTurn],
        prompt: &str,
        credential: &Credential
    ) -> Result<String, UpstreamError> {
        let url = format!(
            "{}/models/{}:generateContent",
            self.base_url.trim_end_matches('/'),
            self.model
        );
        info!(
            "GeminiChatClient::complete() → model={} url={} (dropping {} history turns)",
            self.model,
            url,
            history.len()
        );

        let payload = Self::build_request(prompt);
        let request = self.http
            .post(&url)
            .query(&[("key", credential.api_key.as_str())])
            .json(&payload);
        let resp: GoogleResponse = send_for_json(request, LlmProvider::Gemini).await?;

        resp.candidates
            .into_iter()
            .next()
            .and_then(|candidate| candidate.content)
            .and_then(|content| content.parts.into_iter().next())
            .and_then(|part| part.text)
            .ok_or(UpstreamError::Malformed)
    }

    fn provider(&self) -> LlmProvider {
        LlmProvider::Gemini
    }

    fn model(&self) -> &str {
        &self.model
    }
}
