pub mod chat;
use serde::{ Deserialize, Serialize };
use std::str::FromStr;
use std::fmt;
use thiserror::Error;

/// Fixed instruction sent ahead of every conversation.
pub const SYSTEM_PROMPT: &str =
    "Eres LexIA, asistente jurídico especializado en Derecho español y europeo. Responde con lenguaje claro y, cuando proceda, menciona la norma o jurisprudencia aplicable.";

pub const TEMPERATURE: f32 = 0.4;
pub const MAX_OUTPUT_TOKENS: u32 = 8000;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LlmProvider {
    #[default]
    OpenAI,
    Gemini,
}

impl LlmProvider {
    pub fn as_str(&self) -> &'static str {
        match self {
            LlmProvider::OpenAI => "openai",
            LlmProvider::Gemini => "gemini",
        }
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            LlmProvider::OpenAI => "OpenAI",
            LlmProvider::Gemini => "Google Gemini",
        }
    }
}

impl fmt::Display for LlmProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, PartialEq, Eq)]
pub struct ParseLlmProviderError {
    message: String,
}

impl fmt::Display for ParseLlmProviderError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for ParseLlmProviderError {}

impl FromStr for LlmProvider {
    type Err = ParseLlmProviderError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "openai" => Ok(LlmProvider::OpenAI),
            "gemini" => Ok(LlmProvider::Gemini),
            _ =>
                Err(ParseLlmProviderError {
                    message: format!("Invalid LLM provider: '{}'", s),
                }),
        }
    }
}

/// Endpoint overrides for one provider. The API key is not part of it: it comes
/// from the credential store on every call.
#[derive(Debug, Clone, Default)]
pub struct LlmConfig {
    pub provider: LlmProvider,
    pub model: Option<String>,
    pub base_url: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum UpstreamError {
    #[error("upstream returned HTTP status {0}")]
    Status(u16),
    #[error("upstream reply did not contain the expected completion text")]
    Malformed,
    #[error("upstream request failed: {0}")]
    Transport(String),
}
