use std::time::Duration;

use serde::Deserialize;
use serde_json::Value;

use crate::error::{Error, Result};

const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";
const PROVIDER_TIMEOUT: Duration = Duration::from_secs(60);

/// One completion call to the language model behind an analyzer.
#[derive(Debug, Clone)]
pub struct CompletionRequest {
    pub system_prompt: String,
    pub user_prompt: String,
    pub max_tokens: u32,
    pub temperature: f64,
    /// Overrides the provider's default model when set.
    pub model: Option<String>,
}

/// Seam to the LLM backend. Production uses the OpenAI-compatible HTTP
/// provider; tests script this trait directly.
pub trait LlmProvider: Send + Sync {
    fn complete(
        &self,
        request: &CompletionRequest,
    ) -> impl std::future::Future<Output = Result<String>> + Send;
}

/// OpenAI-compatible chat-completions provider.
#[derive(Debug)]
pub struct OpenAiProvider {
    http: reqwest::Client,
    api_key: String,
    base_url: String,
    default_model: String,
}

impl OpenAiProvider {
    pub fn new(api_key: String, default_model: String) -> Result<Self> {
        Self::with_base_url(api_key, default_model, DEFAULT_BASE_URL.to_string())
    }

    pub fn with_base_url(
        api_key: String,
        default_model: String,
        base_url: String,
    ) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(PROVIDER_TIMEOUT)
            .build()
            .map_err(|e| Error::Provider(format!("failed to build http client: {e}")))?;
        Ok(Self {
            http,
            api_key,
            base_url,
            default_model,
        })
    }

    /// Resolve the API key from the named environment variable.
    pub fn from_env(api_key_env: &str, default_model: String) -> Result<Self> {
        let api_key = std::env::var(api_key_env)
            .map_err(|_| Error::Provider(format!("API key not found in ${api_key_env}")))?;
        Self::new(api_key, default_model)
    }

    fn request_body(&self, request: &CompletionRequest) -> Value {
        serde_json::json!({
            "model": request.model.as_deref().unwrap_or(&self.default_model),
            "messages": [
                {"role": "system", "content": request.system_prompt},
                {"role": "user", "content": request.user_prompt},
            ],
            "max_tokens": request.max_tokens,
            "temperature": request.temperature,
        })
    }
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Debug, Deserialize)]
struct ChatMessage {
    content: Option<String>,
}

fn extract_content(raw: &str) -> Result<String> {
    let parsed: ChatResponse = serde_json::from_str(raw)
        .map_err(|e| Error::Provider(format!("malformed completion response: {e}")))?;
    parsed
        .choices
        .into_iter()
        .next()
        .and_then(|choice| choice.message.content)
        .ok_or_else(|| Error::Provider("completion response has no content".to_string()))
}

impl LlmProvider for OpenAiProvider {
    async fn complete(&self, request: &CompletionRequest) -> Result<String> {
        let url = format!("{}/chat/completions", self.base_url);
        let response = self
            .http
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&self.request_body(request))
            .send()
            .await
            .map_err(|e| Error::Provider(format!("completion request failed: {e}")))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| Error::Provider(format!("failed to read completion response: {e}")))?;

        if !status.is_success() {
            return Err(Error::Provider(format!(
                "completion request returned HTTP {status}: {}",
                crate::record::truncate(&body, 200)
            )));
        }

        extract_content(&body)
    }
}
