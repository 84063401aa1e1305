//! Chat-completion backends behind the language model gateway.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use leviathan_core::config::{LlmConfig, LlmProvider};
use leviathan_core::errors::GatewayError;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use tracing::debug;

#[async_trait]
pub trait LlmClient: Send + Sync {
    /// Sends one rendered prompt as a user message and returns the raw reply.
    async fn complete(&self, prompt: &str) -> Result<String, GatewayError>;
}

#[async_trait]
impl LlmClient for Arc<dyn LlmClient> {
    async fn complete(&self, prompt: &str) -> Result<String, GatewayError> {
        (**self).complete(prompt).await
    }
}

pub fn client_from_config(config: &LlmConfig) -> Result<Arc<dyn LlmClient>, GatewayError> {
    let timeout = Duration::from_secs(config.timeout_secs);
    let client: Arc<dyn LlmClient> = match config.provider {
        LlmProvider::Ollama => Arc::new(OllamaClient::new(
            config.base_url.as_deref().unwrap_or(OllamaClient::DEFAULT_BASE_URL),
            &config.model,
            config.temperature,
            timeout,
        )?),
        LlmProvider::OpenAi => Arc::new(OpenAiCompatibleClient::new(
            config.base_url.as_deref().unwrap_or(OpenAiCompatibleClient::DEFAULT_BASE_URL),
            config.api_key.clone(),
            &config.model,
            config.temperature,
            timeout,
        )?),
    };
    Ok(client)
}

fn build_http_client(timeout: Duration) -> Result<reqwest::Client, GatewayError> {
    reqwest::Client::builder().timeout(timeout).build().map_err(|error| {
        GatewayError::Unavailable { message: error.to_string(), timeout: false }
    })
}

fn transport_error(error: reqwest::Error) -> GatewayError {
    GatewayError::Unavailable { message: error.to_string(), timeout: error.is_timeout() }
}

async fn read_success_body(response: reqwest::Response) -> Result<String, GatewayError> {
    let status = response.status();
    let body = response.text().await.map_err(transport_error)?;
    if !status.is_success() {
        return Err(GatewayError::Unavailable {
            message: format!("HTTP {status}: {body}"),
            timeout: false,
        });
    }
    Ok(body)
}

fn malformed(message: impl Into<String>) -> GatewayError {
    GatewayError::Unavailable { message: message.into(), timeout: false }
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'static str,
    content: &'a str,
}

/// Client for Ollama's `/api/chat` endpoint.
pub struct OllamaClient {
    client: reqwest::Client,
    endpoint: String,
    model: String,
    temperature: f32,
}

#[derive(Debug, Serialize)]
struct OllamaRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    stream: bool,
    options: OllamaOptions,
}

#[derive(Debug, Serialize)]
struct OllamaOptions {
    temperature: f32,
}

#[derive(Debug, Deserialize)]
struct OllamaResponse {
    message: OllamaMessage,
}

#[derive(Debug, Deserialize)]
struct OllamaMessage {
    content: String,
}

impl OllamaClient {
    pub const DEFAULT_BASE_URL: &'static str = "http://localhost:11434";

    pub fn new(
        base_url: &str,
        model: &str,
        temperature: f32,
        timeout: Duration,
    ) -> Result<Self, GatewayError> {
        Ok(Self {
            client: build_http_client(timeout)?,
            endpoint: format!("{}/api/chat", base_url.trim_end_matches('/')),
            model: model.to_string(),
            temperature,
        })
    }
}

#[async_trait]
impl LlmClient for OllamaClient {
    async fn complete(&self, prompt: &str) -> Result<String, GatewayError> {
        let body = OllamaRequest {
            model: &self.model,
            messages: vec![ChatMessage { role: "user", content: prompt }],
            stream: false,
            options: OllamaOptions { temperature: self.temperature },
        };

        debug!(endpoint = %self.endpoint, model = %self.model, "sending ollama chat request");
        let response =
            self.client.post(&self.endpoint).json(&body).send().await.map_err(transport_error)?;
        let text = read_success_body(response).await?;
        let parsed: OllamaResponse = serde_json::from_str(&text)
            .map_err(|error| malformed(format!("unexpected ollama response: {error}")))?;
        Ok(parsed.message.content)
    }
}

/// Client for OpenAI-compatible `/v1/chat/completions` endpoints.
pub struct OpenAiCompatibleClient {
    client: reqwest::Client,
    endpoint: String,
    api_key: Option<SecretString>,
    model: String,
    temperature: f32,
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    temperature: f32,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessageResponse,
}

#[derive(Debug, Deserialize)]
struct ChatMessageResponse {
    content: String,
}

impl OpenAiCompatibleClient {
    pub const DEFAULT_BASE_URL: &'static str = "https://api.openai.com";

    pub fn new(
        base_url: &str,
        api_key: Option<SecretString>,
        model: &str,
        temperature: f32,
        timeout: Duration,
    ) -> Result<Self, GatewayError> {
        Ok(Self {
            client: build_http_client(timeout)?,
            endpoint: format!("{}/v1/chat/completions", base_url.trim_end_matches('/')),
            api_key,
            model: model.to_string(),
            temperature,
        })
    }

    fn headers(&self) -> Result<HeaderMap, GatewayError> {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        if let Some(key) = &self.api_key {
            let value = format!("Bearer {}", key.expose_secret());
            headers.insert(
                AUTHORIZATION,
                HeaderValue::from_str(&value)
                    .map_err(|error| malformed(format!("invalid api key header: {error}")))?,
            );
        }
        Ok(headers)
    }
}

#[async_trait]
impl LlmClient for OpenAiCompatibleClient {
    async fn complete(&self, prompt: &str) -> Result<String, GatewayError> {
        let body = ChatRequest {
            model: &self.model,
            messages: vec![ChatMessage { role: "user", content: prompt }],
            temperature: self.temperature,
        };

        debug!(endpoint = %self.endpoint, model = %self.model, "sending chat completion request");
        let response = self
            .client
            .post(&self.endpoint)
            .headers(self.headers()?)
            .json(&body)
            .send()
            .await
            .map_err(transport_error)?;
        let text = read_success_body(response).await?;
        let parsed: ChatResponse = serde_json::from_str(&text)
            .map_err(|error| malformed(format!("unexpected chat completion response: {error}")))?;

        parsed
            .choices
            .into_iter()
            .next()
            .map(|choice| choice.message.content)
            .ok_or_else(|| malformed("chat completion response had no choices"))
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use leviathan_core::config::{AppConfig, LlmProvider};

    use super::{client_from_config, OllamaClient, OpenAiCompatibleClient};

    #[test]
    fn endpoints_are_derived_from_base_urls() {
        let timeout = Duration::from_secs(5);
        let ollama = OllamaClient::new("http://ollama:11434/", "mistral:instruct", 0.0, timeout)
            .expect("client");
        assert_eq!(ollama.endpoint, "http://ollama:11434/api/chat");

        let openai = OpenAiCompatibleClient::new(
            "https://llm.example",
            Some("sk-test".to_string().into()),
            "gpt-4o-mini",
            0.2,
            Duration::from_secs(5),
        )
        .expect("client");
        assert_eq!(openai.endpoint, "https://llm.example/v1/chat/completions");
        let headers = openai.headers().expect("headers");
        assert_eq!(headers["authorization"], "Bearer sk-test");
    }

    #[test]
    fn builds_a_client_for_each_provider() {
        let mut config = AppConfig::default().llm;
        assert!(client_from_config(&config).is_ok());

        config.provider = LlmProvider::OpenAi;
        config.base_url = None;
        config.api_key = Some("sk-test".to_string().into());
        assert!(client_from_config(&config).is_ok());
    }
}
