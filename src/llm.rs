use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::LlmConfig;
use crate::error::GenerationError;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub role: String,
    pub content: String,
}

impl Message {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: "system".to_string(),
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: "assistant".to_string(),
            content: content.into(),
        }
    }
}

/// Which hosted (or local) OpenAI-compatible service to talk to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LlmBackend {
    #[default]
    OpenAi,
    OpenRouter,
    /// LM Studio, llama.cpp server, Ollama's OpenAI shim, ...
    Local,
    /// Anything else; `base_url` must be set.
    Custom,
}

impl LlmBackend {
    pub fn default_base_url(&self) -> &'static str {
        match self {
            LlmBackend::OpenAi | LlmBackend::Custom => "https://api.openai.com/v1",
            LlmBackend::OpenRouter => "https://openrouter.ai/api/v1",
            LlmBackend::Local => "http://localhost:1234/v1",
        }
    }

    pub fn requires_api_key(&self) -> bool {
        matches!(self, LlmBackend::OpenAi | LlmBackend::OpenRouter)
    }
}

impl FromStr for LlmBackend {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "openai" => Ok(LlmBackend::OpenAi),
            "openrouter" => Ok(LlmBackend::OpenRouter),
            "local" | "lmstudio" | "ollama" => Ok(LlmBackend::Local),
            "custom" => Ok(LlmBackend::Custom),
            other => Err(format!("unknown LLM backend '{other}'")),
        }
    }
}

impl fmt::Display for LlmBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            LlmBackend::OpenAi => "openai",
            LlmBackend::OpenRouter => "openrouter",
            LlmBackend::Local => "local",
            LlmBackend::Custom => "custom",
        };
        f.write_str(name)
    }
}

/// Answer generation: a system prompt, prior turns, and the new user prompt
/// in; answer text out.
#[async_trait]
pub trait Generator: Send + Sync {
    async fn generate(
        &self,
        system: &str,
        history: &[Message],
        prompt: &str,
    ) -> Result<String, GenerationError>;
}

pub struct LlmClient {
    client: reqwest::Client,
    base_url: String,
    model: String,
    api_key: Option<String>,
    temperature: f32,
    max_tokens: u32,
    request_timeout: Duration,
}

impl LlmClient {
    pub fn from_config(config: &LlmConfig) -> anyhow::Result<Self> {
        // The orchestrator enforces the per-attempt deadline; this is a backstop.
        let request_timeout = Duration::from_secs(config.timeout_secs.saturating_mul(2).max(1));
        let client = reqwest::Client::builder()
            .timeout(request_timeout)
            .build()
            .map_err(|e| anyhow::anyhow!("Failed to create HTTP client: {}", e))?;

        Ok(Self {
            client,
            base_url: config.resolved_base_url(),
            model: config.model.clone(),
            api_key: config.api_key.clone().filter(|k| !k.is_empty()),
            temperature: config.temperature,
            max_tokens: config.max_tokens,
            request_timeout,
        })
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    /// Resolve the chat completions endpoint from the base URL.
    fn endpoint(&self) -> String {
        let base = self.base_url.trim_end_matches('/');
        if base.ends_with("/chat/completions") {
            base.to_string()
        } else if base.ends_with("/v1") {
            format!("{}/chat/completions", base)
        } else {
            format!("{}/v1/chat/completions", base)
        }
    }

    /// Non-streaming chat completion.
    pub async fn chat(&self, messages: &[Message]) -> Result<String, GenerationError> {
        let body = serde_json::json!({
            "model": self.model,
            "messages": messages,
            "temperature": self.temperature,
            "max_tokens": self.max_tokens,
        });

        let mut req = self.client.post(self.endpoint()).json(&body);
        if let Some(key) = &self.api_key {
            req = req.header("Authorization", format!("Bearer {}", key));
        }

        let resp = req.send().await.map_err(|e| {
            if e.is_timeout() {
                GenerationError::Timeout(self.request_timeout)
            } else {
                GenerationError::Network(e.to_string())
            }
        })?;

        let status = resp.status();
        let retry_after = resp
            .headers()
            .get(reqwest::header::RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.trim().parse::<u64>().ok())
            .map(Duration::from_secs);
        let text = resp
            .text()
            .await
            .map_err(|e| GenerationError::Network(e.to_string()))?;

        if !status.is_success() {
            return Err(classify_status(status, retry_after, &text));
        }

        let content = extract_content(&text)?;
        debug!(model = %self.model, answer_len = content.len(), "LLM completion received");
        Ok(content)
    }
}

#[async_trait]
impl Generator for LlmClient {
    async fn generate(
        &self,
        system: &str,
        history: &[Message],
        prompt: &str,
    ) -> Result<String, GenerationError> {
        let mut messages = Vec::with_capacity(history.len() + 2);
        messages.push(Message::system(system));
        messages.extend_from_slice(history);
        messages.push(Message::user(prompt));
        self.chat(&messages).await
    }
}

/// Map a non-success HTTP status to the error class the orchestrator acts on.
pub fn classify_status(status: StatusCode, retry_after: Option<Duration>, body: &str) -> GenerationError {
    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => GenerationError::Authentication {
            status: status.as_u16(),
        },
        StatusCode::TOO_MANY_REQUESTS => GenerationError::RateLimited { retry_after },
        StatusCode::REQUEST_TIMEOUT | StatusCode::GATEWAY_TIMEOUT => {
            GenerationError::UpstreamTimeout {
                status: status.as_u16(),
            }
        }
        _ => GenerationError::Api {
            status: status.as_u16(),
            message: api_error_message(body),
        },
    }
}

fn api_error_message(body: &str) -> String {
    serde_json::from_str::<serde_json::Value>(body)
        .ok()
        .and_then(|json| json["error"]["message"].as_str().map(str::to_string))
        .unwrap_or_else(|| body.chars().take(200).collect())
}

/// Pull `choices[0].message.content` out of a completion body.
pub fn extract_content(body: &str) -> Result<String, GenerationError> {
    let json: serde_json::Value = serde_json::from_str(body)
        .map_err(|e| GenerationError::Malformed(format!("invalid JSON: {}", e)))?;
    let content = json["choices"]
        .get(0)
        .and_then(|c| c["message"]["content"].as_str())
        .map(str::trim)
        .unwrap_or("");
    if content.is_empty() {
        return Err(GenerationError::Malformed(
            "completion had no message content".to_string(),
        ));
    }
    Ok(content.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::TestServer;

    fn client(base_url: &str) -> LlmClient {
        let config = LlmConfig {
            base_url: Some(base_url.to_string()),
            ..LlmConfig::default()
        };
        LlmClient::from_config(&config).unwrap()
    }

    #[test]
    fn endpoint_resolution() {
        assert_eq!(
            client("http://localhost:1234/v1").endpoint(),
            "http://localhost:1234/v1/chat/completions"
        );
        assert_eq!(
            client("https://example.com/").endpoint(),
            "https://example.com/v1/chat/completions"
        );
        assert_eq!(
            client("https://example.com/v1/chat/completions").endpoint(),
            "https://example.com/v1/chat/completions"
        );
    }

    #[test]
    fn status_classification() {
        assert!(matches!(
            classify_status(StatusCode::UNAUTHORIZED, None, ""),
            GenerationError::Authentication { status: 401 }
        ));
        assert!(matches!(
            classify_status(StatusCode::FORBIDDEN, None, ""),
            GenerationError::Authentication { status: 403 }
        ));
        let limited = classify_status(
            StatusCode::TOO_MANY_REQUESTS,
            Some(Duration::from_secs(2)),
            "",
        );
        assert!(limited.is_retryable());
        assert!(matches!(
            limited,
            GenerationError::RateLimited { retry_after: Some(d) } if d == Duration::from_secs(2)
        ));
        let gateway = classify_status(StatusCode::GATEWAY_TIMEOUT, None, "");
        assert!(matches!(gateway, GenerationError::UpstreamTimeout { status: 504 }));
        assert_eq!(gateway.to_string(), "LLM backend reported a timeout (504)");
        assert!(!gateway.is_retryable());
        match classify_status(
            StatusCode::INTERNAL_SERVER_ERROR,
            None,
            r#"{"error":{"message":"model overloaded"}}"#,
        ) {
            GenerationError::Api { status, message } => {
                assert_eq!(status, 500);
                assert_eq!(message, "model overloaded");
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test]
    async fn stalled_backend_reports_the_client_deadline() {
        let url = TestServer::silent().await;
        let config = LlmConfig {
            base_url: Some(url),
            timeout_secs: 1,
            ..LlmConfig::default()
        };
        let client = LlmClient::from_config(&config).unwrap();
        let err = client.chat(&[Message::user("hi")]).await.unwrap_err();
        assert!(
            matches!(err, GenerationError::Timeout(d) if d == Duration::from_secs(2)),
            "unexpected {err:?}"
        );
        assert!(err.to_string().ends_with("2s"));
    }

    #[test]
    fn content_extraction() {
        let body = r#"{"choices":[{"message":{"role":"assistant","content":"  Pay bail at the desk. "}}]}"#;
        assert_eq!(extract_content(body).unwrap(), "Pay bail at the desk.");

        assert!(matches!(
            extract_content(r#"{"choices":[{"message":{"content":null}}]}"#),
            Err(GenerationError::Malformed(_))
        ));
        assert!(matches!(
            extract_content("<html>bad gateway</html>"),
            Err(GenerationError::Malformed(_))
        ));
    }

    #[test]
    fn backend_parsing_and_defaults() {
        assert_eq!("OpenRouter".parse::<LlmBackend>(), Ok(LlmBackend::OpenRouter));
        assert_eq!("lmstudio".parse::<LlmBackend>(), Ok(LlmBackend::Local));
        assert!("skynet".parse::<LlmBackend>().is_err());
        assert!(!LlmBackend::Local.requires_api_key());
        assert_eq!(LlmBackend::Local.default_base_url(), "http://localhost:1234/v1");
    }
}
