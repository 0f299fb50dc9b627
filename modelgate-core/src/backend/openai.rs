//! OpenAI-compatible chat-completions backend.
//!
//! # Error Classification
//!
//! - Timeouts, connect failures, 408, 429 and 5xx → [`BackendError::Transient`]
//! - Other 4xx, oversized or malformed bodies → [`BackendError::Terminal`]
//!
//! No retry happens here; the gateway owns the single fallback retry.

use std::time::{Duration, Instant};

use reqwest::{Client, StatusCode};
use serde::Deserialize;
use serde_json::{Map, Value, json};
use tracing::{debug, error, warn};

use super::{BackendError, GenerationBackend, GenerationRequest, GenerationResult, Usage};
use crate::config::ConfigError;

const DEFAULT_BASE_URL: &str = "https://api.openai.com";

/// Connection settings for [`OpenAiBackend`].
#[derive(Clone)]
pub struct OpenAiConfig {
    /// Base URL, e.g. `https://api.openai.com`.
    pub base_url: String,
    pub api_key: String,
    /// Request timeout (includes connection + response)
    pub timeout: Duration,
    /// Connection timeout (TCP + TLS handshake)
    pub connect_timeout: Duration,
    pub pool_max_idle_per_host: usize,
    /// Maximum response body size in bytes.
    pub max_response_size: usize,
}

impl std::fmt::Debug for OpenAiConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenAiConfig")
            .field("base_url", &self.base_url)
            .field("api_key", &"<redacted>")
            .field("timeout", &self.timeout)
            .field("connect_timeout", &self.connect_timeout)
            .field("max_response_size", &self.max_response_size)
            .finish()
    }
}

impl OpenAiConfig {
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            api_key: api_key.into(),
            timeout: Duration::from_secs(60),
            connect_timeout: Duration::from_secs(5),
            pool_max_idle_per_host: 16,
            max_response_size: 2 * 1024 * 1024, // 2 MB
        }
    }

    /// Load configuration from environment variables.
    ///
    /// # Environment Variables
    ///
    /// - `MODELGATE_BACKEND_URL` (default: `https://api.openai.com`)
    /// - `MODELGATE_API_KEY`, falling back to `OPENAI_API_KEY` (one required)
    pub fn from_env() -> Result<Self, ConfigError> {
        let base_url =
            std::env::var("MODELGATE_BACKEND_URL").unwrap_or_else(|_| DEFAULT_BASE_URL.to_string());

        let api_key = std::env::var("MODELGATE_API_KEY")
            .or_else(|_| std::env::var("OPENAI_API_KEY"))
            .map_err(|_| ConfigError::MissingEnvVar {
                var: "OPENAI_API_KEY".to_string(),
                field: "backend.api_key".to_string(),
            })?;

        Ok(Self::new(base_url, api_key))
    }
}

/// Chat-completions client with connection pooling.
#[derive(Clone)]
pub struct OpenAiBackend {
    client: Client,
    config: OpenAiConfig,
    /// Pre-computed endpoint URL.
    completions_url: String,
}

impl std::fmt::Debug for OpenAiBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenAiBackend")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl OpenAiBackend {
    /// Build the client.
    ///
    /// # Errors
    ///
    /// Returns `BackendError::Terminal` if the base URL does not parse or the
    /// HTTP client cannot be built.
    pub fn new(config: OpenAiConfig) -> Result<Self, BackendError> {
        if let Err(e) = reqwest::Url::parse(&config.base_url) {
            return Err(BackendError::Terminal {
                reason: format!("invalid base_url '{}': {e}", config.base_url),
            });
        }

        let client = Client::builder()
            .timeout(config.timeout)
            .connect_timeout(config.connect_timeout)
            .pool_max_idle_per_host(config.pool_max_idle_per_host)
            .tcp_nodelay(true)
            .build()
            .map_err(|e| BackendError::Terminal {
                reason: format!("client build error: {e}"),
            })?;

        let completions_url = format!(
            "{}/v1/chat/completions",
            config.base_url.trim_end_matches('/')
        );

        Ok(Self {
            client,
            config,
            completions_url,
        })
    }

    /// Request body: messages plus routed params flattened in.
    fn build_body(request: &GenerationRequest) -> Value {
        let mut body = Map::new();
        body.insert("model".to_string(), json!(request.model));
        body.insert(
            "messages".to_string(),
            json!([
                { "role": "system", "content": request.system_prompt },
                { "role": "user", "content": request.user_input },
            ]),
        );
        for (name, value) in &request.params {
            body.insert(name.clone(), value.clone());
        }
        Value::Object(body)
    }

    /// Read the response body with a size limit.
    async fn read_body_limited(
        &self,
        mut response: reqwest::Response,
        request_id: &str,
    ) -> Result<Vec<u8>, BackendError> {
        let max_size = self.config.max_response_size;

        if let Some(content_length) = response.content_length()
            && content_length as usize > max_size
        {
            warn!(
                request_id = %request_id,
                content_length,
                max_response_size = max_size,
                "Backend response exceeds size limit (Content-Length)"
            );
            return Err(BackendError::Terminal {
                reason: format!("response too large: {content_length} bytes"),
            });
        }

        let mut buf = Vec::with_capacity(
            response
                .content_length()
                .map(|cl| cl as usize)
                .unwrap_or(8192)
                .min(max_size),
        );

        while let Some(chunk) = response.chunk().await.map_err(|e| {
            error!(request_id = %request_id, error = %e, "Failed to read backend response body");
            BackendError::Transient {
                reason: format!("failed to read response: {e}"),
            }
        })? {
            if buf.len() + chunk.len() > max_size {
                warn!(
                    request_id = %request_id,
                    accumulated = buf.len(),
                    max_response_size = max_size,
                    "Backend response exceeds size limit during streaming"
                );
                return Err(BackendError::Terminal {
                    reason: format!("response too large: >={} bytes", buf.len() + chunk.len()),
                });
            }
            buf.extend_from_slice(&chunk);
        }

        Ok(buf)
    }

    /// Classify a reqwest error.
    fn classify_error(&self, error: reqwest::Error, request_id: &str) -> BackendError {
        if error.is_timeout() {
            warn!(
                request_id = %request_id,
                timeout_secs = self.config.timeout.as_secs(),
                "Backend request timed out"
            );
            BackendError::Transient {
                reason: "request timed out".to_string(),
            }
        } else if error.is_connect() {
            warn!(request_id = %request_id, url = %self.config.base_url, "Failed to connect to backend");
            BackendError::Transient {
                reason: format!("connection failed: {error}"),
            }
        } else {
            error!(request_id = %request_id, error = %error, "Backend request failed");
            BackendError::Terminal {
                reason: error.to_string(),
            }
        }
    }
}

/// Classify a non-success HTTP status.
fn classify_http_status(status: StatusCode) -> BackendError {
    match status.as_u16() {
        408 | 429 | 500..=599 => BackendError::Transient {
            reason: format!("backend returned HTTP {status}"),
        },
        _ => BackendError::Terminal {
            reason: format!("backend returned HTTP {status}"),
        },
    }
}

#[derive(Debug, Deserialize)]
struct ChatCompletion {
    #[serde(default)]
    model: Option<String>,
    #[serde(default)]
    choices: Vec<Choice>,
    #[serde(default)]
    usage: Option<ApiUsage>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ApiUsage {
    #[serde(default)]
    prompt_tokens: u64,
    #[serde(default)]
    completion_tokens: u64,
}

#[async_trait::async_trait]
impl GenerationBackend for OpenAiBackend {
    #[tracing::instrument(
        skip(self, request),
        fields(request_id = %request.request_id, model = %request.model)
    )]
    async fn generate(&self, request: &GenerationRequest) -> Result<GenerationResult, BackendError> {
        let request_id = request.request_id.to_string();
        let body = Self::build_body(request);

        debug!(
            request_id = %request_id,
            params = ?request.params.keys().collect::<Vec<_>>(),
            "Sending chat completion"
        );

        let started = Instant::now();
        let response = self
            .client
            .post(&self.completions_url)
            .bearer_auth(&self.config.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| self.classify_error(e, &request_id))?;

        let status = response.status();
        if !status.is_success() {
            warn!(request_id = %request_id, status = %status, "Backend returned error status");
            return Err(classify_http_status(status));
        }

        let bytes = self.read_body_limited(response, &request_id).await?;
        let completion: ChatCompletion = serde_json::from_slice(&bytes).map_err(|e| {
            error!(request_id = %request_id, error = %e, body_size = bytes.len(), "Failed to parse backend response");
            BackendError::Terminal {
                reason: format!("malformed response: {e}"),
            }
        })?;

        let output = completion
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| BackendError::Terminal {
                reason: "response has no message content".to_string(),
            })?;

        let usage = match completion.usage {
            Some(u) => Usage {
                prompt_tokens: u.prompt_tokens,
                completion_tokens: u.completion_tokens,
            },
            None => super::estimate_usage(&request.system_prompt, &request.user_input, &output),
        };

        Ok(GenerationResult {
            output,
            usage,
            latency: started.elapsed(),
            model: completion.model.unwrap_or_else(|| request.model.clone()),
        })
    }

    fn name(&self) -> &'static str {
        "openai"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::collections::BTreeMap;
    use uuid::Uuid;

    struct EnvVarGuard {
        vars: Vec<(&'static str, Option<String>)>,
    }

    impl EnvVarGuard {
        fn new(var_names: &[&'static str]) -> Self {
            let vars = var_names
                .iter()
                .map(|&name| (name, std::env::var(name).ok()))
                .collect();
            Self { vars }
        }
    }

    impl Drop for EnvVarGuard {
        fn drop(&mut self) {
            for (name, original) in &self.vars {
                // SAFETY: single-threaded test context (enforced by #[serial])
                unsafe {
                    match original {
                        Some(val) => std::env::set_var(name, val),
                        None => std::env::remove_var(name),
                    }
                }
            }
        }
    }

    const VARS: &[&str] = &["MODELGATE_BACKEND_URL", "MODELGATE_API_KEY", "OPENAI_API_KEY"];

    #[test]
    fn test_status_classification() {
        for code in [408, 429, 500, 502, 503] {
            let status = StatusCode::from_u16(code).unwrap();
            assert!(classify_http_status(status).is_transient(), "{code}");
        }
        for code in [400, 401, 403, 404, 422] {
            let status = StatusCode::from_u16(code).unwrap();
            assert!(!classify_http_status(status).is_transient(), "{code}");
        }
    }

    #[test]
    fn test_body_flattens_params() {
        let request = GenerationRequest {
            request_id: Uuid::new_v4(),
            use_case: "faq".to_string(),
            model: "gpt-4o-mini".to_string(),
            system_prompt: "Be brief.".to_string(),
            user_input: "Hi PII_EMAIL_0123456789abcdef01234567".to_string(),
            params: BTreeMap::from([("temperature".to_string(), json!(0.2))]),
        };
        let body = OpenAiBackend::build_body(&request);
        assert_eq!(body["model"], "gpt-4o-mini");
        assert_eq!(body["temperature"], 0.2);
        assert_eq!(body["messages"][0]["role"], "system");
        assert_eq!(body["messages"][1]["content"], request.user_input);
    }

    #[test]
    fn test_invalid_base_url_rejected() {
        let result = OpenAiBackend::new(OpenAiConfig::new("not a url", "k"));
        assert!(matches!(result, Err(BackendError::Terminal { .. })));
    }

    #[test]
    fn test_debug_redacts_key() {
        let config = OpenAiConfig::new("https://api.openai.com", "sk-secret");
        assert!(!format!("{config:?}").contains("sk-secret"));
    }

    #[test]
    #[serial]
    fn test_from_env() {
        let _guard = EnvVarGuard::new(VARS);
        // SAFETY: single-threaded test context (enforced by #[serial])
        unsafe {
            std::env::remove_var("MODELGATE_BACKEND_URL");
            std::env::remove_var("MODELGATE_API_KEY");
            std::env::set_var("OPENAI_API_KEY", "sk-test");
        }
        let config = OpenAiConfig::from_env().unwrap();
        assert_eq!(config.base_url, DEFAULT_BASE_URL);
        assert_eq!(config.api_key, "sk-test");
    }

    #[test]
    #[serial]
    fn test_from_env_missing_key() {
        let _guard = EnvVarGuard::new(VARS);
        // SAFETY: single-threaded test context (enforced by #[serial])
        unsafe {
            std::env::remove_var("MODELGATE_API_KEY");
            std::env::remove_var("OPENAI_API_KEY");
        }
        assert!(matches!(
            OpenAiConfig::from_env(),
            Err(ConfigError::MissingEnvVar { .. })
        ));
    }
}
