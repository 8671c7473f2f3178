//! Adapter for OpenAI-compatible `/completions` endpoints (vLLM, TGI, OpenAI).

use std::fmt;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::error::{ErrorContext, ProviderError};
use super::types::*;

// =============================================================================
// TRAIT
// =============================================================================

/// Trait for completion providers.
#[async_trait]
pub trait CompletionProvider: Send + Sync {
    async fn complete(&self, req: &CompletionRequest) -> Result<CompletionResponse, ProviderError>;
}

// =============================================================================
// ENDPOINT + CREDENTIAL
// =============================================================================

/// Maximum allowed response body (4MB). Echoed logprobs grow with the prompt.
const MAX_RESPONSE_LEN: usize = 4 * 1_024 * 1_024;

/// Maximum allowed prompt characters.
const MAX_INPUT_CHARS: usize = 500_000;

pub const DEFAULT_BASE_URL: &str = "http://localhost:8000/v1";
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(120);

/// Where the completion endpoint lives and how long a single request may take.
#[derive(Debug, Clone)]
pub struct EndpointConfig {
    pub base_url: String,
    pub request_timeout: Duration,
}

impl EndpointConfig {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }

    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }
}

impl Default for EndpointConfig {
    fn default() -> Self {
        Self::new(DEFAULT_BASE_URL)
    }
}

/// Caller-supplied API key. Local inference servers usually need none.
#[derive(Clone, Default)]
pub struct ApiCredential(Option<String>);

impl ApiCredential {
    pub fn none() -> Self {
        Self(None)
    }

    pub fn bearer(key: impl Into<String>) -> Self {
        let key = key.into();
        if key.trim().is_empty() {
            Self(None)
        } else {
            Self(Some(key))
        }
    }

    pub fn is_present(&self) -> bool {
        self.0.is_some()
    }
}

impl fmt::Debug for ApiCredential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0 {
            Some(_) => f.write_str("ApiCredential(<redacted>)"),
            None => f.write_str("ApiCredential(None)"),
        }
    }
}

// =============================================================================
// ADAPTER
// =============================================================================

/// Client for one OpenAI-compatible completion endpoint.
///
/// Built per evaluation from an [`EndpointConfig`] and an [`ApiCredential`];
/// there is no process-wide client.
#[derive(Debug, Clone)]
pub struct OpenAiCompatAdapter {
    client: reqwest::Client,
    base_url: String,
    timeout: Duration,
}

impl OpenAiCompatAdapter {
    pub fn new(
        endpoint: &EndpointConfig,
        credential: &ApiCredential,
    ) -> Result<Self, ProviderError> {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));

        if let Some(key) = &credential.0 {
            let auth_value = HeaderValue::from_str(&format!("Bearer {key}"))
                .map_err(|_| ProviderError::config("Invalid API key format"))?;
            headers.insert(AUTHORIZATION, auth_value);
        }

        let client = reqwest::Client::builder()
            .timeout(endpoint.request_timeout)
            .default_headers(headers)
            .gzip(true)
            .build()
            .map_err(|e| ProviderError::config(format!("Failed to create HTTP client: {e}")))?;

        Ok(Self {
            client,
            base_url: endpoint.base_url.trim_end_matches('/').to_string(),
            timeout: endpoint.request_timeout,
        })
    }

    fn completions_url(&self) -> String {
        format!("{}/completions", self.base_url)
    }

    fn extract_request_id(headers: &HeaderMap) -> Option<String> {
        headers
            .get("x-request-id")
            .and_then(|v| v.to_str().ok())
            .map(|s| s.to_string())
    }

    fn transport_error(&self, err: reqwest::Error) -> ProviderError {
        if err.is_timeout() {
            ProviderError::Timeout(self.timeout, None)
        } else {
            ProviderError::Http(err)
        }
    }

    fn status_error(status: u16, message: String, ctx: ErrorContext) -> ProviderError {
        match status {
            400 | 404 | 422 => ProviderError::invalid_request_with_context(message, ctx),
            408 | 504 => ProviderError::Timeout(Duration::from_secs(0), Some(ctx)),
            429 => ProviderError::rate_limited(Duration::from_secs(60), ctx),
            s => ProviderError::provider_with_context("completions", message, s >= 500, ctx),
        }
    }
}

// =============================================================================
// API TYPES
// =============================================================================

#[derive(Serialize)]
struct CompletionApiRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    echo: bool,
    max_tokens: u32,
    temperature: f32,
    logprobs: u32,
}

#[derive(Deserialize)]
struct CompletionApiResponse {
    choices: Option<Vec<Choice>>,
    usage: Option<Usage>,
    error: Option<ApiError>,
    /// vLLM reports errors as a flat object instead of under `error`.
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    code: Option<serde_json::Value>,
}

impl CompletionApiResponse {
    fn into_error(self) -> Option<ApiError> {
        self.error.or(match self.message {
            Some(message) => Some(ApiError {
                message: Some(message),
                code: self.code,
            }),
            None => None,
        })
    }
}

#[derive(Deserialize)]
struct Choice {
    logprobs: Option<ChoiceLogprobs>,
}

#[derive(Deserialize)]
struct ChoiceLogprobs {
    #[serde(default)]
    tokens: Option<Vec<String>>,
    token_logprobs: Vec<Option<f64>>,
}

#[derive(Deserialize)]
struct Usage {
    prompt_tokens: Option<u32>,
}

#[derive(Deserialize)]
struct ApiError {
    message: Option<String>,
    code: Option<serde_json::Value>,
}

impl ApiError {
    fn code_string(&self) -> Option<String> {
        match &self.code {
            Some(serde_json::Value::String(s)) => Some(s.clone()),
            Some(serde_json::Value::Number(n)) => Some(n.to_string()),
            _ => None,
        }
    }
}

// =============================================================================
// COMPLETION PROVIDER IMPL
// =============================================================================

#[async_trait]
impl CompletionProvider for OpenAiCompatAdapter {
    async fn complete(&self, req: &CompletionRequest) -> Result<CompletionResponse, ProviderError> {
        let prompt_chars = req.prompt.chars().count();
        if prompt_chars > MAX_INPUT_CHARS {
            return Err(ProviderError::invalid_request(format!(
                "Prompt too large: {prompt_chars} chars (max {MAX_INPUT_CHARS})"
            )));
        }

        let start = Instant::now();

        let api_req = CompletionApiRequest {
            model: req.model.model_id(),
            prompt: &req.prompt,
            echo: req.echo,
            max_tokens: req.max_tokens,
            temperature: req.temperature,
            logprobs: req.logprobs,
        };

        let mut response = self
            .client
            .post(self.completions_url())
            .json(&api_req)
            .send()
            .await
            .map_err(|e| self.transport_error(e))?;

        let status = response.status();
        let request_id = Self::extract_request_id(response.headers());

        // Stream response to enforce size limit
        let mut bytes = Vec::new();
        while let Some(chunk) = response.chunk().await.map_err(|e| self.transport_error(e))? {
            let new_len = bytes.len() + chunk.len();
            if new_len > MAX_RESPONSE_LEN {
                return Err(ProviderError::provider(
                    "completions",
                    format!("Response too large: {new_len} bytes"),
                    false,
                ));
            }
            bytes.extend_from_slice(&chunk);
        }

        let body = String::from_utf8_lossy(&bytes).to_string();

        let ctx = ErrorContext::new().with_status(status.as_u16());
        let ctx = if let Some(id) = &request_id {
            ctx.with_request_id(id)
        } else {
            ctx
        };

        if !status.is_success() {
            let (message, ctx) = match serde_json::from_str::<CompletionApiResponse>(&body)
                .ok()
                .and_then(|parsed| parsed.into_error())
            {
                Some(error) => {
                    let ctx = match error.code_string() {
                        Some(code) => ctx.with_code(code),
                        None => ctx,
                    };
                    (error.message.unwrap_or_default(), ctx)
                }
                None => (format!("HTTP {}", status.as_u16()), ctx),
            };
            return Err(Self::status_error(status.as_u16(), message, ctx));
        }

        let parsed: CompletionApiResponse = serde_json::from_str(&body).map_err(|e| {
            ProviderError::provider("completions", format!("Invalid JSON: {e}"), false)
        })?;

        // Some servers report errors with a 200 status.
        if let Some(error) = parsed.error {
            let ctx = match error.code_string() {
                Some(code) => ctx.with_code(code),
                None => ctx,
            };
            return Err(ProviderError::invalid_request_with_context(
                error.message.unwrap_or_default(),
                ctx,
            ));
        }

        let choice = parsed
            .choices
            .and_then(|c| c.into_iter().next())
            .ok_or_else(|| {
                ProviderError::provider("completions", "No choices in response", false)
            })?;

        // A server that ignores echo/logprobs cannot be scored against.
        let logprobs = choice.logprobs.ok_or_else(|| {
            ProviderError::invalid_request_with_context(
                "Response carries no logprobs; endpoint does not support echo scoring",
                ctx.clone(),
            )
        })?;

        let token_texts = logprobs
            .tokens
            .unwrap_or_else(|| vec![String::new(); logprobs.token_logprobs.len()]);
        if token_texts.len() != logprobs.token_logprobs.len() {
            return Err(ProviderError::provider_with_context(
                "completions",
                format!(
                    "tokens/token_logprobs length mismatch: {} vs {}",
                    token_texts.len(),
                    logprobs.token_logprobs.len()
                ),
                false,
                ctx,
            ));
        }

        let tokens: Vec<EchoedToken> = token_texts
            .into_iter()
            .zip(logprobs.token_logprobs)
            .map(|(token, logprob)| EchoedToken { token, logprob })
            .collect();

        let latency = start.elapsed();
        debug!(
            model = req.model.model_id(),
            caller = req.attribution.caller,
            tokens = tokens.len(),
            latency_ms = latency.as_millis() as u64,
            "completion echoed"
        );

        Ok(CompletionResponse {
            tokens,
            prompt_tokens: parsed.usage.and_then(|u| u.prompt_tokens),
            latency,
            request_id,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn credential_debug_is_redacted() {
        let cred = ApiCredential::bearer("sk-secret");
        assert!(cred.is_present());
        assert!(!format!("{cred:?}").contains("sk-secret"));
    }

    #[test]
    fn blank_credential_is_absent() {
        assert!(!ApiCredential::bearer("  ").is_present());
        assert!(!ApiCredential::none().is_present());
    }

    #[test]
    fn status_mapping_separates_rejections_from_timeouts() {
        let ctx = ErrorContext::new;
        assert!(OpenAiCompatAdapter::status_error(400, "bad".into(), ctx()).is_rejection());
        assert!(OpenAiCompatAdapter::status_error(404, "no model".into(), ctx()).is_rejection());
        assert!(OpenAiCompatAdapter::status_error(504, "slow".into(), ctx()).is_timeout());
        assert!(OpenAiCompatAdapter::status_error(503, "down".into(), ctx()).is_retryable());
        assert!(!OpenAiCompatAdapter::status_error(401, "auth".into(), ctx()).is_retryable());
    }

    #[test]
    fn base_url_trailing_slash_is_trimmed() {
        let adapter = OpenAiCompatAdapter::new(
            &EndpointConfig::new("http://localhost:8000/v1/"),
            &ApiCredential::none(),
        )
        .unwrap();
        assert_eq!(adapter.completions_url(), "http://localhost:8000/v1/completions");
    }
}
