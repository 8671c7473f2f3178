//! Provider gateway for OpenAI-compatible completion endpoints.

pub mod completions;
pub mod error;
pub mod types;
pub mod usage;

use std::sync::Arc;
use std::time::Duration;

use tokio::time::sleep;
use tracing::warn;

use completions::{CompletionProvider, OpenAiCompatAdapter};
use usage::{CallStatus, ProviderCallRecord, UsageSink as UsageSinkTrait};

pub use completions::{ApiCredential, EndpointConfig};
pub use error::{ErrorContext, ProviderError};
pub use types::*;
pub use usage::{NoopUsageSink, TracingUsageSink, UsageSink};

#[async_trait::async_trait]
pub trait CompletionGateway: Send + Sync {
    async fn complete(&self, req: CompletionRequest) -> Result<CompletionResponse, ProviderError>;
}

#[derive(Debug, Clone)]
pub struct GatewayConfig {
    pub max_retries: u32,
    pub retry_base_delay: Duration,
}

impl Default for GatewayConfig {
    /// Scoring does not retry: a timeout is reported, not hidden.
    fn default() -> Self {
        Self {
            max_retries: 0,
            retry_base_delay: Duration::from_secs(1),
        }
    }
}

pub struct ProviderGateway<U: UsageSinkTrait> {
    provider: OpenAiCompatAdapter,
    usage_sink: Arc<U>,
    config: GatewayConfig,
}

#[async_trait::async_trait]
impl<U: UsageSinkTrait> CompletionGateway for ProviderGateway<U> {
    async fn complete(&self, req: CompletionRequest) -> Result<CompletionResponse, ProviderError> {
        ProviderGateway::complete(self, req).await
    }
}

impl<U: UsageSinkTrait> ProviderGateway<U> {
    /// Build a fresh gateway for one endpoint and caller-supplied credential.
    pub fn connect(
        endpoint: &EndpointConfig,
        credential: &ApiCredential,
        usage_sink: Arc<U>,
    ) -> Result<Self, ProviderError> {
        let provider = OpenAiCompatAdapter::new(endpoint, credential)?;
        Ok(Self {
            provider,
            usage_sink,
            config: GatewayConfig::default(),
        })
    }

    pub fn with_config(
        provider: OpenAiCompatAdapter,
        usage_sink: Arc<U>,
        config: GatewayConfig,
    ) -> Self {
        Self {
            provider,
            usage_sink,
            config,
        }
    }

    pub async fn complete(
        &self,
        req: CompletionRequest,
    ) -> Result<CompletionResponse, ProviderError> {
        let mut last_error: Option<ProviderError> = None;

        for attempt in 0..=self.config.max_retries {
            match self.provider.complete(&req).await {
                Ok(resp) => {
                    self.record_usage(&req, &resp, CallStatus::Success, None).await;
                    return Ok(resp);
                }
                Err(err) => {
                    let code = err.code().to_string();
                    self.record_usage(
                        &req,
                        &CompletionResponse::empty(),
                        CallStatus::Error,
                        Some(code),
                    )
                    .await;

                    if !err.is_retryable() || attempt == self.config.max_retries {
                        return Err(err);
                    }

                    let delay = backoff_delay(self.config.retry_base_delay, attempt);
                    warn!(
                        model = req.model.model_id(),
                        error = %err,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        "retrying completion"
                    );
                    last_error = Some(err);
                    sleep(delay).await;
                }
            }
        }

        Err(last_error
            .unwrap_or_else(|| ProviderError::provider("completions", "unknown error", false)))
    }

    async fn record_usage(
        &self,
        req: &CompletionRequest,
        resp: &CompletionResponse,
        status: CallStatus,
        error_code: Option<String>,
    ) {
        let record = ProviderCallRecord::new(
            req.model.provider(),
            "completions",
            req.model.model_id(),
            req.attribution.caller,
        )
        .tokens(resp.prompt_tokens.unwrap_or(resp.token_count() as u32))
        .job(req.attribution.job_id)
        .latency(resp.latency.as_millis() as u64)
        .request_id(resp.request_id.clone());

        let record = if status == CallStatus::Error {
            record.error(error_code.unwrap_or_else(|| "provider_error".to_string()))
        } else {
            record
        };

        self.usage_sink.record(record).await;
    }
}

fn backoff_delay(base: Duration, attempt: u32) -> Duration {
    let multiplier = 2u64.pow(attempt.min(5));
    base * multiplier as u32
}
