//! Core types for the completion gateway.

use serde::{Deserialize, Serialize};
use std::time::Duration;
use uuid::Uuid;

// =============================================================================
// ATTRIBUTION
// =============================================================================

/// Attribution for usage tracking and debugging.
///
/// Every request through the gateway carries attribution so usage records
/// can be tied back to the job and code path that issued them.
#[derive(Debug, Clone, Default)]
pub struct Attribution {
    /// Job this request is part of (one per evaluated question).
    pub job_id: Option<Uuid>,
    /// Which code path made this call, e.g. "likelihood::candidate".
    pub caller: &'static str,
}

impl Attribution {
    pub fn new(caller: &'static str) -> Self {
        Self {
            caller,
            ..Default::default()
        }
    }

    pub fn with_job(mut self, job_id: Uuid) -> Self {
        self.job_id = Some(job_id);
        self
    }
}

// =============================================================================
// COMPLETION TYPES
// =============================================================================

/// Model served by an OpenAI-compatible completion endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompletionModel(String);

impl CompletionModel {
    pub fn new(model_id: impl Into<String>) -> Self {
        Self(model_id.into())
    }

    pub fn model_id(&self) -> &str {
        &self.0
    }

    pub fn provider(&self) -> &'static str {
        "openai-compatible"
    }
}

/// Request for a completion, used here only in scoring (echo) mode.
#[derive(Debug, Clone)]
pub struct CompletionRequest {
    /// Model to use.
    pub model: CompletionModel,
    /// Raw prompt text.
    pub prompt: String,
    /// Return the prompt tokens with their logprobs.
    pub echo: bool,
    /// Newly generated tokens; zero for pure scoring.
    pub max_tokens: u32,
    /// Sampling temperature; zero for deterministic scoring.
    pub temperature: f32,
    /// Number of logprob alternatives per position.
    pub logprobs: u32,
    /// Attribution for usage tracking.
    pub attribution: Attribution,
}

impl CompletionRequest {
    /// Scoring request: echo the prompt, generate nothing, greedy, one alternative.
    pub fn scoring(
        model: CompletionModel,
        prompt: impl Into<String>,
        attribution: Attribution,
    ) -> Self {
        Self {
            model,
            prompt: prompt.into(),
            echo: true,
            max_tokens: 0,
            temperature: 0.0,
            logprobs: 1,
            attribution,
        }
    }
}

/// One echoed prompt token.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EchoedToken {
    /// The token string as the server segmented it.
    pub token: String,
    /// Log-probability of the token given everything before it.
    /// `None` for the first position, which has no preceding context.
    pub logprob: Option<f64>,
}

/// Response from a scoring completion.
#[derive(Debug, Clone)]
pub struct CompletionResponse {
    /// Echoed tokens, in order, with per-token logprobs.
    pub tokens: Vec<EchoedToken>,
    /// Prompt tokens reported in `usage`, if any.
    pub prompt_tokens: Option<u32>,
    /// Time taken for the request.
    pub latency: Duration,
    /// Request ID from the endpoint, if reported.
    pub request_id: Option<String>,
}

impl CompletionResponse {
    /// Per-token logprobs in echo order.
    pub fn token_logprobs(&self) -> Vec<Option<f64>> {
        self.tokens.iter().map(|t| t.logprob).collect()
    }

    pub fn token_count(&self) -> usize {
        self.tokens.len()
    }

    pub(crate) fn empty() -> Self {
        Self {
            tokens: Vec::new(),
            prompt_tokens: None,
            latency: Duration::from_millis(0),
            request_id: None,
        }
    }
}
