//! Evaluate one question against several models concurrently.
//!
//! Each model's evaluation is isolated: a timeout, a rejected request, or an
//! unreachable endpoint is reported for that model alone while the others
//! still return scores.

use std::sync::Arc;
use std::time::Duration;

use futures::stream::{self, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use uuid::Uuid;

use crate::gateway::{
    ApiCredential, CompletionGateway, CompletionModel, EndpointConfig, ProviderError,
    ProviderGateway, UsageSink,
};

use super::error::ScoreError;
use super::scorer::LikelihoodScorer;
use super::types::{EvaluationOutcome, Question, ScorerOptions};

pub const DEFAULT_MODEL_TIMEOUT: Duration = Duration::from_secs(120);

// =============================================================================
// Types
// =============================================================================

/// A model to evaluate: display name plus the id the endpoint serves it under.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelSpec {
    pub name: String,
    pub model: CompletionModel,
}

impl ModelSpec {
    pub fn new(name: impl Into<String>, model_id: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            model: CompletionModel::new(model_id),
        }
    }
}

#[derive(Debug, Clone)]
pub struct BatchOptions {
    pub scorer: ScorerOptions,
    /// Budget for one model's whole evaluation (all of its requests).
    pub model_timeout: Duration,
    /// Max models evaluated at once. `None`: all of them.
    pub model_concurrency: Option<usize>,
}

impl Default for BatchOptions {
    fn default() -> Self {
        Self {
            scorer: ScorerOptions::default(),
            model_timeout: DEFAULT_MODEL_TIMEOUT,
            model_concurrency: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelStatus {
    Scored,
    /// The endpoint rejected the request; reported as incorrect with score 0.
    Rejected,
    TimedOut,
    Unreachable,
}

/// One row of a multi-model evaluation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelEvaluation {
    pub model: String,
    pub status: ModelStatus,
    pub answered_correctly: bool,
    pub score: f64,
    pub correct_loglikelihood: Option<f64>,
    pub incorrect_loglikelihoods: Vec<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ModelEvaluation {
    fn scored(model: &str, outcome: EvaluationOutcome) -> Self {
        Self {
            model: model.to_string(),
            status: ModelStatus::Scored,
            answered_correctly: outcome.answered_correctly,
            score: outcome.score,
            correct_loglikelihood: outcome.correct.map(|r| r.loglikelihood),
            incorrect_loglikelihoods: outcome
                .incorrect
                .iter()
                .map(|r| r.loglikelihood)
                .collect(),
            error: None,
        }
    }

    fn failed(model: &str, status: ModelStatus, error: String) -> Self {
        let outcome = EvaluationOutcome::rejected();
        Self {
            model: model.to_string(),
            status,
            answered_correctly: outcome.answered_correctly,
            score: outcome.score,
            correct_loglikelihood: None,
            incorrect_loglikelihoods: Vec::new(),
            error: Some(error),
        }
    }

    pub fn is_scored(&self) -> bool {
        self.status == ModelStatus::Scored
    }

    /// Correct answer's likelihood as a two-decimal string, empty when unscored.
    pub fn correct_loglikelihood_display(&self) -> String {
        self.correct_loglikelihood
            .map(|ll| format_loglikelihoods(&[ll]))
            .unwrap_or_default()
    }

    pub fn incorrect_loglikelihoods_display(&self) -> String {
        format_loglikelihoods(&self.incorrect_loglikelihoods)
    }
}

/// Two-decimal, comma-joined rendering of log-likelihoods.
pub fn format_loglikelihoods(values: &[f64]) -> String {
    values
        .iter()
        .map(|v| format!("{v:.2}"))
        .collect::<Vec<_>>()
        .join(",")
}

#[derive(Debug, thiserror::Error)]
pub enum BatchError {
    #[error("Invalid question: {0}")]
    InvalidQuestion(#[source] ScoreError),
    #[error("Gateway setup failed: {0}")]
    Gateway(#[from] ProviderError),
    #[error("Evaluation cancelled")]
    Cancelled,
}

// =============================================================================
// Classification
// =============================================================================

/// Map a per-model failure onto the status reported to the caller.
pub fn classify(err: &ScoreError) -> ModelStatus {
    match err {
        ScoreError::Provider(e) if e.is_timeout() => ModelStatus::TimedOut,
        ScoreError::Provider(e) if e.is_rejection() => ModelStatus::Rejected,
        ScoreError::Provider(_) | ScoreError::Tokenizer(_) => ModelStatus::Unreachable,
        // The endpoint answered, just not with anything we can score. Question
        // errors are caught before fan-out and land here only for direct callers.
        ScoreError::Alignment { .. }
        | ScoreError::NoScoredTokens
        | ScoreError::NoIncorrectAnswers
        | ScoreError::EmptyAnswer { .. } => ModelStatus::Rejected,
    }
}

// =============================================================================
// Orchestrator
// =============================================================================

async fn evaluate_one(
    gateway: &dyn CompletionGateway,
    spec: &ModelSpec,
    question: &Question,
    options: &BatchOptions,
    job_id: Uuid,
) -> ModelEvaluation {
    let scorer = LikelihoodScorer::new(gateway, spec.model.clone(), options.scorer.clone())
        .with_job(job_id);

    match timeout(options.model_timeout, scorer.evaluate(question)).await {
        Ok(Ok(outcome)) => ModelEvaluation::scored(&spec.name, outcome),
        Ok(Err(err)) => {
            let status = classify(&err);
            warn!(
                model = %spec.name,
                model_id = spec.model.model_id(),
                status = ?status,
                error = %err,
                "model evaluation failed"
            );
            ModelEvaluation::failed(&spec.name, status, err.to_string())
        }
        Err(_) => {
            warn!(
                model = %spec.name,
                timeout_ms = options.model_timeout.as_millis() as u64,
                "model evaluation timed out"
            );
            ModelEvaluation::failed(
                &spec.name,
                ModelStatus::TimedOut,
                format!("timeout after {:?}", options.model_timeout),
            )
        }
    }
}

/// Evaluate `question` against every model in `models`.
///
/// Results are returned in the order of `models`. Questions that cannot be
/// scored at all are rejected up front. If `cancel` fires, every in-flight
/// request is dropped and nothing is returned.
pub async fn evaluate_models(
    gateway: &dyn CompletionGateway,
    models: &[ModelSpec],
    question: &Question,
    options: &BatchOptions,
    cancel: Option<&CancellationToken>,
) -> Result<Vec<ModelEvaluation>, BatchError> {
    question.validate().map_err(BatchError::InvalidQuestion)?;

    if cancel.is_some_and(|c| c.is_cancelled()) {
        return Err(BatchError::Cancelled);
    }

    let job_id = Uuid::new_v4();
    let concurrency = options.model_concurrency.unwrap_or(models.len()).max(1);

    let run = stream::iter(
        models
            .iter()
            .map(|spec| evaluate_one(gateway, spec, question, options, job_id)),
    )
    .buffered(concurrency)
    .collect::<Vec<_>>();

    let results = match cancel {
        Some(token) => {
            tokio::select! {
                biased;
                _ = token.cancelled() => return Err(BatchError::Cancelled),
                results = run => results,
            }
        }
        None => run.await,
    };

    let count = |status: ModelStatus| results.iter().filter(|r| r.status == status).count();
    info!(
        job_id = %job_id,
        models = results.len(),
        scored = count(ModelStatus::Scored),
        rejected = count(ModelStatus::Rejected),
        timed_out = count(ModelStatus::TimedOut),
        unreachable = count(ModelStatus::Unreachable),
        "question evaluated"
    );

    Ok(results)
}

/// Build a fresh gateway from a caller-supplied credential and evaluate.
pub async fn evaluate_question<U: UsageSink + 'static>(
    endpoint: &EndpointConfig,
    credential: &ApiCredential,
    usage_sink: Arc<U>,
    models: &[ModelSpec],
    question: &Question,
    options: &BatchOptions,
    cancel: Option<&CancellationToken>,
) -> Result<Vec<ModelEvaluation>, BatchError> {
    let gateway = ProviderGateway::connect(endpoint, credential, usage_sink)?;
    evaluate_models(&gateway, models, question, options, cancel).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classify_separates_timeouts_from_rejections() {
        let timeout = ScoreError::Provider(ProviderError::Timeout(Duration::from_secs(1), None));
        let rejected = ScoreError::Provider(ProviderError::invalid_request("unknown model"));
        let down = ScoreError::Provider(ProviderError::provider("completions", "502", true));

        assert_eq!(classify(&timeout), ModelStatus::TimedOut);
        assert_eq!(classify(&rejected), ModelStatus::Rejected);
        assert_eq!(classify(&down), ModelStatus::Unreachable);
        assert_eq!(classify(&ScoreError::NoScoredTokens), ModelStatus::Rejected);
        assert_eq!(classify(&ScoreError::NoIncorrectAnswers), ModelStatus::Rejected);
        assert_eq!(
            classify(&ScoreError::Alignment {
                context_tokens: 4,
                total_tokens: 4,
            }),
            ModelStatus::Rejected
        );
    }

    #[test]
    fn failed_rows_default_to_incorrect_zero() {
        let row = ModelEvaluation::failed("m", ModelStatus::Rejected, "bad".into());
        assert!(!row.answered_correctly);
        assert_eq!(row.score, 0.0);
        assert!(!row.is_scored());
    }

    #[test]
    fn loglikelihoods_render_with_two_decimals() {
        assert_eq!(format_loglikelihoods(&[-12.039, -13.0157]), "-12.04,-13.02");
        assert_eq!(format_loglikelihoods(&[]), "");
    }

    #[test]
    fn model_status_serializes_snake_case() {
        let s = serde_json::to_string(&ModelStatus::TimedOut).unwrap();
        assert_eq!(s, "\"timed_out\"");
    }
}
