#![forbid(unsafe_code)]

//! # quizscore
//!
//! Check whether a language model can tell the correct answer to a
//! multiple-choice question from its distractors, without letting it generate
//! anything.
//!
//! Each candidate answer is appended to a shared prompt and echoed back by an
//! OpenAI-compatible `/completions` endpoint with per-token log-probabilities.
//! The answer's tokens are aggregated into a log-likelihood; the model "knows"
//! the answer when the correct one is strictly the most likely, and the score
//! is the correct answer's softmax share across all candidates.

pub mod config;
pub mod gateway;
pub mod likelihood;
pub mod prompts;
pub mod tokenize;

pub use config::{ConfigError, ModelRegistry, ScorerConfig};
pub use gateway::{
    ApiCredential, CompletionGateway, EndpointConfig, ProviderError, ProviderGateway, UsageSink,
};
pub use likelihood::{
    evaluate_models, evaluate_question, Aggregation, BatchError, BatchOptions, EvaluationOutcome,
    LikelihoodScorer, ModelEvaluation, ModelSpec, ModelStatus, Question, ScoreError,
    ScorerOptions, SplitStrategy,
};
