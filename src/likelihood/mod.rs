//! Multiple-choice answer scoring by log-likelihood.
//!
//! A model "answers correctly" when the correct answer's continuation is
//! strictly more likely than every distractor's. The score is the correct
//! answer's softmax share across all candidates.

pub mod aggregate;
pub mod batch;
pub mod error;
pub mod scorer;
pub mod types;

pub use aggregate::{aggregate_continuation, candidate_logits, decide, softmax};
pub use batch::{
    classify, evaluate_models, evaluate_question, format_loglikelihoods, BatchError, BatchOptions,
    ModelEvaluation, ModelSpec, ModelStatus, DEFAULT_MODEL_TIMEOUT,
};
pub use error::ScoreError;
pub use scorer::LikelihoodScorer;
pub use types::{
    Aggregation, EvaluationOutcome, LikelihoodResult, Question, ScorerOptions, SplitStrategy,
};
