//! Error types for likelihood scoring.

use thiserror::Error;

use crate::gateway::ProviderError;
use crate::tokenize::TokenizerError;

#[derive(Debug, Error)]
pub enum ScoreError {
    /// Scoring needs at least one distractor to compare against.
    #[error("question has no incorrect answers to compare against")]
    NoIncorrectAnswers,

    #[error("{which} answer is empty")]
    EmptyAnswer { which: &'static str },

    #[error("provider error: {0}")]
    Provider(#[from] ProviderError),

    /// The continuation would start at or past the end of the echoed sequence.
    #[error(
        "continuation starts at token {context_tokens} but only {total_tokens} tokens were echoed"
    )]
    Alignment {
        context_tokens: usize,
        total_tokens: usize,
    },

    /// Every continuation position came back without a logprob.
    #[error("no scored tokens in continuation")]
    NoScoredTokens,

    #[error("tokenizer error: {0}")]
    Tokenizer(#[from] TokenizerError),
}
