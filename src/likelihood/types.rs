//! Questions, per-candidate likelihoods and evaluation outcomes.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::prompts::{PromptTemplate, DEFAULT_PROMPT};

use super::error::ScoreError;

// =============================================================================
// Question
// =============================================================================

/// A multiple-choice question with exactly one correct answer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Question {
    #[serde(alias = "question")]
    pub text: String,
    pub correct_answer: String,
    #[serde(alias = "distractors")]
    pub incorrect_answers: Vec<String>,
}

impl Question {
    pub fn new<I, S>(
        text: impl Into<String>,
        correct_answer: impl Into<String>,
        incorrect: I,
    ) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            text: text.into(),
            correct_answer: correct_answer.into(),
            incorrect_answers: incorrect.into_iter().map(Into::into).collect(),
        }
    }

    /// Reject questions that cannot be scored before any request is made.
    pub fn validate(&self) -> Result<(), ScoreError> {
        if self.incorrect_answers.is_empty() {
            return Err(ScoreError::NoIncorrectAnswers);
        }
        if self.correct_answer.trim().is_empty() {
            return Err(ScoreError::EmptyAnswer { which: "correct" });
        }
        if self.incorrect_answers.iter().any(|a| a.trim().is_empty()) {
            return Err(ScoreError::EmptyAnswer { which: "incorrect" });
        }
        Ok(())
    }

    /// Correct answer first, then the distractors in order.
    pub fn candidates(&self) -> impl Iterator<Item = &str> {
        std::iter::once(self.correct_answer.as_str())
            .chain(self.incorrect_answers.iter().map(String::as_str))
    }
}

// =============================================================================
// Options
// =============================================================================

/// How per-token logprobs of a continuation collapse into one number.
///
/// `Mean` divides by the scored token count so longer answers are not
/// penalized for having more negative terms.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Aggregation {
    Sum,
    #[default]
    Mean,
}

impl Aggregation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Aggregation::Sum => "sum",
            Aggregation::Mean => "mean",
        }
    }
}

impl fmt::Display for Aggregation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Aggregation {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "sum" => Ok(Aggregation::Sum),
            "mean" | "avg" | "average" => Ok(Aggregation::Mean),
            other => Err(format!("unknown aggregation '{other}' (expected sum or mean)")),
        }
    }
}

/// Where the continuation starts in the echoed token sequence.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SplitStrategy {
    /// Echo the context alone and count its tokens.
    #[default]
    ContextEcho,
    /// Count context tokens client-side with `cl100k_base`.
    LocalTokenizer { adds_bos: bool },
}

#[derive(Debug, Clone)]
pub struct ScorerOptions {
    pub template: PromptTemplate,
    pub aggregation: Aggregation,
    pub split: SplitStrategy,
    /// Max candidate requests in flight per model. `None`: all at once.
    pub candidate_concurrency: Option<usize>,
}

impl Default for ScorerOptions {
    fn default() -> Self {
        Self {
            template: DEFAULT_PROMPT,
            aggregation: Aggregation::default(),
            split: SplitStrategy::default(),
            candidate_concurrency: None,
        }
    }
}

// =============================================================================
// Results
// =============================================================================

/// Aggregate log-likelihood of one candidate answer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LikelihoodResult {
    pub answer: String,
    pub loglikelihood: f64,
    /// Continuation tokens that contributed to the aggregate.
    pub token_count: usize,
}

/// Decision for one question against one model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvaluationOutcome {
    /// Correct answer's likelihood strictly exceeds every distractor's.
    pub answered_correctly: bool,
    /// Softmax share of the correct answer over all candidates, kept strictly
    /// inside (0, 1). Zero only for a rejected outcome.
    pub score: f64,
    pub correct: Option<LikelihoodResult>,
    pub incorrect: Vec<LikelihoodResult>,
}

impl EvaluationOutcome {
    /// "Incorrect, zero score", used when a model rejects the request.
    pub fn rejected() -> Self {
        Self {
            answered_correctly: false,
            score: 0.0,
            correct: None,
            incorrect: Vec::new(),
        }
    }
}

impl Default for EvaluationOutcome {
    fn default() -> Self {
        Self::rejected()
    }
}
