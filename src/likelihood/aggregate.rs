//! Turning echoed logprobs into per-candidate likelihoods and a decision.

use super::error::ScoreError;
use super::types::{Aggregation, EvaluationOutcome, LikelihoodResult};

/// Aggregate the continuation's logprobs, starting at `continuation_start`.
///
/// Null entries (the first echoed position has no conditioning context) are
/// skipped rather than treated as errors.
pub fn aggregate_continuation(
    answer: &str,
    token_logprobs: &[Option<f64>],
    continuation_start: usize,
    aggregation: Aggregation,
) -> Result<LikelihoodResult, ScoreError> {
    if continuation_start >= token_logprobs.len() {
        return Err(ScoreError::Alignment {
            context_tokens: continuation_start,
            total_tokens: token_logprobs.len(),
        });
    }

    let (sum, count) = token_logprobs[continuation_start..]
        .iter()
        .flatten()
        .fold((0.0_f64, 0_usize), |(sum, count), lp| (sum + lp, count + 1));

    if count == 0 {
        return Err(ScoreError::NoScoredTokens);
    }

    let loglikelihood = match aggregation {
        Aggregation::Sum => sum,
        Aggregation::Mean => sum / count as f64,
    };

    Ok(LikelihoodResult {
        answer: answer.to_string(),
        loglikelihood,
        token_count: count,
    })
}

/// Numerically stable softmax.
pub fn softmax(logits: &[f64]) -> Vec<f64> {
    let max = logits.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    if !max.is_finite() {
        return vec![0.0; logits.len()];
    }
    let exps: Vec<f64> = logits.iter().map(|x| (x - max).exp()).collect();
    let total: f64 = exps.iter().sum();
    exps.into_iter().map(|e| e / total).collect()
}

/// Mean continuation length across all candidates.
fn average_token_count(correct: &LikelihoodResult, incorrect: &[LikelihoodResult]) -> f64 {
    let total: usize = correct.token_count + incorrect.iter().map(|r| r.token_count).sum::<usize>();
    total as f64 / (incorrect.len() + 1) as f64
}

/// Softmax inputs for `[correct, incorrect...]`.
///
/// Mean likelihoods are rescaled by the average continuation length so the
/// distribution is over comparable magnitudes; sums are used as-is.
pub fn candidate_logits(
    correct: &LikelihoodResult,
    incorrect: &[LikelihoodResult],
    aggregation: Aggregation,
) -> Vec<f64> {
    let scale = match aggregation {
        Aggregation::Sum => 1.0,
        Aggregation::Mean => average_token_count(correct, incorrect),
    };
    std::iter::once(correct)
        .chain(incorrect.iter())
        .map(|r| r.loglikelihood * scale)
        .collect()
}

/// Smallest and largest score `decide` reports. Far-apart likelihoods would
/// otherwise underflow the softmax to exactly 0 or 1.
pub const MIN_SCORE: f64 = f64::MIN_POSITIVE;
pub const MAX_SCORE: f64 = 1.0 - f64::EPSILON;

/// Decide whether the model prefers the correct answer and how strongly.
///
/// A tie with any distractor is not a correct answer.
pub fn decide(
    correct: LikelihoodResult,
    incorrect: Vec<LikelihoodResult>,
    aggregation: Aggregation,
) -> Result<EvaluationOutcome, ScoreError> {
    if incorrect.is_empty() {
        return Err(ScoreError::NoIncorrectAnswers);
    }

    let answered_correctly = incorrect
        .iter()
        .all(|r| correct.loglikelihood > r.loglikelihood);

    let distribution = softmax(&candidate_logits(&correct, &incorrect, aggregation));
    let score = distribution[0].clamp(MIN_SCORE, MAX_SCORE);

    Ok(EvaluationOutcome {
        answered_correctly,
        score,
        correct: Some(correct),
        incorrect,
    })
}
