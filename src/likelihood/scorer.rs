//! Per-model answer-likelihood scorer.
//!
//! For one question and one model:
//! 1. Render the shared context and one continuation per candidate.
//! 2. Echo `context + continuation` for every candidate, and find where the
//!    continuation starts (context-only echo, or client-side tokenizer).
//!    All of these requests are independent and run concurrently.
//! 3. Aggregate each continuation's logprobs and decide.

use futures::stream::{self, StreamExt, TryStreamExt};
use tracing::debug;
use uuid::Uuid;

use crate::gateway::{
    Attribution, CompletionGateway, CompletionModel, CompletionRequest, CompletionResponse,
};
use crate::prompts::ScoringPrompt;
use crate::tokenize;

use super::aggregate::{aggregate_continuation, decide};
use super::error::ScoreError;
use super::types::{EvaluationOutcome, LikelihoodResult, Question, ScorerOptions, SplitStrategy};

const CALLER_CONTEXT: &str = "likelihood::context";
const CALLER_CANDIDATE: &str = "likelihood::candidate";

pub struct LikelihoodScorer<'a> {
    gateway: &'a dyn CompletionGateway,
    model: CompletionModel,
    options: ScorerOptions,
    job_id: Option<Uuid>,
}

impl<'a> LikelihoodScorer<'a> {
    pub fn new(
        gateway: &'a dyn CompletionGateway,
        model: CompletionModel,
        options: ScorerOptions,
    ) -> Self {
        Self {
            gateway,
            model,
            options,
            job_id: None,
        }
    }

    /// Tag every request with a job id for usage records.
    pub fn with_job(mut self, job_id: Uuid) -> Self {
        self.job_id = Some(job_id);
        self
    }

    pub fn model(&self) -> &CompletionModel {
        &self.model
    }

    fn attribution(&self, caller: &'static str) -> Attribution {
        let attribution = Attribution::new(caller);
        match self.job_id {
            Some(id) => attribution.with_job(id),
            None => attribution,
        }
    }

    async fn echo(
        &self,
        prompt: String,
        caller: &'static str,
    ) -> Result<CompletionResponse, ScoreError> {
        let req = CompletionRequest::scoring(self.model.clone(), prompt, self.attribution(caller));
        Ok(self.gateway.complete(req).await?)
    }

    /// Number of echoed positions that belong to `context` alone.
    pub async fn context_token_count(&self, context: &str) -> Result<usize, ScoreError> {
        match self.options.split {
            SplitStrategy::ContextEcho => {
                let resp = self.echo(context.to_string(), CALLER_CONTEXT).await?;
                Ok(resp.token_count())
            }
            SplitStrategy::LocalTokenizer { adds_bos } => {
                Ok(tokenize::context_token_count(context, adds_bos)?)
            }
        }
    }

    /// Log-likelihood of a single answer to a question.
    pub async fn loglikelihood(
        &self,
        question: &str,
        answer: &str,
    ) -> Result<LikelihoodResult, ScoreError> {
        let prompt = self.options.template.render(question, answer);
        let (context_tokens, full) = tokio::try_join!(
            self.context_token_count(&prompt.context),
            self.echo(prompt.full(), CALLER_CANDIDATE),
        )?;
        aggregate_continuation(
            answer.trim(),
            &full.token_logprobs(),
            context_tokens,
            self.options.aggregation,
        )
    }

    /// Score a question: does the model prefer the correct answer, and by how much?
    pub async fn evaluate(&self, question: &Question) -> Result<EvaluationOutcome, ScoreError> {
        question.validate()?;

        let context = self.options.template.render_context(&question.text);
        let prompts: Vec<ScoringPrompt> = question
            .candidates()
            .map(|answer| ScoringPrompt::new(&context, answer))
            .collect();
        // Every prompt shares the same normalized context.
        let shared_context = prompts[0].context.clone();

        let concurrency = self
            .options
            .candidate_concurrency
            .unwrap_or(prompts.len())
            .max(1);

        let candidates = stream::iter(prompts.iter().map(|p| self.echo(p.full(), CALLER_CANDIDATE)))
        .buffered(concurrency)
        .try_collect::<Vec<CompletionResponse>>();

        let (context_tokens, echoes) =
            tokio::try_join!(self.context_token_count(&shared_context), candidates)?;

        let mut results = question
            .candidates()
            .zip(echoes.iter())
            .map(|(answer, echo)| {
                aggregate_continuation(
                    answer.trim(),
                    &echo.token_logprobs(),
                    context_tokens,
                    self.options.aggregation,
                )
            })
            .collect::<Result<Vec<_>, _>>()?;

        let incorrect = results.split_off(1);
        let correct = results.remove(0);

        debug!(
            model = self.model.model_id(),
            context_tokens,
            correct = correct.loglikelihood,
            incorrect = ?incorrect.iter().map(|r| r.loglikelihood).collect::<Vec<_>>(),
            "scored candidates"
        );

        decide(correct, incorrect, self.options.aggregation)
    }
}
