//! Prompt templates for likelihood scoring.
//!
//! A template renders the shared context for a question. Each candidate
//! answer becomes a continuation of that context; only the continuation's
//! tokens are scored.

// =============================================================================
// Scoring prompt
// =============================================================================

/// Context and continuation for one (question, answer) pair.
///
/// The boundary is normalized so the same characters are scored whether the
/// server tokenizes `context` alone or `context + continuation`: trailing
/// whitespace on the context moves to the front of the continuation, and the
/// answer itself is trimmed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScoringPrompt {
    pub context: String,
    pub continuation: String,
}

impl ScoringPrompt {
    pub fn new(context: &str, answer: &str) -> Self {
        let trimmed_context = context.trim_end();
        let moved = &context[trimmed_context.len()..];
        // Exactly one separator: what the context ended with, or a single space.
        let separator = if moved.is_empty() { " " } else { moved };

        Self {
            context: trimmed_context.to_string(),
            continuation: format!("{separator}{}", answer.trim()),
        }
    }

    /// The full prompt sent for scoring.
    pub fn full(&self) -> String {
        format!("{}{}", self.context, self.continuation)
    }
}

// =============================================================================
// Prompt templates
// =============================================================================

/// A context template with a `{question}` placeholder.
#[derive(Debug, Clone, Copy)]
pub struct PromptTemplate {
    pub slug: &'static str,
    pub context: &'static str,
}

impl PromptTemplate {
    /// Render the shared context for a question.
    pub fn render_context(&self, question: &str) -> String {
        self.context.replace("{question}", question.trim())
    }

    /// Render context and continuation for one candidate answer.
    pub fn render(&self, question: &str, answer: &str) -> ScoringPrompt {
        ScoringPrompt::new(&self.render_context(question), answer)
    }
}

// =============================================================================
// Standard prompts
// =============================================================================

pub const PROMPT_ASSISTANT_V1: PromptTemplate = PromptTemplate {
    slug: "assistant_v1",
    context: "You are a friendly and helpful AI assistant. Please help me to answer the following question.\n\nQuestion {question}\n\nAnswer:",
};

/// Bare question/answer framing for base models that do better without an instruction.
pub const PROMPT_PLAIN_V1: PromptTemplate = PromptTemplate {
    slug: "plain_v1",
    context: "Question: {question}\nAnswer:",
};

pub const PROMPTS: &[PromptTemplate] = &[PROMPT_ASSISTANT_V1, PROMPT_PLAIN_V1];
pub const DEFAULT_PROMPT: PromptTemplate = PROMPT_ASSISTANT_V1;

pub fn prompt_by_slug(slug: &str) -> Option<PromptTemplate> {
    PROMPTS.iter().find(|t| t.slug == slug).copied()
}

// =============================================================================
// TESTS
// =============================================================================
