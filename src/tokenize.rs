//! Client-side token counting with tiktoken's `cl100k_base`.
//!
//! Only valid for models served with the same BPE (OpenAI's instruct models).
//! Self-hosted Llama/Mistral endpoints must use the context-echo split instead.

use once_cell::sync::OnceCell;
use tiktoken_rs::{cl100k_base, CoreBPE};

static CL100K: OnceCell<CoreBPE> = OnceCell::new();

#[derive(Debug, thiserror::Error)]
pub enum TokenizerError {
    #[error("Failed to load cl100k_base tokenizer: {0}")]
    Load(String),
}

fn bpe() -> Result<&'static CoreBPE, TokenizerError> {
    CL100K.get_or_try_init(|| cl100k_base().map_err(|e| TokenizerError::Load(e.to_string())))
}

/// Count tokens in `text`.
pub fn count_tokens(text: &str) -> Result<usize, TokenizerError> {
    Ok(bpe()?.encode_with_special_tokens(text).len())
}

/// Number of tokens the endpoint will echo for `context` alone.
///
/// Endpoints that prepend a BOS token echo one extra position.
pub fn context_token_count(context: &str, adds_bos: bool) -> Result<usize, TokenizerError> {
    Ok(count_tokens(context)? + usize::from(adds_bos))
}
