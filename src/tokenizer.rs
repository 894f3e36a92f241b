use tiktoken_rs::CoreBPE;
use tracing::debug;

use crate::{Result, ScraperError};

/// Counts and cuts text in model tokens.
pub trait TokenCounter: Send + Sync {
    /// Number of tokens `text` encodes to.
    fn count(&self, text: &str) -> usize;

    /// The text decoded from at most the first `max_tokens` tokens of `text`.
    fn truncate(&self, text: &str, max_tokens: usize) -> Result<String>;
}

/// A `TokenCounter` backed by a tiktoken byte-pair encoding.
pub struct TiktokenCounter {
    bpe: CoreBPE,
}

impl TiktokenCounter {
    /// Uses the model's own encoding when tiktoken knows it, `cl100k_base` otherwise.
    pub fn for_model(model: &str) -> Result<Self> {
        let bpe = match tiktoken_rs::get_bpe_from_model(model) {
            Ok(bpe) => bpe,
            Err(_) => {
                debug!("No tiktoken encoding for {}, using cl100k_base", model);
                tiktoken_rs::cl100k_base().map_err(|e| ScraperError::TokenizerError(e.to_string()))?
            }
        };
        Ok(Self { bpe })
    }
}

impl TokenCounter for TiktokenCounter {
    fn count(&self, text: &str) -> usize {
        self.bpe.encode_with_special_tokens(text).len()
    }

    fn truncate(&self, text: &str, max_tokens: usize) -> Result<String> {
        let tokens = self.bpe.encode_with_special_tokens(text);
        if tokens.len() <= max_tokens {
            return Ok(text.to_string());
        }
        // A token can hold part of a multi-byte character. Step the cut back until the
        // kept tokens decode to whole characters; an empty prefix always does.
        let mut end = max_tokens;
        loop {
            match self.bpe.decode(tokens[..end].to_vec()) {
                Ok(text) => return Ok(text),
                Err(e) if end == 0 => return Err(ScraperError::TokenizerError(e.to_string())),
                Err(_) => end -= 1,
            }
        }
    }
}

/// Text cut to a token budget, with the counts needed to report the cut.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Trimmed {
    pub text: String,
    pub original_tokens: usize,
    pub kept_tokens: usize,
}

impl Trimmed {
    pub fn was_truncated(&self) -> bool {
        self.kept_tokens < self.original_tokens
    }
}

/// Keeps the first `max_tokens` tokens of `text`. Anything past the budget is dropped,
/// which may cut a structure such as a table or list in half.
pub fn trim_to_token_limit(
    counter: &dyn TokenCounter,
    text: &str,
    max_tokens: usize,
) -> Result<Trimmed> {
    let original_tokens = counter.count(text);
    if original_tokens <= max_tokens {
        return Ok(Trimmed {
            text: text.to_string(),
            original_tokens,
            kept_tokens: original_tokens,
        });
    }

    let text = counter.truncate(text, max_tokens)?;
    let kept_tokens = counter.count(&text);
    Ok(Trimmed {
        text,
        original_tokens,
        kept_tokens,
    })
}
