//! Token counting for conversation histories.

use tiktoken_rs::CoreBPE;

use crate::error::{Error, Result};
use crate::types::ChatMessage;

/// Counts the tokens a piece of text occupies in a model's context window.
pub trait TokenCounter: Send + Sync {
    /// Number of tokens in `text`.
    fn count(&self, text: &str) -> usize;
}

/// Counter backed by the `cl100k_base` encoding used by the GPT-3.5/GPT-4 families.
pub struct Cl100kCounter {
    bpe: CoreBPE,
}

impl Cl100kCounter {
    /// Loads the `cl100k_base` encoding.
    pub fn new() -> Result<Self> {
        let bpe = tiktoken_rs::cl100k_base().map_err(|err| {
            Error::configuration(format!("failed to load cl100k_base encoding: {err}"), None)
        })?;
        Ok(Self { bpe })
    }
}

impl TokenCounter for Cl100kCounter {
    fn count(&self, text: &str) -> usize {
        self.bpe.encode_with_special_tokens(text).len()
    }
}

/// Sums the token counts of every message's content; roles are not counted.
pub fn count_history(counter: &dyn TokenCounter, messages: &[ChatMessage]) -> usize {
    messages
        .iter()
        .map(|message| counter.count(&message.content))
        .sum()
}
