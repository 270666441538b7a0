//! Tokenizer capability used for prompt budgeting.

use std::sync::Arc;

/// Counts and truncates tokens.
///
/// Budget arithmetic must be deterministic for a given tokenizer, so implementations
/// must not depend on anything but the input text.
pub trait Tokenizer: Send + Sync + std::fmt::Debug {
    /// Number of tokens in `text`.
    fn count_tokens(&self, text: &str) -> usize;

    /// The longest prefix of `text` holding at most `max_tokens` tokens.
    fn truncate(&self, text: &str, max_tokens: usize) -> String;

    /// Get a human-readable name for this tokenizer.
    fn name(&self) -> &'static str {
        std::any::type_name::<Self>()
    }
}

/// Treats every whitespace-separated word as one token.
#[derive(Debug, Clone, Copy, Default)]
pub struct WhitespaceTokenizer;

impl WhitespaceTokenizer {
    /// Shared handle.
    pub fn shared() -> Arc<dyn Tokenizer> {
        Arc::new(Self)
    }
}

impl Tokenizer for WhitespaceTokenizer {
    fn count_tokens(&self, text: &str) -> usize {
        text.split_whitespace().count()
    }

    fn truncate(&self, text: &str, max_tokens: usize) -> String {
        if max_tokens == 0 {
            return String::new();
        }
        match text.split_whitespace().nth(max_tokens) {
            // cut right before the first word past the budget
            Some(first_excess) => {
                let offset = first_excess.as_ptr() as usize - text.as_ptr() as usize;
                text[..offset].trim_end().to_string()
            }
            None => text.to_string(),
        }
    }
}
