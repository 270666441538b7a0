//! BPE tokenizer backed by tiktoken-rs.

use std::fmt;
use std::sync::Arc;
use tiktoken_rs::CoreBPE;

use trellis_core::traits::Tokenizer;
use trellis_core::{Result, TrellisError};

/// Counts tokens with the `cl100k_base` encoding used by current OpenAI models.
pub struct TiktokenTokenizer {
    bpe: CoreBPE,
}

impl fmt::Debug for TiktokenTokenizer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TiktokenTokenizer").finish_non_exhaustive()
    }
}

impl TiktokenTokenizer {
    /// Load the `cl100k_base` encoding.
    pub fn cl100k() -> Result<Self> {
        let bpe = tiktoken_rs::cl100k_base()
            .map_err(|e| TrellisError::configuration(format!("failed to load cl100k_base: {e}")))?;
        Ok(Self { bpe })
    }

    /// The tokenizer behind a shared handle.
    pub fn shared() -> Result<Arc<dyn Tokenizer>> {
        Ok(Arc::new(Self::cl100k()?))
    }
}

impl Tokenizer for TiktokenTokenizer {
    fn count_tokens(&self, text: &str) -> usize {
        self.bpe.encode_with_special_tokens(text).len()
    }

    fn truncate(&self, text: &str, max_tokens: usize) -> String {
        let tokens = self.bpe.encode_with_special_tokens(text);
        if tokens.len() <= max_tokens {
            return text.to_string();
        }
        // A cut inside a multi-byte character fails to decode; back off a token at a time.
        let mut end = max_tokens;
        while end > 0 {
            if let Ok(prefix) = self.bpe.decode(tokens[..end].to_vec()) {
                return prefix;
            }
            end -= 1;
        }
        String::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counts_and_truncates() {
        let tokenizer = TiktokenTokenizer::cl100k().unwrap();
        let text = "The quick brown fox jumps over the lazy dog";
        let count = tokenizer.count_tokens(text);
        assert!(count > 0);
        assert_eq!(tokenizer.truncate(text, count), text);

        let prefix = tokenizer.truncate(text, 3);
        assert!(text.starts_with(&prefix));
        assert_eq!(tokenizer.count_tokens(&prefix), 3);
    }
}
