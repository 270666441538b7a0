//! Token-aware text splitting.

use std::sync::Arc;

use crate::error::{Result, TrellisError};
use crate::traits::Tokenizer;

/// Splits text on a separator into chunks of at most `chunk_size` tokens, with up to
/// `chunk_overlap` tokens repeated between neighbouring chunks.
#[derive(Debug, Clone)]
pub struct TokenTextSplitter {
    chunk_size: usize,
    chunk_overlap: usize,
    separator: String,
    tokenizer: Arc<dyn Tokenizer>,
}

impl TokenTextSplitter {
    /// Create a splitter. The overlap must be smaller than the chunk size.
    pub fn new(chunk_size: usize, chunk_overlap: usize, tokenizer: Arc<dyn Tokenizer>) -> Result<Self> {
        if chunk_size == 0 {
            return Err(TrellisError::configuration("chunk size must be positive"));
        }
        if chunk_overlap >= chunk_size {
            return Err(TrellisError::configuration(format!(
                "chunk overlap ({chunk_overlap}) must be smaller than chunk size ({chunk_size})"
            )));
        }
        Ok(Self {
            chunk_size,
            chunk_overlap,
            separator: " ".to_string(),
            tokenizer,
        })
    }

    /// Split on `separator` instead of a single space.
    #[must_use]
    pub fn with_separator(mut self, separator: impl Into<String>) -> Self {
        self.separator = separator.into();
        self
    }

    /// Maximum tokens per chunk.
    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    /// Tokens shared between neighbouring chunks.
    pub fn chunk_overlap(&self) -> usize {
        self.chunk_overlap
    }

    /// Split `text` into chunks.
    pub fn split_text(&self, text: &str) -> Vec<String> {
        if text.trim().is_empty() {
            return Vec::new();
        }
        let sep_tokens = self.tokenizer.count_tokens(&self.separator);
        let mut chunks = Vec::new();
        let mut window: Vec<(String, usize)> = Vec::new();
        let mut window_tokens = 0usize;

        let cost = |window: &[(String, usize)], tokens: usize| -> usize {
            tokens + window.len().saturating_sub(1) * sep_tokens
        };

        for word in text.split(self.separator.as_str()).filter(|w| !w.is_empty()) {
            let tokens = self.tokenizer.count_tokens(word);
            if tokens > self.chunk_size {
                if !window.is_empty() {
                    chunks.push(self.join(&window));
                    window.clear();
                    window_tokens = 0;
                }
                chunks.extend(self.split_long_word(word));
                continue;
            }

            let extra_sep = if window.is_empty() { 0 } else { sep_tokens };
            if !window.is_empty()
                && cost(&window, window_tokens) + extra_sep + tokens > self.chunk_size
            {
                chunks.push(self.join(&window));
                // keep a tail of at most `chunk_overlap` tokens that leaves room for `word`
                while !window.is_empty()
                    && (cost(&window, window_tokens) > self.chunk_overlap
                        || cost(&window, window_tokens) + sep_tokens + tokens > self.chunk_size)
                {
                    let (_, dropped) = window.remove(0);
                    window_tokens -= dropped;
                }
            }
            window.push((word.to_string(), tokens));
            window_tokens += tokens;
        }

        if !window.is_empty() {
            chunks.push(self.join(&window));
        }
        chunks
    }

    /// The first chunk of `text`.
    pub fn truncate_text(&self, text: &str) -> String {
        self.tokenizer.truncate(text, self.chunk_size)
    }

    fn join(&self, window: &[(String, usize)]) -> String {
        window
            .iter()
            .map(|(w, _)| w.as_str())
            .collect::<Vec<_>>()
            .join(&self.separator)
    }

    fn split_long_word(&self, word: &str) -> Vec<String> {
        let mut pieces = Vec::new();
        let mut rest = word;
        while !rest.is_empty() {
            let piece = self.tokenizer.truncate(rest, self.chunk_size);
            match rest.strip_prefix(piece.as_str()) {
                Some(remaining) if !piece.is_empty() => {
                    pieces.push(piece);
                    rest = remaining;
                }
                _ => {
                    pieces.push(piece);
                    break;
                }
            }
        }
        pieces.retain(|p| !p.is_empty());
        pieces
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::traits::WhitespaceTokenizer;

    fn splitter(size: usize, overlap: usize) -> TokenTextSplitter {
        TokenTextSplitter::new(size, overlap, WhitespaceTokenizer::shared()).unwrap()
    }

    #[test]
    fn test_chunks_respect_size() {
        let text = "a b c d e f g";
        let chunks = splitter(3, 0).split_text(text);
        assert_eq!(chunks, vec!["a b c", "d e f", "g"]);
    }

    #[test]
    fn test_chunks_overlap() {
        let chunks = splitter(4, 1).split_text("a b c d e f g");
        assert_eq!(chunks, vec!["a b c d", "d e f g"]);
    }

    #[test]
    fn test_text_that_fits_is_one_chunk() {
        assert_eq!(splitter(100, 10).split_text("short text"), vec!["short text"]);
        assert!(splitter(100, 10).split_text("   ").is_empty());
    }

    #[test]
    fn test_invalid_overlap_is_configuration_error() {
        let err = TokenTextSplitter::new(4, 4, WhitespaceTokenizer::shared()).unwrap_err();
        assert!(matches!(err, TrellisError::Configuration { .. }));
    }
}
