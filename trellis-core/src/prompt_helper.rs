//! Context-window budgeting.
//!
//! [`PromptHelper`] works out how many tokens of data fit into one LLM call once the
//! prompt scaffold and the reserved completion budget are accounted for, and shapes
//! node text to that budget.

use std::sync::Arc;
use tracing::debug;

use crate::config::PromptHelperConfig;
use crate::error::{Result, TrellisError};
use crate::prompts::PromptTemplate;
use crate::text_splitter::TokenTextSplitter;
use crate::traits::{LlmMetadata, Tokenizer};
use crate::types::Node;

/// Padding reserved per chunk when joining plain text.
pub const PLAIN_TEXT_PADDING: usize = 1;

/// Padding reserved per chunk for `(n)` numbering and its separators.
pub const NUMBERED_TEXT_PADDING: usize = 5;

fn to_i64(value: usize) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}

/// Computes chunk budgets for a fixed context window.
#[derive(Debug, Clone)]
pub struct PromptHelper {
    max_input_size: usize,
    num_output: usize,
    max_chunk_overlap: usize,
    embedding_limit: Option<usize>,
    chunk_size_limit: Option<usize>,
    separator: String,
    tokenizer: Arc<dyn Tokenizer>,
}

impl PromptHelper {
    /// Create a helper for a window of `max_input_size` tokens with `num_output` tokens
    /// reserved for the completion.
    pub fn new(
        max_input_size: usize,
        num_output: usize,
        max_chunk_overlap: usize,
        tokenizer: Arc<dyn Tokenizer>,
    ) -> Self {
        Self {
            max_input_size,
            num_output,
            max_chunk_overlap,
            embedding_limit: None,
            chunk_size_limit: None,
            separator: " ".to_string(),
            tokenizer,
        }
    }

    /// Size the window from model metadata.
    pub fn from_llm_metadata(
        metadata: &LlmMetadata,
        max_chunk_overlap: usize,
        tokenizer: Arc<dyn Tokenizer>,
    ) -> Self {
        Self::new(
            metadata.context_window,
            metadata.num_output,
            max_chunk_overlap,
            tokenizer,
        )
    }

    /// Build from configuration.
    pub fn from_config(config: &PromptHelperConfig, tokenizer: Arc<dyn Tokenizer>) -> Self {
        Self {
            max_input_size: config.max_input_size,
            num_output: config.num_output,
            max_chunk_overlap: config.max_chunk_overlap,
            embedding_limit: config.embedding_limit,
            chunk_size_limit: config.chunk_size_limit,
            separator: config.separator.clone(),
            tokenizer,
        }
    }

    /// Cap every chunk at `limit` tokens.
    #[must_use]
    pub fn with_embedding_limit(mut self, limit: usize) -> Self {
        self.embedding_limit = Some(limit);
        self
    }

    /// Cap every chunk at `limit` tokens (applied after the embedding limit).
    #[must_use]
    pub fn with_chunk_size_limit(mut self, limit: usize) -> Self {
        self.chunk_size_limit = Some(limit);
        self
    }

    /// Separator used by the splitters this helper builds.
    #[must_use]
    pub fn with_separator(mut self, separator: impl Into<String>) -> Self {
        self.separator = separator.into();
        self
    }

    /// Total window size.
    pub fn max_input_size(&self) -> usize {
        self.max_input_size
    }

    /// Reserved completion budget.
    pub fn num_output(&self) -> usize {
        self.num_output
    }

    /// The tokenizer all budgets are measured with.
    pub fn tokenizer(&self) -> &Arc<dyn Tokenizer> {
        &self.tokenizer
    }

    /// `floor((max_input_size - prompt_tokens - num_output) / num_chunks) - padding`,
    /// capped by the embedding and chunk size limits.
    ///
    /// A non-positive result means the scaffold alone does not fit and is a
    /// configuration error.
    pub fn chunk_size_for_prompt_tokens(
        &self,
        prompt_tokens: usize,
        num_chunks: usize,
        padding: usize,
    ) -> Result<usize> {
        if num_chunks == 0 {
            return Err(TrellisError::validation("num_chunks must be at least 1"));
        }
        let available = to_i64(self.max_input_size) - to_i64(prompt_tokens) - to_i64(self.num_output);
        let mut chunk_size = available.div_euclid(to_i64(num_chunks)) - to_i64(padding);
        if let Some(limit) = self.embedding_limit {
            chunk_size = chunk_size.min(to_i64(limit));
        }
        if let Some(limit) = self.chunk_size_limit {
            chunk_size = chunk_size.min(to_i64(limit));
        }
        if chunk_size <= 0 {
            return Err(TrellisError::configuration(format!(
                "context window too small: max_input_size={}, prompt_tokens={prompt_tokens}, \
                 num_output={}, num_chunks={num_chunks}, padding={padding} leaves chunk size {chunk_size}",
                self.max_input_size, self.num_output
            )));
        }
        usize::try_from(chunk_size).map_err(|e| TrellisError::internal(e.to_string()))
    }

    /// Chunk size available next to `prompt_text`, which should already have its
    /// variables blanked.
    pub fn get_chunk_size_given_prompt(
        &self,
        prompt_text: &str,
        num_chunks: usize,
        padding: usize,
    ) -> Result<usize> {
        let prompt_tokens = self.tokenizer.count_tokens(prompt_text);
        let chunk_size = self.chunk_size_for_prompt_tokens(prompt_tokens, num_chunks, padding)?;
        debug!(prompt_tokens, num_chunks, padding, chunk_size, "Computed chunk size");
        Ok(chunk_size)
    }

    /// Chunk size available next to a template's scaffold.
    pub fn get_chunk_size_given_template(
        &self,
        prompt: &PromptTemplate,
        num_chunks: usize,
        padding: usize,
    ) -> Result<usize> {
        self.get_chunk_size_given_prompt(&prompt.scaffold(), num_chunks, padding)
    }

    /// A splitter whose chunks fit `num_chunks` times into `prompt`, with an overlap of
    /// `max_chunk_overlap / num_chunks`.
    pub fn get_text_splitter_given_prompt(
        &self,
        prompt: &PromptTemplate,
        num_chunks: usize,
        padding: usize,
    ) -> Result<TokenTextSplitter> {
        let chunk_size = self.get_chunk_size_given_template(prompt, num_chunks, padding)?;
        let overlap = (self.max_chunk_overlap / num_chunks).min(chunk_size.saturating_sub(1));
        Ok(TokenTextSplitter::new(chunk_size, overlap, Arc::clone(&self.tokenizer))?
            .with_separator(self.separator.clone()))
    }

    fn per_node_budget(
        &self,
        prompt: Option<&PromptTemplate>,
        num_nodes: usize,
        padding: usize,
    ) -> Result<Option<usize>> {
        match prompt {
            Some(prompt) if num_nodes > 0 => Ok(Some(
                self.get_chunk_size_given_template(prompt, num_nodes, padding)?,
            )),
            _ => Ok(None),
        }
    }

    /// Node texts joined by newlines, each truncated to its share of `prompt`'s window.
    pub fn get_text_from_nodes(&self, nodes: &[Node], prompt: Option<&PromptTemplate>) -> Result<String> {
        let budget = self.per_node_budget(prompt, nodes.len(), PLAIN_TEXT_PADDING)?;
        let texts: Vec<String> = nodes
            .iter()
            .map(|node| match budget {
                Some(max) => self.tokenizer.truncate(node.get_text(), max),
                None => node.get_text().to_string(),
            })
            .collect();
        Ok(texts.join("\n"))
    }

    /// Node texts as a `(1) ...`, `(2) ...` list, each line flattened and truncated to
    /// its share of `prompt`'s window.
    pub fn get_numbered_text_from_nodes(
        &self,
        nodes: &[Node],
        prompt: Option<&PromptTemplate>,
    ) -> Result<String> {
        let budget = self.per_node_budget(prompt, nodes.len(), NUMBERED_TEXT_PADDING)?;
        let mut results = Vec::with_capacity(nodes.len());
        for (i, node) in nodes.iter().enumerate() {
            let flattened = node.get_text().lines().collect::<Vec<_>>().join(" ");
            let text = format!("({}) {flattened}", i + 1);
            let text = match budget {
                Some(max) => self.tokenizer.truncate(&text, max),
                None => text,
            };
            results.push(text);
        }
        Ok(results.join("\n\n"))
    }

    /// Each text truncated so that all of them fit into `prompt` together.
    pub fn truncate_texts(&self, prompt: &PromptTemplate, texts: &[String]) -> Result<Vec<String>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        let max = self.get_chunk_size_given_template(prompt, texts.len(), PLAIN_TEXT_PADDING)?;
        Ok(texts
            .iter()
            .map(|t| self.tokenizer.truncate(t, max))
            .collect())
    }

    /// Repack texts into as few chunks as fit one at a time into `prompt`.
    pub fn compact_text_chunks(&self, prompt: &PromptTemplate, texts: &[String]) -> Result<Vec<String>> {
        let combined = texts
            .iter()
            .map(|t| t.trim())
            .filter(|t| !t.is_empty())
            .collect::<Vec<_>>()
            .join("\n\n");
        let splitter = self.get_text_splitter_given_prompt(prompt, 1, PLAIN_TEXT_PADDING)?;
        Ok(splitter.split_text(&combined))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::prompts::{PromptType, default_prompt};
    use crate::traits::WhitespaceTokenizer;
    use test_case::test_case;

    fn helper(max_input: usize, num_output: usize) -> PromptHelper {
        PromptHelper::new(max_input, num_output, 20, WhitespaceTokenizer::shared())
    }

    #[test]
    fn test_reference_chunk_size() {
        let helper = helper(4096, 256);
        assert_eq!(helper.chunk_size_for_prompt_tokens(50, 2, 1).unwrap(), 1894);

        let prompt_text = vec!["word"; 50].join(" ");
        assert_eq!(helper.get_chunk_size_given_prompt(&prompt_text, 2, 1).unwrap(), 1894);
    }

    #[test_case(4096, 256, 50, 1, 1 => 3789 ; "single chunk")]
    #[test_case(4096, 256, 0, 3, 5 => 1275 ; "numbered padding")]
    #[test_case(1000, 100, 99, 4, 0 => 200 ; "exact division")]
    #[test_case(1000, 100, 100, 3, 1 => 265 ; "floor division")]
    fn test_chunk_size_formula(max_input: usize, num_output: usize, prompt: usize, chunks: usize, padding: usize) -> usize {
        helper(max_input, num_output)
            .chunk_size_for_prompt_tokens(prompt, chunks, padding)
            .unwrap()
    }

    #[test]
    fn test_embedding_limit_caps_chunk_size() {
        let helper = helper(4096, 256).with_embedding_limit(512);
        assert_eq!(helper.chunk_size_for_prompt_tokens(50, 2, 1).unwrap(), 512);
    }

    #[test]
    fn test_non_positive_chunk_size_is_configuration_error() {
        let helper = helper(100, 90);
        let err = helper.chunk_size_for_prompt_tokens(9, 1, 1).unwrap_err();
        assert!(matches!(err, TrellisError::Configuration { .. }));
        assert!(helper.chunk_size_for_prompt_tokens(50, 1, 1).is_err());
        assert!(matches!(
            helper.chunk_size_for_prompt_tokens(0, 0, 1),
            Err(TrellisError::Validation { .. })
        ));
    }

    #[test]
    fn test_splitter_overlap_divides_by_chunks() {
        let helper = PromptHelper::new(4096, 256, 40, WhitespaceTokenizer::shared());
        let prompt = default_prompt(PromptType::QuestionAnswer);
        let splitter = helper.get_text_splitter_given_prompt(&prompt, 4, 1).unwrap();
        assert_eq!(splitter.chunk_overlap(), 10);
    }

    #[test]
    fn test_numbered_text_includes_every_node() {
        let helper = helper(4096, 256);
        let nodes = vec![Node::new("first\nline"), Node::new("second")];
        let text = helper.get_numbered_text_from_nodes(&nodes, None).unwrap();
        assert_eq!(text, "(1) first line\n\n(2) second");
    }

    #[test]
    fn test_text_from_nodes_truncates_to_budget() {
        // scaffold "X {context_str}" costs 1 token: (20 - 1 - 10) / 2 - 1 = 3 per node
        let helper = helper(20, 10);
        let prompt = PromptTemplate::new("X {context_str}", PromptType::Custom);
        let nodes = vec![Node::new("a b c d e"), Node::new("f g")];
        let text = helper.get_text_from_nodes(&nodes, Some(&prompt)).unwrap();
        assert_eq!(text, "a b c\nf g");
    }

    #[test]
    fn test_compact_packs_small_texts_together() {
        let helper = helper(4096, 256);
        let prompt = default_prompt(PromptType::QuestionAnswer);
        let texts = vec!["one".to_string(), "two".to_string(), "three".to_string()];
        let chunks = helper.compact_text_chunks(&prompt, &texts).unwrap();
        assert_eq!(chunks.len(), 1);
        assert!(chunks[0].contains("one") && chunks[0].contains("three"));
    }
}
