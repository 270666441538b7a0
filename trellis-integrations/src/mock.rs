//! Deterministic stand-ins for the LLM and the embedding model.
//!
//! Both record how they were called, so tests can assert on call counts and on the
//! exact prompts a query produced.

use async_trait::async_trait;
use futures::StreamExt;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use tracing::debug;

use trellis_core::traits::{Embedder, LlmMetadata, LlmPredictor};
use trellis_core::types::TokenStream;
use trellis_core::Result;

#[derive(Debug, Default)]
struct MockState {
    responses: VecDeque<String>,
    prompts: Vec<String>,
}

/// An LLM that replays scripted answers.
///
/// Once the script runs out it answers with the default response when one is set,
/// and echoes the prompt otherwise.
///
/// # Examples
///
/// ```rust
/// use trellis_integrations::mock::MockLlmPredictor;
///
/// let llm = MockLlmPredictor::with_responses(["first"]).with_default_response("later");
/// assert_eq!(llm.call_count(), 0);
/// ```
#[derive(Debug, Default)]
pub struct MockLlmPredictor {
    state: Mutex<MockState>,
    default_response: Option<String>,
    metadata: LlmMetadata,
}

impl MockLlmPredictor {
    /// A predictor answering every prompt with the prompt itself.
    pub fn echo() -> Self {
        Self::default()
    }

    /// A predictor answering with `responses` in order.
    pub fn with_responses<I, S>(responses: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            state: Mutex::new(MockState {
                responses: responses.into_iter().map(Into::into).collect(),
                prompts: Vec::new(),
            }),
            ..Self::default()
        }
    }

    /// Answer with `response` once the script is exhausted.
    #[must_use]
    pub fn with_default_response(mut self, response: impl Into<String>) -> Self {
        self.default_response = Some(response.into());
        self
    }

    /// Report `metadata` instead of a 4096 token window with 256 output tokens.
    #[must_use]
    pub fn with_metadata(mut self, metadata: LlmMetadata) -> Self {
        self.metadata = metadata;
        self
    }

    fn state(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Number of completions requested so far.
    pub fn call_count(&self) -> usize {
        self.state().prompts.len()
    }

    /// Every prompt received, in call order.
    pub fn prompts(&self) -> Vec<String> {
        self.state().prompts.clone()
    }

    fn answer(&self, prompt: &str) -> String {
        let mut state = self.state();
        state.prompts.push(prompt.to_string());
        let answer = state
            .responses
            .pop_front()
            .or_else(|| self.default_response.clone())
            .unwrap_or_else(|| prompt.to_string());
        debug!(call = state.prompts.len(), "Mock LLM answered");
        answer
    }
}

#[async_trait]
impl LlmPredictor for MockLlmPredictor {
    fn metadata(&self) -> LlmMetadata {
        self.metadata.clone()
    }

    async fn complete(&self, prompt: &str) -> Result<String> {
        Ok(self.answer(prompt))
    }

    /// Streams the answer word by word, keeping the separating whitespace.
    async fn stream_complete(&self, prompt: &str) -> Result<TokenStream> {
        let answer = self.answer(prompt);
        let chunks: Vec<Result<String>> = answer
            .split_inclusive(' ')
            .map(|chunk| Ok(chunk.to_string()))
            .collect();
        Ok(futures::stream::iter(chunks).boxed())
    }
}

/// A bag-of-words embedder.
///
/// Every lowercased alphanumeric word is hashed into one of `dimension` buckets, so
/// texts sharing words are similar and the same text always embeds the same way.
#[derive(Debug)]
pub struct MockEmbedder {
    dimension: usize,
    calls: AtomicUsize,
}

impl MockEmbedder {
    /// Create an embedder producing `dimension`-sized vectors.
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension: dimension.max(1),
            calls: AtomicUsize::new(0),
        }
    }

    /// Number of texts embedded so far.
    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::Relaxed)
    }

    /// Embedding of `text`.
    pub fn embed(&self, text: &str) -> Vec<f32> {
        let mut vector = vec![0.0_f32; self.dimension];
        for word in text
            .split(|c: char| !c.is_alphanumeric())
            .filter(|w| !w.is_empty())
        {
            vector[bucket(&word.to_lowercase(), self.dimension)] += 1.0;
        }
        vector
    }
}

/// FNV-1a, which is stable across runs and platforms.
fn bucket(word: &str, dimension: usize) -> usize {
    let hash = word.bytes().fold(0xcbf2_9ce4_8422_2325_u64, |hash, byte| {
        (hash ^ u64::from(byte)).wrapping_mul(0x0100_0000_01b3)
    });
    #[allow(clippy::cast_possible_truncation)]
    let index = (hash % dimension as u64) as usize;
    index
}

#[async_trait]
impl Embedder for MockEmbedder {
    async fn get_query_embedding(&self, query: &str) -> Result<Vec<f32>> {
        self.calls.fetch_add(1, Ordering::Relaxed);
        Ok(self.embed(query))
    }

    async fn get_text_embedding(&self, text: &str) -> Result<Vec<f32>> {
        self.calls.fetch_add(1, Ordering::Relaxed);
        Ok(self.embed(text))
    }

    fn model_name(&self) -> &str {
        "mock-bag-of-words"
    }
}
