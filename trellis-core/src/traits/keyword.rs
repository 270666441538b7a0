//! Keyword extraction capabilities.
//!
//! Stopword lists and extractors are injected so keyword logic can be tested without
//! any downloaded corpus.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;

/// A stopword list.
pub trait Stopwords: Send + Sync + std::fmt::Debug {
    /// Whether `word` (already lowercased) is a stopword.
    fn is_stopword(&self, word: &str) -> bool;
}

const ENGLISH_STOPWORDS: &[&str] = &[
    "i", "me", "my", "myself", "we", "our", "ours", "ourselves", "you", "you're", "you've",
    "you'll", "you'd", "your", "yours", "yourself", "yourselves", "he", "him", "his", "himself",
    "she", "she's", "her", "hers", "herself", "it", "it's", "its", "itself", "they", "them",
    "their", "theirs", "themselves", "what", "which", "who", "whom", "this", "that", "that'll",
    "these", "those", "am", "is", "are", "was", "were", "be", "been", "being", "have", "has",
    "had", "having", "do", "does", "did", "doing", "a", "an", "the", "and", "but", "if", "or",
    "because", "as", "until", "while", "of", "at", "by", "for", "with", "about", "against",
    "between", "into", "through", "during", "before", "after", "above", "below", "to", "from",
    "up", "down", "in", "out", "on", "off", "over", "under", "again", "further", "then", "once",
    "here", "there", "when", "where", "why", "how", "all", "any", "both", "each", "few", "more",
    "most", "other", "some", "such", "no", "nor", "not", "only", "own", "same", "so", "than",
    "too", "very", "s", "t", "can", "will", "just", "don", "don't", "should", "should've", "now",
    "d", "ll", "m", "o", "re", "ve", "y", "ain", "aren", "aren't", "couldn", "couldn't", "didn",
    "didn't", "doesn", "doesn't", "hadn", "hadn't", "hasn", "hasn't", "haven", "haven't", "isn",
    "isn't", "ma", "mightn", "mightn't", "mustn", "mustn't", "needn", "needn't", "shan",
    "shan't", "shouldn", "shouldn't", "wasn", "wasn't", "weren", "weren't", "won", "won't",
    "wouldn", "wouldn't",
];

/// The built-in English stopword list, plus optional custom words.
#[derive(Debug, Clone)]
pub struct EnglishStopwords {
    words: HashSet<String>,
}

impl EnglishStopwords {
    /// The built-in list.
    pub fn new() -> Self {
        Self {
            words: ENGLISH_STOPWORDS.iter().map(|s| (*s).to_string()).collect(),
        }
    }

    /// Add custom stopwords.
    #[must_use]
    pub fn with_words<I, S>(mut self, words: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.words
            .extend(words.into_iter().map(|w| w.as_ref().to_lowercase()));
        self
    }

    /// Shared handle to the built-in list.
    pub fn shared() -> Arc<dyn Stopwords> {
        Arc::new(Self::new())
    }
}

impl Default for EnglishStopwords {
    fn default() -> Self {
        Self::new()
    }
}

impl Stopwords for EnglishStopwords {
    fn is_stopword(&self, word: &str) -> bool {
        self.words.contains(word)
    }
}

/// Configuration for keyword extraction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeywordExtractionConfig {
    /// Maximum number of keywords returned; `None` keeps all.
    pub max_keywords: Option<usize>,
    /// Drop stopwords.
    pub filter_stopwords: bool,
    /// Also emit the single-word pieces of multi-word keywords.
    pub expand_with_subtokens: bool,
}

impl Default for KeywordExtractionConfig {
    fn default() -> Self {
        Self {
            max_keywords: Some(10),
            filter_stopwords: true,
            expand_with_subtokens: true,
        }
    }
}

/// Extracts ranked keywords from text.
pub trait KeywordExtractor: Send + Sync + std::fmt::Debug {
    /// Keywords, most relevant first, without duplicates.
    fn extract_keywords(&self, text: &str) -> Vec<String>;

    /// Get the configuration used by this extractor.
    fn config(&self) -> &KeywordExtractionConfig;
}
