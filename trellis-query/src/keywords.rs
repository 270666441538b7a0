//! Keyword extraction.
//!
//! Pure functions over text plus an injected [`Stopwords`] list: frequency ranking,
//! RAKE phrase scoring, sub-token expansion and parsing of LLM keyword answers.

use itertools::Itertools;
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use trellis_core::traits::{KeywordExtractionConfig, KeywordExtractor, Stopwords};

static WORD: Lazy<Regex> = Lazy::new(|| Regex::new(r"\w+").expect("word pattern is valid"));

static RAKE_TOKEN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\w+|[^\w\s]+").expect("rake token pattern is valid"));

/// Marker the keyword prompts ask the model to start its answer with.
pub const KEYWORDS_START_TOKEN: &str = "KEYWORDS:";

/// Lowercased `\w+` tokens of `text`, in order.
pub fn tokenize_words(text: &str) -> Vec<String> {
    WORD.find_iter(text)
        .map(|m| m.as_str().to_lowercase())
        .collect()
}

/// Keywords ranked by frequency, ties kept in first-seen order.
///
/// With `stopwords` set, stopwords are dropped before counting.
pub fn simple_extract_keywords(
    text: &str,
    max_keywords: Option<usize>,
    stopwords: Option<&dyn Stopwords>,
) -> Vec<String> {
    let mut order: Vec<String> = Vec::new();
    let mut counts: HashMap<String, usize> = HashMap::new();
    for token in tokenize_words(text) {
        if stopwords.is_some_and(|s| s.is_stopword(&token)) {
            continue;
        }
        let count = counts.entry(token.clone()).or_insert(0);
        if *count == 0 {
            order.push(token);
        }
        *count += 1;
    }
    // stable sort keeps first-seen order among equal counts
    order.sort_by(|a, b| counts[b].cmp(&counts[a]));
    if let Some(max) = max_keywords {
        order.truncate(max);
    }
    order
}

/// Keyword phrases ranked by RAKE score (sum of word degree/frequency).
///
/// Phrases are runs of words delimited by punctuation and stopwords. With
/// `expand_with_subtokens`, the words of multi-word phrases follow the phrases.
pub fn rake_extract_keywords(
    text: &str,
    max_keywords: Option<usize>,
    expand_with_subtokens: bool,
    stopwords: &dyn Stopwords,
) -> Vec<String> {
    let mut phrases: Vec<Vec<String>> = Vec::new();
    let mut current: Vec<String> = Vec::new();
    for token in RAKE_TOKEN.find_iter(text) {
        let token = token.as_str().to_lowercase();
        let is_word = token.chars().all(|c| c.is_alphanumeric() || c == '_');
        if !is_word || stopwords.is_stopword(&token) {
            if !current.is_empty() {
                phrases.push(std::mem::take(&mut current));
            }
        } else {
            current.push(token);
        }
    }
    if !current.is_empty() {
        phrases.push(current);
    }

    let mut frequency: HashMap<&str, f64> = HashMap::new();
    let mut degree: HashMap<&str, f64> = HashMap::new();
    for phrase in &phrases {
        #[allow(clippy::cast_precision_loss)]
        let len = phrase.len() as f64;
        for word in phrase {
            *frequency.entry(word.as_str()).or_insert(0.0) += 1.0;
            *degree.entry(word.as_str()).or_insert(0.0) += len;
        }
    }

    let mut scored: Vec<(String, f64)> = Vec::new();
    let mut seen = HashSet::new();
    for phrase in &phrases {
        let text = phrase.join(" ");
        if !seen.insert(text.clone()) {
            continue;
        }
        let score = phrase
            .iter()
            .map(|w| degree[w.as_str()] / frequency[w.as_str()])
            .sum::<f64>();
        scored.push((text, score));
    }
    scored.sort_by(|a, b| b.1.total_cmp(&a.1));

    let mut keywords: Vec<String> = scored.into_iter().map(|(p, _)| p).collect();
    if let Some(max) = max_keywords {
        keywords.truncate(max);
    }
    if expand_with_subtokens {
        expand_tokens_with_subtokens(keywords, stopwords)
    } else {
        keywords
    }
}

/// Each token followed by the non-stopword words of multi-word tokens.
pub fn expand_tokens_with_subtokens<I>(tokens: I, stopwords: &dyn Stopwords) -> Vec<String>
where
    I: IntoIterator<Item = String>,
{
    tokens
        .into_iter()
        .flat_map(|token| {
            let sub_tokens: Vec<String> = WORD
                .find_iter(&token)
                .map(|m| m.as_str().to_string())
                .collect();
            let expansion: Vec<String> = if sub_tokens.len() > 1 {
                sub_tokens
                    .into_iter()
                    .filter(|sub| !stopwords.is_stopword(&sub.to_lowercase()))
                    .collect()
            } else {
                Vec::new()
            };
            std::iter::once(token).chain(expansion)
        })
        .unique()
        .collect()
}

/// Parse a comma-separated keyword answer from the LLM.
///
/// A leading `start_token` is stripped, items containing `KEYWORD` are skipped and
/// multi-word items are expanded with their sub-tokens.
pub fn extract_keywords_given_response(
    response: &str,
    lowercase: bool,
    start_token: Option<&str>,
    stopwords: &dyn Stopwords,
) -> Vec<String> {
    let mut body = response.trim();
    if let Some(token) = start_token {
        if let Some(rest) = body.strip_prefix(token) {
            body = rest;
        }
    }
    let items = body
        .split(',')
        .filter(|item| !item.contains("KEYWORD"))
        .map(|item| {
            let item = item.trim();
            if lowercase {
                item.to_lowercase()
            } else {
                item.to_string()
            }
        })
        .filter(|item| !item.is_empty());
    expand_tokens_with_subtokens(items, stopwords)
}

/// [`simple_extract_keywords`] behind the [`KeywordExtractor`] trait.
#[derive(Debug, Clone)]
pub struct SimpleKeywordExtractor {
    config: KeywordExtractionConfig,
    stopwords: Arc<dyn Stopwords>,
}

impl SimpleKeywordExtractor {
    /// Create an extractor.
    pub fn new(config: KeywordExtractionConfig, stopwords: Arc<dyn Stopwords>) -> Self {
        Self { config, stopwords }
    }
}

impl KeywordExtractor for SimpleKeywordExtractor {
    fn extract_keywords(&self, text: &str) -> Vec<String> {
        let stopwords = self
            .config
            .filter_stopwords
            .then_some(self.stopwords.as_ref());
        simple_extract_keywords(text, self.config.max_keywords, stopwords)
    }

    fn config(&self) -> &KeywordExtractionConfig {
        &self.config
    }
}

/// [`rake_extract_keywords`] behind the [`KeywordExtractor`] trait.
#[derive(Debug, Clone)]
pub struct RakeKeywordExtractor {
    config: KeywordExtractionConfig,
    stopwords: Arc<dyn Stopwords>,
}

impl RakeKeywordExtractor {
    /// Create an extractor.
    pub fn new(config: KeywordExtractionConfig, stopwords: Arc<dyn Stopwords>) -> Self {
        Self { config, stopwords }
    }
}

impl KeywordExtractor for RakeKeywordExtractor {
    fn extract_keywords(&self, text: &str) -> Vec<String> {
        rake_extract_keywords(
            text,
            self.config.max_keywords,
            self.config.expand_with_subtokens,
            self.stopwords.as_ref(),
        )
    }

    fn config(&self) -> &KeywordExtractionConfig {
        &self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use trellis_core::traits::EnglishStopwords;

    #[test]
    fn test_simple_ranks_by_frequency() {
        let stopwords = EnglishStopwords::new();
        let keywords = simple_extract_keywords(
            "Rust is fast. Rust is safe. Safety matters in Rust.",
            Some(2),
            Some(&stopwords),
        );
        assert_eq!(keywords, vec!["rust", "fast"]);
    }

    #[test]
    fn test_simple_without_stopword_filter() {
        let keywords = simple_extract_keywords("the cat and the hat", None, None);
        assert_eq!(keywords, vec!["the", "cat", "and", "hat"]);
    }

    #[test]
    fn test_rake_scores_phrases() {
        let stopwords = EnglishStopwords::new();
        let keywords = rake_extract_keywords(
            "Compatibility of systems of linear constraints",
            None,
            false,
            &stopwords,
        );
        assert_eq!(keywords, vec!["linear constraints", "compatibility", "systems"]);
    }

    #[test]
    fn test_rake_expands_subtokens() {
        let stopwords = EnglishStopwords::new();
        let keywords = rake_extract_keywords("vector databases, please", Some(1), true, &stopwords);
        assert_eq!(keywords, vec!["vector databases", "vector", "databases"]);
    }

    #[test]
    fn test_response_parsing_skips_markers() {
        let stopwords = EnglishStopwords::new();
        let keywords = extract_keywords_given_response(
            "KEYWORDS: Machine Learning, KEYWORD_3, rust",
            true,
            Some(KEYWORDS_START_TOKEN),
            &stopwords,
        );
        assert_eq!(keywords, vec!["machine learning", "machine", "learning", "rust"]);
    }

    #[test]
    fn test_response_parsing_is_idempotent() {
        let stopwords = EnglishStopwords::new();
        let first = extract_keywords_given_response(
            "KEYWORDS: graph index, tree of indices, KEYWORDS",
            true,
            Some(KEYWORDS_START_TOKEN),
            &stopwords,
        );
        let rendered = first.join(", ");
        let second = extract_keywords_given_response(&rendered, true, None, &stopwords);

        let second_set: HashSet<_> = second.iter().cloned().collect();
        for word in tokenize_words(&rendered) {
            if !stopwords.is_stopword(&word) {
                assert!(second_set.contains(&word), "missing {word}");
            }
        }
        assert!(second.iter().all(|k| !k.contains("KEYWORD")));
        assert!(first.iter().all(|k| !k.contains("KEYWORD")));
    }

    #[test]
    fn test_extractors_follow_config() {
        let config = KeywordExtractionConfig {
            max_keywords: Some(1),
            ..KeywordExtractionConfig::default()
        };
        let simple = SimpleKeywordExtractor::new(config.clone(), EnglishStopwords::shared());
        assert_eq!(simple.extract_keywords("the tokio tokio runtime"), vec!["tokio"]);

        let rake = RakeKeywordExtractor::new(config, EnglishStopwords::shared());
        assert_eq!(
            rake.extract_keywords("async runtime"),
            vec!["async runtime", "async", "runtime"]
        );
    }
}
