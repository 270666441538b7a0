//! Keyword-based filtering postprocessor.

use async_trait::async_trait;
use regex::Regex;
use tracing::debug;

use trellis_core::traits::NodePostprocessor;
use trellis_core::{QueryBundle, Result, ScoredNode, TrellisError};

/// Keeps nodes that contain every required keyword and none of the excluded ones.
///
/// Matching is case-insensitive. Keywords that start or end with a word character
/// only match on a word boundary there.
#[derive(Debug, Clone)]
pub struct KeywordNodePostprocessor {
    required_keywords: Vec<String>,
    exclude_keywords: Vec<String>,
    required_patterns: Vec<Regex>,
    excluded_patterns: Vec<Regex>,
}

impl KeywordNodePostprocessor {
    /// Create a filter from required and excluded keywords.
    pub fn new(required_keywords: Vec<String>, exclude_keywords: Vec<String>) -> Result<Self> {
        let required_patterns = compile_patterns(&required_keywords)?;
        let excluded_patterns = compile_patterns(&exclude_keywords)?;
        Ok(Self {
            required_keywords,
            exclude_keywords,
            required_patterns,
            excluded_patterns,
        })
    }

    /// Whether the filter has nothing to check.
    pub fn is_empty(&self) -> bool {
        self.required_keywords.is_empty() && self.exclude_keywords.is_empty()
    }

    fn should_keep(&self, content: &str) -> bool {
        self.required_patterns.iter().all(|p| p.is_match(content))
            && !self.excluded_patterns.iter().any(|p| p.is_match(content))
    }
}

fn compile_patterns(keywords: &[String]) -> Result<Vec<Regex>> {
    keywords
        .iter()
        .map(|keyword| {
            let is_word = |c: char| c.is_alphanumeric() || c == '_';
            let start = if keyword.starts_with(is_word) { r"\b" } else { "" };
            let end = if keyword.ends_with(is_word) { r"\b" } else { "" };
            Regex::new(&format!("(?i){start}{}{end}", regex::escape(keyword))).map_err(|e| {
                TrellisError::configuration(format!(
                    "invalid keyword pattern for '{keyword}': {e}"
                ))
            })
        })
        .collect()
}

#[async_trait]
impl NodePostprocessor for KeywordNodePostprocessor {
    async fn postprocess(
        &self,
        nodes: Vec<ScoredNode>,
        _query: &QueryBundle,
    ) -> Result<Vec<ScoredNode>> {
        if nodes.is_empty() || self.is_empty() {
            return Ok(nodes);
        }
        let before = nodes.len();
        let kept: Vec<ScoredNode> = nodes
            .into_iter()
            .filter(|n| self.should_keep(n.text()))
            .collect();
        debug!(
            before,
            after = kept.len(),
            required = self.required_keywords.len(),
            excluded = self.exclude_keywords.len(),
            "Keyword filtering completed"
        );
        Ok(kept)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use trellis_core::Node;

    fn nodes(texts: &[&str]) -> Vec<ScoredNode> {
        texts.iter().map(|t| ScoredNode::unscored(Node::new(*t))).collect()
    }

    #[tokio::test]
    async fn test_required_keywords_filter() {
        let filter =
            KeywordNodePostprocessor::new(vec!["climate".into(), "change".into()], vec![]).unwrap();
        let kept = filter
            .postprocess(
                nodes(&[
                    "Climate change is a serious issue",
                    "Weather patterns are changing",
                    "The climate is mild",
                ]),
                &QueryBundle::new("q"),
            )
            .await
            .unwrap();
        assert_eq!(kept.len(), 1);
        assert_eq!(kept[0].text(), "Climate change is a serious issue");
    }

    #[tokio::test]
    async fn test_excluded_keywords_filter() {
        let filter = KeywordNodePostprocessor::new(vec![], vec!["spam".into()]).unwrap();
        let kept = filter
            .postprocess(
                nodes(&["useful content", "This is SPAM content", "more useful text"]),
                &QueryBundle::new("q"),
            )
            .await
            .unwrap();
        assert_eq!(kept.len(), 2);
        assert!(kept.iter().all(|n| !n.text().to_lowercase().contains("spam")));
    }

    #[tokio::test]
    async fn test_special_characters_are_escaped() {
        let filter = KeywordNodePostprocessor::new(vec!["c++".into()], vec![]).unwrap();
        assert!(!filter.is_empty());
        let kept = filter
            .postprocess(nodes(&["written in c", "written in C++ mostly"]), &QueryBundle::new("q"))
            .await
            .unwrap();
        assert_eq!(kept.len(), 1);
        assert_eq!(kept[0].text(), "written in C++ mostly");
    }
}
