//! Keyword table retriever.
//!
//! Query keywords are extracted with the configured [`KeywordStrategy`], narrowed to
//! the keywords present in the table, and the posted nodes are ranked by how many of
//! those keywords hit them.

use async_trait::async_trait;
use itertools::Itertools;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use strum::{Display, EnumString};
use tracing::{debug, info, instrument};

use trellis_core::prompts::{PromptTemplate, PromptType, default_prompt, prompt_vars};
use trellis_core::traits::{Retriever, Stopwords};
use trellis_core::{DocumentStore, KeywordTable, QueryBundle, Result, ScoredNode, ServiceContext};

use super::snippet;
use crate::keywords::{
    KEYWORDS_START_TOKEN, extract_keywords_given_response, rake_extract_keywords,
    simple_extract_keywords,
};
use crate::query_config::KeywordMatch;

/// How query keywords are obtained.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum KeywordStrategy {
    /// Ask the LLM.
    Llm,
    /// Frequency ranking of query words.
    Simple,
    /// RAKE phrase scoring.
    Rake,
}

/// Retrieves the nodes posted under the query's keywords.
#[derive(Debug, Clone)]
pub struct KeywordTableRetriever {
    table: KeywordTable,
    docstore: Arc<DocumentStore>,
    service_context: ServiceContext,
    stopwords: Arc<dyn Stopwords>,
    strategy: KeywordStrategy,
    keyword_match: KeywordMatch,
    max_keywords_per_query: usize,
    num_chunks_per_query: usize,
    query_keyword_extract_template: PromptTemplate,
    verbose: bool,
}

impl KeywordTableRetriever {
    /// Create a retriever over `table`.
    pub fn new(
        table: KeywordTable,
        docstore: Arc<DocumentStore>,
        service_context: ServiceContext,
        stopwords: Arc<dyn Stopwords>,
        strategy: KeywordStrategy,
    ) -> Self {
        Self {
            table,
            docstore,
            service_context,
            stopwords,
            strategy,
            keyword_match: KeywordMatch::Any,
            max_keywords_per_query: 10,
            num_chunks_per_query: 10,
            query_keyword_extract_template: default_prompt(PromptType::QueryKeywordExtract),
            verbose: false,
        }
    }

    /// How postings of several keywords combine.
    #[must_use]
    pub fn with_keyword_match(mut self, keyword_match: KeywordMatch) -> Self {
        self.keyword_match = keyword_match;
        self
    }

    /// Keywords extracted from the query.
    #[must_use]
    pub fn with_max_keywords_per_query(mut self, max: usize) -> Self {
        self.max_keywords_per_query = max;
        self
    }

    /// Nodes returned.
    #[must_use]
    pub fn with_num_chunks_per_query(mut self, num: usize) -> Self {
        self.num_chunks_per_query = num;
        self
    }

    /// Log the extracted keywords and every returned node.
    #[must_use]
    pub fn with_verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }

    /// Keywords of a query string, before narrowing to the table.
    pub async fn get_keywords(&self, query_str: &str) -> Result<Vec<String>> {
        let stopwords = self.stopwords.as_ref();
        Ok(match self.strategy {
            KeywordStrategy::Llm => {
                let max = self.max_keywords_per_query.to_string();
                let response = self
                    .service_context
                    .predict(
                        &self.query_keyword_extract_template,
                        &prompt_vars([("max_keywords", max.as_str()), ("question", query_str)]),
                    )
                    .await?;
                extract_keywords_given_response(&response, true, Some(KEYWORDS_START_TOKEN), stopwords)
            }
            KeywordStrategy::Simple => {
                simple_extract_keywords(query_str, Some(self.max_keywords_per_query), Some(stopwords))
            }
            KeywordStrategy::Rake => {
                rake_extract_keywords(query_str, Some(self.max_keywords_per_query), true, stopwords)
            }
        })
    }

    /// Node ids ranked for the given table keywords.
    fn rank_node_ids(&self, keywords: &[String]) -> Vec<String> {
        let mut order: Vec<&str> = Vec::new();
        let mut hits: HashMap<&str, usize> = HashMap::new();
        for keyword in keywords {
            let Some(postings) = self.table.postings(keyword) else {
                continue;
            };
            for node_id in postings {
                let count = hits.entry(node_id.as_str()).or_insert(0);
                if *count == 0 {
                    order.push(node_id.as_str());
                }
                *count += 1;
            }
        }
        match self.keyword_match {
            KeywordMatch::Any => order.sort_by(|a, b| hits[b].cmp(&hits[a])),
            KeywordMatch::All => order.retain(|id| hits[id] == keywords.len()),
        }
        order
            .into_iter()
            .take(self.num_chunks_per_query)
            .map(str::to_string)
            .collect()
    }
}

#[async_trait]
impl Retriever for KeywordTableRetriever {
    #[instrument(skip_all, fields(index_id = %self.table.index_id, strategy = %self.strategy))]
    async fn retrieve(&self, query: &QueryBundle) -> Result<Vec<ScoredNode>> {
        let extracted = self.get_keywords(&query.query_str).await?;
        let keywords: Vec<String> = extracted
            .into_iter()
            .filter(|keyword| self.table.contains(keyword))
            .unique()
            .collect();
        debug!(?keywords, "Query keywords found in table");
        if self.verbose {
            info!(keywords = %keywords.join(", "), "Extracted keywords");
        }
        if keywords.is_empty() {
            return Ok(Vec::new());
        }

        let node_ids = self.rank_node_ids(&keywords);
        let nodes = self.docstore.get_nodes(&node_ids)?;
        if self.verbose {
            for node in &nodes {
                info!(node = %snippet(node.get_text()), "Matched node");
            }
        }
        info!("Retrieved {} nodes", nodes.len());
        Ok(nodes.into_iter().map(ScoredNode::unscored).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use trellis_core::Node;
    use trellis_core::traits::EnglishStopwords;
    use trellis_integrations::mock::{MockEmbedder, MockLlmPredictor};

    fn fixture() -> (KeywordTable, Arc<DocumentStore>) {
        let docstore = Arc::new(DocumentStore::new());
        let mut table = KeywordTable::new();
        for (id, text, keywords) in [
            ("n1", "tokio runtime internals", vec!["tokio", "runtime"]),
            ("n2", "rust async basics", vec!["rust", "async"]),
            ("n3", "tokio with rust", vec!["tokio", "rust"]),
        ] {
            docstore.insert(Node::new(text).with_id(id)).unwrap();
            table.add_node(keywords, id);
        }
        (table, docstore)
    }

    fn retriever(llm: Arc<MockLlmPredictor>, strategy: KeywordStrategy) -> KeywordTableRetriever {
        let (table, docstore) = fixture();
        let context = ServiceContext::builder()
            .llm(llm)
            .embed_model(Arc::new(MockEmbedder::new(8)))
            .build()
            .unwrap();
        KeywordTableRetriever::new(table, docstore, context, EnglishStopwords::shared(), strategy)
    }

    #[tokio::test]
    async fn test_llm_keywords_rank_by_hits() {
        let llm = Arc::new(MockLlmPredictor::with_responses(["KEYWORDS: Tokio, Rust, cobol"]));
        let nodes = retriever(llm.clone(), KeywordStrategy::Llm)
            .retrieve(&QueryBundle::new("how does tokio work with rust?"))
            .await
            .unwrap();
        let ids: Vec<&str> = nodes.iter().map(ScoredNode::id).collect();
        assert_eq!(ids, vec!["n3", "n1", "n2"]);
        assert_eq!(llm.call_count(), 1);
    }

    #[tokio::test]
    async fn test_all_match_intersects() {
        let llm = Arc::new(MockLlmPredictor::echo());
        let nodes = retriever(llm.clone(), KeywordStrategy::Simple)
            .with_keyword_match(KeywordMatch::All)
            .retrieve(&QueryBundle::new("tokio and rust"))
            .await
            .unwrap();
        assert_eq!(nodes.len(), 1);
        assert_eq!(nodes[0].id(), "n3");
        assert_eq!(llm.call_count(), 0);
    }

    #[tokio::test]
    async fn test_rake_and_chunk_limit() {
        let llm = Arc::new(MockLlmPredictor::echo());
        let nodes = retriever(llm, KeywordStrategy::Rake)
            .with_num_chunks_per_query(1)
            .retrieve(&QueryBundle::new("tokio runtime"))
            .await
            .unwrap();
        assert_eq!(nodes.len(), 1);
        assert_eq!(nodes[0].id(), "n1");
    }

    #[tokio::test]
    async fn test_no_table_keywords_returns_nothing() {
        let llm = Arc::new(MockLlmPredictor::echo());
        let nodes = retriever(llm, KeywordStrategy::Simple)
            .retrieve(&QueryBundle::new("haskell monads"))
            .await
            .unwrap();
        assert!(nodes.is_empty());
    }
}
