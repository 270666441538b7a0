//! Struct-store retriever.
//!
//! Produces a single node holding the rendered rows of a structured query. In
//! [`StructuredQueryMode::NaturalLanguage`] the LLM writes the query from the table
//! schema; in [`StructuredQueryMode::Raw`] the query string is executed as given.

use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, info, instrument};

use trellis_core::prompts::{PromptTemplate, PromptType, default_prompt, prompt_vars};
use trellis_core::traits::{Retriever, StructuredDataSource};
use trellis_core::utils::with_timeout;
use trellis_core::{Node, QueryBundle, Result, ScoredNode, ServiceContext, StructTable};

/// Metadata key holding the executed structured query.
pub const STRUCTURED_QUERY_KEY: &str = "sql_query";

/// Where the structured query comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StructuredQueryMode {
    /// The LLM translates the question.
    NaturalLanguage,
    /// The query string is the structured query.
    Raw,
}

/// Runs a structured query against the table's data source.
#[derive(Debug, Clone)]
pub struct StructStoreRetriever {
    table: StructTable,
    source: Arc<dyn StructuredDataSource>,
    service_context: ServiceContext,
    mode: StructuredQueryMode,
    text_to_sql_template: PromptTemplate,
    verbose: bool,
}

impl StructStoreRetriever {
    /// Create a retriever for `table` backed by `source`.
    pub fn new(
        table: StructTable,
        source: Arc<dyn StructuredDataSource>,
        service_context: ServiceContext,
        mode: StructuredQueryMode,
    ) -> Self {
        Self {
            table,
            source,
            service_context,
            mode,
            text_to_sql_template: default_prompt(PromptType::TextToSql),
            verbose: false,
        }
    }

    /// Log the structured query before running it.
    #[must_use]
    pub fn with_verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }

    async fn structured_query(&self, query_str: &str) -> Result<String> {
        match self.mode {
            StructuredQueryMode::Raw => Ok(query_str.to_string()),
            StructuredQueryMode::NaturalLanguage => {
                let schema = self.table.schema_text();
                let vars = prompt_vars([
                    ("dialect", self.source.dialect()),
                    ("schema", schema.as_str()),
                    ("context", self.table.context.as_deref().unwrap_or_default()),
                    ("query_str", query_str),
                ]);
                let answer = self
                    .service_context
                    .predict(&self.text_to_sql_template, &vars)
                    .await?;
                Ok(parse_structured_query(&answer))
            }
        }
    }
}

/// The structured query in an LLM answer.
///
/// Drops a leading `SQLQuery:` label, anything from `SQLResult:` on, and code fences.
pub fn parse_structured_query(answer: &str) -> String {
    let mut text = answer.trim();
    if let Some(rest) = text.strip_prefix("SQLQuery:") {
        text = rest;
    }
    if let Some(end) = text.find("SQLResult:") {
        text = &text[..end];
    }
    let text = text.trim();
    let text = text
        .strip_prefix("```sql")
        .or_else(|| text.strip_prefix("```"))
        .unwrap_or(text);
    text.trim_end_matches("```").trim().to_string()
}

#[async_trait]
impl Retriever for StructStoreRetriever {
    #[instrument(skip_all, fields(table = %self.table.table_name, mode = ?self.mode))]
    async fn retrieve(&self, query: &QueryBundle) -> Result<Vec<ScoredNode>> {
        let structured_query = self.structured_query(&query.query_str).await?;
        if self.verbose {
            info!(query = %structured_query, "Running structured query");
        }
        let result = with_timeout(
            self.service_context.request_timeout(),
            "structured_source.execute",
            self.source.execute(&structured_query),
        )
        .await
        .map_err(|e| e.in_stage("structured_query"))?;
        debug!(rows = result.rows.len(), "Structured query returned");

        let node = Node::new(result.to_text())
            .with_metadata(STRUCTURED_QUERY_KEY, structured_query)
            .with_metadata("index_id", self.table.index_id.clone());
        Ok(vec![ScoredNode::unscored(node)])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::Mutex;
    use trellis_core::traits::TableResult;
    use trellis_core::ColumnSchema;
    use trellis_integrations::mock::{MockEmbedder, MockLlmPredictor};

    #[derive(Debug, Default)]
    struct RecordingSource {
        executed: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl StructuredDataSource for RecordingSource {
        async fn execute(&self, structured_query: &str) -> Result<TableResult> {
            self.executed.lock().unwrap().push(structured_query.to_string());
            Ok(TableResult {
                columns: vec!["name".into()],
                rows: vec![vec![json!("ada")]],
            })
        }
    }

    fn setup(llm: Arc<MockLlmPredictor>, mode: StructuredQueryMode) -> (StructStoreRetriever, Arc<RecordingSource>) {
        let source = Arc::new(RecordingSource::default());
        let context = ServiceContext::builder()
            .llm(llm)
            .embed_model(Arc::new(MockEmbedder::new(8)))
            .build()
            .unwrap();
        let table = StructTable::new("people", vec![ColumnSchema::new("name", "TEXT")]);
        (StructStoreRetriever::new(table, source.clone(), context, mode), source)
    }

    #[test]
    fn test_parse_structured_query() {
        assert_eq!(
            parse_structured_query("SQLQuery: SELECT name FROM people\nSQLResult: ada"),
            "SELECT name FROM people"
        );
        assert_eq!(
            parse_structured_query("```sql\nSELECT 1\n```"),
            "SELECT 1"
        );
    }

    #[tokio::test]
    async fn test_natural_language_query_goes_through_llm() {
        let llm = Arc::new(MockLlmPredictor::with_responses(["SELECT name FROM people"]));
        let (retriever, source) = setup(llm.clone(), StructuredQueryMode::NaturalLanguage);
        let nodes = retriever.retrieve(&QueryBundle::new("who is there?")).await.unwrap();

        assert_eq!(nodes.len(), 1);
        assert_eq!(nodes[0].text(), "name\nada");
        assert_eq!(
            nodes[0].node.metadata[STRUCTURED_QUERY_KEY],
            json!("SELECT name FROM people")
        );
        assert!(llm.prompts()[0].contains("people(name TEXT)"));
        assert_eq!(source.executed.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_raw_mode_skips_llm() {
        let llm = Arc::new(MockLlmPredictor::echo());
        let (retriever, source) = setup(llm.clone(), StructuredQueryMode::Raw);
        retriever
            .retrieve(&QueryBundle::new("SELECT * FROM people"))
            .await
            .unwrap();
        assert_eq!(llm.call_count(), 0);
        assert_eq!(
            source.executed.lock().unwrap().as_slice(),
            ["SELECT * FROM people".to_string()]
        );
    }
}
