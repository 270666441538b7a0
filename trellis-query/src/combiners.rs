//! Query combiners.
//!
//! A combiner decides how many underlying queries one request turns into and how
//! their answers merge. The runner hands every sequential query to a combiner.

use async_trait::async_trait;
use serde_json::json;
use std::fmt::Write as _;
use std::sync::Arc;
use tracing::{debug, info, instrument};

use trellis_core::{IndexStruct, IndexStructType, Node, QueryInput, Response, Result, ScoredNode};

use crate::query::IndexQuery;
use crate::transforms::{QueryTransform, TransformContext, is_stop_answer};

/// Metadata key holding the (question, answer) pairs of a multi-step query.
pub const SUB_QA_KEY: &str = "sub_qa";

/// Runs a query object for one request.
#[async_trait]
pub trait QueryCombiner: Send + Sync + std::fmt::Debug {
    /// Answer `input` with `query`.
    async fn run(&self, query: &dyn IndexQuery, input: QueryInput) -> Result<Response>;

    /// Get a human-readable name for this combiner.
    fn name(&self) -> &'static str {
        std::any::type_name::<Self>()
    }
}

/// Transforms the query once, then runs it.
#[derive(Debug, Clone)]
pub struct SingleQueryCombiner {
    transform: Arc<dyn QueryTransform>,
}

impl SingleQueryCombiner {
    /// Create a combiner applying `transform`.
    pub fn new(transform: Arc<dyn QueryTransform>) -> Self {
        Self { transform }
    }
}

#[async_trait]
impl QueryCombiner for SingleQueryCombiner {
    async fn run(&self, query: &dyn IndexQuery, input: QueryInput) -> Result<Response> {
        let context = TransformContext::for_index(query.index_struct());
        let bundle = self.transform.run(input, &context).await?;
        query.query(&bundle).await
    }
}

/// Answers through a chain of sub-questions.
///
/// Each step asks the step transform for the next sub-question given the reasoning
/// so far, runs it and records the answer. The final answer is synthesized from the
/// question/answer pairs, citing every sub-query's sources.
#[derive(Debug, Clone)]
pub struct MultiStepQueryCombiner {
    step_transform: Arc<dyn QueryTransform>,
    num_steps: usize,
    early_stopping: bool,
    verbose: bool,
}

impl MultiStepQueryCombiner {
    /// Create a combiner running at most `num_steps` sub-questions.
    pub fn new(step_transform: Arc<dyn QueryTransform>, num_steps: usize) -> Self {
        Self {
            step_transform,
            num_steps,
            early_stopping: true,
            verbose: false,
        }
    }

    /// Stop as soon as the transform answers that no question is left.
    #[must_use]
    pub fn with_early_stopping(mut self, early_stopping: bool) -> Self {
        self.early_stopping = early_stopping;
        self
    }

    /// Log each sub-question and answer.
    #[must_use]
    pub fn with_verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }
}

#[async_trait]
impl QueryCombiner for MultiStepQueryCombiner {
    #[instrument(skip_all, fields(index_id = query.index_struct().index_id(), num_steps = self.num_steps))]
    async fn run(&self, query: &dyn IndexQuery, input: QueryInput) -> Result<Response> {
        let original = input.into_bundle();
        let index_context = TransformContext::for_index(query.index_struct());
        let mut prev_reasoning = String::new();
        let mut qa_pairs: Vec<(String, String)> = Vec::new();
        let mut qa_nodes = Vec::new();
        let mut source_nodes = Vec::new();

        for step in 0..self.num_steps {
            let context = if prev_reasoning.is_empty() {
                index_context.clone()
            } else {
                index_context.clone().with_prev_reasoning(prev_reasoning.clone())
            };
            let sub_query = self
                .step_transform
                .run(QueryInput::from(&original), &context)
                .await?;
            if self.early_stopping && is_stop_answer(&sub_query.query_str) {
                debug!(step, "Step transform signalled stop");
                break;
            }
            let sub_response = query.query(&sub_query).await?;
            let answer = sub_response.to_string();
            if self.verbose {
                info!(step, question = %sub_query.query_str, answer = %answer, "Sub-question answered");
            }

            let qa_text = format!("Question: {}\nAnswer: {answer}", sub_query.query_str);
            let _ = write!(prev_reasoning, "\n{qa_text}");
            qa_nodes.push(ScoredNode::unscored(Node::new(qa_text)));
            qa_pairs.push((sub_query.query_str, answer));
            source_nodes.extend(sub_response.source_nodes);
        }

        info!("Answered {} sub-questions", qa_pairs.len());
        let response = query.synthesize(&original, qa_nodes, source_nodes).await?;
        Ok(response.with_metadata(SUB_QA_KEY, json!(qa_pairs)))
    }
}

/// The combiner used when neither the config nor the runner names one.
///
/// Every built-in struct type runs its query once.
pub fn default_query_combiner(
    index_struct: &IndexStruct,
    transform: Arc<dyn QueryTransform>,
) -> Arc<dyn QueryCombiner> {
    match index_struct.struct_type() {
        IndexStructType::Tree
        | IndexStructType::List
        | IndexStructType::KeywordTable
        | IndexStructType::Vector
        | IndexStructType::Table => Arc::new(SingleQueryCombiner::new(transform)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::sync::Mutex;
    use trellis_core::{IndexList, QueryBundle, ServiceContext};
    use trellis_integrations::mock::{MockEmbedder, MockLlmPredictor};

    use crate::transforms::StepDecomposeQueryTransform;

    /// Answers `answer to <query>` and records what it was asked.
    #[derive(Debug)]
    struct EchoQuery {
        index_struct: IndexStruct,
        asked: Mutex<Vec<String>>,
        synthesized: Mutex<Vec<String>>,
    }

    impl EchoQuery {
        fn new() -> Self {
            let mut list = IndexList::new();
            list.summary = Some("rust history".into());
            Self {
                index_struct: IndexStruct::List(list),
                asked: Mutex::new(Vec::new()),
                synthesized: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl IndexQuery for EchoQuery {
        fn index_struct(&self) -> &IndexStruct {
            &self.index_struct
        }

        async fn retrieve(&self, _query: &QueryBundle) -> Result<Vec<ScoredNode>> {
            Ok(Vec::new())
        }

        async fn synthesize(
            &self,
            _query: &QueryBundle,
            nodes: Vec<ScoredNode>,
            additional_source_nodes: Vec<ScoredNode>,
        ) -> Result<Response> {
            self.synthesized
                .lock()
                .unwrap()
                .extend(nodes.iter().map(|n| n.text().to_string()));
            let mut sources = nodes;
            sources.extend(additional_source_nodes);
            Ok(Response::new(Some("final".into()), sources))
        }

        async fn query(&self, query: &QueryBundle) -> Result<Response> {
            self.asked.lock().unwrap().push(query.query_str.clone());
            Ok(Response::new(
                Some(format!("answer to {}", query.query_str)),
                vec![ScoredNode::unscored(Node::new("source"))],
            ))
        }
    }

    #[derive(Debug)]
    struct Suffix;

    #[async_trait]
    impl QueryTransform for Suffix {
        async fn run(&self, query: QueryInput, context: &TransformContext) -> Result<QueryBundle> {
            let summary = context.index_summary.clone().unwrap_or_default();
            Ok(QueryBundle::new(format!("{} [{summary}]", query.query_str())))
        }
    }

    #[tokio::test]
    async fn test_single_combiner_transforms_with_index_summary() {
        let query = EchoQuery::new();
        let response = SingleQueryCombiner::new(Arc::new(Suffix))
            .run(&query, QueryInput::from("who made rust"))
            .await
            .unwrap();
        assert_eq!(
            query.asked.lock().unwrap().as_slice(),
            ["who made rust [rust history]".to_string()]
        );
        assert_eq!(response.to_string(), "answer to who made rust [rust history]");
    }

    #[tokio::test]
    async fn test_multi_step_stops_early_and_synthesizes_pairs() {
        let llm = Arc::new(MockLlmPredictor::with_responses(["Who started Rust?", "None"]));
        let context = ServiceContext::builder()
            .llm(llm.clone())
            .embed_model(Arc::new(MockEmbedder::new(8)))
            .build()
            .unwrap();
        let combiner = MultiStepQueryCombiner::new(Arc::new(StepDecomposeQueryTransform::new(context)), 3);
        let query = EchoQuery::new();
        let response = combiner
            .run(&query, QueryInput::from("Where did Rust come from?"))
            .await
            .unwrap();

        assert_eq!(llm.call_count(), 2);
        assert!(llm.prompts()[1].contains("Answer: answer to Who started Rust?"));
        assert_eq!(query.asked.lock().unwrap().as_slice(), ["Who started Rust?".to_string()]);
        assert_eq!(
            query.synthesized.lock().unwrap().as_slice(),
            ["Question: Who started Rust?\nAnswer: answer to Who started Rust?".to_string()]
        );
        assert_eq!(response.source_nodes.len(), 2);
        assert_eq!(
            response.metadata[SUB_QA_KEY],
            json!([["Who started Rust?", "answer to Who started Rust?"]])
        );
    }

    #[test]
    fn test_default_combiner_is_single() {
        let combiner = default_query_combiner(
            &IndexStruct::List(IndexList::new()),
            Arc::new(crate::transforms::IdentityQueryTransform),
        );
        assert!(combiner.name().contains("SingleQueryCombiner"));
    }
}
