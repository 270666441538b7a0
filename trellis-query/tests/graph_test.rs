//! Queries over composable graphs.

use async_trait::async_trait;
use pretty_assertions::assert_eq;
use std::sync::Arc;

use trellis_core::prelude::*;
use trellis_integrations::mock::{MockEmbedder, MockLlmPredictor};
use trellis_query::prelude::*;

fn service_context(llm: &Arc<MockLlmPredictor>) -> ServiceContext {
    ServiceContext::builder()
        .llm(Arc::clone(llm) as Arc<dyn LlmPredictor>)
        .embed_model(Arc::new(MockEmbedder::new(64)))
        .build()
        .unwrap()
}

fn texts(response: &Response) -> Vec<&str> {
    response.source_nodes.iter().map(ScoredNode::text).collect()
}

#[derive(Debug)]
struct FixedRetriever(&'static str);

#[async_trait]
impl Retriever for FixedRetriever {
    async fn retrieve(&self, _query: &QueryBundle) -> Result<Vec<ScoredNode>> {
        Ok(vec![ScoredNode::new(Node::new(self.0), 1.0)])
    }
}

#[tokio::test]
async fn test_custom_retriever_replaces_child_retrieval() {
    let llm = Arc::new(MockLlmPredictor::with_responses(["child answer", "root answer"]));
    let docstore = Arc::new(DocumentStore::new());
    let child = IndexBuilder::new(Arc::clone(&docstore))
        .list([Node::new("stored text")])
        .unwrap();
    let child_id = child.index_id().to_string();
    let graph = ComposableGraph::from_indices(
        docstore,
        IndexStructType::List,
        vec![child],
        vec!["the child".to_string()],
        None,
    )
    .unwrap();
    let engine = ComposableGraphQueryEngine::builder(graph, service_context(&llm))
        .retriever(child_id, Arc::new(FixedRetriever("injected text")))
        .build()
        .unwrap();

    let response = engine.query("q").await.unwrap();
    assert_eq!(texts(&response), vec!["child answer", "injected text"]);
    assert!(llm.prompts()[0].contains("injected text"));
    assert!(!llm.prompts()[0].contains("stored text"));
}

#[tokio::test]
async fn test_postprocessors_apply_at_every_level() {
    let llm = Arc::new(MockLlmPredictor::with_responses(["child answer", "root answer"]));
    let docstore = Arc::new(DocumentStore::new());
    let builder = IndexBuilder::new(Arc::clone(&docstore));
    let open = builder
        .list([Node::new("public fact"), Node::new("secret fact")])
        .unwrap();
    let hidden = builder.list([Node::new("hidden")]).unwrap();
    let graph = ComposableGraph::from_indices(
        docstore,
        IndexStructType::List,
        vec![open, hidden],
        vec!["open facts".to_string(), "secret facts".to_string()],
        None,
    )
    .unwrap();
    let filter = KeywordNodePostprocessor::new(Vec::new(), vec!["secret".to_string()]).unwrap();
    let engine = ComposableGraphQueryEngine::builder(graph, service_context(&llm))
        .postprocessor(Arc::new(filter))
        .build()
        .unwrap();

    let response = engine.query("what is known?").await.unwrap();
    assert_eq!(response.to_string(), "root answer");
    assert_eq!(texts(&response), vec!["child answer", "public fact"]);
    assert_eq!(llm.call_count(), 2);
    assert!(llm.prompts().iter().all(|p| !p.contains("secret fact")));
}

#[tokio::test]
async fn test_tree_root_visits_every_child() {
    let llm = Arc::new(MockLlmPredictor::with_responses([
        "alpha answer",
        "beta answer",
        "combined answer",
    ]));
    let docstore = Arc::new(DocumentStore::new());
    let builder = IndexBuilder::new(Arc::clone(&docstore));
    let alpha = builder.list([Node::new("alpha fact")]).unwrap();
    let beta = builder.list([Node::new("beta fact")]).unwrap();
    let graph = ComposableGraph::from_indices(
        docstore,
        IndexStructType::Tree,
        vec![alpha, beta],
        vec!["alpha".to_string(), "beta".to_string()],
        None,
    )
    .unwrap();
    let engine = ComposableGraphQueryEngine::builder(graph, service_context(&llm))
        .query_config(
            QueryConfig::new(IndexStructType::Tree, QueryMode::Retrieve)
                .with_kwargs(QueryKwargs::default().with_response_mode(ResponseMode::Compact)),
        )
        .build()
        .unwrap();

    let response = engine.query("compare them").await.unwrap();
    assert_eq!(response.to_string(), "combined answer");
    assert_eq!(llm.call_count(), 3);
    assert_eq!(
        texts(&response),
        vec!["alpha answer", "beta answer", "alpha fact", "beta fact"]
    );
}

#[tokio::test]
async fn test_child_config_by_id_overrides_type() {
    let llm = Arc::new(MockLlmPredictor::with_responses(["root answer"]));
    let docstore = Arc::new(DocumentStore::new());
    let child = IndexBuilder::new(Arc::clone(&docstore))
        .list([Node::new("a fact")])
        .unwrap();
    let child_id = child.index_id().to_string();
    let graph = ComposableGraph::from_indices(
        docstore,
        IndexStructType::List,
        vec![child],
        vec!["facts".to_string()],
        None,
    )
    .unwrap();
    let engine = ComposableGraphQueryEngine::builder(graph, service_context(&llm))
        .query_config(
            QueryConfig::new(IndexStructType::List, QueryMode::Default)
                .for_index(child_id)
                .with_kwargs(QueryKwargs::default().with_response_mode(ResponseMode::NoText)),
        )
        .build()
        .unwrap();

    let response = engine.aquery("q").await.unwrap();
    assert_eq!(response.to_string(), "root answer");
    assert_eq!(llm.call_count(), 1);
    assert_eq!(texts(&response), vec!["None", "a fact"]);
}
