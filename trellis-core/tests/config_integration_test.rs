//! Integration tests for the configuration system.

use pretty_assertions::assert_eq;
use std::time::Duration;
use tempfile::TempDir;
use tokio::fs;
use trellis_core::prelude::*;

#[tokio::test]
async fn test_load_json_file_with_query_configs() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("trellis.json");

    let document = serde_json::json!({
        "prompt_helper": { "max_input_size": 2048, "num_output": 128 },
        "query": { "recursive": true, "max_depth": 4, "timeout_secs": 15 },
        "query_configs": [
            {
                "index_struct_type": "list",
                "query_mode": "embedding",
                "query_kwargs": { "similarity_top_k": 3 }
            },
            {
                "index_struct_type": "tree",
                "index_struct_id": "docs",
                "query_kwargs": { "response_mode": "tree_summarize" }
            }
        ],
        "logging": { "filter": "trellis=debug" }
    });
    fs::write(&path, serde_json::to_string_pretty(&document).unwrap())
        .await
        .unwrap();

    let config = TrellisConfig::load(Some(&path)).unwrap();
    assert_eq!(config.prompt_helper.max_input_size, 2048);
    assert_eq!(config.prompt_helper.max_chunk_overlap, 20);
    assert!(config.query.recursive);
    assert_eq!(config.query.max_depth, 4);
    assert_eq!(config.query.timeout(), Some(Duration::from_secs(15)));
    assert_eq!(config.logging.filter, "trellis=debug");

    assert_eq!(config.query_configs.len(), 2);
    let embedding = &config.query_configs[0];
    assert_eq!(embedding.index_struct_type, "list");
    assert_eq!(embedding.query_mode, "embedding");
    assert_eq!(embedding.query_kwargs["similarity_top_k"], serde_json::json!(3));
    let tree = &config.query_configs[1];
    assert_eq!(tree.query_mode, "");
    assert_eq!(tree.index_struct_id.as_deref(), Some("docs"));
}

#[tokio::test]
async fn test_load_toml_file_with_llm_backend() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("trellis.toml");
    fs::write(
        &path,
        r#"
[llm]
provider = "ollama"
model = "llama3"
context_window = 8192

[query]
use_async = true
"#,
    )
    .await
    .unwrap();

    let config = TrellisConfig::load(Some(&path)).unwrap();
    let llm = config.llm.expect("llm section");
    assert_eq!(llm.provider, "ollama");
    assert!(llm.is_local());
    assert_eq!(llm.metadata().context_window, 8192);
    assert!(config.query.use_async);
    assert_eq!(config.query.max_depth, 32);
}

#[tokio::test]
async fn test_invalid_file_is_a_configuration_error() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("broken.toml");
    fs::write(&path, "[prompt_helper]\nmax_input_size = 100\nnum_output = 200\n")
        .await
        .unwrap();

    let err = TrellisConfig::load(Some(&path)).unwrap_err();
    assert!(matches!(err, TrellisError::Configuration { .. }));
    assert!(err.is_client_error());
}

#[test]
fn test_missing_file_is_an_error() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("absent.toml");
    assert!(TrellisConfig::load(Some(&path)).is_err());
}
