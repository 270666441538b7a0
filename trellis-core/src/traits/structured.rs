//! Structured data sources behind struct-store indices.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Rows returned by a structured query.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TableResult {
    /// Column names.
    pub columns: Vec<String>,
    /// Row values in column order.
    pub rows: Vec<Vec<serde_json::Value>>,
}

impl TableResult {
    /// Render as text: a header line, then one line per row.
    pub fn to_text(&self) -> String {
        let mut lines = Vec::with_capacity(self.rows.len() + 1);
        lines.push(self.columns.join(" | "));
        for row in &self.rows {
            let cells: Vec<String> = row
                .iter()
                .map(|v| match v {
                    serde_json::Value::String(s) => s.clone(),
                    other => other.to_string(),
                })
                .collect();
            lines.push(cells.join(" | "));
        }
        lines.join("\n")
    }
}

/// Executes structured queries (SQL, dataframe expressions) against a backing source.
#[async_trait]
pub trait StructuredDataSource: Send + Sync + std::fmt::Debug {
    /// Query language name used in prompts, e.g. `SQL`.
    fn dialect(&self) -> &str {
        "SQL"
    }

    /// Run a structured query.
    async fn execute(&self, structured_query: &str) -> Result<TableResult>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_table_result_text() {
        let result = TableResult {
            columns: vec!["name".into(), "age".into()],
            rows: vec![vec![json!("ada"), json!(36)]],
        };
        assert_eq!(result.to_text(), "name | age\nada | 36");
    }
}
