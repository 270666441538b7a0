//! Persisted index structures.
//!
//! An [`IndexStruct`] is pure bookkeeping: node ids plus the structural metadata of one
//! index (tree edges, keyword postings, vector handles, table schema). Node payloads
//! live in the [`DocumentStore`](crate::docstore::DocumentStore).

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use strum::{AsRefStr, Display, EnumIter, EnumString};
use uuid::Uuid;

/// Type tag of an index structure.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    Serialize,
    Deserialize,
    Display,
    EnumString,
    EnumIter,
    AsRefStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum IndexStructType {
    /// Hierarchical summary tree.
    Tree,
    /// Ordered node list (summary index).
    List,
    /// Keyword → node postings.
    KeywordTable,
    /// Vector store backed index.
    #[serde(rename = "dict")]
    #[strum(to_string = "dict")]
    Vector,
    /// Structured table (SQL or dataframe source).
    Table,
}

fn new_index_id() -> String {
    Uuid::new_v4().to_string()
}

/// Tree index: numbered nodes, root set and parent → children edges.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexGraph {
    /// Index id.
    pub index_id: String,
    /// Optional summary used when the index is composed into a graph.
    #[serde(default)]
    pub summary: Option<String>,
    /// Position → node id for every node of the tree.
    #[serde(default)]
    pub all_nodes: BTreeMap<usize, String>,
    /// Position → node id for the top level.
    #[serde(default)]
    pub root_nodes: BTreeMap<usize, String>,
    /// Parent node id → child node ids in position order.
    #[serde(default)]
    pub node_id_to_children: HashMap<String, Vec<String>>,
}

impl IndexGraph {
    /// Create an empty tree with a fresh id.
    pub fn new() -> Self {
        Self {
            index_id: new_index_id(),
            summary: None,
            all_nodes: BTreeMap::new(),
            root_nodes: BTreeMap::new(),
            node_id_to_children: HashMap::new(),
        }
    }

    /// Next free position.
    pub fn size(&self) -> usize {
        self.all_nodes.keys().next_back().map_or(0, |last| last + 1)
    }

    /// Insert a node at the next free position.
    ///
    /// Without a parent the node becomes a root; with one it is appended to the
    /// parent's children.
    pub fn insert(&mut self, node_id: impl Into<String>, parent_id: Option<&str>) -> usize {
        let node_id = node_id.into();
        let position = self.size();
        self.all_nodes.insert(position, node_id.clone());
        match parent_id {
            Some(parent) => self
                .node_id_to_children
                .entry(parent.to_string())
                .or_default()
                .push(node_id),
            None => {
                self.root_nodes.insert(position, node_id);
            }
        }
        position
    }

    /// Replace the root set with the given node ids, which must already be inserted.
    pub fn set_roots(&mut self, node_ids: &[String]) {
        self.root_nodes = self
            .all_nodes
            .iter()
            .filter(|(_, id)| node_ids.contains(id))
            .map(|(pos, id)| (*pos, id.clone()))
            .collect();
    }

    /// Root node ids in position order.
    pub fn root_ids(&self) -> Vec<String> {
        self.root_nodes.values().cloned().collect()
    }

    /// Children of a node in insertion order.
    pub fn children(&self, node_id: &str) -> &[String] {
        self.node_id_to_children
            .get(node_id)
            .map_or(&[], Vec::as_slice)
    }

    /// Node ids without children, in position order.
    pub fn leaf_ids(&self) -> Vec<String> {
        self.all_nodes
            .values()
            .filter(|id| self.children(id).is_empty())
            .cloned()
            .collect()
    }

    /// Whether the tree has nodes but no hierarchy over them.
    pub fn is_flat(&self) -> bool {
        self.node_id_to_children.values().all(Vec::is_empty)
    }
}

impl Default for IndexGraph {
    fn default() -> Self {
        Self::new()
    }
}

/// List index: an ordered sequence of node ids.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexList {
    /// Index id.
    pub index_id: String,
    /// Optional summary used when the index is composed into a graph.
    #[serde(default)]
    pub summary: Option<String>,
    /// Node ids in stored order.
    #[serde(default)]
    pub nodes: Vec<String>,
}

impl IndexList {
    /// Create an empty list with a fresh id.
    pub fn new() -> Self {
        Self {
            index_id: new_index_id(),
            summary: None,
            nodes: Vec::new(),
        }
    }

    /// Append a node id.
    pub fn add_node(&mut self, node_id: impl Into<String>) {
        self.nodes.push(node_id.into());
    }
}

impl Default for IndexList {
    fn default() -> Self {
        Self::new()
    }
}

/// Keyword table: keyword → set of node ids.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KeywordTable {
    /// Index id.
    pub index_id: String,
    /// Optional summary used when the index is composed into a graph.
    #[serde(default)]
    pub summary: Option<String>,
    /// Postings.
    #[serde(default)]
    pub table: BTreeMap<String, BTreeSet<String>>,
}

impl KeywordTable {
    /// Create an empty table with a fresh id.
    pub fn new() -> Self {
        Self {
            index_id: new_index_id(),
            summary: None,
            table: BTreeMap::new(),
        }
    }

    /// Post `node_id` under every keyword.
    pub fn add_node<I, S>(&mut self, keywords: I, node_id: &str)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        for keyword in keywords {
            self.table
                .entry(keyword.into())
                .or_default()
                .insert(node_id.to_string());
        }
    }

    /// Whether the keyword has postings.
    pub fn contains(&self, keyword: &str) -> bool {
        self.table.contains_key(keyword)
    }

    /// Node ids posted under a keyword.
    pub fn postings(&self, keyword: &str) -> Option<&BTreeSet<String>> {
        self.table.get(keyword)
    }

    /// Every node id in the table.
    pub fn node_ids(&self) -> BTreeSet<String> {
        self.table.values().flatten().cloned().collect()
    }
}

impl Default for KeywordTable {
    fn default() -> Self {
        Self::new()
    }
}

/// Vector index: vector store id → node id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VectorIndexDict {
    /// Index id.
    pub index_id: String,
    /// Optional summary used when the index is composed into a graph.
    #[serde(default)]
    pub summary: Option<String>,
    /// Vector id → node id.
    #[serde(default)]
    pub nodes_dict: BTreeMap<String, String>,
}

impl VectorIndexDict {
    /// Create an empty mapping with a fresh id.
    pub fn new() -> Self {
        Self {
            index_id: new_index_id(),
            summary: None,
            nodes_dict: BTreeMap::new(),
        }
    }

    /// Record that `vector_id` in the store holds the embedding of `node_id`.
    pub fn add_node(&mut self, node_id: impl Into<String>, vector_id: impl Into<String>) {
        self.nodes_dict.insert(vector_id.into(), node_id.into());
    }

    /// Node id behind a vector id.
    pub fn node_id(&self, vector_id: &str) -> Option<&str> {
        self.nodes_dict.get(vector_id).map(String::as_str)
    }
}

impl Default for VectorIndexDict {
    fn default() -> Self {
        Self::new()
    }
}

/// Column of a structured table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnSchema {
    /// Column name.
    pub name: String,
    /// Declared type, e.g. `INTEGER`.
    pub data_type: String,
}

impl ColumnSchema {
    /// Create a column description.
    pub fn new(name: impl Into<String>, data_type: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            data_type: data_type.into(),
        }
    }
}

/// Struct-store index: schema of a table queried through a structured source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StructTable {
    /// Index id.
    pub index_id: String,
    /// Optional summary used when the index is composed into a graph.
    #[serde(default)]
    pub summary: Option<String>,
    /// Table or dataframe name.
    pub table_name: String,
    /// Column schema.
    #[serde(default)]
    pub columns: Vec<ColumnSchema>,
    /// Extra natural-language context about the table.
    #[serde(default)]
    pub context: Option<String>,
}

impl StructTable {
    /// Create a table description with a fresh id.
    pub fn new(table_name: impl Into<String>, columns: Vec<ColumnSchema>) -> Self {
        Self {
            index_id: new_index_id(),
            summary: None,
            table_name: table_name.into(),
            columns,
            context: None,
        }
    }

    /// Schema rendered for prompts, e.g. `people(name TEXT, age INTEGER)`.
    pub fn schema_text(&self) -> String {
        let columns: Vec<String> = self
            .columns
            .iter()
            .map(|c| format!("{} {}", c.name, c.data_type))
            .collect();
        format!("{}({})", self.table_name, columns.join(", "))
    }
}

/// Any index structure.
#[derive(Debug, Clone, PartialEq)]
pub enum IndexStruct {
    /// Tree index.
    Tree(IndexGraph),
    /// List index.
    List(IndexList),
    /// Keyword table index.
    KeywordTable(KeywordTable),
    /// Vector index.
    Vector(VectorIndexDict),
    /// Struct-store index.
    Table(StructTable),
}

impl IndexStruct {
    /// Type tag.
    pub fn struct_type(&self) -> IndexStructType {
        match self {
            Self::Tree(_) => IndexStructType::Tree,
            Self::List(_) => IndexStructType::List,
            Self::KeywordTable(_) => IndexStructType::KeywordTable,
            Self::Vector(_) => IndexStructType::Vector,
            Self::Table(_) => IndexStructType::Table,
        }
    }

    /// Index id.
    pub fn index_id(&self) -> &str {
        match self {
            Self::Tree(s) => &s.index_id,
            Self::List(s) => &s.index_id,
            Self::KeywordTable(s) => &s.index_id,
            Self::Vector(s) => &s.index_id,
            Self::Table(s) => &s.index_id,
        }
    }

    /// Replace the index id.
    pub fn set_index_id(&mut self, index_id: impl Into<String>) {
        let index_id = index_id.into();
        match self {
            Self::Tree(s) => s.index_id = index_id,
            Self::List(s) => s.index_id = index_id,
            Self::KeywordTable(s) => s.index_id = index_id,
            Self::Vector(s) => s.index_id = index_id,
            Self::Table(s) => s.index_id = index_id,
        }
    }

    /// Summary text, if set.
    pub fn summary(&self) -> Option<&str> {
        match self {
            Self::Tree(s) => s.summary.as_deref(),
            Self::List(s) => s.summary.as_deref(),
            Self::KeywordTable(s) => s.summary.as_deref(),
            Self::Vector(s) => s.summary.as_deref(),
            Self::Table(s) => s.summary.as_deref(),
        }
    }

    /// Set the summary text.
    pub fn set_summary(&mut self, summary: impl Into<String>) {
        let summary = Some(summary.into());
        match self {
            Self::Tree(s) => s.summary = summary,
            Self::List(s) => s.summary = summary,
            Self::KeywordTable(s) => s.summary = summary,
            Self::Vector(s) => s.summary = summary,
            Self::Table(s) => s.summary = summary,
        }
    }

    /// Serialize the variant payload without a type tag.
    pub fn payload(&self) -> serde_json::Result<serde_json::Value> {
        match self {
            Self::Tree(s) => serde_json::to_value(s),
            Self::List(s) => serde_json::to_value(s),
            Self::KeywordTable(s) => serde_json::to_value(s),
            Self::Vector(s) => serde_json::to_value(s),
            Self::Table(s) => serde_json::to_value(s),
        }
    }
}

impl From<IndexGraph> for IndexStruct {
    fn from(s: IndexGraph) -> Self {
        Self::Tree(s)
    }
}

impl From<IndexList> for IndexStruct {
    fn from(s: IndexList) -> Self {
        Self::List(s)
    }
}

impl From<KeywordTable> for IndexStruct {
    fn from(s: KeywordTable) -> Self {
        Self::KeywordTable(s)
    }
}

impl From<VectorIndexDict> for IndexStruct {
    fn from(s: VectorIndexDict) -> Self {
        Self::Vector(s)
    }
}

impl From<StructTable> for IndexStruct {
    fn from(s: StructTable) -> Self {
        Self::Table(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn test_struct_type_tags() {
        assert_eq!(IndexStructType::Vector.to_string(), "dict");
        assert_eq!(
            IndexStructType::from_str("keyword_table").unwrap(),
            IndexStructType::KeywordTable
        );
        assert!(IndexStructType::from_str("graph").is_err());
        assert_eq!(
            serde_json::to_value(IndexStructType::Vector).unwrap(),
            serde_json::json!("dict")
        );
    }

    #[test]
    fn test_tree_roots_children_and_leaves() {
        let mut tree = IndexGraph::new();
        tree.insert("a", None);
        tree.insert("a1", Some("a"));
        tree.insert("a2", Some("a"));
        tree.insert("b", None);

        assert_eq!(tree.root_ids(), vec!["a".to_string(), "b".to_string()]);
        assert_eq!(tree.children("a"), ["a1".to_string(), "a2".to_string()]);
        assert_eq!(
            tree.leaf_ids(),
            vec!["a1".to_string(), "a2".to_string(), "b".to_string()]
        );
        assert!(!tree.is_flat());
    }

    #[test]
    fn test_keyword_table_postings() {
        let mut table = KeywordTable::new();
        table.add_node(["rust", "tokio"], "n1");
        table.add_node(["rust"], "n2");
        assert_eq!(table.postings("rust").map(BTreeSet::len), Some(2));
        assert!(!table.contains("python"));
        assert_eq!(table.node_ids().len(), 2);
    }

    #[test]
    fn test_schema_text() {
        let table = StructTable::new(
            "people",
            vec![
                ColumnSchema::new("name", "TEXT"),
                ColumnSchema::new("age", "INTEGER"),
            ],
        );
        assert_eq!(table.schema_text(), "people(name TEXT, age INTEGER)");
    }
}
