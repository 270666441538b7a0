//! In-memory document store with type-tagged persistence.
//!
//! The store exclusively owns documents, nodes and index structs by id. Lookups hand
//! out clones, so queries never hold the lock across an await point. Writes are
//! serialized through an `RwLock`; inserting while a query is in flight is safe but
//! the query may or may not observe the write.
//!
//! Each entry serializes to a JSON object carrying a `__type__` key. Loading dispatches
//! on that key through a [`TypeRegistry`]; a missing key or the `Document` tag loads a
//! plain document.

use serde_json::{Map, Value};
use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use tracing::{debug, info};
use uuid::Uuid;

use crate::error::{Result, TrellisError};
use crate::types::{
    Document, IndexGraph, IndexList, IndexStruct, IndexStructType, KeywordTable, Node,
    StructTable, VectorIndexDict,
};

/// Key holding the type tag in an entry's serialized form.
pub const TYPE_KEY: &str = "__type__";

/// Tag of plain documents.
pub const DOCUMENT_TAG: &str = "Document";

/// Tag of nodes.
pub const NODE_TAG: &str = "node";

/// Anything the store can hold.
#[derive(Debug, Clone, PartialEq)]
pub enum StoreEntry {
    /// A source document.
    Document(Document),
    /// A node.
    Node(Node),
    /// An index structure.
    IndexStruct(IndexStruct),
}

impl StoreEntry {
    /// The entry's id, if assigned.
    pub fn id(&self) -> Option<&str> {
        match self {
            Self::Document(doc) => doc.doc_id.as_deref(),
            Self::Node(node) => Some(&node.id),
            Self::IndexStruct(index_struct) => Some(index_struct.index_id()),
        }
    }

    fn set_id(&mut self, id: String) {
        match self {
            Self::Document(doc) => doc.doc_id = Some(id),
            Self::Node(node) => node.id = id,
            Self::IndexStruct(index_struct) => index_struct.set_index_id(id),
        }
    }

    /// The `__type__` tag written on persistence.
    pub fn type_tag(&self) -> String {
        match self {
            Self::Document(_) => DOCUMENT_TAG.to_string(),
            Self::Node(_) => NODE_TAG.to_string(),
            Self::IndexStruct(index_struct) => index_struct.struct_type().to_string(),
        }
    }

    /// Serialize to a tagged JSON object.
    pub fn to_value(&self) -> Result<Value> {
        let payload = match self {
            Self::Document(doc) => serde_json::to_value(doc)?,
            Self::Node(node) => serde_json::to_value(node)?,
            Self::IndexStruct(index_struct) => index_struct.payload()?,
        };
        let Value::Object(mut map) = payload else {
            return Err(TrellisError::internal("store entry did not serialize to an object"));
        };
        map.insert(TYPE_KEY.to_string(), Value::String(self.type_tag()));
        Ok(Value::Object(map))
    }
}

impl From<Document> for StoreEntry {
    fn from(doc: Document) -> Self {
        Self::Document(doc)
    }
}

impl From<Node> for StoreEntry {
    fn from(node: Node) -> Self {
        Self::Node(node)
    }
}

impl From<IndexStruct> for StoreEntry {
    fn from(index_struct: IndexStruct) -> Self {
        Self::IndexStruct(index_struct)
    }
}

/// Deserializer for one type tag. Receives the payload with the tag removed.
pub type EntryLoader = fn(Value) -> Result<StoreEntry>;

/// Type tag → deserializer table used when loading a persisted store.
#[derive(Debug, Clone)]
pub struct TypeRegistry {
    loaders: HashMap<String, EntryLoader>,
}

impl TypeRegistry {
    /// An empty registry. Documents still load, since they are the fallback.
    pub fn empty() -> Self {
        let mut registry = Self {
            loaders: HashMap::new(),
        };
        registry.register(DOCUMENT_TAG, |v| {
            Ok(StoreEntry::Document(serde_json::from_value(v)?))
        });
        registry
    }

    /// Register (or replace) the loader for a tag.
    pub fn register(&mut self, type_tag: impl Into<String>, loader: EntryLoader) {
        self.loaders.insert(type_tag.into(), loader);
    }

    /// Whether a tag is known.
    pub fn contains(&self, type_tag: &str) -> bool {
        self.loaders.contains_key(type_tag)
    }

    /// Load one tagged entry.
    pub fn load(&self, value: Value) -> Result<StoreEntry> {
        let Value::Object(mut map) = value else {
            return Err(TrellisError::validation("stored entry is not a JSON object"));
        };
        let tag = match map.remove(TYPE_KEY) {
            None => DOCUMENT_TAG.to_string(),
            Some(Value::String(tag)) => tag,
            Some(other) => {
                return Err(TrellisError::UnknownType {
                    type_tag: other.to_string(),
                });
            }
        };
        let loader = self
            .loaders
            .get(&tag)
            .ok_or(TrellisError::UnknownType { type_tag: tag })?;
        loader(Value::Object(map))
    }
}

impl Default for TypeRegistry {
    /// Registry with documents, nodes and every built-in index struct.
    fn default() -> Self {
        let mut registry = Self::empty();
        registry.register(NODE_TAG, |v| Ok(StoreEntry::Node(serde_json::from_value(v)?)));
        registry.register(IndexStructType::Tree.to_string(), |v| {
            Ok(IndexStruct::Tree(serde_json::from_value::<IndexGraph>(v)?).into())
        });
        registry.register(IndexStructType::List.to_string(), |v| {
            Ok(IndexStruct::List(serde_json::from_value::<IndexList>(v)?).into())
        });
        registry.register(IndexStructType::KeywordTable.to_string(), |v| {
            Ok(IndexStruct::KeywordTable(serde_json::from_value::<KeywordTable>(v)?).into())
        });
        registry.register(IndexStructType::Vector.to_string(), |v| {
            Ok(IndexStruct::Vector(serde_json::from_value::<VectorIndexDict>(v)?).into())
        });
        registry.register(IndexStructType::Table.to_string(), |v| {
            Ok(IndexStruct::Table(serde_json::from_value::<StructTable>(v)?).into())
        });
        registry
    }
}

/// Options for [`DocumentStore::add_documents`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AddOptions {
    /// Assign a fresh id to entries that have none.
    pub generate_id: bool,
    /// Replace an existing entry with the same id (last write wins).
    pub allow_overwrite: bool,
}

impl Default for AddOptions {
    fn default() -> Self {
        Self {
            generate_id: true,
            allow_overwrite: true,
        }
    }
}

/// Keyed store of documents, nodes and index structs.
#[derive(Debug, Default)]
pub struct DocumentStore {
    docs: RwLock<BTreeMap<String, StoreEntry>>,
}

impl DocumentStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a store from entries that already carry ids.
    pub fn from_entries<I>(entries: I) -> Result<Self>
    where
        I: IntoIterator<Item = StoreEntry>,
    {
        let store = Self::new();
        store.add_documents(
            entries,
            AddOptions {
                generate_id: false,
                allow_overwrite: true,
            },
        )?;
        Ok(store)
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, BTreeMap<String, StoreEntry>>> {
        self.docs
            .read()
            .map_err(|_| TrellisError::internal("document store lock poisoned"))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, BTreeMap<String, StoreEntry>>> {
        self.docs
            .write()
            .map_err(|_| TrellisError::internal("document store lock poisoned"))
    }

    /// Number of entries.
    pub fn len(&self) -> Result<usize> {
        Ok(self.read()?.len())
    }

    /// Whether the store is empty.
    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.read()?.is_empty())
    }

    /// All ids in sorted order.
    pub fn ids(&self) -> Result<Vec<String>> {
        Ok(self.read()?.keys().cloned().collect())
    }

    /// Whether an id is present.
    pub fn document_exists(&self, id: &str) -> Result<bool> {
        Ok(self.read()?.contains_key(id))
    }

    /// A fresh id that no current entry uses.
    pub fn get_new_id(&self) -> Result<String> {
        let docs = self.read()?;
        loop {
            let candidate = Uuid::new_v4().to_string();
            if !docs.contains_key(&candidate) {
                return Ok(candidate);
            }
        }
    }

    /// Insert entries, returning their ids in input order.
    ///
    /// Entries without an id get a fresh one when `generate_id` is set and are
    /// rejected otherwise. An id collision overwrites unless `allow_overwrite` is off,
    /// in which case [`TrellisError::DuplicateId`] is returned and nothing after the
    /// offending entry is inserted.
    pub fn add_documents<I>(&self, entries: I, options: AddOptions) -> Result<Vec<String>>
    where
        I: IntoIterator<Item = StoreEntry>,
    {
        let mut docs = self.write()?;
        let mut ids = Vec::new();
        for mut entry in entries {
            let id = match entry.id() {
                Some(id) if !id.is_empty() => id.to_string(),
                _ if options.generate_id => {
                    let mut candidate = Uuid::new_v4().to_string();
                    while docs.contains_key(&candidate) {
                        candidate = Uuid::new_v4().to_string();
                    }
                    entry.set_id(candidate.clone());
                    candidate
                }
                _ => {
                    return Err(TrellisError::validation(
                        "entry has no id and id generation is disabled",
                    ));
                }
            };
            if !options.allow_overwrite && docs.contains_key(&id) {
                return Err(TrellisError::DuplicateId { id });
            }
            if docs.insert(id.clone(), entry).is_some() {
                debug!("Overwrote docstore entry {}", id);
            }
            ids.push(id);
        }
        Ok(ids)
    }

    /// Insert one entry with default options (generate id, overwrite).
    pub fn insert(&self, entry: impl Into<StoreEntry>) -> Result<String> {
        let mut ids = self.add_documents([entry.into()], AddOptions::default())?;
        ids.pop()
            .ok_or_else(|| TrellisError::internal("insert returned no id"))
    }

    /// Insert nodes, overwriting on collision.
    pub fn add_nodes<I>(&self, nodes: I) -> Result<Vec<String>>
    where
        I: IntoIterator<Item = Node>,
    {
        self.add_documents(nodes.into_iter().map(StoreEntry::Node), AddOptions::default())
    }

    /// Look up an entry.
    ///
    /// With `raise_error` an absent id is [`TrellisError::NotFound`]; without it the
    /// result is `Ok(None)`.
    pub fn get_document(&self, id: &str, raise_error: bool) -> Result<Option<StoreEntry>> {
        match self.read()?.get(id) {
            Some(entry) => Ok(Some(entry.clone())),
            None if raise_error => Err(TrellisError::not_found(format!(
                "doc_id {id} not found in document store"
            ))),
            None => Ok(None),
        }
    }

    /// Look up a node by id.
    pub fn get_node(&self, id: &str) -> Result<Node> {
        match self.get_document(id, true)? {
            Some(StoreEntry::Node(node)) => Ok(node),
            Some(other) => Err(TrellisError::validation(format!(
                "entry {id} is a {} and not a node",
                other.type_tag()
            ))),
            None => Err(TrellisError::not_found(format!("node {id}"))),
        }
    }

    /// Look up several nodes, preserving order.
    pub fn get_nodes<S: AsRef<str>>(&self, ids: &[S]) -> Result<Vec<Node>> {
        ids.iter().map(|id| self.get_node(id.as_ref())).collect()
    }

    /// Look up an index struct by id.
    pub fn get_index_struct(&self, id: &str) -> Result<IndexStruct> {
        match self.get_document(id, true)? {
            Some(StoreEntry::IndexStruct(index_struct)) => Ok(index_struct),
            Some(other) => Err(TrellisError::validation(format!(
                "entry {id} is a {} and not an index struct",
                other.type_tag()
            ))),
            None => Err(TrellisError::not_found(format!("index struct {id}"))),
        }
    }

    /// Remove an entry and return it.
    ///
    /// Absent ids raise or return `Ok(None)` per `raise_error`.
    pub fn delete_document(&self, id: &str, raise_error: bool) -> Result<Option<StoreEntry>> {
        match self.write()?.remove(id) {
            Some(entry) => Ok(Some(entry)),
            None if raise_error => Err(TrellisError::not_found(format!(
                "doc_id {id} not found in document store"
            ))),
            None => Ok(None),
        }
    }

    /// Copy every entry of `other` into this store, overwriting collisions.
    pub fn update_docstore(&self, other: &DocumentStore) -> Result<()> {
        let incoming: Vec<StoreEntry> = other.read()?.values().cloned().collect();
        self.add_documents(
            incoming,
            AddOptions {
                generate_id: false,
                allow_overwrite: true,
            },
        )?;
        Ok(())
    }

    /// Serialize as `{"docs": {id: tagged_entry}}`.
    pub fn serialize_to_value(&self) -> Result<Value> {
        let docs = self.read()?;
        let mut out = Map::new();
        for (id, entry) in docs.iter() {
            out.insert(id.clone(), entry.to_value()?);
        }
        Ok(serde_json::json!({ "docs": Value::Object(out) }))
    }

    /// Load a store from its serialized form.
    pub fn load_from_value(value: Value, registry: &TypeRegistry) -> Result<Self> {
        let Value::Object(mut root) = value else {
            return Err(TrellisError::validation("serialized docstore is not an object"));
        };
        let Some(Value::Object(docs)) = root.remove("docs") else {
            return Err(TrellisError::validation("serialized docstore has no 'docs' map"));
        };
        let store = Self::new();
        {
            let mut guard = store.write()?;
            for (id, raw) in docs {
                let entry = registry.load(raw)?;
                guard.insert(id, entry);
            }
        }
        Ok(store)
    }

    /// Write the serialized store to a JSON file.
    pub async fn persist(&self, path: impl AsRef<Path>) -> Result<()> {
        let value = self.serialize_to_value()?;
        let body = serde_json::to_vec_pretty(&value)?;
        tokio::fs::write(path.as_ref(), body).await?;
        info!("Persisted document store to {}", path.as_ref().display());
        Ok(())
    }

    /// Load a store previously written with [`DocumentStore::persist`].
    pub async fn from_persist_path(path: impl AsRef<Path>, registry: &TypeRegistry) -> Result<Self> {
        let body = tokio::fs::read(path.as_ref()).await?;
        let value: Value = serde_json::from_slice(&body)?;
        Self::load_from_value(value, registry)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn store_with(entries: Vec<StoreEntry>) -> DocumentStore {
        DocumentStore::from_entries(entries).unwrap()
    }

    #[test]
    fn test_explicit_id_twice_overwrites() {
        let store = DocumentStore::new();
        store.insert(Document::new("first").with_id("d1")).unwrap();
        store.insert(Document::new("second").with_id("d1")).unwrap();

        assert_eq!(store.len().unwrap(), 1);
        let Some(StoreEntry::Document(doc)) = store.get_document("d1", true).unwrap() else {
            panic!("expected a document");
        };
        assert_eq!(doc.text, "second");
    }

    #[test]
    fn test_overwrite_can_be_refused() {
        let store = store_with(vec![Document::new("a").with_id("d1").into()]);
        let err = store
            .add_documents(
                [Document::new("b").with_id("d1").into()],
                AddOptions {
                    generate_id: false,
                    allow_overwrite: false,
                },
            )
            .unwrap_err();
        assert!(matches!(err, TrellisError::DuplicateId { id } if id == "d1"));
    }

    #[test]
    fn test_missing_id_generated_or_rejected() {
        let store = DocumentStore::new();
        let ids = store
            .add_documents([Document::new("no id").into()], AddOptions::default())
            .unwrap();
        assert_eq!(ids.len(), 1);
        assert!(store.document_exists(&ids[0]).unwrap());

        let err = store
            .add_documents(
                [Document::new("no id").into()],
                AddOptions {
                    generate_id: false,
                    allow_overwrite: true,
                },
            )
            .unwrap_err();
        assert!(matches!(err, TrellisError::Validation { .. }));
    }

    #[test]
    fn test_get_new_id_never_collides() {
        let store = DocumentStore::new();
        for i in 0..50 {
            store.insert(Document::new(format!("doc {i}"))).unwrap();
        }
        for _ in 0..50 {
            let id = store.get_new_id().unwrap();
            assert!(!store.document_exists(&id).unwrap());
        }
    }

    #[test]
    fn test_delete_honours_raise_error() {
        let store = store_with(vec![Node::new("n").with_id("n1").into()]);

        let removed = store.delete_document("n1", true).unwrap();
        assert!(matches!(removed, Some(StoreEntry::Node(n)) if n.id == "n1"));

        assert!(store.delete_document("n1", false).unwrap().is_none());
        assert!(matches!(
            store.delete_document("n1", true),
            Err(TrellisError::NotFound { .. })
        ));
        assert!(store.get_document("n1", false).unwrap().is_none());
    }

    #[test]
    fn test_typed_getters_reject_wrong_kind() {
        let mut list = IndexList::new();
        list.index_id = "idx".to_string();
        let store = store_with(vec![
            Node::new("n").with_id("n1").into(),
            IndexStruct::List(list).into(),
        ]);
        assert!(store.get_node("n1").is_ok());
        assert!(store.get_index_struct("idx").is_ok());
        assert!(matches!(
            store.get_node("idx"),
            Err(TrellisError::Validation { .. })
        ));
    }

    #[test]
    fn test_round_trip_through_registry() {
        let mut tree = IndexGraph::new();
        tree.insert("n1", None);
        tree.insert("n2", Some("n1"));
        let mut keywords = KeywordTable::new();
        keywords.add_node(["rust"], "n1");
        let mut vectors = VectorIndexDict::new();
        vectors.add_node("n1", "v1");

        let store = store_with(vec![
            Document::new("doc").with_id("d1").into(),
            Node::new("one").with_id("n1").into(),
            Node::index("child summary", "child").with_id("n2").into(),
            IndexStruct::Tree(tree).into(),
            IndexStruct::KeywordTable(keywords).into(),
            IndexStruct::Vector(vectors).into(),
            IndexStruct::Table(StructTable::new("t", vec![])).into(),
        ]);

        let value = store.serialize_to_value().unwrap();
        let loaded = DocumentStore::load_from_value(value, &TypeRegistry::default()).unwrap();

        assert_eq!(loaded.ids().unwrap(), store.ids().unwrap());
        for id in store.ids().unwrap() {
            assert_eq!(
                loaded.get_document(&id, true).unwrap(),
                store.get_document(&id, true).unwrap()
            );
        }
    }

    #[test]
    fn test_missing_tag_loads_document() {
        let value = serde_json::json!({
            "docs": {
                "d1": { "doc_id": "d1", "text": "plain" },
                "d2": { "doc_id": "d2", "text": "tagged", "__type__": "Document" }
            }
        });
        let store = DocumentStore::load_from_value(value, &TypeRegistry::empty()).unwrap();
        assert!(matches!(
            store.get_document("d1", true).unwrap(),
            Some(StoreEntry::Document(_))
        ));
        assert!(matches!(
            store.get_document("d2", true).unwrap(),
            Some(StoreEntry::Document(_))
        ));
    }

    #[test]
    fn test_unknown_tag_is_named() {
        let value = serde_json::json!({ "docs": { "x": { "__type__": "hologram" } } });
        let err = DocumentStore::load_from_value(value, &TypeRegistry::default()).unwrap_err();
        assert!(matches!(err, TrellisError::UnknownType { type_tag } if type_tag == "hologram"));
    }

    #[tokio::test]
    async fn test_persist_and_reload() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("docstore.json");
        let store = store_with(vec![Node::new("persisted").with_id("n1").into()]);

        store.persist(&path).await.unwrap();
        let loaded = DocumentStore::from_persist_path(&path, &TypeRegistry::default())
            .await
            .unwrap();
        assert_eq!(loaded.get_node("n1").unwrap().text, "persisted");
    }
}
