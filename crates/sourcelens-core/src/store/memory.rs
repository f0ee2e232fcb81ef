//! In-memory graph store
//!
//! Reference backend used by tests and single-process deployments. A batch is
//! staged against a copy of the graph and swapped in on success, so partial
//! batches are never observable.

use super::{id_in_project, GraphStore, WriteBatch};
use crate::error::{Error, Result};
use crate::model::{CompositeId, EdgeKind, EdgeRecord, NodeKind, NodeRecord};
use async_trait::async_trait;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::sync::RwLock;

type EdgeKey = (EdgeKind, String, String);

#[derive(Debug, Default, Clone)]
struct GraphInner {
    /// Nodes keyed by composite id; uniqueness is global, not per kind
    nodes: BTreeMap<String, NodeRecord>,
    /// Edges keyed by (kind, src, dst)
    edges: HashMap<EdgeKey, EdgeRecord>,
}

impl GraphInner {
    fn upsert_node(&mut self, node: NodeRecord) -> Result<()> {
        match self.nodes.get_mut(node.id.as_str()) {
            Some(existing) => {
                if existing.kind != node.kind {
                    return Err(Error::graph(format!(
                        "composite id {} already bound to kind {}, refusing upsert as {}",
                        node.id, existing.kind, node.kind
                    )));
                }
                // Shallow merge: incoming keys win, arrays replaced wholesale
                for (key, value) in node.properties {
                    existing.properties.insert(key, value);
                }
            }
            None => {
                self.nodes.insert(node.id.as_str().to_string(), node);
            }
        }
        Ok(())
    }

    fn upsert_edge(&mut self, edge: EdgeRecord) {
        let key = (
            edge.kind,
            edge.src.as_str().to_string(),
            edge.dst.as_str().to_string(),
        );
        match self.edges.get_mut(&key) {
            Some(existing) => {
                for (k, v) in edge.properties {
                    existing.properties.insert(k, v);
                }
            }
            None => {
                self.edges.insert(key, edge);
            }
        }
    }

    /// Remove the nodes under a file (and optionally the File node itself)
    /// together with every edge touching a removed node.
    fn delete_file(&mut self, project_id: &str, path: &str, keep_file_node: bool) {
        let file_id = CompositeId::file(project_id, path);
        let symbol_prefix = format!("{project_id}:{path}:");

        let doomed: Vec<String> = self
            .nodes
            .keys()
            .filter(|id| {
                id.starts_with(&symbol_prefix) || (!keep_file_node && **id == *file_id.as_str())
            })
            .cloned()
            .collect();

        for id in &doomed {
            self.nodes.remove(id);
        }
        self.edges
            .retain(|(_, src, dst), _| !doomed.contains(src) && !doomed.contains(dst));
    }
}

/// In-memory [`GraphStore`] implementation
#[derive(Debug, Default)]
pub struct MemoryGraphStore {
    inner: RwLock<GraphInner>,
}

impl MemoryGraphStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Total node count across all projects (test helper)
    pub fn node_count(&self) -> usize {
        self.inner.read().unwrap().nodes.len()
    }

    /// Total edge count across all projects (test helper)
    pub fn edge_count(&self) -> usize {
        self.inner.read().unwrap().edges.len()
    }
}

#[async_trait]
impl GraphStore for MemoryGraphStore {
    async fn apply(&self, batch: WriteBatch) -> Result<()> {
        let mut guard = self.inner.write().unwrap();
        // Stage on a copy so a failing upsert leaves the graph untouched
        let mut staged = guard.clone();

        for (project_id, path) in &batch.delete_file_symbols {
            staged.delete_file(project_id, path, true);
        }
        for (project_id, path) in &batch.delete_files {
            staged.delete_file(project_id, path, false);
        }
        for id in &batch.delete_nodes {
            staged.nodes.remove(id.as_str());
            staged
                .edges
                .retain(|(_, src, dst), _| src != id.as_str() && dst != id.as_str());
        }
        for node in batch.upsert_nodes {
            staged.upsert_node(node)?;
        }
        for edge in batch.upsert_edges {
            staged.upsert_edge(edge);
        }

        *guard = staged;
        Ok(())
    }

    async fn get_node(&self, kind: NodeKind, id: &CompositeId) -> Result<Option<NodeRecord>> {
        let guard = self.inner.read().unwrap();
        Ok(guard
            .nodes
            .get(id.as_str())
            .filter(|n| n.kind == kind)
            .cloned())
    }

    async fn nodes(
        &self,
        project_id: &str,
        kind: NodeKind,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<NodeRecord>> {
        let guard = self.inner.read().unwrap();
        Ok(guard
            .nodes
            .values()
            .filter(|n| n.kind == kind && id_in_project(&n.id, project_id))
            .skip(offset)
            .take(limit)
            .cloned()
            .collect())
    }

    async fn count_nodes(&self, project_id: &str, kind: NodeKind) -> Result<usize> {
        let guard = self.inner.read().unwrap();
        Ok(guard
            .nodes
            .values()
            .filter(|n| n.kind == kind && id_in_project(&n.id, project_id))
            .count())
    }

    async fn nodes_by_name(
        &self,
        project_id: &str,
        kind: NodeKind,
        name: &str,
    ) -> Result<Vec<NodeRecord>> {
        let guard = self.inner.read().unwrap();
        Ok(guard
            .nodes
            .values()
            .filter(|n| {
                n.kind == kind
                    && id_in_project(&n.id, project_id)
                    && n.properties.get("name").and_then(Value::as_str) == Some(name)
            })
            .cloned()
            .collect())
    }

    async fn edges(&self, project_id: &str, kind: EdgeKind) -> Result<Vec<EdgeRecord>> {
        let guard = self.inner.read().unwrap();
        Ok(guard
            .edges
            .values()
            .filter(|e| e.kind == kind && id_in_project(&e.src, project_id))
            .cloned()
            .collect())
    }

    async fn edges_from(&self, id: &CompositeId) -> Result<Vec<EdgeRecord>> {
        let guard = self.inner.read().unwrap();
        Ok(guard
            .edges
            .values()
            .filter(|e| e.src == *id)
            .cloned()
            .collect())
    }

    async fn edges_to(&self, id: &CompositeId) -> Result<Vec<EdgeRecord>> {
        let guard = self.inner.read().unwrap();
        Ok(guard
            .edges
            .values()
            .filter(|e| e.dst == *id)
            .cloned()
            .collect())
    }

    async fn file_hashes(&self, project_id: &str) -> Result<HashMap<String, String>> {
        let guard = self.inner.read().unwrap();
        Ok(guard
            .nodes
            .values()
            .filter(|n| n.kind == NodeKind::File && id_in_project(&n.id, project_id))
            .filter_map(|n| {
                let path = n.str_prop("path")?.to_string();
                let hash = n.str_prop("content_hash")?.to_string();
                Some((path, hash))
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn node(kind: NodeKind, id: &str, name: &str) -> NodeRecord {
        let mut props = serde_json::Map::new();
        props.insert("name".into(), json!(name));
        NodeRecord::new(kind, CompositeId::from(id.to_string()), props)
    }

    fn file_node(project: &str, path: &str, hash: &str) -> NodeRecord {
        let mut props = serde_json::Map::new();
        props.insert("path".into(), json!(path));
        props.insert("content_hash".into(), json!(hash));
        props.insert("project_id".into(), json!(project));
        NodeRecord::new(NodeKind::File, CompositeId::file(project, path), props)
    }

    #[tokio::test]
    async fn test_upsert_is_idempotent() {
        let store = MemoryGraphStore::new();
        let mut batch = WriteBatch::new();
        batch.upsert_node(node(NodeKind::Class, "p:a.py:Foo:1", "Foo"));
        batch.upsert_node(node(NodeKind::Class, "p:a.py:Foo:1", "Foo"));
        store.apply(batch.clone()).await.unwrap();
        store.apply(batch).await.unwrap();
        assert_eq!(store.node_count(), 1);
    }

    #[tokio::test]
    async fn test_upsert_merges_properties() {
        let store = MemoryGraphStore::new();

        let mut first = WriteBatch::new();
        let mut props = serde_json::Map::new();
        props.insert("name".into(), json!("Foo"));
        props.insert("placeholder".into(), json!(true));
        first.upsert_node(NodeRecord::new(
            NodeKind::Class,
            CompositeId::from("p:a.py:Foo:1".to_string()),
            props,
        ));
        store.apply(first).await.unwrap();

        let mut second = WriteBatch::new();
        let mut props = serde_json::Map::new();
        props.insert("placeholder".into(), json!(false));
        props.insert("end_line".into(), json!(12));
        second.upsert_node(NodeRecord::new(
            NodeKind::Class,
            CompositeId::from("p:a.py:Foo:1".to_string()),
            props,
        ));
        store.apply(second).await.unwrap();

        let merged = store
            .get_node(NodeKind::Class, &CompositeId::from("p:a.py:Foo:1".to_string()))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(merged.str_prop("name"), Some("Foo"), "old keys survive");
        assert_eq!(merged.bool_prop("placeholder"), Some(false), "new keys win");
        assert_eq!(merged.int_prop("end_line"), Some(12));
    }

    #[tokio::test]
    async fn test_kind_collision_fails_whole_batch() {
        let store = MemoryGraphStore::new();
        let mut setup = WriteBatch::new();
        setup.upsert_node(node(NodeKind::Class, "p:a.py:X:1", "X"));
        store.apply(setup).await.unwrap();

        let mut bad = WriteBatch::new();
        bad.upsert_node(node(NodeKind::Function, "p:a.py:ok:5", "ok"));
        bad.upsert_node(node(NodeKind::Function, "p:a.py:X:1", "X"));
        let err = store.apply(bad).await.unwrap_err();
        assert!(matches!(err, Error::Graph { .. }));
        // The valid upsert in the failed batch must not be visible
        assert_eq!(store.node_count(), 1, "failed batch must roll back entirely");
    }

    #[tokio::test]
    async fn test_delete_file_cascades() {
        let store = MemoryGraphStore::new();
        let mut batch = WriteBatch::new();
        batch.upsert_node(file_node("p", "a.py", "h1"));
        batch.upsert_node(node(NodeKind::Class, "p:a.py:Foo:1", "Foo"));
        batch.upsert_node(node(NodeKind::Function, "p:a.py:Foo.run:2", "run"));
        batch.upsert_node(file_node("p", "b.py", "h2"));
        batch.upsert_node(node(NodeKind::Function, "p:b.py:go:1", "go"));
        batch.upsert_edge(EdgeRecord::new(
            EdgeKind::Calls,
            CompositeId::from("p:b.py:go:1".to_string()),
            CompositeId::from("p:a.py:Foo.run:2".to_string()),
        ));
        store.apply(batch).await.unwrap();
        assert_eq!(store.node_count(), 5);
        assert_eq!(store.edge_count(), 1);

        let mut delete = WriteBatch::new();
        delete.delete_files.push(("p".to_string(), "a.py".to_string()));
        store.apply(delete).await.unwrap();

        assert_eq!(store.node_count(), 2, "file and its symbols removed");
        assert_eq!(store.edge_count(), 0, "edges into deleted nodes removed");
        assert!(store
            .get_node(NodeKind::File, &CompositeId::file("p", "b.py"))
            .await
            .unwrap()
            .is_some());
    }

    #[tokio::test]
    async fn test_delete_symbols_keeps_file_node() {
        let store = MemoryGraphStore::new();
        let mut batch = WriteBatch::new();
        batch.upsert_node(file_node("p", "a.py", "h1"));
        batch.upsert_node(node(NodeKind::Class, "p:a.py:Foo:1", "Foo"));
        store.apply(batch).await.unwrap();

        let mut replace = WriteBatch::new();
        replace
            .delete_file_symbols
            .push(("p".to_string(), "a.py".to_string()));
        replace.upsert_node(node(NodeKind::Class, "p:a.py:Bar:1", "Bar"));
        store.apply(replace).await.unwrap();

        assert!(store
            .get_node(NodeKind::File, &CompositeId::file("p", "a.py"))
            .await
            .unwrap()
            .is_some());
        assert!(store
            .get_node(NodeKind::Class, &CompositeId::from("p:a.py:Foo:1".to_string()))
            .await
            .unwrap()
            .is_none());
        assert!(store
            .get_node(NodeKind::Class, &CompositeId::from("p:a.py:Bar:1".to_string()))
            .await
            .unwrap()
            .is_some());
    }

    #[tokio::test]
    async fn test_file_hashes_and_project_scoping() {
        let store = MemoryGraphStore::new();
        let mut batch = WriteBatch::new();
        batch.upsert_node(file_node("p1", "a.py", "h1"));
        batch.upsert_node(file_node("p2", "a.py", "h2"));
        store.apply(batch).await.unwrap();

        let hashes = store.file_hashes("p1").await.unwrap();
        assert_eq!(hashes.len(), 1);
        assert_eq!(hashes.get("a.py").map(String::as_str), Some("h1"));
        assert_eq!(store.count_nodes("p2", NodeKind::File).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_nodes_pagination() {
        let store = MemoryGraphStore::new();
        let mut batch = WriteBatch::new();
        for i in 0..5 {
            batch.upsert_node(node(
                NodeKind::Function,
                &format!("p:a.py:f{i}:{i}"),
                &format!("f{i}"),
            ));
        }
        store.apply(batch).await.unwrap();

        let page1 = store.nodes("p", NodeKind::Function, 2, 0).await.unwrap();
        let page2 = store.nodes("p", NodeKind::Function, 2, 2).await.unwrap();
        let page3 = store.nodes("p", NodeKind::Function, 2, 4).await.unwrap();
        assert_eq!(page1.len(), 2);
        assert_eq!(page2.len(), 2);
        assert_eq!(page3.len(), 1);
        assert_ne!(page1[0].id, page2[0].id);
    }
}
