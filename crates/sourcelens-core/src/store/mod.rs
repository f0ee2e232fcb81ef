//! Graph store abstraction
//!
//! A thin contract over a property-graph backend. Callers never see a query
//! language: writes travel as [`WriteBatch`]es applied atomically, reads are
//! typed lookups. Composite-id uniqueness is enforced by the store; violating
//! upserts coalesce by shallow-merging properties (arrays replaced).

mod memory;

pub use memory::MemoryGraphStore;

use crate::error::Result;
use crate::model::{CompositeId, EdgeKind, EdgeRecord, NodeKind, NodeRecord};
use async_trait::async_trait;
use std::collections::HashMap;

/// A bulk write applied in one transaction.
///
/// Ordering inside a batch: cascading deletes run first, then node upserts,
/// then edge upserts, so a re-parsed file's symbols are replaced atomically.
#[derive(Debug, Default, Clone)]
pub struct WriteBatch {
    /// Files whose descendant symbols must be removed: `(project_id, path)`
    pub delete_file_symbols: Vec<(String, String)>,
    /// Files to remove entirely (node + descendants): `(project_id, path)`
    pub delete_files: Vec<(String, String)>,
    /// Individual nodes to remove together with their edges
    pub delete_nodes: Vec<CompositeId>,
    /// Nodes to upsert
    pub upsert_nodes: Vec<NodeRecord>,
    /// Edges to upsert, keyed by `(kind, src, dst)`
    pub upsert_edges: Vec<EdgeRecord>,
}

impl WriteBatch {
    /// Create an empty batch
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether the batch carries no operations
    pub fn is_empty(&self) -> bool {
        self.delete_file_symbols.is_empty()
            && self.delete_files.is_empty()
            && self.delete_nodes.is_empty()
            && self.upsert_nodes.is_empty()
            && self.upsert_edges.is_empty()
    }

    /// Total operations in the batch
    pub fn operation_count(&self) -> usize {
        self.delete_file_symbols.len()
            + self.delete_files.len()
            + self.delete_nodes.len()
            + self.upsert_nodes.len()
            + self.upsert_edges.len()
    }

    /// Queue a node upsert
    pub fn upsert_node(&mut self, node: NodeRecord) -> &mut Self {
        self.upsert_nodes.push(node);
        self
    }

    /// Queue an edge upsert
    pub fn upsert_edge(&mut self, edge: EdgeRecord) -> &mut Self {
        self.upsert_edges.push(edge);
        self
    }
}

/// Property-graph persistence contract
#[async_trait]
pub trait GraphStore: Send + Sync {
    /// Apply a batch atomically: all operations commit or none do
    async fn apply(&self, batch: WriteBatch) -> Result<()>;

    /// Fetch a node by kind and composite id
    async fn get_node(&self, kind: NodeKind, id: &CompositeId) -> Result<Option<NodeRecord>>;

    /// Nodes of a kind within a project, ordered by composite id
    async fn nodes(
        &self,
        project_id: &str,
        kind: NodeKind,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<NodeRecord>>;

    /// Count nodes of a kind within a project
    async fn count_nodes(&self, project_id: &str, kind: NodeKind) -> Result<usize>;

    /// Nodes of a kind within a project whose `name` property matches exactly
    async fn nodes_by_name(
        &self,
        project_id: &str,
        kind: NodeKind,
        name: &str,
    ) -> Result<Vec<NodeRecord>>;

    /// All edges of a kind whose source belongs to the project
    async fn edges(&self, project_id: &str, kind: EdgeKind) -> Result<Vec<EdgeRecord>>;

    /// Outgoing edges from a node
    async fn edges_from(&self, id: &CompositeId) -> Result<Vec<EdgeRecord>>;

    /// Incoming edges to a node
    async fn edges_to(&self, id: &CompositeId) -> Result<Vec<EdgeRecord>>;

    /// `path → content_hash` for every File node of the project
    async fn file_hashes(&self, project_id: &str) -> Result<HashMap<String, String>>;
}

/// Convenience: whether a node id belongs to a project's id space
pub(crate) fn id_in_project(id: &CompositeId, project_id: &str) -> bool {
    id.as_str() == project_id || id.as_str().starts_with(&format!("{project_id}:"))
}
