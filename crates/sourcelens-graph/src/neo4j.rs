//! Neo4j graph store implementation
//!
//! Every node carries the shared `Entity` label (with a uniqueness constraint
//! on `composite_id`) plus its kind label. Scalar properties are stored
//! natively so indexes and server-side filters work; the full property map is
//! additionally kept JSON-encoded in `props_json`, which is what reads
//! deserialize. List- and object-valued properties exist only in the JSON
//! form.

use crate::config::GraphConfig;
use async_trait::async_trait;
use neo4rs::{query, ConfigBuilder, Graph, Query};
use serde_json::Value;
use sourcelens_core::error::{Error, Result};
use sourcelens_core::model::{CompositeId, EdgeKind, EdgeRecord, NodeKind, NodeRecord};
use sourcelens_core::store::{GraphStore, WriteBatch};
use std::collections::HashMap;
use tracing::{debug, info};

/// Neo4j-backed [`GraphStore`]
pub struct Neo4jGraphStore {
    graph: Graph,
}

impl Neo4jGraphStore {
    /// Connect and ensure the schema objects exist
    pub async fn connect(config: &GraphConfig) -> Result<Self> {
        let bolt_config = ConfigBuilder::default()
            .uri(&config.uri)
            .user(&config.username)
            .password(&config.password)
            .db(config.database.as_str())
            .build()
            .map_err(|e| Error::graph(format!("invalid bolt config: {e}")))?;
        let graph = Graph::connect(bolt_config)
            .await
            .map_err(|e| Error::graph(format!("bolt connection failed: {e}")))?;
        let store = Self { graph };
        store.ensure_indexes().await?;
        info!(uri = %config.uri, "connected to graph store");
        Ok(store)
    }

    /// Create the uniqueness constraint and the lookup indexes the read side
    /// depends on
    async fn ensure_indexes(&self) -> Result<()> {
        let statements = [
            "CREATE CONSTRAINT entity_composite_id IF NOT EXISTS \
             FOR (n:Entity) REQUIRE n.composite_id IS UNIQUE",
            "CREATE INDEX entity_project IF NOT EXISTS FOR (n:Entity) ON (n.project_id)",
            "CREATE INDEX entity_name IF NOT EXISTS FOR (n:Entity) ON (n.name)",
            "CREATE INDEX file_content_hash IF NOT EXISTS FOR (n:File) ON (n.content_hash)",
            "CREATE INDEX file_updated_at IF NOT EXISTS FOR (n:File) ON (n.updated_at)",
        ];
        for statement in statements {
            self.graph
                .run(query(statement))
                .await
                .map_err(|e| Error::graph(format!("schema setup failed: {e}")))?;
        }
        Ok(())
    }

    fn node_upsert_query(node: &NodeRecord) -> Query {
        // Kind labels come from a closed enum, safe to interpolate
        let mut cypher = format!(
            "MERGE (n:Entity {{composite_id: $id}}) SET n:{}, n.kind = $kind, \
             n.props_json = $props_json",
            node.kind
        );
        let mut q_params: Vec<(String, Value)> = Vec::new();
        for (idx, (key, value)) in node.properties.iter().enumerate() {
            if matches!(value, Value::Array(_) | Value::Object(_) | Value::Null) {
                continue;
            }
            cypher.push_str(&format!(", n.{key} = $p{idx}"));
            q_params.push((format!("p{idx}"), value.clone()));
        }

        let mut q = query(&cypher)
            .param("id", node.id.as_str())
            .param("kind", node.kind.to_string())
            .param(
                "props_json",
                serde_json::to_string(&node.properties).unwrap_or_default(),
            );
        for (name, value) in q_params {
            q = bind_scalar(q, &name, &value);
        }
        q
    }

    fn edge_upsert_query(edge: &EdgeRecord) -> Query {
        let cypher = format!(
            "MATCH (a:Entity {{composite_id: $src}}), (b:Entity {{composite_id: $dst}}) \
             MERGE (a)-[r:{}]->(b) SET r.props_json = $props_json",
            edge.kind
        );
        query(&cypher)
            .param("src", edge.src.as_str())
            .param("dst", edge.dst.as_str())
            .param(
                "props_json",
                serde_json::to_string(&edge.properties).unwrap_or_default(),
            )
    }

    async fn collect_nodes(&self, q: Query) -> Result<Vec<NodeRecord>> {
        let mut stream = self
            .graph
            .execute(q)
            .await
            .map_err(|e| Error::graph(e.to_string()))?;
        let mut out = Vec::new();
        while let Some(row) = stream.next().await.map_err(|e| Error::graph(e.to_string()))? {
            let id: String = row.get("id").map_err(|e| Error::graph(e.to_string()))?;
            let kind: String = row.get("kind").map_err(|e| Error::graph(e.to_string()))?;
            let props_json: String = row
                .get("props_json")
                .map_err(|e| Error::graph(e.to_string()))?;
            out.push(NodeRecord::new(
                parse_kind(&kind)?,
                CompositeId::from(id),
                serde_json::from_str(&props_json)?,
            ));
        }
        Ok(out)
    }

    async fn collect_edges(&self, q: Query) -> Result<Vec<EdgeRecord>> {
        let mut stream = self
            .graph
            .execute(q)
            .await
            .map_err(|e| Error::graph(e.to_string()))?;
        let mut out = Vec::new();
        while let Some(row) = stream.next().await.map_err(|e| Error::graph(e.to_string()))? {
            let kind: String = row.get("kind").map_err(|e| Error::graph(e.to_string()))?;
            let src: String = row.get("src").map_err(|e| Error::graph(e.to_string()))?;
            let dst: String = row.get("dst").map_err(|e| Error::graph(e.to_string()))?;
            let props_json: String = row
                .get("props_json")
                .map_err(|e| Error::graph(e.to_string()))?;
            out.push(EdgeRecord::with_properties(
                parse_edge_kind(&kind)?,
                CompositeId::from(src),
                CompositeId::from(dst),
                serde_json::from_str(&props_json).unwrap_or_default(),
            ));
        }
        Ok(out)
    }
}

#[async_trait]
impl GraphStore for Neo4jGraphStore {
    async fn apply(&self, batch: WriteBatch) -> Result<()> {
        let mut queries: Vec<Query> = Vec::with_capacity(batch.operation_count());

        for (project_id, path) in &batch.delete_file_symbols {
            queries.push(
                query(
                    "MATCH (n:Entity) WHERE n.composite_id STARTS WITH $prefix \
                     DETACH DELETE n",
                )
                .param("prefix", format!("{project_id}:{path}:")),
            );
        }
        for (project_id, path) in &batch.delete_files {
            queries.push(
                query(
                    "MATCH (n:Entity) WHERE n.composite_id STARTS WITH $prefix \
                     OR n.composite_id = $file_id DETACH DELETE n",
                )
                .param("prefix", format!("{project_id}:{path}:"))
                .param("file_id", format!("{project_id}:{path}")),
            );
        }
        for id in &batch.delete_nodes {
            queries.push(
                query("MATCH (n:Entity {composite_id: $id}) DETACH DELETE n")
                    .param("id", id.as_str()),
            );
        }
        for node in &batch.upsert_nodes {
            queries.push(Self::node_upsert_query(node));
        }
        for edge in &batch.upsert_edges {
            queries.push(Self::edge_upsert_query(edge));
        }

        debug!(operations = queries.len(), "applying batch transaction");
        let mut txn = self
            .graph
            .start_txn()
            .await
            .map_err(|e| Error::graph(format!("failed to open transaction: {e}")))?;
        txn.run_queries(queries)
            .await
            .map_err(|e| Error::graph(format!("batch failed: {e}")))?;
        txn.commit()
            .await
            .map_err(|e| Error::graph(format!("commit failed: {e}")))
    }

    async fn get_node(&self, kind: NodeKind, id: &CompositeId) -> Result<Option<NodeRecord>> {
        let q = query(
            "MATCH (n:Entity {composite_id: $id}) WHERE n.kind = $kind \
             RETURN n.composite_id AS id, n.kind AS kind, n.props_json AS props_json",
        )
        .param("id", id.as_str())
        .param("kind", kind.to_string());
        Ok(self.collect_nodes(q).await?.into_iter().next())
    }

    async fn nodes(
        &self,
        project_id: &str,
        kind: NodeKind,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<NodeRecord>> {
        let q = query(
            "MATCH (n:Entity) WHERE n.kind = $kind AND \
             (n.composite_id = $project OR n.composite_id STARTS WITH $prefix) \
             RETURN n.composite_id AS id, n.kind AS kind, n.props_json AS props_json \
             ORDER BY n.composite_id SKIP $offset LIMIT $limit",
        )
        .param("kind", kind.to_string())
        .param("project", project_id)
        .param("prefix", format!("{project_id}:"))
        .param("offset", offset as i64)
        .param("limit", limit as i64);
        self.collect_nodes(q).await
    }

    async fn count_nodes(&self, project_id: &str, kind: NodeKind) -> Result<usize> {
        let q = query(
            "MATCH (n:Entity) WHERE n.kind = $kind AND \
             (n.composite_id = $project OR n.composite_id STARTS WITH $prefix) \
             RETURN count(n) AS c",
        )
        .param("kind", kind.to_string())
        .param("project", project_id)
        .param("prefix", format!("{project_id}:"));
        let mut stream = self
            .graph
            .execute(q)
            .await
            .map_err(|e| Error::graph(e.to_string()))?;
        match stream.next().await.map_err(|e| Error::graph(e.to_string()))? {
            Some(row) => {
                let count: i64 = row.get("c").map_err(|e| Error::graph(e.to_string()))?;
                Ok(count as usize)
            }
            None => Ok(0),
        }
    }

    async fn nodes_by_name(
        &self,
        project_id: &str,
        kind: NodeKind,
        name: &str,
    ) -> Result<Vec<NodeRecord>> {
        let q = query(
            "MATCH (n:Entity) WHERE n.kind = $kind AND n.name = $name AND \
             (n.composite_id = $project OR n.composite_id STARTS WITH $prefix) \
             RETURN n.composite_id AS id, n.kind AS kind, n.props_json AS props_json",
        )
        .param("kind", kind.to_string())
        .param("name", name)
        .param("project", project_id)
        .param("prefix", format!("{project_id}:"));
        self.collect_nodes(q).await
    }

    async fn edges(&self, project_id: &str, kind: EdgeKind) -> Result<Vec<EdgeRecord>> {
        let cypher = format!(
            "MATCH (a:Entity)-[r:{kind}]->(b:Entity) \
             WHERE a.composite_id = $project OR a.composite_id STARTS WITH $prefix \
             RETURN type(r) AS kind, a.composite_id AS src, b.composite_id AS dst, \
             r.props_json AS props_json"
        );
        let q = query(&cypher)
            .param("project", project_id)
            .param("prefix", format!("{project_id}:"));
        self.collect_edges(q).await
    }

    async fn edges_from(&self, id: &CompositeId) -> Result<Vec<EdgeRecord>> {
        let q = query(
            "MATCH (a:Entity {composite_id: $id})-[r]->(b:Entity) \
             RETURN type(r) AS kind, a.composite_id AS src, b.composite_id AS dst, \
             r.props_json AS props_json",
        )
        .param("id", id.as_str());
        self.collect_edges(q).await
    }

    async fn edges_to(&self, id: &CompositeId) -> Result<Vec<EdgeRecord>> {
        let q = query(
            "MATCH (a:Entity)-[r]->(b:Entity {composite_id: $id}) \
             RETURN type(r) AS kind, a.composite_id AS src, b.composite_id AS dst, \
             r.props_json AS props_json",
        )
        .param("id", id.as_str());
        self.collect_edges(q).await
    }

    async fn file_hashes(&self, project_id: &str) -> Result<HashMap<String, String>> {
        let q = query(
            "MATCH (n:File) WHERE n.composite_id STARTS WITH $prefix \
             RETURN n.path AS path, n.content_hash AS hash",
        )
        .param("prefix", format!("{project_id}:"));
        let mut stream = self
            .graph
            .execute(q)
            .await
            .map_err(|e| Error::graph(e.to_string()))?;
        let mut out = HashMap::new();
        while let Some(row) = stream.next().await.map_err(|e| Error::graph(e.to_string()))? {
            let path: String = row.get("path").map_err(|e| Error::graph(e.to_string()))?;
            let hash: String = row.get("hash").map_err(|e| Error::graph(e.to_string()))?;
            out.insert(path, hash);
        }
        Ok(out)
    }
}

/// Bind a scalar JSON value as a typed bolt parameter
fn bind_scalar(q: Query, name: &str, value: &Value) -> Query {
    match value {
        Value::Bool(b) => q.param(name, *b),
        Value::Number(n) => match n.as_i64() {
            Some(i) => q.param(name, i),
            None => q.param(name, n.as_f64().unwrap_or(0.0)),
        },
        Value::String(s) => q.param(name, s.as_str()),
        // Arrays/objects/null are filtered out before binding
        other => q.param(name, other.to_string()),
    }
}

fn parse_kind(kind: &str) -> Result<NodeKind> {
    match kind {
        "Project" => Ok(NodeKind::Project),
        "File" => Ok(NodeKind::File),
        "Module" => Ok(NodeKind::Module),
        "Class" => Ok(NodeKind::Class),
        "Function" => Ok(NodeKind::Function),
        "Variable" => Ok(NodeKind::Variable),
        "Decorator" => Ok(NodeKind::Decorator),
        "ExceptionType" => Ok(NodeKind::ExceptionType),
        other => Err(Error::graph(format!("unknown node kind in store: {other}"))),
    }
}

fn parse_edge_kind(kind: &str) -> Result<EdgeKind> {
    match kind {
        "BELONGS_TO" => Ok(EdgeKind::BelongsTo),
        "DEFINED_IN" => Ok(EdgeKind::DefinedIn),
        "HAS_PARAMETER" => Ok(EdgeKind::HasParameter),
        "DECLARES_VARIABLE" => Ok(EdgeKind::DeclaresVariable),
        "DECLARES_ATTRIBUTE" => Ok(EdgeKind::DeclaresAttribute),
        "CALLS" => Ok(EdgeKind::Calls),
        "INHERITS_FROM" => Ok(EdgeKind::InheritsFrom),
        "USES_VARIABLE" => Ok(EdgeKind::UsesVariable),
        "MODIFIES_VARIABLE" => Ok(EdgeKind::ModifiesVariable),
        "CREATES_OBJECT" => Ok(EdgeKind::CreatesObject),
        "RAISES_EXCEPTION" => Ok(EdgeKind::RaisesException),
        "HANDLES_EXCEPTION" => Ok(EdgeKind::HandlesException),
        "DECORATED_BY" => Ok(EdgeKind::DecoratedBy),
        other => Err(Error::graph(format!("unknown edge kind in store: {other}"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_kind_roundtrip() {
        for kind in [
            NodeKind::Project,
            NodeKind::File,
            NodeKind::Module,
            NodeKind::Class,
            NodeKind::Function,
            NodeKind::Variable,
            NodeKind::Decorator,
            NodeKind::ExceptionType,
        ] {
            assert_eq!(parse_kind(&kind.to_string()).unwrap(), kind);
        }
        assert!(parse_kind("Gadget").is_err());
    }

    #[test]
    fn test_edge_kind_roundtrip() {
        for kind in [
            EdgeKind::BelongsTo,
            EdgeKind::DefinedIn,
            EdgeKind::Calls,
            EdgeKind::InheritsFrom,
            EdgeKind::UsesVariable,
            EdgeKind::ModifiesVariable,
            EdgeKind::CreatesObject,
            EdgeKind::RaisesException,
            EdgeKind::HandlesException,
            EdgeKind::DecoratedBy,
            EdgeKind::HasParameter,
            EdgeKind::DeclaresVariable,
            EdgeKind::DeclaresAttribute,
        ] {
            assert_eq!(parse_edge_kind(&kind.to_string()).unwrap(), kind);
        }
        assert!(parse_edge_kind("LINKS_TO").is_err());
    }

    #[test]
    fn test_node_upsert_query_skips_non_scalars() {
        let mut props = serde_json::Map::new();
        props.insert("name".into(), json!("f"));
        props.insert("start_line".into(), json!(3));
        props.insert("errors".into(), json!(["oversize"]));
        let node = NodeRecord::new(
            NodeKind::File,
            CompositeId::from("p:a.py".to_string()),
            props,
        );
        // Must not panic; array property only lands in props_json
        let _ = Neo4jGraphStore::node_upsert_query(&node);
    }
}
