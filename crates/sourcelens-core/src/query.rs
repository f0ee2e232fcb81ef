//! Read-side graph queries
//!
//! Pure functions over the graph store: overview metrics for the LLM context,
//! call and inheritance relationships, cycle detection, search, and impact
//! estimation. Every operation takes an explicit limit/offset.

use crate::error::Result;
use crate::model::{CompositeId, EdgeKind, NodeKind};
use crate::store::GraphStore;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

/// Upper bound used when a caller wants "all" rows of a small projection
const SCAN_PAGE: usize = 1000;

/// Class ranked by method count
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ClassMethodCount {
    /// Class name
    pub name: String,
    /// Defining file
    pub file_path: String,
    /// Number of methods
    pub method_count: usize,
}

/// Function ranked by inbound call count
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct FunctionCallCount {
    /// Function name
    pub name: String,
    /// Defining file
    pub file_path: String,
    /// Number of inbound CALLS edges
    pub call_count: usize,
}

/// The exact shape handed to the prompt context; the LLM's single source of
/// truth about the graph.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProjectOverview {
    /// Number of File nodes
    pub total_files: usize,
    /// Number of non-placeholder Class nodes
    pub total_classes: usize,
    /// Number of Function nodes (methods included)
    pub total_functions_methods: usize,
    /// Functions per file
    pub average_functions_per_file: f64,
    /// Modules with the most definitions, largest first
    pub main_modules: Vec<String>,
    /// Top classes by method count
    pub top_5_largest_classes_by_methods: Vec<ClassMethodCount>,
    /// Top call targets
    pub top_5_most_called_functions: Vec<FunctionCallCount>,
}

impl ProjectOverview {
    /// The meaningful-data check: an overview that would only mislead the LLM
    pub fn is_empty(&self) -> bool {
        self.total_files == 0
            || (self.main_modules.is_empty()
                && self.top_5_largest_classes_by_methods.is_empty()
                && self.top_5_most_called_functions.is_empty())
    }
}

/// One resolved call relationship
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CallInfo {
    /// Caller function name
    pub caller_name: String,
    /// Caller's defining file
    pub caller_file: String,
    /// Callee function name
    pub callee_name: String,
    /// Callee's defining file
    pub callee_file: String,
    /// Line of the call site
    pub call_site_line: Option<usize>,
}

/// One inheritance relationship
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InheritanceInfo {
    /// Subclass name
    pub class_name: String,
    /// Base class name
    pub base_name: String,
    /// Base's defining file; `__external__` for placeholders
    pub base_file: String,
    /// Whether the base is an unresolved placeholder
    pub placeholder: bool,
}

/// One search hit
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchHit {
    /// Node kind
    pub kind: NodeKind,
    /// Symbol name
    pub name: String,
    /// Defining file
    pub file_path: String,
    /// Start line when known
    pub line: Option<usize>,
}

/// Result of an impact estimation
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ImpactReport {
    /// Functions with edges into the changed paths
    pub affected_function_count: usize,
    /// Files that would need re-resolution
    pub files_to_update: Vec<String>,
}

/// Read-only query surface over a graph store
pub struct GraphQuery {
    store: Arc<dyn GraphStore>,
}

impl GraphQuery {
    /// Create a query surface
    pub fn new(store: Arc<dyn GraphStore>) -> Self {
        Self { store }
    }

    /// Aggregate overview used as the LLM context
    pub async fn project_overview(&self, project_id: &str) -> Result<ProjectOverview> {
        let total_files = self.store.count_nodes(project_id, NodeKind::File).await?;
        let functions = self.collect_nodes(project_id, NodeKind::Function).await?;
        let classes = self.collect_nodes(project_id, NodeKind::Class).await?;
        let total_functions_methods = functions.len();
        let total_classes = classes
            .iter()
            .filter(|c| c.bool_prop("placeholder") != Some(true))
            .count();

        let average_functions_per_file = if total_files == 0 {
            0.0
        } else {
            total_functions_methods as f64 / total_files as f64
        };

        // Rank modules by definitions in their file
        let mut per_file: HashMap<String, usize> = HashMap::new();
        for node in functions.iter().chain(classes.iter()) {
            if let Some(path) = node.str_prop("file_path") {
                *per_file.entry(path.to_string()).or_default() += 1;
            }
        }
        let mut ranked_files: Vec<(String, usize)> = per_file.into_iter().collect();
        ranked_files.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        let main_modules = ranked_files
            .iter()
            .take(5)
            .map(|(path, _)| crate::model::ModuleName::from_path(path).as_str().to_string())
            .collect();

        // Largest classes by method count
        let mut methods_per_class: HashMap<(String, String), usize> = HashMap::new();
        for func in &functions {
            if func.bool_prop("is_method") == Some(true) {
                if let (Some(class_name), Some(path)) =
                    (func.str_prop("class_name"), func.str_prop("file_path"))
                {
                    *methods_per_class
                        .entry((class_name.to_string(), path.to_string()))
                        .or_default() += 1;
                }
            }
        }
        let mut largest: Vec<ClassMethodCount> = methods_per_class
            .into_iter()
            .map(|((name, file_path), method_count)| ClassMethodCount {
                name,
                file_path,
                method_count,
            })
            .collect();
        largest.sort_by(|a, b| {
            b.method_count
                .cmp(&a.method_count)
                .then_with(|| a.name.cmp(&b.name))
        });
        largest.truncate(5);

        // Most called functions
        let calls = self.store.edges(project_id, EdgeKind::Calls).await?;
        let mut inbound: HashMap<CompositeId, usize> = HashMap::new();
        for edge in &calls {
            *inbound.entry(edge.dst.clone()).or_default() += 1;
        }
        let mut most_called: Vec<FunctionCallCount> = Vec::new();
        for (id, call_count) in inbound {
            if let Some(node) = self.store.get_node(NodeKind::Function, &id).await? {
                most_called.push(FunctionCallCount {
                    name: node.str_prop("name").unwrap_or_default().to_string(),
                    file_path: node.str_prop("file_path").unwrap_or_default().to_string(),
                    call_count,
                });
            }
        }
        most_called.sort_by(|a, b| {
            b.call_count
                .cmp(&a.call_count)
                .then_with(|| a.name.cmp(&b.name))
        });
        most_called.truncate(5);

        Ok(ProjectOverview {
            total_files,
            total_classes,
            total_functions_methods,
            average_functions_per_file,
            main_modules,
            top_5_largest_classes_by_methods: largest,
            top_5_most_called_functions: most_called,
        })
    }

    /// Resolved call relationships, optionally filtered by caller or callee name
    pub async fn function_call_relationships(
        &self,
        project_id: &str,
        function_name: Option<&str>,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<CallInfo>> {
        let mut edges = self.store.edges(project_id, EdgeKind::Calls).await?;
        edges.sort_by(|a, b| (a.src.as_str(), a.dst.as_str()).cmp(&(b.src.as_str(), b.dst.as_str())));

        let mut out = Vec::new();
        for edge in edges {
            let Some(caller) = self.store.get_node(NodeKind::Function, &edge.src).await? else {
                continue;
            };
            let Some(callee) = self.store.get_node(NodeKind::Function, &edge.dst).await? else {
                continue;
            };
            let caller_name = caller.str_prop("name").unwrap_or_default().to_string();
            let callee_name = callee.str_prop("name").unwrap_or_default().to_string();
            if let Some(filter) = function_name {
                if caller_name != filter && callee_name != filter {
                    continue;
                }
            }
            out.push(CallInfo {
                caller_name,
                caller_file: caller.str_prop("file_path").unwrap_or_default().to_string(),
                callee_name,
                callee_file: callee.str_prop("file_path").unwrap_or_default().to_string(),
                call_site_line: edge
                    .properties
                    .get("call_site_line")
                    .and_then(serde_json::Value::as_u64)
                    .map(|v| v as usize),
            });
        }
        Ok(out.into_iter().skip(offset).take(limit).collect())
    }

    /// Bases of a named class
    pub async fn class_inheritance(
        &self,
        project_id: &str,
        class_name: &str,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<InheritanceInfo>> {
        let classes = self
            .store
            .nodes_by_name(project_id, NodeKind::Class, class_name)
            .await?;
        let mut out = Vec::new();
        for class in classes {
            for edge in self.store.edges_from(&class.id).await? {
                if edge.kind != EdgeKind::InheritsFrom {
                    continue;
                }
                if let Some(base) = self.store.get_node(NodeKind::Class, &edge.dst).await? {
                    out.push(InheritanceInfo {
                        class_name: class_name.to_string(),
                        base_name: base.str_prop("name").unwrap_or_default().to_string(),
                        base_file: base.str_prop("file_path").unwrap_or_default().to_string(),
                        placeholder: base.bool_prop("placeholder").unwrap_or(false),
                    });
                }
            }
        }
        out.sort_by(|a, b| a.base_name.cmp(&b.base_name));
        Ok(out.into_iter().skip(offset).take(limit).collect())
    }

    /// Call cycles among functions, each reported once as a name path
    pub async fn circular_function_calls(
        &self,
        project_id: &str,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<Vec<String>>> {
        let edges = self.store.edges(project_id, EdgeKind::Calls).await?;
        let mut adjacency: HashMap<&str, Vec<&str>> = HashMap::new();
        for edge in &edges {
            adjacency
                .entry(edge.src.as_str())
                .or_default()
                .push(edge.dst.as_str());
        }
        for targets in adjacency.values_mut() {
            targets.sort();
        }

        let mut cycles: Vec<Vec<String>> = Vec::new();
        let mut done: HashSet<&str> = HashSet::new();
        let mut starts: Vec<&&str> = adjacency.keys().collect();
        starts.sort();

        for &start in starts {
            if done.contains(start) {
                continue;
            }
            let mut path: Vec<&str> = Vec::new();
            let mut on_path: HashSet<&str> = HashSet::new();
            // Iterative DFS with explicit backtrack markers
            let mut frames: Vec<(&str, usize)> = vec![(start, 0)];
            while let Some((node, child_idx)) = frames.pop() {
                if child_idx == 0 {
                    path.push(node);
                    on_path.insert(node);
                }
                let children = adjacency.get(node).map(Vec::as_slice).unwrap_or(&[]);
                if child_idx < children.len() {
                    frames.push((node, child_idx + 1));
                    let child = children[child_idx];
                    if on_path.contains(child) {
                        let cycle_start = path.iter().position(|n| *n == child).unwrap();
                        let mut names = Vec::new();
                        for id in &path[cycle_start..] {
                            names.push(self.function_name(id).await?);
                        }
                        if !cycles.contains(&names) {
                            cycles.push(names);
                        }
                    } else if !done.contains(child) {
                        frames.push((child, 0));
                    }
                } else {
                    path.pop();
                    on_path.remove(node);
                    done.insert(node);
                }
            }
        }
        Ok(cycles.into_iter().skip(offset).take(limit).collect())
    }

    /// Classes with at least `min_methods` methods
    pub async fn large_classes(
        &self,
        project_id: &str,
        min_methods: usize,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<ClassMethodCount>> {
        let functions = self.collect_nodes(project_id, NodeKind::Function).await?;
        let mut counts: HashMap<(String, String), usize> = HashMap::new();
        for func in &functions {
            if func.bool_prop("is_method") == Some(true) {
                if let (Some(class_name), Some(path)) =
                    (func.str_prop("class_name"), func.str_prop("file_path"))
                {
                    *counts
                        .entry((class_name.to_string(), path.to_string()))
                        .or_default() += 1;
                }
            }
        }
        let mut out: Vec<ClassMethodCount> = counts
            .into_iter()
            .filter(|(_, count)| *count >= min_methods)
            .map(|((name, file_path), method_count)| ClassMethodCount {
                name,
                file_path,
                method_count,
            })
            .collect();
        out.sort_by(|a, b| b.method_count.cmp(&a.method_count).then_with(|| a.name.cmp(&b.name)));
        Ok(out.into_iter().skip(offset).take(limit).collect())
    }

    /// Case-insensitive substring search over symbol names
    pub async fn search(
        &self,
        project_id: &str,
        term: &str,
        kinds: &[NodeKind],
        limit: usize,
        offset: usize,
    ) -> Result<Vec<SearchHit>> {
        let needle = term.to_lowercase();
        let mut out = Vec::new();
        for kind in kinds {
            for node in self.collect_nodes(project_id, *kind).await? {
                let Some(name) = node.str_prop("name") else {
                    continue;
                };
                if name.to_lowercase().contains(&needle) {
                    out.push(SearchHit {
                        kind: *kind,
                        name: name.to_string(),
                        file_path: node.str_prop("file_path").unwrap_or_default().to_string(),
                        line: node.int_prop("start_line").map(|v| v as usize),
                    });
                }
            }
        }
        out.sort_by(|a, b| a.name.cmp(&b.name).then_with(|| a.file_path.cmp(&b.file_path)));
        Ok(out.into_iter().skip(offset).take(limit).collect())
    }

    /// Estimate blast radius of changing the given paths
    pub async fn impact_of_changes(
        &self,
        project_id: &str,
        paths: &[String],
    ) -> Result<ImpactReport> {
        let mut affected_functions: HashSet<CompositeId> = HashSet::new();
        let mut files: HashSet<String> = HashSet::new();

        for path in paths {
            let file_id = CompositeId::file(project_id, path);
            let defined: Vec<CompositeId> = self
                .store
                .edges_to(&file_id)
                .await?
                .into_iter()
                .filter(|e| e.kind == EdgeKind::DefinedIn)
                .map(|e| e.src)
                .collect();
            for symbol in defined {
                for edge in self.store.edges_to(&symbol).await? {
                    if !matches!(edge.kind, EdgeKind::Calls | EdgeKind::InheritsFrom) {
                        continue;
                    }
                    if let Some(src) = self.store.get_node(NodeKind::Function, &edge.src).await? {
                        if let Some(file) = src.str_prop("file_path") {
                            files.insert(file.to_string());
                        }
                        affected_functions.insert(src.id);
                    } else if let Some(src) = self.store.get_node(NodeKind::Class, &edge.src).await?
                    {
                        if let Some(file) = src.str_prop("file_path") {
                            files.insert(file.to_string());
                        }
                    }
                }
            }
        }

        let mut files_to_update: Vec<String> = files.into_iter().collect();
        files_to_update.sort();
        Ok(ImpactReport {
            affected_function_count: affected_functions.len(),
            files_to_update,
        })
    }

    async fn collect_nodes(
        &self,
        project_id: &str,
        kind: NodeKind,
    ) -> Result<Vec<crate::model::NodeRecord>> {
        let mut out = Vec::new();
        let mut offset = 0;
        loop {
            let page = self.store.nodes(project_id, kind, SCAN_PAGE, offset).await?;
            let done = page.len() < SCAN_PAGE;
            out.extend(page);
            if done {
                break;
            }
            offset += SCAN_PAGE;
        }
        Ok(out)
    }

    async fn function_name(&self, id: &str) -> Result<String> {
        let cid = CompositeId::from(id.to_string());
        Ok(self
            .store
            .get_node(NodeKind::Function, &cid)
            .await?
            .and_then(|n| n.str_prop("name").map(str::to_string))
            .unwrap_or_else(|| id.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{EdgeRecord, FunctionNode, NodeRecord};
    use crate::store::{MemoryGraphStore, WriteBatch};
    use serde_json::json;

    fn function(project: &str, file: &str, name: &str, line: usize, class: Option<&str>) -> FunctionNode {
        FunctionNode {
            project_id: project.into(),
            name: name.into(),
            signature: format!("def {name}()"),
            parameters_str: String::new(),
            file_path: file.into(),
            start_line: line,
            end_line: line + 3,
            is_method: class.is_some(),
            class_name: class.map(String::from),
        }
    }

    fn file_record(project: &str, path: &str) -> NodeRecord {
        let mut props = serde_json::Map::new();
        props.insert("path".into(), json!(path));
        props.insert("project_id".into(), json!(project));
        props.insert("content_hash".into(), json!("h"));
        NodeRecord::new(NodeKind::File, CompositeId::file(project, path), props)
    }

    async fn seeded_store() -> Arc<MemoryGraphStore> {
        let store = Arc::new(MemoryGraphStore::new());
        let mut batch = WriteBatch::new();
        batch.upsert_node(file_record("p", "a.py"));
        batch.upsert_node(file_record("p", "b.py"));

        let fa = function("p", "a.py", "fa", 1, None);
        let fb = function("p", "b.py", "fb", 1, None);
        let fc = function("p", "b.py", "fc", 10, None);
        for f in [&fa, &fb, &fc] {
            batch.upsert_node(f.to_record());
        }
        // fa -> fb, fc -> fb, fb -> fa (cycle fa->fb->fa)
        let mut props = serde_json::Map::new();
        props.insert("call_site_line".into(), json!(2));
        batch.upsert_edge(EdgeRecord::with_properties(
            EdgeKind::Calls,
            fa.composite_id(),
            fb.composite_id(),
            props,
        ));
        batch.upsert_edge(EdgeRecord::new(EdgeKind::Calls, fc.composite_id(), fb.composite_id()));
        batch.upsert_edge(EdgeRecord::new(EdgeKind::Calls, fb.composite_id(), fa.composite_id()));
        batch.upsert_edge(EdgeRecord::new(
            EdgeKind::DefinedIn,
            fa.composite_id(),
            CompositeId::file("p", "a.py"),
        ));
        batch.upsert_edge(EdgeRecord::new(
            EdgeKind::DefinedIn,
            fb.composite_id(),
            CompositeId::file("p", "b.py"),
        ));
        batch.upsert_edge(EdgeRecord::new(
            EdgeKind::DefinedIn,
            fc.composite_id(),
            CompositeId::file("p", "b.py"),
        ));
        store.apply(batch).await.unwrap();
        store
    }

    #[tokio::test]
    async fn test_overview_counts() {
        let store = seeded_store().await;
        let query = GraphQuery::new(store);
        let overview = query.project_overview("p").await.unwrap();
        assert_eq!(overview.total_files, 2);
        assert_eq!(overview.total_functions_methods, 3);
        assert_eq!(overview.total_classes, 0);
        assert!((overview.average_functions_per_file - 1.5).abs() < f64::EPSILON);
        assert!(!overview.is_empty());
        // fb has two inbound calls, fa one
        assert_eq!(overview.top_5_most_called_functions[0].name, "fb");
        assert_eq!(overview.top_5_most_called_functions[0].call_count, 2);
    }

    #[tokio::test]
    async fn test_overview_empty_project() {
        let store = Arc::new(MemoryGraphStore::new());
        let query = GraphQuery::new(store);
        let overview = query.project_overview("ghost").await.unwrap();
        assert!(overview.is_empty());
        assert_eq!(overview.total_files, 0);
    }

    #[tokio::test]
    async fn test_call_relationships_filter_and_pagination() {
        let store = seeded_store().await;
        let query = GraphQuery::new(store);

        let all = query
            .function_call_relationships("p", None, 100, 0)
            .await
            .unwrap();
        assert_eq!(all.len(), 3);

        let fb_only = query
            .function_call_relationships("p", Some("fc"), 100, 0)
            .await
            .unwrap();
        assert_eq!(fb_only.len(), 1);
        assert_eq!(fb_only[0].caller_name, "fc");

        let page = query
            .function_call_relationships("p", None, 2, 2)
            .await
            .unwrap();
        assert_eq!(page.len(), 1);
    }

    #[tokio::test]
    async fn test_cycle_detection() {
        let store = seeded_store().await;
        let query = GraphQuery::new(store);
        let cycles = query.circular_function_calls("p", 10, 0).await.unwrap();
        assert_eq!(cycles.len(), 1, "fa->fb->fa is the only cycle");
        let cycle = &cycles[0];
        assert_eq!(cycle.len(), 2);
        assert!(cycle.contains(&"fa".to_string()));
        assert!(cycle.contains(&"fb".to_string()));
    }

    #[tokio::test]
    async fn test_search() {
        let store = seeded_store().await;
        let query = GraphQuery::new(store);
        let hits = query
            .search("p", "F", &[NodeKind::Function], 10, 0)
            .await
            .unwrap();
        assert_eq!(hits.len(), 3, "case-insensitive substring match");
        let hits = query
            .search("p", "fb", &[NodeKind::Function], 10, 0)
            .await
            .unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].file_path, "b.py");
    }

    #[tokio::test]
    async fn test_impact_of_changes() {
        let store = seeded_store().await;
        let query = GraphQuery::new(store);
        let impact = query
            .impact_of_changes("p", &["b.py".to_string()])
            .await
            .unwrap();
        // fa and fc call into b.py's fb
        assert_eq!(impact.affected_function_count, 2);
        assert_eq!(impact.files_to_update, vec!["a.py".to_string(), "b.py".to_string()]);
    }
}
