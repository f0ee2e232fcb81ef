//! Cross-file symbol resolution
//!
//! Parsers emit edge contributions with unresolved target names. Resolution is
//! a two-pass process: pass 1 collects symbols into a per-project index, pass
//! 2 turns each unresolved reference into a concrete edge. When a class target
//! cannot be resolved and the edge cannot be dropped, a placeholder Class node
//! is created; placeholders are reconciled against real classes on later runs.

use crate::error::Result;
use crate::model::{
    ClassNode, CompositeId, EdgeKind, EdgeRecord, NodeKind, NodeRecord, ParsedFile, RefKind,
    SymbolRef, TargetHint,
};
use crate::store::GraphStore;
use serde_json::{json, Map};
use std::collections::{HashMap, HashSet};

/// Pseudo file path under which placeholder classes live
pub const PLACEHOLDER_PATH: &str = "__external__";

/// Location of an indexed class
#[derive(Debug, Clone)]
struct ClassEntry {
    id: CompositeId,
    file_path: String,
    placeholder: bool,
}

/// Location of an indexed function
#[derive(Debug, Clone)]
struct FunctionEntry {
    id: CompositeId,
    file_path: String,
}

/// Location of an indexed variable
#[derive(Debug, Clone)]
struct VariableEntry {
    id: CompositeId,
    /// Owning function or class name; None for module globals
    owner: Option<String>,
}

/// Per-project symbol index used by pass 2
#[derive(Debug)]
pub struct SymbolIndex {
    project_id: String,
    classes: HashMap<String, Vec<ClassEntry>>,
    functions: HashMap<String, Vec<FunctionEntry>>,
    /// (file_path, bare name) → variable locations
    variables: HashMap<(String, String), Vec<VariableEntry>>,
}

impl SymbolIndex {
    /// Create an empty index for a project
    pub fn new(project_id: &str) -> Self {
        Self {
            project_id: project_id.to_string(),
            classes: HashMap::new(),
            functions: HashMap::new(),
            variables: HashMap::new(),
        }
    }

    /// Register every symbol a parsed file contributes
    pub fn add_parsed_file(&mut self, parsed: &ParsedFile) {
        let project = self.project_id.clone();
        for class in &parsed.classes {
            self.classes.entry(class.name.clone()).or_default().push(ClassEntry {
                id: CompositeId::symbol_at(&project, &parsed.path, &class.name, class.start_line),
                file_path: parsed.path.clone(),
                placeholder: false,
            });
            for attr in &class.attributes {
                let qualified = format!("{}.{}", class.name, attr.name);
                self.variables
                    .entry((parsed.path.clone(), attr.name.clone()))
                    .or_default()
                    .push(VariableEntry {
                        id: CompositeId::symbol_at(&project, &parsed.path, &qualified, attr.line),
                        owner: Some(class.name.clone()),
                    });
            }
        }
        for func in &parsed.functions {
            self.functions.entry(func.name.clone()).or_default().push(FunctionEntry {
                id: CompositeId::symbol_at(&project, &parsed.path, &func.name, func.start_line),
                file_path: parsed.path.clone(),
            });
            for var in func.parameters.iter().chain(func.locals.iter()) {
                let qualified = format!("{}.{}", func.name, var.name);
                self.variables
                    .entry((parsed.path.clone(), var.name.clone()))
                    .or_default()
                    .push(VariableEntry {
                        id: CompositeId::symbol_at(&project, &parsed.path, &qualified, var.line),
                        owner: Some(func.name.clone()),
                    });
            }
        }
        for var in &parsed.globals {
            self.variables
                .entry((parsed.path.clone(), var.name.clone()))
                .or_default()
                .push(VariableEntry {
                    id: CompositeId::symbol_at(&project, &parsed.path, &var.name, var.line),
                    owner: None,
                });
        }
    }

    /// Register a class or function node already present in the graph.
    ///
    /// Used by incremental updates to resolve against files that were not
    /// re-parsed. `skip_files` holds paths being re-parsed in this run, whose
    /// stale symbols must not shadow the fresh ones.
    pub fn add_existing_node(&mut self, node: &NodeRecord, skip_files: &HashSet<String>) {
        let Some(file_path) = node.str_prop("file_path").map(str::to_string) else {
            return;
        };
        if skip_files.contains(&file_path) {
            return;
        }
        let Some(name) = node.str_prop("name").map(str::to_string) else {
            return;
        };
        match node.kind {
            NodeKind::Class => {
                self.classes.entry(name).or_default().push(ClassEntry {
                    id: node.id.clone(),
                    file_path,
                    placeholder: node.bool_prop("placeholder").unwrap_or(false),
                });
            }
            NodeKind::Function => {
                self.functions
                    .entry(name)
                    .or_default()
                    .push(FunctionEntry {
                        id: node.id.clone(),
                        file_path,
                    });
            }
            _ => {}
        }
    }

    /// Load all Class and Function nodes of the project into the index
    pub async fn load_existing(
        &mut self,
        store: &dyn GraphStore,
        skip_files: &HashSet<String>,
    ) -> Result<()> {
        const PAGE: usize = 1000;
        for kind in [NodeKind::Class, NodeKind::Function] {
            let mut offset = 0;
            loop {
                let page = store.nodes(&self.project_id, kind, PAGE, offset).await?;
                let done = page.len() < PAGE;
                for node in &page {
                    self.add_existing_node(node, skip_files);
                }
                if done {
                    break;
                }
                offset += PAGE;
            }
        }
        Ok(())
    }

    fn find_class(&self, name: &str, prefer_file: &str) -> Option<&ClassEntry> {
        let candidates = self.classes.get(name)?;
        candidates
            .iter()
            .find(|c| c.file_path == prefer_file && !c.placeholder)
            .or_else(|| candidates.iter().find(|c| !c.placeholder))
            .or_else(|| candidates.first())
    }

    fn find_function(&self, name: &str, prefer_file: &str) -> Option<&FunctionEntry> {
        let candidates = self.functions.get(name)?;
        candidates
            .iter()
            .find(|f| f.file_path == prefer_file)
            .or_else(|| candidates.first())
    }

    fn find_variable(&self, file: &str, name: &str, prefer_owner: &str) -> Option<&VariableEntry> {
        let candidates = self.variables.get(&(file.to_string(), name.to_string()))?;
        candidates
            .iter()
            .find(|v| v.owner.as_deref() == Some(prefer_owner))
            .or_else(|| candidates.iter().find(|v| v.owner.is_none()))
            .or_else(|| candidates.first())
    }
}

/// Counters for one resolution pass
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ResolutionStats {
    /// References resolved to concrete targets
    pub resolved: usize,
    /// References dropped because no target exists and no placeholder applies
    pub dropped: usize,
    /// Placeholder classes created
    pub placeholders_created: usize,
}

/// Output of resolving one file's references
#[derive(Debug, Default)]
pub struct ResolvedRefs {
    /// Placeholder nodes that must be upserted before the edges
    pub placeholder_nodes: Vec<NodeRecord>,
    /// Concrete edges
    pub edges: Vec<EdgeRecord>,
    /// Pass counters
    pub stats: ResolutionStats,
}

/// Resolves unresolved references against a [`SymbolIndex`]
pub struct Resolver<'a> {
    project_id: &'a str,
    index: &'a SymbolIndex,
}

impl<'a> Resolver<'a> {
    /// Create a resolver over a populated index
    pub fn new(project_id: &'a str, index: &'a SymbolIndex) -> Self {
        Self { project_id, index }
    }

    /// Composite id of the placeholder class for `name`
    pub fn placeholder_id(project_id: &str, name: &str) -> CompositeId {
        CompositeId::symbol(project_id, PLACEHOLDER_PATH, name)
    }

    /// Resolve every reference a parsed file emitted.
    ///
    /// The source symbol of each reference is located within the same file by
    /// name and start line; references whose source vanished (e.g. a parse
    /// error truncated the entity set) are dropped.
    pub fn resolve_file(&self, parsed: &ParsedFile) -> ResolvedRefs {
        let mut out = ResolvedRefs::default();
        let src_map = self.source_symbols(parsed);
        let mut seen_placeholders: HashSet<String> = HashSet::new();

        for reference in &parsed.refs {
            let Some((src_kind, src_id)) = src_map.get(&(
                reference.src.name.clone(),
                reference.src.start_line,
            )) else {
                out.stats.dropped += 1;
                continue;
            };
            self.resolve_one(
                parsed,
                reference,
                *src_kind,
                src_id,
                &mut out,
                &mut seen_placeholders,
            );
        }
        out
    }

    /// Map of `(name, start_line)` → `(kind, composite_id)` for a file's symbols
    fn source_symbols(
        &self,
        parsed: &ParsedFile,
    ) -> HashMap<(String, usize), (NodeKind, CompositeId)> {
        let mut map = HashMap::new();
        for class in &parsed.classes {
            map.insert(
                (class.name.clone(), class.start_line),
                (
                    NodeKind::Class,
                    CompositeId::symbol_at(self.project_id, &parsed.path, &class.name, class.start_line),
                ),
            );
        }
        for func in &parsed.functions {
            map.insert(
                (func.name.clone(), func.start_line),
                (
                    NodeKind::Function,
                    CompositeId::symbol_at(self.project_id, &parsed.path, &func.name, func.start_line),
                ),
            );
        }
        map
    }

    fn resolve_one(
        &self,
        parsed: &ParsedFile,
        reference: &SymbolRef,
        _src_kind: NodeKind,
        src_id: &CompositeId,
        out: &mut ResolvedRefs,
        seen_placeholders: &mut HashSet<String>,
    ) {
        match &reference.kind {
            RefKind::Call => {
                if let Some(target) = self.index.find_function(&reference.target_name, &parsed.path)
                {
                    let mut props = Map::new();
                    props.insert("call_site_line".into(), json!(reference.line));
                    props.insert("type".into(), json!("direct"));
                    out.edges.push(EdgeRecord::with_properties(
                        EdgeKind::Calls,
                        src_id.clone(),
                        target.id.clone(),
                        props,
                    ));
                    out.stats.resolved += 1;
                } else {
                    out.stats.dropped += 1;
                }
            }
            RefKind::Inherits => {
                let target_id = self.class_or_placeholder(
                    &reference.target_name,
                    &parsed.path,
                    out,
                    seen_placeholders,
                );
                out.edges
                    .push(EdgeRecord::new(EdgeKind::InheritsFrom, src_id.clone(), target_id));
            }
            RefKind::CreatesObject => {
                let target_id = self.class_or_placeholder(
                    &reference.target_name,
                    &parsed.path,
                    out,
                    seen_placeholders,
                );
                let mut props = Map::new();
                props.insert("creation_line".into(), json!(reference.line));
                out.edges.push(EdgeRecord::with_properties(
                    EdgeKind::CreatesObject,
                    src_id.clone(),
                    target_id,
                    props,
                ));
            }
            RefKind::UsesVariable => {
                if let Some(target) = self.index.find_variable(
                    &parsed.path,
                    &reference.target_name,
                    &reference.src.name,
                ) {
                    let mut props = Map::new();
                    props.insert("usage_line".into(), json!(reference.line));
                    out.edges.push(EdgeRecord::with_properties(
                        EdgeKind::UsesVariable,
                        src_id.clone(),
                        target.id.clone(),
                        props,
                    ));
                    out.stats.resolved += 1;
                } else {
                    out.stats.dropped += 1;
                }
            }
            RefKind::ModifiesVariable { modification_type } => {
                if let Some(target) = self.index.find_variable(
                    &parsed.path,
                    &reference.target_name,
                    &reference.src.name,
                ) {
                    let mut props = Map::new();
                    props.insert("modification_line".into(), json!(reference.line));
                    props.insert("modification_type".into(), json!(modification_type));
                    out.edges.push(EdgeRecord::with_properties(
                        EdgeKind::ModifiesVariable,
                        src_id.clone(),
                        target.id.clone(),
                        props,
                    ));
                    out.stats.resolved += 1;
                } else {
                    out.stats.dropped += 1;
                }
            }
            // Raises/Handles/DecoratedBy target per-file named nodes created by
            // the builder alongside the entities; resolution is direct.
            RefKind::Raises => {
                out.edges.push(EdgeRecord::new(
                    EdgeKind::RaisesException,
                    src_id.clone(),
                    CompositeId::symbol(self.project_id, &parsed.path, &reference.target_name),
                ));
                out.stats.resolved += 1;
            }
            RefKind::Handles => {
                out.edges.push(EdgeRecord::new(
                    EdgeKind::HandlesException,
                    src_id.clone(),
                    CompositeId::symbol(self.project_id, &parsed.path, &reference.target_name),
                ));
                out.stats.resolved += 1;
            }
            RefKind::DecoratedBy => {
                out.edges.push(EdgeRecord::new(
                    EdgeKind::DecoratedBy,
                    src_id.clone(),
                    CompositeId::symbol(self.project_id, &parsed.path, &reference.target_name),
                ));
                out.stats.resolved += 1;
            }
        }
        debug_assert!(matches!(
            reference.hint,
            TargetHint::Function | TargetHint::Class | TargetHint::Variable | TargetHint::Any
        ));
    }

    /// Resolve a class target, creating a placeholder node if exhausted
    fn class_or_placeholder(
        &self,
        name: &str,
        prefer_file: &str,
        out: &mut ResolvedRefs,
        seen_placeholders: &mut HashSet<String>,
    ) -> CompositeId {
        if let Some(entry) = self.index.find_class(name, prefer_file) {
            out.stats.resolved += 1;
            return entry.id.clone();
        }
        let id = Self::placeholder_id(self.project_id, name);
        if seen_placeholders.insert(name.to_string()) {
            let placeholder = ClassNode {
                project_id: self.project_id.to_string(),
                name: name.to_string(),
                file_path: PLACEHOLDER_PATH.to_string(),
                start_line: 0,
                end_line: 0,
                placeholder: true,
            };
            // symbol() form: placeholders are not line-disambiguated
            let mut record = placeholder.to_record();
            record.id = id.clone();
            out.placeholder_nodes.push(record);
            out.stats.placeholders_created += 1;
        }
        id
    }
}

/// Find placeholder classes whose name now resolves to a real class.
///
/// Returns `(placeholder_id, real_id)` pairs; the caller repoints incoming
/// edges and deletes the placeholder in one batch.
pub async fn reconcilable_placeholders(
    store: &dyn GraphStore,
    project_id: &str,
) -> Result<Vec<(CompositeId, CompositeId)>> {
    const PAGE: usize = 1000;
    let mut pairs = Vec::new();
    let mut offset = 0;
    loop {
        let page = store.nodes(project_id, NodeKind::Class, PAGE, offset).await?;
        let done = page.len() < PAGE;
        for node in &page {
            if node.bool_prop("placeholder") != Some(true) {
                continue;
            }
            let Some(name) = node.str_prop("name") else {
                continue;
            };
            let real = store
                .nodes_by_name(project_id, NodeKind::Class, name)
                .await?
                .into_iter()
                .find(|candidate| candidate.bool_prop("placeholder") != Some(true));
            if let Some(real) = real {
                pairs.push((node.id.clone(), real.id));
            }
        }
        if done {
            break;
        }
        offset += PAGE;
    }
    Ok(pairs)
}
