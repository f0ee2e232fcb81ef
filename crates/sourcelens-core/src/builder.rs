//! CKG builder
//!
//! Turns a working directory (or an explicit file set) into graph mutations:
//! parse batches, atomic write batches, then a cross-file resolution pass.
//! A parser error on one file never aborts the build; a store batch failure
//! is retried once and then surfaced.

use crate::cancel::CancelToken;
use crate::error::{Error, Result};
use crate::model::{
    CompositeId, EdgeKind, EdgeRecord, FileNode, FunctionNode, Language, ModuleName, NamedNode,
    NodeKind, ParsedFile, ProjectNode, RefKind, ScopeType, VariableNode,
};
use crate::parser::ParserEngine;
use crate::resolver::{Resolver, SymbolIndex};
use crate::scanner::SourceScanner;
use crate::store::{GraphStore, WriteBatch};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

/// Default number of files per write batch
pub const DEFAULT_BATCH_SIZE: usize = 50;
/// Default entity ceiling per write batch
pub const DEFAULT_MAX_ENTITIES_PER_BATCH: usize = 10_000;

/// Builder configuration
#[derive(Debug, Clone)]
pub struct BuilderConfig {
    /// Files per write batch
    pub batch_size: usize,
    /// Entity ceiling per write batch; a batch flushes early when reached
    pub max_entities_per_batch: usize,
}

impl Default for BuilderConfig {
    fn default() -> Self {
        Self {
            batch_size: DEFAULT_BATCH_SIZE,
            max_entities_per_batch: DEFAULT_MAX_ENTITIES_PER_BATCH,
        }
    }
}

/// Identity of the project being built
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProjectMeta {
    /// Stable graph identifier
    pub graph_id: String,
    /// Display name
    pub name: String,
    /// Primary language label
    pub language: String,
}

/// Counters emitted by a build
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BuildReport {
    /// Files parsed and written
    pub files_processed: usize,
    /// Non-project nodes upserted
    pub entities_created: usize,
    /// Edges upserted
    pub edges_created: usize,
    /// References dropped for lack of a target
    pub unresolved_refs: usize,
    /// Placeholder classes created
    pub placeholders_created: usize,
    /// Files annotated with parse errors
    pub files_with_errors: usize,
    /// Wall time in milliseconds
    pub duration_ms: u64,
}

/// Builds and updates the code knowledge graph
pub struct CkgBuilder {
    engine: Arc<ParserEngine>,
    store: Arc<dyn GraphStore>,
    config: BuilderConfig,
}

impl CkgBuilder {
    /// Create a builder
    pub fn new(engine: Arc<ParserEngine>, store: Arc<dyn GraphStore>, config: BuilderConfig) -> Self {
        Self {
            engine,
            store,
            config,
        }
    }

    /// The underlying graph store
    pub fn store(&self) -> &Arc<dyn GraphStore> {
        &self.store
    }

    /// Full build: walk `working_dir`, parse everything, rebuild the graph
    pub async fn build_full(
        &self,
        project: &ProjectMeta,
        scanner: &SourceScanner,
        working_dir: &Path,
        cancel: &CancelToken,
    ) -> Result<BuildReport> {
        let outcome = scanner.scan(working_dir)?;
        info!(
            project_id = %project.graph_id,
            files = outcome.files.len(),
            skipped = outcome.skipped_unsupported,
            "starting full graph build"
        );

        let mut files = Vec::with_capacity(outcome.files.len());
        for discovered in &outcome.files {
            cancel.check("read_source")?;
            let bytes = tokio::fs::read(&discovered.abs_path).await?;
            files.push((discovered.rel_path.clone(), bytes));
        }

        self.build_files(project, files, false, cancel).await
    }

    /// Parse the given `(rel_path, bytes)` set and upsert it into the graph.
    ///
    /// With `resolve_against_store` the resolution pass also consults symbols
    /// already in the graph (incremental updates); a full build resolves only
    /// against the freshly parsed set.
    pub async fn build_files(
        &self,
        project: &ProjectMeta,
        files: Vec<(String, Vec<u8>)>,
        resolve_against_store: bool,
        cancel: &CancelToken,
    ) -> Result<BuildReport> {
        let started = Instant::now();
        let mut report = BuildReport::default();
        let mut all_parsed: Vec<ParsedFile> = Vec::with_capacity(files.len());
        let mut project_written = false;
        let project_exists = self
            .store
            .get_node(NodeKind::Project, &CompositeId::project(&project.graph_id))
            .await?
            .is_some();

        for chunk in files.chunks(self.config.batch_size.max(1)) {
            cancel.check("parse_batch")?;

            let results = self.engine.parse_batch(chunk);
            let mut parsed_chunk = Vec::with_capacity(results.len());
            for (result, (path, bytes)) in results.into_iter().zip(chunk) {
                match result {
                    Ok(parsed) => parsed_chunk.push(parsed),
                    Err(err) => {
                        // One bad file never aborts the build
                        warn!(path = %path, error = %err, "file failed to parse, recording stub");
                        let mut stub = ParsedFile::empty(
                            path.clone(),
                            Language::Unknown,
                            crate::model::content_hash(bytes),
                            bytes.len(),
                        );
                        stub.errors.push(err.to_string());
                        parsed_chunk.push(stub);
                    }
                }
            }

            // Flush in entity-bounded slices so one write batch stays tractable
            let mut slice: Vec<ParsedFile> = Vec::new();
            let mut slice_entities = 0usize;
            for parsed in parsed_chunk {
                let entities = parsed.entity_count();
                if !slice.is_empty()
                    && slice_entities + entities > self.config.max_entities_per_batch
                {
                    self.write_file_batch(project, &slice, !project_written, project_exists, &mut report)
                        .await?;
                    project_written = true;
                    all_parsed.extend(slice.drain(..));
                    slice_entities = 0;
                }
                slice_entities += entities;
                slice.push(parsed);
            }
            if !slice.is_empty() {
                self.write_file_batch(project, &slice, !project_written, project_exists, &mut report)
                    .await?;
                project_written = true;
                all_parsed.extend(slice);
            }
        }

        cancel.check("resolution")?;
        self.resolve_and_link(project, &all_parsed, resolve_against_store, &mut report)
            .await?;

        report.duration_ms = started.elapsed().as_millis() as u64;
        info!(
            project_id = %project.graph_id,
            files = report.files_processed,
            entities = report.entities_created,
            edges = report.edges_created,
            unresolved = report.unresolved_refs,
            placeholders = report.placeholders_created,
            "graph build finished"
        );
        Ok(report)
    }

    /// Assemble and apply one write batch for a slice of parsed files
    async fn write_file_batch(
        &self,
        project: &ProjectMeta,
        parsed_files: &[ParsedFile],
        include_project: bool,
        project_exists: bool,
        report: &mut BuildReport,
    ) -> Result<()> {
        let mut batch = WriteBatch::new();
        let project_id = &project.graph_id;
        let project_cid = CompositeId::project(project_id);
        let now = Utc::now();

        if include_project {
            let node = ProjectNode {
                graph_id: project_id.clone(),
                name: project.name.clone(),
                language: project.language.clone(),
                created_at: now,
                updated_at: now,
            };
            let mut record = node.to_record();
            if project_exists {
                // Upserts merge with incoming keys winning; the original
                // creation timestamp must survive re-analysis
                record.properties.remove("created_at");
            }
            batch.upsert_node(record);
        }

        for parsed in parsed_files {
            // Rebuild the file's symbols from scratch inside this transaction
            batch
                .delete_file_symbols
                .push((project_id.clone(), parsed.path.clone()));

            let file = FileNode {
                project_id: project_id.clone(),
                path: parsed.path.clone(),
                language: parsed.language,
                size_bytes: parsed.size_bytes,
                content_hash: parsed.content_hash.clone(),
                errors: parsed.errors.clone(),
                updated_at: now,
            };
            let file_cid = file.composite_id();
            batch.upsert_node(file.to_record());
            batch.upsert_edge(EdgeRecord::new(
                EdgeKind::BelongsTo,
                file_cid.clone(),
                project_cid.clone(),
            ));
            if !parsed.errors.is_empty() {
                report.files_with_errors += 1;
            }

            let module = ModuleName::from_path(&parsed.path);
            let module_cid = CompositeId::symbol(project_id, &parsed.path, module.as_str());
            let mut module_props = serde_json::Map::new();
            module_props.insert("name".into(), serde_json::json!(module.as_str()));
            module_props.insert("path".into(), serde_json::json!(parsed.path));
            module_props.insert("project_id".into(), serde_json::json!(project_id));
            batch.upsert_node(crate::model::NodeRecord::new(
                NodeKind::Module,
                module_cid.clone(),
                module_props,
            ));
            batch.upsert_edge(EdgeRecord::new(
                EdgeKind::BelongsTo,
                module_cid,
                project_cid.clone(),
            ));

            let mut decorators: HashSet<String> = HashSet::new();
            let mut exceptions: HashSet<String> = HashSet::new();

            for class in &parsed.classes {
                let node = crate::model::ClassNode {
                    project_id: project_id.clone(),
                    name: class.name.clone(),
                    file_path: parsed.path.clone(),
                    start_line: class.start_line,
                    end_line: class.end_line,
                    placeholder: false,
                };
                let class_cid = node.composite_id();
                batch.upsert_node(node.to_record());
                batch.upsert_edge(EdgeRecord::new(
                    EdgeKind::BelongsTo,
                    class_cid.clone(),
                    project_cid.clone(),
                ));
                batch.upsert_edge(EdgeRecord::new(
                    EdgeKind::DefinedIn,
                    class_cid.clone(),
                    file_cid.clone(),
                ));

                for attr in &class.attributes {
                    let var = VariableNode {
                        project_id: project_id.clone(),
                        qualified_name: format!("{}.{}", class.name, attr.name),
                        name: attr.name.clone(),
                        file_path: parsed.path.clone(),
                        line: attr.line,
                        scope: ScopeType::ClassAttribute,
                    };
                    let var_cid = var.composite_id();
                    batch.upsert_node(var.to_record());
                    batch.upsert_edge(EdgeRecord::new(
                        EdgeKind::BelongsTo,
                        var_cid.clone(),
                        project_cid.clone(),
                    ));
                    batch.upsert_edge(EdgeRecord::new(
                        EdgeKind::DeclaresAttribute,
                        class_cid.clone(),
                        var_cid,
                    ));
                }
                decorators.extend(class.decorators.iter().cloned());
            }

            for func in &parsed.functions {
                let node = FunctionNode {
                    project_id: project_id.clone(),
                    name: func.name.clone(),
                    signature: func.signature.clone(),
                    parameters_str: func.parameters_str.clone(),
                    file_path: parsed.path.clone(),
                    start_line: func.start_line,
                    end_line: func.end_line,
                    is_method: func.is_method,
                    class_name: func.class_name.clone(),
                };
                let func_cid = node.composite_id();
                batch.upsert_node(node.to_record());
                batch.upsert_edge(EdgeRecord::new(
                    EdgeKind::BelongsTo,
                    func_cid.clone(),
                    project_cid.clone(),
                ));
                batch.upsert_edge(EdgeRecord::new(
                    EdgeKind::DefinedIn,
                    func_cid.clone(),
                    file_cid.clone(),
                ));

                for (vars, scope, edge_kind) in [
                    (&func.parameters, ScopeType::Parameter, EdgeKind::HasParameter),
                    (&func.locals, ScopeType::LocalVariable, EdgeKind::DeclaresVariable),
                ] {
                    for var in vars.iter() {
                        let record = VariableNode {
                            project_id: project_id.clone(),
                            qualified_name: format!("{}.{}", func.name, var.name),
                            name: var.name.clone(),
                            file_path: parsed.path.clone(),
                            line: var.line,
                            scope,
                        };
                        let var_cid = record.composite_id();
                        batch.upsert_node(record.to_record());
                        batch.upsert_edge(EdgeRecord::new(
                            EdgeKind::BelongsTo,
                            var_cid.clone(),
                            project_cid.clone(),
                        ));
                        batch.upsert_edge(EdgeRecord::new(
                            edge_kind,
                            func_cid.clone(),
                            var_cid,
                        ));
                    }
                }
                decorators.extend(func.decorators.iter().cloned());
            }

            for var in &parsed.globals {
                let record = VariableNode {
                    project_id: project_id.clone(),
                    qualified_name: var.name.clone(),
                    name: var.name.clone(),
                    file_path: parsed.path.clone(),
                    line: var.line,
                    scope: ScopeType::GlobalVariable,
                };
                let var_cid = record.composite_id();
                batch.upsert_node(record.to_record());
                batch.upsert_edge(EdgeRecord::new(
                    EdgeKind::BelongsTo,
                    var_cid,
                    project_cid.clone(),
                ));
            }

            for reference in &parsed.refs {
                match reference.kind {
                    RefKind::Raises | RefKind::Handles => {
                        exceptions.insert(reference.target_name.clone());
                    }
                    RefKind::DecoratedBy => {
                        decorators.insert(reference.target_name.clone());
                    }
                    _ => {}
                }
            }

            for (names, kind) in [
                (&decorators, NodeKind::Decorator),
                (&exceptions, NodeKind::ExceptionType),
            ] {
                for name in names.iter() {
                    let node = NamedNode {
                        kind,
                        project_id: project_id.clone(),
                        name: name.clone(),
                        file_path: parsed.path.clone(),
                    };
                    let cid = node.composite_id();
                    batch.upsert_node(node.to_record());
                    batch.upsert_edge(EdgeRecord::new(
                        EdgeKind::BelongsTo,
                        cid,
                        project_cid.clone(),
                    ));
                }
            }

            // Decorator edges come straight from the entity lists
            for class in &parsed.classes {
                for deco in &class.decorators {
                    batch.upsert_edge(EdgeRecord::new(
                        EdgeKind::DecoratedBy,
                        CompositeId::symbol_at(project_id, &parsed.path, &class.name, class.start_line),
                        CompositeId::symbol(project_id, &parsed.path, deco),
                    ));
                }
            }
            for func in &parsed.functions {
                for deco in &func.decorators {
                    batch.upsert_edge(EdgeRecord::new(
                        EdgeKind::DecoratedBy,
                        CompositeId::symbol_at(project_id, &parsed.path, &func.name, func.start_line),
                        CompositeId::symbol(project_id, &parsed.path, deco),
                    ));
                }
            }
        }

        report.files_processed += parsed_files.len();
        report.entities_created += batch
            .upsert_nodes
            .iter()
            .filter(|n| n.kind != NodeKind::Project)
            .count();
        report.edges_created += batch.upsert_edges.len();

        debug!(
            files = parsed_files.len(),
            operations = batch.operation_count(),
            "applying write batch"
        );
        self.apply_with_retry(batch).await
    }

    /// Cross-file resolution: build the symbol index, resolve every file's
    /// references, apply placeholders and edges in one batch
    async fn resolve_and_link(
        &self,
        project: &ProjectMeta,
        parsed_files: &[ParsedFile],
        resolve_against_store: bool,
        report: &mut BuildReport,
    ) -> Result<()> {
        let mut index = SymbolIndex::new(&project.graph_id);
        if resolve_against_store {
            let skip: HashSet<String> = parsed_files.iter().map(|p| p.path.clone()).collect();
            index.load_existing(self.store.as_ref(), &skip).await?;
        }
        for parsed in parsed_files {
            index.add_parsed_file(parsed);
        }

        let resolver = Resolver::new(&project.graph_id, &index);
        let project_cid = CompositeId::project(&project.graph_id);
        let mut batch = WriteBatch::new();
        let mut seen_placeholder_ids: HashSet<String> = HashSet::new();

        for parsed in parsed_files {
            let resolved = resolver.resolve_file(parsed);
            for node in resolved.placeholder_nodes {
                if seen_placeholder_ids.insert(node.id.as_str().to_string()) {
                    batch.upsert_edge(EdgeRecord::new(
                        EdgeKind::BelongsTo,
                        node.id.clone(),
                        project_cid.clone(),
                    ));
                    batch.upsert_node(node);
                    report.placeholders_created += 1;
                }
            }
            report.unresolved_refs += resolved.stats.dropped;
            report.edges_created += resolved.edges.len();
            for edge in resolved.edges {
                batch.upsert_edge(edge);
            }
        }

        if batch.is_empty() {
            return Ok(());
        }
        self.apply_with_retry(batch).await
    }

    /// Apply a batch; retry once on failure, then surface
    async fn apply_with_retry(&self, batch: WriteBatch) -> Result<()> {
        match self.store.apply(batch.clone()).await {
            Ok(()) => Ok(()),
            Err(first) if first.is_retryable() => {
                warn!(error = %first, "write batch failed, retrying once");
                self.store.apply(batch).await.map_err(|second| {
                    Error::graph(format!("batch failed after retry: {second} (first: {first})"))
                })
            }
            Err(err) => Err(err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{ClassEntity, FunctionEntity, SymbolKey, TargetHint, VariableEntity};
    use crate::parser::{LanguageParser, LanguageRegistry, ParseContext};
    use crate::store::MemoryGraphStore;

    /// Minimal line-oriented parser: `class NAME [base BASE]`, `def NAME`,
    /// `call SRC TARGET` in the stub dialect used by builder tests.
    struct DialectParser;

    impl LanguageParser for DialectParser {
        fn language(&self) -> Language {
            Language::Python
        }
        fn supported_extensions(&self) -> &'static [&'static str] {
            &["py"]
        }
        fn parse(&self, context: &ParseContext) -> Result<ParsedFile> {
            let mut parsed = ParsedFile::empty(
                context.path.clone(),
                Language::Python,
                String::new(),
                context.content.len(),
            );
            for (idx, line) in context.content.lines().enumerate() {
                let line_no = idx + 1;
                let tokens: Vec<&str> = line.split_whitespace().collect();
                match tokens.as_slice() {
                    ["class", name] => parsed.classes.push(ClassEntity {
                        name: name.to_string(),
                        start_line: line_no,
                        end_line: line_no,
                        bases: vec![],
                        decorators: vec![],
                        attributes: vec![],
                    }),
                    ["class", name, "base", base] => {
                        parsed.classes.push(ClassEntity {
                            name: name.to_string(),
                            start_line: line_no,
                            end_line: line_no,
                            bases: vec![base.to_string()],
                            decorators: vec![],
                            attributes: vec![],
                        });
                        parsed.refs.push(crate::model::SymbolRef {
                            kind: RefKind::Inherits,
                            src: SymbolKey {
                                name: name.to_string(),
                                start_line: line_no,
                            },
                            target_name: base.to_string(),
                            line: line_no,
                            hint: TargetHint::Class,
                        });
                    }
                    ["def", name] => parsed.functions.push(FunctionEntity {
                        name: name.to_string(),
                        signature: format!("def {name}()"),
                        parameters_str: String::new(),
                        parameters: vec![VariableEntity {
                            name: "arg".into(),
                            line: line_no,
                            scope: ScopeType::Parameter,
                        }],
                        locals: vec![],
                        start_line: line_no,
                        end_line: line_no,
                        class_name: None,
                        is_method: false,
                        decorators: vec![],
                    }),
                    ["call", src, target] => {
                        let src_line = context
                            .content
                            .lines()
                            .position(|l| l.trim() == format!("def {src}"))
                            .map(|i| i + 1)
                            .unwrap_or(1);
                        parsed.refs.push(crate::model::SymbolRef {
                            kind: RefKind::Call,
                            src: SymbolKey {
                                name: src.to_string(),
                                start_line: src_line,
                            },
                            target_name: target.to_string(),
                            line: line_no,
                            hint: TargetHint::Function,
                        });
                    }
                    _ => {}
                }
            }
            Ok(parsed)
        }
    }

    fn builder_with_store() -> (CkgBuilder, Arc<MemoryGraphStore>) {
        let registry = Arc::new(LanguageRegistry::new());
        registry.register(Arc::new(DialectParser));
        let engine = Arc::new(ParserEngine::new(registry));
        let store = Arc::new(MemoryGraphStore::new());
        let builder = CkgBuilder::new(
            engine,
            Arc::clone(&store) as Arc<dyn GraphStore>,
            BuilderConfig::default(),
        );
        (builder, store)
    }

    fn project() -> ProjectMeta {
        ProjectMeta {
            graph_id: "proj".into(),
            name: "proj".into(),
            language: "Python".into(),
        }
    }

    #[tokio::test]
    async fn test_build_creates_nodes_and_edges() {
        let (builder, store) = builder_with_store();
        let files = vec![
            ("a.py".to_string(), b"class A\ndef fa\ncall fa fb".to_vec()),
            ("b.py".to_string(), b"def fb".to_vec()),
        ];
        let report = builder
            .build_files(&project(), files, false, &CancelToken::new())
            .await
            .unwrap();

        assert_eq!(report.files_processed, 2);
        assert_eq!(store.get_node(NodeKind::Project, &CompositeId::project("proj")).await.unwrap().is_some(), true);
        assert_eq!(store.count_nodes("proj", NodeKind::File).await.unwrap(), 2);
        assert_eq!(store.count_nodes("proj", NodeKind::Class).await.unwrap(), 1);
        assert_eq!(store.count_nodes("proj", NodeKind::Function).await.unwrap(), 2);

        let calls = store.edges("proj", EdgeKind::Calls).await.unwrap();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].src.as_str(), "proj:a.py:fa:2");
        assert_eq!(calls[0].dst.as_str(), "proj:b.py:fb:1");
        assert_eq!(calls[0].properties.get("call_site_line").unwrap(), 3);
    }

    #[tokio::test]
    async fn test_every_node_belongs_to_project() {
        let (builder, store) = builder_with_store();
        let files = vec![("a.py".to_string(), b"class A\ndef fa".to_vec())];
        builder
            .build_files(&project(), files, false, &CancelToken::new())
            .await
            .unwrap();

        for kind in [
            NodeKind::File,
            NodeKind::Module,
            NodeKind::Class,
            NodeKind::Function,
            NodeKind::Variable,
        ] {
            for node in store.nodes("proj", kind, 100, 0).await.unwrap() {
                let outgoing = store.edges_from(&node.id).await.unwrap();
                let belongs = outgoing
                    .iter()
                    .filter(|e| e.kind == EdgeKind::BelongsTo)
                    .count();
                assert_eq!(belongs, 1, "{kind} node {} must have one BELONGS_TO", node.id);
            }
        }
    }

    #[tokio::test]
    async fn test_unresolved_base_produces_placeholder() {
        let (builder, store) = builder_with_store();
        let files = vec![("a.py".to_string(), b"class Child base ExternalBase".to_vec())];
        let report = builder
            .build_files(&project(), files, false, &CancelToken::new())
            .await
            .unwrap();

        assert_eq!(report.placeholders_created, 1);
        let classes = store.nodes("proj", NodeKind::Class, 100, 0).await.unwrap();
        let placeholder = classes
            .iter()
            .find(|c| c.bool_prop("placeholder") == Some(true))
            .expect("placeholder class should exist");
        assert_eq!(placeholder.str_prop("name"), Some("ExternalBase"));

        let inherits = store.edges("proj", EdgeKind::InheritsFrom).await.unwrap();
        assert_eq!(inherits.len(), 1);
        assert_eq!(inherits[0].dst, placeholder.id);
    }

    #[tokio::test]
    async fn test_rebuild_is_idempotent() {
        let (builder, store) = builder_with_store();
        let files = vec![("a.py".to_string(), b"class A\ndef fa\ncall fa fa".to_vec())];
        builder
            .build_files(&project(), files.clone(), false, &CancelToken::new())
            .await
            .unwrap();
        let nodes_before = store.node_count();
        let edges_before = store.edge_count();

        builder
            .build_files(&project(), files, false, &CancelToken::new())
            .await
            .unwrap();
        assert_eq!(store.node_count(), nodes_before, "rebuild must not duplicate nodes");
        assert_eq!(store.edge_count(), edges_before, "rebuild must not duplicate edges");
    }

    #[tokio::test]
    async fn test_cancellation_between_batches() {
        let (builder, _store) = builder_with_store();
        let cancel = CancelToken::new();
        cancel.cancel();
        let files = vec![("a.py".to_string(), b"class A".to_vec())];
        let err = builder
            .build_files(&project(), files, false, &cancel)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Cancelled { .. }));
    }
}
