//! Incremental graph updates
//!
//! Classifies the current file set against stored content hashes, computes the
//! dependent-file closure, and drives selective re-parses through the builder.
//! An unchanged file set is a strict no-op (no writes at all).

use crate::builder::{BuildReport, CkgBuilder, ProjectMeta};
use crate::cancel::CancelToken;
use crate::error::{Error, Result};
use crate::model::{content_hash, CompositeId, EdgeKind, EdgeRecord, NodeKind};
use crate::resolver::{reconcilable_placeholders, PLACEHOLDER_PATH};
use crate::store::{GraphStore, WriteBatch};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use tracing::{debug, info};

/// Classification of the current file set against the stored graph
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct UpdatePlan {
    /// Present now, no stored hash
    pub added: Vec<String>,
    /// Present now, hash differs
    pub modified: Vec<String>,
    /// Stored but absent from the input
    pub deleted: Vec<String>,
    /// Present now, hash equal
    pub unchanged: Vec<String>,
    /// Unchanged files with call/inheritance edges into the changed set;
    /// re-resolved but not counted as modified
    pub affected_unchanged: Vec<String>,
}

impl UpdatePlan {
    /// Whether the plan contains any graph mutation
    pub fn is_noop(&self) -> bool {
        self.added.is_empty() && self.modified.is_empty() && self.deleted.is_empty()
    }
}

/// Counters reported after an update
#[derive(Debug, Default, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct UpdateStats {
    /// Newly added files
    pub added: usize,
    /// Re-parsed files
    pub modified: usize,
    /// Removed files
    pub deleted: usize,
    /// Unchanged files pulled in by the dependency closure
    pub affected_unchanged: usize,
    /// Total files whose graph content was touched
    pub total_updated: usize,
}

/// Updater configuration
#[derive(Debug, Clone)]
pub struct UpdaterConfig {
    /// Maximum tolerated fraction of placeholder classes after an update
    pub max_placeholder_fraction: f64,
}

impl Default for UpdaterConfig {
    fn default() -> Self {
        Self {
            max_placeholder_fraction: 0.5,
        }
    }
}

/// Drives selective re-parses from content-hash deltas
pub struct IncrementalUpdater<'a> {
    builder: &'a CkgBuilder,
    config: UpdaterConfig,
}

impl<'a> IncrementalUpdater<'a> {
    /// Create an updater over a builder
    pub fn new(builder: &'a CkgBuilder, config: UpdaterConfig) -> Self {
        Self { builder, config }
    }

    /// Classify `current` (path → bytes) against the stored graph
    pub async fn plan(
        &self,
        project_id: &str,
        current: &BTreeMap<String, Vec<u8>>,
    ) -> Result<UpdatePlan> {
        let store = self.builder.store();
        let stored = store.file_hashes(project_id).await?;
        let mut plan = UpdatePlan::default();

        for (path, bytes) in current {
            match stored.get(path) {
                None => plan.added.push(path.clone()),
                Some(hash) if *hash != content_hash(bytes) => plan.modified.push(path.clone()),
                Some(_) => plan.unchanged.push(path.clone()),
            }
        }
        for path in stored.keys() {
            if !current.contains_key(path) && path != PLACEHOLDER_PATH {
                plan.deleted.push(path.clone());
            }
        }
        plan.deleted.sort();

        let changed: HashSet<&String> = plan.modified.iter().chain(plan.deleted.iter()).collect();
        if !changed.is_empty() {
            plan.affected_unchanged = self
                .dependency_closure(project_id, &changed, &plan.unchanged)
                .await?;
        }
        Ok(plan)
    }

    /// Files among `unchanged` holding symbols with CALLS or INHERITS_FROM
    /// edges into symbols defined in the changed set. Both edge kinds are
    /// followed so inheritance-only dependencies are not missed.
    async fn dependency_closure(
        &self,
        project_id: &str,
        changed: &HashSet<&String>,
        unchanged: &[String],
    ) -> Result<Vec<String>> {
        let store = self.builder.store();
        let unchanged_set: HashSet<&String> = unchanged.iter().collect();
        let mut affected: HashSet<String> = HashSet::new();

        for path in changed.iter() {
            let file_id = CompositeId::file(project_id, path);
            // Symbols defined in the changed file
            let defined: Vec<CompositeId> = store
                .edges_to(&file_id)
                .await?
                .into_iter()
                .filter(|e| e.kind == EdgeKind::DefinedIn)
                .map(|e| e.src)
                .collect();

            for symbol_id in defined {
                for edge in store.edges_to(&symbol_id).await? {
                    if !matches!(edge.kind, EdgeKind::Calls | EdgeKind::InheritsFrom) {
                        continue;
                    }
                    // Source symbol's defining file
                    let src_file = store
                        .edges_from(&edge.src)
                        .await?
                        .into_iter()
                        .find(|e| e.kind == EdgeKind::DefinedIn)
                        .map(|e| e.dst);
                    if let Some(src_file_id) = src_file {
                        if let Some(file_node) =
                            store.get_node(NodeKind::File, &src_file_id).await?
                        {
                            if let Some(path) = file_node.str_prop("path") {
                                let path = path.to_string();
                                if unchanged_set.contains(&path) {
                                    affected.insert(path);
                                }
                            }
                        }
                    }
                }
            }
        }

        let mut result: Vec<String> = affected.into_iter().collect();
        result.sort();
        Ok(result)
    }

    /// Execute an update: delete removed files, re-parse added/modified plus
    /// the affected closure, reconcile placeholders, validate.
    pub async fn apply(
        &self,
        project: &ProjectMeta,
        current: BTreeMap<String, Vec<u8>>,
        cancel: &CancelToken,
    ) -> Result<(UpdateStats, BuildReport)> {
        let plan = self.plan(&project.graph_id, &current).await?;
        info!(
            project_id = %project.graph_id,
            added = plan.added.len(),
            modified = plan.modified.len(),
            deleted = plan.deleted.len(),
            affected = plan.affected_unchanged.len(),
            "incremental update plan"
        );

        if plan.is_noop() {
            debug!("file set unchanged, skipping update entirely");
            return Ok((UpdateStats::default(), BuildReport::default()));
        }

        let store = self.builder.store();

        // Deletions first so stale symbols never shadow fresh ones
        if !plan.deleted.is_empty() {
            let mut batch = WriteBatch::new();
            for path in &plan.deleted {
                batch
                    .delete_files
                    .push((project.graph_id.clone(), path.clone()));
            }
            store.apply(batch).await?;
        }

        cancel.check("incremental_reparse")?;

        // Re-parse added + modified + affected; affected files are unchanged
        // on disk so their symbols rebuild to identical composite ids, only
        // their outgoing edges are refreshed.
        let mut to_parse: Vec<(String, Vec<u8>)> = Vec::new();
        for path in plan
            .added
            .iter()
            .chain(plan.modified.iter())
            .chain(plan.affected_unchanged.iter())
        {
            if let Some(bytes) = current.get(path) {
                to_parse.push((path.clone(), bytes.clone()));
            }
        }
        let report = self
            .builder
            .build_files(project, to_parse, true, cancel)
            .await?;

        self.reconcile_placeholders(&project.graph_id).await?;
        self.validate(&project.graph_id).await?;

        let stats = UpdateStats {
            added: plan.added.len(),
            modified: plan.modified.len(),
            deleted: plan.deleted.len(),
            affected_unchanged: plan.affected_unchanged.len(),
            total_updated: plan.added.len()
                + plan.modified.len()
                + plan.deleted.len()
                + plan.affected_unchanged.len(),
        };
        Ok((stats, report))
    }

    /// Replace placeholder classes whose target symbol is now in the graph:
    /// incoming edges are repointed to the real class and the placeholder is
    /// removed in the same batch.
    async fn reconcile_placeholders(&self, project_id: &str) -> Result<()> {
        let store = self.builder.store();
        let pairs = reconcilable_placeholders(store.as_ref(), project_id).await?;
        if pairs.is_empty() {
            return Ok(());
        }

        let mut batch = WriteBatch::new();
        for (placeholder_id, real_id) in pairs {
            for edge in store.edges_to(&placeholder_id).await? {
                if edge.kind == EdgeKind::BelongsTo {
                    continue;
                }
                batch.upsert_edge(EdgeRecord::with_properties(
                    edge.kind,
                    edge.src,
                    real_id.clone(),
                    edge.properties,
                ));
            }
            batch.delete_nodes.push(placeholder_id);
        }
        info!(
            project_id,
            reconciled = batch.delete_nodes.len(),
            "replacing resolved placeholders"
        );
        store.apply(batch).await
    }

    /// Post-update consistency checks.
    ///
    /// Composite-id uniqueness is structural in the store (violating upserts
    /// fail the batch), so the checks here are the cross-record ones: orphan
    /// DEFINED_IN targets and the placeholder fraction ceiling.
    pub async fn validate(&self, project_id: &str) -> Result<()> {
        let store = self.builder.store();

        for edge in store.edges(project_id, EdgeKind::DefinedIn).await? {
            if store.get_node(NodeKind::File, &edge.dst).await?.is_none() {
                return Err(Error::graph(format!(
                    "orphan DEFINED_IN: {} targets missing file {}",
                    edge.src, edge.dst
                )));
            }
        }

        let total_classes = store.count_nodes(project_id, NodeKind::Class).await?;
        if total_classes > 0 {
            let mut placeholders = 0usize;
            let mut offset = 0;
            const PAGE: usize = 1000;
            loop {
                let page = store.nodes(project_id, NodeKind::Class, PAGE, offset).await?;
                let done = page.len() < PAGE;
                placeholders += page
                    .iter()
                    .filter(|n| n.bool_prop("placeholder") == Some(true))
                    .count();
                if done {
                    break;
                }
                offset += PAGE;
            }
            let fraction = placeholders as f64 / total_classes as f64;
            if fraction > self.config.max_placeholder_fraction {
                return Err(Error::validation(
                    "placeholder_fraction",
                    format!(
                        "{placeholders}/{total_classes} classes are placeholders \
                         (fraction {fraction:.2} exceeds {:.2})",
                        self.config.max_placeholder_fraction
                    ),
                ));
            }
        }
        Ok(())
    }
}
