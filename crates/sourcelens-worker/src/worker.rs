//! Analysis worker
//!
//! Consumes jobs from the queue and drives fetch → graph update → context →
//! LLM → findings, persisting each state transition before the next step's
//! external I/O so a restarted worker can tell where a job died. Jobs are
//! idempotent per job id: a record already in a terminal state is acked and
//! dropped.

use crate::config::WorkerConfig;
use crate::queue::{Delivery, JobQueue};
use crate::store::{FindingStore, RequestStore};
use chrono::Utc;
use sourcelens_core::builder::{BuilderConfig, CkgBuilder, ProjectMeta};
use sourcelens_core::cancel::CancelToken;
use sourcelens_core::error::{Error, Result};
use sourcelens_core::model::{
    AnalysisRequest, Finding, JobKind, Language, LlmConfig, RequestStatus, Severity,
};
use sourcelens_core::parser::{LanguageRegistry, ParserEngine};
use sourcelens_core::query::GraphQuery;
use sourcelens_core::repo::{FetchedSource, RepoFetcher};
use sourcelens_core::scanner::SourceScanner;
use sourcelens_core::store::GraphStore;
use sourcelens_core::update::{IncrementalUpdater, UpdaterConfig};
use sourcelens_llm::{
    build_provider, AnalysisKind, ContextBuilder, ContextInput, ContextOutcome, FilePreview,
    LlmClient, LlmProvider, LlmSettings, PrContext,
};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Instant;
use tracing::{error, info, warn};

/// Constructs the provider a job's config selects; injectable for tests
pub type ProviderFactory =
    Box<dyn Fn(&LlmConfig) -> Result<Arc<dyn LlmProvider>> + Send + Sync>;

/// Queue-driven analysis worker
pub struct AnalysisWorker {
    queue: Arc<dyn JobQueue>,
    requests: Arc<dyn RequestStore>,
    findings: Arc<dyn FindingStore>,
    graph: Arc<dyn GraphStore>,
    registry: Arc<LanguageRegistry>,
    provider_factory: ProviderFactory,
    llm_settings: LlmSettings,
    config: WorkerConfig,
}

impl AnalysisWorker {
    /// Create a worker over the given collaborators
    pub fn new(
        queue: Arc<dyn JobQueue>,
        requests: Arc<dyn RequestStore>,
        findings: Arc<dyn FindingStore>,
        graph: Arc<dyn GraphStore>,
        registry: Arc<LanguageRegistry>,
        llm_settings: LlmSettings,
        config: WorkerConfig,
    ) -> Self {
        let settings = llm_settings.clone();
        Self {
            queue,
            requests,
            findings,
            graph,
            registry,
            provider_factory: Box::new(move |config| build_provider(config, &settings)),
            llm_settings,
            config,
        }
    }

    /// Replace the provider factory (tests inject scripted providers here)
    pub fn with_provider_factory(mut self, factory: ProviderFactory) -> Self {
        self.provider_factory = factory;
        self
    }

    /// Poll-and-process loop until the token is tripped
    pub async fn run(&self, cancel: CancelToken) {
        info!("analysis worker started");
        while !cancel.is_cancelled() {
            match self.run_once(&cancel).await {
                Ok(true) => {}
                Ok(false) => {
                    tokio::select! {
                        _ = tokio::time::sleep(self.config.poll_interval) => {}
                        _ = cancel.cancelled() => {}
                    }
                }
                Err(err) => {
                    error!(error = %err, "queue error, backing off");
                    tokio::time::sleep(self.config.poll_interval).await;
                }
            }
        }
        info!("analysis worker stopped");
    }

    /// Process at most one delivery; returns whether one was processed
    pub async fn run_once(&self, cancel: &CancelToken) -> Result<bool> {
        let Some(delivery) = self.queue.dequeue().await? else {
            return Ok(false);
        };
        self.process_delivery(delivery, cancel).await;
        Ok(true)
    }

    async fn process_delivery(&self, delivery: Delivery, cancel: &CancelToken) {
        let job_id = delivery.job.job_id.clone();

        // Duplicate suppression: terminal records are acked and dropped
        let mut request = match self.requests.get(&job_id).await {
            Ok(Some(existing)) if existing.status.is_terminal() => {
                info!(job_id = %job_id, status = %existing.status, "duplicate delivery of terminal job, dropping");
                let _ = self.queue.ack(&delivery).await;
                return;
            }
            Ok(Some(existing)) => existing,
            Ok(None) => AnalysisRequest::from_job(&delivery.job),
            Err(err) => {
                error!(job_id = %job_id, error = %err, "request store unavailable, returning job");
                let _ = self.queue.nack(&delivery).await;
                return;
            }
        };

        let started = Instant::now();
        let outcome = tokio::time::timeout(
            self.config.analysis_timeout,
            self.execute(&mut request, cancel),
        )
        .await
        .unwrap_or_else(|_| {
            Err(Error::timeout("analysis", self.config.analysis_timeout))
        });

        match outcome {
            Ok(()) => {
                request.status = RequestStatus::Completed;
                request.completed_at = Some(Utc::now());
                if let Err(err) = self.requests.upsert(&request).await {
                    error!(job_id = %job_id, error = %err, "failed to persist completed state");
                }
                self.log_metrics(&job_id, started).await;
            }
            Err(err) => {
                let message = match &err {
                    Error::Cancelled { .. } => "canceled".to_string(),
                    other => other.to_string(),
                };
                warn!(job_id = %job_id, error = %message, "job failed");
                request.status = RequestStatus::Failed;
                request.error_message = Some(message);
                request.completed_at = Some(Utc::now());
                if let Err(err) = self.requests.upsert(&request).await {
                    error!(job_id = %job_id, error = %err, "failed to persist failed state");
                }
            }
        }

        // Failed jobs are acked too: operators re-enqueue manually so a
        // deterministic failure cannot loop forever
        if let Err(err) = self.queue.ack(&delivery).await {
            error!(job_id = %job_id, error = %err, "ack failed");
        }
    }

    /// The pipeline steps; every transition persists before the next step
    async fn execute(&self, request: &mut AnalysisRequest, cancel: &CancelToken) -> Result<()> {
        request.started_at = Some(Utc::now());
        self.transition(request, RequestStatus::Processing).await?;

        let fetched = RepoFetcher::new()
            .fetch(&request.repo_ref, request.kind, cancel)
            .await?;
        self.transition(request, RequestStatus::SourceFetched).await?;

        let engine = Arc::new(
            ParserEngine::new(Arc::clone(&self.registry))
                .with_max_file_size(self.config.max_file_size)
                .with_parse_concurrency(self.config.parse_concurrency)?,
        );
        let scanner = SourceScanner::new(Arc::clone(&self.registry));
        let outcome = scanner.scan(fetched.working_dir())?;

        let mut current: BTreeMap<String, Vec<u8>> = BTreeMap::new();
        for file in &outcome.files {
            cancel.check("read_source")?;
            current.insert(file.rel_path.clone(), tokio::fs::read(&file.abs_path).await?);
        }
        let language = primary_language(&outcome.files.iter().map(|f| f.language).collect::<Vec<_>>());

        self.transition(request, RequestStatus::CkgBuilding).await?;
        let project = ProjectMeta {
            graph_id: request.project_id.clone(),
            name: request.project_id.clone(),
            language: language.to_string(),
        };
        let builder = CkgBuilder::new(
            engine,
            Arc::clone(&self.graph),
            BuilderConfig {
                batch_size: self.config.batch_size,
                ..Default::default()
            },
        );
        let updater = IncrementalUpdater::new(&builder, UpdaterConfig::default());
        let (stats, report) = updater.apply(&project, current, cancel).await?;
        info!(
            job_id = %request.job_id,
            added = stats.added,
            modified = stats.modified,
            deleted = stats.deleted,
            entities = report.entities_created,
            "graph updated"
        );
        request.project_graph_id = Some(request.project_id.clone());
        self.transition(request, RequestStatus::Analyzing).await?;

        cancel.check("analyze")?;
        let rows = self.analyze(request, &fetched, &outcome.files, language).await?;
        self.findings.append(&rows).await?;
        Ok(())
    }

    /// Assemble context and call the model; returns the finding rows to
    /// persist. The meaningful-data check and the raw fallback both end here
    /// as rows, so a completed request always has some record.
    async fn analyze(
        &self,
        request: &AnalysisRequest,
        fetched: &FetchedSource,
        files: &[sourcelens_core::scanner::DiscoveredFile],
        language: Language,
    ) -> Result<Vec<Finding>> {
        let query = GraphQuery::new(Arc::clone(&self.graph));
        let overview = query.project_overview(&request.project_id).await?;

        let context_builder = ContextBuilder::new();
        let paths: Vec<String> = files.iter().map(|f| f.rel_path.clone()).collect();
        let (listing, previews) =
            context_builder.gather_tree_context(fetched.working_dir(), &paths);

        let pr = match (&request.repo_ref.pr, request.kind) {
            (Some(meta), JobKind::PrScan) => Some(PrContext {
                title: meta.title.clone(),
                description: meta.description.clone(),
                author: meta.author.clone(),
                head_branch: meta.head_branch.clone(),
                base_branch: meta.base_branch.clone(),
                diff: fetched.diff.clone().unwrap_or_default(),
                changed_files: changed_file_previews(fetched),
            }),
            _ => None,
        };

        let input = ContextInput {
            project_name: request.project_id.clone(),
            project_language: language.to_string(),
            main_branch: request
                .repo_ref
                .branch
                .clone()
                .unwrap_or_else(|| "HEAD".to_string()),
            project_notes: request.project_notes.clone(),
            output_language: request.output_language.clone(),
            overview,
            directory_listing: listing,
            important_files: previews,
            pr,
        };

        let variables = match context_builder.build(&input) {
            ContextOutcome::Skip { project_summary } => {
                info!(job_id = %request.job_id, "graph holds no analyzable content, skipping llm");
                return Ok(vec![Finding::raw_fallback(&request.job_id, project_summary)]);
            }
            ContextOutcome::Ready(vars) => vars,
        };

        let provider = (self.provider_factory)(&request.llm_config)?;
        let temperature = self.llm_settings.temperature(request.llm_config.temperature);
        let client = LlmClient::new(provider);
        let kind = match request.kind {
            JobKind::PrScan => AnalysisKind::PrDeepLogic,
            JobKind::FullScan => AnalysisKind::FullArchitecture,
        };
        let result = client.invoke(kind, &variables, temperature).await;

        let mut rows = Vec::new();
        if let Some(output) = result.parsed_output {
            for finding in output.findings {
                rows.push(Finding {
                    request_id: request.job_id.clone(),
                    file_path: finding.file_path,
                    line_start: finding.line_start,
                    line_end: finding.line_end,
                    severity: finding.severity,
                    category: finding.category,
                    message: finding.message,
                    suggestion: finding.suggestion,
                    finding_type: finding.finding_type,
                    raw_llm_content: None,
                });
            }
            if rows.is_empty() {
                // A completed request always has some record: keep the
                // model's summary when it reported nothing actionable
                rows.push(Finding {
                    request_id: request.job_id.clone(),
                    file_path: String::new(),
                    line_start: 0,
                    line_end: 0,
                    severity: Severity::Note,
                    category: "Analysis".to_string(),
                    message: output.project_summary,
                    suggestion: String::new(),
                    finding_type: "project_summary".to_string(),
                    raw_llm_content: None,
                });
            }
            if !result.coercion_warnings.is_empty() {
                rows.push(Finding {
                    request_id: request.job_id.clone(),
                    file_path: String::new(),
                    line_start: 0,
                    line_end: 0,
                    severity: Severity::Info,
                    category: "Analysis".to_string(),
                    message: format!(
                        "output coercion applied: {}",
                        result.coercion_warnings.join("; ")
                    ),
                    suggestion: String::new(),
                    finding_type: "coercion_warnings".to_string(),
                    raw_llm_content: None,
                });
            }
        } else {
            // Graceful degradation: nothing the model said is dropped
            let raw = if result.raw_content.is_empty() {
                format!(
                    "LLM unreachable after retries ({}); no analysis produced.",
                    result.parsing_error.as_deref().unwrap_or("unknown error")
                )
            } else {
                result.raw_content
            };
            rows.push(Finding::raw_fallback(&request.job_id, raw));
        }
        Ok(rows)
    }

    async fn transition(
        &self,
        request: &mut AnalysisRequest,
        status: RequestStatus,
    ) -> Result<()> {
        request.status = status;
        self.requests.upsert(request).await
    }

    async fn log_metrics(&self, job_id: &str, started: Instant) {
        let rows = self.findings.for_request(job_id).await.unwrap_or_default();
        let mut by_severity: HashMap<Severity, usize> = HashMap::new();
        for row in &rows {
            *by_severity.entry(row.severity).or_default() += 1;
        }
        info!(
            job_id,
            findings = rows.len(),
            errors = by_severity.get(&Severity::Error).copied().unwrap_or(0),
            warnings = by_severity.get(&Severity::Warning).copied().unwrap_or(0),
            notes = by_severity.get(&Severity::Note).copied().unwrap_or(0),
            infos = by_severity.get(&Severity::Info).copied().unwrap_or(0),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "job completed"
        );
    }
}

/// Most common language across the scanned files
fn primary_language(languages: &[Language]) -> Language {
    let mut counts: HashMap<Language, usize> = HashMap::new();
    for language in languages {
        *counts.entry(*language).or_default() += 1;
    }
    counts
        .into_iter()
        .max_by_key(|(_, count)| *count)
        .map(|(language, _)| language)
        .unwrap_or(Language::Unknown)
}

/// Content previews for a PR's changed files
fn changed_file_previews(fetched: &FetchedSource) -> Vec<FilePreview> {
    fetched
        .changed_files
        .iter()
        .filter_map(|path| {
            let bytes = std::fs::read(fetched.working_dir().join(path)).ok()?;
            let head_len = bytes.len().min(sourcelens_llm::context::DEFAULT_PREVIEW_BYTES);
            Some(FilePreview {
                path: path.clone(),
                head: String::from_utf8_lossy(&bytes[..head_len]).into_owned(),
            })
        })
        .collect()
}
