//! End-to-end pipeline tests
//!
//! Drive the full worker against local git repositories, the in-memory graph
//! store and queue, and a scripted LLM provider.

use async_trait::async_trait;
use chrono::Utc;
use sourcelens_core::cancel::CancelToken;
use sourcelens_core::error::{Error, Result};
use sourcelens_core::model::{
    AnalysisJob, CompositeId, JobKind, LlmConfig, NodeKind, ProviderKind, RepoRef, RequestStatus,
    Severity, RAW_ANALYSIS_PATH,
};
use sourcelens_core::parser::LanguageRegistry;
use sourcelens_core::query::GraphQuery;
use sourcelens_core::store::{GraphStore, MemoryGraphStore};
use sourcelens_llm::{CompletionRequest, LlmProvider, LlmSettings};
use sourcelens_worker::{
    AnalysisWorker, FindingStore, InMemoryFindingStore, InMemoryJobQueue, InMemoryRequestStore,
    JobQueue, RequestStore, WorkerConfig,
};
use std::process::Command;
use std::sync::{Arc, Mutex};

fn git_available() -> bool {
    Command::new("git")
        .arg("--version")
        .output()
        .map(|o| o.status.success())
        .unwrap_or(false)
}

fn git(dir: &std::path::Path, args: &[&str]) {
    let output = Command::new("git")
        .args(args)
        .current_dir(dir)
        .env("GIT_AUTHOR_NAME", "test")
        .env("GIT_AUTHOR_EMAIL", "test@example.com")
        .env("GIT_COMMITTER_NAME", "test")
        .env("GIT_COMMITTER_EMAIL", "test@example.com")
        .output()
        .expect("git spawns");
    assert!(
        output.status.success(),
        "git {args:?} failed: {}",
        String::from_utf8_lossy(&output.stderr)
    );
}

/// Three Python files, each one class with a constructor and two methods
const SEED_FILES: [(&str, &str); 3] = [
    (
        "orders.py",
        "class OrderBook:\n    def __init__(self, depth):\n        self.depth = depth\n\n    def place(self, order):\n        validated = order\n        return validated\n\n    def cancel(self, order_id):\n        return order_id\n",
    ),
    (
        "pricing.py",
        "class PriceFeed:\n    def __init__(self, source):\n        self.source = source\n\n    def quote(self, symbol):\n        value = 0\n        return value\n\n    def refresh(self, symbol):\n        return symbol\n",
    ),
    (
        "risk.py",
        "class RiskEngine:\n    def __init__(self, limits):\n        self.limits = limits\n\n    def check(self, order):\n        return order\n\n    def report(self, day):\n        return day\n",
    ),
];

fn seed_repo() -> tempfile::TempDir {
    let dir = tempfile::tempdir().unwrap();
    git(dir.path(), &["init", "--initial-branch=main"]);
    for (name, content) in SEED_FILES {
        std::fs::write(dir.path().join(name), content).unwrap();
    }
    git(dir.path(), &["add", "."]);
    git(dir.path(), &["commit", "-m", "seed"]);
    dir
}

fn commit_all(dir: &std::path::Path, message: &str) {
    git(dir, &["add", "-A"]);
    git(dir, &["commit", "-m", message]);
}

/// Scripted provider: pops one canned reply per call
struct ScriptedProvider {
    replies: Mutex<Vec<Result<String>>>,
}

impl ScriptedProvider {
    fn new(replies: Vec<Result<String>>) -> Arc<Self> {
        Arc::new(Self {
            replies: Mutex::new(replies),
        })
    }
}

#[async_trait]
impl LlmProvider for ScriptedProvider {
    fn name(&self) -> &str {
        "scripted"
    }
    fn model(&self) -> &str {
        "scripted-model"
    }
    async fn complete(&self, _request: &CompletionRequest) -> Result<String> {
        let mut replies = self.replies.lock().unwrap();
        if replies.is_empty() {
            return Err(Error::llm("script exhausted"));
        }
        replies.remove(0)
    }
}

const GOOD_JSON: &str = r#"{
    "project_summary": "Small trading core with three modules.",
    "findings": [{
        "file_path": "orders.py",
        "line_start": 5,
        "line_end": 7,
        "severity": "Warning",
        "category": "Logic",
        "message": "place() does not validate the order",
        "suggestion": "call RiskEngine.check before accepting",
        "finding_type": "missing_validation"
    }]
}"#;

struct Harness {
    queue: Arc<InMemoryJobQueue>,
    requests: Arc<InMemoryRequestStore>,
    findings: Arc<InMemoryFindingStore>,
    graph: Arc<MemoryGraphStore>,
    registry: Arc<LanguageRegistry>,
}

impl Harness {
    fn new() -> Self {
        let registry = Arc::new(LanguageRegistry::new());
        registry.register(sourcelens_lang_python::create_parser());
        for parser in sourcelens_lang_js::create_parsers() {
            registry.register(parser);
        }
        Self {
            queue: Arc::new(InMemoryJobQueue::default()),
            requests: Arc::new(InMemoryRequestStore::new()),
            findings: Arc::new(InMemoryFindingStore::new()),
            graph: Arc::new(MemoryGraphStore::new()),
            registry,
        }
    }

    fn worker(&self, replies: Vec<Result<String>>) -> AnalysisWorker {
        let provider = ScriptedProvider::new(replies);
        AnalysisWorker::new(
            Arc::clone(&self.queue) as Arc<dyn JobQueue>,
            Arc::clone(&self.requests) as Arc<dyn sourcelens_worker::RequestStore>,
            Arc::clone(&self.findings) as Arc<dyn sourcelens_worker::FindingStore>,
            Arc::clone(&self.graph) as Arc<dyn GraphStore>,
            Arc::clone(&self.registry),
            LlmSettings::default(),
            WorkerConfig::default(),
        )
        .with_provider_factory(Box::new(move |_| {
            Ok(Arc::clone(&provider) as Arc<dyn LlmProvider>)
        }))
    }

    fn job(&self, job_id: &str, repo: &std::path::Path) -> AnalysisJob {
        AnalysisJob {
            job_id: job_id.to_string(),
            kind: JobKind::FullScan,
            project_id: "trading-core".to_string(),
            repo_ref: RepoRef {
                url: repo.to_string_lossy().into_owned(),
                branch: Some("main".into()),
                commit: None,
                pr: None,
            },
            requested_at: Utc::now(),
            output_language: "en".into(),
            llm_config: LlmConfig {
                provider: ProviderKind::Local,
                model: "scripted-model".into(),
                temperature: None,
                api_key: None,
                base_url: Some("http://localhost:8000".into()),
            },
            project_notes: String::new(),
        }
    }

    async fn run_job(&self, worker: &AnalysisWorker, job: AnalysisJob) -> RequestStatus {
        let job_id = job.job_id.clone();
        self.queue.enqueue(job).await.unwrap();
        let processed = worker.run_once(&CancelToken::new()).await.unwrap();
        assert!(processed, "a job should have been processed");
        self.requests
            .get(&job_id)
            .await
            .unwrap()
            .expect("request record exists")
            .status
    }
}

#[tokio::test]
async fn test_full_scan_happy_path() {
    if !git_available() {
        return;
    }
    let repo = seed_repo();
    let harness = Harness::new();
    let worker = harness.worker(vec![Ok(GOOD_JSON.to_string())]);

    let status = harness
        .run_job(&worker, harness.job("job-1", repo.path()))
        .await;
    assert_eq!(status, RequestStatus::Completed);

    let project = "trading-core";
    assert!(harness
        .graph
        .get_node(NodeKind::Project, &CompositeId::project(project))
        .await
        .unwrap()
        .is_some());
    assert_eq!(harness.graph.count_nodes(project, NodeKind::File).await.unwrap(), 3);
    assert_eq!(harness.graph.count_nodes(project, NodeKind::Class).await.unwrap(), 3);
    assert_eq!(
        harness.graph.count_nodes(project, NodeKind::Function).await.unwrap(),
        9
    );

    let overview = GraphQuery::new(Arc::clone(&harness.graph) as Arc<dyn GraphStore>)
        .project_overview(project)
        .await
        .unwrap();
    assert_eq!(overview.total_files, 3);
    assert_eq!(overview.total_classes, 3);
    assert_eq!(overview.total_functions_methods, 9);

    let findings = harness.findings.for_request("job-1").await.unwrap();
    assert_eq!(findings.len(), 1);
    assert_eq!(findings[0].severity, Severity::Warning);
    assert!(findings[0].raw_llm_content.is_none());

    let request = harness.requests.get("job-1").await.unwrap().unwrap();
    assert_eq!(request.project_graph_id.as_deref(), Some(project));
    assert!(request.started_at.unwrap() <= request.completed_at.unwrap());
}

#[tokio::test]
async fn test_incremental_update_one_file_changed() {
    if !git_available() {
        return;
    }
    let repo = seed_repo();
    let harness = Harness::new();

    let worker = harness.worker(vec![Ok(GOOD_JSON.to_string())]);
    harness
        .run_job(&worker, harness.job("job-1", repo.path()))
        .await;
    let hashes_before = harness.graph.file_hashes("trading-core").await.unwrap();

    // Change file #2: rename a method
    std::fs::write(
        repo.path().join("pricing.py"),
        "class PriceFeed:\n    def __init__(self, source):\n        self.source = source\n\n    def quote_v2(self, symbol):\n        value = 0\n        return value\n\n    def refresh(self, symbol):\n        return symbol\n",
    )
    .unwrap();
    commit_all(repo.path(), "rename quote");

    let worker = harness.worker(vec![Ok(GOOD_JSON.to_string())]);
    let status = harness
        .run_job(&worker, harness.job("job-2", repo.path()))
        .await;
    assert_eq!(status, RequestStatus::Completed);

    let hashes_after = harness.graph.file_hashes("trading-core").await.unwrap();
    assert_eq!(hashes_before["orders.py"], hashes_after["orders.py"]);
    assert_eq!(hashes_before["risk.py"], hashes_after["risk.py"]);
    assert_ne!(hashes_before["pricing.py"], hashes_after["pricing.py"]);

    let functions = harness
        .graph
        .nodes("trading-core", NodeKind::Function, 100, 0)
        .await
        .unwrap();
    let names: Vec<&str> = functions.iter().filter_map(|f| f.str_prop("name")).collect();
    assert!(names.contains(&"quote_v2"), "new symbol present");
    assert!(!names.contains(&"quote"), "replaced symbol gone");
    assert_eq!(functions.len(), 9, "same shape after rebuild");
}

#[tokio::test]
async fn test_incremental_update_file_deleted() {
    if !git_available() {
        return;
    }
    let repo = seed_repo();
    let harness = Harness::new();

    let worker = harness.worker(vec![Ok(GOOD_JSON.to_string())]);
    harness
        .run_job(&worker, harness.job("job-1", repo.path()))
        .await;

    std::fs::remove_file(repo.path().join("risk.py")).unwrap();
    commit_all(repo.path(), "drop risk engine");

    let worker = harness.worker(vec![Ok(GOOD_JSON.to_string())]);
    let status = harness
        .run_job(&worker, harness.job("job-2", repo.path()))
        .await;
    assert_eq!(status, RequestStatus::Completed);

    assert!(harness
        .graph
        .get_node(NodeKind::File, &CompositeId::file("trading-core", "risk.py"))
        .await
        .unwrap()
        .is_none());
    assert_eq!(
        harness.graph.count_nodes("trading-core", NodeKind::File).await.unwrap(),
        2
    );
    let classes = harness
        .graph
        .nodes("trading-core", NodeKind::Class, 100, 0)
        .await
        .unwrap();
    assert!(
        classes.iter().all(|c| c.str_prop("name") != Some("RiskEngine")),
        "deleted file's symbols must be gone"
    );
}

#[tokio::test]
async fn test_llm_parse_failure_with_repair_success() {
    if !git_available() {
        return;
    }
    let repo = seed_repo();
    let harness = Harness::new();
    let worker = harness.worker(vec![
        Ok("Here's the analysis wrapped in prose, but broken: {]".to_string()),
        Ok(GOOD_JSON.to_string()),
    ]);

    let status = harness
        .run_job(&worker, harness.job("job-1", repo.path()))
        .await;
    assert_eq!(status, RequestStatus::Completed);

    let findings = harness.findings.for_request("job-1").await.unwrap();
    assert_eq!(findings.len(), 1);
    assert!(
        findings.iter().all(|f| f.raw_llm_content.is_none()),
        "repair succeeded, no raw fallback row"
    );
    assert_eq!(findings[0].file_path, "orders.py");
}

#[tokio::test]
async fn test_llm_total_failure_persists_raw_content() {
    if !git_available() {
        return;
    }
    let repo = seed_repo();
    let harness = Harness::new();
    let prose = "The project looks reasonable overall, though risk checks are thin.";
    let worker = harness.worker(vec![
        Ok(prose.to_string()),
        Ok("Still not JSON, sorry.".to_string()),
    ]);

    let status = harness
        .run_job(&worker, harness.job("job-1", repo.path()))
        .await;
    assert_eq!(status, RequestStatus::Completed, "fallback is not a failure");

    let findings = harness.findings.for_request("job-1").await.unwrap();
    assert_eq!(findings.len(), 1);
    let fallback = &findings[0];
    assert_eq!(fallback.file_path, RAW_ANALYSIS_PATH);
    assert_eq!(fallback.severity, Severity::Info);
    assert_eq!(fallback.raw_llm_content.as_deref(), Some(prose));
}

#[tokio::test]
async fn test_empty_repository_completes_with_synthetic_summary() {
    if !git_available() {
        return;
    }
    let dir = tempfile::tempdir().unwrap();
    git(dir.path(), &["init", "--initial-branch=main"]);
    std::fs::write(dir.path().join("README.md"), "# nothing to parse\n").unwrap();
    git(dir.path(), &["add", "."]);
    git(dir.path(), &["commit", "-m", "docs only"]);

    let harness = Harness::new();
    // No replies scripted: the meaningful-data check must skip the LLM
    let worker = harness.worker(vec![]);
    let status = harness.run_job(&worker, harness.job("job-1", dir.path())).await;
    assert_eq!(status, RequestStatus::Completed);

    let findings = harness.findings.for_request("job-1").await.unwrap();
    assert_eq!(findings.len(), 1);
    assert_eq!(findings[0].file_path, RAW_ANALYSIS_PATH);
    assert!(findings[0]
        .raw_llm_content
        .as_deref()
        .unwrap()
        .contains("no analyzable source"));
}

#[tokio::test]
async fn test_cancellation_marks_job_canceled() {
    if !git_available() {
        return;
    }
    let repo = seed_repo();
    let harness = Harness::new();
    let worker = harness.worker(vec![Ok(GOOD_JSON.to_string())]);

    harness
        .queue
        .enqueue(harness.job("job-1", repo.path()))
        .await
        .unwrap();
    let cancel = CancelToken::new();
    cancel.cancel();
    let processed = worker.run_once(&cancel).await.unwrap();
    assert!(processed);

    let request = harness.requests.get("job-1").await.unwrap().unwrap();
    assert_eq!(request.status, RequestStatus::Failed);
    assert_eq!(request.error_message.as_deref(), Some("canceled"));
}

#[tokio::test]
async fn test_duplicate_delivery_is_suppressed() {
    if !git_available() {
        return;
    }
    let repo = seed_repo();
    let harness = Harness::new();
    let worker = harness.worker(vec![Ok(GOOD_JSON.to_string())]);
    harness
        .run_job(&worker, harness.job("job-1", repo.path()))
        .await;
    let findings_before = harness.findings.len();

    // Re-enqueue the same job id; the terminal record suppresses re-execution
    let worker = harness.worker(vec![Ok(GOOD_JSON.to_string())]);
    harness
        .queue
        .enqueue(harness.job("job-1", repo.path()))
        .await
        .unwrap();
    let processed = worker.run_once(&CancelToken::new()).await.unwrap();
    assert!(processed);
    assert_eq!(
        harness.findings.len(),
        findings_before,
        "duplicate job must not produce new findings"
    );
}
