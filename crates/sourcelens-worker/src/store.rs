//! Request and finding persistence contracts
//!
//! The relational tables live outside this core; these traits are the
//! contract the worker writes through, with in-memory implementations for
//! tests and single-process runs.

use async_trait::async_trait;
use sourcelens_core::error::Result;
use sourcelens_core::model::{AnalysisRequest, Finding};
use std::collections::HashMap;
use std::sync::Mutex;

/// Analysis-request record persistence
#[async_trait]
pub trait RequestStore: Send + Sync {
    /// Insert or replace a request record keyed by job id
    async fn upsert(&self, request: &AnalysisRequest) -> Result<()>;

    /// Load a request record by job id
    async fn get(&self, job_id: &str) -> Result<Option<AnalysisRequest>>;
}

/// Finding persistence; rows are append-only
#[async_trait]
pub trait FindingStore: Send + Sync {
    /// Append finding rows
    async fn append(&self, findings: &[Finding]) -> Result<()>;

    /// All findings of a request, in insertion order
    async fn for_request(&self, request_id: &str) -> Result<Vec<Finding>>;
}

/// In-memory [`RequestStore`]
#[derive(Debug, Default)]
pub struct InMemoryRequestStore {
    requests: Mutex<HashMap<String, AnalysisRequest>>,
}

impl InMemoryRequestStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl RequestStore for InMemoryRequestStore {
    async fn upsert(&self, request: &AnalysisRequest) -> Result<()> {
        let mut requests = self.requests.lock().unwrap();
        requests.insert(request.job_id.clone(), request.clone());
        Ok(())
    }

    async fn get(&self, job_id: &str) -> Result<Option<AnalysisRequest>> {
        let requests = self.requests.lock().unwrap();
        Ok(requests.get(job_id).cloned())
    }
}

/// In-memory [`FindingStore`]
#[derive(Debug, Default)]
pub struct InMemoryFindingStore {
    findings: Mutex<Vec<Finding>>,
}

impl InMemoryFindingStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Total rows across all requests (test helper)
    pub fn len(&self) -> usize {
        self.findings.lock().unwrap().len()
    }

    /// Whether the store holds no rows
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl FindingStore for InMemoryFindingStore {
    async fn append(&self, findings: &[Finding]) -> Result<()> {
        let mut rows = self.findings.lock().unwrap();
        rows.extend_from_slice(findings);
        Ok(())
    }

    async fn for_request(&self, request_id: &str) -> Result<Vec<Finding>> {
        let rows = self.findings.lock().unwrap();
        Ok(rows
            .iter()
            .filter(|f| f.request_id == request_id)
            .cloned()
            .collect())
    }
}
