//! Job queue interface
//!
//! Durable FIFO-per-project delivery with at-least-once semantics and a
//! visibility timeout: a dead worker's unacknowledged jobs return to their
//! partition. A partition with an outstanding delivery is skipped by
//! `dequeue`, which both preserves per-project ordering and guarantees at
//! most one active job per project.

use async_trait::async_trait;
use sourcelens_core::error::{Error, Result};
use sourcelens_core::model::AnalysisJob;
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::Mutex;
use std::time::{Duration, Instant};
use tracing::warn;

/// Default lease on an unacknowledged delivery
pub const DEFAULT_VISIBILITY_TIMEOUT: Duration = Duration::from_secs(600);

/// A leased job; must be acked or nacked
#[derive(Debug, Clone)]
pub struct Delivery {
    /// The job payload
    pub job: AnalysisJob,
    /// Backend-specific receipt used by ack/nack
    pub receipt: String,
}

/// Queue contract for analysis jobs
#[async_trait]
pub trait JobQueue: Send + Sync {
    /// Append a job to its project partition
    async fn enqueue(&self, job: AnalysisJob) -> Result<()>;

    /// Lease the next deliverable job, if any
    async fn dequeue(&self) -> Result<Option<Delivery>>;

    /// Acknowledge successful processing
    async fn ack(&self, delivery: &Delivery) -> Result<()>;

    /// Return a delivery to the front of its partition
    async fn nack(&self, delivery: &Delivery) -> Result<()>;
}

#[derive(Debug)]
struct InFlight {
    partition: String,
    job: AnalysisJob,
    deadline: Instant,
}

#[derive(Debug, Default)]
struct QueueInner {
    partitions: BTreeMap<String, VecDeque<AnalysisJob>>,
    in_flight: HashMap<u64, InFlight>,
    next_receipt: u64,
}

/// In-memory [`JobQueue`] with per-project partitions
#[derive(Debug)]
pub struct InMemoryJobQueue {
    inner: Mutex<QueueInner>,
    visibility_timeout: Duration,
}

impl Default for InMemoryJobQueue {
    fn default() -> Self {
        Self::new(DEFAULT_VISIBILITY_TIMEOUT)
    }
}

impl InMemoryJobQueue {
    /// Create a queue with the given visibility timeout
    pub fn new(visibility_timeout: Duration) -> Self {
        Self {
            inner: Mutex::new(QueueInner::default()),
            visibility_timeout,
        }
    }

    /// Jobs waiting across all partitions (test helper)
    pub fn pending_len(&self) -> usize {
        let inner = self.inner.lock().unwrap();
        inner.partitions.values().map(VecDeque::len).sum()
    }

    /// Return expired leases to the front of their partitions
    fn reap_expired(inner: &mut QueueInner) {
        let now = Instant::now();
        let expired: Vec<u64> = inner
            .in_flight
            .iter()
            .filter(|(_, f)| f.deadline <= now)
            .map(|(id, _)| *id)
            .collect();
        for id in expired {
            if let Some(flight) = inner.in_flight.remove(&id) {
                warn!(
                    job_id = %flight.job.job_id,
                    project_id = %flight.partition,
                    "delivery lease expired, redelivering"
                );
                inner
                    .partitions
                    .entry(flight.partition)
                    .or_default()
                    .push_front(flight.job);
            }
        }
    }
}

#[async_trait]
impl JobQueue for InMemoryJobQueue {
    async fn enqueue(&self, job: AnalysisJob) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        inner
            .partitions
            .entry(job.project_id.clone())
            .or_default()
            .push_back(job);
        Ok(())
    }

    async fn dequeue(&self) -> Result<Option<Delivery>> {
        let mut inner = self.inner.lock().unwrap();
        Self::reap_expired(&mut inner);

        let busy: Vec<String> = inner
            .in_flight
            .values()
            .map(|f| f.partition.clone())
            .collect();
        let candidate = inner
            .partitions
            .iter_mut()
            .find(|(partition, jobs)| !jobs.is_empty() && !busy.contains(partition))
            .map(|(partition, jobs)| (partition.clone(), jobs.pop_front().expect("non-empty")));

        let Some((partition, job)) = candidate else {
            return Ok(None);
        };
        inner.next_receipt += 1;
        let receipt = inner.next_receipt;
        inner.in_flight.insert(
            receipt,
            InFlight {
                partition,
                job: job.clone(),
                deadline: Instant::now() + self.visibility_timeout,
            },
        );
        Ok(Some(Delivery {
            job,
            receipt: receipt.to_string(),
        }))
    }

    async fn ack(&self, delivery: &Delivery) -> Result<()> {
        let receipt: u64 = delivery
            .receipt
            .parse()
            .map_err(|_| Error::queue(format!("bad receipt: {}", delivery.receipt)))?;
        let mut inner = self.inner.lock().unwrap();
        inner.in_flight.remove(&receipt);
        Ok(())
    }

    async fn nack(&self, delivery: &Delivery) -> Result<()> {
        let receipt: u64 = delivery
            .receipt
            .parse()
            .map_err(|_| Error::queue(format!("bad receipt: {}", delivery.receipt)))?;
        let mut inner = self.inner.lock().unwrap();
        if let Some(flight) = inner.in_flight.remove(&receipt) {
            inner
                .partitions
                .entry(flight.partition)
                .or_default()
                .push_front(flight.job);
        }
        Ok(())
    }
}
