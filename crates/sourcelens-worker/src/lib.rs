//! Queue-driven analysis worker for sourcelens
//!
//! Consumes [`sourcelens_core::model::AnalysisJob`] envelopes from a durable
//! per-project FIFO queue and drives the full pipeline: repository fetch,
//! graph build or incremental update, context assembly, LLM invocation, and
//! structured-finding persistence with a raw-content fallback.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod config;
#[cfg(feature = "kafka")]
pub mod kafka;
pub mod queue;
pub mod store;
pub mod worker;

pub use config::WorkerConfig;
#[cfg(feature = "kafka")]
pub use kafka::{KafkaJobQueue, KafkaQueueConfig};
pub use queue::{Delivery, InMemoryJobQueue, JobQueue};
pub use store::{FindingStore, InMemoryFindingStore, InMemoryRequestStore, RequestStore};
pub use worker::{AnalysisWorker, ProviderFactory};
