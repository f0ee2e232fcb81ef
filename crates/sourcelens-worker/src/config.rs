//! Worker configuration from the environment
//!
//! Read once at startup and immutable after; per-job overrides (LLM config)
//! arrive in the job envelope and never touch these values.

use std::time::Duration;

/// Process-wide worker settings
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// `MAX_ANALYSIS_WORKERS`: worker tasks per process
    pub max_workers: usize,
    /// `ANALYSIS_TIMEOUT`: deadline for one job, seconds
    pub analysis_timeout: Duration,
    /// `MAX_CONCURRENT_ANALYSES`: cap across all workers
    pub max_concurrent_analyses: usize,
    /// `CKG_BATCH_SIZE`: files per graph write batch
    pub batch_size: usize,
    /// `CKG_MAX_FILE_SIZE`: parse ceiling in bytes
    pub max_file_size: usize,
    /// Parse parallelism within a job
    pub parse_concurrency: usize,
    /// Idle poll interval when the queue is empty
    pub poll_interval: Duration,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            max_workers: 4,
            analysis_timeout: Duration::from_secs(300),
            max_concurrent_analyses: 8,
            batch_size: sourcelens_core::builder::DEFAULT_BATCH_SIZE,
            max_file_size: sourcelens_core::parser::DEFAULT_MAX_FILE_SIZE,
            parse_concurrency: num_cpus::get() * 2,
            poll_interval: Duration::from_millis(500),
        }
    }
}

impl WorkerConfig {
    /// Read settings from the environment, defaulting where unset
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            max_workers: env_parse("MAX_ANALYSIS_WORKERS", defaults.max_workers),
            analysis_timeout: Duration::from_secs(env_parse(
                "ANALYSIS_TIMEOUT",
                defaults.analysis_timeout.as_secs(),
            )),
            max_concurrent_analyses: env_parse(
                "MAX_CONCURRENT_ANALYSES",
                defaults.max_concurrent_analyses,
            ),
            batch_size: env_parse("CKG_BATCH_SIZE", defaults.batch_size),
            max_file_size: env_parse("CKG_MAX_FILE_SIZE", defaults.max_file_size),
            parse_concurrency: env_parse("PARSE_CONCURRENCY", defaults.parse_concurrency),
            poll_interval: defaults.poll_interval,
        }
    }
}

fn env_parse<T: std::str::FromStr + Copy>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}
