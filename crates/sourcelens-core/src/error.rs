//! Error handling for the sourcelens engine

use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Result type alias for sourcelens operations
pub type Result<T> = std::result::Result<T, Error>;

/// Classification of repository fetch failures
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FetchErrorKind {
    /// Remote could not be reached (DNS, connection refused, network down)
    UnreachableRepo,
    /// Authentication or authorization was rejected by the remote
    AuthFailed,
    /// The requested branch, commit, or PR ref does not exist
    RefNotFound,
    /// No space left on the scratch volume
    DiskFull,
    /// Anything git reported that does not fit the above
    Other,
}

impl FetchErrorKind {
    /// Classify a git stderr blob into a fetch error kind
    pub fn classify(stderr: &str) -> Self {
        let lower = stderr.to_lowercase();
        if lower.contains("could not resolve host")
            || lower.contains("connection refused")
            || lower.contains("connection timed out")
            || lower.contains("network is unreachable")
        {
            Self::UnreachableRepo
        } else if lower.contains("authentication failed")
            || lower.contains("permission denied")
            || lower.contains("could not read username")
        {
            Self::AuthFailed
        } else if lower.contains("couldn't find remote ref")
            || lower.contains("not found in upstream")
            || lower.contains("unknown revision")
            || lower.contains("pathspec")
        {
            Self::RefNotFound
        } else if lower.contains("no space left on device") {
            Self::DiskFull
        } else {
            Self::Other
        }
    }
}

/// The main error type for the sourcelens engine
#[derive(Debug, Error)]
pub enum Error {
    /// Input/output related errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Repository fetch failures
    #[error("fetch failed ({kind:?}): {message}")]
    Fetch {
        /// Failure classification from git output
        kind: FetchErrorKind,
        /// Underlying message
        message: String,
    },

    /// Source parsing failures
    #[error("parse error in {file}: {message}")]
    Parse {
        /// File that failed to parse
        file: PathBuf,
        /// Error message
        message: String,
    },

    /// Graph store failures (connection, transaction, contract violations)
    #[error("graph error: {message}")]
    Graph {
        /// Error message
        message: String,
    },

    /// LLM invocation failures after retries are exhausted
    #[error("llm error: {message}")]
    Llm {
        /// Error message
        message: String,
    },

    /// Job queue failures
    #[error("queue error: {message}")]
    Queue {
        /// Error message
        message: String,
    },

    /// Input validation failures
    #[error("validation error in '{field}': {message}")]
    Validation {
        /// Field that failed validation
        field: String,
        /// Error message
        message: String,
    },

    /// An operation exceeded its deadline
    #[error("timeout in '{operation}' after {timeout:?}")]
    Timeout {
        /// Operation that timed out
        operation: String,
        /// Deadline that was exceeded
        timeout: Duration,
    },

    /// An operation was cancelled via its token
    #[error("operation '{operation}' was canceled")]
    Cancelled {
        /// Operation that was cancelled
        operation: String,
    },
}

impl Error {
    /// Create a fetch error from git output
    pub fn fetch(kind: FetchErrorKind, message: impl Into<String>) -> Self {
        Self::Fetch {
            kind,
            message: message.into(),
        }
    }

    /// Create a parse error
    pub fn parse(file: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        Self::Parse {
            file: file.into(),
            message: message.into(),
        }
    }

    /// Create a graph store error
    pub fn graph(message: impl Into<String>) -> Self {
        Self::Graph {
            message: message.into(),
        }
    }

    /// Create an LLM error
    pub fn llm(message: impl Into<String>) -> Self {
        Self::Llm {
            message: message.into(),
        }
    }

    /// Create a queue error
    pub fn queue(message: impl Into<String>) -> Self {
        Self::Queue {
            message: message.into(),
        }
    }

    /// Create a validation error
    pub fn validation(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Validation {
            field: field.into(),
            message: message.into(),
        }
    }

    /// Create a timeout error
    pub fn timeout(operation: impl Into<String>, timeout: Duration) -> Self {
        Self::Timeout {
            operation: operation.into(),
            timeout,
        }
    }

    /// Create a cancelled error
    pub fn cancelled(operation: impl Into<String>) -> Self {
        Self::Cancelled {
            operation: operation.into(),
        }
    }

    /// Whether retrying the failed operation can reasonably succeed.
    ///
    /// Transient I/O (network, store timeouts, LLM 5xx) is retryable;
    /// invalid input, contract violations, and cancellation are not.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Io(_) | Self::Graph { .. } | Self::Llm { .. } | Self::Queue { .. } => true,
            Self::Timeout { .. } => true,
            Self::Fetch { kind, .. } => !matches!(kind, FetchErrorKind::AuthFailed),
            Self::Json(_)
            | Self::Parse { .. }
            | Self::Validation { .. }
            | Self::Cancelled { .. } => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fetch_classification() {
        assert_eq!(
            FetchErrorKind::classify("fatal: could not resolve host: github.com"),
            FetchErrorKind::UnreachableRepo
        );
        assert_eq!(
            FetchErrorKind::classify("fatal: Authentication failed for 'https://...'"),
            FetchErrorKind::AuthFailed
        );
        assert_eq!(
            FetchErrorKind::classify("fatal: couldn't find remote ref refs/heads/nope"),
            FetchErrorKind::RefNotFound
        );
        assert_eq!(
            FetchErrorKind::classify("error: no space left on device"),
            FetchErrorKind::DiskFull
        );
        assert_eq!(
            FetchErrorKind::classify("something else entirely"),
            FetchErrorKind::Other
        );
    }

    #[test]
    fn test_retryability() {
        assert!(Error::graph("bolt connection reset").is_retryable());
        assert!(Error::llm("upstream 503").is_retryable());
        assert!(Error::fetch(FetchErrorKind::UnreachableRepo, "down").is_retryable());
        assert!(!Error::fetch(FetchErrorKind::AuthFailed, "denied").is_retryable());
        assert!(!Error::validation("language", "unsupported").is_retryable());
        assert!(!Error::cancelled("parse").is_retryable());
    }

    #[test]
    fn test_display() {
        let err = Error::parse("a.py", "unexpected indent");
        assert!(err.to_string().contains("a.py"));
        let err = Error::timeout("llm_call", Duration::from_secs(300));
        assert!(err.to_string().contains("llm_call"));
    }
}
