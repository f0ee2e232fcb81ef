//! sourcelens - Code Knowledge Graph engine
//!
//! This crate provides the core of the analysis pipeline: multi-language
//! tree-sitter parsing into a uniform record, graph construction with
//! deterministic composite identifiers, incremental updates driven by content
//! hashes, and the read-side queries that feed LLM analysis context.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod builder;
pub mod cancel;
pub mod error;
pub mod model;
pub mod parser;
pub mod query;
pub mod repo;
pub mod resolver;
pub mod retry;
pub mod scanner;
pub mod store;
pub mod update;

pub use builder::{BuildReport, BuilderConfig, CkgBuilder, ProjectMeta};
pub use cancel::CancelToken;
pub use error::{Error, FetchErrorKind, Result};
pub use model::{
    AnalysisJob, AnalysisRequest, ClassEntity, CompositeId, EdgeKind, EdgeRecord, FileNode,
    Finding, FunctionEntity, JobKind, Language, LlmConfig, ModuleName, NodeKind, NodeRecord,
    ParsedFile, PrMeta, ProviderKind, RefKind, RepoRef, RequestStatus, ScopeType, Severity,
    SymbolKey, SymbolRef, TargetHint, VariableEntity, RAW_ANALYSIS_PATH,
};
pub use parser::{LanguageParser, LanguageRegistry, ParseContext, ParserEngine};
pub use query::{
    CallInfo, ClassMethodCount, FunctionCallCount, GraphQuery, ImpactReport, InheritanceInfo,
    ProjectOverview, SearchHit,
};
pub use repo::{FetchedSource, RepoFetcher, ScratchDir};
pub use resolver::{Resolver, SymbolIndex};
pub use retry::{retry, RetryConfig};
pub use scanner::{DiscoveredFile, ScanOutcome, SourceScanner};
pub use store::{GraphStore, MemoryGraphStore, WriteBatch};
pub use update::{IncrementalUpdater, UpdatePlan, UpdateStats, UpdaterConfig};

/// Re-export commonly used types
pub mod prelude {
    pub use crate::builder::{BuildReport, BuilderConfig, CkgBuilder, ProjectMeta};
    pub use crate::cancel::CancelToken;
    pub use crate::error::{Error, Result};
    pub use crate::model::{
        AnalysisJob, AnalysisRequest, CompositeId, EdgeKind, Finding, JobKind, Language,
        NodeKind, ParsedFile, RequestStatus, Severity,
    };
    pub use crate::parser::{LanguageParser, LanguageRegistry, ParseContext, ParserEngine};
    pub use crate::query::{GraphQuery, ProjectOverview};
    pub use crate::repo::{FetchedSource, RepoFetcher};
    pub use crate::scanner::SourceScanner;
    pub use crate::store::{GraphStore, MemoryGraphStore, WriteBatch};
    pub use crate::update::{IncrementalUpdater, UpdaterConfig};
}
