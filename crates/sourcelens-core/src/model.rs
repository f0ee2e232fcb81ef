//! Graph and pipeline data model
//!
//! Defines the typed property-graph vocabulary (node and edge kinds, composite
//! identifiers) together with the records that flow through the analysis
//! pipeline: parsed files, analysis jobs, request rows, and findings.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::fmt;

/// Deterministic node identifier, stable across re-parses.
///
/// Built as `{project_id}:{file_path}[:{symbol_name}[:{start_line}]]` so the
/// same symbol always maps to the same graph node and upserts are idempotent.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CompositeId(String);

impl CompositeId {
    /// Identifier for a project node
    pub fn project(project_id: &str) -> Self {
        Self(project_id.to_string())
    }

    /// Identifier for a file node
    pub fn file(project_id: &str, path: &str) -> Self {
        Self(format!("{project_id}:{path}"))
    }

    /// Identifier for a named symbol without line disambiguation
    /// (modules, decorators, exception types)
    pub fn symbol(project_id: &str, path: &str, name: &str) -> Self {
        Self(format!("{project_id}:{path}:{name}"))
    }

    /// Identifier for a named symbol at a specific start line
    /// (classes, functions, variables)
    pub fn symbol_at(project_id: &str, path: &str, name: &str, start_line: usize) -> Self {
        Self(format!("{project_id}:{path}:{name}:{start_line}"))
    }

    /// The raw identifier string
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Whether this identifier belongs to the given file of the given project
    pub fn is_under_file(&self, project_id: &str, path: &str) -> bool {
        let file_prefix = format!("{project_id}:{path}:");
        self.0.starts_with(&file_prefix) || self.0 == format!("{project_id}:{path}")
    }
}

impl fmt::Display for CompositeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for CompositeId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// Programming language of a source file
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    /// Python
    Python,
    /// JavaScript
    JavaScript,
    /// TypeScript
    TypeScript,
    /// Unrecognized language
    Unknown,
}

impl Language {
    /// Detect language from a file extension
    pub fn from_extension(ext: &str) -> Self {
        match ext.to_lowercase().as_str() {
            "py" | "pyw" => Language::Python,
            "js" | "mjs" | "cjs" | "jsx" => Language::JavaScript,
            "ts" | "tsx" => Language::TypeScript,
            _ => Language::Unknown,
        }
    }
}

impl fmt::Display for Language {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Language::Python => write!(f, "Python"),
            Language::JavaScript => write!(f, "JavaScript"),
            Language::TypeScript => write!(f, "TypeScript"),
            Language::Unknown => write!(f, "Unknown"),
        }
    }
}

/// Kinds of nodes in the code knowledge graph
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeKind {
    /// The analyzed project
    Project,
    /// A source file
    File,
    /// A logical namespace
    Module,
    /// A class definition (or a placeholder for an unresolved base)
    Class,
    /// A function or method definition
    Function,
    /// A parameter, local, global, or attribute
    Variable,
    /// A decorator applied to a function or class
    Decorator,
    /// An exception type raised or handled
    ExceptionType,
}

impl fmt::Display for NodeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            NodeKind::Project => "Project",
            NodeKind::File => "File",
            NodeKind::Module => "Module",
            NodeKind::Class => "Class",
            NodeKind::Function => "Function",
            NodeKind::Variable => "Variable",
            NodeKind::Decorator => "Decorator",
            NodeKind::ExceptionType => "ExceptionType",
        };
        write!(f, "{s}")
    }
}

/// Kinds of directed edges in the code knowledge graph
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EdgeKind {
    /// Any node → its owning Project
    BelongsTo,
    /// Class/Function → the File that defines it
    DefinedIn,
    /// Function → parameter Variable
    HasParameter,
    /// Function → local Variable
    DeclaresVariable,
    /// Class → attribute Variable
    DeclaresAttribute,
    /// Function → Function
    Calls,
    /// Class → base Class
    InheritsFrom,
    /// Function → Variable read
    UsesVariable,
    /// Function → Variable write
    ModifiesVariable,
    /// Function → instantiated Class
    CreatesObject,
    /// Function → raised ExceptionType
    RaisesException,
    /// Function → handled ExceptionType
    HandlesException,
    /// Function/Class → Decorator
    DecoratedBy,
}

impl fmt::Display for EdgeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            EdgeKind::BelongsTo => "BELONGS_TO",
            EdgeKind::DefinedIn => "DEFINED_IN",
            EdgeKind::HasParameter => "HAS_PARAMETER",
            EdgeKind::DeclaresVariable => "DECLARES_VARIABLE",
            EdgeKind::DeclaresAttribute => "DECLARES_ATTRIBUTE",
            EdgeKind::Calls => "CALLS",
            EdgeKind::InheritsFrom => "INHERITS_FROM",
            EdgeKind::UsesVariable => "USES_VARIABLE",
            EdgeKind::ModifiesVariable => "MODIFIES_VARIABLE",
            EdgeKind::CreatesObject => "CREATES_OBJECT",
            EdgeKind::RaisesException => "RAISES_EXCEPTION",
            EdgeKind::HandlesException => "HANDLES_EXCEPTION",
            EdgeKind::DecoratedBy => "DECORATED_BY",
        };
        write!(f, "{s}")
    }
}

/// Scope classification for variable nodes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScopeType {
    /// Function or method parameter
    Parameter,
    /// Variable declared inside a function body
    LocalVariable,
    /// Module-level variable
    GlobalVariable,
    /// Class attribute
    ClassAttribute,
}

impl fmt::Display for ScopeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ScopeType::Parameter => "parameter",
            ScopeType::LocalVariable => "local_variable",
            ScopeType::GlobalVariable => "global_variable",
            ScopeType::ClassAttribute => "class_attribute",
        };
        write!(f, "{s}")
    }
}

/// A node at the store boundary: kind, composite id, and a property map
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeRecord {
    /// Node kind
    pub kind: NodeKind,
    /// Composite identifier, globally unique per graph
    pub id: CompositeId,
    /// Property map (shallow-merged on upsert; arrays replaced)
    pub properties: Map<String, Value>,
}

impl NodeRecord {
    /// Create a node record
    pub fn new(kind: NodeKind, id: CompositeId, properties: Map<String, Value>) -> Self {
        Self {
            kind,
            id,
            properties,
        }
    }

    /// Read a string property
    pub fn str_prop(&self, key: &str) -> Option<&str> {
        self.properties.get(key).and_then(Value::as_str)
    }

    /// Read an integer property
    pub fn int_prop(&self, key: &str) -> Option<i64> {
        self.properties.get(key).and_then(Value::as_i64)
    }

    /// Read a boolean property
    pub fn bool_prop(&self, key: &str) -> Option<bool> {
        self.properties.get(key).and_then(Value::as_bool)
    }
}

/// An edge at the store boundary
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EdgeRecord {
    /// Edge kind
    pub kind: EdgeKind,
    /// Source node id
    pub src: CompositeId,
    /// Target node id
    pub dst: CompositeId,
    /// Edge properties (call_site_line, usage_line, ...)
    pub properties: Map<String, Value>,
}

impl EdgeRecord {
    /// Create an edge with no properties
    pub fn new(kind: EdgeKind, src: CompositeId, dst: CompositeId) -> Self {
        Self {
            kind,
            src,
            dst,
            properties: Map::new(),
        }
    }

    /// Create an edge with properties
    pub fn with_properties(
        kind: EdgeKind,
        src: CompositeId,
        dst: CompositeId,
        properties: Map<String, Value>,
    ) -> Self {
        Self {
            kind,
            src,
            dst,
            properties,
        }
    }
}

/// Project node properties
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProjectNode {
    /// Stable graph identifier for the project
    pub graph_id: String,
    /// Human-readable project name
    pub name: String,
    /// Primary language
    pub language: String,
    /// Creation timestamp
    pub created_at: DateTime<Utc>,
    /// Last update timestamp
    pub updated_at: DateTime<Utc>,
}

impl ProjectNode {
    /// Composite id of this project node
    pub fn composite_id(&self) -> CompositeId {
        CompositeId::project(&self.graph_id)
    }

    /// Convert to a store record
    pub fn to_record(&self) -> NodeRecord {
        let mut props = Map::new();
        props.insert("graph_id".into(), json!(self.graph_id));
        props.insert("name".into(), json!(self.name));
        props.insert("language".into(), json!(self.language));
        props.insert("created_at".into(), json!(self.created_at.to_rfc3339()));
        props.insert("updated_at".into(), json!(self.updated_at.to_rfc3339()));
        NodeRecord::new(NodeKind::Project, self.composite_id(), props)
    }
}

/// File node properties
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileNode {
    /// Owning project graph id
    pub project_id: String,
    /// Repository-relative path, forward slashes
    pub path: String,
    /// Detected language
    pub language: Language,
    /// Size of the canonical bytes
    pub size_bytes: usize,
    /// blake3 hex digest over the canonical bytes
    pub content_hash: String,
    /// Non-fatal annotations ("oversize", syntax errors)
    pub errors: Vec<String>,
    /// Last update timestamp
    pub updated_at: DateTime<Utc>,
}

impl FileNode {
    /// Composite id of this file node
    pub fn composite_id(&self) -> CompositeId {
        CompositeId::file(&self.project_id, &self.path)
    }

    /// Convert to a store record
    pub fn to_record(&self) -> NodeRecord {
        let mut props = Map::new();
        props.insert("project_id".into(), json!(self.project_id));
        props.insert("path".into(), json!(self.path));
        props.insert("language".into(), json!(self.language.to_string()));
        props.insert("size_bytes".into(), json!(self.size_bytes));
        props.insert("content_hash".into(), json!(self.content_hash));
        props.insert("errors".into(), json!(self.errors));
        props.insert("updated_at".into(), json!(self.updated_at.to_rfc3339()));
        NodeRecord::new(NodeKind::File, self.composite_id(), props)
    }
}

/// Class node properties
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClassNode {
    /// Owning project graph id
    pub project_id: String,
    /// Class name
    pub name: String,
    /// Defining file path
    pub file_path: String,
    /// First line of the definition
    pub start_line: usize,
    /// Last line of the definition
    pub end_line: usize,
    /// True when created only to satisfy an edge to an unresolved symbol
    pub placeholder: bool,
}

impl ClassNode {
    /// Composite id of this class node
    pub fn composite_id(&self) -> CompositeId {
        CompositeId::symbol_at(&self.project_id, &self.file_path, &self.name, self.start_line)
    }

    /// Convert to a store record
    pub fn to_record(&self) -> NodeRecord {
        let mut props = Map::new();
        props.insert("project_id".into(), json!(self.project_id));
        props.insert("name".into(), json!(self.name));
        props.insert("file_path".into(), json!(self.file_path));
        props.insert("start_line".into(), json!(self.start_line));
        props.insert("end_line".into(), json!(self.end_line));
        props.insert("placeholder".into(), json!(self.placeholder));
        NodeRecord::new(NodeKind::Class, self.composite_id(), props)
    }
}

/// Function or method node properties
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FunctionNode {
    /// Owning project graph id
    pub project_id: String,
    /// Function name
    pub name: String,
    /// Rendered signature, e.g. `def f(a, b=1)`
    pub signature: String,
    /// Comma-joined parameter list
    pub parameters_str: String,
    /// Defining file path
    pub file_path: String,
    /// First line of the definition
    pub start_line: usize,
    /// Last line of the definition
    pub end_line: usize,
    /// Whether this is a method on a class
    pub is_method: bool,
    /// Enclosing class name when `is_method`
    pub class_name: Option<String>,
}

impl FunctionNode {
    /// Composite id of this function node
    pub fn composite_id(&self) -> CompositeId {
        CompositeId::symbol_at(&self.project_id, &self.file_path, &self.name, self.start_line)
    }

    /// Convert to a store record
    pub fn to_record(&self) -> NodeRecord {
        let mut props = Map::new();
        props.insert("project_id".into(), json!(self.project_id));
        props.insert("name".into(), json!(self.name));
        props.insert("signature".into(), json!(self.signature));
        props.insert("parameters_str".into(), json!(self.parameters_str));
        props.insert("file_path".into(), json!(self.file_path));
        props.insert("start_line".into(), json!(self.start_line));
        props.insert("end_line".into(), json!(self.end_line));
        props.insert("is_method".into(), json!(self.is_method));
        if let Some(class_name) = &self.class_name {
            props.insert("class_name".into(), json!(class_name));
        }
        NodeRecord::new(NodeKind::Function, self.composite_id(), props)
    }
}

/// Variable node properties
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VariableNode {
    /// Owning project graph id
    pub project_id: String,
    /// Variable name, qualified by its owner (`owner.name`)
    pub qualified_name: String,
    /// Bare variable name
    pub name: String,
    /// Defining file path
    pub file_path: String,
    /// Declaration line
    pub line: usize,
    /// Scope classification
    pub scope: ScopeType,
}

impl VariableNode {
    /// Composite id of this variable node
    pub fn composite_id(&self) -> CompositeId {
        CompositeId::symbol_at(
            &self.project_id,
            &self.file_path,
            &self.qualified_name,
            self.line,
        )
    }

    /// Convert to a store record
    pub fn to_record(&self) -> NodeRecord {
        let mut props = Map::new();
        props.insert("project_id".into(), json!(self.project_id));
        props.insert("name".into(), json!(self.name));
        props.insert("qualified_name".into(), json!(self.qualified_name));
        props.insert("file_path".into(), json!(self.file_path));
        props.insert("line".into(), json!(self.line));
        props.insert("scope_type".into(), json!(self.scope.to_string()));
        NodeRecord::new(NodeKind::Variable, self.composite_id(), props)
    }
}

/// Dotted module name derived from a file path
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ModuleName(String);

impl ModuleName {
    /// Derive a dotted module name from a repository-relative path.
    ///
    /// `pkg/sub/mod.py` → `pkg.sub.mod`; `pkg/__init__.py` → `pkg`.
    pub fn from_path(path: &str) -> Self {
        let stem = path.rsplit_once('.').map(|(s, _)| s).unwrap_or(path);
        let dotted = stem.replace('/', ".");
        let dotted = dotted
            .strip_suffix(".__init__")
            .map(str::to_string)
            .unwrap_or(dotted);
        Self(dotted)
    }

    /// The dotted name
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Named auxiliary node (Decorator or ExceptionType) scoped to a file
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NamedNode {
    /// Node kind (Decorator or ExceptionType)
    pub kind: NodeKind,
    /// Owning project graph id
    pub project_id: String,
    /// Symbol name
    pub name: String,
    /// File where the symbol is referenced
    pub file_path: String,
}

impl NamedNode {
    /// Composite id of this node
    pub fn composite_id(&self) -> CompositeId {
        CompositeId::symbol(&self.project_id, &self.file_path, &self.name)
    }

    /// Convert to a store record
    pub fn to_record(&self) -> NodeRecord {
        let mut props = Map::new();
        props.insert("project_id".into(), json!(self.project_id));
        props.insert("name".into(), json!(self.name));
        props.insert("file_path".into(), json!(self.file_path));
        NodeRecord::new(self.kind, self.composite_id(), props)
    }
}

// ---------------------------------------------------------------------------
// Parser output
// ---------------------------------------------------------------------------

/// A variable extracted from source
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VariableEntity {
    /// Variable name
    pub name: String,
    /// Declaration line (1-indexed)
    pub line: usize,
    /// Scope classification at the declaration site
    pub scope: ScopeType,
}

/// A function or method extracted from source
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FunctionEntity {
    /// Function name
    pub name: String,
    /// Rendered signature
    pub signature: String,
    /// Comma-joined parameter list
    pub parameters_str: String,
    /// Parameters in declaration order
    pub parameters: Vec<VariableEntity>,
    /// Local variables declared in the body
    pub locals: Vec<VariableEntity>,
    /// First line of the definition
    pub start_line: usize,
    /// Last line of the definition
    pub end_line: usize,
    /// Enclosing class name for methods
    pub class_name: Option<String>,
    /// Whether this is a method
    pub is_method: bool,
    /// Decorator names applied to the function
    pub decorators: Vec<String>,
}

/// A class extracted from source
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClassEntity {
    /// Class name
    pub name: String,
    /// First line of the definition
    pub start_line: usize,
    /// Last line of the definition
    pub end_line: usize,
    /// Base class names, unresolved
    pub bases: Vec<String>,
    /// Decorator names applied to the class
    pub decorators: Vec<String>,
    /// Class attributes
    pub attributes: Vec<VariableEntity>,
}

/// Kind of an unresolved reference emitted by a parser
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RefKind {
    /// Function call
    Call,
    /// Class inheritance
    Inherits,
    /// Variable read
    UsesVariable,
    /// Variable write, with the kind of mutation
    ModifiesVariable {
        /// e.g. "assignment", "augmented"
        modification_type: String,
    },
    /// Object instantiation
    CreatesObject,
    /// Exception raised
    Raises,
    /// Exception handled
    Handles,
    /// Decorator application
    DecoratedBy,
}

/// Hint about the expected kind of a reference target
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TargetHint {
    /// Expected to resolve to a Function
    Function,
    /// Expected to resolve to a Class
    Class,
    /// Expected to resolve to a Variable
    Variable,
    /// No expectation
    Any,
}

/// The source symbol of an unresolved reference, identified within its file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SymbolKey {
    /// Symbol name
    pub name: String,
    /// Symbol start line
    pub start_line: usize,
}

/// An unresolved edge contribution from a single file.
///
/// Cross-file resolution is deferred: parsers reference targets by name and
/// the builder resolves them against the per-project symbol index.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SymbolRef {
    /// Reference kind
    pub kind: RefKind,
    /// Source symbol within the parsed file
    pub src: SymbolKey,
    /// Unresolved target name
    pub target_name: String,
    /// Line of the reference site
    pub line: usize,
    /// Expected target kind
    pub hint: TargetHint,
}

/// Everything a language parser extracts from one file
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParsedFile {
    /// Repository-relative path, forward slashes
    pub path: String,
    /// Detected language
    pub language: Language,
    /// blake3 hex digest over the canonical bytes
    pub content_hash: String,
    /// Size of the canonical bytes
    pub size_bytes: usize,
    /// Extracted classes
    pub classes: Vec<ClassEntity>,
    /// Extracted functions and methods
    pub functions: Vec<FunctionEntity>,
    /// Module-level variables
    pub globals: Vec<VariableEntity>,
    /// Unresolved edge contributions
    pub refs: Vec<SymbolRef>,
    /// Recoverable parse errors ("oversize", syntax error descriptions)
    pub errors: Vec<String>,
}

impl ParsedFile {
    /// A file record with no recognizable entities
    pub fn empty(path: String, language: Language, content_hash: String, size_bytes: usize) -> Self {
        Self {
            path,
            language,
            content_hash,
            size_bytes,
            classes: Vec::new(),
            functions: Vec::new(),
            globals: Vec::new(),
            refs: Vec::new(),
            errors: Vec::new(),
        }
    }

    /// Total extracted entities (classes + functions + variables)
    pub fn entity_count(&self) -> usize {
        let vars: usize = self
            .functions
            .iter()
            .map(|f| f.parameters.len() + f.locals.len())
            .sum::<usize>()
            + self.classes.iter().map(|c| c.attributes.len()).sum::<usize>()
            + self.globals.len();
        self.classes.len() + self.functions.len() + vars
    }
}

/// Compute the canonical content hash over file bytes
pub fn content_hash(bytes: &[u8]) -> String {
    blake3::hash(bytes).to_hex().to_string()
}

// ---------------------------------------------------------------------------
// Jobs, requests, findings
// ---------------------------------------------------------------------------

/// What kind of analysis a job requests
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobKind {
    /// Analyze a pull request's changed files
    PrScan,
    /// Analyze a whole branch
    FullScan,
}

/// Pull-request metadata carried by `pr_scan` jobs
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PrMeta {
    /// PR number
    pub number: u64,
    /// PR title
    pub title: String,
    /// PR body
    pub description: String,
    /// PR author login
    pub author: String,
    /// Base branch name
    pub base_branch: String,
    /// Head branch name
    pub head_branch: String,
    /// Base commit sha
    pub base_sha: String,
    /// Head commit sha
    pub head_sha: String,
}

/// Where to fetch the source from
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RepoRef {
    /// Remote URL
    pub url: String,
    /// Branch for full scans
    pub branch: Option<String>,
    /// Pinned commit, if any
    pub commit: Option<String>,
    /// PR metadata for `pr_scan` jobs
    pub pr: Option<PrMeta>,
}

/// Which LLM backend to call
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderKind {
    /// Self-hosted model server with an OpenAI-compatible endpoint
    Local,
    /// Hosted OpenAI chat completions
    OpenAi,
    /// Hosted Anthropic messages
    Anthropic,
}

/// Per-job LLM configuration; overrides never mutate process-wide defaults
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    /// Provider selection
    pub provider: ProviderKind,
    /// Model name
    pub model: String,
    /// Sampling temperature (default 0.1 when absent)
    pub temperature: Option<f32>,
    /// Per-project API key override
    pub api_key: Option<String>,
    /// Base URL for the local provider
    pub base_url: Option<String>,
}

/// Queue payload for a single analysis
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisJob {
    /// Unique job id (duplicate-suppression key)
    pub job_id: String,
    /// Scan kind
    pub kind: JobKind,
    /// Project the analysis belongs to
    pub project_id: String,
    /// Source location
    pub repo_ref: RepoRef,
    /// Enqueue timestamp
    pub requested_at: DateTime<Utc>,
    /// Language the report should be written in
    pub output_language: String,
    /// LLM backend configuration
    pub llm_config: LlmConfig,
    /// Free-form notes passed to the prompt
    pub project_notes: String,
}

/// Lifecycle states of an analysis request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestStatus {
    /// Enqueued, not yet picked up
    Pending,
    /// Picked up by a worker
    Processing,
    /// Repository fetched to a scratch dir
    SourceFetched,
    /// Graph build or update in progress
    CkgBuilding,
    /// LLM analysis in progress
    Analyzing,
    /// Finished with findings persisted
    Completed,
    /// Finished with an error
    Failed,
}

impl RequestStatus {
    /// Terminal states are never left once entered
    pub fn is_terminal(&self) -> bool {
        matches!(self, RequestStatus::Completed | RequestStatus::Failed)
    }
}

impl fmt::Display for RequestStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RequestStatus::Pending => "pending",
            RequestStatus::Processing => "processing",
            RequestStatus::SourceFetched => "source_fetched",
            RequestStatus::CkgBuilding => "ckg_building",
            RequestStatus::Analyzing => "analyzing",
            RequestStatus::Completed => "completed",
            RequestStatus::Failed => "failed",
        };
        write!(f, "{s}")
    }
}

/// Persistent record mirroring an [`AnalysisJob`] plus lifecycle fields
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisRequest {
    /// Job id this record mirrors
    pub job_id: String,
    /// Scan kind
    pub kind: JobKind,
    /// Project the analysis belongs to
    pub project_id: String,
    /// Source location
    pub repo_ref: RepoRef,
    /// Enqueue timestamp
    pub requested_at: DateTime<Utc>,
    /// Report language
    pub output_language: String,
    /// LLM backend configuration
    pub llm_config: LlmConfig,
    /// Free-form prompt notes
    pub project_notes: String,
    /// Current lifecycle state
    pub status: RequestStatus,
    /// Graph snapshot the report was produced against
    pub project_graph_id: Option<String>,
    /// When processing began
    pub started_at: Option<DateTime<Utc>>,
    /// When a terminal state was reached
    pub completed_at: Option<DateTime<Utc>>,
    /// Failure reason for `failed` requests
    pub error_message: Option<String>,
}

impl AnalysisRequest {
    /// Create a fresh pending record from a job
    pub fn from_job(job: &AnalysisJob) -> Self {
        Self {
            job_id: job.job_id.clone(),
            kind: job.kind,
            project_id: job.project_id.clone(),
            repo_ref: job.repo_ref.clone(),
            requested_at: job.requested_at,
            output_language: job.output_language.clone(),
            llm_config: job.llm_config.clone(),
            project_notes: job.project_notes.clone(),
            status: RequestStatus::Pending,
            project_graph_id: None,
            started_at: None,
            completed_at: None,
            error_message: None,
        }
    }
}

/// Severity of a finding
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Severity {
    /// Definite defect
    Error,
    /// Probable problem
    Warning,
    /// Observation worth reading
    Note,
    /// Informational
    Info,
}

impl Severity {
    /// Case-insensitive parse; `None` for unknown values
    pub fn parse_lenient(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "error" => Some(Severity::Error),
            "warning" => Some(Severity::Warning),
            "note" => Some(Severity::Note),
            "info" => Some(Severity::Info),
            _ => None,
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Severity::Error => "Error",
            Severity::Warning => "Warning",
            Severity::Note => "Note",
            Severity::Info => "Info",
        };
        write!(f, "{s}")
    }
}

/// File path used by the single synthetic finding that carries raw LLM output
pub const RAW_ANALYSIS_PATH: &str = "Raw LLM Analysis";

/// A single persisted analysis observation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Finding {
    /// Request this finding belongs to
    pub request_id: String,
    /// File the finding points at, or [`RAW_ANALYSIS_PATH`] for fallback rows
    pub file_path: String,
    /// First affected line
    pub line_start: usize,
    /// Last affected line
    pub line_end: usize,
    /// Severity
    pub severity: Severity,
    /// Category label
    pub category: String,
    /// The observation
    pub message: String,
    /// Suggested remediation
    pub suggestion: String,
    /// Producer-defined type tag
    pub finding_type: String,
    /// Full raw model reply; present iff structured parsing fell back
    pub raw_llm_content: Option<String>,
}

impl Finding {
    /// The synthetic fallback row that preserves an unparseable model reply
    pub fn raw_fallback(request_id: &str, raw_content: String) -> Self {
        Self {
            request_id: request_id.to_string(),
            file_path: RAW_ANALYSIS_PATH.to_string(),
            line_start: 0,
            line_end: 0,
            severity: Severity::Info,
            category: "Raw Output".to_string(),
            message: "Structured parsing failed; full model reply preserved".to_string(),
            suggestion: String::new(),
            finding_type: "raw_fallback".to_string(),
            raw_llm_content: Some(raw_content),
        }
    }

    /// Whether this row is the raw-content fallback
    pub fn is_raw_fallback(&self) -> bool {
        self.raw_llm_content.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_composite_id_forms() {
        assert_eq!(CompositeId::project("p1").as_str(), "p1");
        assert_eq!(CompositeId::file("p1", "src/a.py").as_str(), "p1:src/a.py");
        assert_eq!(
            CompositeId::symbol_at("p1", "src/a.py", "Foo", 10).as_str(),
            "p1:src/a.py:Foo:10"
        );
    }

    #[test]
    fn test_composite_id_is_under_file() {
        let class_id = CompositeId::symbol_at("p1", "src/a.py", "Foo", 10);
        assert!(class_id.is_under_file("p1", "src/a.py"));
        assert!(!class_id.is_under_file("p1", "src/ab.py"));
        assert!(!class_id.is_under_file("p2", "src/a.py"));

        let file_id = CompositeId::file("p1", "src/a.py");
        assert!(file_id.is_under_file("p1", "src/a.py"));
    }

    #[test]
    fn test_composite_id_deterministic() {
        let a = CompositeId::symbol_at("p", "f.py", "g", 3);
        let b = CompositeId::symbol_at("p", "f.py", "g", 3);
        assert_eq!(a, b, "same inputs must map to the same id");
    }

    #[test]
    fn test_language_detection() {
        assert_eq!(Language::from_extension("py"), Language::Python);
        assert_eq!(Language::from_extension("TSX"), Language::TypeScript);
        assert_eq!(Language::from_extension("mjs"), Language::JavaScript);
        assert_eq!(Language::from_extension("rb"), Language::Unknown);
    }

    #[test]
    fn test_content_hash_changes_with_bytes() {
        let h1 = content_hash(b"def f(): pass\n");
        let h2 = content_hash(b"def f(): pass\n");
        let h3 = content_hash(b"def g(): pass\n");
        assert_eq!(h1, h2);
        assert_ne!(h1, h3);
    }

    #[test]
    fn test_node_record_roundtrip() {
        let class = ClassNode {
            project_id: "p1".into(),
            name: "Widget".into(),
            file_path: "src/w.py".into(),
            start_line: 4,
            end_line: 30,
            placeholder: false,
        };
        let record = class.to_record();
        assert_eq!(record.kind, NodeKind::Class);
        assert_eq!(record.str_prop("name"), Some("Widget"));
        assert_eq!(record.int_prop("start_line"), Some(4));
        assert_eq!(record.bool_prop("placeholder"), Some(false));
    }

    #[test]
    fn test_module_name_from_path() {
        assert_eq!(ModuleName::from_path("pkg/sub/mod.py").as_str(), "pkg.sub.mod");
        assert_eq!(ModuleName::from_path("pkg/__init__.py").as_str(), "pkg");
        assert_eq!(ModuleName::from_path("app.js").as_str(), "app");
    }

    #[test]
    fn test_status_terminality() {
        assert!(RequestStatus::Completed.is_terminal());
        assert!(RequestStatus::Failed.is_terminal());
        assert!(!RequestStatus::Analyzing.is_terminal());
        assert!(!RequestStatus::Pending.is_terminal());
    }

    #[test]
    fn test_severity_lenient_parse() {
        assert_eq!(Severity::parse_lenient("WARNING"), Some(Severity::Warning));
        assert_eq!(Severity::parse_lenient(" info "), Some(Severity::Info));
        assert_eq!(Severity::parse_lenient("critical"), None);
    }

    #[test]
    fn test_raw_fallback_invariant() {
        let finding = Finding::raw_fallback("req-1", "free-form prose".into());
        assert!(finding.is_raw_fallback());
        assert_eq!(finding.file_path, RAW_ANALYSIS_PATH);
        assert_eq!(finding.severity, Severity::Info);
        assert_eq!(finding.raw_llm_content.as_deref(), Some("free-form prose"));
    }

    #[test]
    fn test_job_envelope_roundtrip() {
        let job = AnalysisJob {
            job_id: "job-9".into(),
            kind: JobKind::FullScan,
            project_id: "p1".into(),
            repo_ref: RepoRef {
                url: "https://example.com/r.git".into(),
                branch: Some("main".into()),
                commit: None,
                pr: None,
            },
            requested_at: Utc::now(),
            output_language: "en".into(),
            llm_config: LlmConfig {
                provider: ProviderKind::Local,
                model: "qwen2.5-coder".into(),
                temperature: None,
                api_key: None,
                base_url: Some("http://localhost:8000".into()),
            },
            project_notes: String::new(),
        };
        let json = serde_json::to_string(&job).unwrap();
        let back: AnalysisJob = serde_json::from_str(&json).unwrap();
        assert_eq!(back.job_id, "job-9");
        assert_eq!(back.kind, JobKind::FullScan);
        assert_eq!(back.llm_config.provider, ProviderKind::Local);
    }
}
