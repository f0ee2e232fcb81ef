//! LLM invocation layer for sourcelens
//!
//! Context assembly (the variable set the prompt templates require), the
//! provider-agnostic client with strict output validation and a repair pass,
//! and the raw-content fallback that guarantees no model output is dropped.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod client;
pub mod context;
pub mod provider;
pub mod schema;
pub mod template;

pub use client::{LlmAnalysisResult, LlmClient, LLM_UNREACHABLE};
pub use context::{ContextBuilder, ContextInput, ContextOutcome, FilePreview, PrContext};
pub use provider::{build_provider, CompletionRequest, LlmProvider, LlmSettings};
pub use schema::{AnalysisOutput, StructuredFinding, FORMAT_INSTRUCTIONS};
pub use template::{AnalysisKind, PromptTemplate, PromptVariables};
