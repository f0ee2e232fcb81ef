//! Prompt templates with `{placeholder}` substitution
//!
//! Templates are text files embedded at compile time. Rendering replaces
//! every `{name}` whose variable is present; unknown placeholders are left
//! intact and logged so a template/context mismatch is visible in traces.

use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::BTreeMap;
use tracing::warn;

/// Variables handed to a template render; ordered for determinism
pub type PromptVariables = BTreeMap<String, String>;

/// Which analysis prompt to use
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AnalysisKind {
    /// Deep logic review of a pull request
    PrDeepLogic,
    /// Whole-project architectural analysis
    FullArchitecture,
    /// Security-focused pass
    Security,
    /// Performance-focused pass
    Performance,
    /// Resource-lifecycle pass
    Lifecycle,
    /// General code review pass
    CodeReview,
}

/// A named prompt template
#[derive(Debug, Clone, Copy)]
pub struct PromptTemplate {
    /// Template name used in logs
    pub name: &'static str,
    text: &'static str,
}

static PLACEHOLDER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\{([a-z][a-z0-9_]*)\}").expect("placeholder pattern"));

impl PromptTemplate {
    /// Look up the template for an analysis kind
    pub fn for_kind(kind: AnalysisKind) -> Self {
        match kind {
            AnalysisKind::PrDeepLogic => Self {
                name: "pr_deep_logic",
                text: include_str!("../templates/pr_deep_logic.txt"),
            },
            AnalysisKind::FullArchitecture => Self {
                name: "full_architecture",
                text: include_str!("../templates/full_architecture.txt"),
            },
            AnalysisKind::Security => Self {
                name: "security",
                text: include_str!("../templates/security.txt"),
            },
            AnalysisKind::Performance => Self {
                name: "performance",
                text: include_str!("../templates/performance.txt"),
            },
            AnalysisKind::Lifecycle => Self {
                name: "lifecycle",
                text: include_str!("../templates/lifecycle.txt"),
            },
            AnalysisKind::CodeReview => Self {
                name: "code_review",
                text: include_str!("../templates/code_review.txt"),
            },
        }
    }

    /// Placeholder names appearing in the template
    pub fn placeholders(&self) -> Vec<&str> {
        PLACEHOLDER
            .captures_iter(self.text)
            .map(|c| c.get(1).expect("capture group").as_str())
            .collect()
    }

    /// Substitute variables into the template
    pub fn render(&self, variables: &PromptVariables) -> String {
        PLACEHOLDER
            .replace_all(self.text, |caps: &regex::Captures<'_>| {
                let key = &caps[1];
                match variables.get(key) {
                    Some(value) => value.clone(),
                    None => {
                        warn!(template = self.name, placeholder = key, "unfilled placeholder");
                        caps[0].to_string()
                    }
                }
            })
            .into_owned()
    }
}
