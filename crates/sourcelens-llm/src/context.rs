//! Prompt context assembly
//!
//! Synthesizes the exact variable set the prompt templates require from the
//! graph overview and job metadata. Includes the meaningful-data check: when
//! the graph has nothing to say, no LLM call is made at all and a synthetic
//! summary is returned instead, so the model never invents content.

use crate::schema::FORMAT_INSTRUCTIONS;
use crate::template::PromptVariables;
use sourcelens_core::query::ProjectOverview;
use std::path::Path;

/// Default number of important-file previews
pub const DEFAULT_PREVIEW_FILES: usize = 5;
/// Default preview length in bytes
pub const DEFAULT_PREVIEW_BYTES: usize = 2048;

/// A file plus the head of its content
#[derive(Debug, Clone)]
pub struct FilePreview {
    /// Repository-relative path
    pub path: String,
    /// First bytes of the content, lossily decoded
    pub head: String,
}

/// PR-specific context for `pr_scan` jobs
#[derive(Debug, Clone)]
pub struct PrContext {
    /// PR title
    pub title: String,
    /// PR body
    pub description: String,
    /// PR author
    pub author: String,
    /// Head branch
    pub head_branch: String,
    /// Base branch
    pub base_branch: String,
    /// Unified diff
    pub diff: String,
    /// Changed files with content previews
    pub changed_files: Vec<FilePreview>,
}

/// Everything the builder needs to assemble a prompt context
#[derive(Debug, Clone)]
pub struct ContextInput {
    /// Project display name
    pub project_name: String,
    /// Primary language label
    pub project_language: String,
    /// Branch under analysis
    pub main_branch: String,
    /// Maintainer notes passed through verbatim
    pub project_notes: String,
    /// Language the report should be written in
    pub output_language: String,
    /// Graph overview (the LLM's single source of truth)
    pub overview: ProjectOverview,
    /// Top-level directory entries of the working tree
    pub directory_listing: Vec<String>,
    /// Important-file previews
    pub important_files: Vec<FilePreview>,
    /// PR context for `pr_scan` jobs
    pub pr: Option<PrContext>,
}

/// Outcome of context assembly
#[derive(Debug)]
pub enum ContextOutcome {
    /// The graph holds nothing analyzable; skip the LLM entirely
    Skip {
        /// Synthetic summary explaining the skip
        project_summary: String,
    },
    /// Variables ready for template rendering
    Ready(Box<PromptVariables>),
}

/// Assembles prompt variables from graph state and job metadata
#[derive(Debug, Clone)]
pub struct ContextBuilder {
    max_preview_files: usize,
    preview_bytes: usize,
}

impl Default for ContextBuilder {
    fn default() -> Self {
        Self {
            max_preview_files: DEFAULT_PREVIEW_FILES,
            preview_bytes: DEFAULT_PREVIEW_BYTES,
        }
    }
}

impl ContextBuilder {
    /// Create a builder with the default preview limits
    pub fn new() -> Self {
        Self::default()
    }

    /// Override preview limits
    pub fn with_limits(max_preview_files: usize, preview_bytes: usize) -> Self {
        Self {
            max_preview_files,
            preview_bytes,
        }
    }

    /// List top-level entries and read previews of the first source files.
    /// `paths` are the repository-relative files the scan selected, in order.
    pub fn gather_tree_context(
        &self,
        working_dir: &Path,
        paths: &[String],
    ) -> (Vec<String>, Vec<FilePreview>) {
        let mut listing: Vec<String> = std::fs::read_dir(working_dir)
            .map(|entries| {
                entries
                    .filter_map(|e| e.ok())
                    .map(|e| {
                        let name = e.file_name().to_string_lossy().into_owned();
                        if e.file_type().map(|t| t.is_dir()).unwrap_or(false) {
                            format!("{name}/")
                        } else {
                            name
                        }
                    })
                    .collect()
            })
            .unwrap_or_default();
        listing.sort();

        let mut previews = Vec::new();
        for path in paths.iter().take(self.max_preview_files) {
            let Ok(bytes) = std::fs::read(working_dir.join(path)) else {
                continue;
            };
            let head_len = bytes.len().min(self.preview_bytes);
            previews.push(FilePreview {
                path: path.clone(),
                head: String::from_utf8_lossy(&bytes[..head_len]).into_owned(),
            });
        }
        (listing, previews)
    }

    /// Build the variable set, or decide to skip the LLM call entirely
    pub fn build(&self, input: &ContextInput) -> ContextOutcome {
        if input.overview.is_empty() {
            return ContextOutcome::Skip {
                project_summary: format!(
                    "Project '{}' contains no analyzable source: {} files were \
                     indexed and the knowledge graph holds no modules, classes, \
                     or call relationships to analyze.",
                    input.project_name, input.overview.total_files
                ),
            };
        }

        let overview = &input.overview;
        let ckg_summary = serde_json::to_string_pretty(overview)
            .unwrap_or_else(|_| "{}".to_string());

        let mut vars = PromptVariables::new();
        vars.insert("project_name".into(), input.project_name.clone());
        vars.insert("project_language".into(), input.project_language.clone());
        vars.insert("main_branch".into(), input.main_branch.clone());
        vars.insert("project_custom_notes".into(), input.project_notes.clone());
        vars.insert("output_language".into(), input.output_language.clone());
        vars.insert("ckg_summary".into(), ckg_summary);
        vars.insert("total_files".into(), overview.total_files.to_string());
        vars.insert("total_classes".into(), overview.total_classes.to_string());
        vars.insert(
            "total_functions_methods".into(),
            overview.total_functions_methods.to_string(),
        );
        vars.insert(
            "average_functions_per_file".into(),
            format!("{:.2}", overview.average_functions_per_file),
        );
        vars.insert(
            "directory_listing_top_level".into(),
            input.directory_listing.join("\n"),
        );
        vars.insert(
            "important_files_preview".into(),
            format_previews(&input.important_files),
        );
        vars.insert("format_instructions".into(), FORMAT_INSTRUCTIONS.to_string());

        if let Some(pr) = &input.pr {
            vars.insert("pr_title".into(), pr.title.clone());
            vars.insert("pr_description".into(), pr.description.clone());
            vars.insert("pr_author".into(), pr.author.clone());
            vars.insert("head_branch".into(), pr.head_branch.clone());
            vars.insert("base_branch".into(), pr.base_branch.clone());
            vars.insert("pr_diff_content".into(), pr.diff.clone());
            vars.insert(
                "formatted_changed_files_with_content".into(),
                format_previews(&pr.changed_files),
            );
        }

        ContextOutcome::Ready(Box::new(vars))
    }
}

fn format_previews(previews: &[FilePreview]) -> String {
    if previews.is_empty() {
        return "(none)".to_string();
    }
    previews
        .iter()
        .map(|p| format!("--- {} ---\n{}", p.path, p.head))
        .collect::<Vec<_>>()
        .join("\n\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use sourcelens_core::query::{ClassMethodCount, FunctionCallCount};

    fn overview(files: usize, modules: Vec<&str>) -> ProjectOverview {
        ProjectOverview {
            total_files: files,
            total_classes: 2,
            total_functions_methods: 6,
            average_functions_per_file: 3.0,
            main_modules: modules.into_iter().map(String::from).collect(),
            top_5_largest_classes_by_methods: vec![ClassMethodCount {
                name: "Widget".into(),
                file_path: "w.py".into(),
                method_count: 4,
            }],
            top_5_most_called_functions: vec![FunctionCallCount {
                name: "run".into(),
                file_path: "w.py".into(),
                call_count: 3,
            }],
        }
    }

    fn input(overview: ProjectOverview) -> ContextInput {
        ContextInput {
            project_name: "demo".into(),
            project_language: "Python".into(),
            main_branch: "main".into(),
            project_notes: "internal service".into(),
            output_language: "en".into(),
            overview,
            directory_listing: vec!["src/".into(), "README.md".into()],
            important_files: vec![FilePreview {
                path: "src/w.py".into(),
                head: "class Widget: ...".into(),
            }],
            pr: None,
        }
    }

    #[test]
    fn test_ready_context_has_all_full_scan_variables() {
        let outcome = ContextBuilder::new().build(&input(overview(3, vec!["w"])));
        let ContextOutcome::Ready(vars) = outcome else {
            panic!("expected ready context");
        };
        for key in [
            "project_name",
            "project_language",
            "main_branch",
            "project_custom_notes",
            "output_language",
            "ckg_summary",
            "total_files",
            "total_classes",
            "total_functions_methods",
            "average_functions_per_file",
            "directory_listing_top_level",
            "important_files_preview",
            "format_instructions",
        ] {
            assert!(vars.contains_key(key), "missing variable {key}");
        }
        assert_eq!(vars["total_files"], "3");
        assert!(vars["ckg_summary"].contains("Widget"));
        assert!(vars["important_files_preview"].contains("src/w.py"));
    }

    #[test]
    fn test_empty_graph_skips_llm() {
        let outcome = ContextBuilder::new().build(&input(overview(0, vec![])));
        let ContextOutcome::Skip { project_summary } = outcome else {
            panic!("expected skip for empty graph");
        };
        assert!(project_summary.contains("no analyzable source"));
    }

    #[test]
    fn test_files_without_graph_content_also_skip() {
        // Files exist but every ranking list is empty
        let mut ov = overview(4, vec![]);
        ov.top_5_largest_classes_by_methods.clear();
        ov.top_5_most_called_functions.clear();
        let outcome = ContextBuilder::new().build(&input(ov));
        assert!(matches!(outcome, ContextOutcome::Skip { .. }));
    }

    #[test]
    fn test_pr_context_adds_variables() {
        let mut ctx = input(overview(3, vec!["w"]));
        ctx.pr = Some(PrContext {
            title: "Fix cart".into(),
            description: "rounding bug".into(),
            author: "dev".into(),
            head_branch: "fix/cart".into(),
            base_branch: "main".into(),
            diff: "--- a/cart.py".into(),
            changed_files: vec![FilePreview {
                path: "cart.py".into(),
                head: "def total(): ...".into(),
            }],
        });
        let ContextOutcome::Ready(vars) = ContextBuilder::new().build(&ctx) else {
            panic!("expected ready context");
        };
        assert_eq!(vars["pr_title"], "Fix cart");
        assert!(vars["formatted_changed_files_with_content"].contains("cart.py"));
    }

    #[test]
    fn test_gather_tree_context() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("src")).unwrap();
        std::fs::write(dir.path().join("src/a.py"), "x = 1\n".repeat(100)).unwrap();
        std::fs::write(dir.path().join("README.md"), "# hi\n").unwrap();

        let builder = ContextBuilder::with_limits(5, 32);
        let (listing, previews) =
            builder.gather_tree_context(dir.path(), &["src/a.py".to_string()]);
        assert!(listing.contains(&"src/".to_string()));
        assert!(listing.contains(&"README.md".to_string()));
        assert_eq!(previews.len(), 1);
        assert!(previews[0].head.len() <= 32);
    }
}
