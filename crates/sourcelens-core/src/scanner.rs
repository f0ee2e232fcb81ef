//! Source tree discovery
//!
//! Walks a working directory and selects the files the parser registry can
//! handle, applying directory exclusions. Size enforcement happens in the
//! parser engine so oversize files still get a File node with an annotation.

use crate::error::Result;
use crate::model::Language;
use crate::parser::LanguageRegistry;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use walkdir::WalkDir;

/// A file selected for parsing
#[derive(Debug, Clone)]
pub struct DiscoveredFile {
    /// Absolute path on disk
    pub abs_path: PathBuf,
    /// Repository-relative path, forward slashes
    pub rel_path: String,
    /// Detected language
    pub language: Language,
    /// File size in bytes
    pub size: u64,
}

/// Result of a tree walk
#[derive(Debug, Default)]
pub struct ScanOutcome {
    /// Files selected for parsing, sorted by relative path
    pub files: Vec<DiscoveredFile>,
    /// Files skipped for lacking a registered parser
    pub skipped_unsupported: usize,
}

/// Walks a source tree and filters to parseable files
pub struct SourceScanner {
    registry: Arc<LanguageRegistry>,
    exclude_dirs: HashSet<String>,
}

impl SourceScanner {
    /// Create a scanner with the default directory exclusions
    pub fn new(registry: Arc<LanguageRegistry>) -> Self {
        let exclude_dirs = [
            ".git",
            "node_modules",
            "target",
            "build",
            "dist",
            "__pycache__",
            ".venv",
            "venv",
            ".idea",
            ".vscode",
        ]
        .iter()
        .map(|s| s.to_string())
        .collect();

        Self {
            registry,
            exclude_dirs,
        }
    }

    /// Add extra directory names to exclude
    pub fn with_exclude_dirs(mut self, dirs: Vec<String>) -> Self {
        self.exclude_dirs.extend(dirs);
        self
    }

    /// Walk `root` and collect parseable files
    pub fn scan(&self, root: &Path) -> Result<ScanOutcome> {
        let mut outcome = ScanOutcome::default();

        let walker = WalkDir::new(root).follow_links(false).into_iter();
        for entry in walker.filter_entry(|e| {
            !e.file_type().is_dir()
                || e.file_name()
                    .to_str()
                    .map(|name| !self.exclude_dirs.contains(name))
                    .unwrap_or(true)
        }) {
            let entry = match entry {
                Ok(entry) => entry,
                Err(err) => {
                    tracing::warn!(error = %err, "skipping unreadable entry");
                    continue;
                }
            };
            if !entry.file_type().is_file() {
                continue;
            }

            let ext = entry
                .path()
                .extension()
                .and_then(|s| s.to_str())
                .unwrap_or_default();
            if !self.registry.supports_extension(ext) {
                outcome.skipped_unsupported += 1;
                continue;
            }

            let rel_path = entry
                .path()
                .strip_prefix(root)
                .unwrap_or(entry.path())
                .to_string_lossy()
                .replace('\\', "/");
            let size = entry.metadata().map(|m| m.len()).unwrap_or(0);

            outcome.files.push(DiscoveredFile {
                abs_path: entry.path().to_path_buf(),
                rel_path,
                language: Language::from_extension(ext),
                size,
            });
        }

        outcome.files.sort_by(|a, b| a.rel_path.cmp(&b.rel_path));
        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ParsedFile;
    use crate::parser::{LanguageParser, ParseContext};
    use std::fs;

    struct NoopPython;

    impl LanguageParser for NoopPython {
        fn language(&self) -> Language {
            Language::Python
        }
        fn supported_extensions(&self) -> &'static [&'static str] {
            &["py"]
        }
        fn parse(&self, context: &ParseContext) -> Result<ParsedFile> {
            Ok(ParsedFile::empty(
                context.path.clone(),
                Language::Python,
                String::new(),
                context.content.len(),
            ))
        }
    }

    fn scanner() -> SourceScanner {
        let registry = Arc::new(LanguageRegistry::new());
        registry.register(Arc::new(NoopPython));
        SourceScanner::new(registry)
    }

    #[test]
    fn test_scan_selects_supported_files() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir_all(dir.path().join("pkg")).unwrap();
        fs::write(dir.path().join("pkg/a.py"), "x = 1\n").unwrap();
        fs::write(dir.path().join("b.py"), "y = 2\n").unwrap();
        fs::write(dir.path().join("README.md"), "# hi\n").unwrap();

        let outcome = scanner().scan(dir.path()).unwrap();
        let paths: Vec<_> = outcome.files.iter().map(|f| f.rel_path.as_str()).collect();
        assert_eq!(paths, vec!["b.py", "pkg/a.py"]);
        assert_eq!(outcome.skipped_unsupported, 1);
    }

    #[test]
    fn test_scan_honors_exclusions() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir_all(dir.path().join(".git")).unwrap();
        fs::create_dir_all(dir.path().join("__pycache__")).unwrap();
        fs::write(dir.path().join(".git/hook.py"), "").unwrap();
        fs::write(dir.path().join("__pycache__/a.py"), "").unwrap();
        fs::write(dir.path().join("keep.py"), "z = 3\n").unwrap();

        let outcome = scanner().scan(dir.path()).unwrap();
        let paths: Vec<_> = outcome.files.iter().map(|f| f.rel_path.as_str()).collect();
        assert_eq!(paths, vec!["keep.py"]);
    }

    #[test]
    fn test_scan_empty_tree() {
        let dir = tempfile::tempdir().unwrap();
        let outcome = scanner().scan(dir.path()).unwrap();
        assert!(outcome.files.is_empty());
    }
}
