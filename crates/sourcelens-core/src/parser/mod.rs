//! Parser registry and extraction engine
//!
//! Language parsers are query-driven tree-sitter extractors that turn one
//! source file into a uniform [`ParsedFile`] record. The registry is open for
//! extension: any parser satisfying [`LanguageParser`] can be registered.

use crate::error::{Error, Result};
use crate::model::{content_hash, Language, ParsedFile};
use dashmap::DashMap;
use rayon::prelude::*;
use std::sync::Arc;

/// Default ceiling on parseable file size (1 MiB)
pub const DEFAULT_MAX_FILE_SIZE: usize = 1_048_576;

/// Input to a single parse
#[derive(Debug, Clone)]
pub struct ParseContext {
    /// Repository-relative path, forward slashes
    pub path: String,
    /// Decoded file content
    pub content: String,
}

impl ParseContext {
    /// Create a parse context
    pub fn new(path: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            content: content.into(),
        }
    }
}

/// Common contract for language parsers.
///
/// Syntax errors are recoverable: implementations return the partial entity
/// set with an `errors` annotation rather than failing. `Err` is reserved for
/// grammar-level failures.
pub trait LanguageParser: Send + Sync {
    /// The language this parser handles
    fn language(&self) -> Language;

    /// File extensions (lowercase, no dot) this parser accepts
    fn supported_extensions(&self) -> &'static [&'static str];

    /// Extract entities and unresolved edge contributions from one file
    fn parse(&self, context: &ParseContext) -> Result<ParsedFile>;
}

/// Registry mapping languages to parser instances
#[derive(Default)]
pub struct LanguageRegistry {
    parsers: DashMap<Language, Arc<dyn LanguageParser>>,
}

impl LanguageRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a parser; replaces any prior parser for the same language
    pub fn register(&self, parser: Arc<dyn LanguageParser>) {
        self.parsers.insert(parser.language(), parser);
    }

    /// Get a parser for a language
    pub fn get(&self, language: Language) -> Option<Arc<dyn LanguageParser>> {
        self.parsers.get(&language).map(|p| Arc::clone(&*p))
    }

    /// Get a parser for a file extension
    pub fn get_by_extension(&self, ext: &str) -> Option<Arc<dyn LanguageParser>> {
        self.get(Language::from_extension(ext))
    }

    /// Whether any registered parser accepts this extension
    pub fn supports_extension(&self, ext: &str) -> bool {
        self.get_by_extension(ext).is_some()
    }

    /// Languages with a registered parser
    pub fn languages(&self) -> Vec<Language> {
        self.parsers.iter().map(|entry| *entry.key()).collect()
    }
}

/// Extraction engine applying the size ceiling and hashing policy
pub struct ParserEngine {
    registry: Arc<LanguageRegistry>,
    max_file_size: usize,
    pool: Option<rayon::ThreadPool>,
}

impl ParserEngine {
    /// Create an engine with the default 1 MiB ceiling
    pub fn new(registry: Arc<LanguageRegistry>) -> Self {
        Self {
            registry,
            max_file_size: DEFAULT_MAX_FILE_SIZE,
            pool: None,
        }
    }

    /// Override the file size ceiling
    pub fn with_max_file_size(mut self, max_file_size: usize) -> Self {
        self.max_file_size = max_file_size;
        self
    }

    /// Bound batch-parse parallelism to `n` threads
    pub fn with_parse_concurrency(mut self, n: usize) -> Result<Self> {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(n.max(1))
            .build()
            .map_err(|e| Error::validation("parse_concurrency", e.to_string()))?;
        self.pool = Some(pool);
        Ok(self)
    }

    /// The configured file size ceiling
    pub fn max_file_size(&self) -> usize {
        self.max_file_size
    }

    /// Parse one file's bytes into a [`ParsedFile`].
    ///
    /// Oversize files and undecodable bytes yield a file record with an
    /// error annotation and no symbols; only a missing parser is an `Err`.
    pub fn parse_file(&self, path: &str, bytes: &[u8]) -> Result<ParsedFile> {
        let ext = path.rsplit('.').next().unwrap_or_default();
        let parser = self
            .registry
            .get_by_extension(ext)
            .ok_or_else(|| Error::validation("language", format!("no parser for .{ext}")))?;

        let hash = content_hash(bytes);
        let size = bytes.len();

        if size > self.max_file_size {
            let mut parsed =
                ParsedFile::empty(path.to_string(), parser.language(), hash, size);
            parsed.errors.push("oversize".to_string());
            return Ok(parsed);
        }

        let content = match std::str::from_utf8(bytes) {
            Ok(s) => s.to_string(),
            Err(_) => {
                let mut parsed =
                    ParsedFile::empty(path.to_string(), parser.language(), hash, size);
                parsed.errors.push("invalid_utf8".to_string());
                return Ok(parsed);
            }
        };

        let context = ParseContext::new(path, content);
        let mut parsed = parser.parse(&context)?;
        parsed.content_hash = hash;
        parsed.size_bytes = size;
        Ok(parsed)
    }

    /// Parse many files in parallel, preserving input order.
    ///
    /// Per-file failures are returned in place so one bad file never aborts
    /// the batch.
    pub fn parse_batch(&self, files: &[(String, Vec<u8>)]) -> Vec<Result<ParsedFile>> {
        let run = || {
            files
                .par_iter()
                .map(|(path, bytes)| self.parse_file(path, bytes))
                .collect()
        };
        match &self.pool {
            Some(pool) => pool.install(run),
            None => run(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{ClassEntity, FunctionEntity};

    struct StubParser {
        language: Language,
        extensions: &'static [&'static str],
    }

    impl LanguageParser for StubParser {
        fn language(&self) -> Language {
            self.language
        }

        fn supported_extensions(&self) -> &'static [&'static str] {
            self.extensions
        }

        fn parse(&self, context: &ParseContext) -> Result<ParsedFile> {
            let mut parsed = ParsedFile::empty(
                context.path.clone(),
                self.language,
                String::new(),
                context.content.len(),
            );
            if context.content.contains("class") {
                parsed.classes.push(ClassEntity {
                    name: "Stub".into(),
                    start_line: 1,
                    end_line: 2,
                    bases: vec![],
                    decorators: vec![],
                    attributes: vec![],
                });
            }
            if context.content.contains("def") {
                parsed.functions.push(FunctionEntity {
                    name: "stub".into(),
                    signature: "def stub()".into(),
                    parameters_str: String::new(),
                    parameters: vec![],
                    locals: vec![],
                    start_line: 1,
                    end_line: 1,
                    class_name: None,
                    is_method: false,
                    decorators: vec![],
                });
            }
            Ok(parsed)
        }
    }

    fn python_stub() -> Arc<dyn LanguageParser> {
        Arc::new(StubParser {
            language: Language::Python,
            extensions: &["py", "pyw"],
        })
    }

    #[test]
    fn test_registry_lookup() {
        let registry = LanguageRegistry::new();
        assert!(registry.get(Language::Python).is_none());
        registry.register(python_stub());
        assert!(registry.get(Language::Python).is_some());
        assert!(registry.get_by_extension("py").is_some());
        assert!(registry.get_by_extension("PY").is_some());
        assert!(!registry.supports_extension("rb"));
    }

    #[test]
    fn test_engine_parses_and_hashes() {
        let registry = Arc::new(LanguageRegistry::new());
        registry.register(python_stub());
        let engine = ParserEngine::new(registry);

        let parsed = engine.parse_file("pkg/mod.py", b"def f(): pass").unwrap();
        assert_eq!(parsed.path, "pkg/mod.py");
        assert_eq!(parsed.functions.len(), 1);
        assert_eq!(parsed.content_hash, content_hash(b"def f(): pass"));
        assert_eq!(parsed.size_bytes, 13);
    }

    #[test]
    fn test_engine_oversize_skips_symbols() {
        let registry = Arc::new(LanguageRegistry::new());
        registry.register(python_stub());
        let engine = ParserEngine::new(registry).with_max_file_size(8);

        let parsed = engine.parse_file("big.py", b"def f(): pass").unwrap();
        assert!(parsed.functions.is_empty());
        assert_eq!(parsed.errors, vec!["oversize".to_string()]);
        // Hash still computed so change detection works
        assert!(!parsed.content_hash.is_empty());
    }

    #[test]
    fn test_engine_invalid_utf8_annotated() {
        let registry = Arc::new(LanguageRegistry::new());
        registry.register(python_stub());
        let engine = ParserEngine::new(registry);

        let parsed = engine.parse_file("bin.py", &[0xff, 0xfe, 0x00]).unwrap();
        assert!(parsed.classes.is_empty());
        assert_eq!(parsed.errors, vec!["invalid_utf8".to_string()]);
    }

    #[test]
    fn test_engine_unknown_language_is_error() {
        let registry = Arc::new(LanguageRegistry::new());
        let engine = ParserEngine::new(registry);
        let result = engine.parse_file("script.rb", b"puts 1");
        assert!(matches!(result, Err(Error::Validation { .. })));
    }

    #[test]
    fn test_parse_batch_isolates_failures() {
        let registry = Arc::new(LanguageRegistry::new());
        registry.register(python_stub());
        let engine = ParserEngine::new(registry).with_parse_concurrency(2).unwrap();

        let files = vec![
            ("a.py".to_string(), b"class A: pass".to_vec()),
            ("b.rb".to_string(), b"puts 1".to_vec()),
            ("c.py".to_string(), b"def c(): pass".to_vec()),
        ];
        let results = engine.parse_batch(&files);
        assert_eq!(results.len(), 3);
        assert!(results[0].is_ok());
        assert!(results[1].is_err(), "no parser for .rb");
        assert!(results[2].is_ok());
        assert_eq!(results[0].as_ref().unwrap().classes.len(), 1);
    }
}
