//! Python parser implementation

use crate::ast_mapper::AstMapper;
use sourcelens_core::error::{Error, Result};
use sourcelens_core::model::{Language, ParsedFile};
use sourcelens_core::parser::{LanguageParser, ParseContext};

/// Python language parser
///
/// A fresh tree-sitter parser is constructed per call; the type itself stays
/// `Send + Sync` so it can live behind the shared registry.
#[derive(Debug, Default)]
pub struct PythonParser;

impl PythonParser {
    /// Create a Python parser
    pub fn new() -> Self {
        Self
    }
}

impl LanguageParser for PythonParser {
    fn language(&self) -> Language {
        Language::Python
    }

    fn supported_extensions(&self) -> &'static [&'static str] {
        &["py", "pyw"]
    }

    fn parse(&self, context: &ParseContext) -> Result<ParsedFile> {
        let mut parser = tree_sitter::Parser::new();
        parser
            .set_language(&tree_sitter_python::LANGUAGE.into())
            .map_err(|e| Error::parse(&context.path, format!("failed to load grammar: {e}")))?;

        let Some(tree) = parser.parse(&context.content, None) else {
            let mut parsed = ParsedFile::empty(
                context.path.clone(),
                Language::Python,
                String::new(),
                context.content.len(),
            );
            parsed.errors.push("parse_failed".to_string());
            return Ok(parsed);
        };

        Ok(AstMapper::new(&context.path, &context.content).extract(&tree))
    }
}
