//! JavaScript/TypeScript parser implementation

use crate::ast_mapper::AstMapper;
use sourcelens_core::error::{Error, Result};
use sourcelens_core::model::{Language, ParsedFile};
use sourcelens_core::parser::{LanguageParser, ParseContext};

/// JavaScript or TypeScript parser; one instance per language so the registry
/// can dispatch by extension
#[derive(Debug)]
pub struct JsParser {
    language: Language,
}

impl JsParser {
    /// Parser for `.js`/`.mjs`/`.cjs`/`.jsx`
    pub fn javascript() -> Self {
        Self {
            language: Language::JavaScript,
        }
    }

    /// Parser for `.ts`/`.tsx`
    pub fn typescript() -> Self {
        Self {
            language: Language::TypeScript,
        }
    }

    fn grammar(&self, path: &str) -> tree_sitter::Language {
        match self.language {
            Language::TypeScript => {
                if path.ends_with(".tsx") {
                    tree_sitter_typescript::LANGUAGE_TSX.into()
                } else {
                    tree_sitter_typescript::LANGUAGE_TYPESCRIPT.into()
                }
            }
            _ => tree_sitter_javascript::LANGUAGE.into(),
        }
    }
}

impl LanguageParser for JsParser {
    fn language(&self) -> Language {
        self.language
    }

    fn supported_extensions(&self) -> &'static [&'static str] {
        match self.language {
            Language::TypeScript => &["ts", "tsx"],
            _ => &["js", "mjs", "cjs", "jsx"],
        }
    }

    fn parse(&self, context: &ParseContext) -> Result<ParsedFile> {
        let mut parser = tree_sitter::Parser::new();
        parser
            .set_language(&self.grammar(&context.path))
            .map_err(|e| Error::parse(&context.path, format!("failed to load grammar: {e}")))?;

        let Some(tree) = parser.parse(&context.content, None) else {
            let mut parsed = ParsedFile::empty(
                context.path.clone(),
                self.language,
                String::new(),
                context.content.len(),
            );
            parsed.errors.push("parse_failed".to_string());
            return Ok(parsed);
        };

        Ok(AstMapper::new(&context.path, &context.content, self.language).extract(&tree))
    }
}
