//! Python language support for sourcelens

mod ast_mapper;
mod parser;
mod queries;

pub use parser::PythonParser;

use std::sync::Arc;

/// Create a parser instance ready for registry registration
pub fn create_parser() -> Arc<dyn sourcelens_core::LanguageParser> {
    Arc::new(PythonParser::new())
}
