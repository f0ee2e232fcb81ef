//! JavaScript and TypeScript language support for sourcelens

mod ast_mapper;
mod parser;
mod queries;

pub use parser::JsParser;

use std::sync::Arc;

/// Create the JavaScript and TypeScript parser instances for registration
pub fn create_parsers() -> Vec<Arc<dyn sourcelens_core::LanguageParser>> {
    vec![
        Arc::new(JsParser::javascript()),
        Arc::new(JsParser::typescript()),
    ]
}
