//! Pattern catalogue for the Python grammar
//!
//! Names the concrete-syntax-tree patterns the mapper extracts, keeping the
//! grammar vocabulary out of the generic walk. Each constant is the tree-sitter
//! node kind the corresponding extraction rule matches.

/// Class definition pattern
pub const CLASS_DEFINITION: &str = "class_definition";
/// Function and method definition pattern
pub const FUNCTION_DEFINITION: &str = "function_definition";
/// Decorated definition wrapper
pub const DECORATED_DEFINITION: &str = "decorated_definition";
/// A single decorator
pub const DECORATOR: &str = "decorator";
/// Call expression
pub const CALL: &str = "call";
/// Plain assignment
pub const ASSIGNMENT: &str = "assignment";
/// Augmented assignment (`+=`, `-=`, ...)
pub const AUGMENTED_ASSIGNMENT: &str = "augmented_assignment";
/// Raise statement
pub const RAISE_STATEMENT: &str = "raise_statement";
/// Except clause of a try statement
pub const EXCEPT_CLAUSE: &str = "except_clause";
/// Return statement
pub const RETURN_STATEMENT: &str = "return_statement";
/// Identifier leaf
pub const IDENTIFIER: &str = "identifier";
/// Attribute access (`a.b`)
pub const ATTRIBUTE: &str = "attribute";
/// Statement block
pub const BLOCK: &str = "block";
/// Expression statement wrapper
pub const EXPRESSION_STATEMENT: &str = "expression_statement";

/// Parameter node kinds appearing under `parameters`
pub const PARAMETER_KINDS: &[&str] = &[
    "identifier",
    "typed_parameter",
    "default_parameter",
    "typed_default_parameter",
    "list_splat_pattern",
    "dictionary_splat_pattern",
];
