//! Pattern catalogue for the JavaScript/TypeScript grammars
//!
//! Names the concrete-syntax-tree patterns the mapper extracts. Both grammars
//! share this vocabulary; TypeScript additionally produces `decorator` nodes.

/// Class declaration pattern
pub const CLASS_DECLARATION: &str = "class_declaration";
/// `extends` clause wrapper
pub const CLASS_HERITAGE: &str = "class_heritage";
/// Method definition inside a class body
pub const METHOD_DEFINITION: &str = "method_definition";
/// Class field definition kinds (JS names it `field_definition`,
/// TypeScript `public_field_definition`)
pub const FIELD_DEFINITION_KINDS: &[&str] = &["field_definition", "public_field_definition"];
/// Function declaration
pub const FUNCTION_DECLARATION: &str = "function_declaration";
/// Arrow function expression
pub const ARROW_FUNCTION: &str = "arrow_function";
/// `const`/`let` declaration
pub const LEXICAL_DECLARATION: &str = "lexical_declaration";
/// `var` declaration
pub const VARIABLE_DECLARATION: &str = "variable_declaration";
/// Single declarator within a declaration
pub const VARIABLE_DECLARATOR: &str = "variable_declarator";
/// Call expression
pub const CALL_EXPRESSION: &str = "call_expression";
/// `new` expression
pub const NEW_EXPRESSION: &str = "new_expression";
/// Member access (`a.b`)
pub const MEMBER_EXPRESSION: &str = "member_expression";
/// Assignment expression
pub const ASSIGNMENT_EXPRESSION: &str = "assignment_expression";
/// Augmented assignment (`+=`, ...)
pub const AUGMENTED_ASSIGNMENT_EXPRESSION: &str = "augmented_assignment_expression";
/// Throw statement
pub const THROW_STATEMENT: &str = "throw_statement";
/// Decorator (TypeScript)
pub const DECORATOR: &str = "decorator";
/// Identifier leaf
pub const IDENTIFIER: &str = "identifier";
/// Property name leaf
pub const PROPERTY_IDENTIFIER: &str = "property_identifier";

/// Parameter node kinds appearing under `formal_parameters`
pub const PARAMETER_KINDS: &[&str] = &[
    "identifier",
    "assignment_pattern",
    "rest_pattern",
    "required_parameter",
    "optional_parameter",
];
