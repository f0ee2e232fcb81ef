//! AST mapper for converting JS/TS syntax trees into a ParsedFile record

use crate::queries;
use sourcelens_core::model::{
    ClassEntity, FunctionEntity, Language, ParsedFile, RefKind, ScopeType, SymbolKey, SymbolRef,
    TargetHint, VariableEntity,
};
use std::collections::HashSet;
use tree_sitter::{Node, Tree};

#[derive(Debug, Clone)]
enum Scope {
    Module,
    Class { name: String },
    Function { name: String, start_line: usize },
}

/// Maps a JavaScript or TypeScript syntax tree to entities and references
pub(crate) struct AstMapper<'a> {
    path: &'a str,
    source: &'a str,
    language: Language,
    classes: Vec<ClassEntity>,
    functions: Vec<FunctionEntity>,
    globals: Vec<VariableEntity>,
    refs: Vec<SymbolRef>,
    seen_globals: HashSet<String>,
}

impl<'a> AstMapper<'a> {
    pub(crate) fn new(path: &'a str, source: &'a str, language: Language) -> Self {
        Self {
            path,
            source,
            language,
            classes: Vec::new(),
            functions: Vec::new(),
            globals: Vec::new(),
            refs: Vec::new(),
            seen_globals: HashSet::new(),
        }
    }

    pub(crate) fn extract(mut self, tree: &Tree) -> ParsedFile {
        let root = tree.root_node();
        let mut scopes = vec![Scope::Module];
        self.visit_children(root, &mut scopes, &[]);

        let mut parsed = ParsedFile::empty(
            self.path.to_string(),
            self.language,
            String::new(),
            self.source.len(),
        );
        if root.has_error() {
            parsed.errors.push("syntax_error".to_string());
        }
        parsed.classes = self.classes;
        parsed.functions = self.functions;
        parsed.globals = self.globals;
        parsed.refs = self.refs;
        parsed
    }

    fn visit_children(&mut self, node: Node<'_>, scopes: &mut Vec<Scope>, decorators: &[String]) {
        let mut cursor = node.walk();
        let children: Vec<Node<'_>> = node.named_children(&mut cursor).collect();
        let mut pending_decorators: Vec<String> = decorators.to_vec();
        for child in children {
            if child.kind() == queries::DECORATOR {
                if let Some(name) = self.decorator_name(child) {
                    pending_decorators.push(name);
                }
                continue;
            }
            self.visit(child, scopes, &pending_decorators);
            pending_decorators.clear();
        }
    }

    fn visit(&mut self, node: Node<'_>, scopes: &mut Vec<Scope>, decorators: &[String]) {
        match node.kind() {
            queries::CLASS_DECLARATION => self.handle_class(node, scopes, decorators),
            queries::FUNCTION_DECLARATION | queries::METHOD_DEFINITION => {
                self.handle_function(node, scopes, decorators)
            }
            queries::LEXICAL_DECLARATION | queries::VARIABLE_DECLARATION => {
                self.handle_declaration(node, scopes)
            }
            queries::ASSIGNMENT_EXPRESSION => self.handle_assignment(node, scopes, false),
            queries::AUGMENTED_ASSIGNMENT_EXPRESSION => self.handle_assignment(node, scopes, true),
            queries::CALL_EXPRESSION => {
                self.handle_call(node, scopes);
                self.visit_children(node, scopes, &[]);
            }
            queries::NEW_EXPRESSION => {
                self.handle_new(node, scopes);
                self.visit_children(node, scopes, &[]);
            }
            queries::THROW_STATEMENT => {
                self.handle_throw(node, scopes);
                self.visit_children(node, scopes, &[]);
            }
            _ => self.visit_children(node, scopes, &[]),
        }
    }

    fn handle_class(&mut self, node: Node<'_>, scopes: &mut Vec<Scope>, decorators: &[String]) {
        let Some(name) = self.field_text(node, "name") else {
            return;
        };
        let start_line = line(node);
        let end_line = node.end_position().row + 1;

        let mut bases = Vec::new();
        let mut cursor = node.walk();
        for child in node.named_children(&mut cursor) {
            if child.kind() != queries::CLASS_HERITAGE {
                continue;
            }
            // JS puts the expression directly under class_heritage;
            // TypeScript wraps it in an extends_clause
            let mut inner = child.walk();
            let base_exprs: Vec<Node<'_>> = child
                .named_children(&mut inner)
                .flat_map(|heritage_child| {
                    if heritage_child.kind() == "extends_clause" {
                        let mut clause = heritage_child.walk();
                        heritage_child.named_children(&mut clause).collect::<Vec<_>>()
                    } else {
                        vec![heritage_child]
                    }
                })
                .collect();
            for base_expr in base_exprs {
                if let Some(base) = self.symbol_text(base_expr) {
                    self.refs.push(SymbolRef {
                        kind: RefKind::Inherits,
                        src: SymbolKey {
                            name: name.clone(),
                            start_line,
                        },
                        target_name: base.clone(),
                        line: start_line,
                        hint: TargetHint::Class,
                    });
                    bases.push(base);
                }
            }
        }

        // Class fields
        let mut attributes = Vec::new();
        if let Some(body) = node.child_by_field_name("body") {
            let mut cursor = body.walk();
            for member in body.named_children(&mut cursor) {
                if queries::FIELD_DEFINITION_KINDS.contains(&member.kind()) {
                    if let Some(property) = member.child_by_field_name("property") {
                        attributes.push(VariableEntity {
                            name: self.text(property),
                            line: line(property),
                            scope: ScopeType::ClassAttribute,
                        });
                    }
                }
            }
        }

        self.classes.push(ClassEntity {
            name: name.clone(),
            start_line,
            end_line,
            bases,
            decorators: decorators.to_vec(),
            attributes,
        });

        scopes.push(Scope::Class { name });
        if let Some(body) = node.child_by_field_name("body") {
            self.visit_children(body, scopes, &[]);
        }
        scopes.pop();
    }

    fn handle_function(&mut self, node: Node<'_>, scopes: &mut Vec<Scope>, decorators: &[String]) {
        let Some(name) = self.field_text(node, "name") else {
            return;
        };
        let start_line = line(node);
        let end_line = node.end_position().row + 1;
        let is_method = node.kind() == queries::METHOD_DEFINITION;
        let class_name = if is_method {
            scopes.iter().rev().find_map(|s| match s {
                Scope::Class { name } => Some(name.clone()),
                _ => None,
            })
        } else {
            None
        };

        let (parameters, parameters_str) = self.extract_parameters(node);
        let signature = format!("function {name}({parameters_str})");

        self.functions.push(FunctionEntity {
            name: name.clone(),
            signature,
            parameters_str,
            parameters,
            locals: Vec::new(),
            start_line,
            end_line,
            class_name,
            is_method,
            decorators: decorators.to_vec(),
        });

        scopes.push(Scope::Function { name, start_line });
        if let Some(body) = node.child_by_field_name("body") {
            self.visit_children(body, scopes, &[]);
        }
        scopes.pop();
    }

    fn extract_parameters(&self, node: Node<'_>) -> (Vec<VariableEntity>, String) {
        let mut parameters = Vec::new();
        let mut names = Vec::new();
        if let Some(params) = node.child_by_field_name("parameters") {
            let mut cursor = params.walk();
            for param in params.named_children(&mut cursor) {
                if !queries::PARAMETER_KINDS.contains(&param.kind()) {
                    continue;
                }
                let ident = if param.kind() == queries::IDENTIFIER {
                    Some(param)
                } else {
                    param
                        .child_by_field_name("left")
                        .or_else(|| param.child_by_field_name("pattern"))
                        .or_else(|| first_of_kind(param, queries::IDENTIFIER))
                };
                if let Some(ident) = ident {
                    let pname = self.text(ident);
                    names.push(pname.clone());
                    parameters.push(VariableEntity {
                        name: pname,
                        line: line(ident),
                        scope: ScopeType::Parameter,
                    });
                }
            }
        }
        let joined = names.join(", ");
        (parameters, joined)
    }

    /// `const`/`let`/`var`: locals inside functions, globals at module level.
    /// A declarator whose value is an arrow function becomes a function entity
    /// named after the declarator.
    fn handle_declaration(&mut self, node: Node<'_>, scopes: &mut Vec<Scope>) {
        let mut cursor = node.walk();
        let declarators: Vec<Node<'_>> = node
            .named_children(&mut cursor)
            .filter(|c| c.kind() == queries::VARIABLE_DECLARATOR)
            .collect();

        for declarator in declarators {
            let Some(name_node) = declarator.child_by_field_name("name") else {
                continue;
            };
            if name_node.kind() != queries::IDENTIFIER {
                continue;
            }
            let name = self.text(name_node);
            let decl_line = line(name_node);
            let value = declarator.child_by_field_name("value");

            if let Some(value) = value {
                if value.kind() == queries::ARROW_FUNCTION {
                    self.handle_arrow(name.clone(), decl_line, value, scopes);
                    continue;
                }
            }

            match current_function(scopes) {
                Some((fn_name, fn_line)) => {
                    if let Some(func) = self
                        .functions
                        .iter_mut()
                        .rev()
                        .find(|f| f.name == fn_name && f.start_line == fn_line)
                    {
                        func.locals.push(VariableEntity {
                            name,
                            line: decl_line,
                            scope: ScopeType::LocalVariable,
                        });
                    }
                }
                None => {
                    if self.seen_globals.insert(name.clone()) {
                        self.globals.push(VariableEntity {
                            name,
                            line: decl_line,
                            scope: ScopeType::GlobalVariable,
                        });
                    }
                }
            }

            if let Some(value) = value {
                self.visit(value, scopes, &[]);
            }
        }
    }

    fn handle_arrow(
        &mut self,
        name: String,
        start_line: usize,
        node: Node<'_>,
        scopes: &mut Vec<Scope>,
    ) {
        let (parameters, parameters_str) = self.extract_parameters(node);
        let signature = format!("const {name} = ({parameters_str}) => ...");
        self.functions.push(FunctionEntity {
            name: name.clone(),
            signature,
            parameters_str,
            parameters,
            locals: Vec::new(),
            start_line,
            end_line: node.end_position().row + 1,
            class_name: None,
            is_method: false,
            decorators: vec![],
        });
        scopes.push(Scope::Function { name, start_line });
        if let Some(body) = node.child_by_field_name("body") {
            self.visit_children(body, scopes, &[]);
        }
        scopes.pop();
    }

    fn handle_assignment(&mut self, node: Node<'_>, scopes: &mut Vec<Scope>, augmented: bool) {
        if let Some(right) = node.child_by_field_name("right") {
            self.visit(right, scopes, &[]);
        }
        let Some((fn_name, fn_line)) = current_function(scopes) else {
            return;
        };
        let Some(left) = node.child_by_field_name("left") else {
            return;
        };
        if left.kind() != queries::IDENTIFIER {
            return;
        }
        let name = self.text(left);
        let declared = self
            .functions
            .iter()
            .rev()
            .find(|f| f.name == fn_name && f.start_line == fn_line)
            .map(|f| {
                f.parameters.iter().any(|v| v.name == name)
                    || f.locals.iter().any(|v| v.name == name)
            })
            .unwrap_or(false);
        if declared || augmented {
            self.refs.push(SymbolRef {
                kind: RefKind::ModifiesVariable {
                    modification_type: if augmented {
                        "augmented".to_string()
                    } else {
                        "assignment".to_string()
                    },
                },
                src: SymbolKey {
                    name: fn_name,
                    start_line: fn_line,
                },
                target_name: name,
                line: line(left),
                hint: TargetHint::Variable,
            });
        }
    }

    fn handle_call(&mut self, node: Node<'_>, scopes: &mut Vec<Scope>) {
        let Some((fn_name, fn_line)) = current_function(scopes) else {
            return;
        };
        let Some(function) = node.child_by_field_name("function") else {
            return;
        };
        if let Some(target) = self.symbol_text(function) {
            self.refs.push(SymbolRef {
                kind: RefKind::Call,
                src: SymbolKey {
                    name: fn_name,
                    start_line: fn_line,
                },
                target_name: target,
                line: line(node),
                hint: TargetHint::Function,
            });
        }
    }

    fn handle_new(&mut self, node: Node<'_>, scopes: &mut Vec<Scope>) {
        let Some((fn_name, fn_line)) = current_function(scopes) else {
            return;
        };
        let Some(constructor) = node.child_by_field_name("constructor") else {
            return;
        };
        if let Some(target) = self.symbol_text(constructor) {
            self.refs.push(SymbolRef {
                kind: RefKind::CreatesObject,
                src: SymbolKey {
                    name: fn_name,
                    start_line: fn_line,
                },
                target_name: target,
                line: line(node),
                hint: TargetHint::Class,
            });
        }
    }

    fn handle_throw(&mut self, node: Node<'_>, scopes: &mut Vec<Scope>) {
        let Some((fn_name, fn_line)) = current_function(scopes) else {
            return;
        };
        let mut cursor = node.walk();
        for child in node.named_children(&mut cursor) {
            let target = match child.kind() {
                queries::NEW_EXPRESSION => child
                    .child_by_field_name("constructor")
                    .and_then(|c| self.symbol_text(c)),
                queries::IDENTIFIER => Some(self.text(child)),
                _ => None,
            };
            if let Some(target) = target {
                self.refs.push(SymbolRef {
                    kind: RefKind::Raises,
                    src: SymbolKey {
                        name: fn_name,
                        start_line: fn_line,
                    },
                    target_name: target,
                    line: line(node),
                    hint: TargetHint::Any,
                });
                break;
            }
        }
    }

    fn decorator_name(&self, node: Node<'_>) -> Option<String> {
        let mut cursor = node.walk();
        for child in node.named_children(&mut cursor) {
            let name = match child.kind() {
                queries::CALL_EXPRESSION => child
                    .child_by_field_name("function")
                    .and_then(|f| self.symbol_text(f)),
                _ => self.symbol_text(child),
            };
            if name.is_some() {
                return name;
            }
        }
        None
    }

    /// Bare name of an identifier or the property of a member chain
    fn symbol_text(&self, node: Node<'_>) -> Option<String> {
        match node.kind() {
            queries::IDENTIFIER | queries::PROPERTY_IDENTIFIER => Some(self.text(node)),
            queries::MEMBER_EXPRESSION => node
                .child_by_field_name("property")
                .map(|p| self.text(p)),
            _ => None,
        }
    }

    fn field_text(&self, node: Node<'_>, field: &str) -> Option<String> {
        node.child_by_field_name(field).map(|n| self.text(n))
    }

    fn text(&self, node: Node<'_>) -> String {
        self.source[node.byte_range()].to_string()
    }
}

fn line(node: Node<'_>) -> usize {
    node.start_position().row + 1
}

fn current_function(scopes: &[Scope]) -> Option<(String, usize)> {
    scopes.iter().rev().find_map(|s| match s {
        Scope::Function { name, start_line } => Some((name.clone(), *start_line)),
        _ => None,
    })
}

fn first_of_kind<'t>(node: Node<'t>, kind: &str) -> Option<Node<'t>> {
    let mut cursor = node.walk();
    let found = node.named_children(&mut cursor).find(|c| c.kind() == kind);
    found
}
