//! AST mapper for converting the Python CST into a ParsedFile record

use crate::queries;
use sourcelens_core::model::{
    ClassEntity, FunctionEntity, Language, ParsedFile, RefKind, ScopeType, SymbolKey, SymbolRef,
    TargetHint, VariableEntity,
};
use std::collections::HashSet;
use tree_sitter::{Node, Tree};

/// Innermost lexical scope during the walk
#[derive(Debug, Clone)]
enum Scope {
    Module,
    Class { name: String },
    Function { name: String, start_line: usize },
}

/// Maps a Python syntax tree to entities and unresolved references
pub(crate) struct AstMapper<'a> {
    path: &'a str,
    source: &'a str,
    classes: Vec<ClassEntity>,
    functions: Vec<FunctionEntity>,
    globals: Vec<VariableEntity>,
    refs: Vec<SymbolRef>,
    /// Names of module-level symbols already recorded
    seen_globals: HashSet<String>,
    /// (name, line) pairs already recorded as variable uses, per function
    seen_uses: HashSet<(String, String, usize)>,
}

impl<'a> AstMapper<'a> {
    pub(crate) fn new(path: &'a str, source: &'a str) -> Self {
        Self {
            path,
            source,
            classes: Vec::new(),
            functions: Vec::new(),
            globals: Vec::new(),
            refs: Vec::new(),
            seen_globals: HashSet::new(),
            seen_uses: HashSet::new(),
        }
    }

    /// Walk the tree and produce the parsed record
    pub(crate) fn extract(mut self, tree: &Tree) -> ParsedFile {
        let root = tree.root_node();
        let mut scopes = vec![Scope::Module];
        self.visit_children(root, &mut scopes, &[]);

        let mut parsed = ParsedFile::empty(
            self.path.to_string(),
            Language::Python,
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
        for child in children {
            self.visit(child, scopes, decorators);
        }
    }

    fn visit(&mut self, node: Node<'_>, scopes: &mut Vec<Scope>, decorators: &[String]) {
        match node.kind() {
            queries::DECORATED_DEFINITION => {
                let names = self.decorator_names(node);
                if let Some(definition) = node.child_by_field_name("definition") {
                    self.visit(definition, scopes, &names);
                }
            }
            queries::CLASS_DEFINITION => self.handle_class(node, scopes, decorators),
            queries::FUNCTION_DEFINITION => self.handle_function(node, scopes, decorators),
            queries::ASSIGNMENT => self.handle_assignment(node, scopes, false),
            queries::AUGMENTED_ASSIGNMENT => self.handle_assignment(node, scopes, true),
            queries::CALL => {
                self.handle_call(node, scopes);
                // Arguments may contain nested calls and identifier uses
                self.visit_children(node, scopes, &[]);
            }
            queries::RAISE_STATEMENT => self.handle_raise(node, scopes),
            queries::EXCEPT_CLAUSE => {
                self.handle_except(node, scopes);
                self.visit_children(node, scopes, &[]);
            }
            queries::RETURN_STATEMENT => {
                self.collect_identifier_uses(node, scopes);
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
        if let Some(superclasses) = node.child_by_field_name("superclasses") {
            let mut cursor = superclasses.walk();
            for arg in superclasses.named_children(&mut cursor) {
                if let Some(base) = self.symbol_text(arg) {
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

        // Class attributes: plain assignments directly in the class body
        let mut attributes = Vec::new();
        if let Some(body) = node.child_by_field_name("body") {
            let mut cursor = body.walk();
            for stmt in body.named_children(&mut cursor) {
                if stmt.kind() != queries::EXPRESSION_STATEMENT {
                    continue;
                }
                let mut inner = stmt.walk();
                for expr in stmt.named_children(&mut inner) {
                    if expr.kind() == queries::ASSIGNMENT {
                        if let Some(left) = expr.child_by_field_name("left") {
                            if left.kind() == queries::IDENTIFIER {
                                attributes.push(VariableEntity {
                                    name: self.text(left),
                                    line: line(left),
                                    scope: ScopeType::ClassAttribute,
                                });
                            }
                        }
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

        let class_name = scopes.iter().rev().find_map(|s| match s {
            Scope::Class { name } => Some(name.clone()),
            _ => None,
        });
        // A def nested in another def is a closure, not a method
        let is_method = class_name.is_some()
            && !matches!(scopes.last(), Some(Scope::Function { .. }));

        let mut parameters = Vec::new();
        let mut parameter_names = Vec::new();
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
                        .child_by_field_name("name")
                        .or_else(|| first_of_kind(param, queries::IDENTIFIER))
                };
                if let Some(ident) = ident {
                    let pname = self.text(ident);
                    parameter_names.push(pname.clone());
                    parameters.push(VariableEntity {
                        name: pname,
                        line: line(ident),
                        scope: ScopeType::Parameter,
                    });
                }
            }
        }
        let parameters_str = parameter_names.join(", ");
        let signature = format!("def {name}({parameters_str})");

        self.functions.push(FunctionEntity {
            name: name.clone(),
            signature,
            parameters_str,
            parameters,
            locals: Vec::new(),
            start_line,
            end_line,
            class_name: if is_method { class_name } else { None },
            is_method,
            decorators: decorators.to_vec(),
        });

        scopes.push(Scope::Function { name, start_line });
        if let Some(body) = node.child_by_field_name("body") {
            self.visit_children(body, scopes, &[]);
        }
        scopes.pop();
    }

    fn handle_assignment(&mut self, node: Node<'_>, scopes: &mut Vec<Scope>, augmented: bool) {
        let Some(left) = node.child_by_field_name("left") else {
            return;
        };
        // The right-hand side may contain calls and uses
        if let Some(right) = node.child_by_field_name("right") {
            self.visit(right, scopes, &[]);
            self.collect_identifier_uses(right, scopes);
        }
        if left.kind() != queries::IDENTIFIER {
            return;
        }
        let name = self.text(left);
        let assign_line = line(left);

        match current_function(scopes) {
            Some((fn_name, fn_line)) => {
                let func = self
                    .functions
                    .iter_mut()
                    .rev()
                    .find(|f| f.name == fn_name && f.start_line == fn_line);
                let Some(func) = func else { return };
                let declared = func.parameters.iter().any(|v| v.name == name)
                    || func.locals.iter().any(|v| v.name == name);
                if augmented || declared {
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
                        line: assign_line,
                        hint: TargetHint::Variable,
                    });
                } else {
                    func.locals.push(VariableEntity {
                        name,
                        line: assign_line,
                        scope: ScopeType::LocalVariable,
                    });
                }
            }
            None => {
                // Module level; class bodies are collected by handle_class
                if matches!(scopes.last(), Some(Scope::Module))
                    && self.seen_globals.insert(name.clone())
                {
                    self.globals.push(VariableEntity {
                        name,
                        line: assign_line,
                        scope: ScopeType::GlobalVariable,
                    });
                }
            }
        }
    }

    fn handle_call(&mut self, node: Node<'_>, scopes: &mut Vec<Scope>) {
        let Some((fn_name, fn_line)) = current_function(scopes) else {
            return;
        };
        let Some(function) = node.child_by_field_name("function") else {
            return;
        };
        let Some(target) = self.symbol_text(function) else {
            return;
        };

        // Uppercase initial means instantiation by convention
        let creates = target.chars().next().is_some_and(char::is_uppercase);
        self.refs.push(SymbolRef {
            kind: if creates {
                RefKind::CreatesObject
            } else {
                RefKind::Call
            },
            src: SymbolKey {
                name: fn_name,
                start_line: fn_line,
            },
            target_name: target,
            line: line(node),
            hint: if creates {
                TargetHint::Class
            } else {
                TargetHint::Function
            },
        });
    }

    fn handle_raise(&mut self, node: Node<'_>, scopes: &mut Vec<Scope>) {
        let Some((fn_name, fn_line)) = current_function(scopes) else {
            return;
        };
        let mut cursor = node.walk();
        for child in node.named_children(&mut cursor) {
            let target = match child.kind() {
                queries::CALL => child
                    .child_by_field_name("function")
                    .and_then(|f| self.symbol_text(f)),
                queries::IDENTIFIER | queries::ATTRIBUTE => self.symbol_text(child),
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

    fn handle_except(&mut self, node: Node<'_>, scopes: &mut Vec<Scope>) {
        let Some((fn_name, fn_line)) = current_function(scopes) else {
            return;
        };
        let mut cursor = node.walk();
        for child in node.named_children(&mut cursor) {
            if child.kind() == queries::BLOCK {
                break;
            }
            if let Some(target) = self.symbol_text(child) {
                self.refs.push(SymbolRef {
                    kind: RefKind::Handles,
                    src: SymbolKey {
                        name: fn_name.clone(),
                        start_line: fn_line,
                    },
                    target_name: target,
                    line: line(node),
                    hint: TargetHint::Any,
                });
            }
        }
    }

    /// Record UsesVariable refs for identifiers under `node` matching a
    /// declared parameter or local of the enclosing function
    fn collect_identifier_uses(&mut self, node: Node<'_>, scopes: &[Scope]) {
        let Some((fn_name, fn_line)) = current_function(scopes) else {
            return;
        };
        let declared: HashSet<String> = self
            .functions
            .iter()
            .rev()
            .find(|f| f.name == fn_name && f.start_line == fn_line)
            .map(|f| {
                f.parameters
                    .iter()
                    .chain(f.locals.iter())
                    .map(|v| v.name.clone())
                    .collect()
            })
            .unwrap_or_default();
        if declared.is_empty() {
            return;
        }

        let mut stack = vec![node];
        while let Some(current) = stack.pop() {
            if current.kind() == queries::IDENTIFIER {
                let name = self.text(current);
                let use_line = line(current);
                if declared.contains(&name)
                    && self
                        .seen_uses
                        .insert((fn_name.clone(), name.clone(), use_line))
                {
                    self.refs.push(SymbolRef {
                        kind: RefKind::UsesVariable,
                        src: SymbolKey {
                            name: fn_name.clone(),
                            start_line: fn_line,
                        },
                        target_name: name,
                        line: use_line,
                        hint: TargetHint::Variable,
                    });
                }
            }
            let mut cursor = current.walk();
            for child in current.named_children(&mut cursor) {
                stack.push(child);
            }
        }
    }

    fn decorator_names(&self, node: Node<'_>) -> Vec<String> {
        let mut names = Vec::new();
        let mut cursor = node.walk();
        for child in node.named_children(&mut cursor) {
            if child.kind() != queries::DECORATOR {
                continue;
            }
            let mut inner = child.walk();
            for expr in child.named_children(&mut inner) {
                let name = match expr.kind() {
                    queries::CALL => expr
                        .child_by_field_name("function")
                        .and_then(|f| self.symbol_text(f)),
                    _ => self.symbol_text(expr),
                };
                if let Some(name) = name {
                    names.push(name);
                    break;
                }
            }
        }
        names
    }

    /// Bare name of an identifier or the last component of an attribute chain
    fn symbol_text(&self, node: Node<'_>) -> Option<String> {
        match node.kind() {
            queries::IDENTIFIER => Some(self.text(node)),
            queries::ATTRIBUTE => node
                .child_by_field_name("attribute")
                .map(|attr| self.text(attr)),
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
