//! Static resolver pass for the **Lox** interpreter.
//!
//! This resolver does three things in one AST walk:
//! 1. Build lexical scopes (stack of name → [`Variable`] maps, each variable
//!    owning the slot it will occupy in its runtime environment).
//! 2. Report static errors: redeclaration, reads inside the variable's own
//!    initializer, unused locals, misplaced `return` / `this` / `super`,
//!    self‑inheritance and value returns from `init`.
//! 3. Record, for *each* variable/`this`/`super` occurrence that lives in a
//!    local scope, the `(depth, slot)` pair the interpreter indexes with.
//!    Occurrences not found in any scope are globals and stay out of the table.
//!
//! Unused‑local policy: every `var`, `fun` and `class` binding declared in a
//! block or function body must be read at least once.  Parameters, the
//! implicit `this` / `super`, and globals are exempt.

use std::collections::{HashMap, HashSet};
use std::rc::Rc;

use crate::ast::{ClassDecl, Expr, ExprId, FunctionDecl, Stmt, TraitDecl};
use crate::error::LoxError;
use crate::token::Token;
use log::{debug, info};

/// Where a local lives at runtime: walk `depth` enclosing links, then index `slot`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Binding {
    pub depth: usize,
    pub slot: usize,
}

/// Resolution side table keyed by expression identity.
pub type Locals = HashMap<ExprId, Binding>;

/// What kind of function body are we in?  Used to validate `return`.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
enum FunctionType {
    None,
    Function,
    Method,
    Initializer,
    ClassMethod,
}

/// What kind of class body are we in?  Used to validate `this` / `super`.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
enum ClassType {
    None,
    Class,
    Subclass,
    Trait,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
enum VariableState {
    Declared,
    Defined,
    Read,
}

#[derive(Debug)]
struct Variable {
    name: Token,
    slot: usize,
    state: VariableState,
}

/// Resolver: tracks scopes, enforces static rules, and produces the
/// [`Locals`] table for the interpreter.
pub struct Resolver {
    scopes: Vec<HashMap<String, Variable>>,
    locals: Locals,
    errors: Vec<LoxError>,
    current_function: FunctionType,
    current_class: ClassType,
    /// Method names provided by each trait declared so far (own plus
    /// composed).  Index 0 is the global scope; entry `i + 1` pairs with
    /// `scopes[i]`.
    trait_methods: Vec<HashMap<String, HashSet<String>>>,
}

impl Default for Resolver {
    fn default() -> Self {
        Self::new()
    }
}

impl Resolver {
    pub fn new() -> Self {
        info!("Resolver instantiated");

        Resolver {
            scopes: Vec::new(),
            locals: Locals::new(),
            errors: Vec::new(),
            current_function: FunctionType::None,
            current_class: ClassType::None,
            trait_methods: vec![HashMap::new()],
        }
    }

    /// Walk all top‑level statements.  Each call starts from a clean slate,
    /// so resolving the same tree twice yields the same table.
    pub fn resolve(&mut self, statements: &[Stmt]) -> std::result::Result<Locals, Vec<LoxError>> {
        info!(
            "Beginning resolve pass over {} statement(s)",
            statements.len()
        );

        self.scopes.clear();
        self.locals.clear();
        self.errors.clear();
        self.current_function = FunctionType::None;
        self.current_class = ClassType::None;
        self.trait_methods = vec![HashMap::new()];

        for stmt in statements {
            self.resolve_stmt(stmt);
        }

        if self.errors.is_empty() {
            info!("Resolved {} local reference(s)", self.locals.len());
            Ok(std::mem::take(&mut self.locals))
        } else {
            Err(std::mem::take(&mut self.errors))
        }
    }

    /// Resolve a lone expression (REPL evaluation mode).
    pub fn resolve_expression(&mut self, expr: &Expr) -> std::result::Result<Locals, Vec<LoxError>> {
        self.resolve(&[Stmt::Expression(expr.clone())])
    }

    fn error(&mut self, token: &Token, message: &str) {
        self.errors.push(LoxError::resolve(token, message));
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Statement resolution
    // ─────────────────────────────────────────────────────────────────────────

    fn resolve_stmt(&mut self, stmt: &Stmt) {
        match stmt {
            Stmt::Block(statements) => {
                self.begin_scope();
                for s in statements {
                    self.resolve_stmt(s);
                }
                self.end_scope();
            }

            Stmt::Var { name, initializer } => {
                self.declare(name);
                if let Some(expr) = initializer {
                    self.resolve_expr(expr);
                }
                self.define(name);
            }

            Stmt::Function(decl) => {
                // The name is visible inside its own body for recursion.
                if let Some(name) = &decl.name {
                    self.declare(name);
                    self.define(name);
                }
                self.resolve_function(decl, FunctionType::Function);
            }

            Stmt::Expression(expr) | Stmt::Print(expr) => {
                self.resolve_expr(expr);
            }

            Stmt::If {
                condition,
                then_branch,
                else_branch,
            } => {
                self.resolve_expr(condition);
                self.resolve_stmt(then_branch);
                if let Some(eb) = else_branch.as_deref() {
                    self.resolve_stmt(eb);
                }
            }

            Stmt::While { condition, body } => {
                self.resolve_expr(condition);
                self.resolve_stmt(body);
            }

            Stmt::Break(_) => {}

            Stmt::Return { keyword, value } => {
                if self.current_function == FunctionType::None {
                    self.error(keyword, "Can't return from top-level code.");
                }
                if let Some(expr) = value {
                    if self.current_function == FunctionType::Initializer {
                        self.error(keyword, "Can't return a value from an initializer.");
                    }
                    self.resolve_expr(expr);
                }
            }

            Stmt::Class(decl) => self.resolve_class(decl),

            Stmt::Trait(decl) => self.resolve_trait(decl),
        }
    }

    fn resolve_class(&mut self, decl: &ClassDecl) {
        self.declare(&decl.name);
        self.define(&decl.name);

        let enclosing_class = self.current_class;
        self.current_class = ClassType::Class;

        if let Some(superclass) = &decl.superclass {
            if let Expr::Variable { name, .. } = superclass {
                if name.lexeme == decl.name.lexeme {
                    self.error(name, "A class can't inherit from itself.");
                }
            }

            self.current_class = ClassType::Subclass;
            self.resolve_expr(superclass);
        }

        for used in &decl.traits {
            self.resolve_expr(used);
        }
        self.check_composition(&decl.traits, &decl.methods);

        if decl.superclass.is_some() {
            self.begin_scope();
            self.bind_implicit("super", &decl.name);
        }

        self.begin_scope();
        self.bind_implicit("this", &decl.name);

        for method in &decl.methods {
            let kind = if method.display_name() == "init" {
                FunctionType::Initializer
            } else {
                FunctionType::Method
            };
            self.resolve_function(method, kind);
        }

        for method in &decl.class_methods {
            self.resolve_function(method, FunctionType::ClassMethod);
        }

        self.end_scope();

        if decl.superclass.is_some() {
            self.end_scope();
        }

        self.current_class = enclosing_class;
    }

    fn resolve_trait(&mut self, decl: &TraitDecl) {
        self.declare(&decl.name);
        self.define(&decl.name);

        let enclosing_class = self.current_class;
        self.current_class = ClassType::Trait;

        for used in &decl.traits {
            self.resolve_expr(used);
        }
        let provided = self.check_composition(&decl.traits, &decl.methods);
        if let Some(traits) = self.trait_methods.last_mut() {
            traits.insert(decl.name.lexeme.clone(), provided);
        }

        self.begin_scope();
        self.bind_implicit("this", &decl.name);

        for method in &decl.methods {
            let kind = if method.display_name() == "init" {
                FunctionType::Initializer
            } else {
                FunctionType::Method
            };
            self.resolve_function(method, kind);
        }

        self.end_scope();

        self.current_class = enclosing_class;
    }

    /// Flatten the method names of the composed traits known so far and
    /// report collisions: between two traits, or between a trait and a
    /// method the composing body redeclares.  Returns every name the
    /// composition provides.  Traits this pass has not seen are checked
    /// again when the class is built.
    fn check_composition(
        &mut self,
        traits: &[Expr],
        methods: &[Rc<FunctionDecl>],
    ) -> HashSet<String> {
        let mut provided: HashSet<String> = HashSet::new();

        for used in traits {
            let Expr::Variable { name, .. } = used else {
                continue;
            };
            let Some(names) = self.known_trait(&name.lexeme) else {
                continue;
            };

            let mut sorted: Vec<String> = names.into_iter().collect();
            sorted.sort();

            for method in sorted {
                if provided.contains(&method) {
                    self.error(
                        name,
                        &format!("A previous trait declares a method named '{}'.", method),
                    );
                } else {
                    provided.insert(method);
                }
            }
        }

        for method in methods {
            let method_name = method.display_name();
            if provided.contains(method_name) {
                self.error(
                    &method.keyword,
                    &format!("Method '{}' is already provided by a trait.", method_name),
                );
            }
        }

        provided.extend(methods.iter().map(|m| m.display_name().to_string()));
        provided
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Expression resolution
    // ─────────────────────────────────────────────────────────────────────────

    fn resolve_expr(&mut self, expr: &Expr) {
        match expr {
            Expr::Literal(_) => {}

            Expr::Grouping(inner) => self.resolve_expr(inner),

            Expr::Unary { right, .. } => self.resolve_expr(right),

            Expr::Binary { left, right, .. } | Expr::Logical { left, right, .. } => {
                self.resolve_expr(left);
                self.resolve_expr(right);
            }

            Expr::Conditional {
                condition,
                then_branch,
                else_branch,
            } => {
                self.resolve_expr(condition);
                self.resolve_expr(then_branch);
                self.resolve_expr(else_branch);
            }

            Expr::Variable { id, name } => {
                let in_own_initializer = self
                    .scopes
                    .last()
                    .and_then(|scope| scope.get(&name.lexeme))
                    .map(|v| v.state == VariableState::Declared)
                    .unwrap_or(false);

                if in_own_initializer {
                    self.error(name, "Can't read local variable in its own initializer.");
                }

                self.resolve_local(*id, name, true);
            }

            Expr::Assign { id, name, value } => {
                self.resolve_expr(value);
                self.resolve_local(*id, name, false);
            }

            Expr::Call {
                callee, arguments, ..
            } => {
                self.resolve_expr(callee);
                for arg in arguments {
                    self.resolve_expr(arg);
                }
            }

            Expr::Get { object, .. } => self.resolve_expr(object),

            Expr::Set { object, value, .. } => {
                self.resolve_expr(value);
                self.resolve_expr(object);
            }

            Expr::This { id, keyword } => {
                if self.current_class == ClassType::None {
                    self.error(keyword, "Can't use 'this' outside of a class.");
                    return;
                }

                self.resolve_local(*id, keyword, true);
            }

            Expr::Super { id, keyword, .. } => match self.current_class {
                ClassType::None => {
                    self.error(keyword, "Can't use 'super' outside of a class.");
                }
                ClassType::Trait => {
                    self.error(keyword, "Can't use 'super' in a trait.");
                }
                ClassType::Class => {
                    self.error(keyword, "Can't use 'super' in a class with no superclass.");
                }
                ClassType::Subclass => self.resolve_local(*id, keyword, true),
            },

            Expr::Lambda(decl) => self.resolve_function(decl, FunctionType::Function),
        }
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Function helper
    // ─────────────────────────────────────────────────────────────────────────

    /// Enter a fresh scope for a function's parameters + body.  Slot order is
    /// parameters first, then body declarations, matching the call frame.
    fn resolve_function(&mut self, decl: &FunctionDecl, kind: FunctionType) {
        let enclosing = self.current_function;
        self.current_function = kind;

        self.begin_scope();
        for param in &decl.params {
            self.declare(param);
            self.mark_read(param);
        }
        for stmt in &decl.body {
            self.resolve_stmt(stmt);
        }
        self.end_scope();

        self.current_function = enclosing;
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Scope management
    // ─────────────────────────────────────────────────────────────────────────

    #[inline]
    fn begin_scope(&mut self) {
        self.scopes.push(HashMap::new());
        self.trait_methods.push(HashMap::new());
    }

    fn end_scope(&mut self) {
        let Some(scope) = self.scopes.pop() else {
            return;
        };
        self.trait_methods.pop();

        let mut unused: Vec<Variable> = scope
            .into_values()
            .filter(|v| v.state == VariableState::Defined)
            .collect();
        unused.sort_by_key(|v| v.slot);

        for variable in unused {
            self.error(&variable.name, "Local variable is not used.");
        }
    }

    /// Methods of the trait `name` refers to here, if it is a trait this
    /// pass has seen.  The innermost binding of `name` decides.
    fn known_trait(&self, name: &str) -> Option<HashSet<String>> {
        let locals = self.scopes.iter().rev();
        let traits = self.trait_methods.iter().skip(1).rev();

        for (scope, traits) in locals.zip(traits) {
            if scope.contains_key(name) {
                return traits.get(name).cloned();
            }
        }

        self.trait_methods
            .first()
            .and_then(|globals| globals.get(name))
            .cloned()
    }

    /// Bind an implicit name (`this` / `super`) at slot 0 of the innermost scope.
    fn bind_implicit(&mut self, name: &str, at: &Token) {
        if let Some(scope) = self.scopes.last_mut() {
            let slot = scope.len();
            scope.insert(
                name.to_string(),
                Variable {
                    name: Token::synthetic(name, at.line),
                    slot,
                    state: VariableState::Read,
                },
            );
        }
    }

    fn declare(&mut self, name: &Token) {
        // A new binding hides any trait of the same name at this level.
        if let Some(traits) = self.trait_methods.last_mut() {
            traits.remove(&name.lexeme);
        }

        let Some(scope) = self.scopes.last_mut() else {
            return; // global
        };

        if scope.contains_key(&name.lexeme) {
            self.error(name, "Already a variable with this name in this scope.");
            return;
        }

        let slot = scope.len();
        debug!("Declared '{}' at slot {}", name.lexeme, slot);

        scope.insert(
            name.lexeme.clone(),
            Variable {
                name: name.clone(),
                slot,
                state: VariableState::Declared,
            },
        );
    }

    fn define(&mut self, name: &Token) {
        if let Some(variable) = self
            .scopes
            .last_mut()
            .and_then(|scope| scope.get_mut(&name.lexeme))
        {
            if variable.state == VariableState::Declared {
                variable.state = VariableState::Defined;
            }
        }
    }

    /// Define a binding that is exempt from the unused‑local check.
    fn mark_read(&mut self, name: &Token) {
        if let Some(variable) = self
            .scopes
            .last_mut()
            .and_then(|scope| scope.get_mut(&name.lexeme))
        {
            variable.state = VariableState::Read;
        }
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Binding‑distance helper
    // ─────────────────────────────────────────────────────────────────────────

    /// Record this occurrence as a local at `(depth, slot)`, or leave it out
    /// of the table when it is a global.
    fn resolve_local(&mut self, id: ExprId, name: &Token, is_read: bool) {
        for (depth, scope) in self.scopes.iter_mut().rev().enumerate() {
            if let Some(variable) = scope.get_mut(&name.lexeme) {
                debug!(
                    "Resolved '{}' at depth {}, slot {}",
                    name.lexeme, depth, variable.slot
                );

                if is_read && variable.state == VariableState::Defined {
                    variable.state = VariableState::Read;
                }

                self.locals.insert(
                    id,
                    Binding {
                        depth,
                        slot: variable.slot,
                    },
                );
                return;
            }
        }

        debug!("Resolved '{}' as global", name.lexeme);
    }
}
