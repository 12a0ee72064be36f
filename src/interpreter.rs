//! Tree‑walking evaluator.
//!
//! Locals are read and written through the resolver's `(depth, slot)` table;
//! anything absent from that table lives in the flat global namespace.
//! `return` and `break` travel up as [`Flow`] values, never through the
//! error channel, so a runtime error can't be mistaken for either.

use std::cell::RefCell;
use std::collections::HashMap;
use std::io::{self, Write};
use std::rc::Rc;

use log::{debug, info};

use crate::ast::{ClassDecl, Expr, ExprId, FunctionDecl, LiteralValue, Stmt, TraitDecl};
use crate::environment::{EnvId, Environments};
use crate::error::{LoxError, Result};
use crate::resolver::Locals;
use crate::token::{Token, TokenType};
use crate::value::{
    array_index, array_native, clock_native, ArrayOp, Class, Function, Instance, MethodTable,
    Trait, Value,
};

/// How a statement completed.
#[derive(Debug)]
pub enum Flow {
    Normal,
    /// Unwind to the nearest enclosing loop.
    Break,
    /// Unwind to the nearest enclosing call, carrying the result.
    Return(Value),
}

pub struct Interpreter {
    globals: HashMap<String, Value>,
    envs: Environments,
    /// Innermost local frame; `None` while executing at global scope.
    env: Option<EnvId>,
    locals: Locals,
    out: Box<dyn Write>,
}

impl Default for Interpreter {
    fn default() -> Self {
        Self::new()
    }
}

impl Interpreter {
    /// Interpreter printing to standard output.
    pub fn new() -> Self {
        Self::with_output(Box::new(io::stdout()))
    }

    /// Interpreter whose `print` output goes to `out`.
    pub fn with_output(out: Box<dyn Write>) -> Self {
        info!("Initializing Interpreter");

        let mut globals: HashMap<String, Value> = HashMap::new();

        debug!("Defining native function 'clock'");
        globals.insert(
            "clock".to_string(),
            Value::NativeFunction {
                name: "clock",
                arity: 0,
                func: clock_native,
            },
        );

        debug!("Defining native function 'Array'");
        globals.insert(
            "Array".to_string(),
            Value::NativeFunction {
                name: "Array",
                arity: 1,
                func: array_native,
            },
        );

        Self {
            globals,
            envs: Environments::new(),
            env: None,
            locals: Locals::new(),
            out,
        }
    }

    /// Merge a resolution table into the one used for lookups.
    pub fn add_locals(&mut self, locals: Locals) {
        debug!("Adding {} resolved local(s)", locals.len());
        self.locals.extend(locals);
    }

    /// Execute a program.  The first runtime error aborts the run; the
    /// interpreter is left at global scope, ready for the next one.
    pub fn interpret(&mut self, statements: &[Stmt]) -> Result<()> {
        debug!("Interpreting {} statements", statements.len());

        for stmt in statements {
            if let Err(e) = self.execute(stmt) {
                debug!("Runtime error, unwinding to global scope: {}", e);
                self.env = None;
                return Err(e);
            }
        }

        info!(
            "Interpretation completed successfully ({} frame(s) allocated)",
            self.envs.len()
        );
        Ok(())
    }

    /// Write a value the way `print` does.
    pub fn print(&mut self, value: &Value) -> Result<()> {
        writeln!(self.out, "{}", value)?;
        Ok(())
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Statements
    // ─────────────────────────────────────────────────────────────────────────

    fn execute(&mut self, stmt: &Stmt) -> Result<Flow> {
        match stmt {
            Stmt::Expression(expr) => {
                self.evaluate(expr)?;
                Ok(Flow::Normal)
            }

            Stmt::Print(expr) => {
                let value = self.evaluate(expr)?;
                self.print(&value)?;
                debug!("Printed value: {}", value);
                Ok(Flow::Normal)
            }

            Stmt::Var { name, initializer } => {
                let value = match initializer {
                    Some(expr) => self.evaluate(expr)?,
                    None => Value::Nil,
                };
                debug!("Defining variable '{}' = {}", name.lexeme, value);
                self.declare_value(&name.lexeme, value);
                Ok(Flow::Normal)
            }

            Stmt::Block(statements) => {
                let frame = self.envs.alloc(self.env);
                self.execute_block(statements, frame)
            }

            Stmt::If {
                condition,
                then_branch,
                else_branch,
            } => {
                if self.evaluate(condition)?.is_truthy() {
                    self.execute(then_branch)
                } else if let Some(else_stmt) = else_branch {
                    self.execute(else_stmt)
                } else {
                    Ok(Flow::Normal)
                }
            }

            Stmt::While { condition, body } => {
                while self.evaluate(condition)?.is_truthy() {
                    match self.execute(body)? {
                        Flow::Normal => {}
                        Flow::Break => break,
                        returning @ Flow::Return(_) => return Ok(returning),
                    }
                }
                Ok(Flow::Normal)
            }

            Stmt::Break(_) => Ok(Flow::Break),

            Stmt::Function(decl) => {
                let function = Function::new(Rc::clone(decl), self.env, false);
                debug!("Defining function '{}'", function.name());
                self.declare_value(decl.display_name(), Value::Function(Rc::new(function)));
                Ok(Flow::Normal)
            }

            Stmt::Return { value, .. } => {
                let value = match value {
                    Some(expr) => self.evaluate(expr)?,
                    None => Value::Nil,
                };
                Ok(Flow::Return(value))
            }

            Stmt::Class(decl) => {
                self.define_class(decl)?;
                Ok(Flow::Normal)
            }

            Stmt::Trait(decl) => {
                self.define_trait(decl)?;
                Ok(Flow::Normal)
            }
        }
    }

    /// Run `statements` with `env` as the innermost frame, restoring the
    /// previous frame however the block completes.
    fn execute_block(&mut self, statements: &[Stmt], env: EnvId) -> Result<Flow> {
        let previous = self.env.replace(env);
        let mut completion = Ok(Flow::Normal);

        for stmt in statements {
            match self.execute(stmt) {
                Ok(Flow::Normal) => {}
                other => {
                    completion = other;
                    break;
                }
            }
        }

        self.env = previous;
        completion
    }

    /// Bind a new name in the current scope.  Locals take the next slot of
    /// the current frame, matching the order the resolver assigned.
    fn declare_value(&mut self, name: &str, value: Value) {
        match self.env {
            Some(env) => {
                let slot = self.envs.define(env, value);
                debug!("Local '{}' bound to slot {} of {:?}", name, slot, env);
            }
            None => {
                self.globals.insert(name.to_string(), value);
            }
        }
    }

    fn define_class(&mut self, decl: &ClassDecl) -> Result<()> {
        let superclass: Option<Rc<Class>> = match &decl.superclass {
            Some(expr) => match self.evaluate(expr)? {
                Value::Class(class) => Some(class),
                _ => {
                    return Err(LoxError::runtime(
                        header_ref(expr).1,
                        "Superclass must be a class.",
                    ))
                }
            },
            None => None,
        };

        let mut methods: MethodTable = self.compose_traits(&decl.traits, &decl.methods)?;

        let enclosing = self.env;
        if let Some(superclass) = &superclass {
            let frame = self.envs.alloc(self.env);
            self.envs.define(frame, Value::Class(Rc::clone(superclass)));
            self.env = Some(frame);
        }

        for method in &decl.methods {
            let is_initializer = method.display_name() == "init";
            methods.insert(
                method.display_name().to_string(),
                Rc::new(Function::new(Rc::clone(method), self.env, is_initializer)),
            );
        }

        let mut class_methods = MethodTable::new();
        for method in &decl.class_methods {
            class_methods.insert(
                method.display_name().to_string(),
                Rc::new(Function::new(Rc::clone(method), self.env, false)),
            );
        }

        self.env = enclosing;

        let metaclass = Class::new(
            format!("{} metaclass", decl.name.lexeme),
            superclass.as_ref().and_then(|s| s.metaclass.clone()),
            class_methods,
            None,
        );
        let class = Class::new(
            decl.name.lexeme.clone(),
            superclass,
            methods,
            Some(Rc::new(metaclass)),
        );

        info!("Class '{}' defined", class.name);
        self.declare_value(&decl.name.lexeme, Value::Class(Rc::new(class)));
        Ok(())
    }

    fn define_trait(&mut self, decl: &TraitDecl) -> Result<()> {
        let mut methods: MethodTable = self.compose_traits(&decl.traits, &decl.methods)?;

        for method in &decl.methods {
            let is_initializer = method.display_name() == "init";
            methods.insert(
                method.display_name().to_string(),
                Rc::new(Function::new(Rc::clone(method), self.env, is_initializer)),
            );
        }

        let tr = Trait {
            name: decl.name.lexeme.clone(),
            methods,
        };

        info!("Trait '{}' defined with {} method(s)", tr.name, tr.methods.len());
        self.declare_value(&decl.name.lexeme, Value::Trait(Rc::new(tr)));
        Ok(())
    }

    /// Flatten the methods of `traits` into one table.  Two traits providing
    /// the same name, or a body method redeclaring a trait method, is an error.
    fn compose_traits(
        &mut self,
        traits: &[Expr],
        methods: &[Rc<FunctionDecl>],
    ) -> Result<MethodTable> {
        let mut composed = MethodTable::new();

        for expr in traits {
            let (trait_name, line) = header_ref(expr);
            let used: Rc<Trait> = match self.evaluate(expr)? {
                Value::Trait(used) => used,
                _ => {
                    return Err(LoxError::runtime(
                        line,
                        format!("'{}' is not a trait.", trait_name),
                    ))
                }
            };

            let mut names: Vec<&String> = used.methods.keys().collect();
            names.sort();

            for name in names {
                if composed.contains_key(name) {
                    return Err(LoxError::runtime(
                        line,
                        format!("A previous trait declares a method named '{}'.", name),
                    ));
                }
                if let Some(method) = used.methods.get(name) {
                    composed.insert(name.clone(), Rc::clone(method));
                }
            }
        }

        for method in methods {
            if composed.contains_key(method.display_name()) {
                return Err(LoxError::runtime(
                    method.keyword.line,
                    format!(
                        "Method '{}' is already provided by a trait.",
                        method.display_name()
                    ),
                ));
            }
        }

        Ok(composed)
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Expressions
    // ─────────────────────────────────────────────────────────────────────────

    /// Evaluates an expression and returns a Value.
    pub fn evaluate(&mut self, expr: &Expr) -> Result<Value> {
        match expr {
            Expr::Literal(literal) => Ok(match literal {
                LiteralValue::Number(n) => Value::Number(*n),
                LiteralValue::Str(s) => Value::String(s.clone()),
                LiteralValue::True => Value::Bool(true),
                LiteralValue::False => Value::Bool(false),
                LiteralValue::Nil => Value::Nil,
            }),

            Expr::Grouping(inner) => self.evaluate(inner),

            Expr::Unary { operator, right } => {
                let right = self.evaluate(right)?;
                match operator.token_type {
                    TokenType::MINUS => match right {
                        Value::Number(n) => Ok(Value::Number(-n)),
                        _ => Err(LoxError::runtime(operator.line, "Operand must be a number.")),
                    },
                    TokenType::BANG => Ok(Value::Bool(!right.is_truthy())),
                    _ => Err(LoxError::runtime(
                        operator.line,
                        format!("Invalid unary operator '{}'.", operator.lexeme),
                    )),
                }
            }

            Expr::Binary {
                left,
                operator,
                right,
            } => {
                let left = self.evaluate(left)?;
                let right = self.evaluate(right)?;
                binary(operator, left, right)
            }

            Expr::Logical {
                left,
                operator,
                right,
            } => {
                let left = self.evaluate(left)?;
                let short_circuits = if operator.token_type == TokenType::OR {
                    left.is_truthy()
                } else {
                    !left.is_truthy()
                };

                if short_circuits {
                    Ok(left)
                } else {
                    self.evaluate(right)
                }
            }

            Expr::Conditional {
                condition,
                then_branch,
                else_branch,
            } => {
                if self.evaluate(condition)?.is_truthy() {
                    self.evaluate(then_branch)
                } else {
                    self.evaluate(else_branch)
                }
            }

            Expr::Variable { id, name } => self.look_up_variable(*id, name),

            Expr::Assign { id, name, value } => {
                let value = self.evaluate(value)?;
                self.assign_variable(*id, name, value.clone())?;
                Ok(value)
            }

            Expr::Call {
                callee,
                paren,
                arguments,
            } => {
                let callee = self.evaluate(callee)?;

                let mut args: Vec<Value> = Vec::with_capacity(arguments.len());
                for arg in arguments {
                    args.push(self.evaluate(arg)?);
                }

                self.call_value(&callee, paren, args)
            }

            Expr::Get { object, name } => {
                let object = self.evaluate(object)?;
                self.get_property(object, name)
            }

            Expr::Set {
                object,
                name,
                value,
            } => {
                let object = self.evaluate(object)?;
                match object {
                    Value::Instance(instance) => {
                        let value = self.evaluate(value)?;
                        instance
                            .borrow_mut()
                            .fields
                            .insert(name.lexeme.clone(), value.clone());
                        Ok(value)
                    }
                    Value::Class(class) => {
                        let value = self.evaluate(value)?;
                        class
                            .fields
                            .borrow_mut()
                            .insert(name.lexeme.clone(), value.clone());
                        Ok(value)
                    }
                    Value::Array(_) => Err(LoxError::runtime(
                        name.line,
                        "Can't add properties to arrays.",
                    )),
                    _ => Err(LoxError::runtime(name.line, "Only instances have fields.")),
                }
            }

            Expr::This { id, keyword } => self.look_up_variable(*id, keyword),

            Expr::Super {
                id,
                keyword,
                method,
            } => self.super_method(*id, keyword, method),

            Expr::Lambda(decl) => {
                let function = Function::new(Rc::clone(decl), self.env, false);
                Ok(Value::Function(Rc::new(function)))
            }
        }
    }

    fn look_up_variable(&self, id: ExprId, name: &Token) -> Result<Value> {
        if let (Some(binding), Some(env)) = (self.locals.get(&id), self.env) {
            return self.envs.get_at(env, binding.depth, binding.slot, name.line);
        }

        self.globals.get(&name.lexeme).cloned().ok_or_else(|| {
            LoxError::runtime(name.line, format!("Undefined variable '{}'.", name.lexeme))
        })
    }

    fn assign_variable(&mut self, id: ExprId, name: &Token, value: Value) -> Result<()> {
        if let (Some(binding), Some(env)) = (self.locals.get(&id).copied(), self.env) {
            return self
                .envs
                .assign_at(env, binding.depth, binding.slot, value, name.line);
        }

        match self.globals.get_mut(&name.lexeme) {
            Some(slot) => {
                *slot = value;
                Ok(())
            }
            None => Err(LoxError::runtime(
                name.line,
                format!("Undefined variable '{}'.", name.lexeme),
            )),
        }
    }

    fn get_property(&mut self, object: Value, name: &Token) -> Result<Value> {
        match object {
            Value::Instance(instance) => {
                let field = instance.borrow().fields.get(&name.lexeme).cloned();
                if let Some(value) = field {
                    return Ok(value);
                }

                let class = Rc::clone(&instance.borrow().class);
                match class.find_method(&name.lexeme) {
                    Some(method) => {
                        let bound = method.bind(Value::Instance(instance), &mut self.envs);
                        Ok(Value::Function(Rc::new(bound)))
                    }
                    None => Err(undefined_property(name)),
                }
            }

            Value::Class(class) => {
                let field = class.fields.borrow().get(&name.lexeme).cloned();
                if let Some(value) = field {
                    return Ok(value);
                }

                match class.find_class_method(&name.lexeme) {
                    Some(method) => {
                        let bound = method.bind(Value::Class(Rc::clone(&class)), &mut self.envs);
                        Ok(Value::Function(Rc::new(bound)))
                    }
                    None => Err(undefined_property(name)),
                }
            }

            Value::Array(array) => match name.lexeme.as_str() {
                "length" => Ok(Value::Number(array.borrow().len() as f64)),
                "get" => Ok(Value::ArrayMethod {
                    array,
                    op: ArrayOp::Get,
                }),
                "set" => Ok(Value::ArrayMethod {
                    array,
                    op: ArrayOp::Set,
                }),
                _ => Err(undefined_property(name)),
            },

            _ => Err(LoxError::runtime(name.line, "Only instances have properties.")),
        }
    }

    /// `super.method`: the superclass sits in the frame the resolver
    /// recorded, and `this` one frame closer.
    fn super_method(&mut self, id: ExprId, keyword: &Token, method: &Token) -> Result<Value> {
        let (binding, env) = match (self.locals.get(&id).copied(), self.env) {
            (Some(binding), Some(env)) => (binding, env),
            _ => {
                return Err(LoxError::runtime(
                    keyword.line,
                    "Can't use 'super' outside of a subclass.",
                ))
            }
        };

        let superclass = match self
            .envs
            .get_at(env, binding.depth, binding.slot, keyword.line)?
        {
            Value::Class(class) => class,
            _ => return Err(LoxError::runtime(keyword.line, "Superclass must be a class.")),
        };

        let this_depth = binding.depth.checked_sub(1).ok_or_else(|| {
            LoxError::runtime(keyword.line, "No 'this' frame below 'super'.")
        })?;
        let this = self.envs.get_at(env, this_depth, 0, keyword.line)?;

        let found = match &this {
            Value::Class(_) => superclass.find_class_method(&method.lexeme),
            _ => superclass.find_method(&method.lexeme),
        };

        match found {
            Some(function) => {
                let bound = function.bind(this, &mut self.envs);
                Ok(Value::Function(Rc::new(bound)))
            }
            None => Err(undefined_property(method)),
        }
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Calls
    // ─────────────────────────────────────────────────────────────────────────

    fn call_value(&mut self, callee: &Value, paren: &Token, args: Vec<Value>) -> Result<Value> {
        match callee {
            Value::NativeFunction { name, arity, func } => {
                check_arity(*arity, args.len(), paren)?;
                debug!("Calling native function '{}'", name);
                func(&args).map_err(|message| LoxError::runtime(paren.line, message))
            }

            Value::Function(function) => {
                check_arity(function.arity(), args.len(), paren)?;
                self.call_function(function, args, paren.line)
            }

            Value::Class(class) => {
                check_arity(class.arity(), args.len(), paren)?;

                let instance = Rc::new(RefCell::new(Instance::new(Rc::clone(class))));
                if let Some(init) = class.find_method("init") {
                    let bound = init.bind(Value::Instance(Rc::clone(&instance)), &mut self.envs);
                    self.call_function(&bound, args, paren.line)?;
                }

                debug!("Instantiated '{}'", class.name);
                Ok(Value::Instance(instance))
            }

            Value::ArrayMethod { array, op } => {
                check_arity(op.arity(), args.len(), paren)?;

                let len = array.borrow().len();
                let index = array_index(&args[0], len)
                    .map_err(|message| LoxError::runtime(paren.line, message))?;

                match op {
                    ArrayOp::Get => Ok(array.borrow()[index].clone()),
                    ArrayOp::Set => {
                        let value = args[1].clone();
                        array.borrow_mut()[index] = value.clone();
                        Ok(value)
                    }
                }
            }

            _ => Err(LoxError::runtime(
                paren.line,
                "Can only call functions and classes.",
            )),
        }
    }

    /// One fresh frame enclosing the closure (not the caller), parameters
    /// bound positionally.
    fn call_function(&mut self, function: &Function, args: Vec<Value>, line: usize) -> Result<Value> {
        debug!("Calling function '{}'", function.name());

        let frame = self.envs.alloc(function.closure);
        for arg in args {
            self.envs.define(frame, arg);
        }

        let completion = self.execute_block(&function.decl.body, frame)?;

        if function.is_initializer {
            let closure = function.closure.ok_or_else(|| {
                LoxError::runtime(line, "Initializer called without a bound instance.")
            })?;
            return self.envs.get_at(closure, 0, 0, line);
        }

        match completion {
            Flow::Return(value) => Ok(value),
            Flow::Normal | Flow::Break => Ok(Value::Nil),
        }
    }
}

fn check_arity(expected: usize, got: usize, paren: &Token) -> Result<()> {
    if expected == got {
        Ok(())
    } else {
        Err(LoxError::runtime(
            paren.line,
            format!("Expected {} arguments but got {}.", expected, got),
        ))
    }
}

fn undefined_property(name: &Token) -> LoxError {
    LoxError::runtime(name.line, format!("Undefined property '{}'.", name.lexeme))
}

/// Name and line of a superclass or trait reference in a declaration header.
fn header_ref(expr: &Expr) -> (&str, usize) {
    match expr {
        Expr::Variable { name, .. } => (name.lexeme.as_str(), name.line),
        _ => ("<expression>", 0),
    }
}

fn numbers(operator: &Token, left: &Value, right: &Value) -> Result<(f64, f64)> {
    match (left, right) {
        (Value::Number(a), Value::Number(b)) => Ok((*a, *b)),
        _ => Err(LoxError::runtime(operator.line, "Operands must be numbers.")),
    }
}

fn binary(operator: &Token, left: Value, right: Value) -> Result<Value> {
    match operator.token_type {
        TokenType::COMMA => Ok(right),

        TokenType::PLUS => match (left, right) {
            (Value::Number(a), Value::Number(b)) => Ok(Value::Number(a + b)),
            (Value::String(a), other) => Ok(Value::String(format!("{}{}", a, other))),
            (other, Value::String(b)) => Ok(Value::String(format!("{}{}", other, b))),
            _ => Err(LoxError::runtime(
                operator.line,
                "Operands must be two numbers or at least one string.",
            )),
        },

        TokenType::MINUS => {
            let (a, b) = numbers(operator, &left, &right)?;
            Ok(Value::Number(a - b))
        }

        TokenType::STAR => {
            let (a, b) = numbers(operator, &left, &right)?;
            Ok(Value::Number(a * b))
        }

        TokenType::SLASH => {
            let (a, b) = numbers(operator, &left, &right)?;
            if b == 0.0 {
                return Err(LoxError::runtime(operator.line, "Division by zero."));
            }
            Ok(Value::Number(a / b))
        }

        TokenType::GREATER => {
            let (a, b) = numbers(operator, &left, &right)?;
            Ok(Value::Bool(a > b))
        }

        TokenType::GREATER_EQUAL => {
            let (a, b) = numbers(operator, &left, &right)?;
            Ok(Value::Bool(a >= b))
        }

        TokenType::LESS => {
            let (a, b) = numbers(operator, &left, &right)?;
            Ok(Value::Bool(a < b))
        }

        TokenType::LESS_EQUAL => {
            let (a, b) = numbers(operator, &left, &right)?;
            Ok(Value::Bool(a <= b))
        }

        TokenType::EQUAL_EQUAL => Ok(Value::Bool(left == right)),

        TokenType::BANG_EQUAL => Ok(Value::Bool(left != right)),

        _ => Err(LoxError::runtime(
            operator.line,
            format!("Invalid binary operator '{}'.", operator.lexeme),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn op(token_type: TokenType, lexeme: &str) -> Token {
        Token::new(token_type, lexeme, 1)
    }

    #[test]
    fn plus_stringifies_the_other_operand() {
        let plus = op(TokenType::PLUS, "+");

        let joined = binary(&plus, Value::String("n=".into()), Value::Number(3.0));
        assert!(matches!(joined, Ok(Value::String(s)) if s == "n=3"));

        let joined = binary(&plus, Value::Bool(true), Value::String("!".into()));
        assert!(matches!(joined, Ok(Value::String(s)) if s == "true!"));

        assert!(binary(&plus, Value::Nil, Value::Number(1.0)).is_err());
    }

    #[test]
    fn division_by_zero_is_an_error() {
        let slash = op(TokenType::SLASH, "/");

        let err = binary(&slash, Value::Number(1.0), Value::Number(0.0))
            .expect_err("division by zero");
        assert_eq!(err.to_string(), "Division by zero.\n[line 1]");
    }

    #[test]
    fn comparisons_need_numbers() {
        let less = op(TokenType::LESS, "<");

        assert!(matches!(
            binary(&less, Value::Number(1.0), Value::Number(2.0)),
            Ok(Value::Bool(true))
        ));
        assert!(binary(&less, Value::String("a".into()), Value::Number(2.0)).is_err());
    }

    #[test]
    fn comma_yields_the_right_operand() {
        let comma = op(TokenType::COMMA, ",");

        assert!(matches!(
            binary(&comma, Value::Number(1.0), Value::Number(2.0)),
            Ok(Value::Number(n)) if n == 2.0
        ));
    }
}
