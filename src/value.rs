//! Runtime values and the object model: functions (closures), classes with
//! their metaclasses, instances, traits and the native arrays.

use std::cell::RefCell;
use std::collections::HashMap;
use std::fmt;
use std::rc::Rc;
use std::sync::OnceLock;
use std::time::Instant;

use log::debug;

use crate::ast::FunctionDecl;
use crate::environment::{EnvId, Environments};

/// Signature of a host function exposed to scripts.
pub type NativeFn = fn(&[Value]) -> Result<Value, String>;

/// Shared, mutable backing storage of an `Array(n)` value.
pub type ArrayRef = Rc<RefCell<Vec<Value>>>;

#[derive(Clone)]
pub enum Value {
    NativeFunction {
        name: &'static str,
        arity: usize,
        func: NativeFn,
    },
    Function(Rc<Function>),
    Class(Rc<Class>),
    Instance(Rc<RefCell<Instance>>),
    Trait(Rc<Trait>),
    Array(ArrayRef),
    /// `array.get` / `array.set` looked up on a specific array.
    ArrayMethod {
        array: ArrayRef,
        op: ArrayOp,
    },
    Number(f64),
    String(String),
    Bool(bool),
    Nil,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArrayOp {
    Get,
    Set,
}

impl ArrayOp {
    pub fn arity(self) -> usize {
        match self {
            ArrayOp::Get => 1,
            ArrayOp::Set => 2,
        }
    }
}

impl Value {
    /// `nil` and `false` are falsy; everything else is truthy.
    pub fn is_truthy(&self) -> bool {
        !matches!(self, Value::Nil | Value::Bool(false))
    }
}

impl PartialEq for Value {
    /// No implicit conversions; reference types compare by identity.
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Nil, Value::Nil) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Number(a), Value::Number(b)) => a == b,
            (Value::String(a), Value::String(b)) => a == b,
            (Value::NativeFunction { name: a, .. }, Value::NativeFunction { name: b, .. }) => {
                a == b
            }
            (Value::Function(a), Value::Function(b)) => Rc::ptr_eq(a, b),
            (Value::Class(a), Value::Class(b)) => Rc::ptr_eq(a, b),
            (Value::Instance(a), Value::Instance(b)) => Rc::ptr_eq(a, b),
            (Value::Trait(a), Value::Trait(b)) => Rc::ptr_eq(a, b),
            (Value::Array(a), Value::Array(b)) => Rc::ptr_eq(a, b),
            (
                Value::ArrayMethod { array: a, op: x },
                Value::ArrayMethod { array: b, op: y },
            ) => Rc::ptr_eq(a, b) && x == y,
            _ => false,
        }
    }
}

/// Numbers print without a trailing `.0` when integral.
fn format_number(f: &mut fmt::Formatter<'_>, n: f64) -> fmt::Result {
    if n.is_finite() && n.fract() == 0.0 {
        write!(f, "{:.0}", n)
    } else {
        write!(f, "{}", n)
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::NativeFunction { name, .. } => write!(f, "<native fn {}>", name),

            Value::Function(function) => write!(f, "<fn {}>", function.name()),

            Value::Class(class) => write!(f, "{}", class.name),

            Value::Instance(instance) => write!(f, "{} instance", instance.borrow().class.name),

            Value::Trait(t) => write!(f, "{}", t.name),

            Value::Array(elements) => {
                write!(f, "[ ")?;
                for (i, element) in elements.borrow().iter().enumerate() {
                    if i > 0 {
                        write!(f, " , ")?;
                    }
                    match element {
                        Value::String(s) => write!(f, "'{}'", s)?,
                        other => write!(f, "{}", other)?,
                    }
                }
                write!(f, " ]")
            }

            Value::ArrayMethod { op, .. } => match op {
                ArrayOp::Get => write!(f, "<native fn get>"),
                ArrayOp::Set => write!(f, "<native fn set>"),
            },

            Value::Number(n) => format_number(f, *n),

            Value::String(s) => write!(f, "{}", s),

            Value::Bool(b) => write!(f, "{}", b),

            Value::Nil => write!(f, "nil"),
        }
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::String(s) => write!(f, "{:?}", s),
            other => write!(f, "{}", other),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Functions
// ─────────────────────────────────────────────────────────────────────────────

/// A closure: declaration plus the frame active where it was created.
#[derive(Debug)]
pub struct Function {
    pub decl: Rc<FunctionDecl>,
    /// `None` when declared at global scope.
    pub closure: Option<EnvId>,
    pub is_initializer: bool,
}

impl Function {
    pub fn new(decl: Rc<FunctionDecl>, closure: Option<EnvId>, is_initializer: bool) -> Self {
        Self {
            decl,
            closure,
            is_initializer,
        }
    }

    pub fn arity(&self) -> usize {
        self.decl.params.len()
    }

    pub fn name(&self) -> &str {
        self.decl.display_name()
    }

    /// Derive a method bound to `this`: a fresh frame enclosing the original
    /// closure, holding `this` in slot 0.
    pub fn bind(&self, this: Value, envs: &mut Environments) -> Function {
        let frame = envs.alloc(self.closure);
        envs.define(frame, this);

        debug!("Bound method '{}' in frame {:?}", self.name(), frame);

        Function {
            decl: Rc::clone(&self.decl),
            closure: Some(frame),
            is_initializer: self.is_initializer,
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Classes, instances and traits
// ─────────────────────────────────────────────────────────────────────────────

pub type MethodTable = HashMap<String, Rc<Function>>;

pub struct Class {
    pub name: String,
    pub superclass: Option<Rc<Class>>,
    pub methods: MethodTable,
    /// Holds the class‑level methods; `None` on a metaclass itself.
    pub metaclass: Option<Rc<Class>>,
    /// Properties assigned directly on the class value.
    pub fields: RefCell<HashMap<String, Value>>,
}

impl fmt::Debug for Class {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Class")
            .field("name", &self.name)
            .field(
                "superclass",
                &self.superclass.as_ref().map(|c| c.name.clone()),
            )
            .field("methods", &self.methods.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl Class {
    pub fn new(
        name: String,
        superclass: Option<Rc<Class>>,
        methods: MethodTable,
        metaclass: Option<Rc<Class>>,
    ) -> Self {
        Self {
            name,
            superclass,
            methods,
            metaclass,
            fields: RefCell::new(HashMap::new()),
        }
    }

    /// Own methods first, then up the superclass chain.
    pub fn find_method(&self, name: &str) -> Option<Rc<Function>> {
        self.methods.get(name).cloned().or_else(|| {
            self.superclass
                .as_ref()
                .and_then(|superclass| superclass.find_method(name))
        })
    }

    /// Class‑level method lookup through the metaclass chain.
    pub fn find_class_method(&self, name: &str) -> Option<Rc<Function>> {
        self.metaclass
            .as_ref()
            .and_then(|meta| meta.find_method(name))
    }

    /// Calling a class takes the arguments of its `init`, if any.
    pub fn arity(&self) -> usize {
        self.find_method("init").map(|init| init.arity()).unwrap_or(0)
    }
}

pub struct Instance {
    pub class: Rc<Class>,
    pub fields: HashMap<String, Value>,
}

impl fmt::Debug for Instance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Instance")
            .field("class", &self.class.name)
            .field("fields", &self.fields.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl Instance {
    pub fn new(class: Rc<Class>) -> Self {
        Self {
            class,
            fields: HashMap::new(),
        }
    }
}

/// A named bundle of methods copied into the classes and traits using it.
#[derive(Debug)]
pub struct Trait {
    pub name: String,
    pub methods: MethodTable,
}

// ─────────────────────────────────────────────────────────────────────────────
// Native functions
// ─────────────────────────────────────────────────────────────────────────────

static START: OnceLock<Instant> = OnceLock::new();

/// `clock()`: seconds elapsed on a monotonic clock.
pub fn clock_native(_args: &[Value]) -> Result<Value, String> {
    let start: &Instant = START.get_or_init(Instant::now);

    Ok(Value::Number(start.elapsed().as_secs_f64()))
}

const MAX_ARRAY_SIZE: f64 = u32::MAX as f64;

/// `Array(size)`: a fixed‑size array filled with `nil`.
pub fn array_native(args: &[Value]) -> Result<Value, String> {
    match args.first() {
        Some(Value::Number(n)) if *n >= 0.0 && n.fract() == 0.0 => {
            if *n > MAX_ARRAY_SIZE {
                return Err("Array size too large.".to_string());
            }

            let size = *n as usize;
            let mut elements: Vec<Value> = Vec::new();
            elements
                .try_reserve_exact(size)
                .map_err(|_| "Array size too large.".to_string())?;
            elements.resize(size, Value::Nil);

            Ok(Value::Array(Rc::new(RefCell::new(elements))))
        }
        _ => Err("Array size must be a non-negative integer.".to_string()),
    }
}

/// Validate an array index argument against `len`.
pub fn array_index(index: &Value, len: usize) -> Result<usize, String> {
    match index {
        Value::Number(n) if n.fract() == 0.0 => {
            if *n < 0.0 {
                Err("Array index can't be negative.".to_string())
            } else if *n as usize >= len {
                Err("Invalid array index.".to_string())
            } else {
                Ok(*n as usize)
            }
        }
        _ => Err("Array index must be an integer.".to_string()),
    }
}
