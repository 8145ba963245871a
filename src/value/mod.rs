//! Values and exports objects
//!
//! Module factories exchange dynamically shaped data. This module models just
//! enough of it: a small [`Value`] type and the [`Exports`] container every
//! module record owns.
//!
//! An exports object is a shared, mutable mapping. Its identity never changes
//! after creation, so a module that is still evaluating can hand out its
//! exports to a circular dependent and that dependent observes every binding
//! added later. Bindings are either plain values or getters, the latter giving
//! ES-module style live bindings.

use crate::error::Result;
use bitflags::bitflags;
use rustc_hash::FxHashMap as HashMap;
use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

/// A function value implemented by module code
pub type NativeFunction = Rc<dyn Fn(&[Value]) -> Result<Value>>;

/// A lazily evaluated export binding
pub type Getter = Rc<dyn Fn() -> Value>;

/// Wrap a closure as an export getter
pub fn getter<F>(f: F) -> Getter
where
    F: Fn() -> Value + 'static,
{
    Rc::new(f)
}

/// Wrap a closure as a callable value
pub fn function<F>(f: F) -> Value
where
    F: Fn(&[Value]) -> Result<Value> + 'static,
{
    Value::Function(Rc::new(f))
}

/// A dynamically typed value
#[derive(Clone, Default)]
pub enum Value {
    #[default]
    Undefined,
    Null,
    Boolean(bool),
    Number(f64),
    String(String),
    /// Another module's exports (or a namespace built over them)
    Object(Exports),
    Function(NativeFunction),
}

impl Value {
    pub fn is_undefined(&self) -> bool {
        matches!(self, Value::Undefined)
    }

    pub fn as_number(&self) -> Option<f64> {
        match self {
            Value::Number(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Boolean(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_object(&self) -> Option<&Exports> {
        match self {
            Value::Object(exports) => Some(exports),
            _ => None,
        }
    }

    /// Call a function value
    pub fn call(&self, args: &[Value]) -> Result<Value> {
        match self {
            Value::Function(f) => f(args),
            other => Err(crate::Error::thrown(format!(
                "TypeError: {} is not a function",
                other.type_name()
            ))),
        }
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Undefined => "undefined",
            Value::Null => "null",
            Value::Boolean(_) => "boolean",
            Value::Number(_) => "number",
            Value::String(_) => "string",
            Value::Object(_) => "object",
            Value::Function(_) => "function",
        }
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Undefined => write!(f, "undefined"),
            Value::Null => write!(f, "null"),
            Value::Boolean(b) => write!(f, "{}", b),
            Value::Number(n) => write!(f, "{}", n),
            Value::String(s) => write!(f, "{:?}", s),
            Value::Object(exports) => write!(f, "[object {:?}]", exports.names()),
            Value::Function(_) => write!(f, "[function]"),
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Undefined, Value::Undefined) => true,
            (Value::Null, Value::Null) => true,
            (Value::Boolean(a), Value::Boolean(b)) => a == b,
            (Value::Number(a), Value::Number(b)) => a == b,
            (Value::String(a), Value::String(b)) => a == b,
            (Value::Object(a), Value::Object(b)) => a.ptr_eq(b),
            (Value::Function(a), Value::Function(b)) => Rc::ptr_eq(a, b),
            _ => false,
        }
    }
}

impl From<f64> for Value {
    fn from(n: f64) -> Self {
        Value::Number(n)
    }
}

impl From<i32> for Value {
    fn from(n: i32) -> Self {
        Value::Number(n as f64)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Boolean(b)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(s)
    }
}

impl From<Exports> for Value {
    fn from(exports: Exports) -> Self {
        Value::Object(exports)
    }
}

bitflags! {
    /// Interop markers carried by an exports object
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct ExportFlags: u8 {
        /// Exports were declared ES-module style (`__esModule`)
        const ES_MODULE = 0b0000_0001;
        /// A synthetic namespace built over another module's exports
        const NAMESPACE = 0b0000_0010;
    }
}

#[derive(Clone)]
enum Binding {
    Value(Value),
    Getter(Getter),
}

#[derive(Default)]
struct ExportsInner {
    bindings: HashMap<String, Binding>,
    /// Binding names in definition order
    names: Vec<String>,
    flags: ExportFlags,
    /// Whole-module value (`module.exports = value`)
    value: Option<Value>,
}

/// A module's exports object
///
/// Cloning an `Exports` clones the handle, not the bindings.
#[derive(Clone, Default)]
pub struct Exports(Rc<RefCell<ExportsInner>>);

impl Exports {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether two handles refer to the same exports object
    pub fn ptr_eq(&self, other: &Exports) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }

    pub fn flags(&self) -> ExportFlags {
        self.0.borrow().flags
    }

    pub fn is_es_module(&self) -> bool {
        self.flags().contains(ExportFlags::ES_MODULE)
    }

    pub fn is_namespace(&self) -> bool {
        self.flags().contains(ExportFlags::NAMESPACE)
    }

    pub(crate) fn insert_flags(&self, flags: ExportFlags) {
        self.0.borrow_mut().flags.insert(flags);
    }

    /// Set a named export to a plain value
    pub fn set(&self, name: impl Into<String>, value: impl Into<Value>) {
        self.bind(name.into(), Binding::Value(value.into()));
    }

    /// Define a named export backed by a getter
    pub fn define_getter(&self, name: impl Into<String>, getter: Getter) {
        self.bind(name.into(), Binding::Getter(getter));
    }

    fn bind(&self, name: String, binding: Binding) {
        let mut inner = self.0.borrow_mut();
        if inner.bindings.insert(name.clone(), binding).is_none() {
            inner.names.push(name);
        }
    }

    /// Read a named export, evaluating its getter if it has one
    pub fn get(&self, name: &str) -> Value {
        // The getter may read this exports object again.
        let binding = self.0.borrow().bindings.get(name).cloned();
        match binding {
            Some(Binding::Value(value)) => value,
            Some(Binding::Getter(getter)) => getter(),
            None => Value::Undefined,
        }
    }

    pub fn has(&self, name: &str) -> bool {
        self.0.borrow().bindings.contains_key(name)
    }

    /// Names of all bindings, in definition order
    pub fn names(&self) -> Vec<String> {
        self.0.borrow().names.clone()
    }

    pub fn len(&self) -> usize {
        self.0.borrow().names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0 && self.0.borrow().value.is_none()
    }

    /// Replace the whole-module value without changing the object's identity
    pub fn set_value(&self, value: Value) {
        self.0.borrow_mut().value = Some(value);
    }

    /// The whole-module value, if one was exported
    pub fn value(&self) -> Option<Value> {
        self.0.borrow().value.clone()
    }

    /// The value a default-style import of this object resolves to
    pub fn as_value(&self) -> Value {
        self.value().unwrap_or_else(|| Value::Object(self.clone()))
    }
}

impl fmt::Debug for Exports {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.0.borrow();
        f.debug_struct("Exports")
            .field("names", &inner.names)
            .field("flags", &inner.flags)
            .field("has_value", &inner.value.is_some())
            .finish()
    }
}

/// Build (or top up) a namespace view over non-ES-module exports
///
/// Every named export of `raw` becomes a live getter on `ns`. `default`
/// resolves to the whole of `raw`, unless `allow_export_default` is set and
/// `raw` carries its own `default` export.
pub fn interop_namespace(raw: &Exports, ns: &Exports, allow_export_default: bool) {
    ns.insert_flags(ExportFlags::ES_MODULE | ExportFlags::NAMESPACE);
    for name in raw.names() {
        if name == "default" || ns.has(&name) {
            continue;
        }
        let source = raw.clone();
        let key = name.clone();
        ns.define_getter(name, getter(move || source.get(&key)));
    }
    // Rebound on every top-up: `raw` may have gained its own default since.
    let source = raw.clone();
    if allow_export_default && raw.has("default") {
        ns.define_getter("default", getter(move || source.get("default")));
    } else {
        ns.define_getter("default", getter(move || source.as_value()));
    }
}
