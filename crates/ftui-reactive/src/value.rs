#![forbid(unsafe_code)]

//! Dynamic values observed by the engine.
//!
//! [`Value`] is a closed variant over scalars and two shared container
//! kinds. Containers ([`ObjectRef`], [`ArrayRef`]) have reference identity:
//! cloning a `Value::Object` clones the handle, not the contents.
//!
//! # Equality
//!
//! `PartialEq` is strict equality: scalars compare by value (so `NaN` is never
//! equal to itself) and containers compare by identity. [`Value::same_value`]
//! additionally treats two NaNs as equal; that is the rule tracked-field
//! setters use to skip no-op writes.

use std::cell::Cell;
use std::fmt;
use std::rc::Rc;

use crate::array::ArrayRef;
use crate::object::ObjectRef;
use crate::observer::Observer;

/// A dynamically-typed value.
#[derive(Clone, Default)]
pub enum Value {
    /// Absent or undefined.
    #[default]
    Null,
    Bool(bool),
    Number(f64),
    Str(Rc<str>),
    /// Shared keyed container.
    Object(ObjectRef),
    /// Shared sequence container.
    Array(ArrayRef),
}

impl Value {
    /// Build an object value from key/value pairs, preserving order.
    pub fn object<K, I>(entries: I) -> Self
    where
        K: Into<Rc<str>>,
        I: IntoIterator<Item = (K, Value)>,
    {
        Self::Object(ObjectRef::from_entries(entries))
    }

    /// A new empty object value.
    #[must_use]
    pub fn empty_object() -> Self {
        Self::Object(ObjectRef::new())
    }

    /// Build an array value from items.
    pub fn array(items: impl IntoIterator<Item = Value>) -> Self {
        Self::Array(ArrayRef::from_vec(items.into_iter().collect()))
    }

    #[must_use]
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// True for objects and arrays.
    #[must_use]
    pub fn is_container(&self) -> bool {
        matches!(self, Self::Object(_) | Self::Array(_))
    }

    #[must_use]
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Number(n) => Some(*n),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(b) => Some(*b),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Str(s) => Some(s),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_object(&self) -> Option<&ObjectRef> {
        match self {
            Self::Object(obj) => Some(obj),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_array(&self) -> Option<&ArrayRef> {
        match self {
            Self::Array(arr) => Some(arr),
            _ => None,
        }
    }

    /// Read a field of an object value. Tracked when the field is.
    ///
    /// Returns `Null` for missing keys and non-object values.
    #[must_use]
    pub fn get(&self, key: &str) -> Value {
        match self {
            Self::Object(obj) => obj.get(key),
            _ => Value::Null,
        }
    }

    /// Assign a field of an object value through its accessor, if any.
    ///
    /// No-op for non-object values.
    pub fn assign(&self, key: &str, value: Value) {
        if let Self::Object(obj) = self {
            obj.assign(key, value);
        }
    }

    /// Strict equality, except that two NaNs are considered the same.
    #[must_use]
    pub fn same_value(&self, other: &Value) -> bool {
        match (self, other) {
            (Self::Number(a), Self::Number(b)) if a.is_nan() && b.is_nan() => true,
            _ => self == other,
        }
    }

    /// The wrapper attached to this container, if it has been made observable.
    #[must_use]
    pub fn observer(&self) -> Option<Rc<Observer>> {
        match self {
            Self::Object(obj) => obj.observer(),
            Self::Array(arr) => arr.observer(),
            _ => None,
        }
    }

    /// Whether this value is a container that already carries a wrapper.
    #[must_use]
    pub fn is_reactive(&self) -> bool {
        self.observer().is_some()
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Null, Self::Null) => true,
            (Self::Bool(a), Self::Bool(b)) => a == b,
            (Self::Number(a), Self::Number(b)) => a == b,
            (Self::Str(a), Self::Str(b)) => a == b,
            (Self::Object(a), Self::Object(b)) => a.ptr_eq(b),
            (Self::Array(a), Self::Array(b)) => a.ptr_eq(b),
            _ => false,
        }
    }
}

thread_local! {
    static DEBUG_DEPTH: Cell<usize> = const { Cell::new(0) };
}

const MAX_DEBUG_DEPTH: usize = 6;

/// Guards `Debug` recursion so cyclic containers print a marker instead of
/// overflowing the stack.
pub(crate) struct DebugDepth;

impl DebugDepth {
    pub(crate) fn enter() -> Option<Self> {
        DEBUG_DEPTH.with(|d| {
            if d.get() >= MAX_DEBUG_DEPTH {
                None
            } else {
                d.set(d.get() + 1);
                Some(Self)
            }
        })
    }
}

impl Drop for DebugDepth {
    fn drop(&mut self) {
        DEBUG_DEPTH.with(|d| d.set(d.get().saturating_sub(1)));
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null => f.write_str("Null"),
            Self::Bool(b) => write!(f, "{b}"),
            Self::Number(n) => write!(f, "{n}"),
            Self::Str(s) => write!(f, "{s:?}"),
            Self::Object(obj) => fmt::Debug::fmt(obj, f),
            Self::Array(arr) => fmt::Debug::fmt(arr, f),
        }
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Self::Bool(b)
    }
}

impl From<f64> for Value {
    fn from(n: f64) -> Self {
        Self::Number(n)
    }
}

impl From<i32> for Value {
    fn from(n: i32) -> Self {
        Self::Number(f64::from(n))
    }
}

impl From<u32> for Value {
    fn from(n: u32) -> Self {
        Self::Number(f64::from(n))
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Self::Str(Rc::from(s))
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Self::Str(Rc::from(s))
    }
}

impl From<ObjectRef> for Value {
    fn from(obj: ObjectRef) -> Self {
        Self::Object(obj)
    }
}

impl From<ArrayRef> for Value {
    fn from(arr: ArrayRef) -> Self {
        Self::Array(arr)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map_or(Value::Null, Into::into)
    }
}

/// Key for the imperative `set`/`delete` helpers.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Key {
    /// Sequence position.
    Index(usize),
    /// Object field name.
    Field(Rc<str>),
}

impl From<usize> for Key {
    fn from(i: usize) -> Self {
        Self::Index(i)
    }
}

impl From<&str> for Key {
    fn from(s: &str) -> Self {
        Self::Field(Rc::from(s))
    }
}

impl From<String> for Key {
    fn from(s: String) -> Self {
        Self::Field(Rc::from(s))
    }
}

impl From<Rc<str>> for Key {
    fn from(s: Rc<str>) -> Self {
        Self::Field(s)
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Index(i) => write!(f, "{i}"),
            Self::Field(name) => f.write_str(name),
        }
    }
}

/// How a value is treated when asked to become observable.
///
/// Decided once per wrap attempt instead of scattering type tests through
/// the field-access path.
#[derive(Debug, Clone)]
pub enum Shape<'a> {
    /// Not a container; nothing to wrap.
    Scalar,
    /// Extensible plain object eligible for wrapping.
    Plain(&'a ObjectRef),
    /// Extensible array eligible for wrapping.
    Sequence(&'a ArrayRef),
    /// Already carries a wrapper.
    Wrapped(Rc<Observer>),
    /// Container that refuses new fields; left untouched.
    NonExtensible,
    /// The engine's own owner-instance object; never wrapped.
    Instance,
}

impl<'a> Shape<'a> {
    #[must_use]
    pub fn of(value: &'a Value) -> Self {
        if let Some(ob) = value.observer() {
            return Self::Wrapped(ob);
        }
        match value {
            Value::Object(obj) if obj.is_instance() => Self::Instance,
            Value::Object(obj) if obj.is_extensible() => Self::Plain(obj),
            Value::Array(arr) if arr.is_extensible() => Self::Sequence(arr),
            Value::Object(_) | Value::Array(_) => Self::NonExtensible,
            _ => Self::Scalar,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strict_equality() {
        assert_eq!(Value::from(1), Value::from(1.0));
        assert_ne!(Value::from(f64::NAN), Value::from(f64::NAN));
        assert!(Value::from(f64::NAN).same_value(&Value::from(f64::NAN)));
        assert_eq!(Value::from("a"), Value::from("a".to_string()));
        assert_ne!(Value::from(0), Value::from(false));
        assert_ne!(Value::Null, Value::from(0));
    }

    #[test]
    fn containers_compare_by_identity() {
        let a = Value::object([("x", Value::from(1))]);
        let b = Value::object([("x", Value::from(1))]);
        assert_ne!(a, b);
        assert_eq!(a, a.clone());

        let list = Value::array([Value::from(1)]);
        assert_eq!(list, list.clone());
        assert_ne!(list, Value::array([Value::from(1)]));
    }

    #[test]
    fn shape_classification() {
        assert!(matches!(Shape::of(&Value::from(3)), Shape::Scalar));
        let obj = Value::object([("a", Value::from(1))]);
        assert!(matches!(Shape::of(&obj), Shape::Plain(_)));
        let arr = Value::array([]);
        assert!(matches!(Shape::of(&arr), Shape::Sequence(_)));

        let frozen = ObjectRef::new();
        frozen.prevent_extensions();
        assert!(matches!(
            Shape::of(&Value::Object(frozen)),
            Shape::NonExtensible
        ));
    }

    #[test]
    fn get_on_non_object_is_null() {
        assert!(Value::from(1).get("a").is_null());
        assert!(Value::array([]).get("a").is_null());
    }

    #[test]
    fn debug_survives_cycles() {
        let obj = ObjectRef::new();
        obj.assign("me", Value::Object(obj.clone()));
        let text = format!("{:?}", Value::Object(obj));
        assert!(text.contains(".."));
    }

    #[test]
    fn key_conversions() {
        assert_eq!(Key::from(3), Key::Index(3));
        assert_eq!(Key::from("a").to_string(), "a");
    }
}
