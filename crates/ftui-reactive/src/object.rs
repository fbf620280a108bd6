#![forbid(unsafe_code)]

//! Shared keyed containers.
//!
//! An [`ObjectRef`] is an insertion-ordered map of slots. A slot holds either
//! a plain stored value, a raw accessor pair (user getter/setter), or a
//! tracked field installed by the observability layer. Reads and writes go
//! through the slot, which is where dependency tracking hooks in.
//!
//! No `RefCell` borrow of the slot map is held while a getter, setter or
//! notification runs: the slot is cloned out first. User code reached from a
//! getter may therefore freely read or restructure the same object.

use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::Rc;

use indexmap::IndexMap;

use crate::observer::{Observer, TrackedField};
use crate::value::{DebugDepth, Value};

/// User-supplied field getter.
pub type Getter = Rc<dyn Fn() -> Value>;

/// User-supplied field setter.
pub type Setter = Rc<dyn Fn(Value)>;

/// A raw accessor pair, the equivalent of a property with `get`/`set`.
#[derive(Clone, Default)]
pub struct Accessor {
    pub getter: Option<Getter>,
    pub setter: Option<Setter>,
}

#[derive(Clone)]
pub(crate) enum Slot {
    Data(Value),
    Accessor(Accessor),
    Tracked(Rc<TrackedField>),
}

impl Slot {
    /// Current value without declaring a read.
    fn peek(&self) -> Value {
        match self {
            Self::Data(v) => v.clone(),
            Self::Accessor(a) => a.getter.as_ref().map_or(Value::Null, |g| g()),
            Self::Tracked(field) => field.peek(),
        }
    }
}

pub(crate) struct ObjectCell {
    slots: RefCell<IndexMap<Rc<str>, Slot>>,
    observer: RefCell<Option<Rc<Observer>>>,
    extensible: Cell<bool>,
    instance: bool,
}

/// Shared handle to a keyed container.
#[derive(Clone)]
pub struct ObjectRef(Rc<ObjectCell>);

impl Default for ObjectRef {
    fn default() -> Self {
        Self::new()
    }
}

impl ObjectRef {
    /// Create an empty, extensible object.
    #[must_use]
    pub fn new() -> Self {
        Self::with_flags(false)
    }

    /// The object backing an owner instance. Never wrapped, and refuses
    /// reactive field addition or deletion.
    pub(crate) fn new_instance() -> Self {
        Self::with_flags(true)
    }

    fn with_flags(instance: bool) -> Self {
        Self(Rc::new(ObjectCell {
            slots: RefCell::new(IndexMap::new()),
            observer: RefCell::new(None),
            extensible: Cell::new(true),
            instance,
        }))
    }

    /// Create an object holding plain (not yet tracked) fields.
    pub fn from_entries<K, I>(entries: I) -> Self
    where
        K: Into<Rc<str>>,
        I: IntoIterator<Item = (K, Value)>,
    {
        let obj = Self::new();
        {
            let mut slots = obj.0.slots.borrow_mut();
            for (key, value) in entries {
                slots.insert(key.into(), Slot::Data(value));
            }
        }
        obj
    }

    /// Read a field. Declares a read when the field is tracked; runs the
    /// getter when the field is an accessor. Missing keys read as `Null`.
    #[must_use]
    pub fn get(&self, key: &str) -> Value {
        match self.slot(key) {
            Some(Slot::Data(v)) => v,
            Some(Slot::Accessor(a)) => a.getter.as_ref().map_or(Value::Null, |g| g()),
            Some(Slot::Tracked(field)) => field.read(),
            None => Value::Null,
        }
    }

    /// Plain assignment: goes through the setter of an existing accessor or
    /// tracked field. A new key is stored as an untracked plain field (use
    /// [`crate::set`] to add a tracked one). New keys on a non-extensible
    /// object are dropped.
    pub fn assign(&self, key: &str, value: Value) {
        match self.slot(key) {
            Some(Slot::Tracked(field)) => field.write(value),
            Some(Slot::Accessor(a)) => {
                if let Some(setter) = a.setter {
                    setter(value);
                }
            }
            Some(Slot::Data(_)) => {
                self.put_slot(Rc::from(key), Slot::Data(value));
            }
            None => {
                if self.is_extensible() {
                    self.put_slot(Rc::from(key), Slot::Data(value));
                }
            }
        }
    }

    /// Install a raw accessor pair, replacing any existing slot.
    pub fn define_accessor(&self, key: &str, accessor: Accessor) {
        self.put_slot(Rc::from(key), Slot::Accessor(accessor));
    }

    #[must_use]
    pub fn has(&self, key: &str) -> bool {
        self.0.slots.borrow().contains_key(key)
    }

    /// Field names in insertion order.
    #[must_use]
    pub fn keys(&self) -> Vec<Rc<str>> {
        self.0.slots.borrow().keys().cloned().collect()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.0.slots.borrow().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether `key` has been instrumented for tracking.
    #[must_use]
    pub fn is_tracked(&self, key: &str) -> bool {
        matches!(self.slot(key), Some(Slot::Tracked(_)))
    }

    /// Forbid new fields. The object can no longer be wrapped.
    pub fn prevent_extensions(&self) {
        self.0.extensible.set(false);
    }

    #[must_use]
    pub fn is_extensible(&self) -> bool {
        self.0.extensible.get()
    }

    #[must_use]
    pub fn is_instance(&self) -> bool {
        self.0.instance
    }

    /// The attached wrapper, if any.
    #[must_use]
    pub fn observer(&self) -> Option<Rc<Observer>> {
        self.0.observer.borrow().clone()
    }

    #[must_use]
    pub fn ptr_eq(&self, other: &ObjectRef) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }

    /// Identity key, stable for the lifetime of the container.
    #[must_use]
    pub fn addr(&self) -> usize {
        Rc::as_ptr(&self.0) as *const () as usize
    }

    pub(crate) fn downgrade(&self) -> std::rc::Weak<ObjectCell> {
        Rc::downgrade(&self.0)
    }

    pub(crate) fn from_cell(cell: Rc<ObjectCell>) -> Self {
        Self(cell)
    }

    pub(crate) fn attach_observer(&self, ob: Rc<Observer>) {
        *self.0.observer.borrow_mut() = Some(ob);
    }

    pub(crate) fn slot(&self, key: &str) -> Option<Slot> {
        self.0.slots.borrow().get(key).cloned()
    }

    pub(crate) fn put_slot(&self, key: Rc<str>, slot: Slot) {
        self.0.slots.borrow_mut().insert(key, slot);
    }

    /// Current field value without declaring a read.
    pub(crate) fn peek(&self, key: &str) -> Value {
        self.slot(key).map_or(Value::Null, |slot| slot.peek())
    }

    /// Remove a field, keeping the order of the rest. Returns whether it
    /// existed.
    pub(crate) fn remove(&self, key: &str) -> bool {
        self.0.slots.borrow_mut().shift_remove(key).is_some()
    }
}

impl fmt::Debug for ObjectRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let Some(_depth) = DebugDepth::enter() else {
            return f.write_str("{..}");
        };
        let entries: Vec<(Rc<str>, Slot)> = self
            .0
            .slots
            .borrow()
            .iter()
            .map(|(k, s)| (Rc::clone(k), s.clone()))
            .collect();
        let mut map = f.debug_map();
        for (key, slot) in &entries {
            match slot {
                Slot::Accessor(_) => map.entry(key, &format_args!("<accessor>")),
                Slot::Data(v) => map.entry(key, v),
                Slot::Tracked(field) => map.entry(key, &field.peek()),
            };
        }
        map.finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    #[test]
    fn plain_fields_roundtrip_in_order() {
        let obj = ObjectRef::from_entries([("b", Value::from(2)), ("a", Value::from(1))]);
        assert_eq!(obj.get("a"), Value::from(1));
        assert_eq!(obj.keys(), vec![Rc::<str>::from("b"), Rc::<str>::from("a")]);
        assert!(obj.get("missing").is_null());
    }

    #[test]
    fn assign_adds_plain_field() {
        let obj = ObjectRef::new();
        obj.assign("x", Value::from(5));
        assert!(obj.has("x"));
        assert!(!obj.is_tracked("x"));
    }

    #[test]
    fn non_extensible_drops_new_keys() {
        let obj = ObjectRef::from_entries([("x", Value::from(1))]);
        obj.prevent_extensions();
        obj.assign("y", Value::from(2));
        obj.assign("x", Value::from(3));
        assert!(!obj.has("y"));
        assert_eq!(obj.get("x"), Value::from(3));
    }

    #[test]
    fn accessor_routes_reads_and_writes() {
        let backing = Rc::new(Cell::new(1.0));
        let read = Rc::clone(&backing);
        let write = Rc::clone(&backing);
        let obj = ObjectRef::new();
        obj.define_accessor(
            "n",
            Accessor {
                getter: Some(Rc::new(move || Value::from(read.get()))),
                setter: Some(Rc::new(move |v: Value| write.set(v.as_f64().unwrap_or(0.0)))),
            },
        );
        obj.assign("n", Value::from(9));
        assert_eq!(backing.get(), 9.0);
        assert_eq!(obj.get("n"), Value::from(9));
    }

    #[test]
    fn remove_keeps_order() {
        let obj = ObjectRef::from_entries([
            ("a", Value::from(1)),
            ("b", Value::from(2)),
            ("c", Value::from(3)),
        ]);
        assert!(obj.remove("b"));
        assert!(!obj.remove("b"));
        assert_eq!(obj.keys(), vec![Rc::<str>::from("a"), Rc::<str>::from("c")]);
    }
}
