#![forbid(unsafe_code)]

//! Observability wrapper: turns plain containers into tracked ones.
//!
//! [`observe`] attaches an [`Observer`] to an object or array. For objects,
//! every existing field is replaced by a tracked field with its own [`Dep`];
//! for arrays, every element is observed recursively. The observer also owns
//! a root `Dep` that fires when the container's shape changes (field added or
//! deleted, structural array mutation).
//!
//! Wrapping is idempotent: the observer is stored on the container itself,
//! and observing an already-wrapped container returns the existing observer.
//!
//! # Deep reachability for sequences
//!
//! Arrays have no per-index handles. When a tracked field holding an array is
//! read by an evaluating computation, the reader also subscribes to the root
//! handle of every wrapped container nested in that array, so mutation of a
//! nested element reaches it without the array changing.
//!
//! # Deletion
//!
//! Deleting a field notifies the container's root handle only. The removed
//! field's own handle is not notified; readers that depended on that field
//! alone are not re-run.

use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::{Rc, Weak};

use ahash::AHashSet;

use crate::array::{ArrayCell, ArrayRef};
use crate::dep::{self, Dep};
use crate::error::warn;
use crate::object::{Getter, ObjectCell, ObjectRef, Setter, Slot};
use crate::value::{Key, Shape, Value};

/// Hook invoked before a write proceeds on a field that should not be
/// written (advisory only: the write still happens).
pub type InvalidWriteHook = Rc<dyn Fn()>;

enum WeakContainer {
    Object(Weak<ObjectCell>),
    Array(Weak<ArrayCell>),
}

/// The wrapper attached to an observable container.
pub struct Observer {
    dep: Dep,
    root_count: Cell<usize>,
    value: WeakContainer,
}

impl fmt::Debug for Observer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Observer")
            .field("dep", &self.dep)
            .field("root_count", &self.root_count.get())
            .finish_non_exhaustive()
    }
}

impl Observer {
    /// Root handle: fires when the container as a whole changes.
    #[must_use]
    pub fn dep(&self) -> &Dep {
        &self.dep
    }

    /// How many owners use the wrapped container as their root data.
    #[must_use]
    pub fn root_count(&self) -> usize {
        self.root_count.get()
    }

    pub(crate) fn retain_root(&self) {
        self.root_count.set(self.root_count.get() + 1);
    }

    pub(crate) fn release_root(&self) {
        self.root_count.set(self.root_count.get().saturating_sub(1));
    }

    /// The wrapped container, while it is alive.
    #[must_use]
    pub fn value(&self) -> Option<Value> {
        match &self.value {
            WeakContainer::Object(weak) => weak.upgrade().map(|c| Value::Object(ObjectRef::from_cell(c))),
            WeakContainer::Array(weak) => weak.upgrade().map(|c| Value::Array(ArrayRef::from_cell(c))),
        }
    }
}

/// Make `value` observable, returning its wrapper.
///
/// Returns the existing wrapper if there is one; `None` for scalars,
/// non-extensible containers and owner instances. `as_root` records that an
/// owner uses the container as root data.
pub fn observe(value: &Value, as_root: bool) -> Option<Rc<Observer>> {
    let ob = match Shape::of(value) {
        Shape::Wrapped(ob) => ob,
        Shape::Plain(obj) => {
            let ob = Rc::new(Observer {
                dep: Dep::new(),
                root_count: Cell::new(0),
                value: WeakContainer::Object(obj.downgrade()),
            });
            obj.attach_observer(Rc::clone(&ob));
            walk(obj);
            ob
        }
        Shape::Sequence(arr) => {
            let ob = Rc::new(Observer {
                dep: Dep::new(),
                root_count: Cell::new(0),
                value: WeakContainer::Array(arr.downgrade()),
            });
            arr.attach_observer(Rc::clone(&ob));
            observe_items(&arr.to_vec());
            ob
        }
        Shape::Scalar | Shape::NonExtensible | Shape::Instance => return None,
    };
    if as_root {
        ob.retain_root();
    }
    Some(ob)
}

/// Make `value` observable in place and hand it back.
pub fn make_observable(value: Value) -> Value {
    observe(&value, false);
    value
}

/// Instrument every field of `obj`.
fn walk(obj: &ObjectRef) {
    for key in obj.keys() {
        let current = obj.peek(&key);
        define_tracked_field(obj, &key, current, None, false);
    }
}

/// Observe each element of a sequence.
pub(crate) fn observe_items(items: &[Value]) {
    for item in items {
        observe(item, false);
    }
}

/// A field whose reads and writes route through its own [`Dep`].
pub(crate) struct TrackedField {
    dep: Dep,
    value: RefCell<Value>,
    child: RefCell<Option<Rc<Observer>>>,
    getter: Option<Getter>,
    setter: Option<Setter>,
    on_invalid: Option<InvalidWriteHook>,
    shallow: bool,
}

impl TrackedField {
    fn current(&self) -> Value {
        match &self.getter {
            Some(getter) => getter(),
            None => self.value.borrow().clone(),
        }
    }

    /// Current value without declaring a read.
    pub(crate) fn peek(&self) -> Value {
        self.current()
    }

    pub(crate) fn read(&self) -> Value {
        let value = self.current();
        if dep::has_target() {
            self.dep.declare_read();
            let child = self.child.borrow().clone();
            if let Some(child) = child {
                child.dep().declare_read();
                if let Value::Array(arr) = &value {
                    depend_array(arr);
                }
            }
        }
        value
    }

    pub(crate) fn write(&self, new_value: Value) {
        let current = self.current();
        if new_value.same_value(&current) {
            return;
        }
        if let Some(hook) = &self.on_invalid {
            hook();
        }
        match &self.setter {
            Some(setter) => setter(new_value.clone()),
            None => *self.value.borrow_mut() = new_value.clone(),
        }
        let child = if self.shallow {
            None
        } else {
            observe(&new_value, false)
        };
        *self.child.borrow_mut() = child;
        self.dep.notify();
    }
}

/// Replace field `key` of `obj` with a tracked field holding `value`.
///
/// An existing accessor (or previously tracked field) keeps serving reads and
/// writes underneath the new handle. `on_invalid` is called before every
/// effective write. A `shallow` field does not observe the values stored in
/// it.
pub fn define_tracked_field(
    obj: &ObjectRef,
    key: &str,
    value: Value,
    on_invalid: Option<InvalidWriteHook>,
    shallow: bool,
) {
    let (getter, setter): (Option<Getter>, Option<Setter>) = match obj.slot(key) {
        Some(Slot::Accessor(accessor)) => (accessor.getter, accessor.setter),
        Some(Slot::Tracked(previous)) => {
            let reader = Rc::clone(&previous);
            let writer = previous;
            let getter: Getter = Rc::new(move || reader.read());
            let setter: Setter = Rc::new(move |v: Value| writer.write(v));
            (Some(getter), Some(setter))
        }
        Some(Slot::Data(_)) | None => (None, None),
    };
    let child = if shallow { None } else { observe(&value, false) };
    let field = TrackedField {
        dep: Dep::new(),
        value: RefCell::new(value),
        child: RefCell::new(child),
        getter,
        setter,
        on_invalid,
        shallow,
    };
    obj.put_slot(Rc::from(key), Slot::Tracked(Rc::new(field)));
}

/// The handle of a tracked field, if `key` is tracked.
#[must_use]
pub fn field_dep(obj: &ObjectRef, key: &str) -> Option<Dep> {
    match obj.slot(key) {
        Some(Slot::Tracked(field)) => Some(field.dep.clone()),
        _ => None,
    }
}

/// Subscribe the evaluating computation to every wrapped container nested in
/// `arr`, since index access is not tracked. Each nested sequence is visited
/// once, so self-containing sequences terminate.
pub(crate) fn depend_array(arr: &ArrayRef) {
    let mut seen = AHashSet::new();
    seen.insert(arr.addr());
    depend_array_inner(arr, &mut seen);
}

fn depend_array_inner(arr: &ArrayRef, seen: &mut AHashSet<usize>) {
    for item in arr.to_vec() {
        if let Some(ob) = item.observer() {
            ob.dep().declare_read();
        }
        if let Value::Array(nested) = &item {
            if seen.insert(nested.addr()) {
                depend_array_inner(nested, seen);
            }
        }
    }
}

fn is_protected(obj: &ObjectRef) -> bool {
    obj.is_instance() || obj.observer().is_some_and(|ob| ob.root_count() > 0)
}

/// Set `key` on `target`, adding a tracked field when the key is new.
///
/// - Sequence with an index: pads the sequence if needed and replaces the
///   element through `splice`, so the element is wrapped and the root handle
///   fires.
/// - Object with an existing key: plain assignment through its accessor.
/// - Object with a new key: the field is instrumented and the root handle
///   fires (untracked plain store when the object is not observable).
///
/// Owner instances and root data objects refuse new keys with a warning.
pub fn set(target: &Value, key: impl Into<Key>, value: Value) -> Value {
    match (target, key.into()) {
        (Value::Array(arr), Key::Index(index)) => {
            arr.extend_to(index);
            arr.splice(index, 1, [value.clone()]);
            value
        }
        (Value::Object(obj), key) => {
            let key = key.to_string();
            if obj.has(&key) {
                obj.assign(&key, value.clone());
                return value;
            }
            if is_protected(obj) {
                warn(
                    "Avoid adding reactive properties to an owner instance or its root data \
                     at runtime; declare them upfront instead.",
                );
                return value;
            }
            match obj.observer() {
                None => obj.assign(&key, value.clone()),
                Some(ob) => {
                    define_tracked_field(obj, &key, value.clone(), None, false);
                    ob.dep().notify();
                }
            }
            value
        }
        (Value::Array(_), Key::Field(name)) => {
            warn(&format!("Cannot set field \"{name}\" on a sequence; use an index."));
            value
        }
        (_, key) => {
            warn(&format!("Cannot set reactive property \"{key}\" on a scalar value."));
            value
        }
    }
}

/// Delete `key` from `target`, notifying the container's root handle.
pub fn delete(target: &Value, key: impl Into<Key>) {
    match (target, key.into()) {
        (Value::Array(arr), Key::Index(index)) => {
            arr.splice(index, 1, []);
        }
        (Value::Object(obj), key) => {
            let key = key.to_string();
            if is_protected(obj) {
                warn(
                    "Avoid deleting properties on an owner instance or its root data; \
                     set them to null instead.",
                );
                return;
            }
            if !obj.remove(&key) {
                return;
            }
            if let Some(ob) = obj.observer() {
                ob.dep().notify();
            }
        }
        (_, key) => {
            warn(&format!("Cannot delete property \"{key}\" of a non-container value."));
        }
    }
}
