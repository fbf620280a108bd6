#![forbid(unsafe_code)]

//! Shared sequence containers.
//!
//! Index access on an [`ArrayRef`] is deliberately untracked: there is no
//! per-index dependency handle. Observers of a sequence depend on the
//! sequence's root handle instead, which fires once per structural mutation.
//!
//! The mutating primitives (`push`, `pop`, `shift`, `unshift`, `splice`,
//! `sort_by`, `reverse`) apply the mutation, wrap any inserted elements, and
//! then notify the root handle exactly once, provided the array has been made
//! observable. On a plain array they behave like ordinary `Vec` operations.
//!
//! Raw index writes ([`ArrayRef::set_raw`]) bypass notification entirely; use
//! [`crate::set`] for a tracked index assignment.

use std::cell::{Cell, RefCell};
use std::cmp::Ordering;
use std::fmt;
use std::rc::Rc;

use crate::observer::{Observer, observe_items};
use crate::value::{DebugDepth, Value};

pub(crate) struct ArrayCell {
    items: RefCell<Vec<Value>>,
    observer: RefCell<Option<Rc<Observer>>>,
    extensible: Cell<bool>,
}

/// Shared handle to a sequence container.
#[derive(Clone)]
pub struct ArrayRef(Rc<ArrayCell>);

impl Default for ArrayRef {
    fn default() -> Self {
        Self::new()
    }
}

impl ArrayRef {
    #[must_use]
    pub fn new() -> Self {
        Self::from_vec(Vec::new())
    }

    #[must_use]
    pub fn from_vec(items: Vec<Value>) -> Self {
        Self(Rc::new(ArrayCell {
            items: RefCell::new(items),
            observer: RefCell::new(None),
            extensible: Cell::new(true),
        }))
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.0.items.borrow().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Element at `index`, or `Null` past the end. Untracked.
    #[must_use]
    pub fn get(&self, index: usize) -> Value {
        self.0.items.borrow().get(index).cloned().unwrap_or_default()
    }

    /// Snapshot of the current elements. Untracked.
    #[must_use]
    pub fn to_vec(&self) -> Vec<Value> {
        self.0.items.borrow().clone()
    }

    /// Untracked index write. Pads with `Null` when writing past the end.
    pub fn set_raw(&self, index: usize, value: Value) {
        let mut items = self.0.items.borrow_mut();
        if index >= items.len() {
            items.resize(index + 1, Value::Null);
        }
        items[index] = value;
    }

    /// Append elements, returning the new length.
    pub fn push(&self, values: impl IntoIterator<Item = Value>) -> usize {
        let inserted: Vec<Value> = values.into_iter().collect();
        let len = {
            let mut items = self.0.items.borrow_mut();
            items.extend(inserted.iter().cloned());
            items.len()
        };
        self.mutated(&inserted);
        len
    }

    /// Remove and return the last element (`Null` when empty).
    pub fn pop(&self) -> Value {
        let popped = self.0.items.borrow_mut().pop().unwrap_or_default();
        self.mutated(&[]);
        popped
    }

    /// Remove and return the first element (`Null` when empty).
    pub fn shift(&self) -> Value {
        let shifted = {
            let mut items = self.0.items.borrow_mut();
            if items.is_empty() {
                Value::Null
            } else {
                items.remove(0)
            }
        };
        self.mutated(&[]);
        shifted
    }

    /// Prepend elements (keeping their order), returning the new length.
    pub fn unshift(&self, values: impl IntoIterator<Item = Value>) -> usize {
        let inserted: Vec<Value> = values.into_iter().collect();
        let len = {
            let mut items = self.0.items.borrow_mut();
            items.splice(0..0, inserted.iter().cloned());
            items.len()
        };
        self.mutated(&inserted);
        len
    }

    /// Remove up to `delete_count` elements starting at `start` and insert
    /// `values` in their place. `start` is clamped to the length. Returns the
    /// removed elements.
    pub fn splice(
        &self,
        start: usize,
        delete_count: usize,
        values: impl IntoIterator<Item = Value>,
    ) -> Vec<Value> {
        let inserted: Vec<Value> = values.into_iter().collect();
        let removed = {
            let mut items = self.0.items.borrow_mut();
            let start = start.min(items.len());
            let end = start.saturating_add(delete_count).min(items.len());
            items
                .splice(start..end, inserted.iter().cloned())
                .collect::<Vec<_>>()
        };
        self.mutated(&inserted);
        removed
    }

    /// Stable sort. `compare` sees a snapshot, so it may read this array.
    pub fn sort_by(&self, mut compare: impl FnMut(&Value, &Value) -> Ordering) {
        let mut items = self.to_vec();
        items.sort_by(|a, b| compare(a, b));
        *self.0.items.borrow_mut() = items;
        self.mutated(&[]);
    }

    pub fn reverse(&self) {
        self.0.items.borrow_mut().reverse();
        self.mutated(&[]);
    }

    /// Whether the array still accepts wrapping.
    #[must_use]
    pub fn is_extensible(&self) -> bool {
        self.0.extensible.get()
    }

    /// Refuse wrapping from now on.
    pub fn prevent_extensions(&self) {
        self.0.extensible.set(false);
    }

    #[must_use]
    pub fn observer(&self) -> Option<Rc<Observer>> {
        self.0.observer.borrow().clone()
    }

    #[must_use]
    pub fn ptr_eq(&self, other: &ArrayRef) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }

    /// Identity key, stable for the lifetime of the container.
    #[must_use]
    pub fn addr(&self) -> usize {
        Rc::as_ptr(&self.0) as *const () as usize
    }

    pub(crate) fn downgrade(&self) -> std::rc::Weak<ArrayCell> {
        Rc::downgrade(&self.0)
    }

    pub(crate) fn from_cell(cell: Rc<ArrayCell>) -> Self {
        Self(cell)
    }

    pub(crate) fn attach_observer(&self, ob: Rc<Observer>) {
        *self.0.observer.borrow_mut() = Some(ob);
    }

    /// Pad with `Null` up to `len` elements without notifying.
    pub(crate) fn extend_to(&self, len: usize) {
        let mut items = self.0.items.borrow_mut();
        if items.len() < len {
            items.resize(len, Value::Null);
        }
    }

    /// Post-mutation hook of every structural primitive.
    fn mutated(&self, inserted: &[Value]) {
        let Some(ob) = self.observer() else {
            return;
        };
        observe_items(inserted);
        ob.dep().notify();
    }
}

impl fmt::Debug for ArrayRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let Some(_depth) = DebugDepth::enter() else {
            return f.write_str("[..]");
        };
        let items = self.to_vec();
        f.debug_list().entries(items.iter()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn nums(arr: &ArrayRef) -> Vec<f64> {
        arr.to_vec().iter().filter_map(Value::as_f64).collect()
    }

    #[test]
    fn push_pop_shift_unshift() {
        let arr = ArrayRef::new();
        assert_eq!(arr.push([Value::from(2), Value::from(3)]), 2);
        assert_eq!(arr.unshift([Value::from(0), Value::from(1)]), 4);
        assert_eq!(nums(&arr), vec![0.0, 1.0, 2.0, 3.0]);
        assert_eq!(arr.pop(), Value::from(3));
        assert_eq!(arr.shift(), Value::from(0));
        assert_eq!(nums(&arr), vec![1.0, 2.0]);
    }

    #[test]
    fn pop_and_shift_on_empty_return_null() {
        let arr = ArrayRef::new();
        assert!(arr.pop().is_null());
        assert!(arr.shift().is_null());
    }

    #[test]
    fn splice_clamps_and_returns_removed() {
        let arr = ArrayRef::from_vec((1..=5).map(Value::from).collect());
        let removed = arr.splice(1, 2, [Value::from(9)]);
        assert_eq!(removed, vec![Value::from(2), Value::from(3)]);
        assert_eq!(nums(&arr), vec![1.0, 9.0, 4.0, 5.0]);

        let removed = arr.splice(10, 3, [Value::from(7)]);
        assert!(removed.is_empty());
        assert_eq!(nums(&arr), vec![1.0, 9.0, 4.0, 5.0, 7.0]);
    }

    #[test]
    fn sort_and_reverse() {
        let arr = ArrayRef::from_vec(vec![Value::from(3), Value::from(1), Value::from(2)]);
        arr.sort_by(|a, b| {
            a.as_f64()
                .partial_cmp(&b.as_f64())
                .unwrap_or(Ordering::Equal)
        });
        assert_eq!(nums(&arr), vec![1.0, 2.0, 3.0]);
        arr.reverse();
        assert_eq!(nums(&arr), vec![3.0, 2.0, 1.0]);
    }

    #[test]
    fn sort_comparator_may_read_same_array() {
        let arr = ArrayRef::from_vec(vec![Value::from(2), Value::from(0), Value::from(1)]);
        let reader = arr.clone();
        arr.sort_by(|a, b| {
            assert_eq!(reader.len(), 3);
            a.as_f64()
                .partial_cmp(&b.as_f64())
                .unwrap_or(Ordering::Equal)
        });
        assert_eq!(nums(&arr), vec![0.0, 1.0, 2.0]);
    }

    #[test]
    fn set_raw_pads_with_null() {
        let arr = ArrayRef::new();
        arr.set_raw(2, Value::from(1));
        assert_eq!(arr.len(), 3);
        assert!(arr.get(0).is_null());
        assert!(arr.get(99).is_null());
    }
}
