#![forbid(unsafe_code)]

//! Fine-grained dependency tracking and batched update scheduling.
//!
//! This crate turns plain data into observable data and runs computations
//! that re-execute when the data they read changes:
//!
//! - [`make_observable`]: instrument an object or array in place so reads
//!   are recorded and writes notify.
//! - [`Dep`]: the publish point of one observable cell.
//! - [`Watcher`]: a tracked computation. Its dependency set is rebuilt on
//!   every evaluation from the reads it actually performed.
//! - [`scheduler`]: the batch queue. Stale computations are coalesced and run
//!   in creation order on the next deferred turn.
//! - [`Owner`]: an owning context with root data, computed properties,
//!   watches and a primary (render) computation.
//! - [`Computed`]: a standalone memoized value.
//!
//! # Architecture
//!
//! Everything is single-threaded. Shared containers use `Rc` with interior
//! mutability. Handles hold `Weak` references to their subscribers, and
//! subscribers hold the handles they depend on, so dropping a computation is
//! enough to stop it. The currently evaluating computation lives on a
//! thread-local stack; reads anywhere in the call tree are attributed to it.
//!
//! The only suspension point is the [`FlushDeferrer`]. By default it queues
//! the flush on a thread-local microtask queue that the host drains with
//! [`drain_microtasks`] at the end of each event-loop turn.
//!
//! # Invariants
//!
//! 1. A computation's dependency set equals exactly the handles it read
//!    during its most recent evaluation.
//! 2. Notifying the same computation several times before a flush runs it
//!    once in that flush.
//! 3. Within a flush, computations run in ascending creation order.
//! 4. At most one flush is scheduled per batch.
//! 5. The evaluation stack is balanced on every exit path, including panics.
//!
//! # Example
//!
//! ```
//! use std::cell::RefCell;
//! use std::rc::Rc;
//! use ftui_reactive::{Expression, Value, Watcher, WatcherOptions, callback};
//! use ftui_reactive::{drain_microtasks, make_observable};
//!
//! let state = make_observable(Value::object([("a", Value::from(1))]));
//! let seen = Rc::new(RefCell::new(Vec::new()));
//!
//! let source = state.clone();
//! let sink = Rc::clone(&seen);
//! let _watcher = Watcher::detached(
//!     Expression::func(move |_| Ok(source.get("a"))),
//!     Some(callback(move |new, old| {
//!         sink.borrow_mut().push((new.clone(), old.clone()));
//!         Ok(())
//!     })),
//!     WatcherOptions::default(),
//! )
//! .unwrap();
//!
//! state.assign("a", Value::from(2));
//! assert!(seen.borrow().is_empty());
//! drain_microtasks();
//! assert_eq!(*seen.borrow(), vec![(Value::from(2), Value::from(1))]);
//! ```

pub mod array;
pub mod computed;
pub mod config;
pub mod dep;
pub mod error;
pub mod next_tick;
pub mod object;
pub mod observer;
pub mod owner;
pub mod path;
pub mod scheduler;
pub mod traverse;
pub mod value;
pub mod watcher;

pub use array::ArrayRef;
pub use computed::Computed;
pub use config::{MAX_UPDATE_COUNT, ReactiveConfig};
pub use dep::Dep;
pub use error::{BoxError, ReactiveError, Result};
pub use next_tick::{FlushDeferrer, MicrotaskDeferrer, drain_microtasks, next_tick};
pub use object::{Accessor, ObjectRef};
pub use observer::{Observer, define_tracked_field, delete, make_observable, observe, set};
pub use owner::{ComputedDef, ComputedSetter, Owner, WatchOptions};
pub use path::PathGetter;
pub use value::{Key, Shape, Value};
pub use watcher::{Callback, ComputeFn, Expression, Watcher, WatcherOptions, callback};

/// Create a tracked computation owned by `owner`.
///
/// Equivalent to [`Watcher::new`].
pub fn create_tracked_computation(
    owner: &Owner,
    expression: impl Into<Expression>,
    callback: Option<Callback>,
    options: WatcherOptions,
) -> Result<Watcher> {
    Watcher::new(owner, expression, callback, options)
}
