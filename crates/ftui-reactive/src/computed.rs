#![forbid(unsafe_code)]

//! Lazy computed values derived from tracked fields.
//!
//! # Design
//!
//! [`Computed`] wraps a lazy [`Watcher`] that has no owner. Dependencies are
//! discovered automatically: whatever tracked fields the compute function
//! reads become its dependencies. When any of them changes, the cached value
//! is marked dirty and the next [`get()`](Computed::get) recomputes.
//!
//! Reading a `Computed` from inside another computation forwards its
//! dependencies to the reader, so the reader re-runs when the underlying
//! fields change.
//!
//! # Invariants
//!
//! 1. `get()` always returns a value consistent with the current state of all
//!    dependencies.
//! 2. The compute function is called at most once per dependency change cycle
//!    (memoization).
//! 3. If no dependency has changed, `get()` returns the cached value without
//!    recomputing.
//! 4. Version increments by exactly 1 per recomputation.
//!
//! # Failure Modes
//!
//! - **Compute function fails**: reported through the error hook. The cached
//!   value remains from the last successful computation and the dirty flag
//!   stays set so the next `get()` retries.
//! - **Source dropped**: a dropped source never notifies again; the computed
//!   value keeps its last cached result.

use std::fmt;

use crate::dep;
use crate::error::{BoxError, report_error};
use crate::value::Value;
use crate::watcher::{Expression, Watcher, WatcherOptions};

/// A lazily-evaluated, memoized value.
///
/// Cloning a `Computed` creates a new handle to the **same** computation.
#[derive(Clone)]
pub struct Computed {
    watcher: Watcher,
}

impl fmt::Debug for Computed {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Computed")
            .field("cached", &self.watcher.value())
            .field("dirty", &self.watcher.is_dirty())
            .field("version", &self.watcher.version())
            .finish()
    }
}

impl Computed {
    /// Create a computed value from an infallible compute function.
    pub fn new(compute: impl Fn() -> Value + 'static) -> Self {
        Self::try_new(move || Ok(compute()))
    }

    /// Create a computed value from a fallible compute function.
    pub fn try_new(compute: impl Fn() -> Result<Value, BoxError> + 'static) -> Self {
        let options = WatcherOptions::default().with_lazy(true).with_user(true);
        let expression = Expression::func(move |_| compute());
        Self {
            watcher: Watcher::detached_lazy(expression, options),
        }
    }

    /// Current value, recomputing first if any dependency has changed.
    #[must_use]
    pub fn get(&self) -> Value {
        if self.watcher.is_dirty() {
            if let Err(err) = self.watcher.peek() {
                report_error(&err, "computed value");
            }
        }
        if dep::has_target() {
            self.watcher.depend_all();
        }
        self.watcher.value()
    }

    /// Access the current value by reference.
    pub fn with<R>(&self, f: impl FnOnce(&Value) -> R) -> R {
        f(&self.get())
    }

    /// Whether the cached value is stale.
    #[must_use]
    pub fn is_dirty(&self) -> bool {
        self.watcher.is_dirty()
    }

    /// Force invalidation of the cached value. The next `get()` will
    /// recompute.
    pub fn invalidate(&self) {
        self.watcher.invalidate();
    }

    /// Current version number. Increments by 1 on each recomputation.
    #[must_use]
    pub fn version(&self) -> u64 {
        self.watcher.version()
    }

    /// The underlying lazy computation.
    #[must_use]
    pub fn watcher(&self) -> &Watcher {
        &self.watcher
    }
}
