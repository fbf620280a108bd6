#![forbid(unsafe_code)]

//! Dependency handles and the evaluation stack.
//!
//! A [`Dep`] is the publish point of one observable cell (a tracked field or
//! a container root). It keeps an ordered list of subscribed computations.
//!
//! # Ownership
//!
//! Handles hold **weak** references to subscribers; subscribers hold strong
//! references back to the handles they currently depend on. A computation
//! that is dropped without `teardown()` simply stops receiving updates and
//! its stale entry is pruned on the next notification.
//!
//! # Evaluation stack
//!
//! The computation currently being evaluated is the top of a thread-local
//! stack. [`EvalFrame`] pushes on creation and pops on drop, so the stack stays
//! balanced even if a computation panics.
//!
//! # Invariants
//!
//! 1. Subscribers are notified in subscription order.
//! 2. `notify()` iterates a snapshot: subscribers added or removed during the
//!    notification do not affect the current pass.
//! 3. The handle does not dedupe subscribers; computations dedupe through
//!    their own id sets.

use std::cell::RefCell;
use std::fmt;
use std::rc::{Rc, Weak};
use std::sync::atomic::{AtomicU64, Ordering};

use crate::watcher::{Watcher, WatcherInner};

static NEXT_DEP_ID: AtomicU64 = AtomicU64::new(0);

struct DepInner {
    id: u64,
    subs: RefCell<Vec<Weak<WatcherInner>>>,
}

/// A dependency handle. Cloning shares the same handle.
#[derive(Clone)]
pub struct Dep(Rc<DepInner>);

impl Default for Dep {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Dep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Dep")
            .field("id", &self.id())
            .field("subscribers", &self.subscriber_count())
            .finish()
    }
}

impl Dep {
    #[must_use]
    pub fn new() -> Self {
        Self(Rc::new(DepInner {
            id: NEXT_DEP_ID.fetch_add(1, Ordering::Relaxed),
            subs: RefCell::new(Vec::new()),
        }))
    }

    /// Process-wide monotonically increasing id.
    #[must_use]
    pub fn id(&self) -> u64 {
        self.0.id
    }

    /// Number of live subscribers.
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.0
            .subs
            .borrow()
            .iter()
            .filter(|w| w.strong_count() > 0)
            .count()
    }

    /// Whether `watcher` is currently subscribed.
    #[must_use]
    pub fn has_subscriber(&self, watcher: &Watcher) -> bool {
        let target = watcher.as_ptr();
        self.0.subs.borrow().iter().any(|w| w.as_ptr() == target)
    }

    /// Append `watcher` to the subscriber list.
    pub fn subscribe(&self, watcher: &Watcher) {
        self.0.subs.borrow_mut().push(watcher.downgrade());
    }

    /// Remove the first subscription of `watcher`.
    pub fn unsubscribe(&self, watcher: &Watcher) {
        let target = watcher.as_ptr();
        let mut subs = self.0.subs.borrow_mut();
        if let Some(pos) = subs.iter().position(|w| w.as_ptr() == target) {
            subs.remove(pos);
        }
    }

    /// Declare a read of this handle on behalf of the computation currently
    /// evaluating, if any.
    pub fn declare_read(&self) {
        if let Some(target) = current_target() {
            target.add_dep(self);
        }
    }

    /// Tell every subscriber that the observed value changed.
    pub fn notify(&self) {
        let snapshot: Vec<Weak<WatcherInner>> = {
            let mut subs = self.0.subs.borrow_mut();
            subs.retain(|w| w.strong_count() > 0);
            subs.clone()
        };
        for weak in snapshot {
            if let Some(watcher) = Watcher::upgrade(&weak) {
                watcher.update();
            }
        }
    }
}

thread_local! {
    static TARGET_STACK: RefCell<Vec<Watcher>> = const { RefCell::new(Vec::new()) };
}

/// The computation currently being evaluated on this thread.
#[must_use]
pub fn current_target() -> Option<Watcher> {
    TARGET_STACK.with(|stack| stack.borrow().last().cloned())
}

/// Whether any computation is currently being evaluated on this thread.
#[must_use]
pub fn has_target() -> bool {
    TARGET_STACK.with(|stack| !stack.borrow().is_empty())
}

/// Depth of the evaluation stack (nested evaluations).
#[must_use]
pub fn target_depth() -> usize {
    TARGET_STACK.with(|stack| stack.borrow().len())
}

/// RAII frame on the evaluation stack.
///
/// Pops exactly what it pushed when dropped, including during unwinding.
pub(crate) struct EvalFrame {
    depth: usize,
}

impl EvalFrame {
    pub(crate) fn enter(watcher: Watcher) -> Self {
        let depth = TARGET_STACK.with(|stack| {
            let mut stack = stack.borrow_mut();
            stack.push(watcher);
            stack.len()
        });
        Self { depth }
    }
}

impl Drop for EvalFrame {
    fn drop(&mut self) {
        TARGET_STACK.with(|stack| {
            let mut stack = stack.borrow_mut();
            debug_assert_eq!(stack.len(), self.depth, "evaluation stack out of balance");
            stack.truncate(self.depth - 1);
        });
    }
}
