#![forbid(unsafe_code)]

//! Tracked computations.
//!
//! A [`Watcher`] wraps a computation (a closure or a dot-delimited path) and
//! records which [`Dep`]s it read during its most recent evaluation. When any
//! of them notifies, the watcher is marked dirty (lazy), re-run inline
//! (sync), or queued on the scheduler (default).
//!
//! # State machine
//!
//! ```text
//! Fresh ──new()──▶ Evaluating ──▶ Clean ──notify──▶ Dirty / queued
//!   │ (lazy)                        ▲                    │
//!   └────────────▶ Dirty ──peek()───┘◀──── run() ────────┘
//! ```
//!
//! # Invariants
//!
//! 1. After an evaluation, the dependency set equals exactly the handles read
//!    during that evaluation; handles no longer read are unsubscribed.
//! 2. A handle is subscribed at most once per watcher, deduped through the
//!    watcher's id sets.
//! 3. The evaluation stack is popped on every path out of an evaluation.
//! 4. After `teardown()`, `update()` and `run()` are no-ops.
//!
//! # Failure Modes
//!
//! - **User computation fails**: reported through the error hook; the cached
//!   value is kept and the run is treated as "no change". A lazy watcher
//!   stays dirty so the next `peek()` retries.
//! - **Internal computation fails**: the error is returned to the caller.
//! - **Callback fails**: always reported, never propagated.

use std::cell::RefCell;
use std::fmt;
use std::rc::{Rc, Weak};
use std::sync::atomic::{AtomicU64, Ordering};

use ahash::AHashSet;

use crate::dep::{Dep, EvalFrame};
use crate::error::{BoxError, ReactiveError, Result, report_error, warn};
use crate::owner::{Owner, OwnerInner};
use crate::path::PathGetter;
use crate::scheduler;
use crate::traverse::traverse;
use crate::value::Value;

static NEXT_WATCHER_ID: AtomicU64 = AtomicU64::new(1);

/// A tracked computation body. Receives the owner's context value.
pub type ComputeFn = Rc<dyn Fn(&Value) -> std::result::Result<Value, BoxError>>;

/// Post-update callback, called with `(new, old)`.
pub type Callback = Rc<dyn Fn(&Value, &Value) -> std::result::Result<(), BoxError>>;

/// Wrap a closure as a [`Callback`].
pub fn callback<F>(f: F) -> Callback
where
    F: Fn(&Value, &Value) -> std::result::Result<(), BoxError> + 'static,
{
    Rc::new(f)
}

/// What a watcher evaluates.
#[derive(Clone)]
pub enum Expression {
    /// Dot-delimited path relative to the owner's context, e.g. `"a.b.c"`.
    Path(String),
    /// Arbitrary computation.
    Func(ComputeFn),
}

impl Expression {
    /// Wrap a closure as an expression.
    pub fn func<F>(f: F) -> Self
    where
        F: Fn(&Value) -> std::result::Result<Value, BoxError> + 'static,
    {
        Self::Func(Rc::new(f))
    }

    fn label(&self) -> String {
        match self {
            Self::Path(path) => path.clone(),
            Self::Func(_) => "<function>".to_string(),
        }
    }
}

impl fmt::Debug for Expression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Path(path) => f.debug_tuple("Path").field(path).finish(),
            Self::Func(_) => f.write_str("Func(..)"),
        }
    }
}

impl From<&str> for Expression {
    fn from(path: &str) -> Self {
        Self::Path(path.to_string())
    }
}

impl From<String> for Expression {
    fn from(path: String) -> Self {
        Self::Path(path)
    }
}

/// Behaviour flags of a watcher.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WatcherOptions {
    /// Touch every nested field of the result so nested mutation re-triggers.
    pub deep: bool,
    /// Failures are reported rather than returned.
    pub user: bool,
    /// Evaluate on demand; cache until a dependency notifies.
    pub lazy: bool,
    /// Re-run inline on notification instead of batching.
    pub sync: bool,
}

impl WatcherOptions {
    #[must_use]
    pub fn with_deep(mut self, deep: bool) -> Self {
        self.deep = deep;
        self
    }

    #[must_use]
    pub fn with_user(mut self, user: bool) -> Self {
        self.user = user;
        self
    }

    #[must_use]
    pub fn with_lazy(mut self, lazy: bool) -> Self {
        self.lazy = lazy;
        self
    }

    #[must_use]
    pub fn with_sync(mut self, sync: bool) -> Self {
        self.sync = sync;
        self
    }
}

enum Getter {
    Path(PathGetter),
    Func(ComputeFn),
    Noop,
}

impl Getter {
    fn call(&self, context: &Value) -> std::result::Result<Value, BoxError> {
        match self {
            Self::Path(path) => Ok(path.resolve(context)),
            Self::Func(f) => f(context),
            Self::Noop => Ok(Value::Null),
        }
    }
}

struct WatcherState {
    value: Value,
    dirty: bool,
    active: bool,
    version: u64,
    deps: Vec<Dep>,
    dep_ids: AHashSet<u64>,
    new_deps: Vec<Dep>,
    new_dep_ids: AHashSet<u64>,
}

pub(crate) struct WatcherInner {
    id: u64,
    expression: String,
    getter: Getter,
    callback: Option<Callback>,
    options: WatcherOptions,
    owner: Weak<OwnerInner>,
    state: RefCell<WatcherState>,
}

/// Handle to a tracked computation. Cloning shares the same computation.
#[derive(Clone)]
pub struct Watcher(Rc<WatcherInner>);

impl PartialEq for Watcher {
    fn eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }
}

impl Eq for Watcher {}

impl fmt::Debug for Watcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.0.state.borrow();
        f.debug_struct("Watcher")
            .field("id", &self.0.id)
            .field("expression", &self.0.expression)
            .field("dirty", &state.dirty)
            .field("active", &state.active)
            .field("deps", &state.deps.len())
            .finish()
    }
}

impl Watcher {
    /// Create a watcher owned by `owner`.
    ///
    /// Non-lazy watchers evaluate immediately; an internal (non-`user`)
    /// watcher whose first evaluation fails returns the error.
    pub fn new(
        owner: &Owner,
        expression: impl Into<Expression>,
        callback: Option<Callback>,
        options: WatcherOptions,
    ) -> Result<Self> {
        Self::build(Some(owner), expression.into(), callback, options)
    }

    /// Create a watcher without an owner. Its computation receives `Null`
    /// as context.
    pub fn detached(
        expression: impl Into<Expression>,
        callback: Option<Callback>,
        options: WatcherOptions,
    ) -> Result<Self> {
        Self::build(None, expression.into(), callback, options)
    }

    /// Create a lazy watcher without an owner. Lazy watchers never evaluate
    /// on construction, so this cannot fail.
    pub(crate) fn detached_lazy(expression: Expression, options: WatcherOptions) -> Self {
        Self::assemble(None, expression, None, options.with_lazy(true))
    }

    fn build(
        owner: Option<&Owner>,
        expression: Expression,
        callback: Option<Callback>,
        options: WatcherOptions,
    ) -> Result<Self> {
        let watcher = Self::assemble(owner, expression, callback, options);
        if !options.lazy {
            match watcher.evaluate() {
                Ok(Some(value)) => watcher.0.state.borrow_mut().value = value,
                Ok(None) => {}
                Err(err) => {
                    watcher.teardown();
                    return Err(err);
                }
            }
        }
        Ok(watcher)
    }

    fn assemble(
        owner: Option<&Owner>,
        expression: Expression,
        callback: Option<Callback>,
        options: WatcherOptions,
    ) -> Self {
        let label = expression.label();
        let getter = match expression {
            Expression::Func(f) => Getter::Func(f),
            Expression::Path(path) => match PathGetter::parse(&path) {
                Some(getter) => Getter::Path(getter),
                None => {
                    warn(&format!(
                        "Failed watching path: \"{path}\". Watcher only accepts simple \
                         dot-delimited paths. For full control, use a function instead."
                    ));
                    Getter::Noop
                }
            },
        };
        let watcher = Self(Rc::new(WatcherInner {
            id: NEXT_WATCHER_ID.fetch_add(1, Ordering::Relaxed),
            expression: label,
            getter,
            callback,
            options,
            owner: owner.map_or_else(Weak::new, Owner::downgrade),
            state: RefCell::new(WatcherState {
                value: Value::Null,
                dirty: options.lazy,
                active: true,
                version: 0,
                deps: Vec::new(),
                dep_ids: AHashSet::new(),
                new_deps: Vec::new(),
                new_dep_ids: AHashSet::new(),
            }),
        }));
        if let Some(owner) = owner {
            owner.register_watcher(&watcher);
        }
        watcher
    }

    /// Process-wide monotonically increasing id; also the flush order.
    #[must_use]
    pub fn id(&self) -> u64 {
        self.0.id
    }

    /// Label used in diagnostics: the path, or `<function>`.
    #[must_use]
    pub fn expression(&self) -> &str {
        &self.0.expression
    }

    #[must_use]
    pub fn options(&self) -> WatcherOptions {
        self.0.options
    }

    /// Cached value from the last successful evaluation.
    #[must_use]
    pub fn value(&self) -> Value {
        self.0.state.borrow().value.clone()
    }

    #[must_use]
    pub fn is_dirty(&self) -> bool {
        self.0.state.borrow().dirty
    }

    #[must_use]
    pub fn is_active(&self) -> bool {
        self.0.state.borrow().active
    }

    /// Number of successful `peek()` recomputations.
    #[must_use]
    pub fn version(&self) -> u64 {
        self.0.state.borrow().version
    }

    /// Ids of the handles this watcher currently depends on, ascending.
    #[must_use]
    pub fn dep_ids(&self) -> Vec<u64> {
        let mut ids: Vec<u64> = self.0.state.borrow().deps.iter().map(Dep::id).collect();
        ids.sort_unstable();
        ids
    }

    /// Whether this watcher currently depends on `dep`.
    #[must_use]
    pub fn depends_on(&self, dep: &Dep) -> bool {
        self.0.state.borrow().dep_ids.contains(&dep.id())
    }

    /// The owning context, while it is alive.
    #[must_use]
    pub fn owner(&self) -> Option<Owner> {
        Owner::upgrade(&self.0.owner)
    }

    /// Evaluate the computation and rebuild the dependency set.
    ///
    /// Returns `Ok(None)` when a user computation failed (already reported).
    pub(crate) fn evaluate(&self) -> Result<Option<Value>> {
        {
            let mut state = self.0.state.borrow_mut();
            let state = &mut *state;
            state.new_deps.clear();
            state.new_dep_ids.clear();
        }
        let context = self.owner().map_or(Value::Null, |owner| owner.context());
        let outcome = {
            let _frame = EvalFrame::enter(self.clone());
            let outcome = self.0.getter.call(&context);
            if self.0.options.deep {
                if let Ok(value) = &outcome {
                    traverse(value);
                }
            }
            outcome
        };
        self.cleanup_deps();
        match outcome {
            Ok(value) => Ok(Some(value)),
            Err(source) => {
                let err = ReactiveError::Evaluation {
                    expression: self.0.expression.clone(),
                    source,
                };
                if self.0.options.user {
                    report_error(&err, &format!("getter for watcher \"{}\"", self.0.expression));
                    Ok(None)
                } else {
                    Err(err)
                }
            }
        }
    }

    /// Record a read of `dep` during the evaluation in progress.
    pub(crate) fn add_dep(&self, dep: &Dep) {
        let subscribe = {
            let mut state = self.0.state.borrow_mut();
            if !state.new_dep_ids.insert(dep.id()) {
                return;
            }
            state.new_deps.push(dep.clone());
            !state.dep_ids.contains(&dep.id())
        };
        if subscribe {
            dep.subscribe(self);
        }
    }

    /// Drop subscriptions not renewed by the last evaluation and swap the
    /// dependency buffers.
    fn cleanup_deps(&self) {
        let stale: Vec<Dep> = {
            let state = self.0.state.borrow();
            state
                .deps
                .iter()
                .filter(|d| !state.new_dep_ids.contains(&d.id()))
                .cloned()
                .collect()
        };
        for dep in stale.iter().rev() {
            dep.unsubscribe(self);
        }
        let mut state = self.0.state.borrow_mut();
        let state = &mut *state;
        std::mem::swap(&mut state.dep_ids, &mut state.new_dep_ids);
        state.new_dep_ids.clear();
        std::mem::swap(&mut state.deps, &mut state.new_deps);
        state.new_deps.clear();
        tracing::trace!(
            watcher = self.0.id,
            deps = state.deps.len(),
            dropped = stale.len(),
            "dependencies reconciled"
        );
    }

    /// Notification entry point, called by a [`Dep`].
    pub fn update(&self) {
        if !self.is_active() {
            return;
        }
        if self.0.options.lazy {
            self.0.state.borrow_mut().dirty = true;
        } else if self.0.options.sync {
            if let Err(err) = self.run() {
                report_error(&err, &format!("sync watcher \"{}\"", self.0.expression));
            }
        } else {
            scheduler::queue_watcher(self);
        }
    }

    /// Scheduler job: re-evaluate and fire the callback on change.
    ///
    /// The callback fires when the value differs by strict equality, when
    /// the value is a container (it may have been mutated in place), or when
    /// the watcher is deep.
    pub fn run(&self) -> Result<()> {
        if !self.is_active() {
            return Ok(());
        }
        let Some(value) = self.evaluate()? else {
            return Ok(());
        };
        let changed = {
            let state = self.0.state.borrow();
            value != state.value || value.is_container() || self.0.options.deep
        };
        if !changed {
            return Ok(());
        }
        let old = std::mem::replace(&mut self.0.state.borrow_mut().value, value.clone());
        if let Some(callback) = &self.0.callback {
            if let Err(source) = callback(&value, &old) {
                let err = ReactiveError::Callback {
                    expression: self.0.expression.clone(),
                    source,
                };
                report_error(&err, &format!("callback for watcher \"{}\"", self.0.expression));
            }
        }
        Ok(())
    }

    /// Lazy read path: evaluate, cache, clear the dirty flag.
    ///
    /// A failed user evaluation keeps the old value and leaves the watcher
    /// dirty.
    pub fn peek(&self) -> Result<Value> {
        if let Some(value) = self.evaluate()? {
            let mut state = self.0.state.borrow_mut();
            state.value = value;
            state.dirty = false;
            state.version += 1;
        }
        Ok(self.value())
    }

    /// Mark a lazy watcher stale so the next read recomputes.
    pub fn invalidate(&self) {
        self.0.state.borrow_mut().dirty = true;
    }

    /// Subscribe the currently evaluating watcher to every handle this
    /// watcher depends on.
    pub fn depend_all(&self) {
        let deps = self.0.state.borrow().deps.clone();
        for dep in deps.iter().rev() {
            dep.declare_read();
        }
    }

    /// Unsubscribe from every handle and deactivate permanently. Idempotent.
    pub fn teardown(&self) {
        let deps = {
            let mut state = self.0.state.borrow_mut();
            if !state.active {
                return;
            }
            state.active = false;
            state.deps.clone()
        };
        if let Some(owner) = self.owner() {
            if !owner.is_being_destroyed() {
                owner.unregister_watcher(self);
            }
        }
        for dep in deps.iter().rev() {
            dep.unsubscribe(self);
        }
        tracing::trace!(watcher = self.0.id, "watcher torn down");
    }

    pub(crate) fn as_ptr(&self) -> *const WatcherInner {
        Rc::as_ptr(&self.0)
    }

    pub(crate) fn downgrade(&self) -> Weak<WatcherInner> {
        Rc::downgrade(&self.0)
    }

    pub(crate) fn upgrade(weak: &Weak<WatcherInner>) -> Option<Self> {
        weak.upgrade().map(Self)
    }
}
