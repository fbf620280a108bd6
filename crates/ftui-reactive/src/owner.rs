#![forbid(unsafe_code)]

//! Owning contexts for tracked computations.
//!
//! An [`Owner`] plays the part of a component instance: it holds root data,
//! exposes that data (and its computed properties) on an instance object,
//! keeps the list of computations it created, and tears them all down when
//! destroyed. Computations created through an owner receive the instance
//! object as their context value.
//!
//! # Lifecycle
//!
//! ```text
//! with_data() / with_props() ─▶ define_computed()* ─▶ watch()* ─▶ mount() ─▶ destroy()
//! ```
//!
//! # Props
//!
//! Props are values handed down by a parent. They are tracked but stored
//! shallowly, since the parent owns their contents. Assigning a prop directly
//! warns; the parent pushes new values through [`Owner::update_props`].
//!
//! `destroy()` is idempotent. After it, every computation the owner created
//! is inactive and the root data claim is released, so the data object
//! accepts new tracked keys through [`crate::set`] again.

use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::{Rc, Weak};

use indexmap::IndexMap;

use crate::dep;
use crate::error::{BoxError, ReactiveError, Result, report_error, warn};
use crate::object::{Accessor, Getter, ObjectRef, Setter};
use crate::observer::{InvalidWriteHook, define_tracked_field, observe};
use crate::value::Value;
use crate::watcher::{Callback, ComputeFn, Expression, Watcher, WatcherOptions};

/// Hook run after a flush in which the owner's primary computation ran.
pub type UpdatedHook = Rc<dyn Fn() -> std::result::Result<(), BoxError>>;

/// Setter half of a computed property. Receives the owner's context and the
/// assigned value.
pub type ComputedSetter = Rc<dyn Fn(&Value, Value) -> std::result::Result<(), BoxError>>;

/// A computed property definition for [`Owner::define_computed_with`].
#[derive(Clone)]
pub struct ComputedDef {
    get: ComputeFn,
    set: Option<ComputedSetter>,
    cache: bool,
}

impl fmt::Debug for ComputedDef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ComputedDef")
            .field("setter", &self.set.is_some())
            .field("cache", &self.cache)
            .finish()
    }
}

impl ComputedDef {
    /// A cached, read-only computed property.
    pub fn new<F>(get: F) -> Self
    where
        F: Fn(&Value) -> std::result::Result<Value, BoxError> + 'static,
    {
        Self {
            get: Rc::new(get),
            set: None,
            cache: true,
        }
    }

    /// Route assignments to `set` instead of warning.
    #[must_use]
    pub fn with_setter<F>(mut self, set: F) -> Self
    where
        F: Fn(&Value, Value) -> std::result::Result<(), BoxError> + 'static,
    {
        self.set = Some(Rc::new(set));
        self
    }

    /// With `cache` off, every read calls the getter directly and the
    /// reader depends on whatever it touches.
    #[must_use]
    pub fn with_cache(mut self, cache: bool) -> Self {
        self.cache = cache;
        self
    }
}

/// Options for [`Owner::watch`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WatchOptions {
    /// Depend on every nested field of the watched value.
    pub deep: bool,
    /// Invoke the callback once right away with `(value, Null)`.
    pub immediate: bool,
    /// Run inline on change instead of on the next flush.
    pub sync: bool,
}

impl WatchOptions {
    #[must_use]
    pub fn with_deep(mut self, deep: bool) -> Self {
        self.deep = deep;
        self
    }

    #[must_use]
    pub fn with_immediate(mut self, immediate: bool) -> Self {
        self.immediate = immediate;
        self
    }

    #[must_use]
    pub fn with_sync(mut self, sync: bool) -> Self {
        self.sync = sync;
        self
    }
}

pub(crate) struct OwnerInner {
    name: String,
    instance: ObjectRef,
    props: ObjectRef,
    data: Value,
    updating_props: Rc<Cell<bool>>,
    watchers: RefCell<Vec<Watcher>>,
    computed: RefCell<IndexMap<Rc<str>, Watcher>>,
    primary: RefCell<Option<Watcher>>,
    updated_hooks: RefCell<Vec<UpdatedHook>>,
    mounted: Cell<bool>,
    being_destroyed: Cell<bool>,
}

/// Handle to an owning context. Cloning shares the same owner.
#[derive(Clone)]
pub struct Owner(Rc<OwnerInner>);

impl fmt::Debug for Owner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Owner")
            .field("name", &self.0.name)
            .field("watchers", &self.0.watchers.borrow().len())
            .field("mounted", &self.0.mounted.get())
            .field("destroyed", &self.0.being_destroyed.get())
            .finish()
    }
}

fn is_reserved(key: &str) -> bool {
    key.starts_with('$') || key.starts_with('_')
}

fn proxy(instance: &ObjectRef, source: &ObjectRef, key: &Rc<str>) {
    let reader = source.clone();
    let writer = source.clone();
    let read_key = Rc::clone(key);
    let write_key = Rc::clone(key);
    let getter: Getter = Rc::new(move || reader.get(&read_key));
    let setter: Setter = Rc::new(move |v: Value| writer.assign(&write_key, v));
    instance.define_accessor(
        key,
        Accessor {
            getter: Some(getter),
            setter: Some(setter),
        },
    );
}

impl Owner {
    /// An owner with empty root data.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self::with_data(name, Value::empty_object())
    }

    /// An owner whose root data is `data`.
    ///
    /// `data` is made observable and every non-reserved key (one not starting
    /// with `$` or `_`) is proxied onto the instance object. Non-object data
    /// is replaced by an empty object with a warning.
    pub fn with_data(name: impl Into<String>, data: Value) -> Self {
        Self::build(name.into(), Value::empty_object(), data)
    }

    /// An owner receiving `props` from a parent, plus its own root `data`.
    ///
    /// Every prop becomes a shallow tracked field proxied onto the instance.
    /// A data key that repeats a prop name is not proxied.
    pub fn with_props(name: impl Into<String>, props: Value, data: Value) -> Self {
        Self::build(name.into(), props, data)
    }

    fn build(name: String, props: Value, data: Value) -> Self {
        let data = match data {
            Value::Object(_) => data,
            _ => {
                warn(&format!(
                    "data functions should return an object (owner \"{name}\")"
                ));
                Value::empty_object()
            }
        };
        let instance = ObjectRef::new_instance();
        let updating_props = Rc::new(Cell::new(false));

        let prop_fields = ObjectRef::new();
        match &props {
            Value::Object(source) => {
                for key in source.keys() {
                    let guard = Rc::clone(&updating_props);
                    let warn_key = Rc::clone(&key);
                    let on_invalid: InvalidWriteHook = Rc::new(move || {
                        if !guard.get() {
                            warn(&format!(
                                "Avoid mutating a prop directly since the value will be \
                                 overwritten whenever the parent re-renders. Instead, use a \
                                 data or computed property based on the prop's value. Prop \
                                 being mutated: \"{warn_key}\""
                            ));
                        }
                    });
                    define_tracked_field(&prop_fields, &key, source.get(&key), Some(on_invalid), true);
                    proxy(&instance, &prop_fields, &key);
                }
            }
            _ => warn(&format!("props should be an object (owner \"{name}\")")),
        }

        observe(&data, true);
        if let Value::Object(obj) = &data {
            for key in obj.keys() {
                if prop_fields.has(&key) {
                    warn(&format!(
                        "The data property \"{key}\" is already declared as a prop. \
                         Use prop default value instead."
                    ));
                    continue;
                }
                if is_reserved(&key) {
                    continue;
                }
                proxy(&instance, obj, &key);
            }
        }

        tracing::trace!(owner = %name, props = prop_fields.len(), "owner created");
        Self(Rc::new(OwnerInner {
            name,
            instance,
            props: prop_fields,
            data,
            updating_props,
            watchers: RefCell::new(Vec::new()),
            computed: RefCell::new(IndexMap::new()),
            primary: RefCell::new(None),
            updated_hooks: RefCell::new(Vec::new()),
            mounted: Cell::new(false),
            being_destroyed: Cell::new(false),
        }))
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.0.name
    }

    /// The root data object.
    #[must_use]
    pub fn data(&self) -> Value {
        self.0.data.clone()
    }

    /// The props object. Its fields are tracked but not deeply observed.
    #[must_use]
    pub fn props(&self) -> &ObjectRef {
        &self.0.props
    }

    /// Push new prop values from the parent. Unknown keys are ignored.
    /// Readers of changed props are notified as usual, without the
    /// direct-mutation warning.
    pub fn update_props<K, I>(&self, values: I)
    where
        K: AsRef<str>,
        I: IntoIterator<Item = (K, Value)>,
    {
        let previous = self.0.updating_props.replace(true);
        for (key, value) in values {
            let key = key.as_ref();
            if self.0.props.has(key) {
                self.0.props.assign(key, value);
            }
        }
        self.0.updating_props.set(previous);
    }

    /// The instance object computations see as their context.
    #[must_use]
    pub fn instance(&self) -> &ObjectRef {
        &self.0.instance
    }

    pub(crate) fn context(&self) -> Value {
        Value::Object(self.0.instance.clone())
    }

    /// Read a field through the instance (data proxy or computed property).
    #[must_use]
    pub fn get(&self, key: &str) -> Value {
        self.0.instance.get(key)
    }

    /// Write a field through the instance.
    pub fn assign(&self, key: &str, value: Value) {
        self.0.instance.assign(key, value);
    }

    /// Expose a lazily computed property named `key` on the instance.
    ///
    /// The property recomputes only when read after one of its dependencies
    /// changed, and forwards its dependencies to whichever computation reads
    /// it. Assigning to it warns. Returns `None` (with a warning) when `key`
    /// is already taken on the instance.
    pub fn define_computed<F>(&self, key: &str, compute: F) -> Result<Option<Watcher>>
    where
        F: Fn(&Value) -> std::result::Result<Value, BoxError> + 'static,
    {
        self.define_computed_with(key, ComputedDef::new(compute))
    }

    /// Expose computed property `key` built from `def`, which may carry a
    /// setter or turn caching off.
    pub fn define_computed_with(&self, key: &str, def: ComputedDef) -> Result<Option<Watcher>> {
        if self.0.instance.has(key) {
            warn(&self.collision_message(key));
            return Ok(None);
        }
        let watcher = Watcher::new(
            self,
            Expression::Func(Rc::clone(&def.get)),
            None,
            WatcherOptions::default().with_lazy(true),
        )?;

        let read_key = key.to_string();
        let getter: Getter = if def.cache {
            let reader = watcher.clone();
            Rc::new(move || {
                if reader.is_dirty() {
                    if let Err(err) = reader.peek() {
                        report_error(&err, &format!("computed property \"{read_key}\""));
                    }
                }
                if dep::has_target() {
                    reader.depend_all();
                }
                reader.value()
            })
        } else {
            let owner = self.downgrade();
            let compute = Rc::clone(&def.get);
            Rc::new(move || {
                let context = Owner::upgrade(&owner).map_or(Value::Null, |o| o.context());
                compute(&context).unwrap_or_else(|source| {
                    let err = ReactiveError::Evaluation {
                        expression: read_key.clone(),
                        source,
                    };
                    report_error(&err, &format!("computed property \"{read_key}\""));
                    Value::Null
                })
            })
        };
        let write_key = key.to_string();
        let setter: Setter = match def.set {
            Some(set) => {
                let owner = self.downgrade();
                Rc::new(move |value: Value| {
                    let context = Owner::upgrade(&owner).map_or(Value::Null, |o| o.context());
                    if let Err(source) = set(&context, value) {
                        let err = ReactiveError::Callback {
                            expression: write_key.clone(),
                            source,
                        };
                        report_error(&err, &format!("setter for computed property \"{write_key}\""));
                    }
                })
            }
            None => Rc::new(move |_: Value| {
                warn(&format!(
                    "Computed property \"{write_key}\" was assigned to but it has no setter."
                ));
            }),
        };
        self.0.instance.define_accessor(
            key,
            Accessor {
                getter: Some(getter),
                setter: Some(setter),
            },
        );
        self.0
            .computed
            .borrow_mut()
            .insert(Rc::from(key), watcher.clone());
        Ok(Some(watcher))
    }

    fn collision_message(&self, key: &str) -> String {
        let in_data = self.0.data.as_object().is_some_and(|obj| obj.has(key));
        if self.0.computed.borrow().contains_key(key) {
            format!("The computed property \"{key}\" is already defined as a computed property.")
        } else if self.0.props.has(key) {
            format!("The computed property \"{key}\" is already defined as a prop.")
        } else if in_data {
            format!("The computed property \"{key}\" is already defined in data.")
        } else {
            format!("The computed property \"{key}\" is already defined on the instance.")
        }
    }

    /// The computation backing computed property `key`.
    #[must_use]
    pub fn computed(&self, key: &str) -> Option<Watcher> {
        self.0.computed.borrow().get(key).cloned()
    }

    /// Watch `expression` and call `callback(new, old)` when it changes.
    ///
    /// The watcher is user-defined: evaluation and callback failures are
    /// reported, never returned. Call [`Watcher::teardown`] to stop watching.
    pub fn watch(
        &self,
        expression: impl Into<Expression>,
        callback: Callback,
        options: WatchOptions,
    ) -> Result<Watcher> {
        let watcher = Watcher::new(
            self,
            expression,
            Some(Rc::clone(&callback)),
            WatcherOptions::default()
                .with_user(true)
                .with_deep(options.deep)
                .with_sync(options.sync),
        )?;
        if options.immediate {
            if let Err(source) = callback(&watcher.value(), &Value::Null) {
                let err = ReactiveError::Callback {
                    expression: watcher.expression().to_string(),
                    source,
                };
                report_error(
                    &err,
                    &format!("callback for immediate watcher \"{}\"", watcher.expression()),
                );
            }
        }
        Ok(watcher)
    }

    /// Create the owner's primary (render) computation and mark it mounted.
    ///
    /// A previous primary computation is torn down first. A failing first
    /// render is returned as an error and leaves the owner unmounted.
    pub fn mount<F>(&self, render: F) -> Result<Watcher>
    where
        F: Fn(&Value) -> std::result::Result<Value, BoxError> + 'static,
    {
        let previous = self.0.primary.borrow_mut().take();
        if let Some(previous) = previous {
            previous.teardown();
        }
        let watcher = Watcher::new(
            self,
            Expression::func(render),
            None,
            WatcherOptions::default(),
        )?;
        *self.0.primary.borrow_mut() = Some(watcher.clone());
        self.0.mounted.set(true);
        tracing::trace!(owner = %self.0.name, watcher = watcher.id(), "owner mounted");
        Ok(watcher)
    }

    /// Register a hook run after each flush in which the primary computation
    /// ran. Hooks of nested owners run before their parents'.
    pub fn on_updated<F>(&self, hook: F)
    where
        F: Fn() -> std::result::Result<(), BoxError> + 'static,
    {
        self.0.updated_hooks.borrow_mut().push(Rc::new(hook));
    }

    /// Tear down every computation and release the root data. Idempotent.
    pub fn destroy(&self) {
        if self.0.being_destroyed.replace(true) {
            return;
        }
        let primary = self.0.primary.borrow().clone();
        if let Some(primary) = primary {
            primary.teardown();
        }
        let watchers = std::mem::take(&mut *self.0.watchers.borrow_mut());
        for watcher in watchers.iter().rev() {
            watcher.teardown();
        }
        if let Some(ob) = self.0.data.observer() {
            ob.release_root();
        }
        self.0.mounted.set(false);
        tracing::trace!(owner = %self.0.name, torn_down = watchers.len(), "owner destroyed");
    }

    #[must_use]
    pub fn is_mounted(&self) -> bool {
        self.0.mounted.get()
    }

    #[must_use]
    pub fn is_destroyed(&self) -> bool {
        self.0.being_destroyed.get()
    }

    /// Computations currently registered on this owner, in creation order.
    #[must_use]
    pub fn watchers(&self) -> Vec<Watcher> {
        self.0.watchers.borrow().clone()
    }

    /// The primary computation created by [`Owner::mount`].
    #[must_use]
    pub fn primary(&self) -> Option<Watcher> {
        self.0.primary.borrow().clone()
    }

    pub(crate) fn is_being_destroyed(&self) -> bool {
        self.0.being_destroyed.get()
    }

    pub(crate) fn is_primary(&self, watcher: &Watcher) -> bool {
        self.0.primary.borrow().as_ref() == Some(watcher)
    }

    pub(crate) fn register_watcher(&self, watcher: &Watcher) {
        self.0.watchers.borrow_mut().push(watcher.clone());
    }

    pub(crate) fn unregister_watcher(&self, watcher: &Watcher) {
        let mut watchers = self.0.watchers.borrow_mut();
        if let Some(pos) = watchers.iter().position(|w| w == watcher) {
            watchers.remove(pos);
        }
    }

    pub(crate) fn call_updated(&self) {
        let hooks = self.0.updated_hooks.borrow().clone();
        for hook in hooks {
            if let Err(source) = hook() {
                let err = ReactiveError::Callback {
                    expression: format!("{}:updated", self.0.name),
                    source,
                };
                report_error(&err, "updated hook");
            }
        }
    }

    pub(crate) fn downgrade(&self) -> Weak<OwnerInner> {
        Rc::downgrade(&self.0)
    }

    pub(crate) fn upgrade(weak: &Weak<OwnerInner>) -> Option<Self> {
        weak.upgrade().map(Self)
    }
}
