#![forbid(unsafe_code)]

//! Engine configuration.
//!
//! The configuration is thread-local, like the rest of the engine state: a
//! reactive graph never crosses threads. Install a config once at startup
//! with [`install`]; the engine reads it through [`with`].
//!
//! # Environment
//!
//! [`ReactiveConfig::from_env`] honours:
//!
//! - `FTUI_REACTIVE_MAX_UPDATES`: runaway ceiling per computation per flush.
//! - `FTUI_REACTIVE_SILENT`: `1`/`true` suppresses warnings.

use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

use crate::error::ReactiveError;
use crate::next_tick::{FlushDeferrer, MicrotaskDeferrer};

/// Default number of re-runs of one computation within one flush before the
/// scheduler treats it as an infinite update loop.
pub const MAX_UPDATE_COUNT: usize = 100;

/// Hook receiving reported errors plus a short location description.
pub type ErrorHandler = Rc<dyn Fn(&ReactiveError, &str)>;

/// Hook receiving advisory warnings.
pub type WarnHandler = Rc<dyn Fn(&str)>;

/// Runtime configuration for the reactive engine.
#[derive(Clone)]
pub struct ReactiveConfig {
    /// Runaway-loop ceiling (re-runs of one computation within one flush).
    pub max_update_count: usize,
    /// Error sink. `None` logs through `tracing::error!`.
    pub error_handler: Option<ErrorHandler>,
    /// Warning sink. `None` logs through `tracing::warn!`.
    pub warn_handler: Option<WarnHandler>,
    /// Suppress all warnings.
    pub silent: bool,
    /// Host hook used to schedule one flush per batch.
    pub deferrer: Rc<dyn FlushDeferrer>,
}

impl Default for ReactiveConfig {
    fn default() -> Self {
        Self {
            max_update_count: MAX_UPDATE_COUNT,
            error_handler: None,
            warn_handler: None,
            silent: false,
            deferrer: Rc::new(MicrotaskDeferrer),
        }
    }
}

impl fmt::Debug for ReactiveConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReactiveConfig")
            .field("max_update_count", &self.max_update_count)
            .field("error_handler", &self.error_handler.is_some())
            .field("warn_handler", &self.warn_handler.is_some())
            .field("silent", &self.silent)
            .finish_non_exhaustive()
    }
}

impl ReactiveConfig {
    /// Defaults overridden by `FTUI_REACTIVE_*` environment variables.
    #[must_use]
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Defaults overridden by whatever `lookup` returns for the
    /// `FTUI_REACTIVE_*` keys. Unparseable values are ignored.
    #[must_use]
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();
        if let Some(limit) = lookup("FTUI_REACTIVE_MAX_UPDATES")
            .and_then(|raw| raw.trim().parse::<usize>().ok())
        {
            config.max_update_count = limit;
        }
        if let Some(raw) = lookup("FTUI_REACTIVE_SILENT") {
            config.silent = matches!(raw.trim(), "1" | "true" | "TRUE" | "yes");
        }
        config
    }

    /// Set the runaway-loop ceiling.
    #[must_use]
    pub fn with_max_update_count(mut self, limit: usize) -> Self {
        self.max_update_count = limit;
        self
    }

    /// Set the error hook.
    #[must_use]
    pub fn with_error_handler(mut self, handler: impl Fn(&ReactiveError, &str) + 'static) -> Self {
        self.error_handler = Some(Rc::new(handler));
        self
    }

    /// Set the warning hook.
    #[must_use]
    pub fn with_warn_handler(mut self, handler: impl Fn(&str) + 'static) -> Self {
        self.warn_handler = Some(Rc::new(handler));
        self
    }

    /// Suppress or enable warnings.
    #[must_use]
    pub fn with_silent(mut self, silent: bool) -> Self {
        self.silent = silent;
        self
    }

    /// Replace the deferred-flush hook.
    #[must_use]
    pub fn with_deferrer(mut self, deferrer: impl FlushDeferrer + 'static) -> Self {
        self.deferrer = Rc::new(deferrer);
        self
    }
}

thread_local! {
    static CONFIG: RefCell<ReactiveConfig> = RefCell::new(ReactiveConfig::default());
}

/// Install `config` for the current thread, returning the previous one.
pub fn install(config: ReactiveConfig) -> ReactiveConfig {
    CONFIG.with(|c| c.replace(config))
}

/// Read the current thread's configuration.
///
/// Keep `f` short: hooks should be cloned out and invoked after `with`
/// returns, since a hook may itself consult the configuration.
pub fn with<R>(f: impl FnOnce(&ReactiveConfig) -> R) -> R {
    CONFIG.with(|c| f(&c.borrow()))
}

/// Mutate the current thread's configuration in place.
pub fn with_mut<R>(f: impl FnOnce(&mut ReactiveConfig) -> R) -> R {
    CONFIG.with(|c| f(&mut c.borrow_mut()))
}
