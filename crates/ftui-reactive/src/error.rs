#![forbid(unsafe_code)]

//! Error taxonomy and the reporting channel.
//!
//! Failures inside user-defined computations and callbacks never unwind
//! through the scheduler. They are converted into [`ReactiveError`] values and
//! handed to the configured error hook (see [`ReactiveConfig`]). Warnings
//! (invalid mutation attempts, bad watch paths) go through the warning hook.
//!
//! A hook that itself panics is not caught: that is a host configuration bug.
//!
//! [`ReactiveConfig`]: crate::config::ReactiveConfig

use crate::config;

/// Boxed error returned by user computations and callbacks.
pub type BoxError = Box<dyn std::error::Error + 'static>;

/// Convenience alias for results produced by the engine.
pub type Result<T, E = ReactiveError> = std::result::Result<T, E>;

/// Errors surfaced by the reactive engine.
#[derive(Debug, thiserror::Error)]
pub enum ReactiveError {
    /// The computation function of a tracked computation failed.
    #[error("evaluation of \"{expression}\" failed: {source}")]
    Evaluation {
        expression: String,
        #[source]
        source: BoxError,
    },
    /// The post-update callback of a tracked computation failed.
    #[error("callback for \"{expression}\" failed: {source}")]
    Callback {
        expression: String,
        #[source]
        source: BoxError,
    },
    /// A computation kept re-invalidating itself within a single flush.
    #[error("possible infinite update loop in \"{expression}\" (more than {limit} re-runs in one flush)")]
    RunawayLoop { expression: String, limit: usize },
}

impl ReactiveError {
    /// The expression label of the computation that produced this error.
    #[must_use]
    pub fn expression(&self) -> &str {
        match self {
            Self::Evaluation { expression, .. }
            | Self::Callback { expression, .. }
            | Self::RunawayLoop { expression, .. } => expression,
        }
    }
}

/// Route an error to the configured error hook.
///
/// `info` is a short description of where the failure happened, e.g.
/// `getter for watcher "a.b"`.
pub fn report_error(err: &ReactiveError, info: &str) {
    let handler = config::with(|c| c.error_handler.clone());
    match handler {
        Some(handler) => handler(err, info),
        None => tracing::error!(info, error = %err, "reactive error"),
    }
}

/// Emit an advisory warning through the configured warning hook.
///
/// Suppressed entirely when the config is `silent`.
pub fn warn(message: &str) {
    let (silent, handler) = config::with(|c| (c.silent, c.warn_handler.clone()));
    if silent {
        return;
    }
    match handler {
        Some(handler) => handler(message),
        None => tracing::warn!("{message}"),
    }
}
