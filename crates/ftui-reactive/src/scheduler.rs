#![forbid(unsafe_code)]

//! Batched flush queue.
//!
//! Stale computations are queued here and run together on the next deferred
//! turn. The queue is thread-local; every owner on a thread shares it.
//!
//! # Invariants
//!
//! 1. A computation is queued at most once per batch until it starts running.
//! 2. Within a flush, computations run in ascending id order. A computation
//!    queued during the flush is inserted into the unprocessed tail in id
//!    order, so it still runs in this flush.
//! 3. At most one deferred flush is requested per batch.
//! 4. After a flush, all scheduler state is empty.
//!
//! # Failure Modes
//!
//! - **Runaway loop**: a computation re-queued more than
//!   `max_update_count` times within one flush is reported once as
//!   [`ReactiveError::RunawayLoop`]; its remaining entries are dropped for
//!   this batch and the rest of the batch completes.
//! - **Internal evaluation failure** during a run is reported and the flush
//!   continues.
//! - **Panic** in a run unwinds out of the flush; the remaining entries are
//!   discarded and the scheduler is reset so later batches flush normally.

use std::cell::RefCell;
use std::rc::Rc;

use ahash::{AHashMap, AHashSet};
use web_time::Instant;

use crate::config;
use crate::error::{ReactiveError, report_error};
use crate::watcher::Watcher;

#[derive(Default)]
struct SchedulerState {
    queue: Vec<Watcher>,
    has: AHashSet<u64>,
    circular: AHashMap<u64, usize>,
    waiting: bool,
    flushing: bool,
    index: usize,
}

impl SchedulerState {
    fn reset(&mut self) {
        self.queue.clear();
        self.has.clear();
        self.circular.clear();
        self.waiting = false;
        self.flushing = false;
        self.index = 0;
    }
}

/// Clears scheduler state when a flush ends, including by unwinding.
struct FlushReset;

impl Drop for FlushReset {
    fn drop(&mut self) {
        let _ = SCHEDULER.try_with(|s| s.borrow_mut().reset());
    }
}

thread_local! {
    static SCHEDULER: RefCell<SchedulerState> = RefCell::new(SchedulerState::default());
}

/// Queue `watcher` for the next flush.
///
/// Duplicates within one batch are skipped unless the watcher has already
/// started running in the current flush.
pub fn queue_watcher(watcher: &Watcher) {
    let id = watcher.id();
    let request_flush = SCHEDULER.with(|s| {
        let mut s = s.borrow_mut();
        if !s.has.insert(id) {
            return false;
        }
        if s.flushing {
            let mut i = s.queue.len();
            while i > s.index + 1 && s.queue[i - 1].id() > id {
                i -= 1;
            }
            s.queue.insert(i, watcher.clone());
        } else {
            s.queue.push(watcher.clone());
        }
        tracing::trace!(watcher = id, queued = s.queue.len(), "watcher queued");
        if s.waiting {
            false
        } else {
            s.waiting = true;
            true
        }
    });
    if request_flush {
        let deferrer = config::with(|c| Rc::clone(&c.deferrer));
        deferrer.defer(Box::new(flush_scheduler_queue));
    }
}

/// Run every queued computation, then the owners' updated hooks.
///
/// Normally invoked by the configured deferrer; calling it directly flushes
/// synchronously.
pub fn flush_scheduler_queue() {
    let limit = config::with(|c| c.max_update_count);
    let queued = SCHEDULER.with(|s| {
        let mut s = s.borrow_mut();
        s.flushing = true;
        s.queue.sort_by_key(Watcher::id);
        s.queue.len()
    });
    let reset = FlushReset;
    let span = tracing::debug_span!("reactive.flush", queued);
    let _guard = span.enter();
    let started = Instant::now();

    let mut ran = 0usize;
    loop {
        let next = SCHEDULER.with(|s| {
            let mut s = s.borrow_mut();
            let watcher = s.queue.get(s.index).cloned()?;
            s.has.remove(&watcher.id());
            Some(watcher)
        });
        let Some(watcher) = next else {
            break;
        };
        let id = watcher.id();
        if let Err(err) = watcher.run() {
            report_error(&err, "scheduler flush");
        }
        ran += 1;

        let runaway = SCHEDULER.with(|s| {
            let mut s = s.borrow_mut();
            if !s.has.contains(&id) {
                return false;
            }
            let count = s.circular.entry(id).or_insert(0);
            *count += 1;
            if *count <= limit {
                return false;
            }
            let cursor = s.index;
            let mut position = 0;
            s.queue.retain(|w| {
                let keep = position <= cursor || w.id() != id;
                position += 1;
                keep
            });
            true
        });
        if runaway {
            let err = ReactiveError::RunawayLoop {
                expression: watcher.expression().to_string(),
                limit,
            };
            report_error(&err, "scheduler flush");
        }

        SCHEDULER.with(|s| s.borrow_mut().index += 1);
    }

    let updated = SCHEDULER.with(|s| std::mem::take(&mut s.borrow_mut().queue));
    drop(reset);
    tracing::debug!(
        ran,
        elapsed_us = started.elapsed().as_micros() as u64,
        "flush complete"
    );
    call_updated_hooks(&updated);
}

fn call_updated_hooks(queue: &[Watcher]) {
    for watcher in queue.iter().rev() {
        if let Some(owner) = watcher.owner() {
            if owner.is_mounted() && owner.is_primary(watcher) {
                owner.call_updated();
            }
        }
    }
}

/// Whether a flush is running on this thread.
#[must_use]
pub fn is_flushing() -> bool {
    SCHEDULER.with(|s| s.borrow().flushing)
}

/// Whether a flush has been requested but not yet started.
#[must_use]
pub fn is_waiting() -> bool {
    SCHEDULER.with(|s| s.borrow().waiting)
}

/// Number of entries in the pending list, including already-processed
/// entries of a flush in progress.
#[must_use]
pub fn queued_len() -> usize {
    SCHEDULER.with(|s| s.borrow().queue.len())
}
