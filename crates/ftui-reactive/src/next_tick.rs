#![forbid(unsafe_code)]

//! Deferred execution: the engine's only suspension point.
//!
//! The scheduler never flushes inline. It hands a single flush task per batch
//! to a [`FlushDeferrer`], which must run it after the current synchronous
//! work unwinds and before any later-queued host callbacks.
//!
//! The default deferrer, [`MicrotaskDeferrer`], pushes onto a thread-local
//! microtask queue. A host event loop calls [`drain_microtasks`] at the end of
//! each turn; tasks queued while draining run in the same drain, matching
//! microtask semantics.

use std::cell::RefCell;
use std::collections::VecDeque;

/// A deferred unit of work.
pub type Task = Box<dyn FnOnce()>;

/// Host hook for scheduling the batch flush.
pub trait FlushDeferrer {
    /// Arrange for `task` to run once the current synchronous stack unwinds.
    fn defer(&self, task: Task);
}

impl<F> FlushDeferrer for F
where
    F: Fn(Task),
{
    fn defer(&self, task: Task) {
        self(task);
    }
}

/// Deferrer backed by the thread-local microtask queue.
#[derive(Debug, Clone, Copy, Default)]
pub struct MicrotaskDeferrer;

impl FlushDeferrer for MicrotaskDeferrer {
    fn defer(&self, task: Task) {
        next_tick(task);
    }
}

thread_local! {
    static MICROTASKS: RefCell<VecDeque<Task>> = RefCell::new(VecDeque::new());
}

/// Queue `task` to run on the next microtask drain.
pub fn next_tick(task: impl FnOnce() + 'static) {
    MICROTASKS.with(|q| q.borrow_mut().push_back(Box::new(task)));
}

/// Number of tasks waiting for the next drain.
#[must_use]
pub fn pending_microtasks() -> usize {
    MICROTASKS.with(|q| q.borrow().len())
}

/// Run queued tasks until the queue is empty. Returns how many ran.
pub fn drain_microtasks() -> usize {
    let mut ran = 0;
    loop {
        // The queue borrow must be released before the task runs.
        let next = MICROTASKS.with(|q| q.borrow_mut().pop_front());
        let Some(task) = next else {
            break;
        };
        task();
        ran += 1;
    }
    ran
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;
    use std::rc::Rc;

    #[test]
    fn tasks_run_in_fifo_order() {
        let log = Rc::new(RefCell::new(Vec::new()));
        for i in 0..3 {
            let log = Rc::clone(&log);
            next_tick(move || log.borrow_mut().push(i));
        }
        assert_eq!(pending_microtasks(), 3);
        assert_eq!(drain_microtasks(), 3);
        assert_eq!(*log.borrow(), vec![0, 1, 2]);
    }

    #[test]
    fn nested_tasks_run_in_same_drain() {
        let count = Rc::new(Cell::new(0));
        let outer = Rc::clone(&count);
        next_tick(move || {
            outer.set(outer.get() + 1);
            let inner = Rc::clone(&outer);
            next_tick(move || inner.set(inner.get() + 10));
        });
        assert_eq!(drain_microtasks(), 2);
        assert_eq!(count.get(), 11);
        assert_eq!(pending_microtasks(), 0);
    }

    #[test]
    fn closure_deferrer() {
        let hits = Rc::new(Cell::new(0));
        let sink = Rc::clone(&hits);
        let deferrer = move |task: Task| {
            sink.set(sink.get() + 1);
            task();
        };
        let ran = Rc::new(Cell::new(false));
        let flag = Rc::clone(&ran);
        deferrer.defer(Box::new(move || flag.set(true)));
        assert_eq!(hits.get(), 1);
        assert!(ran.get());
    }
}
