//! The reaction queue every promise on a thread dispatches through.
//!
//! Settling a promise never calls its reactions directly. They are pushed
//! onto a thread-local FIFO and the outermost settling call drains it, so a
//! reaction that settles another promise only enqueues more work instead of
//! recursing. Reactions therefore run in the order their promises settled.
use std::{
    cell::{Cell, RefCell},
    collections::VecDeque,
};
use tracing::trace;

pub(crate) type Job = Box<dyn FnOnce()>;

thread_local! {
    static JOBS: RefCell<VecDeque<Job>> = RefCell::new(VecDeque::new());
    static DEPTH: Cell<usize> = const { Cell::new(0) };
}

/// Push a job, and run the queue unless someone up the stack already is.
pub(crate) fn enqueue(job: Job) {
    JOBS.with(|jobs| jobs.borrow_mut().push_back(job));
    if DEPTH.with(Cell::get) == 0 {
        drain();
    }
}

fn pending() -> usize {
    JOBS.with(|jobs| jobs.borrow().len())
}

fn drain() {
    let _hold = Hold::new();
    trace!(pending = pending(), "draining microtasks");
    // The borrow must end before the job runs; jobs enqueue more jobs.
    while let Some(job) = JOBS.with(|jobs| jobs.borrow_mut().pop_front()) {
        job();
    }
}

/// While a `Hold` is alive, enqueued jobs wait. Dropping the last one
/// drains the queue.
pub(crate) struct Hold(());

impl Hold {
    pub(crate) fn new() -> Self {
        DEPTH.with(|depth| depth.set(depth.get() + 1));
        Hold(())
    }
}

impl Drop for Hold {
    fn drop(&mut self) {
        let depth = DEPTH.with(|depth| {
            let outer = depth.get() - 1;
            depth.set(outer);
            outer
        });
        // A panicking job leaves the rest of the queue for the next drain.
        if depth == 0 && !std::thread::panicking() && pending() > 0 {
            drain();
        }
    }
}

/// Run `f` with reaction dispatch deferred until it returns.
///
/// Every promise settled inside `f` has its reactions queued, and they all
/// run, in settlement order, right before `batch` returns.
///
/// # Examples
///
/// ```
/// use flushable_promise::{batch, FlushablePromise, Reaction};
/// let a = FlushablePromise::<i32, ()>::new();
/// let doubled = a.then(|x| Reaction::Value(x * 2));
/// batch(|| {
///     a.resolve(21);
///     assert!(doubled.value().is_none());
/// });
/// assert_eq!(doubled.value(), Some(42));
/// ```
pub fn batch<R>(f: impl FnOnce() -> R) -> R {
    let _hold = Hold::new();
    f()
}

#[cfg(test)]
mod tests {
    use super::{batch, enqueue};
    use std::{cell::RefCell, rc::Rc};

    #[test]
    fn test_jobs_run_fifo_without_recursing() {
        let log = Rc::new(RefCell::new(Vec::new()));
        let outer = log.clone();
        enqueue(Box::new(move || {
            outer.borrow_mut().push("first");
            let inner = outer.clone();
            enqueue(Box::new(move || inner.borrow_mut().push("nested")));
            outer.borrow_mut().push("first done");
        }));
        assert_eq!(*log.borrow(), vec!["first", "first done", "nested"]);
    }

    #[test]
    fn test_batch_defers_until_return() {
        let log = Rc::new(RefCell::new(Vec::new()));
        let seen = log.clone();
        let len = batch(|| {
            enqueue(Box::new(move || seen.borrow_mut().push(1)));
            log.borrow().len()
        });
        assert_eq!(len, 0);
        assert_eq!(*log.borrow(), vec![1]);
    }
}
