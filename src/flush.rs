//! Pulling a result out of a chain.
//!
//! A flush walks source links backward until it reaches roots, and invokes
//! each pending root's producer. It never delivers values itself: the
//! reactions `then` already registered carry them forward again.
use crate::{
    cell::{CellId, Producer, Shared},
    microtask, FlushablePromise,
};
use std::collections::HashSet;
use tracing::{debug, trace};

/// How a flush treats a source reachable along more than one path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Traversal {
    /// Follow every link, so a diamond-shaped graph is visited once per edge.
    /// Re-visits are harmless since settling twice is a no-op.
    #[default]
    EveryEdge,
    /// Enter each promise at most once per flush.
    Visited,
}

/// Type-erased view of a promise, as stored in source links.
pub(crate) trait Source {
    fn id(&self) -> CellId;
    fn flush(&self, walk: &mut Walk);
}

pub(crate) struct Walk {
    traversal: Traversal,
    visited: HashSet<CellId>,
}

impl Walk {
    fn new(traversal: Traversal) -> Self {
        Self {
            traversal,
            visited: HashSet::new(),
        }
    }

    fn enter(&mut self, id: CellId) -> bool {
        match self.traversal {
            Traversal::EveryEdge => true,
            Traversal::Visited => self.visited.insert(id),
        }
    }
}

impl<T: Clone + 'static, E: Clone + 'static> Source for Shared<T, E> {
    fn id(&self) -> CellId {
        self.id
    }

    fn flush(&self, walk: &mut Walk) {
        if !walk.enter(self.id) {
            return;
        }
        let produce = {
            let mut producer = self.producer.borrow_mut();
            match std::mem::replace(&mut *producer, Producer::Spent) {
                Producer::Ready(produce) if self.is_pending() => Some(produce),
                Producer::Absent => {
                    *producer = Producer::Absent;
                    None
                }
                // Roots stop the walk, spent or settled from outside.
                root => {
                    *producer = root;
                    return;
                }
            }
        };
        if let Some(produce) = produce {
            debug!(cell = %self.id, "flush: invoking producer");
            self.settle(produce());
            return;
        }
        // Reactions may append links while we walk; iterate a snapshot.
        let sources = self.sources.borrow().clone();
        trace!(cell = %self.id, sources = sources.len(), "flush: forwarding");
        for source in sources {
            source.flush(walk);
        }
    }
}

impl<T: Clone + 'static, E: Clone + 'static> FlushablePromise<T, E> {
    /// Force the chain behind this promise to settle now.
    ///
    /// A root with a pending producer is resolved with the producer's value;
    /// any other promise forwards the flush to each of its sources in order. A
    /// promise with neither is left alone. Reactions triggered by the flush run
    /// before it returns.
    ///
    /// # Examples
    ///
    /// ```
    /// use flushable_promise::{FlushablePromise, Reaction};
    /// let p1 = FlushablePromise::<String, ()>::with_producer(|| "flushing;".into());
    /// let p2 = p1.then(|x| Reaction::Value(x + " chain 1;"));
    /// let p3 = p2.then(|x| Reaction::Value(x + " chain 2;"));
    /// p3.flush();
    /// assert_eq!(p3.value().as_deref(), Some("flushing; chain 1; chain 2;"));
    /// ```
    pub fn flush(&self) {
        self.flush_with(Traversal::default())
    }

    pub fn flush_with(&self, traversal: Traversal) {
        let _hold = microtask::Hold::new();
        self.shared.flush(&mut Walk::new(traversal));
    }
}
