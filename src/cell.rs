use crate::{flush::Source, microtask, Settle};
use std::{
    cell::RefCell,
    fmt,
    future::Future,
    pin::Pin,
    rc::{Rc, Weak},
    sync::atomic::{AtomicU64, Ordering},
    task::{Context, Poll, Waker},
};
use tracing::trace;

/// Identity of one promise. Clones of a [`FlushablePromise`] share it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CellId(u64);

impl CellId {
    fn next() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(0);
        CellId(NEXT.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for CellId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PromiseState {
    Pending,
    Fulfilled,
    Rejected,
}

type Reactions<T, E> = Vec<Box<dyn FnOnce(Result<T, E>)>>;

pub(crate) enum Producer<T, E> {
    Absent,
    Ready(Box<dyn FnOnce() -> Result<T, E>>),
    /// Already invoked by a flush. Still a root.
    Spent,
}

struct Core<T, E> {
    value: Option<Result<T, E>>,
    reactions: Reactions<T, E>,
    waker: Vec<Waker>,
}

pub(crate) struct Shared<T, E> {
    pub(crate) id: CellId,
    core: RefCell<Core<T, E>>,
    pub(crate) producer: RefCell<Producer<T, E>>,
    pub(crate) sources: RefCell<Vec<Rc<dyn Source>>>,
}

impl<T: Clone + 'static, E: Clone + 'static> Shared<T, E> {
    pub(crate) fn is_pending(&self) -> bool {
        self.core.borrow().value.is_none()
    }

    /// First settlement wins; everything after it is ignored.
    pub(crate) fn settle(&self, result: Result<T, E>) {
        let (reactions, wakers) = {
            let mut core = self.core.borrow_mut();
            if core.value.is_some() {
                trace!(cell = %self.id, "already settled, ignoring");
                return;
            }
            trace!(cell = %self.id, fulfilled = result.is_ok(), "settled");
            core.value = Some(result.clone());
            (
                std::mem::take(&mut core.reactions),
                std::mem::take(&mut core.waker),
            )
        };
        for waker in wakers {
            waker.wake()
        }
        let _hold = microtask::Hold::new();
        for reaction in reactions {
            let result = result.clone();
            microtask::enqueue(Box::new(move || reaction(result)));
        }
    }

    fn subscribe(&self, reaction: Box<dyn FnOnce(Result<T, E>)>) {
        let mut core = self.core.borrow_mut();
        match core.value.clone() {
            None => core.reactions.push(reaction),
            Some(result) => {
                drop(core);
                microtask::enqueue(Box::new(move || reaction(result)));
            }
        }
    }
}

/// A promise that can be settled from outside, and pulled on with
/// [`flush`](FlushablePromise::flush).
///
/// The handle is cheap to clone; every clone is the same promise.
///
/// # Examples
///
/// ```
/// use flushable_promise::{FlushablePromise, Reaction};
/// let root = FlushablePromise::<i32, String>::with_producer(|| 32);
/// let doubled = root.then(|x| Reaction::Value(x * 2));
/// doubled.flush();
/// assert_eq!(root.value(), Some(32));
/// assert_eq!(doubled.value(), Some(64));
/// ```
pub struct FlushablePromise<T, E> {
    pub(crate) shared: Rc<Shared<T, E>>,
}

impl<T, E> Clone for FlushablePromise<T, E> {
    fn clone(&self) -> Self {
        Self {
            shared: self.shared.clone(),
        }
    }
}

impl<T: Clone + 'static, E: Clone + 'static> Default for FlushablePromise<T, E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Clone + 'static, E: Clone + 'static> FlushablePromise<T, E> {
    /// A pending promise that only external code can settle.
    pub fn new() -> Self {
        Self::with(Producer::Absent)
    }

    /// A flush root: `produce` supplies the value when the promise is flushed
    /// before anyone resolves it.
    pub fn with_producer(produce: impl FnOnce() -> T + 'static) -> Self {
        Self::with(Producer::Ready(Box::new(move || Ok(produce()))))
    }

    /// A flush root whose producer may fail. `Err` rejects the root.
    pub fn with_fallible_producer(produce: impl FnOnce() -> Result<T, E> + 'static) -> Self {
        Self::with(Producer::Ready(Box::new(produce)))
    }

    /// A pending promise together with a detached handle that settles it.
    ///
    /// # Examples
    ///
    /// ```
    /// use flushable_promise::FlushablePromise;
    /// use futures::executor::block_on;
    /// let (promise, resolver) = FlushablePromise::<String, ()>::with_resolver();
    /// resolver.resolve("🍓".into());
    /// assert_eq!(block_on(promise), Ok("🍓".to_string()));
    /// ```
    pub fn with_resolver() -> (Self, Resolver<T, E>) {
        let promise = Self::new();
        let resolver = Resolver {
            shared: promise.shared.clone(),
        };
        (promise, resolver)
    }

    fn with(producer: Producer<T, E>) -> Self {
        Self {
            shared: Rc::new(Shared {
                id: CellId::next(),
                core: RefCell::new(Core {
                    value: None,
                    reactions: vec![],
                    waker: vec![],
                }),
                producer: RefCell::new(producer),
                sources: RefCell::new(vec![]),
            }),
        }
    }

    pub fn resolve(&self, value: T) {
        self.shared.settle(Ok(value))
    }

    pub fn reject(&self, reason: E) {
        self.shared.settle(Err(reason))
    }

    pub(crate) fn settle(&self, result: Result<T, E>) {
        self.shared.settle(result)
    }

    pub fn resolver(&self) -> Resolver<T, E> {
        Resolver {
            shared: self.shared.clone(),
        }
    }

    pub fn id(&self) -> CellId {
        self.shared.id
    }

    pub fn state(&self) -> PromiseState {
        match self.shared.core.borrow().value {
            None => PromiseState::Pending,
            Some(Ok(_)) => PromiseState::Fulfilled,
            Some(Err(_)) => PromiseState::Rejected,
        }
    }

    pub fn is_pending(&self) -> bool {
        self.shared.is_pending()
    }

    pub fn result(&self) -> Option<Result<T, E>> {
        self.shared.core.borrow().value.clone()
    }

    pub fn value(&self) -> Option<T> {
        self.result().and_then(Result::ok)
    }

    pub fn reason(&self) -> Option<E> {
        self.result().and_then(Result::err)
    }

    /// Whether this promise was built with a producer. Flush stops at roots.
    pub fn is_root(&self) -> bool {
        !matches!(*self.shared.producer.borrow(), Producer::Absent)
    }

    /// The promises a flush of this one is forwarded to, in order.
    pub fn source_ids(&self) -> Vec<CellId> {
        self.shared
            .sources
            .borrow()
            .iter()
            .map(|source| source.id())
            .collect()
    }

    pub(crate) fn as_source(&self) -> Rc<dyn Source> {
        self.shared.clone()
    }

    /// Append to the source links. Existing links are never removed.
    pub(crate) fn add_sources(&self, sources: impl IntoIterator<Item = Rc<dyn Source>>) {
        self.shared.sources.borrow_mut().extend(sources)
    }

    /// Run `reaction` with the outcome once this promise settles.
    pub(crate) fn subscribe(&self, reaction: impl FnOnce(Result<T, E>) + 'static) {
        self.shared.subscribe(Box::new(reaction))
    }

    pub(crate) fn downgrade(&self) -> WeakPromise<T, E> {
        WeakPromise(Rc::downgrade(&self.shared))
    }
}

/// A reaction's grip on the promise it settles. Ownership runs from derived
/// promises back to their sources, never forward.
pub(crate) struct WeakPromise<T, E>(Weak<Shared<T, E>>);

impl<T: Clone + 'static, E: Clone + 'static> WeakPromise<T, E> {
    pub(crate) fn upgrade(&self) -> Option<FlushablePromise<T, E>> {
        self.0.upgrade().map(|shared| FlushablePromise { shared })
    }

    pub(crate) fn settle(&self, result: Result<T, E>) {
        if let Some(promise) = self.upgrade() {
            promise.settle(result)
        }
    }
}

impl<T: Clone + 'static, E: Clone + 'static> Settle<T, E> for FlushablePromise<T, E> {
    fn resolve(&self, value: T) {
        FlushablePromise::resolve(self, value)
    }

    fn reject(&self, reason: E) {
        FlushablePromise::reject(self, reason)
    }
}

impl<T: fmt::Debug, E: fmt::Debug> fmt::Debug for FlushablePromise<T, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut out = f.debug_struct("FlushablePromise");
        out.field("id", &self.shared.id);
        match self.shared.core.try_borrow() {
            Ok(core) => out.field("value", &core.value),
            Err(_) => out.field("value", &"<settling>"),
        };
        out.finish()
    }
}

impl<T: Clone + 'static, E: Clone + 'static> Future for FlushablePromise<T, E> {
    type Output = Result<T, E>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let mut core = self.shared.core.borrow_mut();
        match core.value {
            Some(ref value) => Poll::Ready(value.clone()),
            None => {
                core.waker.push(cx.waker().clone());
                Poll::Pending
            }
        }
    }
}

/// Settles a promise without being one. Obtained from
/// [`FlushablePromise::with_resolver`] or [`FlushablePromise::resolver`].
pub struct Resolver<T, E> {
    shared: Rc<Shared<T, E>>,
}

impl<T, E> Clone for Resolver<T, E> {
    fn clone(&self) -> Self {
        Self {
            shared: self.shared.clone(),
        }
    }
}

impl<T: Clone + 'static, E: Clone + 'static> Resolver<T, E> {
    pub fn resolve(&self, value: T) {
        self.shared.settle(Ok(value))
    }

    pub fn reject(&self, reason: E) {
        self.shared.settle(Err(reason))
    }
}

impl<T: Clone + 'static, E: Clone + 'static> Settle<T, E> for Resolver<T, E> {
    fn resolve(&self, value: T) {
        Resolver::resolve(self, value)
    }

    fn reject(&self, reason: E) {
        Resolver::reject(self, reason)
    }
}

impl<T, E> fmt::Debug for Resolver<T, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Resolver").field("id", &self.shared.id).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::{FlushablePromise, PromiseState};
    use crate::Settle;
    use futures::{executor::LocalPool, task::LocalSpawnExt};
    use std::{cell::RefCell, rc::Rc};

    #[test]
    fn test_resolve_twice_keeps_first() {
        let p = FlushablePromise::<String, String>::new();
        p.resolve("hi".into());
        p.resolve("again".into());
        p.reject("nope".into());
        assert_eq!(p.state(), PromiseState::Fulfilled);
        assert_eq!(p.value(), Some("hi".to_string()));
    }

    #[test]
    fn test_reject_then_resolve_keeps_reason() {
        let p = FlushablePromise::<String, String>::new();
        p.reject("reject!!".into());
        p.resolve("late".into());
        assert_eq!(p.state(), PromiseState::Rejected);
        assert_eq!(p.reason(), Some("reject!!".to_string()));
    }

    #[test]
    fn test_new_is_pending_leaf() {
        let p = FlushablePromise::<i32, ()>::new();
        assert_eq!(p.state(), PromiseState::Pending);
        assert!(!p.is_root());
        assert!(p.source_ids().is_empty());
        assert_eq!(p.result(), None);
    }

    #[test]
    fn test_clones_share_identity() {
        let p = FlushablePromise::<i32, ()>::new();
        let q = p.clone();
        q.resolve(7);
        assert_eq!(p.id(), q.id());
        assert_eq!(p.value(), Some(7));
    }

    #[test]
    fn test_resolver_settles_through_trait() {
        fn settle_with<S: Settle<i32, ()>>(settle: &S) {
            settle.resolve(3);
        }
        let (p, resolver) = FlushablePromise::<i32, ()>::with_resolver();
        settle_with(&resolver);
        settle_with(&p);
        assert_eq!(p.value(), Some(3));
    }

    #[test]
    fn test_two_waiters_woken() {
        let mut pool = LocalPool::new();
        let spawner = pool.spawner();
        let (p, resolver) = FlushablePromise::<String, ()>::with_resolver();
        let seen = Rc::new(RefCell::new(Vec::new()));
        for waiter in [p.clone(), p] {
            let seen = seen.clone();
            spawner
                .spawn_local(async move {
                    let result = waiter.await;
                    seen.borrow_mut().push(result);
                })
                .unwrap();
        }
        pool.run_until_stalled();
        assert!(seen.borrow().is_empty());
        resolver.resolve("🍓".into());
        pool.run_until_stalled();
        assert_eq!(*seen.borrow(), vec![Ok("🍓".to_string()), Ok("🍓".to_string())]);
    }

    #[test]
    fn test_subscribe_after_settle_still_fires() {
        let p = FlushablePromise::<i32, ()>::new();
        p.resolve(1);
        let seen = Rc::new(RefCell::new(None));
        let out = seen.clone();
        p.subscribe(move |result| *out.borrow_mut() = Some(result));
        assert_eq!(*seen.borrow(), Some(Ok(1)));
    }
}
