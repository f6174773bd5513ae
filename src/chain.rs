use crate::{cell::WeakPromise, flush::Source, FlushablePromise};
use std::{any::Any, fmt, rc::Rc};

/// What a reaction hands back to the promise it derives.
///
/// `Nested` is how a reaction returns another promise; the derived promise is
/// then flattened onto it instead of being fulfilled with a promise value.
pub enum Reaction<T, E> {
    Value(T),
    Nested(FlushablePromise<T, E>),
    /// The reaction failed; the derived promise is rejected with this reason.
    Throw(E),
}

impl<T, E> From<Result<T, E>> for Reaction<T, E> {
    fn from(result: Result<T, E>) -> Self {
        match result {
            Ok(value) => Reaction::Value(value),
            Err(reason) => Reaction::Throw(reason),
        }
    }
}

impl<T, E> From<FlushablePromise<T, E>> for Reaction<T, E> {
    fn from(promise: FlushablePromise<T, E>) -> Self {
        Reaction::Nested(promise)
    }
}

impl<T: fmt::Debug, E: fmt::Debug> fmt::Debug for Reaction<T, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Reaction::Value(value) => f.debug_tuple("Value").field(value).finish(),
            Reaction::Nested(promise) => f.debug_tuple("Nested").field(promise).finish(),
            Reaction::Throw(reason) => f.debug_tuple("Throw").field(reason).finish(),
        }
    }
}

/// How a derived promise takes over a promise its reaction returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Flatten {
    /// Settle the nested promise with the outer outcome first.
    Force,
    /// Wait for the nested promise to settle on its own.
    Adopt,
}

/// The outer outcome as the nested promise's outcome, when it fits.
///
/// A reason always fits, the error type is shared along a chain. A value only
/// fits when the reaction kept the value type.
fn forced<T, U, E>(outer: &Result<T, E>) -> Option<Result<U, E>>
where
    T: Clone + 'static,
    U: 'static,
    E: Clone,
{
    match outer {
        Ok(value) => (Box::new(value.clone()) as Box<dyn Any>)
            .downcast::<U>()
            .ok()
            .map(|value| Ok(*value)),
        Err(reason) => Some(Err(reason.clone())),
    }
}

impl<T: Clone + 'static, E: Clone + 'static> FlushablePromise<T, E> {
    /// Derive a promise from this one's fulfillment. A rejection passes
    /// through unchanged.
    ///
    /// A promise returned through [`Reaction::Nested`] is linked for flushing,
    /// resolved with this promise's value when the value type is unchanged,
    /// and then followed by the derived promise.
    pub fn then<U, F>(&self, on_fulfilled: F) -> FlushablePromise<U, E>
    where
        U: Clone + 'static,
        F: FnOnce(T) -> Reaction<U, E> + 'static,
    {
        self.derive(
            move |result| match result {
                Ok(value) => on_fulfilled(value),
                Err(reason) => Reaction::Throw(reason),
            },
            Flatten::Force,
        )
    }

    /// Derive a promise from either outcome of this one.
    ///
    /// A nested promise returned by `on_rejected` is rejected with this
    /// promise's reason before the derived promise follows it.
    ///
    /// # Examples
    ///
    /// ```
    /// use flushable_promise::{FlushablePromise, Reaction};
    /// let p = FlushablePromise::<i32, String>::new();
    /// let recovered = p.then_or_else(
    ///     |x| Reaction::Value(x.to_string()),
    ///     |e| Reaction::Value(format!("error: {e}")),
    /// );
    /// p.reject("💥".into());
    /// assert_eq!(recovered.value().as_deref(), Some("error: 💥"));
    /// ```
    pub fn then_or_else<U, F, R>(&self, on_fulfilled: F, on_rejected: R) -> FlushablePromise<U, E>
    where
        U: Clone + 'static,
        F: FnOnce(T) -> Reaction<U, E> + 'static,
        R: FnOnce(E) -> Reaction<U, E> + 'static,
    {
        self.derive(
            move |result| match result {
                Ok(value) => on_fulfilled(value),
                Err(reason) => on_rejected(reason),
            },
            Flatten::Force,
        )
    }

    pub fn catch<R>(&self, on_rejected: R) -> FlushablePromise<T, E>
    where
        R: FnOnce(E) -> Reaction<T, E> + 'static,
    {
        self.then_or_else(Reaction::Value, on_rejected)
    }

    /// Like [`then_or_else`](Self::then_or_else), but a nested promise is
    /// never forced: the derived promise waits for its own outcome.
    ///
    /// # Examples
    ///
    /// ```
    /// use flushable_promise::{FlushablePromise, Reaction};
    /// let a = FlushablePromise::<i32, ()>::new();
    /// let inner = FlushablePromise::<i32, ()>::new();
    /// let returned = inner.clone();
    /// let b = a.then_adopting(move |_| Reaction::Nested(returned), Reaction::Throw);
    /// a.resolve(1);
    /// assert!(b.is_pending());
    /// inner.resolve(2);
    /// assert_eq!(b.value(), Some(2));
    /// ```
    pub fn then_adopting<U, F, R>(&self, on_fulfilled: F, on_rejected: R) -> FlushablePromise<U, E>
    where
        U: Clone + 'static,
        F: FnOnce(T) -> Reaction<U, E> + 'static,
        R: FnOnce(E) -> Reaction<U, E> + 'static,
    {
        self.derive(
            move |result| match result {
                Ok(value) => on_fulfilled(value),
                Err(reason) => on_rejected(reason),
            },
            Flatten::Adopt,
        )
    }

    /// Run `on_finally` once this promise settles, then settle the derived
    /// promise the same way this one did.
    ///
    /// If `on_finally` returns a promise the outcome waits for it. A `Throw`,
    /// or a returned promise that rejects, rejects the derived promise instead.
    pub fn finally<R, F>(&self, on_finally: F) -> FlushablePromise<T, E>
    where
        R: Clone + 'static,
        F: FnOnce() -> Reaction<R, E> + 'static,
    {
        // Forcing would settle the continuation before the gate, so adopt.
        self.derive(
            move |result| {
                let gate = FlushablePromise::from_reaction(on_finally());
                Reaction::Nested(gate.then(move |_| Reaction::<T, E>::from(result)))
            },
            Flatten::Adopt,
        )
    }

    /// Shared body of every chain operator.
    fn derive<U, H>(&self, handler: H, flatten: Flatten) -> FlushablePromise<U, E>
    where
        U: Clone + 'static,
        H: FnOnce(Result<T, E>) -> Reaction<U, E> + 'static,
    {
        let derived = FlushablePromise::<U, E>::new();
        derived.add_sources([self.as_source()]);

        // The reaction lives in our own list; a strong link would keep us alive.
        let source = Rc::downgrade(&self.shared);
        let weak = derived.downgrade();
        self.subscribe(move |result| {
            let outer = match flatten {
                Flatten::Force => forced(&result),
                Flatten::Adopt => None,
            };
            // The handler runs even if no one holds the derived promise.
            let reaction = handler(result);
            if let Some(derived) = weak.upgrade() {
                match reaction {
                    Reaction::Value(value) => derived.resolve(value),
                    Reaction::Throw(reason) => derived.reject(reason),
                    Reaction::Nested(nested) => {
                        if let Some(source) = source.upgrade() {
                            nested.add_sources([source as Rc<dyn Source>]);
                        }
                        derived.add_sources([nested.as_source()]);
                        if let Some(outer) = outer {
                            nested.settle(outer);
                        }
                        derived.adopt(&nested);
                    }
                }
            }
        });
        derived
    }

    /// Settle this promise with whatever `nested` settles with.
    fn adopt(&self, nested: &FlushablePromise<T, E>) {
        let weak: WeakPromise<T, E> = self.downgrade();
        nested.subscribe(move |result| weak.settle(result));
    }
}

#[cfg(test)]
mod tests {
    use crate::{FlushablePromise, PromiseState, Reaction};
    use std::{cell::RefCell, rc::Rc};

    #[test]
    fn test_then_links_source() {
        let a = FlushablePromise::<i32, ()>::new();
        let b = a.then(|x| Reaction::Value(x + 1));
        assert_eq!(b.source_ids(), vec![a.id()]);
        assert!(!b.is_root());
    }

    #[test]
    fn test_rejection_passes_through_then() {
        let a = FlushablePromise::<i32, String>::new();
        let b = a.then(|x| Reaction::Value(x + 1));
        let c = b.then(|x| Reaction::Value(x * 2));
        a.reject("reject!!".into());
        assert_eq!(c.reason().as_deref(), Some("reject!!"));
    }

    #[test]
    fn test_throw_rejects_derived() {
        let a = FlushablePromise::<i32, String>::new();
        let b: FlushablePromise<i32, String> = a.then(|_| Reaction::Throw("bad".into()));
        a.resolve(1);
        assert_eq!(b.state(), PromiseState::Rejected);
        assert_eq!(b.reason().as_deref(), Some("bad"));
    }

    #[test]
    fn test_catch_recovers() {
        let a = FlushablePromise::<i32, String>::new();
        let b = a.catch(|e| Reaction::Value(e.len() as i32));
        a.reject("four".into());
        assert_eq!(b.value(), Some(4));

        let ok = FlushablePromise::<i32, String>::new();
        let untouched = ok.catch(|_| Reaction::Value(0));
        ok.resolve(9);
        assert_eq!(untouched.value(), Some(9));
    }

    #[test]
    fn test_then_forces_pending_nested_with_outer_value() {
        let a = FlushablePromise::<i32, String>::new();
        let inner = FlushablePromise::<i32, String>::new();
        let returned = inner.clone();
        let b = a.then(move |_| Reaction::Nested(returned));
        a.resolve(7);
        assert_eq!(inner.value(), Some(7));
        assert_eq!(b.value(), Some(7));
        assert_eq!(inner.source_ids(), vec![a.id()]);
        assert_eq!(b.source_ids(), vec![a.id(), inner.id()]);
        inner.resolve(99);
        assert_eq!(b.value(), Some(7));
    }

    #[test]
    fn test_catch_forces_pending_nested_with_outer_reason() {
        let a = FlushablePromise::<i32, String>::new();
        let inner = FlushablePromise::<i32, String>::new();
        let returned = inner.clone();
        let b = a.catch(move |_| Reaction::Nested(returned));
        a.reject("outer".into());
        assert_eq!(inner.reason().as_deref(), Some("outer"));
        assert_eq!(b.reason().as_deref(), Some("outer"));
    }

    #[test]
    fn test_then_keeps_already_settled_nested() {
        let a = FlushablePromise::<i32, ()>::new();
        let b = a.then(|_| Reaction::Nested(FlushablePromise::resolved(40)));
        a.resolve(1);
        assert_eq!(b.value(), Some(40));
    }

    #[test]
    fn test_then_adopts_nested_of_other_type() {
        let a = FlushablePromise::<i32, ()>::new();
        let inner = FlushablePromise::<String, ()>::new();
        let returned = inner.clone();
        let b = a.then(move |_| Reaction::Nested(returned));
        a.resolve(5);
        assert_eq!(b.state(), PromiseState::Pending);
        assert_eq!(b.source_ids(), vec![a.id(), inner.id()]);
        inner.resolve("inner".into());
        assert_eq!(b.value().as_deref(), Some("inner"));
    }

    #[test]
    fn test_adopting_waits_for_nested() {
        let a = FlushablePromise::<i32, ()>::new();
        let inner = FlushablePromise::<i32, ()>::new();
        let returned = inner.clone();
        let b = a.then_adopting(move |_| Reaction::Nested(returned), Reaction::Throw);
        a.resolve(5);
        assert!(inner.is_pending());
        assert!(b.is_pending());
        inner.resolve(6);
        assert_eq!(b.value(), Some(6));
    }

    #[test]
    fn test_flush_reaches_nested_root() {
        let a = FlushablePromise::<i32, ()>::new();
        let b = a.then_adopting(
            |x| Reaction::Nested(FlushablePromise::<i32, ()>::with_producer(move || x * 100)),
            Reaction::Throw,
        );
        a.resolve(2);
        assert!(b.is_pending());
        b.flush();
        assert_eq!(b.value(), Some(200));
    }

    #[test]
    fn test_pending_chain_is_freed() {
        let a = FlushablePromise::<i32, ()>::new();
        let b = a.then(|x| Reaction::Value(x + 1));
        let c = b.catch(Reaction::Throw);
        let root = Rc::downgrade(&a.shared);
        let middle = Rc::downgrade(&b.shared);
        drop(a);
        drop(b);
        drop(c);
        assert!(root.upgrade().is_none());
        assert!(middle.upgrade().is_none());
    }

    #[test]
    fn test_finally_keeps_outcome() {
        let calls = Rc::new(RefCell::new(0));
        let a = FlushablePromise::<i32, String>::new();
        let counter = calls.clone();
        let b = a.finally(move || {
            *counter.borrow_mut() += 1;
            Reaction::<(), String>::Value(())
        });
        a.resolve(3);
        assert_eq!(b.value(), Some(3));

        let r = FlushablePromise::<i32, String>::new();
        let counter = calls.clone();
        let s = r.finally(move || {
            *counter.borrow_mut() += 1;
            Reaction::<(), String>::Value(())
        });
        r.reject("no".into());
        assert_eq!(s.reason().as_deref(), Some("no"));
        assert_eq!(*calls.borrow(), 2);
    }

    #[test]
    fn test_finally_waits_for_returned_promise() {
        let a = FlushablePromise::<i32, String>::new();
        let gate = FlushablePromise::<(), String>::new();
        let returned = gate.clone();
        let b = a.finally(move || Reaction::Nested(returned));
        a.resolve(1);
        assert!(b.is_pending());
        gate.resolve(());
        assert_eq!(b.value(), Some(1));
    }

    #[test]
    fn test_finally_throw_overrides() {
        let a = FlushablePromise::<i32, String>::new();
        let b = a.finally(|| Reaction::<(), String>::Throw("cleanup failed".into()));
        a.resolve(1);
        assert_eq!(b.reason().as_deref(), Some("cleanup failed"));
    }

    #[test]
    fn test_handler_runs_when_derived_dropped() {
        let seen = Rc::new(RefCell::new(None));
        let a = FlushablePromise::<i32, ()>::new();
        let out = seen.clone();
        drop(a.then(move |x| {
            *out.borrow_mut() = Some(x);
            Reaction::Value(())
        }));
        a.resolve(8);
        assert_eq!(*seen.borrow(), Some(8));
    }

    #[test]
    fn test_reactions_fire_in_registration_order() {
        let log = Rc::new(RefCell::new(Vec::new()));
        let a = FlushablePromise::<i32, ()>::new();
        let mut derived = Vec::new();
        for tag in 0..3 {
            let log = log.clone();
            derived.push(a.then(move |_| {
                log.borrow_mut().push(tag);
                Reaction::Value(())
            }));
        }
        a.resolve(0);
        assert_eq!(*log.borrow(), vec![0, 1, 2]);
    }
}
