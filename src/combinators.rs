//! Promises built from many promises.
//!
//! The combined promise keeps every input as a flush source, so flushing it
//! pulls on all of them. Inputs only hold the combined promise weakly.
use crate::{AggregateError, FlushablePromise, Reaction};
use std::{cell::RefCell, rc::Rc};

struct Slots<T> {
    values: Vec<Option<T>>,
    remaining: usize,
}

impl<T: Clone + 'static, E: Clone + 'static> FlushablePromise<T, E> {
    /// A promise already fulfilled with `value`.
    pub fn resolved(value: T) -> Self {
        let promise = Self::new();
        promise.resolve(value);
        promise
    }

    /// A promise already rejected with `reason`.
    pub fn rejected(reason: E) -> Self {
        let promise = Self::new();
        promise.reject(reason);
        promise
    }

    /// Turn a reaction's result into a promise. A nested promise is returned
    /// as is; anything else becomes an already settled promise.
    pub fn from_reaction(reaction: Reaction<T, E>) -> Self {
        match reaction {
            Reaction::Value(value) => Self::resolved(value),
            Reaction::Nested(promise) => promise,
            Reaction::Throw(reason) => Self::rejected(reason),
        }
    }

    /// Fulfilled with every input's value, in input order, once all of them
    /// are fulfilled. Rejected with the first rejection to arrive.
    ///
    /// Inputs that settle after a rejection keep running; they just no
    /// longer matter. An empty input is fulfilled with an empty `Vec`.
    ///
    /// # Examples
    ///
    /// ```
    /// use flushable_promise::FlushablePromise;
    /// let inputs: Vec<_> = (0..3).map(|_| FlushablePromise::<i32, ()>::new()).collect();
    /// let all = FlushablePromise::all(inputs.clone());
    /// inputs[2].resolve(3);
    /// inputs[0].resolve(1);
    /// inputs[1].resolve(2);
    /// assert_eq!(all.value(), Some(vec![1, 2, 3]));
    /// ```
    pub fn all(promises: impl IntoIterator<Item = FlushablePromise<T, E>>) -> FlushablePromise<Vec<T>, E> {
        let promises: Vec<_> = promises.into_iter().collect();
        let combined = FlushablePromise::<Vec<T>, E>::new();
        if promises.is_empty() {
            combined.resolve(vec![]);
            return combined;
        }
        combined.add_sources(promises.iter().map(FlushablePromise::as_source));

        let slots = Rc::new(RefCell::new(Slots {
            values: vec![None; promises.len()],
            remaining: promises.len(),
        }));
        for (index, promise) in promises.iter().enumerate() {
            let slots = slots.clone();
            let weak = combined.downgrade();
            promise.subscribe(move |result| match result {
                Ok(value) => {
                    let done = {
                        let mut slots = slots.borrow_mut();
                        slots.values[index] = Some(value);
                        slots.remaining -= 1;
                        if slots.remaining == 0 {
                            Some(slots.values.drain(..).flatten().collect())
                        } else {
                            None
                        }
                    };
                    if let Some(values) = done {
                        weak.settle(Ok(values));
                    }
                }
                Err(reason) => weak.settle(Err(reason)),
            });
        }
        combined
    }

    /// Settled exactly like whichever input settles first. An empty input
    /// never settles.
    pub fn race(promises: impl IntoIterator<Item = FlushablePromise<T, E>>) -> FlushablePromise<T, E> {
        let combined = FlushablePromise::<T, E>::new();
        for promise in promises {
            combined.add_sources([promise.as_source()]);
            let weak = combined.downgrade();
            promise.subscribe(move |result| weak.settle(result));
        }
        combined
    }

    /// Fulfilled with the first input to fulfill. Rejected only once every
    /// input has rejected, with all their reasons in arrival order.
    ///
    /// An empty input is rejected right away with an empty aggregate.
    pub fn any(
        promises: impl IntoIterator<Item = FlushablePromise<T, E>>,
    ) -> FlushablePromise<T, AggregateError<E>> {
        let promises: Vec<_> = promises.into_iter().collect();
        let combined = FlushablePromise::<T, AggregateError<E>>::new();
        if promises.is_empty() {
            combined.reject(AggregateError::new(vec![]));
            return combined;
        }
        combined.add_sources(promises.iter().map(FlushablePromise::as_source));

        let total = promises.len();
        let reasons = Rc::new(RefCell::new(Vec::with_capacity(total)));
        for promise in &promises {
            let reasons = reasons.clone();
            let weak = combined.downgrade();
            promise.subscribe(move |result| match result {
                Ok(value) => weak.settle(Ok(value)),
                Err(reason) => {
                    let all_rejected = {
                        let mut reasons = reasons.borrow_mut();
                        reasons.push(reason);
                        (reasons.len() == total).then(|| std::mem::take(&mut *reasons))
                    };
                    if let Some(reasons) = all_rejected {
                        weak.settle(Err(AggregateError::new(reasons)));
                    }
                }
            });
        }
        combined
    }
}
