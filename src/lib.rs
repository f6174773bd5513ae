//! A promise you can pull on.
//!
//! [`FlushablePromise`] settles the ordinary way, when some code calls
//! `resolve` or `reject`. It can also be *flushed*: [`flush`](FlushablePromise::flush)
//! walks back through the promises it was derived from until it reaches roots
//! built with a producer, and resolves those right away. The reactions already
//! wired up by `then` carry the values forward again, so the flushed promise
//! settles before `flush` returns.
//!
//! # Examples
//!
//! ```
//! use flushable_promise::{FlushablePromise, Reaction};
//! let p1 = FlushablePromise::<i32, ()>::with_producer(|| 32);
//! let p2 = p1.then(|x| Reaction::Value(x * 2));
//! // Nobody resolved p1 yet; pull the value through.
//! p2.flush();
//! assert_eq!(p2.value(), Some(64));
//! // Too late now, p1 is settled.
//! p1.resolve(16);
//! assert_eq!(p1.value(), Some(32));
//! ```
//!
//! Everything runs on the current thread. Reactions are queued and run in
//! settlement order before the outermost `resolve`, `reject` or `flush` call
//! returns.
mod cell;
mod chain;
mod combinators;
mod error;
mod flush;
mod microtask;

pub use cell::{CellId, FlushablePromise, PromiseState, Resolver};
pub use chain::Reaction;
pub use error::AggregateError;
pub use flush::Traversal;
pub use microtask::batch;

/// Something that can settle a promise.
///
/// Settling is first-come: once a promise is fulfilled or rejected, later
/// calls do nothing.
pub trait Settle<T, E> {
    ///promise.resolve
    fn resolve(&self, value: T);
    ///promise.reject
    fn reject(&self, reason: E);
}
