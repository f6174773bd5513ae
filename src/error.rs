use thiserror::Error;

/// The rejection reason of [`FlushablePromise::any`](crate::FlushablePromise::any)
/// when every input was rejected.
///
/// `reasons` holds every collected reason in the order the rejections arrived,
/// which is not necessarily the input order.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("all {} promises were rejected", .reasons.len())]
pub struct AggregateError<E> {
    pub reasons: Vec<E>,
}

impl<E> AggregateError<E> {
    pub fn new(reasons: Vec<E>) -> Self {
        Self { reasons }
    }

    pub fn is_empty(&self) -> bool {
        self.reasons.is_empty()
    }
}
