//! Future for the result of a shard request.

use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

use futures_util::future::BoxFuture;
use tokio::sync::oneshot;

use crate::error::{GraphError, Result};

pub(crate) type Reply<T> = oneshot::Sender<Result<T>>;

/// Result of a request already sent to a shard.
///
/// The request is enqueued when the `Pending` is created, not when it is
/// first polled, so dropping it does not cancel the request and requests
/// from one caller reach a shard in the order they were issued.
///
/// Resolves to `GraphError::Unavailable` if the shard task stops before
/// replying.
#[must_use = "the request is already sent; await the Pending to observe its result"]
pub struct Pending<T> {
    state: State<T>,
}

enum State<T> {
    Waiting {
        rx: oneshot::Receiver<Result<T>>,
        shard: String,
    },
    Ready(Option<Result<T>>),
    Deferred(BoxFuture<'static, Result<T>>),
}

// Never pin-projected: receiver and boxed future are Unpin, ready values are moved out.
impl<T> Unpin for Pending<T> {}

impl<T> Pending<T> {
    pub(crate) fn channel(shard: String) -> (Reply<T>, Self) {
        let (tx, rx) = oneshot::channel();
        (tx, Self { state: State::Waiting { rx, shard } })
    }

    /// Already-resolved result, for failures detected before any send.
    pub fn ready(result: Result<T>) -> Self {
        Self { state: State::Ready(Some(result)) }
    }

    /// Wrap a follow-up computation, e.g. a read that re-routes after a split.
    pub(crate) fn deferred<F>(future: F) -> Self
    where
        F: Future<Output = Result<T>> + Send + 'static,
    {
        Self { state: State::Deferred(Box::pin(future)) }
    }

    pub(crate) fn unavailable(shard: String) -> Self {
        Self::ready(Err(GraphError::Unavailable(format!("shard {} mailbox closed", shard))))
    }
}

impl<T> Future for Pending<T> {
    type Output = Result<T>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match &mut self.get_mut().state {
            State::Waiting { rx, shard } => match Pin::new(rx).poll(cx) {
                Poll::Ready(Ok(result)) => Poll::Ready(result),
                Poll::Ready(Err(_)) => Poll::Ready(Err(GraphError::Unavailable(format!(
                    "shard {} dropped the request",
                    shard
                )))),
                Poll::Pending => Poll::Pending,
            },
            State::Deferred(future) => future.as_mut().poll(cx),
            State::Ready(result) => Poll::Ready(
                result
                    .take()
                    .unwrap_or_else(|| Err(GraphError::Unavailable("polled after completion".into()))),
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_reply_resolves() {
        let (tx, pending) = Pending::<u32>::channel("g[0]".into());
        tx.send(Ok(7)).unwrap();
        assert_eq!(pending.await.unwrap(), 7);
    }

    #[tokio::test]
    async fn test_dropped_reply_is_unavailable() {
        let (tx, pending) = Pending::<u32>::channel("g[0]".into());
        drop(tx);
        let err = pending.await.unwrap_err();
        assert!(matches!(err, GraphError::Unavailable(_)));
    }

    #[tokio::test]
    async fn test_deferred_runs_follow_up() {
        let (tx, first) = Pending::<u32>::channel("g[0]".into());
        let pending = Pending::deferred(async move { first.await.map(|v| v * 2) });
        tx.send(Ok(21)).unwrap();
        assert_eq!(pending.await.unwrap(), 42);
    }

    #[tokio::test]
    async fn test_ready_passes_error_through() {
        let pending = Pending::<u32>::ready(Err(GraphError::GraphNotFound("g".into())));
        assert!(pending.await.unwrap_err().is_not_found());
    }
}
