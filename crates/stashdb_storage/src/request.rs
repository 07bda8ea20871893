//! Pending platform requests.

use crate::error::{StorageError, StorageResult};
use futures::future::BoxFuture;
use futures::FutureExt;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

/// A pending storage operation.
///
/// Data requests complete synchronously and resolve on first poll; open and
/// delete requests make progress while they are awaited, because they may
/// have to wait for other connections to close. A request resolves exactly
/// once: polling it again after completion yields an `AbortError`.
#[must_use = "requests do nothing unless awaited"]
pub struct Request<T> {
    state: RequestState<T>,
}

enum RequestState<T> {
    Ready(Option<StorageResult<T>>),
    Deferred(BoxFuture<'static, StorageResult<T>>),
    Done,
}

impl<T> Request<T> {
    /// Creates a request that already holds its result.
    pub(crate) fn ready(result: StorageResult<T>) -> Self {
        Self {
            state: RequestState::Ready(Some(result)),
        }
    }

    /// Creates a request driven by the given future.
    pub(crate) fn deferred<F>(future: F) -> Self
    where
        F: Future<Output = StorageResult<T>> + Send + 'static,
    {
        Self {
            state: RequestState::Deferred(future.boxed()),
        }
    }

    /// Returns true if the result has already been produced or taken.
    #[must_use]
    pub fn is_settled(&self) -> bool {
        !matches!(self.state, RequestState::Deferred(_))
    }
}

impl<T> Unpin for Request<T> {}

impl<T> Future for Request<T> {
    type Output = StorageResult<T>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        let result = match &mut this.state {
            RequestState::Ready(result) => result.take(),
            RequestState::Deferred(future) => match future.as_mut().poll(cx) {
                Poll::Ready(result) => Some(result),
                Poll::Pending => return Poll::Pending,
            },
            RequestState::Done => None,
        };
        this.state = RequestState::Done;
        Poll::Ready(result.unwrap_or_else(|| {
            Err(StorageError::Aborted("request was already resolved".into()))
        }))
    }
}

impl<T> fmt::Debug for Request<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = match self.state {
            RequestState::Ready(_) => "ready",
            RequestState::Deferred(_) => "pending",
            RequestState::Done => "done",
        };
        f.debug_struct("Request").field("state", &state).finish()
    }
}
