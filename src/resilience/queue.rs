//! Priority-ordered request queue.

use super::error::RequestError;
use futures::future::BoxFuture;
use std::collections::VecDeque;
use std::future::Future;
use tokio::sync::oneshot;
use tokio::time::Instant;

/// Result of running a queued request once.
pub(crate) enum Attempt {
    /// The caller has been answered.
    Delivered,
    /// The attempt failed. The request keeps its error until it is either
    /// retried or told to [`Dispatch::fail`].
    Failed {
        message: String,
        request: Box<dyn Dispatch>,
    },
}

/// A type-erased request: knows how to run itself and how to answer its caller.
pub(crate) trait Dispatch: Send {
    fn attempt(self: Box<Self>) -> BoxFuture<'static, Attempt>;

    /// Answer the caller with the error from the last attempt.
    fn fail(self: Box<Self>);

    /// Answer the caller with [`RequestError::QueueCleared`].
    fn cancel(self: Box<Self>, provider: &str);
}

pub(crate) type Reply<T, E> = oneshot::Sender<std::result::Result<T, RequestError<E>>>;

/// The concrete request behind a [`Dispatch`].
pub(crate) struct Pending<T, E, F> {
    request_fn: F,
    reply: Reply<T, E>,
    last_error: Option<E>,
}

impl<T, E, F> Pending<T, E, F> {
    pub(crate) fn new(request_fn: F, reply: Reply<T, E>) -> Self {
        Self {
            request_fn,
            reply,
            last_error: None,
        }
    }
}

impl<T, E, F, Fut> Dispatch for Pending<T, E, F>
where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = std::result::Result<T, E>> + Send + 'static,
    T: Send + 'static,
    E: std::fmt::Display + Send + 'static,
{
    fn attempt(self: Box<Self>) -> BoxFuture<'static, Attempt> {
        Box::pin(async move {
            let mut this = *self;
            match (this.request_fn)().await {
                Ok(value) => {
                    // receiver may be gone; nothing left to do either way
                    let _ = this.reply.send(Ok(value));
                    Attempt::Delivered
                }
                Err(e) => {
                    let message = e.to_string();
                    this.last_error = Some(e);
                    Attempt::Failed {
                        message,
                        request: Box::new(this),
                    }
                }
            }
        })
    }

    fn fail(self: Box<Self>) {
        let this = *self;
        let err = match this.last_error {
            Some(e) => RequestError::Failed(e),
            None => RequestError::Abandoned,
        };
        let _ = this.reply.send(Err(err));
    }

    fn cancel(self: Box<Self>, provider: &str) {
        let _ = self.reply.send(Err(RequestError::QueueCleared {
            provider: provider.to_string(),
        }));
    }
}

pub(crate) struct QueuedRequest {
    pub id: String,
    pub priority: i32,
    pub retry_count: u32,
    pub enqueued_at: Instant,
    pub request: Box<dyn Dispatch>,
}

/// Requests sorted by descending priority, FIFO among equals.
#[derive(Default)]
pub(crate) struct RequestQueue {
    entries: VecDeque<QueuedRequest>,
}

impl RequestQueue {
    /// Insert before the first entry with strictly lower priority.
    pub(crate) fn insert(&mut self, request: QueuedRequest) {
        match self
            .entries
            .iter()
            .position(|e| e.priority < request.priority)
        {
            Some(pos) => self.entries.insert(pos, request),
            None => self.entries.push_back(request),
        }
    }

    pub(crate) fn pop_front(&mut self) -> Option<QueuedRequest> {
        self.entries.pop_front()
    }

    pub(crate) fn drain_all(&mut self) -> Vec<QueuedRequest> {
        self.entries.drain(..).collect()
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
