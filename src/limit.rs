use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use async_trait::async_trait;
use futures::Stream;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

use crate::error::BoxError;
use crate::source::{ChatRequest, ChunkSource, UpstreamStream};

/// Stream wrapper that releases a [`Semaphore`] permit when the inner stream
/// ends or the wrapper is dropped.
pub(crate) struct ReleasingStream<S> {
    inner: S,
    permit: Option<OwnedSemaphorePermit>,
}

impl<S> ReleasingStream<S> {
    pub fn new(inner: S, permit: OwnedSemaphorePermit) -> Self {
        Self {
            inner,
            permit: Some(permit),
        }
    }
}

impl<S> Stream for ReleasingStream<S>
where
    S: Stream + Unpin,
{
    type Item = S::Item;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let poll = Pin::new(&mut self.inner).poll_next(cx);
        if let Poll::Ready(None) = poll {
            let _ = self.permit.take();
        }
        poll
    }
}

/// Wrapper around a [`ChunkSource`] that limits how many upstream streams
/// run at once. Waiting requests are admitted in FIFO order.
#[derive(Clone)]
pub struct LimitedSource<S> {
    inner: S,
    semaphore: Arc<Semaphore>,
}

impl<S> LimitedSource<S> {
    /// Allow at most `max_concurrent` open streams; zero is treated as one.
    pub fn new(inner: S, max_concurrent: usize) -> Self {
        Self {
            inner,
            semaphore: Arc::new(Semaphore::new(max_concurrent.max(1))),
        }
    }

    /// Permits not currently held by an open stream.
    pub fn available(&self) -> usize {
        self.semaphore.available_permits()
    }
}

#[async_trait]
impl<S> ChunkSource for LimitedSource<S>
where
    S: ChunkSource,
{
    async fn open(&self, request: &ChatRequest) -> Result<UpstreamStream, BoxError> {
        tracing::trace!("waiting for upstream permit");
        let permit = self.semaphore.clone().acquire_owned().await?;
        tracing::trace!("upstream permit acquired");
        let stream = self.inner.open(request).await?;
        Ok(Box::pin(ReleasingStream::new(stream, permit)))
    }
}
