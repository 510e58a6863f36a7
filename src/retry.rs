use async_trait::async_trait;
use std::time::Duration;

use crate::error::BoxError;
use crate::source::{ChatRequest, ChunkSource, UpstreamStream};

/// Policy controlling how many times an operation is retried and the delay
/// between attempts.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Maximum number of additional attempts to make after the first failure.
    pub max_retries: usize,
    /// Delay between retry attempts.
    pub delay: Duration,
}

impl RetryPolicy {
    /// Create a new policy.
    pub fn new(max_retries: usize, delay: Duration) -> Self {
        Self { max_retries, delay }
    }

    /// Execute `op` retrying on error according to the policy.
    pub async fn retry<F, Fut, T, E>(&self, mut op: F) -> Result<T, E>
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = Result<T, E>>,
        E: std::fmt::Display,
    {
        let mut attempts = 0usize;
        loop {
            match op().await {
                Ok(v) => return Ok(v),
                Err(e) if attempts < self.max_retries => {
                    attempts += 1;
                    tracing::warn!(error = %e, attempt = attempts, "retrying after failure");
                    tokio::time::sleep(self.delay).await;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

/// Wrapper around a [`ChunkSource`] that retries opening the stream.
///
/// Only `open` is retried. Once chunks are flowing a failure ends the
/// generation, since replaying the request would duplicate delivered text.
#[derive(Clone)]
pub struct RetryingSource<S> {
    inner: S,
    policy: RetryPolicy,
}

impl<S> RetryingSource<S> {
    /// Wrap `inner`, retrying its `open` according to `policy`.
    pub fn new(inner: S, policy: RetryPolicy) -> Self {
        Self { inner, policy }
    }
}

#[async_trait]
impl<S> ChunkSource for RetryingSource<S>
where
    S: ChunkSource,
{
    async fn open(&self, request: &ChatRequest) -> Result<UpstreamStream, BoxError> {
        self.policy.retry(|| self.inner.open(request)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::UpstreamError;
    use crate::source::GenerationOptions;
    use futures::StreamExt;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct FlakySource {
        fails: AtomicUsize,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl ChunkSource for FlakySource {
        async fn open(&self, _request: &ChatRequest) -> Result<UpstreamStream, BoxError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self
                .fails
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok()
            {
                Err("fail".into())
            } else {
                Ok(Box::pin(futures::stream::once(async {
                    Ok::<_, UpstreamError>("ok".to_string())
                })))
            }
        }
    }

    fn request() -> ChatRequest {
        ChatRequest {
            model: "m".into(),
            messages: Vec::new(),
            options: GenerationOptions::default(),
        }
    }

    #[tokio::test]
    async fn retries_open_until_success() {
        let source = RetryingSource::new(
            FlakySource {
                fails: AtomicUsize::new(2),
                calls: AtomicUsize::new(0),
            },
            RetryPolicy::new(3, Duration::from_millis(1)),
        );
        let mut stream = source.open(&request()).await.unwrap();
        assert_eq!(stream.next().await, Some(Ok("ok".to_string())));
        assert_eq!(source.inner.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn gives_up_after_max_retries() {
        let source = RetryingSource::new(
            FlakySource {
                fails: AtomicUsize::new(5),
                calls: AtomicUsize::new(0),
            },
            RetryPolicy::new(1, Duration::from_millis(1)),
        );
        assert!(source.open(&request()).await.is_err());
        assert_eq!(source.inner.calls.load(Ordering::SeqCst), 2);
    }
}
