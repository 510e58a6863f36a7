use futures::StreamExt;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio_util::sync::CancellationToken;

use crate::coordinator::{GenerationCoordinator, GenerationKey};
use crate::error::{GenerationError, SessionError};

/// How a relay ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelayOutcome {
    /// The live generation finished or was aborted and every chunk was written.
    Completed { chunks: usize },
    /// The caller cancelled before the generation ended.
    Cancelled { chunks: usize },
    /// No live generation; the stored content was written in one piece.
    FromStore,
}

/// Relays one generation to an outward-facing sink.
///
/// Cancelling a relay detaches only this reader; the generation and its
/// other readers are unaffected.
#[derive(Clone)]
pub struct ConsumerSession {
    coordinator: GenerationCoordinator,
}

impl ConsumerSession {
    /// Session relaying generations owned by `coordinator`.
    pub fn new(coordinator: GenerationCoordinator) -> Self {
        Self { coordinator }
    }

    /// Copy the generation for `key` into `sink` from its first chunk until
    /// it ends or `cancel` fires.
    ///
    /// When the generation is no longer live the stored message content is
    /// written once instead.
    pub async fn relay<W>(
        &self,
        key: &GenerationKey,
        sink: &mut W,
        cancel: &CancellationToken,
    ) -> Result<RelayOutcome, SessionError>
    where
        W: AsyncWrite + Unpin,
    {
        let mut stream = match self.coordinator.follow_or_replay(key.id()) {
            Ok(stream) => stream,
            Err(GenerationError::NotLive(_)) => {
                tracing::debug!(generation = %key, "not live, relaying stored content");
                return self.write_stored(key, sink).await;
            }
            Err(e) => return Err(e.into()),
        };

        let mut chunks = 0usize;
        loop {
            let next = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    tracing::debug!(generation = %key, chunks, "relay cancelled");
                    return Ok(RelayOutcome::Cancelled { chunks });
                }
                next = stream.next() => next,
            };
            let Some(chunk) = next else {
                break;
            };
            sink.write_all(chunk.as_bytes()).await?;
            sink.flush().await?;
            chunks += 1;
        }
        tracing::debug!(generation = %key, chunks, "relay completed");
        Ok(RelayOutcome::Completed { chunks })
    }

    async fn write_stored<W>(
        &self,
        key: &GenerationKey,
        sink: &mut W,
    ) -> Result<RelayOutcome, SessionError>
    where
        W: AsyncWrite + Unpin,
    {
        let message = self
            .coordinator
            .store()
            .get_message(&key.chat_id, &key.message_id)
            .await
            .map_err(SessionError::Store)?
            .ok_or_else(|| SessionError::MessageNotFound {
                chat_id: key.chat_id.clone(),
                message_id: key.message_id.clone(),
            })?;
        sink.write_all(message.content.as_bytes()).await?;
        sink.flush().await?;
        Ok(RelayOutcome::FromStore)
    }
}
