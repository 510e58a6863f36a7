use std::fmt;
use std::sync::Arc;

use futures::StreamExt;
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tracing::{Instrument, debug, error, info, info_span, warn};

use crate::buffer::{BufferStatus, ChunkStream, GenerationBuffer};
use crate::error::{GenerationError, PersistenceError, UpstreamError};
use crate::notify::Notifier;
use crate::registry::GenerationRegistry;
use crate::source::{ChatRequest, ChunkSource};
use crate::store::ChatStore;

/// Identifies the stored message a generation fills. The message id doubles
/// as the generation id.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct GenerationKey {
    pub chat_id: String,
    pub message_id: String,
}

impl GenerationKey {
    /// Key for the message `message_id` in chat `chat_id`.
    pub fn new(chat_id: impl Into<String>, message_id: impl Into<String>) -> Self {
        Self {
            chat_id: chat_id.into(),
            message_id: message_id.into(),
        }
    }

    /// Generation id, i.e. the message id.
    pub fn id(&self) -> &str {
        &self.message_id
    }
}

impl fmt::Display for GenerationKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.chat_id, self.message_id)
    }
}

/// What to do when the upstream fails before producing a single chunk.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EmptyFailure {
    /// Abort the buffer; the placeholder message is removed from the store.
    #[default]
    Abort,
    /// Finish with empty content; the message is kept, empty.
    Finish,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FailurePolicy {
    pub on_empty_failure: EmptyFailure,
}

/// Lifecycle of one generation id.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GenerationPhase {
    Pending,
    Streaming,
    Finished,
    Aborted,
    Persisted,
    Removed,
}

impl fmt::Display for GenerationPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            GenerationPhase::Pending => "pending",
            GenerationPhase::Streaming => "streaming",
            GenerationPhase::Finished => "finished",
            GenerationPhase::Aborted => "aborted",
            GenerationPhase::Persisted => "persisted",
            GenerationPhase::Removed => "removed",
        };
        f.write_str(s)
    }
}

/// Outcome of a driven generation, returned by the task spawned in
/// [`GenerationCoordinator::start`].
#[derive(Debug, Clone)]
pub struct GenerationReport {
    pub key: GenerationKey,
    /// Terminal buffer status.
    pub status: BufferStatus,
    pub content: String,
    pub chunks: usize,
    /// Always [`GenerationPhase::Removed`] once the task returns.
    pub phase: GenerationPhase,
    pub upstream_error: Option<UpstreamError>,
    /// Whether the final content reached the chat store.
    pub persisted: bool,
}

#[derive(Debug, Clone)]
struct Notice {
    title: String,
    preview_chars: usize,
}

struct PhaseTracker<'a> {
    id: &'a str,
    phase: GenerationPhase,
}

impl PhaseTracker<'_> {
    fn advance(&mut self, next: GenerationPhase) {
        debug!(generation = %self.id, from = %self.phase, to = %next, "phase transition");
        self.phase = next;
    }
}

/// Drives chunk sources into registered buffers, persists the final text and
/// exposes follow/interrupt by generation id.
#[derive(Clone)]
pub struct GenerationCoordinator {
    registry: GenerationRegistry,
    store: Arc<dyn ChatStore>,
    notifier: Arc<dyn Notifier>,
    policy: FailurePolicy,
    notice: Notice,
}

impl GenerationCoordinator {
    pub fn new(
        registry: GenerationRegistry,
        store: Arc<dyn ChatStore>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        Self {
            registry,
            store,
            notifier,
            policy: FailurePolicy::default(),
            notice: Notice {
                title: "Response ready".into(),
                preview_chars: 120,
            },
        }
    }

    /// Replace the upstream failure policy.
    pub fn with_policy(mut self, policy: FailurePolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Set the notification title and how many characters of the response
    /// the notice carries.
    pub fn with_notice(mut self, title: impl Into<String>, preview_chars: usize) -> Self {
        self.notice = Notice {
            title: title.into(),
            preview_chars,
        };
        self
    }

    /// Registry holding the live buffers.
    pub fn registry(&self) -> &GenerationRegistry {
        &self.registry
    }

    /// Store final content is written to.
    pub fn store(&self) -> &Arc<dyn ChatStore> {
        &self.store
    }

    /// Register a buffer for `key` and drive `source` into it on a background
    /// task.
    ///
    /// Registration happens before this returns, so a second start for the
    /// same id fails here with [`GenerationError::DuplicateGeneration`].
    pub fn start(
        &self,
        key: GenerationKey,
        source: Arc<dyn ChunkSource>,
        request: ChatRequest,
    ) -> Result<JoinHandle<GenerationReport>, GenerationError> {
        let buffer = self.registry.create(key.message_id.clone())?;
        info!(generation = %key.message_id, chat = %key.chat_id, model = %request.model, "generation started");
        let this = self.clone();
        let span = info_span!("generation", id = %key.message_id);
        Ok(tokio::spawn(
            async move { this.drive(key, buffer, source, request).await }.instrument(span),
        ))
    }

    async fn drive(
        self,
        key: GenerationKey,
        buffer: GenerationBuffer,
        source: Arc<dyn ChunkSource>,
        request: ChatRequest,
    ) -> GenerationReport {
        let mut tracker = PhaseTracker {
            id: &key.message_id,
            phase: GenerationPhase::Pending,
        };
        let upstream_error = pull(&buffer, source.as_ref(), &request, &mut tracker).await;

        if !buffer.is_finished() {
            let empty = buffer.chunk_count() == 0;
            match upstream_error {
                Some(_) if empty && self.policy.on_empty_failure == EmptyFailure::Abort => {
                    buffer.abort()
                }
                _ => buffer.finish(),
            }
        }
        let status = buffer.status();
        tracker.advance(match status {
            BufferStatus::Aborted => GenerationPhase::Aborted,
            _ => GenerationPhase::Finished,
        });

        let content = buffer.result();
        let chunks = buffer.chunk_count();
        let persisted = match self.persist(&key, status, &content).await {
            Ok(()) => {
                tracker.advance(GenerationPhase::Persisted);
                true
            }
            Err(e) => {
                error!(generation = %key.message_id, error = %e, "dropping generation without persisting");
                false
            }
        };

        self.registry.remove(&key.message_id);
        tracker.advance(GenerationPhase::Removed);
        info!(generation = %key.message_id, ?status, chunks, persisted, "generation complete");

        GenerationReport {
            status,
            content,
            chunks,
            phase: tracker.phase,
            upstream_error,
            persisted,
            key,
        }
    }

    /// Write the terminal content to the store, then notify.
    ///
    /// An abort with nothing produced removes the placeholder message instead.
    /// An empty finished response is stored but not announced.
    /// A failed notification is logged but does not undo the write.
    async fn persist(
        &self,
        key: &GenerationKey,
        status: BufferStatus,
        content: &str,
    ) -> Result<(), PersistenceError> {
        let wrap = |source: anyhow::Error| PersistenceError {
            id: key.message_id.clone(),
            source,
        };
        if status == BufferStatus::Aborted && content.is_empty() {
            self.store
                .remove_message(&key.chat_id, &key.message_id)
                .await
                .map_err(wrap)?;
            return Ok(());
        }
        self.store
            .edit_message(&key.chat_id, &key.message_id, content, false)
            .await
            .map_err(wrap)?;

        if content.is_empty() {
            debug!(generation = %key.message_id, "empty response, no notice sent");
            return Ok(());
        }
        let preview: String = content.chars().take(self.notice.preview_chars).collect();
        if let Err(e) = self.notifier.notify(&self.notice.title, &preview).await {
            let e = wrap(e);
            warn!(generation = %key.message_id, error = %e, "notification failed");
        }
        Ok(())
    }

    /// Abort a live generation and return what it produced so far.
    ///
    /// `None` means the generation already completed; its final content is
    /// in the chat store.
    pub fn interrupt(&self, id: &str) -> Option<String> {
        let buffer = self.registry.get(id)?;
        buffer.abort();
        info!(generation = %id, chunks = buffer.chunk_count(), "generation interrupted");
        Some(buffer.result())
    }

    /// Replay and follow a live generation from its first chunk.
    ///
    /// Fails with [`GenerationError::NotLive`] once the generation has been
    /// persisted and removed; callers then read the stored message instead.
    pub fn follow_or_replay(&self, id: &str) -> Result<ChunkStream, GenerationError> {
        self.registry
            .get(id)
            .map(|buffer| buffer.subscribe())
            .ok_or_else(|| GenerationError::NotLive(id.to_string()))
    }
}

/// Pull chunks from `source` into `buffer` until the source ends, fails, or
/// the buffer is aborted. Returns the upstream failure, if any.
async fn pull(
    buffer: &GenerationBuffer,
    source: &dyn ChunkSource,
    request: &ChatRequest,
    tracker: &mut PhaseTracker<'_>,
) -> Option<UpstreamError> {
    let opened = tokio::select! {
        biased;
        _ = buffer.aborted() => return None,
        opened = source.open(request) => opened,
    };
    let mut stream = match opened {
        Ok(stream) => stream,
        Err(e) => {
            let e = UpstreamError::from(e);
            warn!(generation = %buffer.id(), error = %e, "upstream failed to open");
            return Some(e);
        }
    };

    loop {
        let next = tokio::select! {
            biased;
            _ = buffer.aborted() => return None,
            next = stream.next() => next,
        };
        match next {
            Some(Ok(chunk)) => {
                if tracker.phase == GenerationPhase::Pending {
                    tracker.advance(GenerationPhase::Streaming);
                }
                tracing::trace!(generation = %buffer.id(), %chunk, "chunk");
                buffer.append(chunk);
            }
            Some(Err(e)) => {
                warn!(generation = %buffer.id(), chunks = buffer.chunk_count(), error = %e, "upstream failed mid-stream");
                return Some(e);
            }
            None => return None,
        }
    }
}
