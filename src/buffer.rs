//! Replayable output buffer for a single generation.
//!
//! A [`GenerationBuffer`] has exactly one writer (the coordinator driving the
//! chunk source) and any number of readers. Every reader starts at the first
//! chunk, drains whatever is buffered and then follows new chunks live until
//! the buffer is finished or aborted.
//!
//! State lives inside a [`tokio::sync::watch`] channel. Writers mutate it with
//! `send_if_modified`, which bumps the channel version; readers mark the
//! current version as seen *before* inspecting the state, so a write landing
//! between the inspection and the wait still wakes them.

use std::sync::Arc;

use futures::StreamExt;
use futures::stream::BoxStream;
use tokio::sync::watch;

/// Lazily evaluated sequence of chunks produced by [`GenerationBuffer::subscribe`].
pub type ChunkStream = BoxStream<'static, String>;

/// Lifecycle status of a buffer. `Finished` and `Aborted` are terminal and
/// mutually exclusive.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum BufferStatus {
    #[default]
    Active,
    Finished,
    Aborted,
}

impl BufferStatus {
    /// Whether no more chunks will ever arrive.
    pub fn is_terminal(self) -> bool {
        !matches!(self, BufferStatus::Active)
    }
}

#[derive(Debug, Default)]
struct BufferState {
    chunks: Vec<String>,
    status: BufferStatus,
}

struct Inner {
    id: String,
    state: watch::Sender<BufferState>,
}

/// Shared handle to the accumulated output of one generation.
///
/// Cloning is cheap; all clones refer to the same buffer.
#[derive(Clone)]
pub struct GenerationBuffer {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for GenerationBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.inner.state.borrow();
        f.debug_struct("GenerationBuffer")
            .field("id", &self.inner.id)
            .field("chunks", &state.chunks.len())
            .field("status", &state.status)
            .finish()
    }
}

impl GenerationBuffer {
    /// Create an empty, active buffer.
    pub fn new(id: impl Into<String>) -> Self {
        let (state, _) = watch::channel(BufferState::default());
        Self {
            inner: Arc::new(Inner {
                id: id.into(),
                state,
            }),
        }
    }

    /// Generation id this buffer belongs to.
    pub fn id(&self) -> &str {
        &self.inner.id
    }

    /// Append a chunk and wake waiting readers.
    ///
    /// Ignored once the buffer is finished or aborted; a producer still in
    /// flight when an interrupt lands must not extend the output.
    pub fn append(&self, chunk: impl Into<String>) {
        let chunk = chunk.into();
        let appended = self.inner.state.send_if_modified(|state| {
            if state.status.is_terminal() {
                return false;
            }
            state.chunks.push(chunk);
            true
        });
        if !appended {
            tracing::trace!(generation = %self.inner.id, "append after terminal state ignored");
        }
    }

    /// Mark the buffer finished. No-op if it already reached a terminal state.
    pub fn finish(&self) {
        self.terminate(BufferStatus::Finished);
    }

    /// Mark the buffer aborted. No-op if it already reached a terminal state.
    pub fn abort(&self) {
        self.terminate(BufferStatus::Aborted);
    }

    fn terminate(&self, status: BufferStatus) {
        self.inner.state.send_if_modified(|state| {
            if state.status.is_terminal() {
                return false;
            }
            state.status = status;
            true
        });
    }

    /// Current status.
    pub fn status(&self) -> BufferStatus {
        self.inner.state.borrow().status
    }

    /// True only after [`abort`](Self::abort) won the race to a terminal state.
    pub fn is_aborted(&self) -> bool {
        self.status() == BufferStatus::Aborted
    }

    /// True once finished *or* aborted: no more data will arrive.
    pub fn is_finished(&self) -> bool {
        self.status().is_terminal()
    }

    /// Number of chunks appended so far.
    pub fn chunk_count(&self) -> usize {
        self.inner.state.borrow().chunks.len()
    }

    /// Concatenation of every chunk appended so far.
    pub fn result(&self) -> String {
        self.inner.state.borrow().chunks.concat()
    }

    /// Whether `other` is a handle to the same buffer.
    pub fn same_buffer(&self, other: &GenerationBuffer) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// Start a fresh reader positioned at the first chunk.
    pub fn subscriber(&self) -> Subscription {
        Subscription {
            rx: self.inner.state.subscribe(),
            cursor: 0,
            phase: ReadPhase::NotStarted,
        }
    }

    /// Replay everything buffered so far, then follow live until the buffer
    /// finishes or aborts. Every call starts again from the first chunk.
    ///
    /// Abort ends the stream the same way finish does; it is not an error.
    pub fn subscribe(&self) -> ChunkStream {
        futures::stream::unfold(self.subscriber(), |mut sub| async move {
            sub.next_chunk().await.map(|chunk| (chunk, sub))
        })
        .boxed()
    }

    /// Resolves once the buffer has been aborted.
    ///
    /// Never resolves for a buffer that finishes normally.
    pub async fn aborted(&self) {
        let mut rx = self.inner.state.subscribe();
        let observed = rx
            .wait_for(|state| state.status == BufferStatus::Aborted)
            .await
            .map(|_| ())
            .is_ok();
        if !observed {
            std::future::pending::<()>().await;
        }
    }
}

/// Position of a [`Subscription`] in its read cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadPhase {
    /// Nothing read yet.
    NotStarted,
    /// Yielding chunks that were already buffered.
    Draining,
    /// Caught up; suspended until the writer changes state.
    Waiting,
    /// Terminal state observed and every chunk delivered.
    Done,
}

/// Cursor of one reader into a [`GenerationBuffer`].
///
/// The cursor only ever moves forward by one per yielded chunk, so a reader
/// can neither skip nor repeat a chunk when it crosses from replaying the
/// backlog into following live output.
pub struct Subscription {
    rx: watch::Receiver<BufferState>,
    cursor: usize,
    phase: ReadPhase,
}

enum Step {
    Yield(String),
    End,
    Wait,
}

impl Subscription {
    /// Index of the next chunk this reader will yield.
    pub fn cursor(&self) -> usize {
        self.cursor
    }

    /// Where this reader is in its read cycle.
    pub fn phase(&self) -> ReadPhase {
        self.phase
    }

    /// Next chunk in append order, or `None` once the buffer is finished or
    /// aborted and every chunk has been delivered.
    pub async fn next_chunk(&mut self) -> Option<String> {
        loop {
            if self.phase == ReadPhase::Done {
                return None;
            }
            let step = {
                let state = self.rx.borrow_and_update();
                match state.chunks.get(self.cursor) {
                    Some(chunk) => Step::Yield(chunk.clone()),
                    None if state.status.is_terminal() => Step::End,
                    None => Step::Wait,
                }
            };
            match step {
                Step::Yield(chunk) => {
                    self.cursor += 1;
                    self.phase = ReadPhase::Draining;
                    return Some(chunk);
                }
                Step::End => {
                    self.phase = ReadPhase::Done;
                    return None;
                }
                Step::Wait => {
                    self.phase = ReadPhase::Waiting;
                    if self.rx.changed().await.is_err() {
                        self.phase = ReadPhase::Done;
                        return None;
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn reader_walks_through_phases() {
        let buffer = GenerationBuffer::new("g");
        buffer.append("a");
        let mut sub = buffer.subscriber();
        assert_eq!(sub.phase(), ReadPhase::NotStarted);
        assert_eq!(sub.next_chunk().await.as_deref(), Some("a"));
        assert_eq!(sub.phase(), ReadPhase::Draining);

        let waiter = tokio::spawn(async move {
            let next = sub.next_chunk().await;
            (next, sub)
        });
        tokio::time::sleep(Duration::from_millis(10)).await;
        buffer.append("b");
        let (next, mut sub) = waiter.await.unwrap();
        assert_eq!(next.as_deref(), Some("b"));
        assert_eq!(sub.cursor(), 2);

        buffer.finish();
        assert_eq!(sub.next_chunk().await, None);
        assert_eq!(sub.phase(), ReadPhase::Done);
        assert_eq!(sub.next_chunk().await, None);
    }

    #[tokio::test]
    async fn aborted_resolves_on_abort_only() {
        let buffer = GenerationBuffer::new("g");
        let watcher = buffer.clone();
        let handle = tokio::spawn(async move { watcher.aborted().await });
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(!handle.is_finished());
        buffer.abort();
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn aborted_stays_pending_after_finish() {
        let buffer = GenerationBuffer::new("g");
        buffer.finish();
        let res = tokio::time::timeout(Duration::from_millis(20), buffer.aborted()).await;
        assert!(res.is_err());
    }

    #[test]
    fn append_after_finish_is_ignored() {
        let buffer = GenerationBuffer::new("g");
        buffer.append("x");
        buffer.finish();
        buffer.append("y");
        assert_eq!(buffer.result(), "x");
        assert_eq!(buffer.chunk_count(), 1);
    }
}
