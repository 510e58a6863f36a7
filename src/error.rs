use thiserror::Error;

/// Boxed error returned across the chunk source seam.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Errors raised by the generation registry and coordinator.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GenerationError {
    /// A producer is already registered under this id.
    #[error("generation `{0}` is already live")]
    DuplicateGeneration(String),
    /// No live buffer exists for this id; its final content lives in the
    /// chat store, if anywhere.
    #[error("generation `{0}` is not live")]
    NotLive(String),
}

/// Failure reported by a chunk source while streaming.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("upstream generation failed: {message}")]
pub struct UpstreamError {
    pub message: String,
}

impl UpstreamError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl From<BoxError> for UpstreamError {
    fn from(err: BoxError) -> Self {
        Self::new(err.to_string())
    }
}

/// Writing the final content (or the notification that follows it) failed.
#[derive(Debug, Error)]
#[error("failed to persist generation `{id}`: {source}")]
pub struct PersistenceError {
    pub id: String,
    #[source]
    pub source: anyhow::Error,
}

/// Errors surfaced while relaying a generation to a consumer.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("sink write failed: {0}")]
    Io(#[from] std::io::Error),
    #[error("message `{message_id}` in chat `{chat_id}` is neither live nor stored")]
    MessageNotFound { chat_id: String, message_id: String },
    #[error("chat store failed: {0}")]
    Store(#[source] anyhow::Error),
    #[error(transparent)]
    Generation(#[from] GenerationError),
}
