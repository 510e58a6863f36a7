//! Core types for the `chatstream` crate.
//!
//! A [`GenerationBuffer`] records the chunks of one LLM generation and lets
//! any number of readers replay it from the start and then follow it live.
//! The [`GenerationCoordinator`] drives a [`ChunkSource`] into a registered
//! buffer, persists the final text through a [`ChatStore`] and hands out
//! follow streams by generation id.

mod buffer;
mod chat;
pub mod config;
mod coordinator;
mod error;
mod file_store;
mod limit;
mod notify;
mod ollama_source;
mod registry;
mod retry;
mod server;
mod session;
mod shutdown;
mod source;
mod store;

pub use buffer::{BufferStatus, ChunkStream, GenerationBuffer, ReadPhase, Subscription};
pub use chat::{ChatService, Started};
pub use config::Config;
pub use coordinator::{
    EmptyFailure, FailurePolicy, GenerationCoordinator, GenerationKey, GenerationPhase,
    GenerationReport,
};
pub use error::{BoxError, GenerationError, PersistenceError, SessionError, UpstreamError};
pub use file_store::FileChatStore;
pub use limit::LimitedSource;
pub use notify::{Notifier, RecordingNotifier, TracingNotifier, WebhookNotifier};
pub use ollama_source::OllamaChunkSource;
pub use registry::GenerationRegistry;
pub use retry::{RetryPolicy, RetryingSource};
pub use server::{Request, Server};
pub use session::{ConsumerSession, RelayOutcome};
pub use shutdown::shutdown_signal;
pub use source::{ChatRequest, ChatTurn, ChunkSource, GenerationOptions, UpstreamStream};
pub use store::{ChatStore, InMemoryChatStore, Role, StoredMessage};
