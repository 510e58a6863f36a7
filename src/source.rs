use async_trait::async_trait;
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};

use crate::error::{BoxError, UpstreamError};
use crate::store::Role;

/// Text fragments produced by a model. An `Err` item ends the generation.
pub type UpstreamStream = BoxStream<'static, Result<String, UpstreamError>>;

/// One turn of the conversation history sent upstream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatTurn {
    pub role: Role,
    pub content: String,
}

impl ChatTurn {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }
}

/// Sampling knobs forwarded to the model. Unset fields use the model default.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GenerationOptions {
    #[serde(default)]
    pub temperature: Option<f32>,
    #[serde(default)]
    pub top_p: Option<f32>,
    #[serde(default)]
    pub seed: Option<i32>,
}

impl GenerationOptions {
    /// Fill unset fields from `defaults`.
    pub fn or(self, defaults: &GenerationOptions) -> Self {
        Self {
            temperature: self.temperature.or(defaults.temperature),
            top_p: self.top_p.or(defaults.top_p),
            seed: self.seed.or(defaults.seed),
        }
    }
}

/// Everything a [`ChunkSource`] needs to produce one generation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatRequest {
    pub model: String,
    pub messages: Vec<ChatTurn>,
    #[serde(default)]
    pub options: GenerationOptions,
}

/// Upstream provider of text chunks for a generation request.
///
/// Implementations may fail to open, fail mid-stream, or produce nothing at
/// all. Retrying is their own business; the coordinator never retries.
#[async_trait]
pub trait ChunkSource: Send + Sync {
    async fn open(&self, request: &ChatRequest) -> Result<UpstreamStream, BoxError>;
}
