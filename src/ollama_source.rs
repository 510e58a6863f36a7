use async_trait::async_trait;
use futures::StreamExt;
use ollama_rs::{
    Ollama,
    generation::chat::{ChatMessage, ChatMessageResponseStream, request::ChatMessageRequest},
    models::ModelOptions,
};

use crate::error::{BoxError, UpstreamError};
use crate::source::{ChatRequest, ChatTurn, ChunkSource, GenerationOptions, UpstreamStream};
use crate::store::Role;

fn to_message(turn: &ChatTurn) -> ChatMessage {
    match turn.role {
        Role::System => ChatMessage::system(turn.content.clone()),
        Role::User => ChatMessage::user(turn.content.clone()),
        Role::Assistant => ChatMessage::assistant(turn.content.clone()),
    }
}

fn model_options(options: &GenerationOptions) -> ModelOptions {
    let mut out = ModelOptions::default();
    if let Some(temperature) = options.temperature {
        out = out.temperature(temperature);
    }
    if let Some(top_p) = options.top_p {
        out = out.top_p(top_p);
    }
    if let Some(seed) = options.seed {
        out = out.seed(seed);
    }
    out
}

/// Build a chat request for the given model and history.
fn build_request(request: &ChatRequest) -> ChatMessageRequest {
    let messages = request.messages.iter().map(to_message).collect();
    ChatMessageRequest::new(request.model.clone(), messages)
        .options(model_options(&request.options))
}

/// Map an Ollama response stream into an [`UpstreamStream`].
///
/// Empty fragments (the closing `done` frame carries no text) are dropped.
fn map_stream(stream: ChatMessageResponseStream) -> UpstreamStream {
    let mapped = stream.filter_map(|res| async {
        match res {
            Ok(resp) => {
                let tok = resp.message.content;
                if tok.is_empty() {
                    return None;
                }
                tracing::trace!(%tok, "llm token");
                Some(Ok(tok))
            }
            Err(e) => {
                tracing::error!(?e, "ollama stream error");
                Some(Err(UpstreamError::new("ollama stream error")))
            }
        }
    });
    Box::pin(mapped)
}

/// [`ChunkSource`] backed by an [`Ollama`] server.
#[derive(Clone)]
pub struct OllamaChunkSource {
    client: Ollama,
}

impl OllamaChunkSource {
    pub fn new(client: Ollama) -> Self {
        Self { client }
    }

    /// Connect to the server at `base_url`, e.g. `http://localhost:11434`.
    pub fn from_url(base_url: &str) -> anyhow::Result<Self> {
        Ok(Self::new(Ollama::try_new(base_url)?))
    }
}

#[async_trait]
impl ChunkSource for OllamaChunkSource {
    async fn open(&self, request: &ChatRequest) -> Result<UpstreamStream, BoxError> {
        tracing::debug!(model = %request.model, turns = request.messages.len(), "opening ollama chat stream");
        let stream = self
            .client
            .send_chat_messages_stream(build_request(request))
            .await?;
        Ok(map_stream(stream))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use httpmock::prelude::*;

    fn request() -> ChatRequest {
        ChatRequest {
            model: "m".into(),
            messages: vec![ChatTurn::new(Role::User, "hi")],
            options: GenerationOptions::default(),
        }
    }

    #[tokio::test]
    async fn yields_all_tokens() {
        let server = MockServer::start_async().await;
        let body = concat!(
            "{\"model\":\"m\",\"created_at\":\"n\",\"message\":{\"role\":\"assistant\",\"content\":\"he\"},\"done\":false}\n",
            "{\"model\":\"m\",\"created_at\":\"n\",\"message\":{\"role\":\"assistant\",\"content\":\"llo\"},\"done\":false}\n",
            "{\"model\":\"m\",\"created_at\":\"n\",\"message\":{\"role\":\"assistant\",\"content\":\"\"},\"done\":true}"
        );
        server
            .mock_async(|when, then| {
                when.method(POST).path("/api/chat");
                then.status(200).body(body);
            })
            .await;

        let source = OllamaChunkSource::from_url(&server.base_url()).unwrap();
        let mut stream = source.open(&request()).await.unwrap();
        let mut chunks = Vec::new();
        while let Some(chunk) = stream.next().await {
            chunks.push(chunk.unwrap());
        }
        assert_eq!(chunks, vec!["he".to_string(), "llo".to_string()]);
    }

    #[tokio::test]
    async fn sends_model_and_history() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(POST)
                    .path("/api/chat")
                    .body_contains("\"model\":\"m\"")
                    .body_contains("\"content\":\"hi\"");
                then.status(200).body(
                    "{\"model\":\"m\",\"created_at\":\"n\",\"message\":{\"role\":\"assistant\",\"content\":\"ok\"},\"done\":true}",
                );
            })
            .await;

        let source = OllamaChunkSource::from_url(&server.base_url()).unwrap();
        let stream = source.open(&request()).await.unwrap();
        let chunks: Vec<_> = stream.collect().await;
        assert_eq!(chunks, vec![Ok("ok".to_string())]);
        mock.assert_async().await;
    }
}
