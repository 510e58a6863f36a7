use std::sync::Arc;

use tokio::task::JoinHandle;

use crate::coordinator::{GenerationCoordinator, GenerationKey, GenerationReport};
use crate::source::{ChatRequest, ChatTurn, ChunkSource, GenerationOptions};
use crate::store::{Role, StoredMessage};

/// "Send a prompt" flow: stores the user turn, creates the assistant
/// placeholder and starts a generation that fills it.
#[derive(Clone)]
pub struct ChatService {
    coordinator: GenerationCoordinator,
    source: Arc<dyn ChunkSource>,
    default_model: String,
    default_options: GenerationOptions,
}

/// A generation started by [`ChatService::send`].
pub struct Started {
    pub key: GenerationKey,
    pub handle: JoinHandle<GenerationReport>,
}

impl ChatService {
    pub fn new(
        coordinator: GenerationCoordinator,
        source: Arc<dyn ChunkSource>,
        default_model: impl Into<String>,
    ) -> Self {
        Self {
            coordinator,
            source,
            default_model: default_model.into(),
            default_options: GenerationOptions::default(),
        }
    }

    /// Options applied where a request leaves a field unset.
    pub fn with_default_options(mut self, options: GenerationOptions) -> Self {
        self.default_options = options;
        self
    }

    pub fn coordinator(&self) -> &GenerationCoordinator {
        &self.coordinator
    }

    /// Store `prompt` as a user message in `chat_id` and start generating
    /// the assistant reply from the chat's history.
    pub async fn send(
        &self,
        chat_id: &str,
        prompt: &str,
        model: Option<String>,
        options: GenerationOptions,
    ) -> anyhow::Result<Started> {
        let store = self.coordinator.store();
        store
            .create_message(chat_id, StoredMessage::new(Role::User, prompt))
            .await?;

        let messages = store
            .list_messages(chat_id)
            .await?
            .into_iter()
            .filter(|m| !m.is_generating)
            .map(|m| ChatTurn::new(m.role, m.content))
            .collect();

        let placeholder = StoredMessage::placeholder();
        let key = GenerationKey::new(chat_id, placeholder.id.clone());
        store.create_message(chat_id, placeholder).await?;

        let request = ChatRequest {
            model: model.unwrap_or_else(|| self.default_model.clone()),
            messages,
            options: options.or(&self.default_options),
        };
        match self
            .coordinator
            .start(key.clone(), self.source.clone(), request)
        {
            Ok(handle) => Ok(Started { key, handle }),
            Err(e) => {
                store.remove_message(&key.chat_id, &key.message_id).await?;
                Err(e.into())
            }
        }
    }

    /// Stop a live generation, returning its partial text.
    pub fn interrupt(&self, message_id: &str) -> Option<String> {
        self.coordinator.interrupt(message_id)
    }
}
