use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

/// Author of a chat message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

/// A message as persisted by a [`ChatStore`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredMessage {
    pub id: String,
    pub role: Role,
    pub content: String,
    /// True while a generation is still producing this message.
    #[serde(default)]
    pub is_generating: bool,
    pub created_at: DateTime<Utc>,
}

impl StoredMessage {
    /// A finished message with a fresh id.
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            role,
            content: content.into(),
            is_generating: false,
            created_at: Utc::now(),
        }
    }

    /// An empty assistant message waiting for a generation to fill it.
    pub fn placeholder() -> Self {
        Self {
            is_generating: true,
            ..Self::new(Role::Assistant, "")
        }
    }
}

/// Durable storage for chat messages.
///
/// The generation core only needs the read/edit/remove trio; creation and
/// listing back the "send a prompt" flow.
#[async_trait]
pub trait ChatStore: Send + Sync {
    /// Append `message` to the chat, creating the chat if needed.
    async fn create_message(&self, chat_id: &str, message: StoredMessage) -> anyhow::Result<()>;

    async fn get_message(
        &self,
        chat_id: &str,
        message_id: &str,
    ) -> anyhow::Result<Option<StoredMessage>>;

    /// Replace the content and generating flag of an existing message.
    async fn edit_message(
        &self,
        chat_id: &str,
        message_id: &str,
        content: &str,
        is_generating: bool,
    ) -> anyhow::Result<()>;

    /// Delete a message. Removing a missing message is not an error.
    async fn remove_message(&self, chat_id: &str, message_id: &str) -> anyhow::Result<()>;

    /// All messages of a chat in insertion order.
    async fn list_messages(&self, chat_id: &str) -> anyhow::Result<Vec<StoredMessage>>;
}

/// Edit `message_id` within `messages`, failing if it does not exist.
pub(crate) fn apply_edit(
    messages: &mut [StoredMessage],
    chat_id: &str,
    message_id: &str,
    content: &str,
    is_generating: bool,
) -> anyhow::Result<()> {
    let msg = messages
        .iter_mut()
        .find(|m| m.id == message_id)
        .ok_or_else(|| anyhow::anyhow!("no message {message_id} in chat {chat_id}"))?;
    msg.content = content.to_string();
    msg.is_generating = is_generating;
    Ok(())
}

/// Volatile [`ChatStore`] kept in process memory.
#[derive(Clone, Default)]
pub struct InMemoryChatStore {
    chats: Arc<Mutex<HashMap<String, Vec<StoredMessage>>>>,
}

impl InMemoryChatStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ChatStore for InMemoryChatStore {
    async fn create_message(&self, chat_id: &str, message: StoredMessage) -> anyhow::Result<()> {
        let mut chats = self.chats.lock().await;
        let messages = chats.entry(chat_id.to_string()).or_default();
        if messages.iter().any(|m| m.id == message.id) {
            anyhow::bail!("message {} already exists in chat {chat_id}", message.id);
        }
        messages.push(message);
        Ok(())
    }

    async fn get_message(
        &self,
        chat_id: &str,
        message_id: &str,
    ) -> anyhow::Result<Option<StoredMessage>> {
        let chats = self.chats.lock().await;
        Ok(chats
            .get(chat_id)
            .and_then(|msgs| msgs.iter().find(|m| m.id == message_id))
            .cloned())
    }

    async fn edit_message(
        &self,
        chat_id: &str,
        message_id: &str,
        content: &str,
        is_generating: bool,
    ) -> anyhow::Result<()> {
        let mut chats = self.chats.lock().await;
        let messages = chats
            .get_mut(chat_id)
            .ok_or_else(|| anyhow::anyhow!("no chat {chat_id}"))?;
        apply_edit(messages, chat_id, message_id, content, is_generating)
    }

    async fn remove_message(&self, chat_id: &str, message_id: &str) -> anyhow::Result<()> {
        let mut chats = self.chats.lock().await;
        if let Some(messages) = chats.get_mut(chat_id) {
            messages.retain(|m| m.id != message_id);
        }
        Ok(())
    }

    async fn list_messages(&self, chat_id: &str) -> anyhow::Result<Vec<StoredMessage>> {
        let chats = self.chats.lock().await;
        Ok(chats.get(chat_id).cloned().unwrap_or_default())
    }
}
