use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::{debug, trace};

use crate::store::{ChatStore, StoredMessage, apply_edit};

/// [`ChatStore`] keeping one pretty-printed JSON array per chat under `dir`.
///
/// All access goes through a single lock, so concurrent writers never
/// interleave a read-modify-write cycle.
#[derive(Clone)]
pub struct FileChatStore {
    pub dir: PathBuf,
    lock: Arc<Mutex<()>>,
}

impl FileChatStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        let dir = dir.into();
        debug!(dir = %dir.display(), "creating FileChatStore");
        Self {
            dir,
            lock: Arc::new(Mutex::new(())),
        }
    }

    fn path(&self, chat_id: &str) -> anyhow::Result<PathBuf> {
        let valid = !chat_id.is_empty()
            && chat_id
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
        if !valid {
            anyhow::bail!("invalid chat id {chat_id:?}");
        }
        Ok(self.dir.join(format!("{chat_id}.json")))
    }

    async fn load(&self, chat_id: &str) -> anyhow::Result<Vec<StoredMessage>> {
        let path = self.path(chat_id)?;
        match tokio::fs::read_to_string(&path).await {
            Ok(text) => Ok(serde_json::from_str(&text)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Vec::new()),
            Err(e) => Err(e.into()),
        }
    }

    async fn save(&self, chat_id: &str, messages: &[StoredMessage]) -> anyhow::Result<()> {
        let path = self.path(chat_id)?;
        tokio::fs::create_dir_all(&self.dir).await?;
        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, serde_json::to_vec_pretty(messages)?).await?;
        tokio::fs::rename(&tmp, &path).await?;
        trace!(chat = chat_id, messages = messages.len(), "chat saved");
        Ok(())
    }
}

#[async_trait]
impl ChatStore for FileChatStore {
    async fn create_message(&self, chat_id: &str, message: StoredMessage) -> anyhow::Result<()> {
        let _guard = self.lock.lock().await;
        let mut messages = self.load(chat_id).await?;
        if messages.iter().any(|m| m.id == message.id) {
            anyhow::bail!("message {} already exists in chat {chat_id}", message.id);
        }
        messages.push(message);
        self.save(chat_id, &messages).await
    }

    async fn get_message(
        &self,
        chat_id: &str,
        message_id: &str,
    ) -> anyhow::Result<Option<StoredMessage>> {
        let _guard = self.lock.lock().await;
        let messages = self.load(chat_id).await?;
        Ok(messages.into_iter().find(|m| m.id == message_id))
    }

    async fn edit_message(
        &self,
        chat_id: &str,
        message_id: &str,
        content: &str,
        is_generating: bool,
    ) -> anyhow::Result<()> {
        let _guard = self.lock.lock().await;
        let mut messages = self.load(chat_id).await?;
        apply_edit(&mut messages, chat_id, message_id, content, is_generating)?;
        self.save(chat_id, &messages).await
    }

    async fn remove_message(&self, chat_id: &str, message_id: &str) -> anyhow::Result<()> {
        let _guard = self.lock.lock().await;
        let mut messages = self.load(chat_id).await?;
        let before = messages.len();
        messages.retain(|m| m.id != message_id);
        if messages.len() != before {
            self.save(chat_id, &messages).await?;
        }
        Ok(())
    }

    async fn list_messages(&self, chat_id: &str) -> anyhow::Result<Vec<StoredMessage>> {
        let _guard = self.lock.lock().await;
        self.load(chat_id).await
    }
}
