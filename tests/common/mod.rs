#![allow(dead_code)]

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chatstream::{
    BoxError, ChatRequest, ChatStore, ChunkSource, GenerationCoordinator, GenerationRegistry,
    InMemoryChatStore, Notifier, RecordingNotifier, StoredMessage, UpstreamError, UpstreamStream,
};
use futures::StreamExt;
use futures::channel::mpsc;

/// One scripted upstream event.
#[derive(Debug, Clone)]
pub enum Step {
    Chunk(&'static str),
    Fail(&'static str),
    Pause(Duration),
    /// Never yield again.
    Stall,
}

/// [`ChunkSource`] that plays back the same script on every open and
/// remembers each request it was given.
#[derive(Clone, Default)]
pub struct ScriptedSource {
    steps: Vec<Step>,
    open_error: Option<&'static str>,
    pub requests: Arc<Mutex<Vec<ChatRequest>>>,
}

impl ScriptedSource {
    pub fn new(steps: Vec<Step>) -> Self {
        Self {
            steps,
            ..Self::default()
        }
    }

    pub fn chunks(chunks: &[&'static str]) -> Self {
        Self::new(chunks.iter().copied().map(Step::Chunk).collect())
    }

    pub fn failing_open(message: &'static str) -> Self {
        Self {
            open_error: Some(message),
            ..Self::default()
        }
    }

    pub fn requests(&self) -> Vec<ChatRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl ChunkSource for ScriptedSource {
    async fn open(&self, request: &ChatRequest) -> Result<UpstreamStream, BoxError> {
        self.requests.lock().unwrap().push(request.clone());
        if let Some(message) = self.open_error {
            return Err(message.into());
        }
        let steps = self.steps.clone();
        let stream = async_stream::stream! {
            for step in steps {
                match step {
                    Step::Chunk(c) => yield Ok(c.to_string()),
                    Step::Fail(m) => {
                        yield Err(UpstreamError::new(m));
                        break;
                    }
                    Step::Pause(d) => tokio::time::sleep(d).await,
                    Step::Stall => futures::future::pending::<()>().await,
                }
            }
        };
        Ok(stream.boxed())
    }
}

/// [`ChunkSource`] fed by the test through an unbounded channel. Only the
/// first open gets the stream.
pub struct ChannelSource {
    rx: Mutex<Option<mpsc::UnboundedReceiver<Result<String, UpstreamError>>>>,
}

impl ChannelSource {
    pub fn new() -> (Self, mpsc::UnboundedSender<Result<String, UpstreamError>>) {
        let (tx, rx) = mpsc::unbounded();
        (
            Self {
                rx: Mutex::new(Some(rx)),
            },
            tx,
        )
    }
}

#[async_trait]
impl ChunkSource for ChannelSource {
    async fn open(&self, _request: &ChatRequest) -> Result<UpstreamStream, BoxError> {
        let rx = self
            .rx
            .lock()
            .unwrap()
            .take()
            .ok_or("channel source already opened")?;
        Ok(rx.boxed())
    }
}

/// [`ChatStore`] whose writes after creation always fail.
#[derive(Clone, Default)]
pub struct FailingStore {
    inner: InMemoryChatStore,
}

#[async_trait]
impl ChatStore for FailingStore {
    async fn create_message(&self, chat_id: &str, message: StoredMessage) -> anyhow::Result<()> {
        self.inner.create_message(chat_id, message).await
    }

    async fn get_message(
        &self,
        chat_id: &str,
        message_id: &str,
    ) -> anyhow::Result<Option<StoredMessage>> {
        self.inner.get_message(chat_id, message_id).await
    }

    async fn edit_message(
        &self,
        _chat_id: &str,
        _message_id: &str,
        _content: &str,
        _is_generating: bool,
    ) -> anyhow::Result<()> {
        anyhow::bail!("disk full")
    }

    async fn remove_message(&self, _chat_id: &str, _message_id: &str) -> anyhow::Result<()> {
        anyhow::bail!("disk full")
    }

    async fn list_messages(&self, chat_id: &str) -> anyhow::Result<Vec<StoredMessage>> {
        self.inner.list_messages(chat_id).await
    }
}

pub fn request() -> ChatRequest {
    ChatRequest {
        model: "test".into(),
        messages: Vec::new(),
        options: Default::default(),
    }
}

/// Coordinator over an in-memory store with a recording notifier.
pub fn coordinator() -> (
    GenerationCoordinator,
    Arc<InMemoryChatStore>,
    Arc<RecordingNotifier>,
) {
    let store = Arc::new(InMemoryChatStore::new());
    let notifier = Arc::new(RecordingNotifier::new());
    let coordinator = GenerationCoordinator::new(
        GenerationRegistry::new(),
        store.clone() as Arc<dyn ChatStore>,
        notifier.clone() as Arc<dyn Notifier>,
    );
    (coordinator, store, notifier)
}

/// Store a fresh placeholder in `chat_id` and return its id.
pub async fn placeholder(store: &dyn ChatStore, chat_id: &str) -> String {
    let msg = StoredMessage::placeholder();
    let id = msg.id.clone();
    store.create_message(chat_id, msg).await.unwrap();
    id
}
