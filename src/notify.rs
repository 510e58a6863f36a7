use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde::Serialize;

/// Fire-and-forget delivery of "your response is ready" style notices.
///
/// # Example
///
/// ```no_run
/// use chatstream::Notifier;
/// use async_trait::async_trait;
///
/// struct ConsoleNotifier;
///
/// #[async_trait]
/// impl Notifier for ConsoleNotifier {
///     async fn notify(&self, title: &str, message: &str) -> anyhow::Result<()> {
///         println!("{title}: {message}");
///         Ok(())
///     }
/// }
/// ```
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, title: &str, message: &str) -> anyhow::Result<()>;
}

/// [`Notifier`] that logs notices using [`tracing`].
pub struct TracingNotifier;

#[async_trait]
impl Notifier for TracingNotifier {
    async fn notify(&self, title: &str, message: &str) -> anyhow::Result<()> {
        tracing::info!(%title, "notify: {}", message);
        Ok(())
    }
}

/// [`Notifier`] that keeps every notice for later inspection.
#[derive(Clone, Default)]
pub struct RecordingNotifier {
    log: Arc<Mutex<Vec<(String, String)>>>,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    /// `(title, message)` pairs in delivery order.
    pub fn sent(&self) -> Vec<(String, String)> {
        self.log.lock().map(|v| v.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn notify(&self, title: &str, message: &str) -> anyhow::Result<()> {
        if let Ok(mut log) = self.log.lock() {
            log.push((title.to_string(), message.to_string()));
        }
        Ok(())
    }
}

#[derive(Serialize)]
struct WebhookBody<'a> {
    title: &'a str,
    message: &'a str,
}

/// [`Notifier`] that POSTs `{"title", "message"}` as JSON to a URL.
#[derive(Clone)]
pub struct WebhookNotifier {
    client: reqwest::Client,
    url: String,
}

impl WebhookNotifier {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            url: url.into(),
        }
    }
}

#[async_trait]
impl Notifier for WebhookNotifier {
    async fn notify(&self, title: &str, message: &str) -> anyhow::Result<()> {
        self.client
            .post(&self.url)
            .json(&WebhookBody { title, message })
            .send()
            .await?
            .error_for_status()?;
        tracing::debug!(url = %self.url, "webhook notification delivered");
        Ok(())
    }
}
