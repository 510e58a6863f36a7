use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::coordinator::{EmptyFailure, FailurePolicy};
use crate::retry::RetryPolicy;
use crate::source::GenerationOptions;

/// Upstream model settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    /// Base URL of the Ollama server.
    pub base_url: String,
    /// Model used when a request names none.
    pub model: String,
    /// Maximum concurrent upstream streams.
    pub concurrency: usize,
    /// Extra attempts to open a stream after the first failure.
    pub max_retries: usize,
    pub retry_delay_ms: u64,
    pub temperature: Option<f32>,
    pub top_p: Option<f32>,
    pub seed: Option<i32>,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:11434".into(),
            model: "llama3".into(),
            concurrency: 1,
            max_retries: 0,
            retry_delay_ms: 500,
            temperature: None,
            top_p: None,
            seed: None,
        }
    }
}

impl LlmConfig {
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.max_retries, Duration::from_millis(self.retry_delay_ms))
    }

    pub fn default_options(&self) -> GenerationOptions {
        GenerationOptions {
            temperature: self.temperature,
            top_p: self.top_p,
            seed: self.seed,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct GenerationConfig {
    /// What to do when the upstream fails before producing any text.
    pub on_empty_failure: EmptyFailure,
}

impl GenerationConfig {
    pub fn failure_policy(&self) -> FailurePolicy {
        FailurePolicy {
            on_empty_failure: self.on_empty_failure,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct NotifyConfig {
    pub title: String,
    /// Characters of the response included in the notice body.
    pub preview_chars: usize,
    /// POST notices here instead of logging them.
    pub webhook_url: Option<String>,
}

impl Default for NotifyConfig {
    fn default() -> Self {
        Self {
            title: "Response ready".into(),
            preview_chars: 120,
            webhook_url: None,
        }
    }
}

/// Daemon configuration, usually read from `chatstream.toml`.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    pub socket: PathBuf,
    pub store_dir: PathBuf,
    pub llm: LlmConfig,
    pub generation: GenerationConfig,
    pub notify: NotifyConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            socket: PathBuf::from("/run/chatstream.sock"),
            store_dir: PathBuf::from("chats"),
            llm: LlmConfig::default(),
            generation: GenerationConfig::default(),
            notify: NotifyConfig::default(),
        }
    }
}

/// Load a [`Config`] from a TOML file.
///
/// # Examples
///
/// ```no_run
/// use chatstream::config::load;
/// # async fn example() -> anyhow::Result<()> {
/// let cfg = load("chatstream.toml").await?;
/// println!("{}", cfg.llm.model);
/// # Ok(()) }
/// ```
pub async fn load<P: AsRef<Path>>(path: P) -> anyhow::Result<Config> {
    let text = tokio::fs::read_to_string(path).await?;
    Ok(toml::from_str(&text)?)
}

/// Like [`load`] but falls back to defaults when the file does not exist.
pub async fn load_or_default<P: AsRef<Path>>(path: P) -> anyhow::Result<Config> {
    let path = path.as_ref();
    if tokio::fs::try_exists(path).await? {
        load(path).await
    } else {
        tracing::debug!(path = %path.display(), "config file missing, using defaults");
        Ok(Config::default())
    }
}
