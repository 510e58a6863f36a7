use std::path::PathBuf;
use std::sync::Arc;

use chatstream::config::{self, LlmConfig};
use chatstream::{
    ChatService, ChunkSource, FileChatStore, GenerationCoordinator, GenerationRegistry,
    LimitedSource, Notifier, OllamaChunkSource, RetryingSource, Server, TracingNotifier,
    WebhookNotifier, shutdown_signal,
};
use clap::Parser;
use daemon_common::{LogLevel, init_tracing, maybe_daemonize};

#[derive(Parser, Debug)]
#[command(name = "chatstreamd", about = "Replayable LLM response streaming daemon")]
struct Cli {
    /// Path to the TOML configuration file
    #[arg(long, default_value = "chatstream.toml")]
    config: PathBuf,

    /// Override the Unix socket path
    #[arg(long)]
    socket: Option<PathBuf>,

    /// Override the directory chats are stored in
    #[arg(long)]
    store_dir: Option<PathBuf>,

    /// Logging verbosity level
    #[arg(long, default_value = "info")]
    log_level: LogLevel,

    /// Run as a background daemon
    #[arg(short = 'd', long)]
    daemon: bool,
}

fn build_source(llm: &LlmConfig) -> anyhow::Result<Arc<dyn ChunkSource>> {
    let ollama = OllamaChunkSource::from_url(&llm.base_url)?;
    let retrying = RetryingSource::new(ollama, llm.retry_policy());
    Ok(Arc::new(LimitedSource::new(retrying, llm.concurrency)))
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let mut cfg = config::load_or_default(&cli.config).await?;
    if let Some(socket) = cli.socket {
        cfg.socket = socket;
    }
    if let Some(dir) = cli.store_dir {
        cfg.store_dir = dir;
    }
    tracing::info!(socket = %cfg.socket.display(), store = %cfg.store_dir.display(), model = %cfg.llm.model, "starting chatstreamd");

    let store = Arc::new(FileChatStore::new(cfg.store_dir.clone()));
    let notifier: Arc<dyn Notifier> = match &cfg.notify.webhook_url {
        Some(url) => Arc::new(WebhookNotifier::new(url.clone())),
        None => Arc::new(TracingNotifier),
    };
    let coordinator = GenerationCoordinator::new(GenerationRegistry::new(), store, notifier)
        .with_policy(cfg.generation.failure_policy())
        .with_notice(cfg.notify.title.clone(), cfg.notify.preview_chars);

    let source = build_source(&cfg.llm)?;
    let chat = ChatService::new(coordinator, source, cfg.llm.model.clone())
        .with_default_options(cfg.llm.default_options());

    Server::new(chat).run(cfg.socket, shutdown_signal()).await
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    // fork before any runtime threads exist
    maybe_daemonize(cli.daemon)?;
    init_tracing(cli.log_level);
    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?
        .block_on(run(cli))
}
