use clap::ValueEnum;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::filter::LevelFilter;

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, ValueEnum)]
pub enum LogLevel {
    Error,
    Warn,
    #[default]
    Info,
    Debug,
    Trace,
}

impl From<LogLevel> for LevelFilter {
    fn from(level: LogLevel) -> Self {
        match level {
            LogLevel::Error => LevelFilter::ERROR,
            LogLevel::Warn => LevelFilter::WARN,
            LogLevel::Info => LevelFilter::INFO,
            LogLevel::Debug => LevelFilter::DEBUG,
            LogLevel::Trace => LevelFilter::TRACE,
        }
    }
}

/// Install the global `fmt` subscriber.
///
/// `RUST_LOG` takes precedence over `level` when it is set and parses.
pub fn init_tracing(level: LogLevel) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(LevelFilter::from(level).to_string()));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

/// Spawn the process as a background daemon when `enable` is true.
///
/// This uses the [`daemonize`](https://docs.rs/daemonize) crate under the
/// hood. In tests or foreground runs pass `false` to skip daemonization.
pub fn maybe_daemonize(enable: bool) -> anyhow::Result<()> {
    if enable {
        daemonize::Daemonize::new()
            .start()
            .map_err(|e| anyhow::anyhow!(e))?;
    }
    Ok(())
}
