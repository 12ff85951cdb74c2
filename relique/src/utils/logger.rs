//! Process-wide `tracing` subscriber.

use std::io::IsTerminal;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

fn filter(level: &str) -> EnvFilter {
    EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(level))
        .unwrap_or_else(|_| EnvFilter::new("info"))
}

/// Install the global subscriber, writing to stderr.
///
/// `RUST_LOG` takes precedence over `level`; an unparsable filter falls back
/// to `info`. Colors are only emitted on a terminal. Fails when a subscriber
/// is already installed.
pub fn init(level: &str) -> anyhow::Result<()> {
    let stderr = std::io::stderr();
    let ansi = stderr.is_terminal();

    tracing_subscriber::registry()
        .with(filter(level))
        .with(
            fmt::layer()
                .with_writer(std::io::stderr)
                .with_ansi(ansi)
                .with_target(false),
        )
        .try_init()?;

    Ok(())
}
