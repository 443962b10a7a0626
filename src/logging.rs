//! Tracing subscriber bootstrap.

use tracing_subscriber::EnvFilter;

use crate::config::LoggingConfig;

/// Install a compact fmt subscriber on stderr.
///
/// `RUST_LOG` takes precedence over `logging.level`. Returns `false` when a
/// global subscriber was already installed, which is not an error.
pub fn init(config: &LoggingConfig) -> bool {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::try_new(format!("uniqa={0},uniqa_core={0}", config.level))
            .unwrap_or_else(|_| EnvFilter::new("info"))
    });

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_ansi(config.ansi)
        .with_writer(std::io::stderr)
        .compact()
        .try_init()
        .is_ok()
}
