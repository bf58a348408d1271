use std::path::Path;

use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::prelude::*;
use tracing_subscriber::{EnvFilter, Registry, fmt};

/// Install the global tracing subscriber.
///
/// `log_level` is an `EnvFilter` directive (e.g. `"info"` or
/// `"snapflow=debug"`); `RUST_LOG` overrides it when set. With a
/// `log_dir` a daily-rolling plain-text log is written there in
/// addition to stderr.
pub fn init_tracing(log_level: &str, log_dir: Option<&Path>) -> anyhow::Result<()> {
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(log_level))?;

    let stderr_layer = fmt::layer().with_writer(std::io::stderr);

    let file_layer = match log_dir {
        Some(dir) => {
            let appender = RollingFileAppender::new(Rotation::DAILY, dir, "snapflow.log");
            Some(fmt::layer().with_writer(appender).with_ansi(false))
        }
        None => None,
    };

    Registry::default()
        .with(env_filter)
        .with(stderr_layer)
        .with(file_layer)
        .init();
    Ok(())
}
