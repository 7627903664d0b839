use anyhow::Result;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;

use crate::config::LogConfig;

/// Install the global tracing subscriber.
/// Keep the returned guard alive for the life of the process when logging to files.
pub fn init(config: &LogConfig) -> Result<Option<WorkerGuard>> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.filter))?;

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(true);

    match (&config.directory, config.json) {
        (Some(dir), json) => {
            let appender = tracing_appender::rolling::daily(dir, "memory-api-server.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let builder = builder.with_writer(writer).with_ansi(false);
            if json {
                builder.json().try_init().map_err(|e| anyhow::anyhow!(e))?;
            } else {
                builder.try_init().map_err(|e| anyhow::anyhow!(e))?;
            }
            Ok(Some(guard))
        }
        (None, true) => {
            builder.json().try_init().map_err(|e| anyhow::anyhow!(e))?;
            Ok(None)
        }
        (None, false) => {
            builder.try_init().map_err(|e| anyhow::anyhow!(e))?;
            Ok(None)
        }
    }
}
