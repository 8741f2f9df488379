//! Tracing subscriber setup shared by the service and the one-shot runner

use tracing_appender::non_blocking::{NonBlocking, WorkerGuard};
use tracing_subscriber::fmt::{self, MakeWriter};
use tracing_subscriber::{prelude::*, EnvFilter, Layer, Registry};

use crate::config::{LogFormat, LogTarget, LoggingConfig};

type BoxedLayer = Box<dyn Layer<Registry> + Send + Sync>;

/// Initialize logging from configuration.
///
/// The returned guard must be held for the life of the process so buffered
/// file output is flushed.
pub fn init_logging(config: &LoggingConfig) -> Option<WorkerGuard> {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.level));

    let mut layers: Vec<BoxedLayer> = Vec::new();
    let mut guard = None;

    if matches!(config.target, LogTarget::Console | LogTarget::Both) {
        layers.push(format_layer(&config.format, std::io::stderr));
    }
    if matches!(config.target, LogTarget::File | LogTarget::Both) {
        let (writer, file_guard) = create_file_writer(config);
        layers.push(format_layer(&config.format, writer));
        guard = Some(file_guard);
    }

    if let Err(e) = tracing_subscriber::registry()
        .with(layers)
        .with(env_filter)
        .try_init()
    {
        eprintln!("Warning: logging already initialized: {}", e);
    }

    guard
}

fn format_layer<W>(format: &LogFormat, writer: W) -> BoxedLayer
where
    W: for<'w> MakeWriter<'w> + Send + Sync + 'static,
{
    match format {
        LogFormat::Json => fmt::layer()
            .json()
            .with_target(true)
            .with_writer(writer)
            .boxed(),
        LogFormat::Compact => fmt::layer()
            .compact()
            .with_target(false)
            .with_writer(writer)
            .boxed(),
        LogFormat::Pretty => fmt::layer()
            .with_target(true)
            .with_thread_ids(false)
            .with_file(false)
            .with_line_number(false)
            .with_writer(writer)
            .boxed(),
    }
}

/// File writer with optional daily rotation
fn create_file_writer(config: &LoggingConfig) -> (NonBlocking, WorkerGuard) {
    if let Err(e) = std::fs::create_dir_all(&config.log_dir) {
        eprintln!(
            "Warning: Failed to create log directory {:?}: {}",
            config.log_dir, e
        );
    }

    let appender = if config.daily_rotation {
        tracing_appender::rolling::daily(&config.log_dir, &config.log_prefix)
    } else {
        tracing_appender::rolling::never(&config.log_dir, &config.log_prefix)
    };

    tracing_appender::non_blocking(appender)
}
