//! Structured logging setup.
//!
//! Installs a `tracing` subscriber writing to stdout and, optionally, a log
//! file. `RUST_LOG` takes precedence over `logging.level`. Each output is
//! exposed as a [`LogSink`] so the lifecycle can flush it before resources
//! are released.

use std::fs::{File, OpenOptions};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tracing::Subscriber;
use tracing_subscriber::fmt::MakeWriter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter, Layer, Registry};

use crate::config::LoggingConfig;
use crate::lifecycle::{lock, LogSink};

#[cfg(test)]
#[path = "logging_tests.rs"]
mod tests;

type BoxedLayer = Box<dyn Layer<Registry> + Send + Sync>;

/// Logging setup errors.
#[derive(Debug, thiserror::Error)]
pub enum LoggingError {
    #[error("Invalid log filter '{directive}': {message}")]
    InvalidFilter { directive: String, message: String },

    #[error("Failed to open log file {path}: {source}")]
    OpenFile {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Global logger already installed: {message}")]
    AlreadyInitialized { message: String },
}

// ============================================================================
// Sinks
// ============================================================================

/// Standard output sink.
#[derive(Debug, Clone, Copy, Default)]
pub struct StdoutSink;

impl LogSink for StdoutSink {
    fn name(&self) -> &str {
        "stdout"
    }

    fn flush(&self) -> io::Result<()> {
        io::stdout().flush()
    }
}

/// Buffered, append-only log file shared between the subscriber and the
/// lifecycle.
#[derive(Clone)]
pub struct FileSink {
    path: PathBuf,
    writer: Arc<Mutex<BufWriter<File>>>,
}

impl FileSink {
    /// Open `path` for appending, creating it and its parent directory.
    pub fn open(path: &Path) -> Result<Self, LoggingError> {
        let open_error = |source| LoggingError::OpenFile {
            path: path.to_path_buf(),
            source,
        };

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(open_error)?;
        }
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .map_err(open_error)?;

        Ok(Self {
            path: path.to_path_buf(),
            writer: Arc::new(Mutex::new(BufWriter::new(file))),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Write for FileSink {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        lock(&self.writer).write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        lock(&self.writer).flush()
    }
}

impl<'a> MakeWriter<'a> for FileSink {
    type Writer = FileSink;

    fn make_writer(&'a self) -> Self::Writer {
        self.clone()
    }
}

impl LogSink for FileSink {
    fn name(&self) -> &str {
        "file"
    }

    fn flush(&self) -> io::Result<()> {
        lock(&self.writer).flush()
    }
}

// ============================================================================
// Subscriber setup
// ============================================================================

/// The installed logger and the sinks it writes to.
///
/// The default handle owns no sinks; it stands in for a logger installed
/// elsewhere, such as by a test harness.
#[derive(Clone, Default)]
pub struct LogHandle {
    sinks: Vec<Arc<dyn LogSink>>,
}

impl LogHandle {
    /// Sinks to flush at shutdown, stdout first.
    pub fn sinks(&self) -> &[Arc<dyn LogSink>] {
        &self.sinks
    }
}

impl std::fmt::Debug for LogHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let names: Vec<&str> = self.sinks.iter().map(|s| s.name()).collect();
        f.debug_struct("LogHandle").field("sinks", &names).finish()
    }
}

/// Install the global subscriber described by `config`.
pub fn init_logging(config: &LoggingConfig) -> Result<LogHandle, LoggingError> {
    let (subscriber, handle) = build_subscriber(config, env_filter(config)?)?;
    subscriber
        .try_init()
        .map_err(|e| LoggingError::AlreadyInitialized {
            message: e.to_string(),
        })?;

    tracing::debug!(sinks = ?handle, json = config.json_format, "Logging initialized");
    Ok(handle)
}

/// `RUST_LOG` when set, otherwise `logging.level`.
pub fn env_filter(config: &LoggingConfig) -> Result<EnvFilter, LoggingError> {
    if let Ok(filter) = EnvFilter::try_from_default_env() {
        return Ok(filter);
    }
    EnvFilter::try_new(&config.level).map_err(|e| LoggingError::InvalidFilter {
        directive: config.level.clone(),
        message: e.to_string(),
    })
}

fn build_subscriber(
    config: &LoggingConfig,
    filter: EnvFilter,
) -> Result<(impl Subscriber + Send + Sync, LogHandle), LoggingError> {
    let mut layers: Vec<BoxedLayer> = vec![format_layer(config.json_format, io::stdout, true)];
    let mut sinks: Vec<Arc<dyn LogSink>> = vec![Arc::new(StdoutSink)];

    if let Some(path) = &config.file_path {
        let file = FileSink::open(path)?;
        layers.push(format_layer(config.json_format, file.clone(), false));
        sinks.push(Arc::new(file));
    }

    let subscriber = tracing_subscriber::registry().with(layers.with_filter(filter));
    Ok((subscriber, LogHandle { sinks }))
}

fn format_layer<W>(json: bool, writer: W, ansi: bool) -> BoxedLayer
where
    W: for<'w> MakeWriter<'w> + Send + Sync + 'static,
{
    if json {
        fmt::layer()
            .json()
            .with_current_span(true)
            .with_writer(writer)
            .boxed()
    } else {
        fmt::layer().with_ansi(ansi).with_writer(writer).boxed()
    }
}
