//! Tracing subscriber setup shared by the binaries.

use crate::config::EnvParser;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use thiserror::Error;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::fmt::writer::BoxMakeWriter;
use tracing_subscriber::{EnvFilter, Layer, Registry, fmt, prelude::*};

#[derive(Debug, Error)]
pub enum LoggingError {
    #[error("invalid log filter '{filter}': {message}")]
    Filter { filter: String, message: String },

    #[error("failed to prepare log file {path}: {source}")]
    File {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to install tracing subscriber: {0}")]
    Init(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    #[default]
    Pretty,
    Compact,
    Json,
}

impl FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "pretty" | "full" | "text" => Ok(Self::Pretty),
            "compact" => Ok(Self::Compact),
            "json" => Ok(Self::Json),
            other => Err(format!("unknown log format '{other}'")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogTarget {
    #[default]
    Stdout,
    Stderr,
}

#[derive(Debug, Clone, PartialEq)]
pub struct LogConfig {
    /// Level or full filter directive.
    pub level: String,
    pub format: LogFormat,
    pub target: LogTarget,
    /// Also write JSON lines to this file.
    pub file: Option<PathBuf>,
    /// Honor `RUST_LOG` when set.
    pub use_rust_log: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::default(),
            target: LogTarget::default(),
            file: None,
            use_rust_log: true,
        }
    }
}

impl LogConfig {
    /// Read `QCH_LOG_LEVEL`, `QCH_LOG_FORMAT` and `QCH_LOG_FILE`.
    ///
    /// Invalid values fall back to defaults.
    pub fn from_env(default_level: &str) -> Self {
        let mut parser = EnvParser::new();
        let level = parser.get_log_level("LOG_LEVEL", default_level).value;
        let format = parser
            .get_string("LOG_FORMAT", "pretty")
            .value
            .parse()
            .unwrap_or_default();
        let file = parser.get_optional_path("LOG_FILE").value;
        Self {
            level,
            format,
            file,
            ..Self::default()
        }
    }

    /// Keep stdout free for reports.
    pub fn with_stderr(mut self) -> Self {
        self.target = LogTarget::Stderr;
        self
    }

    pub fn with_level(mut self, level: impl Into<String>) -> Self {
        self.level = level.into();
        self.use_rust_log = false;
        self
    }

    pub fn with_format(mut self, format: LogFormat) -> Self {
        self.format = format;
        self
    }

    pub fn with_file(mut self, path: PathBuf) -> Self {
        self.file = Some(path);
        self
    }

    fn filter(&self) -> Result<EnvFilter, LoggingError> {
        if self.use_rust_log
            && let Ok(directive) = std::env::var(EnvFilter::DEFAULT_ENV)
            && !directive.trim().is_empty()
        {
            return EnvFilter::try_new(&directive).map_err(|e| LoggingError::Filter {
                filter: directive.clone(),
                message: e.to_string(),
            });
        }
        EnvFilter::try_new(&self.level).map_err(|e| LoggingError::Filter {
            filter: self.level.clone(),
            message: e.to_string(),
        })
    }
}

type BoxedLayer = Box<dyn Layer<Registry> + Send + Sync>;

fn console_layer(config: &LogConfig) -> BoxedLayer {
    let writer = match config.target {
        LogTarget::Stdout => BoxMakeWriter::new(std::io::stdout),
        LogTarget::Stderr => BoxMakeWriter::new(std::io::stderr),
    };
    match config.format {
        LogFormat::Pretty => fmt::layer().with_writer(writer).boxed(),
        LogFormat::Compact => fmt::layer().compact().with_writer(writer).boxed(),
        LogFormat::Json => fmt::layer().json().with_writer(writer).boxed(),
    }
}

fn file_layer(path: &Path) -> Result<(BoxedLayer, WorkerGuard), LoggingError> {
    let file_err = |source| LoggingError::File {
        path: path.to_path_buf(),
        source,
    };
    let dir = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("."));
    std::fs::create_dir_all(&dir).map_err(file_err)?;
    let name = path
        .file_name()
        .ok_or_else(|| file_err(std::io::Error::other("log path has no file name")))?;

    let appender = tracing_appender::rolling::never(&dir, name);
    let (writer, guard) = tracing_appender::non_blocking(appender);
    let layer = fmt::layer()
        .json()
        .with_ansi(false)
        .with_writer(writer)
        .boxed();
    Ok((layer, guard))
}

/// Install the global subscriber.
///
/// Keep the returned guards alive until exit so buffered file output is
/// flushed.
pub fn init_logging(config: &LogConfig) -> Result<Vec<WorkerGuard>, LoggingError> {
    let filter = config.filter()?;
    let mut layers: Vec<BoxedLayer> = vec![console_layer(config)];
    let mut guards = Vec::new();

    if let Some(path) = &config.file {
        let (layer, guard) = file_layer(path)?;
        layers.push(layer);
        guards.push(guard);
    }

    tracing_subscriber::registry()
        .with(layers)
        .with(filter)
        .try_init()
        .map_err(|e| LoggingError::Init(e.to_string()))?;

    Ok(guards)
}
