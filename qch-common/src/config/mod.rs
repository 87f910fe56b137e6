//! Harness configuration.
//!
//! Layers, lowest to highest precedence:
//! - built-in defaults
//! - TOML file (`~/.config/qch/config.toml` or `--config`)
//! - `.env` file in the working directory
//! - `QCH_*` environment variables
//! - command-line flags (applied by the binary)

pub mod dotenv;
pub mod env;
pub mod source;
pub mod validate;

pub use dotenv::{DotenvError, load_dotenv, parse_dotenv};
pub use env::{ENV_PREFIX, EnvError, EnvParser};
pub use source::{ConfigSource, ConfigValueSource, Sourced};
pub use validate::{ConfigWarning, Severity, validate_config};

use crate::chaos::{ChaosConfig, ChaosError, Fault, FaultKind, UnknownFaultKind};
use crate::fixtures::FixtureSizes;
use crate::generator::DEFAULT_PROMPTS;
use crate::retry::{RetryError, RetryPolicy};
use crate::util::DurationRange;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

pub const DEFAULT_MODEL: &str = "gemini-1.5-flash";
pub const DEFAULT_API_KEY_ENV: &str = "GOOGLE_API_KEY";
pub const DEFAULT_ENDPOINT: &str = "https://generativelanguage.googleapis.com/v1beta";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid config file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error(transparent)]
    Dotenv(#[from] DotenvError),

    #[error("invalid environment: {}", join_display(.0))]
    Env(Vec<EnvError>),

    #[error("invalid configuration: {}", join_display(.0))]
    Invalid(Vec<ConfigWarning>),

    #[error(transparent)]
    UnknownFault(#[from] UnknownFaultKind),

    #[error(transparent)]
    Chaos(#[from] ChaosError),

    #[error(transparent)]
    Retry(#[from] RetryError),
}

fn join_display<T: fmt::Display>(items: &[T]) -> String {
    items
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GeneratorKind {
    #[default]
    Gemini,
    Canned,
}

impl FromStr for GeneratorKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "gemini" => Ok(Self::Gemini),
            "canned" | "offline" => Ok(Self::Canned),
            other => Err(format!("unknown generator '{other}' (expected gemini or canned)")),
        }
    }
}

impl fmt::Display for GeneratorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Gemini => f.write_str("gemini"),
            Self::Canned => f.write_str("canned"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    #[default]
    Text,
    Json,
}

impl FromStr for OutputFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "text" => Ok(Self::Text),
            "json" => Ok(Self::Json),
            other => Err(format!("unknown format '{other}' (expected text or json)")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrySection {
    pub max_attempts: u32,
    pub backoff_min_ms: u64,
    pub backoff_max_ms: u64,
}

impl Default for RetrySection {
    fn default() -> Self {
        Self {
            max_attempts: crate::retry::DEFAULT_MAX_ATTEMPTS,
            backoff_min_ms: 100,
            backoff_max_ms: 500,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChaosSection {
    pub enabled: bool,
    pub probability: f64,
    /// Fault names to draw from; `None` means the full catalogue.
    pub faults: Option<Vec<String>>,
    pub slow_query_ms: u64,
    pub statement_timeout_ms: u64,
    pub temp_table_rows: u32,
}

impl Default for ChaosSection {
    fn default() -> Self {
        Self {
            enabled: true,
            probability: crate::chaos::DEFAULT_CHAOS_PROBABILITY,
            faults: None,
            slow_query_ms: 2_000,
            statement_timeout_ms: 100,
            temp_table_rows: 50_000,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneratorSection {
    pub kind: GeneratorKind,
    pub model: String,
    pub endpoint: String,
    /// Variable holding the API key.
    pub api_key_env: String,
    pub timeout_secs: u64,
    pub canned_file: Option<PathBuf>,
    /// Resolved from `api_key_env` at load time; never written to disk.
    #[serde(skip)]
    pub api_key: Option<String>,
}

impl Default for GeneratorSection {
    fn default() -> Self {
        Self {
            kind: GeneratorKind::default(),
            model: DEFAULT_MODEL.to_string(),
            endpoint: DEFAULT_ENDPOINT.to_string(),
            api_key_env: DEFAULT_API_KEY_ENV.to_string(),
            timeout_secs: 30,
            canned_file: None,
            api_key: None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunSection {
    pub seed: Option<u64>,
    /// Task prompts; empty means the built-in analytics tasks.
    pub prompts: Vec<String>,
    pub metrics_out: Option<PathBuf>,
    pub format: OutputFormat,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HarnessConfig {
    pub retry: RetrySection,
    pub chaos: ChaosSection,
    pub generator: GeneratorSection,
    pub fixtures: FixtureSizes,
    pub run: RunSection,
}

/// Merged configuration plus a record of what overrode the file.
#[derive(Debug, Clone)]
pub struct LoadedConfig {
    pub config: HarnessConfig,
    pub file: Option<PathBuf>,
    pub overrides: Vec<ConfigValueSource>,
}

impl HarnessConfig {
    /// `<config_dir>/qch/config.toml`.
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("qch").join("config.toml"))
    }

    pub fn from_toml_str(text: &str, origin: &Path) -> Result<Self, ConfigError> {
        toml::from_str(text).map_err(|source| ConfigError::Parse {
            path: origin.to_path_buf(),
            source,
        })
    }

    pub fn load_file(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&text, path)
    }

    /// Load file, `.env` and environment layers.
    ///
    /// An explicit `path` must exist; the default location is optional.
    pub fn load(
        path: Option<&Path>,
        dotenv_path: Option<&Path>,
    ) -> Result<LoadedConfig, ConfigError> {
        let (mut config, file) = match path {
            Some(path) => (Self::load_file(path)?, Some(path.to_path_buf())),
            None => match Self::default_path().filter(|p| p.exists()) {
                Some(default) => (Self::load_file(&default)?, Some(default)),
                None => (Self::default(), None),
            },
        };
        debug!(file = ?file, "Configuration file layer loaded");

        let dotenv = match dotenv_path {
            Some(p) => load_dotenv(p)?,
            None => Default::default(),
        };
        let mut parser = EnvParser::new().with_dotenv(dotenv);
        let overrides = config.apply_env(&mut parser);
        if parser.has_errors() {
            return Err(ConfigError::Env(parser.take_errors()));
        }

        Ok(LoadedConfig {
            config,
            file,
            overrides,
        })
    }

    /// Overlay `QCH_*` variables and resolve the generator API key.
    pub fn apply_env(&mut self, parser: &mut EnvParser) -> Vec<ConfigValueSource> {
        let mut overrides = Vec::new();
        let mut note = |key: &'static str, source: ConfigSource, origin: Option<String>| {
            overrides.push(ConfigValueSource { key, source, origin });
        };

        macro_rules! overlay {
            ($key:literal, $sourced:expr, $target:expr) => {{
                let sourced = $sourced;
                if sourced.is_override() {
                    $target = sourced.value;
                    note($key, sourced.source, sourced.origin);
                }
            }};
        }

        overlay!(
            "retry.max_attempts",
            parser.get_in_range("MAX_ATTEMPTS", self.retry.max_attempts, 1, 100),
            self.retry.max_attempts
        );
        overlay!(
            "retry.backoff_min_ms",
            parser.get_in_range("BACKOFF_MIN_MS", self.retry.backoff_min_ms, 0, 600_000),
            self.retry.backoff_min_ms
        );
        overlay!(
            "retry.backoff_max_ms",
            parser.get_in_range("BACKOFF_MAX_MS", self.retry.backoff_max_ms, 0, 600_000),
            self.retry.backoff_max_ms
        );
        overlay!(
            "chaos.enabled",
            parser.get_bool("CHAOS_ENABLED", self.chaos.enabled),
            self.chaos.enabled
        );
        overlay!(
            "chaos.probability",
            parser.get_in_range("CHAOS_PROBABILITY", self.chaos.probability, 0.0, 1.0),
            self.chaos.probability
        );
        overlay!(
            "chaos.faults",
            parser.get_string_list("FAULTS", Vec::new()).map(Some),
            self.chaos.faults
        );
        overlay!(
            "generator.model",
            parser.get_string("MODEL", &self.generator.model),
            self.generator.model
        );
        overlay!(
            "generator.canned_file",
            parser.get_optional_path("CANNED_FILE"),
            self.generator.canned_file
        );
        overlay!(
            "run.seed",
            parser.get_optional_u64("SEED"),
            self.run.seed
        );
        overlay!(
            "run.metrics_out",
            parser.get_optional_path("METRICS_OUT"),
            self.run.metrics_out
        );
        overlay!(
            "fixtures.users",
            parser.get_in_range("USERS", self.fixtures.users, 0, 1_000_000),
            self.fixtures.users
        );
        overlay!(
            "fixtures.movies",
            parser.get_in_range("MOVIES", self.fixtures.movies, 0, 1_000_000),
            self.fixtures.movies
        );

        let generator = parser.get_string("GENERATOR", "");
        if generator.is_override() {
            match generator.value.parse::<GeneratorKind>() {
                Ok(kind) => {
                    self.generator.kind = kind;
                    note("generator.kind", generator.source, generator.origin);
                }
                Err(expected) => parser_error(parser, "QCH_GENERATOR", &generator.value, expected),
            }
        }

        if let Some(key) = parser.raw(&self.generator.api_key_env)
            && !key.value.is_empty()
        {
            self.generator.api_key = Some(key.value);
            note("generator.api_key", key.source, key.origin);
        }

        overrides
    }

    /// Fault catalogue and activation settings for the injector.
    pub fn chaos_config(&self) -> Result<ChaosConfig, ConfigError> {
        let kinds: Vec<FaultKind> = match &self.chaos.faults {
            Some(names) => names
                .iter()
                .map(|name| name.parse())
                .collect::<Result<_, UnknownFaultKind>>()?,
            None => FaultKind::ALL.to_vec(),
        };
        let catalogue = kinds
            .into_iter()
            .map(|kind| match kind {
                FaultKind::SlowQuery => Fault::SlowQuery {
                    duration: Duration::from_millis(self.chaos.slow_query_ms),
                },
                FaultKind::StatementTimeout => Fault::StatementTimeout {
                    timeout: Duration::from_millis(self.chaos.statement_timeout_ms),
                },
                FaultKind::TempTableStress => Fault::TempTableStress {
                    rows: self.chaos.temp_table_rows,
                },
                other => other.default_fault(),
            })
            .collect();

        let config = ChaosConfig {
            enabled: self.chaos.enabled,
            probability: self.chaos.probability,
            catalogue,
        };
        config.validate()?;
        Ok(config)
    }

    pub fn retry_policy(&self) -> Result<RetryPolicy, ConfigError> {
        Ok(RetryPolicy::new(
            self.retry.max_attempts,
            DurationRange::from_millis(self.retry.backoff_min_ms, self.retry.backoff_max_ms),
        )?)
    }

    /// Prompts to run, falling back to the built-in task list.
    pub fn prompts(&self) -> Vec<String> {
        if self.run.prompts.is_empty() {
            DEFAULT_PROMPTS.iter().map(ToString::to_string).collect()
        } else {
            self.run.prompts.clone()
        }
    }

    /// Fail on error-severity issues; return the remaining warnings.
    pub fn check(&self) -> Result<Vec<ConfigWarning>, ConfigError> {
        let (errors, warnings): (Vec<_>, Vec<_>) =
            validate_config(self).into_iter().partition(ConfigWarning::is_error);
        if errors.is_empty() {
            Ok(warnings)
        } else {
            Err(ConfigError::Invalid(errors))
        }
    }
}

fn parser_error(parser: &mut EnvParser, var: &str, value: &str, expected: String) {
    parser.push_error(EnvError::InvalidValue {
        var: var.to_string(),
        expected,
        value: value.to_string(),
    });
}

#[cfg(test)]
pub(crate) fn env_test_lock() -> std::sync::MutexGuard<'static, ()> {
    use std::sync::{Mutex, OnceLock};

    static ENV_LOCK: OnceLock<Mutex<()>> = OnceLock::new();
    ENV_LOCK
        .get_or_init(|| Mutex::new(()))
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner())
}
