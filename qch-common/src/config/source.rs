//! Where a configuration value came from.

use serde::Serialize;
use std::fmt;

/// Layer that supplied a value. Later layers override earlier ones.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConfigSource {
    Default,
    File,
    DotEnv,
    Environment,
    CommandLine,
}

impl fmt::Display for ConfigSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Default => "default",
            Self::File => "config file",
            Self::DotEnv => ".env",
            Self::Environment => "environment",
            Self::CommandLine => "command line",
        };
        f.write_str(label)
    }
}

/// A value tagged with its source and, for variables, the variable name.
#[derive(Debug, Clone, PartialEq)]
pub struct Sourced<T> {
    pub value: T,
    pub source: ConfigSource,
    pub origin: Option<String>,
}

impl<T> Sourced<T> {
    pub fn default_value(value: T) -> Self {
        Self {
            value,
            source: ConfigSource::Default,
            origin: None,
        }
    }

    pub fn from_var(value: T, source: ConfigSource, var: impl Into<String>) -> Self {
        Self {
            value,
            source,
            origin: Some(var.into()),
        }
    }

    /// True when a variable, not the default, supplied the value.
    pub fn is_override(&self) -> bool {
        matches!(self.source, ConfigSource::Environment | ConfigSource::DotEnv)
    }

    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Sourced<U> {
        Sourced {
            value: f(self.value),
            source: self.source,
            origin: self.origin,
        }
    }
}

/// Record of one overridden setting, for `--verbose` diagnostics.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConfigValueSource {
    pub key: &'static str,
    pub source: ConfigSource,
    pub origin: Option<String>,
}

impl fmt::Display for ConfigValueSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.origin {
            Some(origin) => write!(f, "{} <- {} ({origin})", self.key, self.source),
            None => write!(f, "{} <- {}", self.key, self.source),
        }
    }
}
