//! Typed access to `QCH_` environment variables.
//!
//! Lookups consult the process environment first, then any `.env` values
//! handed to the parser. Bad values fall back to the default and are
//! collected so every problem can be reported at once.

use super::source::{ConfigSource, Sourced};
use std::collections::HashMap;
use std::env;
use std::fmt::Display;
use std::path::PathBuf;
use std::str::FromStr;
use thiserror::Error;

pub const ENV_PREFIX: &str = "QCH_";

#[derive(Debug, Clone, PartialEq, Error)]
pub enum EnvError {
    #[error("Invalid value for {var}: expected {expected}, got '{value}'")]
    InvalidValue {
        var: String,
        expected: String,
        value: String,
    },

    #[error("Value out of range for {var}: {value} (valid: {min}..={max})")]
    OutOfRange {
        var: String,
        value: String,
        min: String,
        max: String,
    },

    #[error("Invalid log level for {var}: {value}")]
    InvalidLogLevel { var: String, value: String },
}

pub struct EnvParser {
    prefix: &'static str,
    dotenv: HashMap<String, String>,
    errors: Vec<EnvError>,
}

impl EnvParser {
    pub fn new() -> Self {
        Self::with_prefix(ENV_PREFIX)
    }

    pub fn with_prefix(prefix: &'static str) -> Self {
        Self {
            prefix,
            dotenv: HashMap::new(),
            errors: Vec::new(),
        }
    }

    /// Fall back to these values for variables missing from the environment.
    pub fn with_dotenv(mut self, vars: HashMap<String, String>) -> Self {
        self.dotenv = vars;
        self
    }

    pub fn errors(&self) -> &[EnvError] {
        &self.errors
    }

    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty()
    }

    pub fn take_errors(&mut self) -> Vec<EnvError> {
        std::mem::take(&mut self.errors)
    }

    /// Record a problem found while interpreting an already-read value.
    pub fn push_error(&mut self, error: EnvError) {
        self.errors.push(error);
    }

    fn var_name(&self, name: &str) -> String {
        format!("{}{}", self.prefix, name)
    }

    /// Unprefixed lookup, e.g. for API keys named by the config file.
    pub fn raw(&self, var: &str) -> Option<Sourced<String>> {
        match env::var(var) {
            Ok(value) => Some(Sourced::from_var(value, ConfigSource::Environment, var)),
            Err(_) => self
                .dotenv
                .get(var)
                .map(|value| Sourced::from_var(value.clone(), ConfigSource::DotEnv, var)),
        }
    }

    fn lookup(&self, name: &str) -> Option<(String, Sourced<String>)> {
        let var = self.var_name(name);
        let found = self.raw(&var)?;
        Some((var, found))
    }

    pub fn get_string(&mut self, name: &str, default: &str) -> Sourced<String> {
        self.lookup(name)
            .map(|(_, found)| found)
            .unwrap_or_else(|| Sourced::default_value(default.to_string()))
    }

    /// Accepts 1/true/yes/on and 0/false/no/off/"" in any case.
    pub fn get_bool(&mut self, name: &str, default: bool) -> Sourced<bool> {
        let Some((var, found)) = self.lookup(name) else {
            return Sourced::default_value(default);
        };
        let parsed = match found.value.to_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => true,
            "0" | "false" | "no" | "off" | "" => false,
            _ => {
                self.errors.push(EnvError::InvalidValue {
                    var,
                    expected: "boolean (true/false/1/0/yes/no)".to_string(),
                    value: found.value.clone(),
                });
                return Sourced::default_value(default);
            }
        };
        found.map(|_| parsed)
    }

    /// Parse a number and check it against `min..=max`.
    pub fn get_in_range<T>(&mut self, name: &str, default: T, min: T, max: T) -> Sourced<T>
    where
        T: FromStr + PartialOrd + Display + Copy,
    {
        let Some((var, found)) = self.lookup(name) else {
            return Sourced::default_value(default);
        };
        match found.value.trim().parse::<T>() {
            Ok(n) if n >= min && n <= max => found.map(|_| n),
            Ok(n) => {
                self.errors.push(EnvError::OutOfRange {
                    var,
                    value: n.to_string(),
                    min: min.to_string(),
                    max: max.to_string(),
                });
                Sourced::default_value(default)
            }
            Err(_) => {
                self.errors.push(EnvError::InvalidValue {
                    var,
                    expected: std::any::type_name::<T>().to_string(),
                    value: found.value.clone(),
                });
                Sourced::default_value(default)
            }
        }
    }

    pub fn get_optional_u64(&mut self, name: &str) -> Sourced<Option<u64>> {
        let Some((var, found)) = self.lookup(name) else {
            return Sourced::default_value(None);
        };
        if found.value.trim().is_empty() {
            return found.map(|_| None);
        }
        match found.value.trim().parse::<u64>() {
            Ok(n) => found.map(|_| Some(n)),
            Err(_) => {
                self.errors.push(EnvError::InvalidValue {
                    var,
                    expected: "unsigned 64-bit integer".to_string(),
                    value: found.value.clone(),
                });
                Sourced::default_value(None)
            }
        }
    }

    /// Path with `~/` expanded to the home directory.
    pub fn get_optional_path(&mut self, name: &str) -> Sourced<Option<PathBuf>> {
        match self.lookup(name) {
            Some((_, found)) => found.map(|v| (!v.is_empty()).then(|| expand_home(&v))),
            None => Sourced::default_value(None),
        }
    }

    pub fn get_log_level(&mut self, name: &str, default: &str) -> Sourced<String> {
        let Some((var, found)) = self.lookup(name) else {
            return Sourced::default_value(default.to_string());
        };
        let lower = found.value.to_lowercase();
        match lower.as_str() {
            "trace" | "debug" | "info" | "warn" | "error" | "off" => found.map(|_| lower),
            _ => {
                self.errors.push(EnvError::InvalidLogLevel {
                    var,
                    value: found.value.clone(),
                });
                Sourced::default_value(default.to_string())
            }
        }
    }

    /// Comma-separated list; an empty variable yields an empty list.
    pub fn get_string_list(&mut self, name: &str, default: Vec<String>) -> Sourced<Vec<String>> {
        match self.lookup(name) {
            Some((_, found)) => found.map(|v| {
                v.split(',')
                    .map(|s| s.trim().to_string())
                    .filter(|s| !s.is_empty())
                    .collect()
            }),
            None => Sourced::default_value(default),
        }
    }
}

impl Default for EnvParser {
    fn default() -> Self {
        Self::new()
    }
}

pub(crate) fn expand_home(value: &str) -> PathBuf {
    match (value.strip_prefix("~/"), dirs::home_dir()) {
        (Some(rest), Some(home)) => home.join(rest),
        _ => PathBuf::from(value),
    }
}
