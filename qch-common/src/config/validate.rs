//! Startup validation of the merged configuration.

use super::{GeneratorKind, HarnessConfig};
use crate::chaos::FaultKind;
use serde::Serialize;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Warning,
    Error,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConfigWarning {
    pub severity: Severity,
    pub field: &'static str,
    pub message: String,
}

impl ConfigWarning {
    fn error(field: &'static str, message: impl Into<String>) -> Self {
        Self {
            severity: Severity::Error,
            field,
            message: message.into(),
        }
    }

    fn warning(field: &'static str, message: impl Into<String>) -> Self {
        Self {
            severity: Severity::Warning,
            field,
            message: message.into(),
        }
    }

    pub fn is_error(&self) -> bool {
        self.severity == Severity::Error
    }
}

impl fmt::Display for ConfigWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self.severity {
            Severity::Warning => "warning",
            Severity::Error => "error",
        };
        write!(f, "{label}: {}: {}", self.field, self.message)
    }
}

/// Check cross-field constraints. Errors block a run; warnings do not.
pub fn validate_config(config: &HarnessConfig) -> Vec<ConfigWarning> {
    let mut issues = Vec::new();

    let retry = &config.retry;
    if retry.max_attempts == 0 {
        issues.push(ConfigWarning::error("retry.max_attempts", "must be at least 1"));
    } else if retry.max_attempts > 10 {
        issues.push(ConfigWarning::warning(
            "retry.max_attempts",
            format!("{} attempts per task can make runs very long", retry.max_attempts),
        ));
    }
    if retry.backoff_min_ms > retry.backoff_max_ms {
        issues.push(ConfigWarning::error(
            "retry.backoff_min_ms",
            format!(
                "backoff_min_ms ({}) exceeds backoff_max_ms ({})",
                retry.backoff_min_ms, retry.backoff_max_ms
            ),
        ));
    }

    let chaos = &config.chaos;
    if !(0.0..=1.0).contains(&chaos.probability) {
        issues.push(ConfigWarning::error(
            "chaos.probability",
            format!("must be within [0, 1], got {}", chaos.probability),
        ));
    }
    if let Some(faults) = &chaos.faults {
        for name in faults {
            if name.parse::<FaultKind>().is_err() {
                issues.push(ConfigWarning::error(
                    "chaos.faults",
                    format!("unknown fault '{name}'"),
                ));
            }
        }
        if chaos.enabled && faults.is_empty() {
            issues.push(ConfigWarning::warning(
                "chaos.faults",
                "chaos is enabled but the fault catalogue is empty; no faults will fire",
            ));
        }
    }

    let fixtures = &config.fixtures;
    if fixtures.min_views_per_user > fixtures.max_views_per_user {
        issues.push(ConfigWarning::error(
            "fixtures.min_views_per_user",
            "exceeds fixtures.max_views_per_user",
        ));
    }
    if fixtures.users == 0 {
        issues.push(ConfigWarning::warning(
            "fixtures.users",
            "no users will be generated; most queries will return no rows",
        ));
    }

    let generator = &config.generator;
    match generator.kind {
        GeneratorKind::Gemini if generator.api_key.is_none() => {
            issues.push(ConfigWarning::error(
                "generator.api_key_env",
                format!("{} is not set", generator.api_key_env),
            ));
        }
        GeneratorKind::Canned => {
            if let Some(path) = &generator.canned_file
                && !path.exists()
            {
                issues.push(ConfigWarning::error(
                    "generator.canned_file",
                    format!("{} does not exist", path.display()),
                ));
            }
        }
        GeneratorKind::Gemini => {}
    }

    issues
}
