//! Probabilistic fault injection ahead of each query attempt.

use crate::chaos::fault::{Fault, FaultKind};
use crate::db::Database;
use std::collections::BTreeMap;
use thiserror::Error;
use tracing::{info, warn};

/// Default activation probability per attempt.
pub const DEFAULT_CHAOS_PROBABILITY: f64 = 0.3;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ChaosError {
    #[error("chaos probability must be within [0, 1], got {0}")]
    ProbabilityOutOfRange(f64),
}

/// Injector settings, fixed at construction.
#[derive(Debug, Clone, PartialEq)]
pub struct ChaosConfig {
    /// Master switch.
    pub enabled: bool,
    /// Chance that any fault fires on a given attempt.
    pub probability: f64,
    /// Faults chosen from uniformly once active.
    pub catalogue: Vec<Fault>,
}

impl Default for ChaosConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            probability: DEFAULT_CHAOS_PROBABILITY,
            catalogue: Fault::full_catalogue(),
        }
    }
}

impl ChaosConfig {
    /// Never injects.
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            ..Self::default()
        }
    }

    /// Restrict the catalogue to `faults`, firing with `probability`.
    pub fn only(faults: Vec<Fault>, probability: f64) -> Self {
        Self {
            enabled: true,
            probability,
            catalogue: faults,
        }
    }

    pub fn validate(&self) -> Result<(), ChaosError> {
        if !(0.0..=1.0).contains(&self.probability) {
            return Err(ChaosError::ProbabilityOutOfRange(self.probability));
        }
        Ok(())
    }
}

/// Fires at most one fault per invocation.
pub struct ChaosInjector {
    config: ChaosConfig,
    rng: fastrand::Rng,
    injected: BTreeMap<FaultKind, u64>,
}

impl ChaosInjector {
    pub fn new(config: ChaosConfig) -> Result<Self, ChaosError> {
        Self::with_rng(config, fastrand::Rng::new())
    }

    /// Reproducible fault selection.
    pub fn with_seed(config: ChaosConfig, seed: u64) -> Result<Self, ChaosError> {
        Self::with_rng(config, fastrand::Rng::with_seed(seed))
    }

    pub fn with_rng(config: ChaosConfig, rng: fastrand::Rng) -> Result<Self, ChaosError> {
        config.validate()?;
        Ok(Self {
            config,
            rng,
            injected: BTreeMap::new(),
        })
    }

    pub fn config(&self) -> &ChaosConfig {
        &self.config
    }

    /// How often each fault has fired so far.
    pub fn injected_counts(&self) -> &BTreeMap<FaultKind, u64> {
        &self.injected
    }

    /// Maybe fire one fault from the catalogue.
    ///
    /// Returns the chosen kind even when executing it failed; the failure is
    /// logged and swallowed so injection never aborts the harness.
    pub async fn maybe_inject_fault<D: Database>(&mut self, db: &mut D) -> Option<FaultKind> {
        if !self.config.enabled || self.config.catalogue.is_empty() {
            return None;
        }
        if self.rng.f64() >= self.config.probability {
            return None;
        }

        let index = self.rng.usize(..self.config.catalogue.len());
        let fault = self.config.catalogue[index].clone();
        let kind = fault.kind();
        info!(fault = %kind, family = %kind.family(), detail = %fault, "Injecting chaos");

        if let Err(e) = fault.execute(db, &mut self.rng).await {
            warn!(fault = %kind, error = %e, "Chaos error (expected)");
        }

        *self.injected.entry(kind).or_default() += 1;
        Some(kind)
    }
}
