//! Chaos injection: the fault catalogue and the probabilistic injector.

pub mod fault;
pub mod injector;

pub use fault::{Fault, FaultError, FaultFamily, FaultKind, UnknownFaultKind};
pub use injector::{ChaosConfig, ChaosError, ChaosInjector, DEFAULT_CHAOS_PROBABILITY};
