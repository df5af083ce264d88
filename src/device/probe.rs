//! Adapter Probing
//!
//! Connecting walks an ordered list of `(driver class, feature level)`
//! candidates and keeps the first one the backend can open. Exhausting the
//! list is fatal: [`ComputeError::DeviceUnavailable`](crate::ComputeError::DeviceUnavailable).

use crate::backend::{BackendConnector, BackendError};

/// Class of driver an adapter is opened through.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DriverClass {
    /// A physical accelerator.
    Hardware,
    /// A software rasterizer / CPU emulation.
    Software,
}

/// Capability tier requested from the adapter.
///
/// Ordered: a higher level compares greater.
#[allow(non_camel_case_types)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum FeatureLevel {
    /// Downlevel tier: reduced limits, still compute-capable.
    Level10_1,
    /// Full tier.
    Level11_0,
}

impl std::fmt::Display for FeatureLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Level10_1 => f.write_str("10_1"),
            Self::Level11_0 => f.write_str("11_0"),
        }
    }
}

/// Accepted feature levels, highest first.
pub const ACCEPTED_FEATURE_LEVELS: [FeatureLevel; 2] =
    [FeatureLevel::Level11_0, FeatureLevel::Level10_1];

/// Driver classes tried when connecting; hardware only.
pub const ACCEPTED_DRIVER_CLASSES: [DriverClass; 1] = [DriverClass::Hardware];

/// One `(driver class, feature level)` pair to try.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct AdapterCandidate {
    pub driver: DriverClass,
    pub level: FeatureLevel,
}

impl AdapterCandidate {
    #[inline]
    #[must_use]
    pub const fn new(driver: DriverClass, level: FeatureLevel) -> Self {
        Self { driver, level }
    }
}

/// Default probe order: every accepted level on every accepted driver class,
/// driver-major, highest level first.
#[must_use]
pub fn default_candidates() -> Vec<AdapterCandidate> {
    ACCEPTED_DRIVER_CLASSES
        .iter()
        .flat_map(|&driver| {
            ACCEPTED_FEATURE_LEVELS
                .iter()
                .map(move |&level| AdapterCandidate::new(driver, level))
        })
        .collect()
}

/// Tries each candidate in order; first success wins.
pub(crate) fn probe<C: BackendConnector>(
    connector: &C,
    candidates: &[AdapterCandidate],
) -> Option<(C::Backend, AdapterCandidate)> {
    for candidate in candidates {
        match connector.open(candidate) {
            Ok(backend) => return Some((backend, *candidate)),
            Err(BackendError::Unsupported(reason)) => {
                log::debug!(
                    "Candidate {:?} / {} not supported: {}",
                    candidate.driver,
                    candidate.level,
                    reason
                );
            }
            Err(e) => {
                log::warn!(
                    "Opening candidate {:?} / {} failed: {}",
                    candidate.driver,
                    candidate.level,
                    e
                );
            }
        }
    }
    None
}
