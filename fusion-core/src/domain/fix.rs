use std::{collections::BTreeSet, fmt::Display};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::AsRefStr;

use crate::{AnomalyFlag, NavigationStatus, SourceId, VesselKey};

/// The authoritative position of a vessel at one instant.
///
/// Never mutated after it leaves the fusion engine, a corroborated or disputed fix is
/// replaced by a new value at the same trajectory position.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FusedFix {
    pub vessel_key: VesselKey,
    pub latitude: f64,
    pub longitude: f64,
    pub speed: Option<f64>,
    pub course: Option<f64>,
    pub navigation_status: Option<NavigationStatus>,
    pub timestamp: DateTime<Utc>,
    pub confidence: f64,
    pub contributing_sources: BTreeSet<SourceId>,
    pub disputed: bool,
    /// Smallest observation lag among the contributing reports, `None` when none of them
    /// carried an observation time.
    #[serde(default, with = "humantime_serde")]
    pub observation_lag: Option<std::time::Duration>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum FusionOutcome {
    Accepted(FusedFix),
    /// The report corroborated an existing fix. `updated` holds the replacement, or `None`
    /// if the report was a re-delivery that changed nothing.
    Deduplicated { updated: Option<FusedFix> },
    Rejected(RejectReason),
}

#[derive(Debug, Clone, PartialEq)]
pub enum RejectReason {
    MissingIdentifier,
    InvalidCoordinates { latitude: f64, longitude: f64 },
    InvalidSpeed(f64),
    InvalidCourse(f64),
    FutureObservation { observed_at: DateTime<Utc> },
    ImplausibleMotion { knots: f64 },
    Stale { observed_at: DateTime<Utc> },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, AsRefStr)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum RejectCategory {
    InvalidReport,
    ImplausibleMotion,
    StaleReport,
}

/// What the fix sink receives.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FixUpdate {
    pub fix: FusedFix,
    pub anomalies: BTreeSet<AnomalyFlag>,
    /// Set when the fix lands at or behind what was already delivered for the vessel, it
    /// supersedes any earlier update with the same vessel key and timestamp.
    #[serde(default)]
    pub revision: bool,
}

impl FusedFix {
    pub fn has_source(&self, source: &SourceId) -> bool {
        self.contributing_sources.contains(source)
    }

    pub fn shares_source_with(&self, other: &FusedFix) -> bool {
        !self.contributing_sources.is_disjoint(&other.contributing_sources)
    }
}

#[cfg(feature = "test")]
mod test {
    use super::*;

    impl FusedFix {
        pub fn test_new(
            vessel_key: VesselKey,
            source_id: &str,
            latitude: f64,
            longitude: f64,
            timestamp: DateTime<Utc>,
        ) -> FusedFix {
            FusedFix {
                vessel_key,
                latitude,
                longitude,
                speed: Some(10.0),
                course: Some(90.0),
                navigation_status: None,
                timestamp,
                confidence: 0.6,
                contributing_sources: BTreeSet::from([source_id.into()]),
                disputed: false,
                observation_lag: Some(std::time::Duration::ZERO),
            }
        }
    }
}

impl FusionOutcome {
    pub fn is_accepted(&self) -> bool {
        matches!(self, FusionOutcome::Accepted(_))
    }

    pub fn is_rejected(&self) -> bool {
        matches!(self, FusionOutcome::Rejected(_))
    }

    pub fn fix(&self) -> Option<&FusedFix> {
        match self {
            FusionOutcome::Accepted(f) => Some(f),
            FusionOutcome::Deduplicated { updated } => updated.as_ref(),
            FusionOutcome::Rejected(_) => None,
        }
    }
}

impl RejectReason {
    pub fn category(&self) -> RejectCategory {
        match self {
            RejectReason::MissingIdentifier
            | RejectReason::InvalidCoordinates { .. }
            | RejectReason::InvalidSpeed(_)
            | RejectReason::InvalidCourse(_)
            | RejectReason::FutureObservation { .. } => RejectCategory::InvalidReport,
            RejectReason::ImplausibleMotion { .. } => RejectCategory::ImplausibleMotion,
            RejectReason::Stale { .. } => RejectCategory::StaleReport,
        }
    }
}

impl Display for RejectReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RejectReason::MissingIdentifier => f.write_str("missing vessel identifier"),
            RejectReason::InvalidCoordinates {
                latitude,
                longitude,
            } => write!(f, "coordinates out of range, lat: {latitude}, lon: {longitude}"),
            RejectReason::InvalidSpeed(v) => write!(f, "invalid speed over ground: {v}"),
            RejectReason::InvalidCourse(v) => write!(f, "invalid course over ground: {v}"),
            RejectReason::FutureObservation { observed_at } => {
                write!(f, "observed_at '{observed_at}' is ahead of reception")
            }
            RejectReason::ImplausibleMotion { knots } => {
                write!(f, "implied speed of {knots:.1} knots")
            }
            RejectReason::Stale { observed_at } => {
                write!(f, "observed_at '{observed_at}' is outside the retention window")
            }
        }
    }
}
