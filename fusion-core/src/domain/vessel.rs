use std::{
    collections::{BTreeMap, BTreeSet},
    fmt::Display,
    str::FromStr,
};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{AnomalyFlag, FusedFix, MmsiError, mmsi_error::FormatSnafu};

pub const MMSI_MIN: i32 = 100_000_000;
pub const MMSI_MAX: i32 = 999_999_999;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Deserialize, Serialize)]
#[serde(try_from = "i32", into = "i32")]
pub struct Mmsi(i32);

/// Identifies one upstream feed. Sources come and go at runtime, so everything keyed by a
/// source uses this value rather than a fixed set of fields.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Deserialize, Serialize)]
#[serde(transparent)]
pub struct SourceId(String);

/// Internal vessel identity. Genuine MMSIs map to `Mmsi`, everything else is scoped to the
/// source that reported it so malformed ids never merge with real vessels or with each other
/// across sources.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum VesselKey {
    Mmsi(Mmsi),
    Synthetic { source: SourceId, raw: String },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VesselState {
    pub vessel_key: VesselKey,
    pub first_seen: DateTime<Utc>,
    pub last_fix: Option<FusedFix>,
    pub rolling_confidence: f64,
    pub last_seen_by_source: BTreeMap<SourceId, DateTime<Utc>>,
    pub anomalies: BTreeSet<AnomalyFlag>,
    /// Latest event time of any accepted report, staleness is measured from here.
    pub latest_event_time: DateTime<Utc>,
    pub disputes: u64,
    /// Fixes at or before this timestamp have been handed to the fix sink.
    pub delivered_until: Option<DateTime<Utc>>,
}

impl Mmsi {
    pub fn into_inner(self) -> i32 {
        self.0
    }
}

impl TryFrom<i32> for Mmsi {
    type Error = MmsiError;

    fn try_from(value: i32) -> Result<Self, Self::Error> {
        if (MMSI_MIN..=MMSI_MAX).contains(&value) {
            Ok(Self(value))
        } else {
            FormatSnafu {
                value: value.to_string(),
            }
            .fail()
        }
    }
}

impl FromStr for Mmsi {
    type Err = MmsiError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.len() != 9 || !s.bytes().all(|b| b.is_ascii_digit()) {
            return FormatSnafu { value: s }.fail();
        }
        match s.parse::<i32>() {
            Ok(v) => Mmsi::try_from(v),
            Err(_) => FormatSnafu { value: s }.fail(),
        }
    }
}

impl From<Mmsi> for i32 {
    fn from(value: Mmsi) -> Self {
        value.0
    }
}

impl Display for Mmsi {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

impl SourceId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for SourceId {
    fn from(value: &str) -> Self {
        Self(value.to_owned())
    }
}

impl From<String> for SourceId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl AsRef<str> for SourceId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl Display for SourceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl VesselKey {
    pub fn mmsi(&self) -> Option<Mmsi> {
        match self {
            VesselKey::Mmsi(m) => Some(*m),
            VesselKey::Synthetic { .. } => None,
        }
    }

    pub fn is_synthetic(&self) -> bool {
        matches!(self, VesselKey::Synthetic { .. })
    }
}

impl From<Mmsi> for VesselKey {
    fn from(value: Mmsi) -> Self {
        VesselKey::Mmsi(value)
    }
}

impl Display for VesselKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            VesselKey::Mmsi(m) => write!(f, "mmsi:{m}"),
            VesselKey::Synthetic { source, raw } => write!(f, "synthetic:{source}:{raw}"),
        }
    }
}

impl VesselState {
    pub fn new(vessel_key: VesselKey, first_seen: DateTime<Utc>) -> Self {
        Self {
            vessel_key,
            first_seen,
            last_fix: None,
            rolling_confidence: 0.0,
            last_seen_by_source: BTreeMap::new(),
            anomalies: BTreeSet::new(),
            latest_event_time: first_seen,
            disputes: 0,
            delivered_until: None,
        }
    }

    pub fn is_stale(&self, now: DateTime<Utc>, threshold: chrono::Duration) -> bool {
        now - self.latest_event_time > threshold
    }
}

#[cfg(feature = "test")]
mod test {
    use super::*;

    impl Mmsi {
        pub fn test_new(mmsi: i32) -> Self {
            Self(mmsi)
        }
    }

    impl VesselKey {
        pub fn test_mmsi(mmsi: i32) -> Self {
            VesselKey::Mmsi(Mmsi::test_new(mmsi))
        }
    }
}
