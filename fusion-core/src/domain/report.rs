use chrono::{DateTime, Utc};
use num_derive::FromPrimitive;
use serde::{Deserialize, Serialize};
use serde_repr::{Deserialize_repr, Serialize_repr};
use strum::AsRefStr;

use crate::SourceId;

/// A canonical position observation as produced by a feed normalizer.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct PositionReport {
    pub vessel_raw_id: String,
    pub source_id: SourceId,
    pub latitude: f64,
    pub longitude: f64,
    pub speed_over_ground: Option<f64>,
    pub course_over_ground: Option<f64>,
    pub navigation_status: Option<NavigationStatus>,
    /// When the source claims the vessel was at this position, some sources omit it.
    pub observed_at: Option<DateTime<Utc>>,
    /// Set by the ingestion boundary.
    pub received_at: DateTime<Utc>,
}

#[derive(
    Debug,
    Copy,
    Clone,
    PartialEq,
    FromPrimitive,
    Eq,
    Serialize_repr,
    Deserialize_repr,
    strum::Display,
    AsRefStr,
)]
#[repr(i32)]
pub enum NavigationStatus {
    UnderWayUsingEngine = 0,
    AtAnchor = 1,
    NotUnderCommand = 2,
    RestrictedManoeuverability = 3,
    ConstrainedByDraught = 4,
    Moored = 5,
    Aground = 6,
    EngagedInFishing = 7,
    UnderWaySailing = 8,
    Reserved9 = 9,
    Reserved10 = 10,
    Reserved11 = 11,
    Reserved12 = 12,
    Reserved13 = 13,
    AisSartIsActive = 14,
    NotDefined = 15,
}

impl PositionReport {
    /// The instant this report describes.
    pub fn event_time(&self) -> DateTime<Utc> {
        self.observed_at.unwrap_or(self.received_at)
    }

    /// Delay between observation and reception, `None` when the source gave no observation
    /// time. Small negative lags caused by clock skew are clamped to zero.
    pub fn observation_lag(&self) -> Option<std::time::Duration> {
        self.observed_at
            .map(|o| (self.received_at - o).to_std().unwrap_or_default())
    }
}

#[cfg(feature = "test")]
mod test {
    use super::*;

    impl PositionReport {
        pub fn test_new(
            vessel_raw_id: &str,
            source_id: &str,
            latitude: f64,
            longitude: f64,
            observed_at: DateTime<Utc>,
        ) -> PositionReport {
            PositionReport {
                vessel_raw_id: vessel_raw_id.to_owned(),
                source_id: source_id.into(),
                latitude,
                longitude,
                speed_over_ground: Some(10.0),
                course_over_ground: Some(90.0),
                navigation_status: Some(NavigationStatus::UnderWayUsingEngine),
                observed_at: Some(observed_at),
                received_at: observed_at,
            }
        }

        pub fn with_speed(mut self, speed: f64) -> PositionReport {
            self.speed_over_ground = Some(speed);
            self
        }

        pub fn with_course(mut self, course: f64) -> PositionReport {
            self.course_over_ground = Some(course);
            self
        }

        pub fn received(mut self, received_at: DateTime<Utc>) -> PositionReport {
            self.received_at = received_at;
            self
        }

        pub fn without_observed_at(mut self) -> PositionReport {
            self.observed_at = None;
            self
        }
    }
}
