use chrono::{DateTime, Utc};
use fusion_core::{NavigationStatus, PositionReport, SourceId};
use num_traits::FromPrimitive;
use serde::{Deserialize, Serialize};
use tracing::warn;

/// One line of a normalized feed.
///
/// Feeds disagree on whether the vessel id is a number or a string, both are accepted and the
/// id is kept verbatim so the engine can decide whether it is a genuine MMSI.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct NormalizedReport {
    #[serde(alias = "mmsi")]
    pub vessel_id: RawVesselId,
    pub latitude: f64,
    pub longitude: f64,
    pub speed_over_ground: Option<f64>,
    pub course_over_ground: Option<f64>,
    pub navigation_status: Option<i32>,
    #[serde(default, alias = "timestamp")]
    pub observed_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(untagged)]
pub enum RawVesselId {
    Number(i64),
    Text(String),
}

impl NormalizedReport {
    pub fn into_position_report(
        self,
        source_id: SourceId,
        received_at: DateTime<Utc>,
    ) -> PositionReport {
        let navigation_status = self.navigation_status.and_then(|code| {
            let status = NavigationStatus::from_i32(code);
            if status.is_none() {
                warn!("source '{source_id}' sent unknown navigation status '{code}'");
            }
            status
        });

        PositionReport {
            vessel_raw_id: self.vessel_id.into(),
            source_id,
            latitude: self.latitude,
            longitude: self.longitude,
            speed_over_ground: self.speed_over_ground,
            course_over_ground: self.course_over_ground,
            navigation_status,
            observed_at: self.observed_at,
            received_at,
        }
    }
}

impl From<RawVesselId> for String {
    fn from(value: RawVesselId) -> Self {
        match value {
            RawVesselId::Number(n) => n.to_string(),
            RawVesselId::Text(s) => s,
        }
    }
}

#[cfg(feature = "test")]
mod test {
    use super::*;

    impl NormalizedReport {
        pub fn test_default(mmsi: i32, observed_at: DateTime<Utc>) -> NormalizedReport {
            NormalizedReport {
                vessel_id: RawVesselId::Number(mmsi as i64),
                latitude: 60.0,
                longitude: 5.0,
                speed_over_ground: Some(8.4),
                course_over_ground: Some(123.3),
                navigation_status: Some(0),
                observed_at: Some(observed_at),
            }
        }

        pub fn with_position(mut self, latitude: f64, longitude: f64) -> NormalizedReport {
            self.latitude = latitude;
            self.longitude = longitude;
            self
        }

        pub fn to_line(&self) -> String {
            let mut line = serde_json::to_string(self).unwrap();
            line.push('\n');
            line
        }
    }
}
