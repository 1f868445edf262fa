use chrono::{DateTime, Utc};
use geoutils::Location;

use crate::{FusedFix, PositionReport};

static METER_TO_NAUTICAL_MILES: f64 = 0.0005399568;

pub struct SpeedItem {
    pub latitude: f64,
    pub longitude: f64,
    pub timestamp: DateTime<Utc>,
}

impl From<&FusedFix> for SpeedItem {
    fn from(value: &FusedFix) -> Self {
        SpeedItem {
            latitude: value.latitude,
            longitude: value.longitude,
            timestamp: value.timestamp,
        }
    }
}

impl From<&PositionReport> for SpeedItem {
    fn from(value: &PositionReport) -> Self {
        SpeedItem {
            latitude: value.latitude,
            longitude: value.longitude,
            timestamp: value.event_time(),
        }
    }
}

pub fn distance_nautical_miles<A, B>(first: &A, second: &B) -> f64
where
    for<'a> &'a A: Into<SpeedItem>,
    for<'a> &'a B: Into<SpeedItem>,
{
    let first: SpeedItem = first.into();
    let second: SpeedItem = second.into();
    let first_loc = Location::new(first.latitude, first.longitude);
    let second_loc = Location::new(second.latitude, second.longitude);

    first_loc.haversine_distance_to(&second_loc).meters() * METER_TO_NAUTICAL_MILES
}

/// Speed in knots needed to travel between the two points in the time separating them.
/// Returns `None` when both points share a timestamp.
pub fn estimated_speed_between_points<A, B>(first: &A, second: &B) -> Option<f64>
where
    for<'a> &'a A: Into<SpeedItem>,
    for<'a> &'a B: Into<SpeedItem>,
{
    let distance = distance_nautical_miles(first, second);

    let first: SpeedItem = first.into();
    let second: SpeedItem = second.into();
    let millis = (second.timestamp - first.timestamp).num_milliseconds().abs();
    if millis == 0 {
        return None;
    }

    Some(distance / (millis as f64 / 1000.0 / 60.0 / 60.0))
}

/// Smallest angle between two courses in degrees, in `[0, 180]`.
pub fn course_difference(first: f64, second: f64) -> f64 {
    let diff = (first - second).abs() % 360.0;
    if diff > 180.0 { 360.0 - diff } else { diff }
}
