use serde::{Deserialize, Serialize};
use strum::AsRefStr;

/// Advisory annotations raised by the anomaly detector, they never block ingestion.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Serialize,
    Deserialize,
    strum::Display,
    AsRefStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum AnomalyFlag {
    /// Derived speed between consecutive fixes is above the plausibility ceiling.
    SpeedJump,
    /// Sharp course change at a speed where such a turn is not credible.
    CourseReversal,
    /// The gap to the previous fix is longer than the silence threshold.
    ProlongedSilence,
    /// Sources disagree about where the vessel was.
    PositionDispute,
}
