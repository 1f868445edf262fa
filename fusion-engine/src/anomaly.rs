use std::collections::BTreeSet;

use fusion_core::{
    AnomalyConfig, AnomalyFlag, FusedFix, FusionConfig, course_difference,
    estimated_speed_between_points, to_chrono,
};

/// Flags discontinuities between two consecutive fixes of a trajectory.
#[derive(Debug, Clone)]
pub struct AnomalyDetector {
    max_speed_knots: f64,
    silence_threshold: chrono::Duration,
    course_reversal_degrees: f64,
    course_reversal_min_speed_knots: f64,
    course_reversal_window: chrono::Duration,
}

impl AnomalyDetector {
    pub fn new(config: &FusionConfig) -> Self {
        let AnomalyConfig {
            silence_threshold,
            course_reversal_degrees,
            course_reversal_min_speed_knots,
            course_reversal_window,
        } = &config.anomaly;

        Self {
            max_speed_knots: config.plausibility.max_speed_knots,
            silence_threshold: to_chrono(*silence_threshold),
            course_reversal_degrees: *course_reversal_degrees,
            course_reversal_min_speed_knots: *course_reversal_min_speed_knots,
            course_reversal_window: to_chrono(*course_reversal_window),
        }
    }

    pub fn observe(
        &self,
        previous: Option<&FusedFix>,
        current: &FusedFix,
    ) -> BTreeSet<AnomalyFlag> {
        let mut flags = BTreeSet::new();

        if current.disputed {
            flags.insert(AnomalyFlag::PositionDispute);
        }

        let Some(previous) = previous else {
            return flags;
        };

        let gap = current.timestamp - previous.timestamp;

        if gap > self.silence_threshold {
            flags.insert(AnomalyFlag::ProlongedSilence);
        }

        if estimated_speed_between_points(previous, current)
            .is_some_and(|knots| knots > self.max_speed_knots)
        {
            flags.insert(AnomalyFlag::SpeedJump);
        }

        if gap <= self.course_reversal_window && self.is_course_reversal(previous, current) {
            flags.insert(AnomalyFlag::CourseReversal);
        }

        flags
    }

    fn is_course_reversal(&self, previous: &FusedFix, current: &FusedFix) -> bool {
        match (previous.course, current.course, previous.speed, current.speed) {
            (Some(c1), Some(c2), Some(s1), Some(s2)) => {
                s1 >= self.course_reversal_min_speed_knots
                    && s2 >= self.course_reversal_min_speed_knots
                    && course_difference(c1, c2) >= self.course_reversal_degrees
            }
            _ => false,
        }
    }
}
