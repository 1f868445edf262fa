use std::{collections::BTreeSet, time::Duration};

use fusion_core::{ConfidenceConfig, FusedFix, PositionReport, VesselKey};

/// Pure confidence policy over immutable fixes.
///
/// `confidence = source_score(n) * recency(lag)`, capped at `dispute_cap` for disputed
/// fixes. Adding an agreeing source never lowers the recency factor, so corroboration
/// always raises the score of an undisputed fix.
#[derive(Debug, Clone)]
pub struct ConfidenceScorer {
    config: ConfidenceConfig,
}

impl ConfidenceScorer {
    pub fn new(config: ConfidenceConfig) -> Self {
        Self { config }
    }

    pub fn score(&self, fix: &FusedFix) -> f64 {
        let base = self.config.source_score(fix.contributing_sources.len())
            * self.recency(fix.observation_lag);

        let score = if fix.disputed {
            base.min(self.config.dispute_cap)
        } else {
            base
        };

        score.clamp(0.0, 1.0)
    }

    pub fn recency(&self, lag: Option<Duration>) -> f64 {
        let c = &self.config;
        let Some(lag) = lag else {
            return c.missing_observed_at_factor;
        };

        if lag <= c.lag_grace {
            1.0
        } else if lag >= c.lag_horizon {
            c.min_recency_factor
        } else {
            let span = (c.lag_horizon - c.lag_grace).as_secs_f64();
            let progress = (lag - c.lag_grace).as_secs_f64() / span;
            1.0 - (1.0 - c.min_recency_factor) * progress
        }
    }

    /// First fix built from a single report.
    pub fn initial(&self, vessel_key: VesselKey, report: &PositionReport) -> FusedFix {
        let mut fix = FusedFix {
            vessel_key,
            latitude: report.latitude,
            longitude: report.longitude,
            speed: report.speed_over_ground,
            course: report.course_over_ground,
            navigation_status: report.navigation_status,
            timestamp: report.event_time(),
            confidence: 0.0,
            contributing_sources: BTreeSet::from([report.source_id.clone()]),
            disputed: false,
            observation_lag: report.observation_lag(),
        };
        fix.confidence = self.score(&fix);
        fix
    }

    /// Replacement for `existing` after `report` from another source agreed with it.
    pub fn corroborate(&self, existing: &FusedFix, report: &PositionReport) -> FusedFix {
        let n = existing.contributing_sources.len() as f64;

        let mut sources = existing.contributing_sources.clone();
        sources.insert(report.source_id.clone());

        let speed = match (existing.speed, report.speed_over_ground) {
            (Some(a), Some(b)) => Some((a * n + b) / (n + 1.0)),
            (a, b) => a.or(b),
        };

        let observation_lag = match (existing.observation_lag, report.observation_lag()) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        };

        let mut fix = FusedFix {
            vessel_key: existing.vessel_key.clone(),
            latitude: (existing.latitude * n + report.latitude) / (n + 1.0),
            longitude: weighted_longitude(existing.longitude, n, report.longitude),
            speed,
            course: existing.course.or(report.course_over_ground),
            navigation_status: existing.navigation_status.or(report.navigation_status),
            timestamp: existing.timestamp,
            confidence: 0.0,
            contributing_sources: sources,
            disputed: existing.disputed,
            observation_lag,
        };
        fix.confidence = self.score(&fix);
        fix
    }

    pub fn dispute(&self, fix: &FusedFix) -> FusedFix {
        let mut disputed = fix.clone();
        disputed.disputed = true;
        disputed.confidence = self.score(&disputed);
        disputed
    }
}

/// Weighted mean of two longitudes taking the shorter way around the antimeridian.
fn weighted_longitude(existing: f64, weight: f64, new: f64) -> f64 {
    let new = if new - existing > 180.0 {
        new - 360.0
    } else if existing - new > 180.0 {
        new + 360.0
    } else {
        new
    };

    let mean = (existing * weight + new) / (weight + 1.0);
    if mean > 180.0 {
        mean - 360.0
    } else if mean < -180.0 {
        mean + 360.0
    } else {
        mean
    }
}
