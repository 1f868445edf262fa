use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{Result, error::error::InvalidConfigSnafu};

/// Policy parameters of the fusion engine. Every field has a documented default so a
/// deployment only needs to override what it cares about.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct FusionConfig {
    pub duplicate: DuplicateConfig,
    pub plausibility: PlausibilityConfig,
    pub retention: RetentionConfig,
    pub confidence: ConfidenceConfig,
    pub anomaly: AnomalyConfig,
    pub delivery: DeliveryConfig,
    pub workers: WorkerConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct DuplicateConfig {
    /// Reports closer in time than this to an existing fix are merged or disputed.
    #[serde(with = "humantime_serde")]
    pub window: Duration,
    /// Positions closer than this agree.
    pub position_tolerance_nm: f64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct PlausibilityConfig {
    pub max_speed_knots: f64,
    /// How far `observed_at` may lie ahead of `received_at` before the report is invalid.
    #[serde(with = "humantime_serde")]
    pub clock_skew_tolerance: Duration,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RetentionConfig {
    /// Fixes older than the vessel head minus this window are dropped.
    #[serde(with = "humantime_serde")]
    pub window: Duration,
    pub max_fixes: usize,
    /// A vessel is evicted once its latest accepted report is older than this.
    #[serde(with = "humantime_serde")]
    pub staleness_threshold: Duration,
    #[serde(with = "humantime_serde")]
    pub eviction_interval: Duration,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ConfidenceConfig {
    pub single_source_ceiling: f64,
    pub dispute_cap: f64,
    #[serde(with = "humantime_serde")]
    pub lag_grace: Duration,
    #[serde(with = "humantime_serde")]
    pub lag_horizon: Duration,
    pub min_recency_factor: f64,
    pub missing_observed_at_factor: f64,
    /// Weight of the newest fix in the vessel's rolling confidence.
    pub rolling_alpha: f64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct AnomalyConfig {
    #[serde(with = "humantime_serde")]
    pub silence_threshold: Duration,
    pub course_reversal_degrees: f64,
    pub course_reversal_min_speed_knots: f64,
    #[serde(with = "humantime_serde")]
    pub course_reversal_window: Duration,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct DeliveryConfig {
    /// How far behind the vessel head a fix must be before it is handed downstream.
    #[serde(with = "humantime_serde")]
    pub confirmation_delay: Duration,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct WorkerConfig {
    pub count: usize,
    pub queue_size: usize,
}

impl Default for DuplicateConfig {
    fn default() -> Self {
        Self {
            window: Duration::from_secs(30),
            position_tolerance_nm: 0.5,
        }
    }
}

impl Default for PlausibilityConfig {
    fn default() -> Self {
        Self {
            max_speed_knots: 60.0,
            clock_skew_tolerance: Duration::from_secs(60),
        }
    }
}

impl Default for RetentionConfig {
    fn default() -> Self {
        Self {
            window: Duration::from_secs(24 * 60 * 60),
            max_fixes: 2_000,
            staleness_threshold: Duration::from_secs(12 * 60 * 60),
            eviction_interval: Duration::from_secs(60),
        }
    }
}

impl Default for ConfidenceConfig {
    fn default() -> Self {
        Self {
            single_source_ceiling: 0.6,
            dispute_cap: 0.3,
            lag_grace: Duration::from_secs(60),
            lag_horizon: Duration::from_secs(60 * 60),
            min_recency_factor: 0.8,
            missing_observed_at_factor: 0.75,
            rolling_alpha: 0.3,
        }
    }
}

impl Default for AnomalyConfig {
    fn default() -> Self {
        Self {
            silence_threshold: Duration::from_secs(6 * 60 * 60),
            course_reversal_degrees: 150.0,
            course_reversal_min_speed_knots: 5.0,
            course_reversal_window: Duration::from_secs(2 * 60),
        }
    }
}

impl Default for DeliveryConfig {
    fn default() -> Self {
        Self {
            confirmation_delay: Duration::from_secs(60),
        }
    }
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            count: 4,
            queue_size: 1_024,
        }
    }
}

impl ConfidenceConfig {
    /// Score for `n` independent agreeing sources, `1 - (1 - ceiling)^n`.
    pub fn source_score(&self, n: usize) -> f64 {
        if n == 0 {
            return 0.0;
        }
        1.0 - (1.0 - self.single_source_ceiling).powi(n as i32)
    }

    /// Lowest confidence a two-source agreeing fix can have.
    pub fn two_source_floor(&self) -> f64 {
        self.source_score(2) * self.missing_observed_at_factor
    }
}

impl FusionConfig {
    pub fn validate(&self) -> Result<()> {
        let c = &self.confidence;

        let check = |ok: bool, reason: &str| {
            if ok {
                Ok(())
            } else {
                InvalidConfigSnafu { reason }.fail()
            }
        };

        check(
            c.single_source_ceiling > 0.0 && c.single_source_ceiling < 1.0,
            "confidence.single_source_ceiling must be in (0, 1)",
        )?;
        check(
            c.dispute_cap > 0.0 && c.dispute_cap < c.single_source_ceiling,
            "confidence.dispute_cap must be in (0, single_source_ceiling)",
        )?;
        check(
            c.missing_observed_at_factor > 0.0
                && c.missing_observed_at_factor <= c.min_recency_factor
                && c.min_recency_factor <= 1.0,
            "confidence factors must satisfy 0 < missing_observed_at_factor <= min_recency_factor <= 1",
        )?;
        check(
            c.two_source_floor() >= c.single_source_ceiling,
            "two agreeing sources must never score below the single source ceiling",
        )?;
        check(
            c.lag_grace <= c.lag_horizon,
            "confidence.lag_grace must not exceed confidence.lag_horizon",
        )?;
        check(
            c.rolling_alpha > 0.0 && c.rolling_alpha <= 1.0,
            "confidence.rolling_alpha must be in (0, 1]",
        )?;
        check(
            self.duplicate.position_tolerance_nm >= 0.0,
            "duplicate.position_tolerance_nm must not be negative",
        )?;
        check(
            self.plausibility.max_speed_knots > 0.0,
            "plausibility.max_speed_knots must be positive",
        )?;
        check(
            self.retention.max_fixes > 0,
            "retention.max_fixes must be positive",
        )?;
        check(
            self.retention.window > self.duplicate.window,
            "retention.window must be longer than duplicate.window",
        )?;
        check(
            self.retention.window > self.delivery.confirmation_delay,
            "retention.window must be longer than delivery.confirmation_delay",
        )?;
        check(self.workers.count > 0, "workers.count must be positive")?;
        check(
            self.workers.queue_size > 0,
            "workers.queue_size must be positive",
        )?;

        Ok(())
    }

    pub fn duplicate_window(&self) -> chrono::Duration {
        to_chrono(self.duplicate.window)
    }

    pub fn retention_window(&self) -> chrono::Duration {
        to_chrono(self.retention.window)
    }

    pub fn staleness_threshold(&self) -> chrono::Duration {
        to_chrono(self.retention.staleness_threshold)
    }

    pub fn confirmation_delay(&self) -> chrono::Duration {
        to_chrono(self.delivery.confirmation_delay)
    }

    pub fn clock_skew_tolerance(&self) -> chrono::Duration {
        to_chrono(self.plausibility.clock_skew_tolerance)
    }
}

pub fn to_chrono(duration: Duration) -> chrono::Duration {
    chrono::Duration::from_std(duration).unwrap_or(chrono::Duration::MAX)
}

/// `time - window`, clamped to the earliest representable instant.
pub fn window_start(time: DateTime<Utc>, window: chrono::Duration) -> DateTime<Utc> {
    time.checked_sub_signed(window)
        .unwrap_or(DateTime::<Utc>::MIN_UTC)
}
