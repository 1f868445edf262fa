use std::sync::{
    Arc,
    atomic::{AtomicU64, Ordering},
};

use chrono::{DateTime, Utc};
use fusion_core::{
    FixSink, FixUpdate, FusedFix, FusionConfig, FusionOutcome, FusionStats, PositionReport,
    RejectCategory, RejectReason, VesselKey, VesselState, distance_nautical_miles,
    estimated_speed_between_points, window_start,
};
use snafu::ResultExt;
use tracing::{debug, info};

use crate::{
    CommitSummary, ConfidenceScorer, IdentityResolver, Result, TrajectoryStore, VesselWriter,
    error::error::ConfigSnafu,
};

/// Turns position reports into fused trajectories.
///
/// `ingest` may be called concurrently from any number of tasks. Reports for the same vessel
/// are serialized by the store's per-vessel write lock, reports for different vessels fuse
/// in parallel.
pub struct FusionEngine {
    config: FusionConfig,
    identity: IdentityResolver,
    scorer: ConfidenceScorer,
    store: TrajectoryStore,
    counters: Counters,
    duplicate_window: chrono::Duration,
    retention_window: chrono::Duration,
    clock_skew_tolerance: chrono::Duration,
}

#[derive(Debug, Default)]
struct Counters {
    accepted: AtomicU64,
    deduplicated: AtomicU64,
    rejected_invalid: AtomicU64,
    rejected_implausible: AtomicU64,
    rejected_stale: AtomicU64,
    disputes: AtomicU64,
    late_revisions: AtomicU64,
}

impl FusionEngine {
    pub fn new(config: FusionConfig, sink: Arc<dyn FixSink>) -> Result<Self> {
        config.validate().context(ConfigSnafu)?;

        Ok(Self {
            identity: IdentityResolver::new(),
            scorer: ConfidenceScorer::new(config.confidence.clone()),
            store: TrajectoryStore::new(&config, sink),
            counters: Counters::default(),
            duplicate_window: config.duplicate_window(),
            retention_window: config.retention_window(),
            clock_skew_tolerance: config.clock_skew_tolerance(),
            config,
        })
    }

    pub fn config(&self) -> &FusionConfig {
        &self.config
    }

    pub fn identity(&self) -> &IdentityResolver {
        &self.identity
    }

    pub fn resolve(&self, report: &PositionReport) -> VesselKey {
        self.identity.resolve(&report.vessel_raw_id, &report.source_id)
    }

    pub fn ingest(&self, report: PositionReport) -> FusionOutcome {
        let vessel_key = self.resolve(&report);
        self.ingest_resolved(vessel_key, report)
    }

    /// Ingests a report whose vessel key has already been resolved.
    pub fn ingest_resolved(&self, vessel_key: VesselKey, report: PositionReport) -> FusionOutcome {
        let outcome = match self.validate(&report) {
            Err(reason) => FusionOutcome::Rejected(reason),
            Ok(()) => {
                let (outcome, summary) = self.store.write(&vessel_key, |w| self.fuse(w, &report));
                self.record_summary(summary);
                outcome
            }
        };

        self.record_outcome(&vessel_key, &report, &outcome);
        outcome
    }

    pub fn snapshot(&self, vessel_key: &VesselKey) -> Vec<FusedFix> {
        self.store.snapshot(vessel_key)
    }

    /// Fixes together with their anomaly flags.
    pub fn updates(&self, vessel_key: &VesselKey) -> Vec<FixUpdate> {
        self.store.updates(vessel_key)
    }

    pub fn state(&self, vessel_key: &VesselKey) -> Option<VesselState> {
        self.store.state(vessel_key)
    }

    pub fn list_active_vessels(&self, since: DateTime<Utc>) -> Vec<VesselKey> {
        self.store.list_active_vessels(since)
    }

    pub fn num_vessels(&self) -> usize {
        self.store.len()
    }

    pub fn store(&self) -> &TrajectoryStore {
        &self.store
    }

    pub fn evict_stale(&self, now: DateTime<Utc>) -> usize {
        let num_evicted = self.store.evict_stale(now);
        if num_evicted > 0 {
            self.identity.retain_keys(|k| self.store.contains(k));
        }
        num_evicted
    }

    pub fn stats(&self) -> FusionStats {
        let c = &self.counters;
        FusionStats {
            accepted: c.accepted.load(Ordering::Relaxed),
            deduplicated: c.deduplicated.load(Ordering::Relaxed),
            rejected_invalid: c.rejected_invalid.load(Ordering::Relaxed),
            rejected_implausible: c.rejected_implausible.load(Ordering::Relaxed),
            rejected_stale: c.rejected_stale.load(Ordering::Relaxed),
            disputes: c.disputes.load(Ordering::Relaxed),
            late_revisions: c.late_revisions.load(Ordering::Relaxed),
        }
    }

    fn validate(&self, report: &PositionReport) -> std::result::Result<(), RejectReason> {
        if report.vessel_raw_id.trim().is_empty() {
            return Err(RejectReason::MissingIdentifier);
        }

        let (latitude, longitude) = (report.latitude, report.longitude);
        if !(-90.0..=90.0).contains(&latitude) || !(-180.0..=180.0).contains(&longitude) {
            return Err(RejectReason::InvalidCoordinates {
                latitude,
                longitude,
            });
        }

        if let Some(speed) = report
            .speed_over_ground
            .filter(|v| !v.is_finite() || *v < 0.0)
        {
            return Err(RejectReason::InvalidSpeed(speed));
        }

        if let Some(course) = report
            .course_over_ground
            .filter(|v| !(0.0..360.0).contains(v))
        {
            return Err(RejectReason::InvalidCourse(course));
        }

        if let Some(observed_at) = report
            .observed_at
            .filter(|o| *o - report.received_at > self.clock_skew_tolerance)
        {
            return Err(RejectReason::FutureObservation { observed_at });
        }

        Ok(())
    }

    fn fuse(&self, w: &mut VesselWriter<'_>, report: &PositionReport) -> FusionOutcome {
        let event_time = report.event_time();

        if w
            .head()
            .is_some_and(|head| event_time < window_start(head, self.retention_window))
        {
            return FusionOutcome::Rejected(RejectReason::Stale {
                observed_at: event_time,
            });
        }

        let window = self.duplicate_window;
        let entries = w.entries();
        let start = entries.partition_point(|e| event_time - e.fix.timestamp > window);
        let end = entries.partition_point(|e| e.fix.timestamp - event_time <= window);

        let tolerance = self.config.duplicate.position_tolerance_nm;
        let nearest = entries[start..end]
            .iter()
            .enumerate()
            .map(|(i, e)| (start + i, distance_nautical_miles(&e.fix, report)))
            .filter(|(_, distance)| *distance <= tolerance)
            .min_by(|a, b| a.1.total_cmp(&b.1))
            .map(|(idx, _)| idx);

        // A report that agrees with a fix in the window is measured against the fixes around
        // the window only, anything else against its closest neighbours.
        let implausible = match nearest {
            Some(_) => self.implausible_speed(&entries[..start], &entries[end..], report),
            None => {
                let before = entries.partition_point(|e| e.fix.timestamp < event_time);
                let after = entries.partition_point(|e| e.fix.timestamp <= event_time);
                self.implausible_speed(&entries[..before], &entries[after..], report)
            }
        };
        if let Some(knots) = implausible {
            return FusionOutcome::Rejected(RejectReason::ImplausibleMotion { knots });
        }

        let alpha = self.config.confidence.rolling_alpha;

        match nearest {
            Some(idx) => {
                let existing = &w.entries()[idx].fix;
                if existing.has_source(&report.source_id) {
                    w.record_report(report);
                    return FusionOutcome::Deduplicated { updated: None };
                }

                let merged = self.scorer.corroborate(existing, report);
                w.replace(idx, merged.clone());
                w.record_report(report);
                w.record_confidence(merged.confidence, alpha);

                FusionOutcome::Deduplicated {
                    updated: Some(merged),
                }
            }
            None if start < end => {
                let conflicting: Vec<(usize, FusedFix)> = w.entries()[start..end]
                    .iter()
                    .enumerate()
                    .filter(|(_, e)| !e.fix.disputed)
                    .map(|(i, e)| (start + i, self.scorer.dispute(&e.fix)))
                    .collect();

                for (idx, fix) in conflicting {
                    w.replace(idx, fix);
                }

                let fix = self
                    .scorer
                    .dispute(&self.scorer.initial(w.vessel_key().clone(), report));
                w.insert(fix.clone());
                w.record_report(report);
                w.record_dispute();
                w.record_confidence(fix.confidence, alpha);

                self.counters.disputes.fetch_add(1, Ordering::Relaxed);
                info!(
                    "position dispute for vessel '{}' at '{event_time}', source: '{}', conflicting fixes: {}",
                    w.vessel_key(),
                    report.source_id,
                    end - start,
                );

                FusionOutcome::Accepted(fix)
            }
            None => {
                let fix = self.scorer.initial(w.vessel_key().clone(), report);
                w.insert(fix.clone());
                w.record_report(report);
                w.record_confidence(fix.confidence, alpha);

                FusionOutcome::Accepted(fix)
            }
        }
    }

    /// Highest implied speed above the plausibility ceiling between the report and its
    /// reference fixes in `before` and `after`.
    fn implausible_speed(
        &self,
        before: &[FixUpdate],
        after: &[FixUpdate],
        report: &PositionReport,
    ) -> Option<f64> {
        let previous = reference_speed(before.iter().rev(), report);
        let next = reference_speed(after.iter(), report);

        previous
            .into_iter()
            .chain(next)
            .filter(|knots| *knots > self.config.plausibility.max_speed_knots)
            .max_by(f64::total_cmp)
    }

    fn record_summary(&self, summary: CommitSummary) {
        if summary.late_revisions > 0 {
            self.counters
                .late_revisions
                .fetch_add(summary.late_revisions, Ordering::Relaxed);
        }
    }

    fn record_outcome(
        &self,
        vessel_key: &VesselKey,
        report: &PositionReport,
        outcome: &FusionOutcome,
    ) {
        let c = &self.counters;
        let counter = match outcome {
            FusionOutcome::Accepted(_) => &c.accepted,
            FusionOutcome::Deduplicated { .. } => &c.deduplicated,
            FusionOutcome::Rejected(reason) => {
                debug!(
                    "rejected report for vessel '{vessel_key}', source: '{}', category: '{}', reason: {reason}",
                    report.source_id,
                    reason.category().as_ref(),
                );
                match reason.category() {
                    RejectCategory::InvalidReport => &c.rejected_invalid,
                    RejectCategory::ImplausibleMotion => &c.rejected_implausible,
                    RejectCategory::StaleReport => &c.rejected_stale,
                }
            }
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }
}

/// Implied speed from the closest undisputed fix in `closest_first`.
///
/// Without one, the disputed fixes sharing the closest timestamp are competing positions of
/// the same instant and the report only has to be reachable from one of them.
fn reference_speed<'a, I>(closest_first: I, report: &PositionReport) -> Option<f64>
where
    I: Iterator<Item = &'a FixUpdate> + Clone,
{
    let speed = |e: &FixUpdate| estimated_speed_between_points(&e.fix, report);

    if let Some(undisputed) = closest_first.clone().find(|e| !e.fix.disputed) {
        return speed(undisputed);
    }

    let mut disputed = closest_first.peekable();
    let timestamp = disputed.peek()?.fix.timestamp;
    disputed
        .take_while(|e| e.fix.timestamp == timestamp)
        .filter_map(speed)
        .min_by(f64::total_cmp)
}
