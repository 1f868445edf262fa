use std::{
    collections::{BTreeSet, HashMap},
    sync::{
        Arc, Mutex, MutexGuard, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard,
        TryLockError,
    },
};

use chrono::{DateTime, Utc};
use fusion_core::{
    AnomalyFlag, FixSink, FixUpdate, FusedFix, FusionConfig, PositionReport, TrajectoryQuery,
    VesselKey, VesselState, window_start,
};
use itertools::Itertools;
use tracing::debug;

use crate::AnomalyDetector;

/// Per-vessel trajectories and state.
///
/// Each vessel has its own write lock, so writers to different vessels never contend.
/// Readers clone an `Arc` of the last committed track and never observe a half applied
/// update. Fixes that fall `confirmation_delay` behind the vessel head are handed to the
/// [`FixSink`] in timestamp order while the vessel's write lock is held. Changes at or behind
/// what has already been delivered follow as revision updates.
pub struct TrajectoryStore {
    vessels: RwLock<HashMap<VesselKey, Arc<VesselSlot>>>,
    detector: AnomalyDetector,
    retention_window: chrono::Duration,
    max_fixes: usize,
    staleness_threshold: chrono::Duration,
    confirmation_delay: chrono::Duration,
    sink: Arc<dyn FixSink>,
}

#[derive(Default)]
struct VesselSlot {
    /// Write lock of the vessel, `true` once the slot has been evicted.
    evicted: Mutex<bool>,
    current: RwLock<Option<Arc<VesselTrack>>>,
}

#[derive(Debug, Clone)]
struct VesselTrack {
    entries: Arc<Vec<FixUpdate>>,
    state: VesselState,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CommitSummary {
    /// Fixes handed to the sink by this write.
    pub delivered: usize,
    /// Revision updates handed to the sink by this write.
    pub revised: usize,
    /// Changes that landed at or behind the delivery cursor.
    pub late_revisions: u64,
}

/// Exclusive, uncommitted view of one vessel handed out by [`TrajectoryStore::write`].
pub struct VesselWriter<'a> {
    vessel_key: &'a VesselKey,
    detector: &'a AnomalyDetector,
    track: Option<VesselTrack>,
    late_revisions: u64,
    revised: BTreeSet<DateTime<Utc>>,
}

impl TrajectoryStore {
    pub fn new(config: &FusionConfig, sink: Arc<dyn FixSink>) -> Self {
        Self {
            vessels: RwLock::new(HashMap::new()),
            detector: AnomalyDetector::new(config),
            retention_window: config.retention_window(),
            max_fixes: config.retention.max_fixes,
            staleness_threshold: config.staleness_threshold(),
            confirmation_delay: config.confirmation_delay(),
            sink,
        }
    }

    /// Runs `f` with exclusive access to the vessel and commits the result.
    ///
    /// A writer that loses a race against eviction of the same vessel starts over on a
    /// fresh slot.
    pub fn write<T, F>(&self, vessel_key: &VesselKey, f: F) -> (T, CommitSummary)
    where
        F: FnOnce(&mut VesselWriter<'_>) -> T,
    {
        loop {
            let slot = self.slot(vessel_key);
            let mut evicted = lock(&slot.evicted);
            if *evicted {
                continue;
            }

            let mut writer = VesselWriter {
                vessel_key,
                detector: &self.detector,
                track: read(&slot.current).as_deref().cloned(),
                late_revisions: 0,
                revised: BTreeSet::new(),
            };

            let value = f(&mut writer);
            let summary = self.commit(vessel_key, &slot, &mut evicted, writer);
            return (value, summary);
        }
    }

    pub fn append_or_replace(&self, fix: FusedFix) -> CommitSummary {
        let vessel_key = fix.vessel_key.clone();
        let ((), summary) = self.write(&vessel_key, |w| {
            w.append_or_replace(fix);
        });
        summary
    }

    pub fn snapshot(&self, vessel_key: &VesselKey) -> Vec<FusedFix> {
        self.track(vessel_key)
            .map(|t| t.entries.iter().map(|e| e.fix.clone()).collect())
            .unwrap_or_default()
    }

    pub fn updates(&self, vessel_key: &VesselKey) -> Vec<FixUpdate> {
        self.track(vessel_key)
            .map(|t| t.entries.to_vec())
            .unwrap_or_default()
    }

    pub fn state(&self, vessel_key: &VesselKey) -> Option<VesselState> {
        self.track(vessel_key).map(|t| t.state.clone())
    }

    pub fn list_active_vessels(&self, since: DateTime<Utc>) -> Vec<VesselKey> {
        self.slots()
            .into_iter()
            .filter_map(|(key, slot)| {
                read(&slot.current)
                    .as_ref()
                    .is_some_and(|t| t.state.latest_event_time >= since)
                    .then_some(key)
            })
            .sorted()
            .collect()
    }

    pub fn contains(&self, vessel_key: &VesselKey) -> bool {
        self.track(vessel_key).is_some()
    }

    pub fn len(&self) -> usize {
        self.slots()
            .iter()
            .filter(|(_, slot)| read(&slot.current).is_some())
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Removes every vessel whose latest accepted report is older than the staleness
    /// threshold, flushing undelivered fixes to the sink first. Vessels that are being
    /// written to are skipped until the next pass.
    pub fn evict_stale(&self, now: DateTime<Utc>) -> usize {
        let mut num_evicted = 0;

        for (vessel_key, slot) in self.slots() {
            let mut evicted = match slot.evicted.try_lock() {
                Ok(guard) => guard,
                Err(TryLockError::Poisoned(e)) => e.into_inner(),
                Err(TryLockError::WouldBlock) => continue,
            };
            if *evicted {
                continue;
            }

            let current = read(&slot.current).clone();
            if current
                .as_ref()
                .is_some_and(|t| !t.state.is_stale(now, self.staleness_threshold))
            {
                continue;
            }

            *evicted = true;
            self.remove_slot(&vessel_key, &slot);

            if let Some(track) = current {
                let pending = track.pending();
                debug!(
                    "evicting vessel '{vessel_key}', last event: '{}', flushing {} fixes",
                    track.state.latest_event_time,
                    pending.len()
                );
                for update in pending {
                    self.sink.deliver(update);
                }
                num_evicted += 1;
            }
        }

        num_evicted
    }

    fn commit(
        &self,
        vessel_key: &VesselKey,
        slot: &Arc<VesselSlot>,
        evicted: &mut bool,
        writer: VesselWriter<'_>,
    ) -> CommitSummary {
        let mut summary = CommitSummary {
            late_revisions: writer.late_revisions,
            ..Default::default()
        };

        let Some(mut track) = writer.track else {
            // Nothing was ever stored for this vessel, don't leave an empty slot behind.
            *evicted = true;
            self.remove_slot(vessel_key, slot);
            return summary;
        };

        let outbound = self.trim_and_confirm(&mut track);
        let revisions = track.revisions(&writer.revised);
        summary.delivered = outbound.len();
        summary.revised = revisions.len();

        track.state.last_fix = track.entries.last().map(|e| e.fix.clone());
        track.state.anomalies = track
            .entries
            .iter()
            .flat_map(|e| e.anomalies.iter().copied())
            .collect();

        *write(&slot.current) = Some(Arc::new(track));

        for update in revisions.into_iter().chain(outbound) {
            self.sink.deliver(update);
        }

        summary
    }

    /// Applies the retention bounds and advances the delivery cursor. Returns what should be
    /// handed to the sink, in timestamp order.
    fn trim_and_confirm(&self, track: &mut VesselTrack) -> Vec<FixUpdate> {
        let Some(head) = track.entries.last().map(|e| e.fix.timestamp) else {
            return vec![];
        };

        let cursor = track.state.delivered_until;
        let is_pending = |t: DateTime<Utc>| cursor.is_none_or(|c| t > c);

        let horizon = window_start(head, self.retention_window);
        let num_dropped = track
            .entries
            .partition_point(|e| e.fix.timestamp < horizon)
            .max(track.entries.len().saturating_sub(self.max_fixes));

        let mut outbound = Vec::new();
        if num_dropped > 0 {
            outbound.extend(
                Arc::make_mut(&mut track.entries)
                    .drain(..num_dropped)
                    .filter(|e| is_pending(e.fix.timestamp)),
            );
        }

        let confirmed_until = window_start(head, self.confirmation_delay);
        outbound.extend(
            track
                .entries
                .iter()
                .filter(|e| is_pending(e.fix.timestamp) && e.fix.timestamp <= confirmed_until)
                .cloned(),
        );

        if let Some(last) = outbound.last() {
            track.state.delivered_until = Some(last.fix.timestamp);
        }

        outbound
    }

    fn slot(&self, vessel_key: &VesselKey) -> Arc<VesselSlot> {
        if let Some(slot) = read(&self.vessels).get(vessel_key) {
            return slot.clone();
        }
        write(&self.vessels)
            .entry(vessel_key.clone())
            .or_default()
            .clone()
    }

    fn slots(&self) -> Vec<(VesselKey, Arc<VesselSlot>)> {
        read(&self.vessels)
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }

    fn remove_slot(&self, vessel_key: &VesselKey, slot: &Arc<VesselSlot>) {
        let mut vessels = write(&self.vessels);
        if vessels
            .get(vessel_key)
            .is_some_and(|current| Arc::ptr_eq(current, slot))
        {
            vessels.remove(vessel_key);
        }
    }

    fn track(&self, vessel_key: &VesselKey) -> Option<Arc<VesselTrack>> {
        let slot = read(&self.vessels).get(vessel_key).cloned()?;
        read(&slot.current).clone()
    }
}

impl TrajectoryQuery for TrajectoryStore {
    fn snapshot(&self, vessel_key: &VesselKey) -> Vec<FusedFix> {
        TrajectoryStore::snapshot(self, vessel_key)
    }

    fn vessel_state(&self, vessel_key: &VesselKey) -> Option<VesselState> {
        self.state(vessel_key)
    }

    fn list_active_vessels(&self, since: DateTime<Utc>) -> Vec<VesselKey> {
        TrajectoryStore::list_active_vessels(self, since)
    }
}

impl VesselTrack {
    /// Current value of every fix at one of the `revised` timestamps.
    fn revisions(&self, revised: &BTreeSet<DateTime<Utc>>) -> Vec<FixUpdate> {
        if revised.is_empty() {
            return vec![];
        }

        self.entries
            .iter()
            .filter(|e| revised.contains(&e.fix.timestamp))
            .map(|e| FixUpdate {
                revision: true,
                ..e.clone()
            })
            .collect()
    }

    fn pending(&self) -> Vec<FixUpdate> {
        let cursor = self.state.delivered_until;
        self.entries
            .iter()
            .filter(|e| cursor.is_none_or(|c| e.fix.timestamp > c))
            .cloned()
            .collect()
    }
}

impl VesselWriter<'_> {
    pub fn vessel_key(&self) -> &VesselKey {
        self.vessel_key
    }

    pub fn entries(&self) -> &[FixUpdate] {
        self.track
            .as_ref()
            .map(|t| t.entries.as_slice())
            .unwrap_or_default()
    }

    pub fn state(&self) -> Option<&VesselState> {
        self.track.as_ref().map(|t| &t.state)
    }

    /// Timestamp of the newest fix.
    pub fn head(&self) -> Option<DateTime<Utc>> {
        self.entries().last().map(|e| e.fix.timestamp)
    }

    /// Inserts after any fixes with an equal timestamp and returns the position.
    pub fn insert(&mut self, fix: FusedFix) -> usize {
        let timestamp = fix.timestamp;
        self.note_revision(timestamp);

        let idx = self.entries().partition_point(|e| e.fix.timestamp <= timestamp);
        let anomalies = self.observe_at(idx, &fix);

        let vessel_key = self.vessel_key;
        let track = self.track.get_or_insert_with(|| VesselTrack {
            entries: Arc::default(),
            state: VesselState::new(vessel_key.clone(), timestamp),
        });
        let update = FixUpdate {
            fix,
            anomalies,
            revision: false,
        };
        Arc::make_mut(&mut track.entries).insert(idx, update);
        track.state.latest_event_time = track.state.latest_event_time.max(timestamp);

        self.annotate(idx + 1);
        idx
    }

    /// Swaps the fix at `idx` for a new value with the same timestamp.
    pub fn replace(&mut self, idx: usize, fix: FusedFix) {
        let Some(timestamp) = self.entries().get(idx).map(|e| e.fix.timestamp) else {
            return;
        };
        self.note_revision(timestamp);

        let anomalies = self.observe_at(idx, &fix);
        if let Some(entry) = self.entries_mut().and_then(|e| e.get_mut(idx)) {
            *entry = FixUpdate {
                fix,
                anomalies,
                revision: false,
            };
        }

        self.annotate(idx + 1);
    }

    /// Replaces a fix with an equal timestamp that shares a contributing source, otherwise
    /// inserts in order.
    pub fn append_or_replace(&mut self, fix: FusedFix) -> usize {
        let existing = self
            .entries()
            .iter()
            .rposition(|e| e.fix.timestamp == fix.timestamp && e.fix.shares_source_with(&fix));

        match existing {
            Some(idx) => {
                self.replace(idx, fix);
                idx
            }
            None => self.insert(fix),
        }
    }

    pub fn record_report(&mut self, report: &PositionReport) {
        let Some(track) = self.track.as_mut() else {
            return;
        };
        let state = &mut track.state;

        state.latest_event_time = state.latest_event_time.max(report.event_time());
        state
            .last_seen_by_source
            .entry(report.source_id.clone())
            .and_modify(|t| *t = (*t).max(report.received_at))
            .or_insert(report.received_at);
    }

    /// Folds `confidence` into the vessel's exponentially weighted rolling confidence.
    pub fn record_confidence(&mut self, confidence: f64, alpha: f64) {
        let Some(track) = self.track.as_mut() else {
            return;
        };
        let state = &mut track.state;

        state.rolling_confidence = if state.last_fix.is_none() {
            confidence
        } else {
            alpha * confidence + (1.0 - alpha) * state.rolling_confidence
        };
    }

    pub fn record_dispute(&mut self) {
        if let Some(track) = self.track.as_mut() {
            track.state.disputes += 1;
        }
    }

    fn entries_mut(&mut self) -> Option<&mut Vec<FixUpdate>> {
        self.track.as_mut().map(|t| Arc::make_mut(&mut t.entries))
    }

    fn observe_at(&self, idx: usize, fix: &FusedFix) -> BTreeSet<AnomalyFlag> {
        let previous = idx
            .checked_sub(1)
            .and_then(|i| self.entries().get(i))
            .map(|e| &e.fix);
        self.detector.observe(previous, fix)
    }

    /// Recomputes the flags of the fix at `idx` after its predecessor changed.
    fn annotate(&mut self, idx: usize) {
        let Some(current) = self.entries().get(idx) else {
            return;
        };
        let anomalies = self.observe_at(idx, &current.fix);
        if anomalies == current.anomalies {
            return;
        }

        let timestamp = current.fix.timestamp;
        self.note_revision(timestamp);
        if let Some(entry) = self.entries_mut().and_then(|e| e.get_mut(idx)) {
            entry.anomalies = anomalies;
        }
    }

    fn note_revision(&mut self, timestamp: DateTime<Utc>) {
        let behind_cursor = self
            .state()
            .and_then(|s| s.delivered_until)
            .is_some_and(|cursor| timestamp <= cursor);

        if behind_cursor {
            self.late_revisions += 1;
            self.revised.insert(timestamp);
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

fn read<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(PoisonError::into_inner)
}

fn write<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(PoisonError::into_inner)
}
