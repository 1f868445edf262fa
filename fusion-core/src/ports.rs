use chrono::{DateTime, Utc};
use tracing::error;

use crate::{FixUpdate, FusedFix, VesselKey, VesselState};

/// Downstream consumer of confirmed fixes (forecasting, persistence).
///
/// Delivery is at-least-once, implementations must treat `(vessel_key, timestamp)` as the
/// idempotency key. `deliver` is called while the vessel's write lock is held so it must not
/// block.
pub trait FixSink: Send + Sync {
    fn deliver(&self, update: FixUpdate);
}

/// Read side of the trajectory store, consumed by an external query layer.
pub trait TrajectoryQuery: Send + Sync {
    fn snapshot(&self, vessel_key: &VesselKey) -> Vec<FusedFix>;
    fn vessel_state(&self, vessel_key: &VesselKey) -> Option<VesselState>;
    fn list_active_vessels(&self, since: DateTime<Utc>) -> Vec<VesselKey>;
}

/// Never waits for the receiver, a full bounded channel drops the update. Use an unbounded
/// channel unless losing fixes is acceptable.
impl FixSink for async_channel::Sender<FixUpdate> {
    fn deliver(&self, update: FixUpdate) {
        if let Err(e) = self.try_send(update) {
            let update = e.into_inner();
            error!(
                "failed to deliver fix for vessel '{}' at '{}', sink is full or closed",
                update.fix.vessel_key, update.fix.timestamp
            );
        }
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct DiscardSink;

impl FixSink for DiscardSink {
    fn deliver(&self, _update: FixUpdate) {}
}
