use serde::Serialize;

/// Data-quality counters kept by the fusion engine.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct FusionStats {
    pub accepted: u64,
    pub deduplicated: u64,
    pub rejected_invalid: u64,
    pub rejected_implausible: u64,
    pub rejected_stale: u64,
    pub disputes: u64,
    /// Changes that landed behind a vessel's delivery cursor.
    pub late_revisions: u64,
}

impl FusionStats {
    pub fn rejected(&self) -> u64 {
        self.rejected_invalid + self.rejected_implausible + self.rejected_stale
    }

    pub fn total(&self) -> u64 {
        self.accepted + self.deduplicated + self.rejected()
    }
}
