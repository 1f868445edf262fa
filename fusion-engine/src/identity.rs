use std::{
    collections::HashMap,
    sync::{PoisonError, RwLock},
};

use fusion_core::{Mmsi, SourceId, VesselKey};
use tracing::debug;

/// Maps raw vessel identifiers to stable [`VesselKey`]s.
///
/// Resolution never fails. Ids that are not a genuine 9-digit MMSI get a synthetic key made
/// from the reporting source and the raw id, so the same malformed id from the same source
/// always lands on the same vessel.
#[derive(Debug, Default)]
pub struct IdentityResolver {
    table: RwLock<HashMap<(SourceId, String), VesselKey>>,
}

impl IdentityResolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn resolve(&self, raw_id: &str, source_id: &SourceId) -> VesselKey {
        let raw = raw_id.trim();
        if raw.is_empty() {
            return synthetic(source_id, raw);
        }

        if let Some(key) = self.lookup(raw, source_id) {
            return key;
        }

        let key = match raw.parse::<Mmsi>() {
            Ok(mmsi) => VesselKey::Mmsi(mmsi),
            Err(e) => {
                debug!("assigning synthetic key, source: '{source_id}', err: {e}");
                synthetic(source_id, raw)
            }
        };

        self.table
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .entry((source_id.clone(), raw.to_owned()))
            .or_insert(key)
            .clone()
    }

    pub fn lookup(&self, raw_id: &str, source_id: &SourceId) -> Option<VesselKey> {
        self.table
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&(source_id.clone(), raw_id.trim().to_owned()))
            .cloned()
    }

    /// Drops mappings whose key no longer passes `keep`, used after eviction so the table
    /// does not outgrow the set of tracked vessels.
    pub fn retain_keys<F>(&self, mut keep: F) -> usize
    where
        F: FnMut(&VesselKey) -> bool,
    {
        let mut table = self.table.write().unwrap_or_else(PoisonError::into_inner);
        let before = table.len();
        table.retain(|_, key| keep(key));
        before - table.len()
    }

    pub fn len(&self) -> usize {
        self.table.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn synthetic(source_id: &SourceId, raw: &str) -> VesselKey {
    VesselKey::Synthetic {
        source: source_id.clone(),
        raw: raw.to_owned(),
    }
}
