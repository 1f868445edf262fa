use std::{sync::Arc, time::Duration};

use chrono::{DateTime, Utc};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument};

use crate::FusionEngine;

/// Periodically removes vessels that have gone silent, independently of ingestion.
pub struct Evictor {
    engine: Arc<FusionEngine>,
    interval: Duration,
}

impl Evictor {
    pub fn new(engine: Arc<FusionEngine>) -> Self {
        let interval = engine.config().retention.eviction_interval;
        Self { engine, interval }
    }

    pub async fn run(self, cancel: CancellationToken) {
        let mut interval = tokio::time::interval(self.interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = interval.tick() => {
                    self.run_single(Utc::now());
                }
            }
        }
    }

    #[instrument(skip(self))]
    pub fn run_single(&self, now: DateTime<Utc>) -> usize {
        let num_evicted = self.engine.evict_stale(now);
        if num_evicted > 0 {
            info!(
                "evicted {num_evicted} stale vessels, {} remaining",
                self.engine.num_vessels()
            );
        }
        num_evicted
    }
}
