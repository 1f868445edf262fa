use std::{
    hash::{BuildHasher, RandomState},
    sync::Arc,
};

use fusion_core::{FusionOutcome, PositionReport, VesselKey};
use snafu::{OptionExt, ResultExt};
use tokio::{sync::oneshot, task::JoinSet};
use tracing::{error, instrument};

use crate::{
    FusionEngine, Result,
    error::error::{JoinSnafu, ReplyDroppedSnafu, WorkerClosedSnafu},
};

/// A fixed set of fusion workers.
///
/// Every vessel key hashes to exactly one worker, so reports for one vessel are processed in
/// the order they were enqueued while different vessels are fused in parallel.
pub struct FusionPool {
    handle: FusionHandle,
    workers: JoinSet<()>,
}

/// Cheaply cloneable entry point to a [`FusionPool`].
#[derive(Clone)]
pub struct FusionHandle {
    engine: Arc<FusionEngine>,
    queues: Arc<Vec<async_channel::Sender<Job>>>,
    hasher: RandomState,
}

struct Job {
    vessel_key: VesselKey,
    report: PositionReport,
    reply: Option<oneshot::Sender<FusionOutcome>>,
}

impl FusionPool {
    /// Spawns the workers on the current tokio runtime.
    pub fn new(engine: Arc<FusionEngine>) -> Self {
        let num_workers = engine.config().workers.count.max(1);
        let queue_size = engine.config().workers.queue_size.max(1);

        let mut workers = JoinSet::new();
        let mut queues = Vec::with_capacity(num_workers);

        for worker in 0..num_workers {
            let (sender, receiver) = async_channel::bounded(queue_size);
            workers.spawn(fusion_task(worker, receiver, engine.clone()));
            queues.push(sender);
        }

        Self {
            handle: FusionHandle {
                engine,
                queues: Arc::new(queues),
                hasher: RandomState::new(),
            },
            workers,
        }
    }

    pub fn handle(&self) -> FusionHandle {
        self.handle.clone()
    }

    pub fn engine(&self) -> &Arc<FusionEngine> {
        &self.handle.engine
    }

    /// Stops accepting reports, lets the workers drain their queues and waits for them.
    pub async fn shutdown(mut self) -> Result<()> {
        for queue in self.handle.queues.iter() {
            queue.close();
        }

        while let Some(res) = self.workers.join_next().await {
            res.context(JoinSnafu)?;
        }

        Ok(())
    }
}

impl FusionHandle {
    /// Fuses `report` and waits for the outcome.
    pub async fn submit(&self, report: PositionReport) -> Result<FusionOutcome> {
        let (sender, receiver) = oneshot::channel();
        let vessel_key = self.enqueue(report, Some(sender)).await?;

        receiver.await.ok().context(ReplyDroppedSnafu {
            vessel_key: vessel_key.to_string(),
        })
    }

    /// Enqueues `report` without waiting for it to be fused. Waits only while the worker's
    /// queue is full.
    pub async fn dispatch(&self, report: PositionReport) -> Result<()> {
        self.enqueue(report, None).await?;
        Ok(())
    }

    pub fn engine(&self) -> &Arc<FusionEngine> {
        &self.engine
    }

    pub fn num_workers(&self) -> usize {
        self.queues.len()
    }

    pub fn worker_for(&self, vessel_key: &VesselKey) -> usize {
        (self.hasher.hash_one(vessel_key) % self.queues.len() as u64) as usize
    }

    async fn enqueue(
        &self,
        report: PositionReport,
        reply: Option<oneshot::Sender<FusionOutcome>>,
    ) -> Result<VesselKey> {
        let vessel_key = self.engine.resolve(&report);
        let worker = self.worker_for(&vessel_key);

        let job = Job {
            vessel_key: vessel_key.clone(),
            report,
            reply,
        };

        if self.queues[worker].send(job).await.is_err() {
            return WorkerClosedSnafu { worker }.fail();
        }

        Ok(vessel_key)
    }
}

#[instrument(skip(receiver, engine))]
async fn fusion_task(
    worker: usize,
    receiver: async_channel::Receiver<Job>,
    engine: Arc<FusionEngine>,
) {
    while let Ok(job) = receiver.recv().await {
        let outcome = engine.ingest_resolved(job.vessel_key, job.report);
        if let Some(reply) = job.reply {
            if reply.send(outcome).is_err() {
                error!("submitter went away before the outcome was ready");
            }
        }
    }
}
