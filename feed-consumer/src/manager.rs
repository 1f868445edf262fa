use std::{
    collections::{BTreeMap, HashMap},
    sync::{Arc, Mutex, MutexGuard, PoisonError},
};

use backon::{BackoffBuilder, ExponentialBackoff, ExponentialBuilder};
use fusion_core::SourceId;
use fusion_engine::FusionHandle;
use serde::Serialize;
use snafu::{OptionExt, ResultExt};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, instrument, warn};

use crate::{
    consumer::{Consumer, SourceCounters},
    error::{
        Error, Result,
        error::{JoinSnafu, SourceAlreadyRunningSnafu, UnknownSourceSnafu},
    },
    settings::{ConsumerSettings, ReconnectSettings},
    source::FeedSource,
};

/// Starts, stops and reports on feed consumers while the engine keeps running.
pub struct SourceManager {
    handle: FusionHandle,
    settings: ConsumerSettings,
    sources: Mutex<HashMap<SourceId, RunningSource>>,
}

struct RunningSource {
    cancel: CancellationToken,
    counters: Arc<SourceCounters>,
    task: JoinHandle<()>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SourceStats {
    pub running: bool,
    pub received: u64,
    pub parse_errors: u64,
    pub error_rate: f64,
}

impl SourceManager {
    pub fn new(handle: FusionHandle, settings: ConsumerSettings) -> Self {
        Self {
            handle,
            settings,
            sources: Mutex::new(HashMap::new()),
        }
    }

    /// Spawns a consumer for `source`. A source whose consumer has given up may be started
    /// again, one that is still running may not.
    pub fn start(&self, source: Arc<dyn FeedSource>) -> Result<()> {
        let source_id = source.source_id().clone();
        let mut sources = lock(&self.sources);

        if sources
            .get(&source_id)
            .is_some_and(|s| !s.task.is_finished())
        {
            return SourceAlreadyRunningSnafu { source_id }.fail();
        }

        let cancel = CancellationToken::new();
        let counters = Arc::new(SourceCounters::default());
        counters.set_running(true);

        let consumer = Consumer::new(
            self.settings.commit_interval,
            self.settings.max_line_length,
            counters.clone(),
        );

        let task = tokio::spawn(source_task(
            source,
            consumer,
            self.handle.clone(),
            self.settings.reconnect.clone(),
            cancel.clone(),
        ));

        info!("started source '{source_id}'");
        sources.insert(
            source_id,
            RunningSource {
                cancel,
                counters,
                task,
            },
        );

        Ok(())
    }

    /// Stops the consumer of `source_id` and waits until everything it read has been handed
    /// to the fusion engine. Other sources are unaffected.
    pub async fn stop(&self, source_id: &SourceId) -> Result<()> {
        let running = lock(&self.sources)
            .remove(source_id)
            .context(UnknownSourceSnafu {
                source_id: source_id.clone(),
            })?;

        running.cancel.cancel();
        running.task.await.context(JoinSnafu)?;

        info!("stopped source '{source_id}'");
        Ok(())
    }

    pub async fn stop_all(&self) -> Result<()> {
        let running: Vec<_> = lock(&self.sources).drain().map(|(_, s)| s).collect();

        for source in &running {
            source.cancel.cancel();
        }
        for source in running {
            source.task.await.context(JoinSnafu)?;
        }

        Ok(())
    }

    pub fn status(&self) -> BTreeMap<SourceId, SourceStats> {
        lock(&self.sources)
            .iter()
            .map(|(id, s)| (id.clone(), SourceStats::from(s.counters.as_ref())))
            .collect()
    }
}

impl From<&SourceCounters> for SourceStats {
    fn from(value: &SourceCounters) -> Self {
        let received = value.received();
        let parse_errors = value.parse_errors();

        Self {
            running: value.is_running(),
            received,
            parse_errors,
            error_rate: parse_errors as f64 / received.max(1) as f64,
        }
    }
}

#[instrument(skip_all, fields(source_id = %source.source_id()))]
async fn source_task(
    source: Arc<dyn FeedSource>,
    consumer: Consumer,
    handle: FusionHandle,
    reconnect: ReconnectSettings,
    cancel: CancellationToken,
) {
    let mut backoff = reconnect_backoff(&reconnect);

    loop {
        let err = match consume_once(source.as_ref(), &consumer, &handle, &cancel).await {
            Ok(()) => break,
            Err(e) => e,
        };

        if !err.is_reconnectable() {
            error!("source '{}' stopped: {err:?}", source.source_id());
            break;
        }

        // A connection that delivered data before failing starts a fresh backoff sequence.
        if matches!(err, Error::StreamClosed { .. } | Error::Read { .. }) {
            backoff = reconnect_backoff(&reconnect);
        }

        let Some(delay) = backoff.next() else {
            error!("giving up on source '{}': {err:?}", source.source_id());
            break;
        };

        warn!(
            "source '{}' failed, reconnecting in {delay:?}: {err:?}",
            source.source_id()
        );

        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = tokio::time::sleep(delay) => {}
        }
    }

    consumer.counters().set_running(false);
}

async fn consume_once(
    source: &dyn FeedSource,
    consumer: &Consumer,
    handle: &FusionHandle,
    cancel: &CancellationToken,
) -> Result<()> {
    let reader = tokio::select! {
        _ = cancel.cancelled() => return Ok(()),
        reader = source.connect() => reader?,
    };

    info!("connected to source '{}'", source.source_id());
    consumer
        .run(source.source_id(), reader, handle, cancel)
        .await
}

fn reconnect_backoff(settings: &ReconnectSettings) -> ExponentialBackoff {
    ExponentialBuilder::default()
        .with_min_delay(settings.min_delay)
        .with_max_delay(settings.max_delay)
        .with_max_times(settings.max_attempts.unwrap_or(usize::MAX))
        .with_jitter()
        .build()
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
