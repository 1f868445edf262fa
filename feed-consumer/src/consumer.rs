use std::{
    sync::{
        Arc,
        atomic::{AtomicBool, AtomicU64, Ordering},
    },
    time::Duration,
};

use chrono::{DateTime, Utc};
use fusion_core::SourceId;
use fusion_engine::FusionHandle;
use futures::StreamExt;
use snafu::ResultExt;
use tokio::io::AsyncRead;
use tokio_util::{
    codec::{FramedRead, LinesCodec, LinesCodecError},
    sync::CancellationToken,
};
use tracing::{error, instrument};

use crate::{
    error::{
        Result,
        error::{DispatchSnafu, ReadSnafu, StreamClosedSnafu},
    },
    models::NormalizedReport,
};

/// Reads newline delimited JSON reports from a single feed and hands them to the fusion pool.
pub struct Consumer {
    commit_interval: Duration,
    max_line_length: usize,
    counters: Arc<SourceCounters>,
}

/// Running totals for one source, shared between its consumer and the source manager.
#[derive(Debug, Default)]
pub struct SourceCounters {
    running: AtomicBool,
    received: AtomicU64,
    parse_errors: AtomicU64,
}

type Line = (DateTime<Utc>, std::result::Result<String, LinesCodecError>);

impl Consumer {
    pub fn new(
        commit_interval: Duration,
        max_line_length: usize,
        counters: Arc<SourceCounters>,
    ) -> Consumer {
        Consumer {
            commit_interval,
            max_line_length,
            counters,
        }
    }

    pub fn counters(&self) -> &Arc<SourceCounters> {
        &self.counters
    }

    /// Consumes `source` until it closes or `cancel` fires.
    ///
    /// Lines are stamped with their receive time as they arrive and forwarded in batches every
    /// commit interval. Cancellation flushes what has been read and returns `Ok`, the stream
    /// ending is reported as an error so the caller can reconnect.
    pub async fn run(
        &self,
        source_id: &SourceId,
        source: impl AsyncRead + Unpin,
        handle: &FusionHandle,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let codec = LinesCodec::new_with_max_length(self.max_line_length);
        let mut framed_read = FramedRead::new(source, codec);

        // Keeps its capacity between commits.
        let mut buffer: Vec<Line> = Vec::new();

        let mut interval = tokio::time::interval(self.commit_interval);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    self.process_lines(source_id, buffer.drain(..), handle).await?;
                    return Ok(());
                }
                line = framed_read.next() => {
                    match line {
                        Some(Err(LinesCodecError::Io(e))) => {
                            self.process_lines(source_id, buffer.drain(..), handle).await?;
                            return Err(e).context(ReadSnafu);
                        }
                        Some(line) => buffer.push((Utc::now(), line)),
                        None => {
                            self.process_lines(source_id, buffer.drain(..), handle).await?;
                            return StreamClosedSnafu.fail();
                        }
                    }
                }
                _ = interval.tick() => {
                    if !buffer.is_empty() {
                        self.process_lines(source_id, buffer.drain(..), handle).await?;
                    }
                }
            }
        }
    }

    #[instrument(skip(self, lines, handle), fields(app.num_messages))]
    async fn process_lines<T>(
        &self,
        source_id: &SourceId,
        lines: T,
        handle: &FusionHandle,
    ) -> Result<()>
    where
        T: IntoIterator<Item = Line>,
    {
        let mut num_messages = 0;

        for (received_at, line) in lines {
            num_messages += 1;
            match line.map(|l| serde_json::from_str::<NormalizedReport>(&l)) {
                Err(e) => {
                    self.counters.parse_errors.fetch_add(1, Ordering::Relaxed);
                    error!("failed to read line from '{source_id}': {e:?}");
                }
                Ok(Err(e)) => {
                    self.counters.parse_errors.fetch_add(1, Ordering::Relaxed);
                    error!("failed to parse report from '{source_id}': {e:?}");
                }
                Ok(Ok(report)) => {
                    self.counters.received.fetch_add(1, Ordering::Relaxed);
                    let report = report.into_position_report(source_id.clone(), received_at);
                    // Only fails once the pool has shut down.
                    handle.dispatch(report).await.context(DispatchSnafu)?;
                }
            }
        }

        tracing::Span::current().record("app.num_messages", num_messages);

        Ok(())
    }
}

impl SourceCounters {
    pub fn set_running(&self, running: bool) {
        self.running.store(running, Ordering::Relaxed);
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Relaxed)
    }

    pub fn received(&self) -> u64 {
        self.received.load(Ordering::Relaxed)
    }

    pub fn parse_errors(&self) -> u64 {
        self.parse_errors.load(Ordering::Relaxed)
    }
}
