use std::sync::Arc;

use async_channel::Receiver;
use fusion_core::FixUpdate;
use fusion_engine::{Evictor, FusionEngine, FusionPool};
use snafu::ResultExt;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, instrument};

use crate::{
    error::{
        Result,
        error::{EngineSnafu, JoinSnafu, SerializeSnafu, WriteSnafu},
    },
    manager::SourceManager,
    settings::{Settings, SourceSettings},
    source::TcpFeed,
};

pub struct App {
    pool: FusionPool,
    manager: SourceManager,
    outbound: Receiver<FixUpdate>,
    sources: Vec<SourceSettings>,
}

impl App {
    pub async fn build(settings: Settings) -> Result<App> {
        // The engine delivers under the vessel lock and can't wait for the writer.
        let (sender, outbound) = async_channel::unbounded();

        let engine = FusionEngine::new(settings.fusion, Arc::new(sender)).context(EngineSnafu)?;
        let pool = FusionPool::new(Arc::new(engine));
        let manager = SourceManager::new(pool.handle(), settings.consumer);

        Ok(App {
            pool,
            manager,
            outbound,
            sources: settings.sources,
        })
    }

    /// Runs until ctrl-c, then stops every source and drains the engine before returning.
    pub async fn run(self) -> Result<()> {
        for source in &self.sources {
            self.manager.start(Arc::new(TcpFeed::new(
                source.id.clone(),
                source.address.clone(),
            )))?;
        }

        let cancel = CancellationToken::new();
        let evictor = tokio::spawn(Evictor::new(self.engine().clone()).run(cancel.clone()));
        let writer = tokio::spawn(write_updates(self.outbound.clone(), tokio::io::stdout()));

        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("failed to listen for shutdown signal: {e:?}");
        }
        info!("shutting down");

        cancel.cancel();
        evictor.await.context(JoinSnafu)?;
        self.shutdown().await?;
        writer.await.context(JoinSnafu)?
    }

    /// Stops all sources, lets the fusion workers drain and closes the outbound channel.
    /// Updates already in the channel can still be received.
    pub async fn shutdown(self) -> Result<()> {
        self.manager.stop_all().await?;
        self.pool.shutdown().await.context(EngineSnafu)?;
        self.outbound.close();
        Ok(())
    }

    pub fn engine(&self) -> &Arc<FusionEngine> {
        self.pool.engine()
    }

    pub fn manager(&self) -> &SourceManager {
        &self.manager
    }

    pub fn outbound(&self) -> &Receiver<FixUpdate> {
        &self.outbound
    }
}

/// Writes every confirmed fix as a JSON line until the outbound channel closes.
#[instrument(skip_all)]
pub async fn write_updates(
    updates: Receiver<FixUpdate>,
    mut out: impl AsyncWrite + Unpin,
) -> Result<()> {
    while let Ok(update) = updates.recv().await {
        let mut line = serde_json::to_vec(&update).context(SerializeSnafu)?;
        line.push(b'\n');
        out.write_all(&line).await.context(WriteSnafu)?;
    }

    out.flush().await.context(WriteSnafu)
}
