use std::{
    sync::{
        Arc, Once,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use feed_consumer::{
    error::Result,
    models::NormalizedReport,
    settings::{ConsumerSettings, Environment, LogLevel, ReconnectSettings, Settings},
    source::{FeedReader, FeedSource},
    startup::App,
};
use fusion_core::{FusionConfig, SourceId, VesselKey};
use tokio::{
    io::{AsyncWriteExt, DuplexStream},
    sync::mpsc,
};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

static TRACING: Once = Once::new();

pub struct TestHelper {
    pub app: App,
}

/// A feed whose every connection is an in-memory pipe handed to the test.
pub struct TestFeed {
    source_id: SourceId,
    connections: mpsc::UnboundedSender<DuplexStream>,
    num_connects: Arc<AtomicUsize>,
}

pub struct TestFeedHandle {
    connections: mpsc::UnboundedReceiver<DuplexStream>,
    num_connects: Arc<AtomicUsize>,
}

pub struct FeedConnection {
    writer: DuplexStream,
}

impl TestHelper {
    pub async fn new() -> Self {
        Self::with_config(FusionConfig::default()).await
    }

    pub async fn with_config(fusion: FusionConfig) -> Self {
        init_tracing();

        let settings = Settings {
            log_level: LogLevel::Debug,
            environment: Environment::Test,
            fusion,
            consumer: ConsumerSettings {
                commit_interval: Duration::from_millis(5),
                max_line_length: 1_000,
                reconnect: ReconnectSettings {
                    min_delay: Duration::from_millis(5),
                    max_delay: Duration::from_millis(20),
                    max_attempts: None,
                },
            },
            sources: vec![],
        };

        Self {
            app: App::build(settings).await.unwrap(),
        }
    }

    /// Registers a new in-memory source with the app and waits for its first connection.
    pub async fn add_source(&self, source_id: &str) -> (TestFeedHandle, FeedConnection) {
        let (feed, mut handle) = TestFeed::new(source_id);
        self.app.manager().start(feed).unwrap();

        let connection = handle.next_connection().await;
        (handle, connection)
    }

    pub fn snapshot_len(&self, mmsi: i32) -> usize {
        self.app
            .engine()
            .snapshot(&VesselKey::test_mmsi(mmsi))
            .len()
    }

    pub async fn wait_until(&self, mut condition: impl FnMut(&App) -> bool) {
        let app = &self.app;
        tokio::time::timeout(Duration::from_secs(5), async {
            while !condition(app) {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();
    }
}

impl TestFeed {
    pub fn new(source_id: &str) -> (Arc<TestFeed>, TestFeedHandle) {
        let (sender, receiver) = mpsc::unbounded_channel();
        let num_connects = Arc::new(AtomicUsize::new(0));

        let feed = TestFeed {
            source_id: source_id.into(),
            connections: sender,
            num_connects: num_connects.clone(),
        };
        let handle = TestFeedHandle {
            connections: receiver,
            num_connects,
        };

        (Arc::new(feed), handle)
    }
}

#[async_trait]
impl FeedSource for TestFeed {
    fn source_id(&self) -> &SourceId {
        &self.source_id
    }

    async fn connect(&self) -> Result<FeedReader> {
        let (reader, writer) = tokio::io::duplex(64 * 1024);
        self.num_connects.fetch_add(1, Ordering::Relaxed);
        // The test may have dropped its handle, the connection then just stays idle.
        let _ = self.connections.send(writer);
        Ok(Box::new(reader))
    }
}

impl TestFeedHandle {
    pub async fn next_connection(&mut self) -> FeedConnection {
        let writer = tokio::time::timeout(Duration::from_secs(5), self.connections.recv())
            .await
            .unwrap()
            .unwrap();

        FeedConnection { writer }
    }

    pub fn num_connects(&self) -> usize {
        self.num_connects.load(Ordering::Relaxed)
    }
}

impl FeedConnection {
    pub async fn send(&mut self, report: &NormalizedReport) {
        self.send_raw(&report.to_line()).await;
    }

    pub async fn send_raw(&mut self, line: &str) {
        self.writer.write_all(line.as_bytes()).await.unwrap();
    }

    /// Ends the stream, the consumer sees this as the feed going away.
    pub async fn close(mut self) {
        self.writer.shutdown().await.unwrap();
    }
}

pub fn init_tracing() {
    TRACING.call_once(|| {
        let subscriber = FmtSubscriber::builder()
            .with_env_filter(EnvFilter::from_default_env())
            .with_test_writer()
            .finish();
        tracing::subscriber::set_global_default(subscriber).unwrap();
    });
}

pub fn t(secs: i64) -> DateTime<Utc> {
    Utc.timestamp_opt(1_700_000_000, 0).unwrap() + chrono::Duration::seconds(secs)
}
