use fusion_core::SourceId;
use snafu::{Location, Snafu};
use tokio::task::JoinError;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Snafu)]
#[snafu(module, visibility(pub))]
pub enum Error {
    #[snafu(display("Feed stream closed unexpectedly"))]
    StreamClosed {
        #[snafu(implicit)]
        location: Location,
    },
    #[snafu(display("Failed to read from feed stream"))]
    Read {
        #[snafu(implicit)]
        location: Location,
        source: std::io::Error,
    },
    #[snafu(display("Failed to connect to feed at '{address}'"))]
    Connect {
        #[snafu(implicit)]
        location: Location,
        address: String,
        source: std::io::Error,
    },
    #[snafu(display("Failed to hand a report to the fusion engine"))]
    Dispatch {
        #[snafu(implicit)]
        location: Location,
        source: fusion_engine::Error,
    },
    #[snafu(display("Fusion engine failed"))]
    Engine {
        #[snafu(implicit)]
        location: Location,
        source: fusion_engine::Error,
    },
    #[snafu(display("Failed to load settings"))]
    Config {
        #[snafu(implicit)]
        location: Location,
        source: config::ConfigError,
    },
    #[snafu(display("APP_ENVIRONMENT is not set"))]
    MissingEnvironment {
        #[snafu(implicit)]
        location: Location,
        source: std::env::VarError,
    },
    #[snafu(display("Unknown environment '{value}'"))]
    InvalidEnvironment {
        #[snafu(implicit)]
        location: Location,
        value: String,
    },
    #[snafu(display("Source '{source_id}' is already running"))]
    SourceAlreadyRunning {
        #[snafu(implicit)]
        location: Location,
        source_id: SourceId,
    },
    #[snafu(display("Source '{source_id}' is not registered"))]
    UnknownSource {
        #[snafu(implicit)]
        location: Location,
        source_id: SourceId,
    },
    #[snafu(display("Failed to serialize fix update"))]
    Serialize {
        #[snafu(implicit)]
        location: Location,
        source: serde_json::Error,
    },
    #[snafu(display("Failed to write fix update"))]
    Write {
        #[snafu(implicit)]
        location: Location,
        source: std::io::Error,
    },
    #[snafu(display("Failed to join tasks"))]
    JoinError {
        #[snafu(implicit)]
        location: Location,
        #[snafu(source)]
        error: JoinError,
    },
}

impl Error {
    /// Whether the feed connection should be re-established after this error.
    pub fn is_reconnectable(&self) -> bool {
        matches!(
            self,
            Error::StreamClosed { .. } | Error::Read { .. } | Error::Connect { .. }
        )
    }
}
