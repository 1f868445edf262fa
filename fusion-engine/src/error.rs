use snafu::{Location, Snafu};
use tokio::task::JoinError;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Snafu)]
#[snafu(module, visibility(pub))]
pub enum Error {
    #[snafu(display("Invalid engine configuration"))]
    Config {
        #[snafu(implicit)]
        location: Location,
        source: fusion_core::Error,
    },
    #[snafu(display("Fusion worker queue '{worker}' is closed"))]
    WorkerClosed {
        #[snafu(implicit)]
        location: Location,
        worker: usize,
    },
    #[snafu(display("Fusion worker dropped the reply for vessel '{vessel_key}'"))]
    ReplyDropped {
        #[snafu(implicit)]
        location: Location,
        vessel_key: String,
    },
    #[snafu(display("Failed to join tasks"))]
    JoinError {
        #[snafu(implicit)]
        location: Location,
        #[snafu(source)]
        error: JoinError,
    },
}
