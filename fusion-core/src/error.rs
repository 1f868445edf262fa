use snafu::{Location, Snafu};

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Snafu)]
#[snafu(module, visibility(pub))]
pub enum Error {
    #[snafu(display("Invalid fusion configuration, '{reason}'"))]
    InvalidConfig {
        #[snafu(implicit)]
        location: Location,
        reason: String,
    },
}

#[derive(Debug, Snafu)]
#[snafu(module, visibility(pub))]
pub enum MmsiError {
    #[snafu(display("'{value}' is not a 9-digit mmsi"))]
    Format {
        #[snafu(implicit)]
        location: Location,
        value: String,
    },
}
