#![deny(warnings)]
#![deny(rust_2018_idioms)]

mod config;
mod domain;
#[allow(hidden_glob_reexports)]
mod error;
mod geo;
mod ports;

pub use config::*;
pub use domain::*;
pub use error::*;
pub use geo::*;
pub use ports::*;
