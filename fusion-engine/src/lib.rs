#![deny(warnings)]
#![deny(rust_2018_idioms)]

//! Fuses position reports from many disagreeing feeds into one ordered trajectory per
//! vessel.

mod anomaly;
mod confidence;
#[allow(hidden_glob_reexports)]
mod error;
mod evictor;
mod fusion;
mod identity;
mod pool;
mod store;

pub use anomaly::*;
pub use confidence::*;
pub use error::*;
pub use evictor::*;
pub use fusion::*;
pub use identity::*;
pub use pool::*;
pub use store::*;
