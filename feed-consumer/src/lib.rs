#![deny(warnings)]
#![deny(rust_2018_idioms)]

//! Binary that consumes normalized position feeds, fuses them into per-vessel trajectories and
//! writes confirmed fixes downstream as JSON lines.

pub mod consumer;
pub mod error;
pub mod manager;
pub mod models;
pub mod settings;
pub mod source;
pub mod startup;
