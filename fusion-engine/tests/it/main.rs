#![deny(warnings)]
#![deny(rust_2018_idioms)]

pub mod concurrency;
pub mod delivery;
pub mod fusion;
