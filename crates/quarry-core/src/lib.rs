//! Configuration and component wiring shared by the quarry binary and
//! embedders of the library.

pub mod bootstrap;
pub mod config;

pub use bootstrap::{Quarry, RankedResponse, build};
pub use config::Config;
