//! Configuration management: the TOML file describing hosts and per-service defaults.

mod loader;
mod types;

pub use loader::*;
pub use types::*;
