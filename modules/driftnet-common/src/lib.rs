pub mod config;
pub mod types;

pub use config::{BlocklistConfig, Config};
pub use types::*;
