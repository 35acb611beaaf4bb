pub mod config;
pub mod duration;
pub mod types;

pub use config::SwarmConfig;
pub use duration::parse_duration;
pub use types::*;
