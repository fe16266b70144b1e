pub mod config;
pub mod duration;
pub mod types;

pub use config::CutoverConfig;
pub use duration::{parse_duration, DurationError};
pub use types::*;
