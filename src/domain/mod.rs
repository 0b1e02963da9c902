mod config;
mod sample;
mod stats;

pub use config::*;
pub use sample::*;
pub use stats::*;
