#![doc = include_str!("../README.md")]
mod config;
mod constants;
mod error;
mod stages;
mod stats;

pub use config::*;
pub use constants::*;
pub use error::*;
pub use stages::*;
pub use stats::*;
