//! Common utilities and types shared across credsync

pub mod config;
pub mod error;
pub mod utils;

pub use config::{Config, RetryPolicy};
pub use error::{Error, Result};
pub use utils::parse_duration;
