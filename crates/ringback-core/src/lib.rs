//! `ringback-core` — configuration and process-level errors shared by the
//! scheduler engine and the gateway binary.

pub mod config;
pub mod error;

pub use config::RingbackConfig;
pub use error::{Result, RingbackError};
