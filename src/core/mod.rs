//! Core error and domain types shared across the service

pub mod error;
pub mod types;

pub use error::{PulseError, PulseResult};
pub use types::*;
