//! `hourglass-core`: configuration, errors and identifiers shared by every
//! Hourglass crate.

pub mod config;
pub mod error;
pub mod types;

pub use config::HourglassConfig;
pub use error::{HourglassError, Result};
pub use types::{TaskId, WorkerId};
