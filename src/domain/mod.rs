//! Domain layer for the taskmesh scheduler
//!
//! Core models, error taxonomy and port traits. Nothing here touches the
//! runtime or the outside world.

pub mod errors;
pub mod models;
pub mod ports;

pub use errors::{ConfigError, SchedulerError, SchedulerResult, ValidationError};
