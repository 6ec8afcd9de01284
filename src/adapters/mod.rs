//! Adapters for external systems.

pub mod agents;
