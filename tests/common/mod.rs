//! Shared fixtures for integration tests.

#![allow(dead_code)]

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use taskmesh::domain::models::{AgentDescriptor, Config, RetryConfig};
use taskmesh::domain::ports::Agent;
use taskmesh::services::AgentRegistry;
use taskmesh::Scheduler;

/// Configuration with a fast poll loop and immediate retries.
pub fn fast_config() -> Config {
    let mut config = Config::default();
    config.scheduler.poll_interval_ms = 5;
    config.scheduler.shutdown_grace_secs = 1;
    config.retry = RetryConfig::immediate();
    config
}

pub fn descriptor(id: &str, tags: &[&str], max: usize) -> AgentDescriptor {
    AgentDescriptor::new(id, tags.iter().copied(), max).expect("valid descriptor")
}

/// Build a scheduler around explicit agent handles.
pub fn scheduler_with(agents: Vec<(AgentDescriptor, Arc<dyn Agent>)>) -> Scheduler {
    let registry = AgentRegistry::from_agents(agents).expect("valid registry");
    Scheduler::new(registry, &fast_config())
}

/// Poll `condition` until it holds or `timeout` elapses.
pub async fn wait_for<F, Fut>(timeout: Duration, mut condition: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + timeout;
    while tokio::time::Instant::now() < deadline {
        if condition().await {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    condition().await
}

/// Install a test-writer subscriber; later calls are no-ops.
pub fn setup_test_logging() {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_max_level(tracing::Level::DEBUG)
        .try_init();
}
