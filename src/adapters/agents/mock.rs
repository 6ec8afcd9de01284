//! Mock agent for tests and demos.
//!
//! Echoes its payload after an optional delay, can be told to fail the first
//! N calls (or every call), and records how many runs overlapped.

use async_trait::async_trait;
use serde_json::Value;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use crate::domain::ports::{Agent, AgentError};

#[derive(Debug, Default)]
pub struct MockAgent {
    delay: Duration,
    fail_first: usize,
    error_message: String,
    calls: AtomicUsize,
    in_flight: AtomicUsize,
    peak_in_flight: AtomicUsize,
}

impl MockAgent {
    /// Succeeds immediately with the payload.
    pub fn echo() -> Self {
        Self {
            error_message: "mock failure".to_string(),
            ..Default::default()
        }
    }

    /// Fails on every call.
    pub fn failing(message: impl Into<String>) -> Self {
        Self {
            fail_first: usize::MAX,
            error_message: message.into(),
            ..Default::default()
        }
    }

    /// Fails the first `n` calls, then succeeds.
    pub fn flaky(n: usize) -> Self {
        Self {
            fail_first: n,
            ..Self::echo()
        }
    }

    #[must_use]
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Number of times `execute` was entered.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Highest number of simultaneous runs observed.
    pub fn peak_in_flight(&self) -> usize {
        self.peak_in_flight.load(Ordering::SeqCst)
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }
}

struct InFlight<'a>(&'a AtomicUsize);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl Agent for MockAgent {
    fn kind(&self) -> &'static str {
        "mock"
    }

    async fn execute(&self, payload: Value, cancel: CancellationToken) -> Result<Value, AgentError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak_in_flight.fetch_max(now, Ordering::SeqCst);
        let _guard = InFlight(&self.in_flight);

        if !self.delay.is_zero() {
            tokio::select! {
                () = tokio::time::sleep(self.delay) => {}
                () = cancel.cancelled() => return Err(AgentError::Cancelled),
            }
        }

        if call < self.fail_first {
            return Err(AgentError::Failed(self.error_message.clone()));
        }
        Ok(payload)
    }
}
