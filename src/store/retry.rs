//! Background retry scheduler for failed pool creation
//!
//! Spawned once when the initial pool creation fails, so that process
//! startup never waits on an unreachable store. Runs a bounded number of
//! fixed-delay attempts, each re-entering the manager's creation critical
//! section, then terminates whether or not the store came back.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::manager::StoreManager;

/// Bounded attempt counter owned by the scheduler
#[derive(Debug, Clone)]
pub struct RetryBudget {
    attempts_made: u32,
    max_attempts: u32,
    delay: Duration,
}

impl RetryBudget {
    /// Create a budget of `max_attempts` attempts spaced `delay` apart
    pub fn new(max_attempts: u32, delay: Duration) -> Self {
        Self {
            attempts_made: 0,
            max_attempts,
            delay,
        }
    }

    /// Attempts consumed so far
    pub fn attempts_made(&self) -> u32 {
        self.attempts_made
    }

    /// Maximum number of attempts
    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Delay between attempts
    pub fn delay(&self) -> Duration {
        self.delay
    }

    /// Whether all attempts have been consumed
    pub fn exhausted(&self) -> bool {
        self.attempts_made >= self.max_attempts
    }

    fn note_attempt(&mut self) {
        self.attempts_made += 1;
    }
}

/// Spawn the retry loop as an independent background task
pub(super) fn spawn(manager: Arc<StoreManager>) -> JoinHandle<()> {
    tokio::spawn(run(manager))
}

async fn run(manager: Arc<StoreManager>) {
    let mut budget = RetryBudget::new(manager.retry_attempts(), manager.retry_delay());

    info!(
        max_attempts = budget.max_attempts(),
        delay_secs = budget.delay().as_secs(),
        "store retry scheduler started"
    );

    while !budget.exhausted() {
        tokio::time::sleep(budget.delay()).await;

        if manager.is_closed() {
            debug!("store closed, stopping retry scheduler");
            manager.finish_retry();
            return;
        }

        budget.note_attempt();

        if manager.retry_create().await {
            info!(
                attempts = budget.attempts_made(),
                "store became available"
            );
            manager.finish_retry();
            return;
        }

        warn!(
            attempt = budget.attempts_made(),
            max_attempts = budget.max_attempts(),
            "store still unavailable"
        );
    }

    error!(
        attempts = budget.attempts_made(),
        "retry budget exhausted, store remains unavailable"
    );
    manager.finish_retry();
}
