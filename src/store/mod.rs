//! Resilient access to the prediction audit store
//!
//! This module provides:
//! - Pooled PostgreSQL connections behind a factory seam
//! - A pool lifecycle state machine that tolerates a store that is down
//!   at process start
//! - A bounded, fixed-delay background retry loop for pool creation
//! - Non-blocking lease acquisition with graceful unavailable signaling
//! - A best-effort audit writer that never perturbs the prediction path

pub mod conn;
pub mod manager;
pub mod pool;
pub mod recorder;
pub mod retry;

pub use conn::{ConnectionFactory, PgConnectionFactory, StoreConnection, StoreError};
pub use manager::{PoolStatus, StoreManager};
pub use pool::{ConnectionPool, Lease, PoolConfig, PoolStats};
pub use recorder::{PredictionRecord, Recorder};
pub use retry::RetryBudget;
