//! Pool lifecycle state machine and lease front
//!
//! One `StoreManager` exists per process. It owns the only
//! `ConnectionPool` handle and the authoritative status cell, and it
//! funnels every pool-creation attempt (startup, background retry, lazy
//! per-request) through a single creation lock so that at most one
//! attempt runs at any instant.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::config::StoreConfig;

use super::conn::{ConnectionFactory, PgConnectionFactory, StoreError};
use super::pool::{ConnectionPool, Lease, PoolConfig, PoolStats};
use super::retry;

/// Pool lifecycle status
///
/// Transitions are monotonic except `Failed -> Initializing`, which is
/// permitted only from inside the creation critical section.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PoolStatus {
    Uninitialized,
    Initializing,
    Ready,
    Failed,
}

struct ManagerState {
    status: PoolStatus,
    pool: Option<Arc<ConnectionPool>>,
}

/// Owns the process-wide connection pool and its lifecycle
pub struct StoreManager {
    config: StoreConfig,

    /// Absent when no DSN is configured; auditing is then permanently off.
    factory: Option<Arc<dyn ConnectionFactory>>,

    /// Creation critical section, shared by `initialize`, the background
    /// retry loop, and the lazy per-request attempt.
    init_lock: Mutex<()>,

    state: RwLock<ManagerState>,

    /// The background scheduler is spawned at most once per process.
    retry_spawned: AtomicBool,

    /// True while the scheduler still has budget left.
    retry_in_flight: AtomicBool,

    closed: AtomicBool,
}

impl StoreManager {
    /// Create a manager backed by PostgreSQL, or a permanently disabled
    /// one when no DSN is configured.
    pub fn new(config: StoreConfig) -> Arc<Self> {
        let factory = match config.dsn.clone() {
            Some(dsn) => Some(Arc::new(PgConnectionFactory::new(dsn, config.connect_timeout()))
                as Arc<dyn ConnectionFactory>),
            None => {
                info!("store DSN not configured, prediction auditing disabled");
                None
            }
        };

        Self::build(config, factory)
    }

    /// Create a manager with an injected connection supplier.
    pub fn with_factory(config: StoreConfig, factory: Arc<dyn ConnectionFactory>) -> Arc<Self> {
        Self::build(config, Some(factory))
    }

    fn build(config: StoreConfig, factory: Option<Arc<dyn ConnectionFactory>>) -> Arc<Self> {
        Arc::new(Self {
            config,
            factory,
            init_lock: Mutex::new(()),
            state: RwLock::new(ManagerState {
                status: PoolStatus::Uninitialized,
                pool: None,
            }),
            retry_spawned: AtomicBool::new(false),
            retry_in_flight: AtomicBool::new(false),
            closed: AtomicBool::new(false),
        })
    }

    /// Current lifecycle status
    pub fn status(&self) -> PoolStatus {
        self.state.read().status
    }

    /// Current pool occupancy, when a pool exists
    pub fn stats(&self) -> Option<PoolStats> {
        self.state.read().pool.as_ref().map(|p| p.stats())
    }

    /// Initialize the pool, returning current readiness.
    ///
    /// Idempotent and safe to call concurrently: only one caller performs
    /// the actual construction, everyone else observes the result. On
    /// failure the background retry scheduler is spawned (once per
    /// process) and the call returns without waiting for it. Connection
    /// errors never propagate; callers only see a boolean.
    pub async fn initialize(self: &Arc<Self>) -> bool {
        let Some(factory) = self.factory.clone() else {
            return false;
        };
        if self.closed.load(Ordering::SeqCst) {
            return false;
        }
        if self.status() == PoolStatus::Ready {
            return true;
        }
        // While the scheduler still has budget, recovery is its job.
        if self.retry_in_flight.load(Ordering::SeqCst) {
            return false;
        }

        let _guard = self.init_lock.lock().await;
        if self.status() == PoolStatus::Ready {
            return true;
        }

        let ok = self.try_create_pool(&factory).await;

        if !ok
            && self
                .retry_spawned
                .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
                .is_ok()
        {
            self.retry_in_flight.store(true, Ordering::SeqCst);
            retry::spawn(Arc::clone(self));
        }

        ok
    }

    /// Lease a connection, or `None` when the store is unavailable.
    ///
    /// Never blocks beyond one bounded connection attempt and never
    /// raises. When the pool is absent and no retry is in flight, this
    /// performs one lazy creation attempt at the calling request's cost;
    /// concurrent requests observe unavailability instead of queueing.
    pub async fn acquire(&self) -> Option<Lease> {
        let factory = self.factory.clone()?;
        if self.closed.load(Ordering::SeqCst) {
            return None;
        }

        if self.status() != PoolStatus::Ready {
            if self.retry_in_flight.load(Ordering::SeqCst) {
                return None;
            }
            // Only the request that wins the lock pays for the attempt.
            let Ok(_guard) = self.init_lock.try_lock() else {
                return None;
            };
            if self.status() != PoolStatus::Ready && !self.try_create_pool(&factory).await {
                return None;
            }
        }

        let pool = self.state.read().pool.clone()?;
        match pool.acquire().await {
            Ok(lease) => Some(lease),
            Err(e) => {
                warn!(error = %e, "connection lease unavailable");
                None
            }
        }
    }

    /// Whether the store is reachable right now.
    ///
    /// Leases a connection, issues a trivial liveness statement, and
    /// releases on every branch. Observational only: the result does not
    /// feed back into the lifecycle status.
    pub async fn is_ready(&self) -> bool {
        let Some(lease) = self.acquire().await else {
            return false;
        };
        match lease.ping().await {
            Ok(()) => true,
            Err(e) => {
                debug!(error = %e, "readiness probe failed");
                false
            }
        }
    }

    /// Close the pool and all its connections.
    ///
    /// Idempotent, and safe when no pool was ever created. Every later
    /// operation degrades to its unavailable behavior.
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        let pool = self.state.write().pool.take();
        if let Some(pool) = pool {
            pool.close();
            info!("store pool closed");
        }
    }

    /// One pool construction attempt. Caller must hold `init_lock`.
    ///
    /// On success the schema is ensured before the status flips to
    /// `Ready`; a failed schema statement counts as a failed creation.
    async fn try_create_pool(&self, factory: &Arc<dyn ConnectionFactory>) -> bool {
        self.set_status(PoolStatus::Initializing);

        let pool_config = PoolConfig {
            min_connections: self.config.min_connections,
            max_connections: self.config.max_connections,
        };

        let pool = match ConnectionPool::open(pool_config, factory.clone()).await {
            Ok(pool) => pool,
            Err(e) => {
                warn!(error = %e, "store pool creation failed");
                self.set_status(PoolStatus::Failed);
                return false;
            }
        };

        if let Err(e) = Self::ensure_schema(&pool).await {
            warn!(error = %e, "schema creation failed");
            pool.close();
            self.set_status(PoolStatus::Failed);
            return false;
        }

        let mut state = self.state.write();
        state.pool = Some(pool);
        state.status = PoolStatus::Ready;
        drop(state);

        info!(
            min = self.config.min_connections,
            max = self.config.max_connections,
            "store pool ready"
        );
        true
    }

    async fn ensure_schema(pool: &Arc<ConnectionPool>) -> Result<(), StoreError> {
        let lease = pool.acquire().await?;
        lease.ensure_schema().await
    }

    fn set_status(&self, status: PoolStatus) {
        self.state.write().status = status;
    }

    // Hooks for the background retry scheduler.

    pub(super) async fn retry_create(&self) -> bool {
        let Some(factory) = self.factory.clone() else {
            return false;
        };
        let _guard = self.init_lock.lock().await;
        if self.closed.load(Ordering::SeqCst) {
            return false;
        }
        if self.status() == PoolStatus::Ready {
            return true;
        }
        self.try_create_pool(&factory).await
    }

    pub(super) fn finish_retry(&self) {
        self.retry_in_flight.store(false, Ordering::SeqCst);
    }

    pub(super) fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    pub(super) fn retry_attempts(&self) -> u32 {
        self.config.retry_attempts
    }

    pub(super) fn retry_delay(&self) -> Duration {
        self.config.retry_delay()
    }
}
