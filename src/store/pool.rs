//! Bounded connection pool with scoped leases
//!
//! The pool eagerly establishes its minimum connection set at creation so
//! that an unreachable store fails construction instead of producing an
//! empty pool. Acquisition never waits: exhaustion and a closed pool are
//! immediate errors, and a leased connection is returned on every exit
//! path by the `Lease` guard's `Drop`.

use std::collections::VecDeque;
use std::ops::Deref;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::{OwnedSemaphorePermit, Semaphore, TryAcquireError};
use tracing::debug;

use super::conn::{ConnectionFactory, StoreConnection, StoreError};

/// Configuration for pool sizing
#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// Connections established at pool creation and kept warm
    pub min_connections: usize,

    /// Hard cap on concurrently leased plus idle connections
    pub max_connections: usize,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            min_connections: 1,
            max_connections: 10,
        }
    }
}

/// Snapshot of pool occupancy
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PoolStats {
    /// Idle plus leased connections
    pub total: usize,

    /// Connections available in the free list
    pub idle: usize,

    /// Connections currently leased out
    pub active: usize,
}

/// A bounded pool of store connections
pub struct ConnectionPool {
    config: PoolConfig,
    factory: Arc<dyn ConnectionFactory>,
    /// Free list of returned connections
    idle: Mutex<VecDeque<Arc<dyn StoreConnection>>>,
    /// Caps total leased connections at `max_connections`
    permits: Arc<Semaphore>,
    active: AtomicUsize,
    closed: AtomicBool,
}

impl ConnectionPool {
    /// Create the pool, eagerly establishing the minimum connection set.
    ///
    /// Fails if any of the initial connections cannot be established; the
    /// caller owns retrying.
    pub async fn open(
        config: PoolConfig,
        factory: Arc<dyn ConnectionFactory>,
    ) -> Result<Arc<Self>, StoreError> {
        // At least one eager connection, so a dead store fails creation.
        let warm = config.min_connections.clamp(1, config.max_connections);

        let pool = Arc::new(Self {
            permits: Arc::new(Semaphore::new(config.max_connections)),
            config,
            factory,
            idle: Mutex::new(VecDeque::new()),
            active: AtomicUsize::new(0),
            closed: AtomicBool::new(false),
        });

        for _ in 0..warm {
            let conn = pool.factory.connect().await?;
            pool.idle.lock().push_back(conn);
        }

        Ok(pool)
    }

    /// Lease a connection from the pool.
    ///
    /// Never waits for capacity: an exhausted pool is an immediate error.
    /// Idle connections whose driver has terminated are discarded and
    /// replaced by a fresh connect within the same attempt.
    pub async fn acquire(self: &Arc<Self>) -> Result<Lease, StoreError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(StoreError::PoolClosed);
        }

        let permit = match self.permits.clone().try_acquire_owned() {
            Ok(permit) => permit,
            Err(TryAcquireError::Closed) => return Err(StoreError::PoolClosed),
            Err(TryAcquireError::NoPermits) => {
                return Err(StoreError::PoolExhausted(self.config.max_connections))
            }
        };

        let reusable = loop {
            let candidate = self.idle.lock().pop_front();
            match candidate {
                Some(conn) if !conn.is_closed() => break Some(conn),
                Some(_) => {
                    debug!("discarding dead idle connection");
                    continue;
                }
                None => break None,
            }
        };

        let conn = match reusable {
            Some(conn) => conn,
            // Permit is dropped on error, so a failed connect releases
            // the capacity it reserved.
            None => self.factory.connect().await?,
        };

        self.active.fetch_add(1, Ordering::SeqCst);
        Ok(Lease {
            conn: Some(conn),
            pool: Arc::clone(self),
            _permit: permit,
        })
    }

    /// Return a connection to the free list.
    ///
    /// Dead connections and returns into a closed pool drop the connection
    /// instead; dropping the client terminates it.
    fn release(&self, conn: Arc<dyn StoreConnection>) {
        self.active.fetch_sub(1, Ordering::SeqCst);

        if self.closed.load(Ordering::SeqCst) || conn.is_closed() {
            return;
        }

        self.idle.lock().push_back(conn);
    }

    /// Current pool occupancy
    pub fn stats(&self) -> PoolStats {
        let idle = self.idle.lock().len();
        let active = self.active.load(Ordering::SeqCst);
        PoolStats {
            total: idle + active,
            idle,
            active,
        }
    }

    /// Close the pool, dropping all idle connections.
    ///
    /// Idempotent. Outstanding leases stay valid until dropped; their
    /// connections are discarded on return.
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.permits.close();
        self.idle.lock().clear();
    }

    /// Whether the pool has been closed
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

/// A connection leased from the pool
///
/// Dropping the lease returns the connection, so release happens exactly
/// once on every exit path of the holder, error paths included.
pub struct Lease {
    conn: Option<Arc<dyn StoreConnection>>,
    pool: Arc<ConnectionPool>,
    _permit: OwnedSemaphorePermit,
}

impl Deref for Lease {
    type Target = dyn StoreConnection;

    fn deref(&self) -> &Self::Target {
        self.conn.as_ref().expect("lease already returned").as_ref()
    }
}

impl Drop for Lease {
    fn drop(&mut self) {
        if let Some(conn) = self.conn.take() {
            self.pool.release(conn);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::AtomicU32;

    struct TestConnection {
        closed: Arc<AtomicBool>,
    }

    #[async_trait]
    impl StoreConnection for TestConnection {
        async fn ping(&self) -> Result<(), StoreError> {
            Ok(())
        }

        async fn ensure_schema(&self) -> Result<(), StoreError> {
            Ok(())
        }

        async fn insert_prediction(
            &self,
            _record: &crate::store::PredictionRecord,
        ) -> Result<(), StoreError> {
            Ok(())
        }

        async fn label_counts(&self) -> Result<Vec<(String, i64)>, StoreError> {
            Ok(Vec::new())
        }

        fn is_closed(&self) -> bool {
            self.closed.load(Ordering::SeqCst)
        }
    }

    struct TestFactory {
        connects: AtomicU32,
        /// Kill switch for the most recently issued connection
        last_issued: Mutex<Option<Arc<AtomicBool>>>,
    }

    impl TestFactory {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                connects: AtomicU32::new(0),
                last_issued: Mutex::new(None),
            })
        }

        fn connects(&self) -> u32 {
            self.connects.load(Ordering::SeqCst)
        }

        fn kill_last_issued(&self) {
            if let Some(flag) = self.last_issued.lock().as_ref() {
                flag.store(true, Ordering::SeqCst);
            }
        }
    }

    #[async_trait]
    impl ConnectionFactory for TestFactory {
        async fn connect(&self) -> Result<Arc<dyn StoreConnection>, StoreError> {
            self.connects.fetch_add(1, Ordering::SeqCst);
            let closed = Arc::new(AtomicBool::new(false));
            *self.last_issued.lock() = Some(closed.clone());
            Ok(Arc::new(TestConnection { closed }))
        }
    }

    fn small_pool_config(max: usize) -> PoolConfig {
        PoolConfig {
            min_connections: 1,
            max_connections: max,
        }
    }

    #[tokio::test]
    async fn test_exhaustion_is_immediate() {
        let factory = TestFactory::new();
        let pool = ConnectionPool::open(small_pool_config(1), factory)
            .await
            .unwrap();

        let held = pool.acquire().await.unwrap();
        let second = pool.acquire().await;
        assert!(matches!(second, Err(StoreError::PoolExhausted(1))));

        drop(held);
        assert!(pool.acquire().await.is_ok());
    }

    #[tokio::test]
    async fn test_lease_returns_on_drop() {
        let factory = TestFactory::new();
        let pool = ConnectionPool::open(small_pool_config(4), factory.clone())
            .await
            .unwrap();

        {
            let lease = pool.acquire().await.unwrap();
            assert_eq!(pool.stats().active, 1);
            lease.ping().await.unwrap();
        }

        let stats = pool.stats();
        assert_eq!(stats.active, 0);
        assert_eq!(stats.idle, 1);

        // The warmed connection is reused, not re-created.
        let _lease = pool.acquire().await.unwrap();
        assert_eq!(factory.connects(), 1);
    }

    #[tokio::test]
    async fn test_dead_idle_connection_is_replaced() {
        let factory = TestFactory::new();
        let pool = ConnectionPool::open(small_pool_config(4), factory.clone())
            .await
            .unwrap();

        drop(pool.acquire().await.unwrap());
        // Simulate the driver task dying while the connection idles.
        factory.kill_last_issued();

        let _lease = pool.acquire().await.unwrap();
        assert_eq!(factory.connects(), 2);
        assert_eq!(pool.stats().active, 1);
    }

    #[tokio::test]
    async fn test_close_is_idempotent() {
        let factory = TestFactory::new();
        let pool = ConnectionPool::open(small_pool_config(2), factory)
            .await
            .unwrap();

        let held = pool.acquire().await.unwrap();

        pool.close();
        pool.close();

        assert!(matches!(pool.acquire().await, Err(StoreError::PoolClosed)));

        // Returning an outstanding lease into a closed pool is a no-op.
        drop(held);
        assert_eq!(pool.stats().active, 0);
        assert_eq!(pool.stats().idle, 0);
    }
}
