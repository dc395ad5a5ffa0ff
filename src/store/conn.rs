//! Store connection supplier
//!
//! Wraps the raw PostgreSQL connect call behind small traits so the pool
//! and everything above it can be exercised against scripted connections
//! in tests. The supplier is stateless and fallible; resilience lives in
//! the pool manager, not here.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio_postgres::NoTls;
use tracing::{debug, info};

use super::recorder::PredictionRecord;

/// Error types for store operations
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Failed to connect to store: {0}")]
    ConnectionFailed(String),

    #[error("Connection attempt timed out after {0:?}")]
    ConnectTimeout(Duration),

    #[error("Pool is exhausted ({0} connections in use)")]
    PoolExhausted(usize),

    #[error("Pool is closed")]
    PoolClosed,

    #[error("Statement failed: {0}")]
    Statement(String),
}

const SCHEMA_SQL: &str = "CREATE TABLE IF NOT EXISTS predictions (
    id BIGSERIAL PRIMARY KEY,
    input_text TEXT NOT NULL,
    label TEXT NOT NULL,
    confidence DOUBLE PRECISION NOT NULL,
    created_at TIMESTAMPTZ NOT NULL DEFAULT now()
)";

const INSERT_SQL: &str =
    "INSERT INTO predictions (input_text, label, confidence) VALUES ($1, $2, $3)";

const LABEL_COUNTS_SQL: &str = "SELECT label, count(*) FROM predictions GROUP BY label";

/// A single live connection to the audit store.
///
/// The trait is deliberately narrow: the service issues exactly one insert,
/// one liveness statement, one idempotent DDL statement, and one aggregate
/// read-back. Anything wider belongs to a different system.
#[async_trait]
pub trait StoreConnection: Send + Sync {
    /// Trivial liveness statement.
    async fn ping(&self) -> Result<(), StoreError>;

    /// Create the predictions table if it does not exist yet.
    async fn ensure_schema(&self) -> Result<(), StoreError>;

    /// Insert one prediction row. The insertion timestamp is assigned
    /// server-side.
    async fn insert_prediction(&self, record: &PredictionRecord) -> Result<(), StoreError>;

    /// Per-label row counts, for metrics read-back.
    async fn label_counts(&self) -> Result<Vec<(String, i64)>, StoreError>;

    /// Whether the underlying connection has terminated.
    fn is_closed(&self) -> bool;
}

/// Factory trait for creating store connections
#[async_trait]
pub trait ConnectionFactory: Send + Sync + 'static {
    /// Establish a new connection, bounded by the supplier's own timeout.
    async fn connect(&self) -> Result<Arc<dyn StoreConnection>, StoreError>;
}

#[async_trait]
impl<T: ConnectionFactory> ConnectionFactory for Arc<T> {
    async fn connect(&self) -> Result<Arc<dyn StoreConnection>, StoreError> {
        (**self).connect().await
    }
}

/// PostgreSQL-backed connection
pub struct PgConnection {
    client: tokio_postgres::Client,
}

#[async_trait]
impl StoreConnection for PgConnection {
    async fn ping(&self) -> Result<(), StoreError> {
        self.client
            .batch_execute("SELECT 1")
            .await
            .map_err(|e| StoreError::Statement(e.to_string()))
    }

    async fn ensure_schema(&self) -> Result<(), StoreError> {
        self.client
            .batch_execute(SCHEMA_SQL)
            .await
            .map_err(|e| StoreError::Statement(e.to_string()))
    }

    async fn insert_prediction(&self, record: &PredictionRecord) -> Result<(), StoreError> {
        self.client
            .execute(
                INSERT_SQL,
                &[&record.text, &record.label, &record.confidence],
            )
            .await
            .map_err(|e| StoreError::Statement(e.to_string()))?;
        Ok(())
    }

    async fn label_counts(&self) -> Result<Vec<(String, i64)>, StoreError> {
        let rows = self
            .client
            .query(LABEL_COUNTS_SQL, &[])
            .await
            .map_err(|e| StoreError::Statement(e.to_string()))?;

        Ok(rows
            .iter()
            .map(|row| (row.get::<_, String>(0), row.get::<_, i64>(1)))
            .collect())
    }

    fn is_closed(&self) -> bool {
        self.client.is_closed()
    }
}

/// Connection factory backed by `tokio_postgres::connect`
pub struct PgConnectionFactory {
    dsn: String,
    connect_timeout: Duration,
}

impl PgConnectionFactory {
    /// Create a factory for the given DSN with a bounded connect timeout
    pub fn new(dsn: String, connect_timeout: Duration) -> Self {
        Self {
            dsn,
            connect_timeout,
        }
    }
}

#[async_trait]
impl ConnectionFactory for PgConnectionFactory {
    async fn connect(&self) -> Result<Arc<dyn StoreConnection>, StoreError> {
        let (client, connection) =
            tokio::time::timeout(self.connect_timeout, tokio_postgres::connect(&self.dsn, NoTls))
                .await
                .map_err(|_| StoreError::ConnectTimeout(self.connect_timeout))?
                .map_err(|e| StoreError::ConnectionFailed(e.to_string()))?;

        // Drive the connection until it terminates. Errors here surface to
        // callers as a closed client on the next statement.
        tokio::spawn(async move {
            if let Err(e) = connection.await {
                debug!(error = %e, "store connection terminated");
            }
        });

        info!("established store connection");
        Ok(Arc::new(PgConnection { client }))
    }
}
