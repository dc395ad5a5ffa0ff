//! Best-effort prediction audit writer
//!
//! Inserts one row per prediction when the store is reachable. Failure of
//! any kind surfaces to the caller as `false` and a log line, never as an
//! error: the prediction response must be unaffected by the store.

use std::sync::Arc;

use tracing::{debug, warn};

use super::manager::StoreManager;

/// A single prediction audit row
///
/// Written at most once and never read back here; the insertion timestamp
/// is assigned by the store.
#[derive(Debug, Clone, PartialEq)]
pub struct PredictionRecord {
    pub text: String,
    pub label: String,
    pub confidence: f64,
}

impl PredictionRecord {
    pub fn new(text: impl Into<String>, label: impl Into<String>, confidence: f64) -> Self {
        Self {
            text: text.into(),
            label: label.into(),
            confidence,
        }
    }
}

/// Audit writer over the shared store manager
pub struct Recorder {
    store: Arc<StoreManager>,
}

impl Recorder {
    pub fn new(store: Arc<StoreManager>) -> Self {
        Self { store }
    }

    /// Persist one prediction, reporting success only.
    ///
    /// The lease is returned on every path; a mid-statement failure still
    /// releases the connection before `false` is returned.
    pub async fn record(&self, record: &PredictionRecord) -> bool {
        let Some(lease) = self.store.acquire().await else {
            warn!(label = %record.label, "prediction not audited, store unavailable");
            return false;
        };

        match lease.insert_prediction(record).await {
            Ok(()) => {
                debug!(
                    label = %record.label,
                    confidence = record.confidence,
                    "prediction audited"
                );
                true
            }
            Err(e) => {
                warn!(error = %e, "prediction insert failed");
                false
            }
        }
    }
}
