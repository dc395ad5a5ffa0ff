use anyhow::{Context, Result};
use std::sync::Arc;

use crate::classifier::Classifier;
use crate::config::Config;
use crate::store::{Recorder, StoreManager};

/// Core shared by the HTTP server and CLI commands
///
/// The single explicitly-owned context object: it holds the classifier
/// and the one store manager for the process, and is injected into every
/// collaborator rather than living behind a global.
#[derive(Clone)]
pub struct Core {
    pub config: Arc<Config>,
    pub classifier: Arc<Classifier>,
    pub store: Arc<StoreManager>,
    pub recorder: Arc<Recorder>,
}

impl Core {
    /// Build the service context and kick off store initialization.
    ///
    /// A missing or malformed model artifact is fatal; an unreachable
    /// store is not. Initialization failure hands recovery to the
    /// background retry loop and startup proceeds.
    pub async fn new(config: Config) -> Result<Self> {
        let config = Arc::new(config);

        let classifier = Classifier::load(&config.model.path)
            .context(format!("Failed to load model from {}", config.model.path))?;

        let store = StoreManager::new(config.store.clone());
        if !store.initialize().await {
            tracing::warn!("audit store not available at startup, predictions will not be audited until it recovers");
        }

        let recorder = Arc::new(Recorder::new(store.clone()));

        Ok(Self {
            config,
            classifier: Arc::new(classifier),
            store,
            recorder,
        })
    }

    /// Close the store pool; safe to call more than once
    pub fn close(&self) {
        self.store.close();
    }
}
