//! Composition root for CLI commands

use crate::api::BackendClient;
use crate::config::AppConfig;
use crate::queue::OperationQueue;
use crate::storage::{KeyValueStore, MemoryStore, SqliteStore};
use anyhow::{Context, Result};
use log::{debug, info};
use std::path::PathBuf;
use std::sync::Arc;

pub struct AppContext {
    pub config: AppConfig,
    pub config_path: PathBuf,
    ephemeral: bool,
}

impl AppContext {
    pub fn load(config_path: Option<PathBuf>, ephemeral: bool) -> Result<Self> {
        let config_path = match config_path {
            Some(path) => path,
            None => AppConfig::default_path()?,
        };
        let config = AppConfig::load_from(&config_path)?;
        Ok(Self {
            config,
            config_path,
            ephemeral,
        })
    }

    pub async fn open_store(&self) -> Result<Arc<dyn KeyValueStore>> {
        if self.ephemeral {
            debug!("Using in-memory queue store");
            return Ok(Arc::new(MemoryStore::new()));
        }

        let db_path = self.config.database_path()?;
        info!("Opening queue database {:?}", db_path);
        let store = SqliteStore::open(&db_path)
            .await
            .with_context(|| format!("Failed to open queue database {:?}", db_path))?;
        Ok(Arc::new(store))
    }

    pub async fn open_queue(&self) -> Result<Arc<OperationQueue>> {
        let store = self.open_store().await?;
        let queue = OperationQueue::new(store).with_max_retries(self.config.queue.max_retries);
        Ok(Arc::new(queue))
    }

    pub fn backend(&self) -> Result<Arc<BackendClient>> {
        Ok(Arc::new(BackendClient::new(self.config.backend.clone())?))
    }
}
