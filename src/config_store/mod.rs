//! ConfigStore - Single Source of Truth (SSoT)
//!
//! ## Responsibilities
//!
//! - Camera inventory management
//! - Retention / replication / storage / supervisor settings
//! - Session record persistence (audit trail)
//!
//! ## Design Principles
//!
//! - SSoT: all configuration reads/writes go through here
//! - No other module stores camera config locally

mod repository;
mod service;
mod types;

pub use repository::ConfigRepository;
pub use service::ConfigService;
pub use types::*;

use sqlx::MySqlPool;
use std::sync::Arc;
use tokio::sync::RwLock;

/// ConfigStore instance
pub struct ConfigStore {
    service: ConfigService,
    /// In-memory cache for frequent reads
    cache: Arc<RwLock<ConfigCache>>,
}

impl ConfigStore {
    /// Create new ConfigStore
    pub async fn new(pool: MySqlPool) -> crate::Result<Self> {
        let repo = ConfigRepository::new(pool);
        let service = ConfigService::new(repo);

        let cache = Arc::new(RwLock::new(ConfigCache::default()));

        let store = Self { service, cache };

        // Initial cache load
        store.refresh_cache().await?;

        Ok(store)
    }

    /// Get service reference
    pub fn service(&self) -> &ConfigService {
        &self.service
    }

    /// Refresh in-memory cache
    pub async fn refresh_cache(&self) -> crate::Result<()> {
        let cameras = self.service.list_cameras().await?;
        let settings = self.service.get_all_settings().await?;

        let mut cache = self.cache.write().await;
        cache.cameras = cameras;
        cache.settings = settings;

        tracing::info!("ConfigStore cache refreshed: {} cameras", cache.cameras.len());

        Ok(())
    }

    /// Get cached cameras (fast read)
    pub async fn get_cached_cameras(&self) -> Vec<Camera> {
        self.cache.read().await.cameras.clone()
    }

    /// Get cached setting (fast read)
    pub async fn get_cached_setting(&self, key: &str) -> Option<serde_json::Value> {
        self.cache.read().await.settings.get(key).cloned()
    }
}

/// In-memory cache for ConfigStore
#[derive(Default)]
struct ConfigCache {
    cameras: Vec<Camera>,
    settings: std::collections::HashMap<String, serde_json::Value>,
}
