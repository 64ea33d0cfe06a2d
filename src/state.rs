//! Application state
//!
//! Holds all shared components and state

use crate::config_store::ConfigStore;
use crate::recorder_hub::RecorderHub;
use crate::recording_supervisor::RecordingSupervisor;
use crate::replication_engine::ReplicationEngine;
use crate::session_coordinator::SessionCoordinator;
use crate::storage_guardian::StorageGuardian;
use sqlx::MySqlPool;
use std::path::PathBuf;
use std::sync::Arc;

/// Application configuration
#[derive(Debug, Clone)]
pub struct AppConfig {
    /// Database URL
    pub database_url: String,
    /// Root of the recordings tree
    pub recordings_dir: PathBuf,
    /// Capture binary
    pub ffmpeg_bin: String,
    /// Sensor unit control URL
    pub sensor_gateway_url: String,
    /// Disk poll interval in seconds
    pub storage_poll_secs: u64,
    /// Health check interval in seconds
    pub health_interval_secs: u64,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            database_url: std::env::var("DATABASE_URL")
                .unwrap_or_else(|_| "mysql://root:mijeos12345@@localhost/recserver".to_string()),
            recordings_dir: std::env::var("RECORDINGS_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from("/var/lib/is24/recordings")),
            ffmpeg_bin: std::env::var("FFMPEG_BIN").unwrap_or_else(|_| "ffmpeg".to_string()),
            sensor_gateway_url: std::env::var("SENSOR_GATEWAY_URL")
                .unwrap_or_else(|_| "http://localhost:9100".to_string()),
            storage_poll_secs: std::env::var("STORAGE_POLL_SECS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(60),
            health_interval_secs: std::env::var("HEALTH_INTERVAL_SECS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(10),
        }
    }
}

/// Application state shared across tasks
#[derive(Clone)]
pub struct AppState {
    /// Database pool
    pub pool: MySqlPool,
    /// Application config
    pub config: AppConfig,
    /// ConfigStore (SSoT)
    pub config_store: Arc<ConfigStore>,
    /// RecorderHub (event fan-out)
    pub hub: Arc<RecorderHub>,
    /// RecordingSupervisor (capture processes)
    pub supervisor: Arc<RecordingSupervisor>,
    /// StorageGuardian (retention + disk watching)
    pub guardian: Arc<StorageGuardian>,
    /// ReplicationEngine (off-box copies)
    pub replication: Arc<ReplicationEngine>,
    /// SessionCoordinator (synchronized sessions)
    pub coordinator: Arc<SessionCoordinator>,
}
