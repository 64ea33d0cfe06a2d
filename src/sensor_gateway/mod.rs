//! Sensor gateway
//!
//! Side-channel sensor capture tied to recording sessions. The log writer
//! persists sensor samples as JSON Lines next to the video segments; the
//! trigger tells the external sensor unit to start and stop emitting.
//! Both sit behind traits so the coordinator can be exercised without a
//! sensor unit on the bench.

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

/// Result of closing one session's sensor log
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SensorLogSummary {
    pub filename: String,
    pub filepath: PathBuf,
    pub record_count: u64,
}

/// Per-session sensor log sink
#[async_trait]
pub trait SensorLogWriter: Send + Sync {
    /// Open a log for the session inside its recording directory
    async fn start(&self, session_id: &str, output_dir: &Path) -> crate::Result<()>;

    /// Append one sample
    async fn append(&self, session_id: &str, record: serde_json::Value) -> crate::Result<()>;

    /// Close the log and report what was written
    async fn stop(&self, session_id: &str) -> crate::Result<SensorLogSummary>;
}

/// Remote start/stop switch for the sensor unit, keyed by camera
#[async_trait]
pub trait SensorTrigger: Send + Sync {
    async fn enable_recording(&self, camera_id: &str) -> crate::Result<()>;
    async fn disable_recording(&self, camera_id: &str) -> crate::Result<()>;
}

// ========================================
// JSON Lines writer
// ========================================

struct OpenLog {
    file: tokio::fs::File,
    filename: String,
    filepath: PathBuf,
    record_count: u64,
}

/// File-backed writer, one `.jsonl` per session
pub struct JsonlSensorWriter {
    logs: Mutex<HashMap<String, OpenLog>>,
}

impl JsonlSensorWriter {
    pub fn new() -> Self {
        Self {
            logs: Mutex::new(HashMap::new()),
        }
    }
}

impl Default for JsonlSensorWriter {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SensorLogWriter for JsonlSensorWriter {
    async fn start(&self, session_id: &str, output_dir: &Path) -> crate::Result<()> {
        let mut logs = self.logs.lock().await;
        if logs.contains_key(session_id) {
            return Err(crate::Error::Conflict(format!(
                "sensor log already open for session {}",
                session_id
            )));
        }

        let short = &session_id[..session_id.len().min(8)];
        let filename = format!("sensors_{}.jsonl", short);
        let filepath = output_dir.join(&filename);
        tokio::fs::create_dir_all(output_dir).await?;
        let file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&filepath)
            .await?;

        tracing::info!(session_id = %session_id, file = %filepath.display(), "Sensor log opened");
        logs.insert(
            session_id.to_string(),
            OpenLog {
                file,
                filename,
                filepath,
                record_count: 0,
            },
        );
        Ok(())
    }

    async fn append(&self, session_id: &str, record: serde_json::Value) -> crate::Result<()> {
        let mut logs = self.logs.lock().await;
        let log = logs.get_mut(session_id).ok_or_else(|| {
            crate::Error::NotFound(format!("no sensor log for session {}", session_id))
        })?;

        let mut line = serde_json::to_vec(&record)?;
        line.push(b'\n');
        log.file.write_all(&line).await?;
        log.record_count += 1;
        Ok(())
    }

    async fn stop(&self, session_id: &str) -> crate::Result<SensorLogSummary> {
        let mut logs = self.logs.lock().await;
        let mut log = logs.remove(session_id).ok_or_else(|| {
            crate::Error::NotFound(format!("no sensor log for session {}", session_id))
        })?;

        log.file.flush().await?;
        tracing::info!(
            session_id = %session_id,
            records = log.record_count,
            "Sensor log closed"
        );
        Ok(SensorLogSummary {
            filename: log.filename,
            filepath: log.filepath,
            record_count: log.record_count,
        })
    }
}

// ========================================
// HTTP trigger
// ========================================

/// Talks to the sensor unit's HTTP control surface
pub struct HttpSensorTrigger {
    http: Client,
    base_url: String,
}

impl HttpSensorTrigger {
    pub fn new(base_url: impl Into<String>) -> Self {
        let http = Client::builder()
            .timeout(Duration::from_secs(10))
            .connect_timeout(Duration::from_secs(5))
            .build()
            .unwrap_or_default();
        Self {
            http,
            base_url: base_url.into(),
        }
    }

    async fn post_switch(&self, action: &str, camera_id: &str) -> crate::Result<()> {
        let url = format!("{}/api/recording/{}", self.base_url.trim_end_matches('/'), action);
        let response = self
            .http
            .post(&url)
            .json(&json!({ "cameraId": camera_id }))
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(crate::Error::Sensor(format!(
                "sensor unit returned {} for {}",
                response.status(),
                action
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl SensorTrigger for HttpSensorTrigger {
    async fn enable_recording(&self, camera_id: &str) -> crate::Result<()> {
        tracing::debug!(camera_id = %camera_id, "Enabling sensor capture");
        self.post_switch("enable", camera_id).await
    }

    async fn disable_recording(&self, camera_id: &str) -> crate::Result<()> {
        tracing::debug!(camera_id = %camera_id, "Disabling sensor capture");
        self.post_switch("disable", camera_id).await
    }
}
