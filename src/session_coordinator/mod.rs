//! SessionCoordinator - Synchronized Recording Sessions
//!
//! Binds one video capture session and one sensor log under a shared
//! session id and master timestamp. Video and sensor capture start
//! sequentially, so instead of pretending they are simultaneous the
//! coordinator measures each one's wall-clock offset from the master
//! timestamp and records both, plus their delta, in the manifest.
//!
//! Partial startup failure rolls back whatever already started; a
//! session either exists with all sub-resources live or not at all.

pub mod manifest;

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::recording_supervisor::session::{CameraSource, SessionStatus};
use crate::recording_supervisor::{RecordingSupervisor, StartOptions};
use crate::sensor_gateway::{SensorLogSummary, SensorLogWriter, SensorTrigger};
use manifest::{Manifest, ManifestInput};

/// Session start options
#[derive(Debug, Clone, Default)]
pub struct SessionOptions {
    pub scenario_id: Option<String>,
    pub scenario_name: Option<String>,
}

/// Result of a start call
#[derive(Debug, Clone, Serialize)]
pub struct StartSessionOutcome {
    pub success: bool,
    pub session_id: Option<String>,
    pub master_timestamp: Option<DateTime<Utc>>,
    pub error: Option<String>,
}

impl StartSessionOutcome {
    fn failed(error: impl Into<String>) -> Self {
        Self {
            success: false,
            session_id: None,
            master_timestamp: None,
            error: Some(error.into()),
        }
    }
}

/// Result of a stop call
#[derive(Debug, Clone)]
pub struct StopSessionReport {
    pub manifest: Manifest,
    pub manifest_path: PathBuf,
}

/// Read-only session snapshot with live duration
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionStatusView {
    pub session_id: String,
    pub camera_id: String,
    pub camera_name: String,
    pub scenario_name: Option<String>,
    pub status: SessionStatus,
    pub master_timestamp: DateTime<Utc>,
    pub duration_seconds: i64,
    pub video_offset_ms: i64,
    pub sensor_offset_ms: i64,
    pub segment_count: usize,
    pub reconnect_attempts: u32,
}

/// Coordinator-side session state
#[derive(Debug, Clone)]
struct ActiveSession {
    session_id: String,
    camera_name: String,
    scenario_id: Option<String>,
    scenario_name: Option<String>,
    master_timestamp: DateTime<Utc>,
    video_offset_ms: i64,
    sensor_offset_ms: i64,
    output_dir: PathBuf,
}

/// SessionCoordinator instance
pub struct SessionCoordinator {
    supervisor: Arc<RecordingSupervisor>,
    sensor_writer: Arc<dyn SensorLogWriter>,
    sensor_trigger: Arc<dyn SensorTrigger>,
    /// Active sessions keyed by camera id
    active: RwLock<HashMap<String, ActiveSession>>,
}

impl SessionCoordinator {
    pub fn new(
        supervisor: Arc<RecordingSupervisor>,
        sensor_writer: Arc<dyn SensorLogWriter>,
        sensor_trigger: Arc<dyn SensorTrigger>,
    ) -> Self {
        Self {
            supervisor,
            sensor_writer,
            sensor_trigger,
            active: RwLock::new(HashMap::new()),
        }
    }

    /// Start a synchronized session for a camera
    ///
    /// Rejects a duplicate active session. On partial failure every
    /// sub-resource that already started is torn down before returning.
    pub async fn start_session(
        &self,
        camera: &CameraSource,
        opts: SessionOptions,
    ) -> crate::Result<StartSessionOutcome> {
        if self.active.read().await.contains_key(&camera.camera_id) {
            tracing::warn!(camera_id = %camera.camera_id, "Session already active, rejecting start");
            return Ok(StartSessionOutcome::failed(format!(
                "session already active for camera {}",
                camera.camera_id
            )));
        }

        let session_id = uuid::Uuid::new_v4().to_string();
        let master_timestamp = Utc::now();

        // Video first
        let start = self
            .supervisor
            .start(
                camera,
                StartOptions {
                    scenario_id: opts.scenario_id.clone(),
                    scenario_name: opts.scenario_name.clone(),
                    session_id: Some(session_id.clone()),
                    master_timestamp: Some(master_timestamp),
                },
            )
            .await?;
        let Some(video_session) = start.session.filter(|_| start.success) else {
            return Ok(StartSessionOutcome::failed(format!(
                "video capture already active for camera {}",
                camera.camera_id
            )));
        };
        let video_offset_ms = video_session.video_start_offset_ms;
        let output_dir = video_session.output_dir.clone();

        // Sensor log second; its offset is necessarily later
        if let Err(e) = self.sensor_writer.start(&session_id, &output_dir).await {
            tracing::error!(
                camera_id = %camera.camera_id,
                session_id = %session_id,
                error = %e,
                "Sensor log start failed, rolling back video capture"
            );
            self.rollback_video(&camera.camera_id).await;
            return Ok(StartSessionOutcome::failed(format!(
                "sensor log start failed: {}",
                e
            )));
        }
        let sensor_offset_ms = (Utc::now() - master_timestamp).num_milliseconds();

        if let Err(e) = self.sensor_trigger.enable_recording(&camera.camera_id).await {
            tracing::error!(
                camera_id = %camera.camera_id,
                session_id = %session_id,
                error = %e,
                "Sensor trigger failed, rolling back session"
            );
            if let Err(e) = self.sensor_writer.stop(&session_id).await {
                tracing::warn!(session_id = %session_id, error = %e, "Sensor log rollback failed");
            }
            self.rollback_video(&camera.camera_id).await;
            return Ok(StartSessionOutcome::failed(format!(
                "sensor trigger failed: {}",
                e
            )));
        }

        self.active.write().await.insert(
            camera.camera_id.clone(),
            ActiveSession {
                session_id: session_id.clone(),
                camera_name: camera.name.clone(),
                scenario_id: opts.scenario_id,
                scenario_name: opts.scenario_name,
                master_timestamp,
                video_offset_ms,
                sensor_offset_ms,
                output_dir,
            },
        );

        tracing::info!(
            camera_id = %camera.camera_id,
            session_id = %session_id,
            video_offset_ms,
            sensor_offset_ms,
            "Session started"
        );

        Ok(StartSessionOutcome {
            success: true,
            session_id: Some(session_id),
            master_timestamp: Some(master_timestamp),
            error: None,
        })
    }

    /// Stop a session and write its manifest
    ///
    /// Both sub-resources are stopped even if one fails; the manifest is
    /// generated from whatever was recovered.
    pub async fn stop_session(&self, camera_id: &str) -> crate::Result<StopSessionReport> {
        let active = self
            .active
            .write()
            .await
            .remove(camera_id)
            .ok_or_else(|| {
                crate::Error::NotFound(format!("no active session for camera {}", camera_id))
            })?;

        if let Err(e) = self.sensor_trigger.disable_recording(camera_id).await {
            tracing::warn!(camera_id = %camera_id, error = %e, "Sensor trigger disable failed");
        }

        let sensors: Option<SensorLogSummary> =
            match self.sensor_writer.stop(&active.session_id).await {
                Ok(summary) => Some(summary),
                Err(e) => {
                    tracing::warn!(session_id = %active.session_id, error = %e, "Sensor log stop failed");
                    None
                }
            };

        let (segments, frames_processed, output_dir) =
            match self.supervisor.stop(camera_id).await {
                Ok(outcome) => (
                    outcome.segments,
                    outcome.frames_processed,
                    outcome.session.output_dir,
                ),
                Err(e) => {
                    // Already gone (abandoned); manifest still gets written
                    tracing::warn!(camera_id = %camera_id, error = %e, "Video capture stop failed");
                    (Vec::new(), 0, active.output_dir.clone())
                }
            };

        let end_time = Utc::now();
        let manifest = Manifest::build(ManifestInput {
            session_id: &active.session_id,
            camera_id,
            camera_name: &active.camera_name,
            scenario_id: active.scenario_id.as_deref(),
            scenario_name: active.scenario_name.as_deref(),
            master_timestamp: active.master_timestamp,
            end_time,
            video_offset_ms: active.video_offset_ms,
            sensor_offset_ms: active.sensor_offset_ms,
            segments: &segments,
            frames_processed,
            sensors: sensors.as_ref(),
        });
        let manifest_path = manifest.write_to(&output_dir).await?;

        tracing::info!(
            camera_id = %camera_id,
            session_id = %active.session_id,
            duration_seconds = manifest.timing.duration_seconds,
            manifest = %manifest_path.display(),
            "Session stopped, manifest written"
        );

        Ok(StopSessionReport {
            manifest,
            manifest_path,
        })
    }

    /// Append a sensor sample to the session active for a camera
    pub async fn record_sensor(
        &self,
        camera_id: &str,
        record: serde_json::Value,
    ) -> crate::Result<()> {
        let session_id = {
            let active = self.active.read().await;
            active
                .get(camera_id)
                .map(|s| s.session_id.clone())
                .ok_or_else(|| {
                    crate::Error::NotFound(format!("no active session for camera {}", camera_id))
                })?
        };
        self.sensor_writer.append(&session_id, record).await
    }

    /// Session snapshot for one camera
    pub async fn get_session_status(&self, camera_id: &str) -> Option<SessionStatusView> {
        let active = self.active.read().await.get(camera_id).cloned()?;
        Some(self.view_for(camera_id, &active).await)
    }

    /// Snapshots for all active sessions
    pub async fn get_all_sessions_status(&self) -> Vec<SessionStatusView> {
        let active: Vec<(String, ActiveSession)> = self
            .active
            .read()
            .await
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();

        let mut views = Vec::with_capacity(active.len());
        for (camera_id, session) in &active {
            views.push(self.view_for(camera_id, session).await);
        }
        views
    }

    /// Stop all active sessions (shutdown path)
    pub async fn stop_all(&self) {
        let camera_ids: Vec<String> = self.active.read().await.keys().cloned().collect();
        for camera_id in camera_ids {
            if let Err(e) = self.stop_session(&camera_id).await {
                tracing::error!(camera_id = %camera_id, error = %e, "Failed to stop session");
            }
        }
    }

    async fn view_for(&self, camera_id: &str, active: &ActiveSession) -> SessionStatusView {
        let video = self.supervisor.get_session(camera_id).await;
        SessionStatusView {
            session_id: active.session_id.clone(),
            camera_id: camera_id.to_string(),
            camera_name: active.camera_name.clone(),
            scenario_name: active.scenario_name.clone(),
            status: video
                .as_ref()
                .map(|s| s.status)
                .unwrap_or(SessionStatus::Failed),
            master_timestamp: active.master_timestamp,
            duration_seconds: (Utc::now() - active.master_timestamp).num_seconds(),
            video_offset_ms: active.video_offset_ms,
            sensor_offset_ms: active.sensor_offset_ms,
            segment_count: video.as_ref().map(|s| s.segments.len()).unwrap_or(0),
            reconnect_attempts: video.map(|s| s.reconnect_attempts).unwrap_or(0),
        }
    }

    async fn rollback_video(&self, camera_id: &str) {
        if let Err(e) = self.supervisor.stop(camera_id).await {
            tracing::error!(camera_id = %camera_id, error = %e, "Video rollback failed");
        }
    }
}
