//! ConfigStore types

use crate::recording_supervisor::session::CameraSource;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// Camera record (single source of truth for camera inventory)
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Camera {
    pub camera_id: String,
    pub name: String,
    pub location: Option<String>,
    pub rtsp_main: Option<String>,
    pub rtsp_sub: Option<String>,
    pub rtsp_username: Option<String>,
    pub rtsp_password: Option<String>,
    pub enabled: bool,
    pub recording_enabled: bool,
    pub scenario_id: Option<String>,
    pub scenario_name: Option<String>,
    pub sort_order: i32,
    pub deleted_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Camera {
    /// Capture source for the main stream
    pub fn to_source(&self) -> crate::Result<CameraSource> {
        let uri = self
            .rtsp_main
            .clone()
            .or_else(|| self.rtsp_sub.clone())
            .ok_or_else(|| {
                crate::Error::Validation(format!("camera {} has no capture URI", self.camera_id))
            })?;
        Ok(CameraSource {
            camera_id: self.camera_id.clone(),
            name: self.name.clone(),
            uri,
            username: self.rtsp_username.clone(),
            password: self.rtsp_password.clone(),
        })
    }
}

/// Camera creation request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateCameraRequest {
    pub camera_id: String,
    pub name: String,
    pub location: Option<String>,
    pub rtsp_main: Option<String>,
    pub rtsp_sub: Option<String>,
    pub rtsp_username: Option<String>,
    pub rtsp_password: Option<String>,
    pub scenario_id: Option<String>,
    pub scenario_name: Option<String>,
}

/// Camera update request (partial)
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UpdateCameraRequest {
    pub name: Option<String>,
    pub location: Option<String>,
    pub rtsp_main: Option<String>,
    pub rtsp_sub: Option<String>,
    pub rtsp_username: Option<String>,
    pub rtsp_password: Option<String>,
    pub enabled: Option<bool>,
    pub recording_enabled: Option<bool>,
    pub scenario_id: Option<String>,
    pub scenario_name: Option<String>,
    pub sort_order: Option<i32>,
}

/// Storage threshold settings (settings key: "storage")
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageSettings {
    pub warning_percent: f64,
    pub critical_percent: f64,
    pub auto_cleanup_percent: f64,
    pub cleanup_target_percent: f64,
}

impl Default for StorageSettings {
    fn default() -> Self {
        Self {
            warning_percent: 80.0,
            critical_percent: 90.0,
            auto_cleanup_percent: 85.0,
            cleanup_target_percent: 75.0,
        }
    }
}

/// Supervisor settings (settings key: "supervisor")
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SupervisorSettings {
    pub segment_seconds: u32,
    pub auto_reconnect: bool,
    pub max_reconnect_attempts: u32,
    pub reconnect_base_ms: u64,
}

impl Default for SupervisorSettings {
    fn default() -> Self {
        Self {
            segment_seconds: 60,
            auto_reconnect: true,
            max_reconnect_attempts: 5,
            reconnect_base_ms: 5000,
        }
    }
}

/// Completed/active session record persisted for audit
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct SessionRecord {
    pub session_id: String,
    pub camera_id: String,
    pub camera_name: String,
    pub scenario_id: Option<String>,
    pub scenario_name: Option<String>,
    pub master_timestamp: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    pub duration_seconds: Option<i64>,
    pub segment_count: Option<i32>,
    pub frames_processed: Option<i64>,
    pub manifest_path: Option<String>,
    pub status: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Session insert payload
#[derive(Debug, Clone)]
pub struct SessionInsert {
    pub session_id: String,
    pub camera_id: String,
    pub camera_name: String,
    pub scenario_id: Option<String>,
    pub scenario_name: Option<String>,
    pub master_timestamp: DateTime<Utc>,
}

/// Session finalize payload
#[derive(Debug, Clone)]
pub struct SessionFinalize {
    pub session_id: String,
    pub ended_at: DateTime<Utc>,
    pub duration_seconds: i64,
    pub segment_count: i32,
    pub frames_processed: i64,
    pub manifest_path: Option<String>,
    pub status: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn camera() -> Camera {
        Camera {
            camera_id: "cam-01".to_string(),
            name: "Front Door".to_string(),
            location: None,
            rtsp_main: Some("rtsp://192.168.1.10/main".to_string()),
            rtsp_sub: Some("rtsp://192.168.1.10/sub".to_string()),
            rtsp_username: Some("viewer".to_string()),
            rtsp_password: None,
            enabled: true,
            recording_enabled: true,
            scenario_id: None,
            scenario_name: None,
            sort_order: 0,
            deleted_at: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn test_to_source_prefers_main_stream() {
        let source = camera().to_source().unwrap();
        assert_eq!(source.uri, "rtsp://192.168.1.10/main");
        assert_eq!(source.username.as_deref(), Some("viewer"));
    }

    #[test]
    fn test_to_source_falls_back_to_sub_stream() {
        let mut cam = camera();
        cam.rtsp_main = None;
        assert_eq!(cam.to_source().unwrap().uri, "rtsp://192.168.1.10/sub");

        cam.rtsp_sub = None;
        assert!(cam.to_source().is_err());
    }
}
