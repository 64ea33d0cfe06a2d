//! ConfigStore Repository
//!
//! Database access layer for ConfigStore

use super::types::*;
use crate::error::{Error, Result};
use sqlx::MySqlPool;
use std::collections::HashMap;

/// ConfigStore repository for database operations
#[derive(Clone)]
pub struct ConfigRepository {
    pool: MySqlPool,
}

impl ConfigRepository {
    /// Create new repository
    pub fn new(pool: MySqlPool) -> Self {
        Self { pool }
    }

    // ========================================
    // Camera CRUD
    // ========================================

    const CAMERA_COLUMNS: &'static str = r#"
        camera_id, name, location,
        rtsp_main, rtsp_sub, rtsp_username, rtsp_password,
        enabled, recording_enabled, scenario_id, scenario_name, sort_order,
        deleted_at, created_at, updated_at
    "#;

    /// Get all cameras (excluding soft-deleted)
    pub async fn get_all_cameras(&self) -> Result<Vec<Camera>> {
        let query = format!(
            "SELECT {} FROM cameras WHERE deleted_at IS NULL ORDER BY sort_order, name",
            Self::CAMERA_COLUMNS
        );
        let cameras = sqlx::query_as::<_, Camera>(&query)
            .fetch_all(&self.pool)
            .await?;

        Ok(cameras)
    }

    /// Get cameras eligible for continuous recording
    pub async fn get_recording_cameras(&self) -> Result<Vec<Camera>> {
        let query = format!(
            "SELECT {} FROM cameras WHERE enabled = TRUE AND recording_enabled = TRUE AND deleted_at IS NULL ORDER BY sort_order, name",
            Self::CAMERA_COLUMNS
        );
        let cameras = sqlx::query_as::<_, Camera>(&query)
            .fetch_all(&self.pool)
            .await?;

        Ok(cameras)
    }

    /// Get camera by ID (including soft-deleted)
    pub async fn get_camera(&self, camera_id: &str) -> Result<Option<Camera>> {
        let query = format!(
            "SELECT {} FROM cameras WHERE camera_id = ?",
            Self::CAMERA_COLUMNS
        );
        let camera = sqlx::query_as::<_, Camera>(&query)
            .bind(camera_id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(camera)
    }

    /// Create camera
    pub async fn create_camera(&self, req: &CreateCameraRequest) -> Result<Camera> {
        let now = chrono::Utc::now();

        sqlx::query(
            r#"
            INSERT INTO cameras (
                camera_id, name, location,
                rtsp_main, rtsp_sub, rtsp_username, rtsp_password,
                scenario_id, scenario_name,
                enabled, recording_enabled, sort_order,
                created_at, updated_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, TRUE, TRUE, 0, ?, ?)
            "#,
        )
        .bind(&req.camera_id)
        .bind(&req.name)
        .bind(&req.location)
        .bind(&req.rtsp_main)
        .bind(&req.rtsp_sub)
        .bind(&req.rtsp_username)
        .bind(&req.rtsp_password)
        .bind(&req.scenario_id)
        .bind(&req.scenario_name)
        .bind(now)
        .bind(now)
        .execute(&self.pool)
        .await?;

        self.get_camera(&req.camera_id)
            .await?
            .ok_or(Error::NotFound("Camera not found after insert".to_string()))
    }

    /// Update camera - builds the SET list from present fields
    pub async fn update_camera(&self, camera_id: &str, req: &UpdateCameraRequest) -> Result<Camera> {
        let now = chrono::Utc::now();
        let mut set_clauses = vec!["updated_at = ?".to_string()];

        if req.name.is_some() { set_clauses.push("name = ?".to_string()); }
        if req.location.is_some() { set_clauses.push("location = ?".to_string()); }
        if req.rtsp_main.is_some() { set_clauses.push("rtsp_main = ?".to_string()); }
        if req.rtsp_sub.is_some() { set_clauses.push("rtsp_sub = ?".to_string()); }
        if req.rtsp_username.is_some() { set_clauses.push("rtsp_username = ?".to_string()); }
        if req.rtsp_password.is_some() { set_clauses.push("rtsp_password = ?".to_string()); }
        if req.enabled.is_some() { set_clauses.push("enabled = ?".to_string()); }
        if req.recording_enabled.is_some() { set_clauses.push("recording_enabled = ?".to_string()); }
        if req.scenario_id.is_some() { set_clauses.push("scenario_id = ?".to_string()); }
        if req.scenario_name.is_some() { set_clauses.push("scenario_name = ?".to_string()); }
        if req.sort_order.is_some() { set_clauses.push("sort_order = ?".to_string()); }

        let query = format!(
            "UPDATE cameras SET {} WHERE camera_id = ?",
            set_clauses.join(", ")
        );

        let mut q = sqlx::query(&query).bind(now);
        if let Some(v) = &req.name { q = q.bind(v); }
        if let Some(v) = &req.location { q = q.bind(v); }
        if let Some(v) = &req.rtsp_main { q = q.bind(v); }
        if let Some(v) = &req.rtsp_sub { q = q.bind(v); }
        if let Some(v) = &req.rtsp_username { q = q.bind(v); }
        if let Some(v) = &req.rtsp_password { q = q.bind(v); }
        if let Some(v) = req.enabled { q = q.bind(v); }
        if let Some(v) = req.recording_enabled { q = q.bind(v); }
        if let Some(v) = &req.scenario_id { q = q.bind(v); }
        if let Some(v) = &req.scenario_name { q = q.bind(v); }
        if let Some(v) = req.sort_order { q = q.bind(v); }

        q.bind(camera_id).execute(&self.pool).await?;

        self.get_camera(camera_id)
            .await?
            .ok_or(Error::NotFound(format!("Camera {} not found", camera_id)))
    }

    /// Soft delete camera
    pub async fn soft_delete_camera(&self, camera_id: &str) -> Result<()> {
        sqlx::query("UPDATE cameras SET deleted_at = ?, updated_at = ? WHERE camera_id = ?")
            .bind(chrono::Utc::now())
            .bind(chrono::Utc::now())
            .bind(camera_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    // ========================================
    // Settings (key -> JSON value)
    // ========================================

    /// Get all settings
    pub async fn get_all_settings(&self) -> Result<HashMap<String, serde_json::Value>> {
        let rows: Vec<(String, serde_json::Value)> =
            sqlx::query_as("SELECT setting_key, setting_value FROM settings")
                .fetch_all(&self.pool)
                .await?;

        Ok(rows.into_iter().collect())
    }

    /// Get one setting
    pub async fn get_setting(&self, key: &str) -> Result<Option<serde_json::Value>> {
        let row: Option<(serde_json::Value,)> =
            sqlx::query_as("SELECT setting_value FROM settings WHERE setting_key = ?")
                .bind(key)
                .fetch_optional(&self.pool)
                .await?;

        Ok(row.map(|(v,)| v))
    }

    /// Upsert one setting
    pub async fn set_setting(&self, key: &str, value: serde_json::Value) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO settings (setting_key, setting_value, updated_at)
            VALUES (?, ?, ?)
            ON DUPLICATE KEY UPDATE setting_value = VALUES(setting_value), updated_at = VALUES(updated_at)
            "#,
        )
        .bind(key)
        .bind(value)
        .bind(chrono::Utc::now())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    // ========================================
    // Session records
    // ========================================

    const SESSION_COLUMNS: &'static str = r#"
        session_id, camera_id, camera_name, scenario_id, scenario_name,
        master_timestamp, ended_at, duration_seconds, segment_count,
        frames_processed, manifest_path, status, created_at, updated_at
    "#;

    /// Insert an active session record
    pub async fn insert_session(&self, ins: &SessionInsert) -> Result<()> {
        let now = chrono::Utc::now();
        sqlx::query(
            r#"
            INSERT INTO recording_sessions (
                session_id, camera_id, camera_name, scenario_id, scenario_name,
                master_timestamp, status, created_at, updated_at
            ) VALUES (?, ?, ?, ?, ?, ?, 'recording', ?, ?)
            "#,
        )
        .bind(&ins.session_id)
        .bind(&ins.camera_id)
        .bind(&ins.camera_name)
        .bind(&ins.scenario_id)
        .bind(&ins.scenario_name)
        .bind(ins.master_timestamp)
        .bind(now)
        .bind(now)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Finalize a session record at stop
    pub async fn finalize_session(&self, fin: &SessionFinalize) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE recording_sessions
            SET ended_at = ?, duration_seconds = ?, segment_count = ?,
                frames_processed = ?, manifest_path = ?, status = ?, updated_at = ?
            WHERE session_id = ?
            "#,
        )
        .bind(fin.ended_at)
        .bind(fin.duration_seconds)
        .bind(fin.segment_count)
        .bind(fin.frames_processed)
        .bind(&fin.manifest_path)
        .bind(&fin.status)
        .bind(chrono::Utc::now())
        .bind(&fin.session_id)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Most recent sessions, newest first
    pub async fn list_recent_sessions(&self, limit: i64) -> Result<Vec<SessionRecord>> {
        let query = format!(
            "SELECT {} FROM recording_sessions ORDER BY master_timestamp DESC LIMIT ?",
            Self::SESSION_COLUMNS
        );
        let records = sqlx::query_as::<_, SessionRecord>(&query)
            .bind(limit)
            .fetch_all(&self.pool)
            .await?;

        Ok(records)
    }
}
