//! RecordingSupervisor - Continuous Capture Process Supervision
//!
//! ## Responsibilities
//!
//! - One segmented ffmpeg capture process per active camera session
//! - Health monitoring (unexpected exit, stale output) with a single
//!   failure handler for both causes
//! - Bounded linear-backoff reconnection; abandonment on budget exhaustion
//! - Rotated-segment detection and event emission
//!
//! Reconnect cancellation is explicit: each session registration carries a
//! generation number, and a pending reconnect timer no-ops unless the
//! session is still registered with the same generation at fire time.

pub mod capture;
pub mod session;

use crate::recorder_hub::{
    NewSegmentMessage, RecorderEvent, RecorderHub, RecordingAbandonedMessage,
    RecordingFailedMessage, RecordingStartedMessage, RecordingStoppedMessage,
};
use chrono::{DateTime, Utc};
use session::{
    parse_sequence, segment_pattern, session_output_dir, CameraSource, RecordingSession,
    SegmentFile, SessionStatus,
};
use std::collections::HashMap;
use std::future::Future;
use std::path::PathBuf;
use std::pin::Pin;
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::{Mutex, RwLock};

/// Supervisor configuration
#[derive(Debug, Clone)]
pub struct SupervisorConfig {
    /// Root of the recordings tree
    pub recordings_dir: PathBuf,
    /// Capture binary (ffmpeg)
    pub ffmpeg_bin: String,
    /// Segment rotation interval in seconds
    pub segment_seconds: u32,
    /// Grace period for a graceful quit before force kill
    pub stop_grace_ms: u64,
    /// Health check interval in seconds
    pub health_interval_secs: u64,
    /// A session with no capture output for this long is unhealthy
    pub stale_after_secs: u64,
    /// Reconnect automatically on unexpected failure
    pub auto_reconnect: bool,
    /// Reconnect attempt budget before abandonment
    pub max_reconnect_attempts: u32,
    /// Base reconnect delay in milliseconds (linear backoff)
    pub reconnect_base_ms: u64,
    /// Multiplier cap for linear backoff: base * min(attempts, cap)
    pub reconnect_attempt_cap: u32,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            recordings_dir: PathBuf::from("/var/lib/is24/recordings"),
            ffmpeg_bin: "ffmpeg".to_string(),
            segment_seconds: 60,
            stop_grace_ms: 5000,
            health_interval_secs: 10,
            stale_after_secs: 30,
            auto_reconnect: true,
            max_reconnect_attempts: 5,
            reconnect_base_ms: 5000,
            reconnect_attempt_cap: 6,
        }
    }
}

/// Session start options
#[derive(Debug, Clone, Default)]
pub struct StartOptions {
    pub scenario_id: Option<String>,
    pub scenario_name: Option<String>,
    /// Externally assigned session id (SessionCoordinator); generated if unset
    pub session_id: Option<String>,
    /// Externally assigned master timestamp; now() if unset
    pub master_timestamp: Option<DateTime<Utc>>,
}

/// Result of a start call
#[derive(Debug, Clone)]
pub struct StartOutcome {
    /// false when a session was already active for the camera (no-op)
    pub success: bool,
    pub session: Option<RecordingSession>,
}

/// Result of a stop call
#[derive(Debug, Clone)]
pub struct StopOutcome {
    pub session: RecordingSession,
    pub duration_seconds: i64,
    pub frames_processed: u64,
    pub segments: Vec<SegmentFile>,
}

/// Spawned capture process handle
struct CaptureChild {
    child: Child,
    generation: u64,
}

/// RecordingSupervisor instance
pub struct RecordingSupervisor {
    config: SupervisorConfig,
    hub: Arc<RecorderHub>,
    /// Active sessions keyed by camera id
    sessions: RwLock<HashMap<String, RecordingSession>>,
    /// Live capture processes keyed by camera id (absent while a reconnect
    /// is pending)
    children: Mutex<HashMap<String, CaptureChild>>,
    generation_seq: AtomicU64,
    monitor_running: AtomicBool,
}

impl RecordingSupervisor {
    /// Create new RecordingSupervisor
    pub fn new(config: SupervisorConfig, hub: Arc<RecorderHub>) -> Self {
        Self {
            config,
            hub,
            sessions: RwLock::new(HashMap::new()),
            children: Mutex::new(HashMap::new()),
            generation_seq: AtomicU64::new(1),
            monitor_running: AtomicBool::new(false),
        }
    }

    pub fn config(&self) -> &SupervisorConfig {
        &self.config
    }

    /// Linear capped backoff: base * min(attempts, cap)
    pub fn reconnect_delay(&self, attempts: u32) -> Duration {
        let factor = attempts.min(self.config.reconnect_attempt_cap).max(1) as u64;
        Duration::from_millis(self.config.reconnect_base_ms * factor)
    }

    /// Start a continuous recording for a camera
    ///
    /// No-ops with `success: false` when a session is already active for
    /// the camera; no new process is spawned in that case.
    pub async fn start(
        self: &Arc<Self>,
        camera: &CameraSource,
        opts: StartOptions,
    ) -> crate::Result<StartOutcome> {
        if camera.camera_id.is_empty() {
            return Err(crate::Error::Validation("camera_id is required".to_string()));
        }

        let master_timestamp = opts.master_timestamp.unwrap_or_else(Utc::now);
        let session_id = opts
            .session_id
            .clone()
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
        let generation = self.generation_seq.fetch_add(1, Ordering::Relaxed);
        let output_dir = session_output_dir(
            &self.config.recordings_dir,
            opts.scenario_name.as_deref(),
            &camera.camera_id,
            master_timestamp,
        );

        // Register first so a concurrent start sees the session
        {
            let mut sessions = self.sessions.write().await;
            if let Some(existing) = sessions.get(&camera.camera_id) {
                tracing::warn!(
                    camera_id = %camera.camera_id,
                    session_id = %existing.session_id,
                    "Recording already active, ignoring start"
                );
                return Ok(StartOutcome {
                    success: false,
                    session: Some(existing.clone()),
                });
            }
            sessions.insert(
                camera.camera_id.clone(),
                RecordingSession::new(
                    session_id.clone(),
                    camera.clone(),
                    opts.scenario_id.clone(),
                    opts.scenario_name.clone(),
                    master_timestamp,
                    generation,
                    output_dir.clone(),
                ),
            );
        }

        tokio::fs::create_dir_all(&output_dir).await?;

        let child = match self.spawn_capture(camera, opts.scenario_name.as_deref(), &output_dir) {
            Ok(child) => child,
            Err(e) => {
                self.sessions.write().await.remove(&camera.camera_id);
                return Err(e);
            }
        };

        let video_start_offset_ms = (Utc::now() - master_timestamp).num_milliseconds();

        {
            let mut sessions = self.sessions.write().await;
            match sessions.get_mut(&camera.camera_id) {
                Some(session) if session.generation == generation => {
                    session.video_start_offset_ms = video_start_offset_ms;
                    session.transition(SessionStatus::Recording)?;
                }
                _ => {
                    // Stopped while the process was spawning
                    tracing::warn!(
                        camera_id = %camera.camera_id,
                        "Session removed during startup, killing capture"
                    );
                    let mut child = child;
                    let _ = child.start_kill();
                    return Ok(StartOutcome {
                        success: false,
                        session: None,
                    });
                }
            }
        }

        self.register_child(&camera.camera_id, child, generation).await;

        tracing::info!(
            camera_id = %camera.camera_id,
            session_id = %session_id,
            output_dir = %output_dir.display(),
            "Recording started"
        );

        self.hub
            .broadcast(RecorderEvent::RecordingStarted(RecordingStartedMessage {
                session_id: session_id.clone(),
                camera_id: camera.camera_id.clone(),
                scenario_name: opts.scenario_name.clone(),
                output_dir: output_dir.display().to_string(),
                started_at: master_timestamp,
            }))
            .await;

        let session = self.get_session(&camera.camera_id).await;
        Ok(StartOutcome {
            success: true,
            session,
        })
    }

    /// Stop the recording for a camera
    ///
    /// The session is removed from the active set before teardown so the
    /// health monitor cannot race-reconnect it. Sends a graceful quit to
    /// the capture process, force-killing after the grace period.
    pub async fn stop(self: &Arc<Self>, camera_id: &str) -> crate::Result<StopOutcome> {
        let mut session = self
            .sessions
            .write()
            .await
            .remove(camera_id)
            .ok_or_else(|| {
                crate::Error::NotFound(format!("No active recording for camera {}", camera_id))
            })?;

        session.transition(SessionStatus::Stopping)?;

        let handle = self.children.lock().await.remove(camera_id);
        if let Some(mut handle) = handle {
            self.shutdown_child(&mut handle.child, camera_id).await;
        }

        // Final scan: every remaining file is closed now
        let discovered = scan_segment_files(&session.output_dir).await;
        for file in discovered {
            if !session.segments.iter().any(|s| s.path == file.path) {
                self.emit_segment(&session, &file).await;
                session.segments.push(file);
            }
        }
        session
            .segments
            .sort_by(|a, b| a.created_at.cmp(&b.created_at));

        let now = Utc::now();
        let duration_seconds = session.duration_seconds(now);
        session.transition(SessionStatus::Stopped)?;

        tracing::info!(
            camera_id = %camera_id,
            session_id = %session.session_id,
            duration_seconds = duration_seconds,
            segments = session.segments.len(),
            "Recording stopped"
        );

        self.hub
            .broadcast(RecorderEvent::RecordingStopped(RecordingStoppedMessage {
                session_id: session.session_id.clone(),
                camera_id: camera_id.to_string(),
                duration_seconds,
                segment_count: session.segments.len(),
                frames_processed: session.frames_processed,
            }))
            .await;

        let frames_processed = session.frames_processed;
        let segments = session.segments.clone();
        Ok(StopOutcome {
            session,
            duration_seconds,
            frames_processed,
            segments,
        })
    }

    /// Get a session snapshot
    pub async fn get_session(&self, camera_id: &str) -> Option<RecordingSession> {
        self.sessions.read().await.get(camera_id).cloned()
    }

    /// Get all session snapshots
    pub async fn list_sessions(&self) -> Vec<RecordingSession> {
        self.sessions.read().await.values().cloned().collect()
    }

    /// Whether a session is active for the camera
    pub async fn is_active(&self, camera_id: &str) -> bool {
        self.sessions.read().await.contains_key(camera_id)
    }

    /// Run one health pass over all sessions
    ///
    /// Checks for a given camera are serialized by this single loop. A
    /// session without a live child (reconnect pending) is skipped.
    pub async fn health_tick(self: &Arc<Self>) {
        let camera_ids: Vec<String> = self.sessions.read().await.keys().cloned().collect();

        for camera_id in camera_ids {
            let session_generation = {
                let mut sessions = self.sessions.write().await;
                match sessions.get_mut(&camera_id) {
                    Some(session) => {
                        session.health_checks += 1;
                        session.generation
                    }
                    None => continue,
                }
            };

            // Unexpected exit?
            let exited = {
                let mut children = self.children.lock().await;
                match children.get_mut(&camera_id) {
                    None => continue, // reconnect pending
                    Some(handle) if handle.generation != session_generation => {
                        // Orphan handle from a replaced registration
                        if let Some(mut orphan) = children.remove(&camera_id) {
                            let _ = orphan.child.start_kill();
                        }
                        continue;
                    }
                    Some(handle) => match handle.child.try_wait() {
                        Ok(Some(status)) => {
                            children.remove(&camera_id);
                            Some(format!("capture exited unexpectedly ({})", status))
                        }
                        Ok(None) => None,
                        Err(e) => {
                            children.remove(&camera_id);
                            Some(format!("capture wait failed: {}", e))
                        }
                    },
                }
            };

            if let Some(reason) = exited {
                self.handle_failure(&camera_id, reason).await;
                continue;
            }

            // Segment rotation scan (also feeds the staleness clock)
            self.scan_session_segments(&camera_id).await;

            // Stale output?
            let stale = {
                let sessions = self.sessions.read().await;
                sessions.get(&camera_id).map(|session| {
                    let silent = (Utc::now() - session.last_output_at).num_seconds();
                    silent > self.config.stale_after_secs as i64
                })
            };

            if stale == Some(true) {
                if let Some(mut handle) = self.children.lock().await.remove(&camera_id) {
                    let _ = handle.child.start_kill();
                    let _ = handle.child.wait().await;
                }
                self.handle_failure(
                    &camera_id,
                    format!(
                        "no capture output for more than {}s",
                        self.config.stale_after_secs
                    ),
                )
                .await;
            }
        }
    }

    /// Start the periodic health monitor loop
    pub fn start_monitor(self: &Arc<Self>) {
        if self.monitor_running.swap(true, Ordering::SeqCst) {
            tracing::warn!("Health monitor already running");
            return;
        }

        let supervisor = self.clone();
        tokio::spawn(async move {
            let mut interval =
                tokio::time::interval(Duration::from_secs(supervisor.config.health_interval_secs));
            tracing::info!("Recording health monitor started");
            loop {
                interval.tick().await;
                if !supervisor.monitor_running.load(Ordering::SeqCst) {
                    break;
                }
                supervisor.health_tick().await;
            }
            tracing::info!("Recording health monitor stopped");
        });
    }

    /// Stop the health monitor loop
    pub fn stop_monitor(&self) {
        self.monitor_running.store(false, Ordering::SeqCst);
    }

    /// Stop all active sessions (shutdown path)
    pub async fn stop_all(self: &Arc<Self>) {
        let camera_ids: Vec<String> = self.sessions.read().await.keys().cloned().collect();
        for camera_id in camera_ids {
            if let Err(e) = self.stop(&camera_id).await {
                tracing::error!(camera_id = %camera_id, error = %e, "Failed to stop recording");
            }
        }
    }

    // ========================================
    // Internal
    // ========================================

    fn spawn_capture(
        self: &Arc<Self>,
        camera: &CameraSource,
        scenario_name: Option<&str>,
        output_dir: &std::path::Path,
    ) -> crate::Result<Child> {
        let pattern = output_dir.join(segment_pattern(scenario_name, &camera.name, Utc::now()));
        let uri = capture::capture_uri(camera);
        let args = capture::capture_args(
            &uri,
            self.config.segment_seconds,
            &pattern.display().to_string(),
        );

        Command::new(&self.config.ffmpeg_bin)
            .args(&args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| crate::Error::Capture(format!("capture spawn failed: {}", e)))
    }

    /// Store the child handle and attach progress/error readers
    async fn register_child(self: &Arc<Self>, camera_id: &str, mut child: Child, generation: u64) {
        if let Some(stdout) = child.stdout.take() {
            let supervisor = self.clone();
            let camera_id = camera_id.to_string();
            tokio::spawn(async move {
                let mut lines = BufReader::new(stdout).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    if let Some(frames) = parse_progress_frames(&line) {
                        let mut sessions = supervisor.sessions.write().await;
                        if let Some(session) = sessions.get_mut(&camera_id) {
                            if session.generation == generation {
                                session.frames_processed = frames;
                                session.last_output_at = Utc::now();
                            }
                        }
                    }
                }
            });
        }

        if let Some(stderr) = child.stderr.take() {
            let supervisor = self.clone();
            let camera_id = camera_id.to_string();
            tokio::spawn(async move {
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    if line.trim().is_empty() {
                        continue;
                    }
                    tracing::warn!(camera_id = %camera_id, "capture: {}", line);
                    let mut sessions = supervisor.sessions.write().await;
                    if let Some(session) = sessions.get_mut(&camera_id) {
                        if session.generation == generation {
                            session.push_error(line);
                        }
                    }
                }
            });
        }

        self.children
            .lock()
            .await
            .insert(camera_id.to_string(), CaptureChild { child, generation });
    }

    /// Graceful quit with bounded grace, force kill on timeout
    async fn shutdown_child(&self, child: &mut Child, camera_id: &str) {
        if let Some(mut stdin) = child.stdin.take() {
            let _ = stdin.write_all(b"q\n").await;
            let _ = stdin.flush().await;
        }

        let grace = Duration::from_millis(self.config.stop_grace_ms);
        match tokio::time::timeout(grace, child.wait()).await {
            Ok(Ok(status)) => {
                tracing::debug!(camera_id = %camera_id, status = %status, "Capture exited gracefully");
            }
            Ok(Err(e)) => {
                tracing::warn!(camera_id = %camera_id, error = %e, "Capture wait failed");
            }
            Err(_) => {
                tracing::warn!(
                    camera_id = %camera_id,
                    grace_ms = self.config.stop_grace_ms,
                    "Graceful quit timed out, force killing capture"
                );
                let _ = child.start_kill();
                let _ = child.wait().await;
            }
        }
    }

    /// Single failure handler for unexpected exit and stale output
    ///
    /// Boxed: the reconnect path awaits this handler again, so the future
    /// type must be erased to stay finite.
    fn handle_failure<'a>(
        self: &'a Arc<Self>,
        camera_id: &'a str,
        reason: String,
    ) -> Pin<Box<dyn Future<Output = ()> + Send + 'a>> {
        Box::pin(self.handle_failure_inner(camera_id, reason))
    }

    async fn handle_failure_inner(self: &Arc<Self>, camera_id: &str, reason: String) {
        let decision = {
            let mut sessions = self.sessions.write().await;
            let Some(session) = sessions.get_mut(camera_id) else {
                return; // stopped concurrently
            };
            session.push_error(reason.clone());

            if self.config.auto_reconnect
                && session.reconnect_attempts < self.config.max_reconnect_attempts
            {
                session.reconnect_attempts += 1;
                Some((
                    session.session_id.clone(),
                    session.reconnect_attempts,
                    session.generation,
                ))
            } else {
                let total = session.reconnect_attempts;
                let session_id = session.session_id.clone();
                let last_error = session.errors().last().cloned();
                sessions.remove(camera_id);
                drop(sessions);

                tracing::error!(
                    camera_id = %camera_id,
                    session_id = %session_id,
                    total_attempts = total,
                    reason = %reason,
                    "Recording abandoned"
                );
                self.hub
                    .broadcast(RecorderEvent::RecordingAbandoned(
                        RecordingAbandonedMessage {
                            session_id,
                            camera_id: camera_id.to_string(),
                            total_attempts: total,
                            last_error,
                        },
                    ))
                    .await;
                return;
            }
        };

        if let Some((session_id, attempt, generation)) = decision {
            let delay = self.reconnect_delay(attempt);
            tracing::warn!(
                camera_id = %camera_id,
                session_id = %session_id,
                attempt = attempt,
                retry_in_ms = delay.as_millis() as u64,
                reason = %reason,
                "Capture failed, reconnect scheduled"
            );
            self.hub
                .broadcast(RecorderEvent::RecordingFailed(RecordingFailedMessage {
                    session_id,
                    camera_id: camera_id.to_string(),
                    reason,
                    reconnect_attempt: attempt,
                    retry_in_seconds: Some(delay.as_secs()),
                }))
                .await;

            let supervisor = self.clone();
            let camera_id = camera_id.to_string();
            tokio::spawn(async move {
                tokio::time::sleep(delay).await;
                supervisor.try_reconnect(&camera_id, generation).await;
            });
        }
    }

    /// Reconnect timer body; no-ops unless the same session registration
    /// (camera id + generation) is still present
    async fn try_reconnect(self: &Arc<Self>, camera_id: &str, generation: u64) {
        let session = {
            let sessions = self.sessions.read().await;
            match sessions.get(camera_id) {
                Some(s) if s.generation == generation => s.clone(),
                _ => {
                    tracing::debug!(
                        camera_id = %camera_id,
                        generation = generation,
                        "Stale reconnect timer, ignoring"
                    );
                    return;
                }
            }
        };

        // Day may have rolled over since the session started
        let output_dir = session_output_dir(
            &self.config.recordings_dir,
            session.scenario_name.as_deref(),
            camera_id,
            Utc::now(),
        );
        if let Err(e) = tokio::fs::create_dir_all(&output_dir).await {
            self.handle_failure(camera_id, format!("reconnect dir create failed: {}", e))
                .await;
            return;
        }

        match self.spawn_capture(&session.camera, session.scenario_name.as_deref(), &output_dir) {
            Ok(child) => {
                {
                    let mut sessions = self.sessions.write().await;
                    if let Some(s) = sessions.get_mut(camera_id) {
                        if s.generation != generation {
                            return;
                        }
                        s.output_dir = output_dir;
                        s.last_output_at = Utc::now();
                    } else {
                        return;
                    }
                }
                self.register_child(camera_id, child, generation).await;
                tracing::info!(
                    camera_id = %camera_id,
                    session_id = %session.session_id,
                    attempt = session.reconnect_attempts,
                    "Capture reconnected"
                );
            }
            Err(e) => {
                self.handle_failure(camera_id, format!("reconnect spawn failed: {}", e))
                    .await;
            }
        }
    }

    /// Detect rotated segments for one session and emit events
    ///
    /// The newest file is the open segment and is never reported; it is
    /// picked up by the final scan at stop.
    async fn scan_session_segments(self: &Arc<Self>, camera_id: &str) {
        let (output_dir, known): (PathBuf, Vec<PathBuf>) = {
            let sessions = self.sessions.read().await;
            match sessions.get(camera_id) {
                Some(s) => (
                    s.output_dir.clone(),
                    s.segments.iter().map(|f| f.path.clone()).collect(),
                ),
                None => return,
            }
        };

        let mut discovered = scan_segment_files(&output_dir).await;
        if discovered.len() < 2 {
            return;
        }
        discovered.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        // Drop the open segment
        discovered.pop();

        let fresh: Vec<SegmentFile> = discovered
            .into_iter()
            .filter(|f| !known.contains(&f.path))
            .collect();
        if fresh.is_empty() {
            return;
        }

        let snapshot = {
            let mut sessions = self.sessions.write().await;
            match sessions.get_mut(camera_id) {
                Some(session) => {
                    for file in &fresh {
                        session.segments.push(file.clone());
                    }
                    session.last_output_at = Utc::now();
                    session.clone()
                }
                None => return,
            }
        };

        for file in fresh {
            self.emit_segment(&snapshot, &file).await;
        }
    }

    async fn emit_segment(&self, session: &RecordingSession, file: &SegmentFile) {
        tracing::debug!(
            camera_id = %session.camera.camera_id,
            session_id = %session.session_id,
            path = %file.path.display(),
            sequence = file.sequence,
            size_bytes = file.size_bytes,
            "Segment rotated"
        );
        self.hub
            .broadcast(RecorderEvent::NewSegment(NewSegmentMessage {
                session_id: session.session_id.clone(),
                camera_id: session.camera.camera_id.clone(),
                path: file.path.display().to_string(),
                sequence: file.sequence,
                size_bytes: file.size_bytes,
            }))
            .await;
    }
}

/// Parse `frame=N` progress lines from the capture process
fn parse_progress_frames(line: &str) -> Option<u64> {
    let rest = line.strip_prefix("frame=")?;
    rest.trim().parse().ok()
}

/// List segment files in a session directory
async fn scan_segment_files(dir: &std::path::Path) -> Vec<SegmentFile> {
    let mut files = Vec::new();
    let Ok(mut entries) = tokio::fs::read_dir(dir).await else {
        return files;
    };

    while let Ok(Some(entry)) = entries.next_entry().await {
        let path = entry.path();
        if path.extension().and_then(|e| e.to_str()) != Some("mp4") {
            continue;
        }
        let Ok(meta) = entry.metadata().await else {
            continue;
        };
        let created_at = meta
            .modified()
            .map(DateTime::<Utc>::from)
            .unwrap_or_else(|_| Utc::now());
        files.push(SegmentFile {
            sequence: parse_sequence(&path).unwrap_or(0),
            path,
            size_bytes: meta.len(),
            created_at,
        });
    }

    files
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::os::unix::fs::PermissionsExt;
    use tempfile::TempDir;

    fn stub_bin(dir: &std::path::Path, body: &str) -> String {
        let path = dir.join("fake-capture");
        std::fs::write(&path, format!("#!/bin/sh\n{}\n", body)).unwrap();
        let mut perms = std::fs::metadata(&path).unwrap().permissions();
        perms.set_mode(0o755);
        std::fs::set_permissions(&path, perms).unwrap();
        path.display().to_string()
    }

    fn camera() -> CameraSource {
        CameraSource {
            camera_id: "cam-01".to_string(),
            name: "Front Door".to_string(),
            uri: "rtsp://192.168.1.10/stream1".to_string(),
            username: None,
            password: None,
        }
    }

    fn supervisor_with(
        tmp: &TempDir,
        script: &str,
        tune: impl FnOnce(&mut SupervisorConfig),
    ) -> Arc<RecordingSupervisor> {
        let mut config = SupervisorConfig {
            recordings_dir: tmp.path().join("recordings"),
            ffmpeg_bin: stub_bin(tmp.path(), script),
            stop_grace_ms: 200,
            ..SupervisorConfig::default()
        };
        tune(&mut config);
        Arc::new(RecordingSupervisor::new(
            config,
            Arc::new(RecorderHub::new()),
        ))
    }

    #[test]
    fn test_reconnect_delay_linear_capped() {
        let hub = Arc::new(RecorderHub::new());
        let config = SupervisorConfig {
            reconnect_base_ms: 1000,
            reconnect_attempt_cap: 3,
            ..SupervisorConfig::default()
        };
        let supervisor = RecordingSupervisor::new(config, hub);

        assert_eq!(supervisor.reconnect_delay(1), Duration::from_millis(1000));
        assert_eq!(supervisor.reconnect_delay(2), Duration::from_millis(2000));
        assert_eq!(supervisor.reconnect_delay(3), Duration::from_millis(3000));
        // Capped
        assert_eq!(supervisor.reconnect_delay(7), Duration::from_millis(3000));
    }

    #[tokio::test]
    async fn test_duplicate_start_is_noop() {
        let tmp = TempDir::new().unwrap();
        let supervisor = supervisor_with(&tmp, "sleep 30", |_| {});

        let first = supervisor
            .start(&camera(), StartOptions::default())
            .await
            .unwrap();
        assert!(first.success);

        let second = supervisor
            .start(&camera(), StartOptions::default())
            .await
            .unwrap();
        assert!(!second.success);
        assert_eq!(supervisor.list_sessions().await.len(), 1);
        assert_eq!(supervisor.children.lock().await.len(), 1);

        supervisor.stop("cam-01").await.unwrap();
    }

    #[tokio::test]
    async fn test_stop_graceful_quit() {
        let tmp = TempDir::new().unwrap();
        // Stub exits cleanly once it reads the quit command on stdin
        let supervisor = supervisor_with(&tmp, "read _line; exit 0", |c| c.stop_grace_ms = 2000);

        supervisor
            .start(&camera(), StartOptions::default())
            .await
            .unwrap();
        let started = std::time::Instant::now();
        let outcome = supervisor.stop("cam-01").await.unwrap();

        assert!(started.elapsed() < Duration::from_millis(1500));
        assert_eq!(outcome.session.status, SessionStatus::Stopped);
        assert!(supervisor.get_session("cam-01").await.is_none());
    }

    #[tokio::test]
    async fn test_stop_force_kills_after_grace() {
        let tmp = TempDir::new().unwrap();
        // Stub ignores stdin entirely
        let supervisor = supervisor_with(&tmp, "sleep 30", |c| c.stop_grace_ms = 100);

        supervisor
            .start(&camera(), StartOptions::default())
            .await
            .unwrap();
        let outcome = supervisor.stop("cam-01").await.unwrap();

        assert_eq!(outcome.session.status, SessionStatus::Stopped);
        assert!(supervisor.children.lock().await.is_empty());
    }

    #[tokio::test]
    async fn test_unexpected_exit_schedules_exactly_one_reconnect() {
        let tmp = TempDir::new().unwrap();
        // Long base delay: the reconnect never fires during the test
        let supervisor = supervisor_with(&tmp, "exit 1", |c| {
            c.max_reconnect_attempts = 3;
            c.reconnect_base_ms = 60_000;
        });

        supervisor
            .start(&camera(), StartOptions::default())
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;

        supervisor.health_tick().await;
        let session = supervisor.get_session("cam-01").await.unwrap();
        assert_eq!(session.reconnect_attempts, 1);

        // A second tick while the reconnect is pending must not double-count
        supervisor.health_tick().await;
        let session = supervisor.get_session("cam-01").await.unwrap();
        assert_eq!(session.reconnect_attempts, 1);
    }

    #[tokio::test]
    async fn test_abandoned_after_budget_exhausted() {
        let tmp = TempDir::new().unwrap();
        let supervisor = supervisor_with(&tmp, "exit 1", |c| {
            c.max_reconnect_attempts = 2;
            c.reconnect_base_ms = 20;
        });
        let (_id, mut rx) = supervisor.hub.subscribe("test").await;

        supervisor
            .start(&camera(), StartOptions::default())
            .await
            .unwrap();

        // Drive failure -> reconnect -> failure until abandonment
        let mut abandoned = None;
        for _ in 0..20 {
            tokio::time::sleep(Duration::from_millis(100)).await;
            supervisor.health_tick().await;
            while let Ok(event) = rx.try_recv() {
                if let RecorderEvent::RecordingAbandoned(msg) = event {
                    abandoned = Some(msg);
                }
            }
            if abandoned.is_some() {
                break;
            }
        }

        let msg = abandoned.expect("abandoned event not emitted");
        assert_eq!(msg.total_attempts, 2);
        assert!(supervisor.get_session("cam-01").await.is_none());
    }

    #[tokio::test]
    async fn test_stop_while_still_starting() {
        let tmp = TempDir::new().unwrap();
        let supervisor = supervisor_with(&tmp, "sleep 30", |_| {});

        // Registered but the capture never came up
        let session = RecordingSession::new(
            "s1".to_string(),
            camera(),
            None,
            None,
            Utc::now(),
            1,
            tmp.path().join("out"),
        );
        supervisor
            .sessions
            .write()
            .await
            .insert("cam-01".to_string(), session);

        let outcome = supervisor.stop("cam-01").await.unwrap();
        assert_eq!(outcome.session.status, SessionStatus::Stopped);
        assert!(supervisor.get_session("cam-01").await.is_none());
    }

    #[tokio::test]
    async fn test_reconnect_spawn_failure_abandons_after_budget() {
        let tmp = TempDir::new().unwrap();
        let supervisor = supervisor_with(&tmp, "exit 1", |c| {
            c.max_reconnect_attempts = 2;
            c.reconnect_base_ms = 20;
        });
        let (_id, mut rx) = supervisor.hub.subscribe("test").await;

        supervisor
            .start(&camera(), StartOptions::default())
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;
        supervisor.health_tick().await;

        // Every later reconnect fails at spawn, driving the failure
        // handler from inside the reconnect timer itself
        std::fs::remove_file(tmp.path().join("fake-capture")).unwrap();

        let mut abandoned = None;
        for _ in 0..20 {
            tokio::time::sleep(Duration::from_millis(100)).await;
            supervisor.health_tick().await;
            while let Ok(event) = rx.try_recv() {
                if let RecorderEvent::RecordingAbandoned(msg) = event {
                    abandoned = Some(msg);
                }
            }
            if abandoned.is_some() {
                break;
            }
        }

        let msg = abandoned.expect("abandoned event not emitted");
        assert_eq!(msg.total_attempts, 2);
        assert!(supervisor.get_session("cam-01").await.is_none());
    }

    #[tokio::test]
    async fn test_stop_cancels_pending_reconnect() {
        let tmp = TempDir::new().unwrap();
        let supervisor = supervisor_with(&tmp, "exit 1", |c| {
            c.max_reconnect_attempts = 3;
            c.reconnect_base_ms = 150;
        });

        supervisor
            .start(&camera(), StartOptions::default())
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        supervisor.health_tick().await;
        assert_eq!(
            supervisor
                .get_session("cam-01")
                .await
                .unwrap()
                .reconnect_attempts,
            1
        );

        // Stop before the reconnect timer fires
        supervisor.stop("cam-01").await.unwrap();
        tokio::time::sleep(Duration::from_millis(300)).await;

        assert!(supervisor.get_session("cam-01").await.is_none());
        assert!(supervisor.children.lock().await.is_empty());
    }

    #[tokio::test]
    async fn test_stale_timer_does_not_touch_new_session() {
        let tmp = TempDir::new().unwrap();
        let supervisor = supervisor_with(&tmp, "exit 1", |c| {
            c.max_reconnect_attempts = 3;
            c.reconnect_base_ms = 150;
        });

        supervisor
            .start(&camera(), StartOptions::default())
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        supervisor.health_tick().await;

        // Replace the session before the old reconnect timer fires; the
        // stale timer must not reset or restart the new registration
        supervisor.stop("cam-01").await.unwrap();
        supervisor
            .start(&camera(), StartOptions::default())
            .await
            .unwrap();
        let fresh = supervisor.get_session("cam-01").await.unwrap();
        assert_eq!(fresh.reconnect_attempts, 0);

        tokio::time::sleep(Duration::from_millis(300)).await;
        let after = supervisor.get_session("cam-01").await.unwrap();
        assert_eq!(after.session_id, fresh.session_id);
        assert_eq!(after.reconnect_attempts, 0);
    }

    #[test]
    fn test_parse_progress_frames() {
        assert_eq!(parse_progress_frames("frame=1234"), Some(1234));
        assert_eq!(parse_progress_frames("fps=29.97"), None);
        assert_eq!(parse_progress_frames("progress=continue"), None);
    }
}
