//! Recording session data model
//!
//! Session state machine, segment bookkeeping, and the deterministic
//! on-disk layout for continuous recordings:
//!
//! `recordings/{scenarioFolder}/{YYYY-MM-DD}/camera_{cameraId}/
//!  {scenarioPrefix}{cameraNameClean}_{YYYY-MM-DD}_{HH-MM-SS}_{seq:03d}.mp4`

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::path::{Path, PathBuf};

/// Maximum entries kept in a session's error log
const ERROR_LOG_CAPACITY: usize = 20;

/// Camera capture source (immutable during a session)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CameraSource {
    pub camera_id: String,
    pub name: String,
    /// Capture URI (RTSP)
    pub uri: String,
    pub username: Option<String>,
    pub password: Option<String>,
}

/// Session status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Starting,
    Recording,
    Stopping,
    Stopped,
    Failed,
}

impl SessionStatus {
    /// Valid transitions: starting -> recording -> stopping -> {stopped, failed}
    ///
    /// A session may also fail directly from starting or recording
    /// (spawn failure, abandonment), and may be stopped before the
    /// capture ever came up (starting -> stopping).
    pub fn can_transition(self, next: SessionStatus) -> bool {
        use SessionStatus::*;
        matches!(
            (self, next),
            (Starting, Recording)
                | (Starting, Stopping)
                | (Starting, Failed)
                | (Recording, Stopping)
                | (Recording, Failed)
                | (Stopping, Stopped)
                | (Stopping, Failed)
        )
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, SessionStatus::Stopped | SessionStatus::Failed)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SessionStatus::Starting => "starting",
            SessionStatus::Recording => "recording",
            SessionStatus::Stopping => "stopping",
            SessionStatus::Stopped => "stopped",
            SessionStatus::Failed => "failed",
        }
    }
}

/// One time-bounded output file from continuous capture
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SegmentFile {
    pub path: PathBuf,
    pub size_bytes: u64,
    pub created_at: DateTime<Utc>,
    pub sequence: u32,
}

/// One continuous recording episode for a camera
#[derive(Debug, Clone)]
pub struct RecordingSession {
    pub session_id: String,
    pub camera: CameraSource,
    pub scenario_id: Option<String>,
    pub scenario_name: Option<String>,
    /// Wall-clock origin the session's sub-resources are measured against
    pub master_timestamp: DateTime<Utc>,
    pub status: SessionStatus,
    /// Wall-clock offset of video capture start from the master timestamp
    pub video_start_offset_ms: i64,
    pub reconnect_attempts: u32,
    pub health_checks: u64,
    /// Observed segment files, append-only while recording, frozen at stop
    pub segments: Vec<SegmentFile>,
    /// Bounded error log (oldest entries dropped)
    errors: VecDeque<String>,
    /// Registration generation; a stale reconnect timer must match this
    pub generation: u64,
    pub output_dir: PathBuf,
    pub started_at: DateTime<Utc>,
    /// Last time the capture produced observable output (progress or segment)
    pub last_output_at: DateTime<Utc>,
    pub frames_processed: u64,
}

impl RecordingSession {
    pub fn new(
        session_id: String,
        camera: CameraSource,
        scenario_id: Option<String>,
        scenario_name: Option<String>,
        master_timestamp: DateTime<Utc>,
        generation: u64,
        output_dir: PathBuf,
    ) -> Self {
        let now = Utc::now();
        Self {
            session_id,
            camera,
            scenario_id,
            scenario_name,
            master_timestamp,
            status: SessionStatus::Starting,
            video_start_offset_ms: 0,
            reconnect_attempts: 0,
            health_checks: 0,
            segments: Vec::new(),
            errors: VecDeque::new(),
            generation,
            output_dir,
            started_at: now,
            last_output_at: now,
            frames_processed: 0,
        }
    }

    /// Transition to a new status, rejecting invalid transitions
    pub fn transition(&mut self, next: SessionStatus) -> crate::Result<()> {
        if !self.status.can_transition(next) {
            return Err(crate::Error::Internal(format!(
                "Invalid session transition {} -> {} for session {}",
                self.status.as_str(),
                next.as_str(),
                self.session_id
            )));
        }
        self.status = next;
        Ok(())
    }

    /// Append to the bounded error log
    pub fn push_error(&mut self, message: impl Into<String>) {
        if self.errors.len() >= ERROR_LOG_CAPACITY {
            self.errors.pop_front();
        }
        self.errors.push_back(message.into());
    }

    pub fn errors(&self) -> Vec<String> {
        self.errors.iter().cloned().collect()
    }

    /// Duration from the master timestamp, computed live
    pub fn duration_seconds(&self, now: DateTime<Utc>) -> i64 {
        (now - self.master_timestamp).num_milliseconds() / 1000
    }
}

/// Sanitize a name for filesystem use (non-alphanumeric -> underscore)
pub fn sanitize_name(name: &str) -> String {
    name.chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect()
}

/// Scenario directory component ("default" when no scenario is set)
pub fn scenario_folder(scenario_name: Option<&str>) -> String {
    match scenario_name {
        Some(name) if !name.trim().is_empty() => sanitize_name(name),
        _ => "default".to_string(),
    }
}

/// Filename prefix contributed by the scenario (empty when unset)
pub fn scenario_prefix(scenario_name: Option<&str>) -> String {
    match scenario_name {
        Some(name) if !name.trim().is_empty() => format!("{}_", sanitize_name(name)),
        _ => String::new(),
    }
}

/// Deterministic output directory for a session
pub fn session_output_dir(
    recordings_dir: &Path,
    scenario_name: Option<&str>,
    camera_id: &str,
    date: DateTime<Utc>,
) -> PathBuf {
    recordings_dir
        .join(scenario_folder(scenario_name))
        .join(date.format("%Y-%m-%d").to_string())
        .join(format!("camera_{}", camera_id))
}

/// Segment filename pattern handed to the capture process
///
/// `%03d` is substituted by the segment muxer with the sequence number.
pub fn segment_pattern(
    scenario_name: Option<&str>,
    camera_name: &str,
    start: DateTime<Utc>,
) -> String {
    format!(
        "{}{}_{}_{}_%03d.mp4",
        scenario_prefix(scenario_name),
        sanitize_name(camera_name),
        start.format("%Y-%m-%d"),
        start.format("%H-%M-%S"),
    )
}

/// Parse the sequence number out of a segment filename
pub fn parse_sequence(path: &Path) -> Option<u32> {
    let stem = path.file_stem()?.to_str()?;
    let tail = stem.rsplit('_').next()?;
    tail.parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn camera() -> CameraSource {
        CameraSource {
            camera_id: "cam-01".to_string(),
            name: "Front Door".to_string(),
            uri: "rtsp://192.168.1.10:554/stream1".to_string(),
            username: None,
            password: None,
        }
    }

    #[test]
    fn test_status_transitions() {
        use SessionStatus::*;
        assert!(Starting.can_transition(Recording));
        assert!(Starting.can_transition(Stopping));
        assert!(Recording.can_transition(Stopping));
        assert!(Stopping.can_transition(Stopped));
        assert!(Recording.can_transition(Failed));
        assert!(!Stopped.can_transition(Recording));
        assert!(!Recording.can_transition(Starting));
        assert!(!Stopped.can_transition(Stopping));
    }

    #[test]
    fn test_invalid_transition_rejected() {
        let mut session = RecordingSession::new(
            "s1".to_string(),
            camera(),
            None,
            None,
            Utc::now(),
            1,
            PathBuf::from("/tmp"),
        );
        assert!(session.transition(SessionStatus::Recording).is_ok());
        assert!(session.transition(SessionStatus::Stopped).is_err());
        assert_eq!(session.status, SessionStatus::Recording);
    }

    #[test]
    fn test_error_log_bounded() {
        let mut session = RecordingSession::new(
            "s1".to_string(),
            camera(),
            None,
            None,
            Utc::now(),
            1,
            PathBuf::from("/tmp"),
        );
        for i in 0..50 {
            session.push_error(format!("error {}", i));
        }
        let errors = session.errors();
        assert_eq!(errors.len(), ERROR_LOG_CAPACITY);
        assert_eq!(errors.last().unwrap(), "error 49");
    }

    #[test]
    fn test_directory_layout() {
        let start = Utc.with_ymd_and_hms(2026, 3, 14, 9, 26, 53).unwrap();
        let dir = session_output_dir(Path::new("/srv/recordings"), Some("Lab A"), "cam-01", start);
        assert_eq!(
            dir,
            PathBuf::from("/srv/recordings/Lab_A/2026-03-14/camera_cam-01")
        );
    }

    #[test]
    fn test_default_scenario_folder() {
        let start = Utc.with_ymd_and_hms(2026, 3, 14, 9, 26, 53).unwrap();
        let dir = session_output_dir(Path::new("/srv/recordings"), None, "cam-01", start);
        assert_eq!(
            dir,
            PathBuf::from("/srv/recordings/default/2026-03-14/camera_cam-01")
        );
    }

    #[test]
    fn test_segment_pattern() {
        let start = Utc.with_ymd_and_hms(2026, 3, 14, 9, 26, 53).unwrap();
        let pattern = segment_pattern(Some("Lab A"), "Front Door", start);
        assert_eq!(pattern, "Lab_A_Front_Door_2026-03-14_09-26-53_%03d.mp4");

        let pattern = segment_pattern(None, "Front Door", start);
        assert_eq!(pattern, "Front_Door_2026-03-14_09-26-53_%03d.mp4");
    }

    #[test]
    fn test_parse_sequence() {
        assert_eq!(
            parse_sequence(Path::new("Lab_Cam_2026-03-14_09-26-53_007.mp4")),
            Some(7)
        );
        assert_eq!(parse_sequence(Path::new("noseq.mp4")), None);
    }

    #[test]
    fn test_live_duration() {
        let master = Utc.with_ymd_and_hms(2026, 3, 14, 9, 0, 0).unwrap();
        let session = RecordingSession::new(
            "s1".to_string(),
            camera(),
            None,
            None,
            master,
            1,
            PathBuf::from("/tmp"),
        );
        let now = Utc.with_ymd_and_hms(2026, 3, 14, 9, 2, 0).unwrap();
        assert_eq!(session.duration_seconds(now), 120);
    }
}
