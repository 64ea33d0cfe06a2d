//! StorageGuardian - Disk Usage Watchdog & Retention Enforcement
//!
//! ## Responsibilities
//!
//! - Poll disk usage under the recordings tree
//! - Alert level tracking with change events only on transitions
//! - Retention-policy cleanup escalating to emergency eviction
//! - Empty directory pruning after a pass
//!
//! Cleanup is level-triggered: every poll re-evaluates usage and fires a
//! cleanup whenever usage is at/above the threshold and none is in flight.
//! Only closed segments are touched (minimum-age guard); the open segment
//! of an active session is always younger than the guard.

pub mod retention;

use crate::recorder_hub::{
    AlertLevelChangedMessage, CleanupCompletedMessage, RecorderEvent, RecorderHub,
};
use chrono::{DateTime, Utc};
use retention::RetentionPolicy;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use sysinfo::Disks;
use tokio::sync::RwLock;
use walkdir::WalkDir;

/// Storage alert level, a pure function of usage vs thresholds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertLevel {
    Normal,
    Warning,
    Critical,
}

impl AlertLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            AlertLevel::Normal => "normal",
            AlertLevel::Warning => "warning",
            AlertLevel::Critical => "critical",
        }
    }
}

/// Compute the alert level for a usage percentage
pub fn alert_level_for(usage_percent: f64, warning: f64, critical: f64) -> AlertLevel {
    if usage_percent >= critical {
        AlertLevel::Critical
    } else if usage_percent >= warning {
        AlertLevel::Warning
    } else {
        AlertLevel::Normal
    }
}

/// Disk state under the recordings tree
#[derive(Debug, Clone, Serialize)]
pub struct StorageState {
    pub last_check_at: Option<DateTime<Utc>>,
    pub total_bytes: u64,
    pub used_bytes: u64,
    pub available_bytes: u64,
    pub usage_percent: f64,
    pub alert_level: AlertLevel,
    pub auto_clean_running: bool,
    /// Cumulative across cleanup passes
    pub total_deleted_count: u64,
    pub total_freed_bytes: u64,
}

impl Default for StorageState {
    fn default() -> Self {
        Self {
            last_check_at: None,
            total_bytes: 0,
            used_bytes: 0,
            available_bytes: 0,
            usage_percent: 0.0,
            alert_level: AlertLevel::Normal,
            auto_clean_running: false,
            total_deleted_count: 0,
            total_freed_bytes: 0,
        }
    }
}

/// File kind within the recordings tree
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordingFileKind {
    Segment,
    Manifest,
    SensorLog,
    Other,
}

impl RecordingFileKind {
    pub fn of(path: &Path) -> Self {
        let name = path.file_name().and_then(|n| n.to_str()).unwrap_or("");
        if name.ends_with(".mp4") {
            RecordingFileKind::Segment
        } else if name.starts_with("session_") && name.ends_with(".json") {
            RecordingFileKind::Manifest
        } else if name.starts_with("sensors_") && name.ends_with(".jsonl") {
            RecordingFileKind::SensorLog
        } else {
            RecordingFileKind::Other
        }
    }
}

/// One file in the recordings tree
#[derive(Debug, Clone, Serialize)]
pub struct RecordingFileInfo {
    pub path: PathBuf,
    /// Scenario folder (first component under the recordings root)
    pub scenario: String,
    pub camera_id: Option<String>,
    pub kind: RecordingFileKind,
    pub size_bytes: u64,
    pub modified_at: DateTime<Utc>,
    pub age_days: f64,
}

/// Cleanup pass report
#[derive(Debug, Clone, Default, Serialize)]
pub struct CleanupReport {
    pub deleted_count: u64,
    pub freed_bytes: u64,
    pub emergency: bool,
    /// True when another pass was already in flight and this call no-oped
    pub skipped: bool,
}

/// Guardian configuration
#[derive(Debug, Clone)]
pub struct StorageConfig {
    pub recordings_dir: PathBuf,
    pub poll_interval_secs: u64,
    /// Usage % at which the alert level becomes warning
    pub warning_percent: f64,
    /// Usage % at which the alert level becomes critical
    pub critical_percent: f64,
    /// Usage % at/above which auto-cleanup fires
    pub auto_cleanup_percent: f64,
    /// Usage % emergency eviction drives down to
    pub cleanup_target_percent: f64,
    /// Files younger than this are never touched (open segment guard)
    pub min_file_age_secs: u64,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            recordings_dir: PathBuf::from("/var/lib/is24/recordings"),
            poll_interval_secs: 60,
            warning_percent: 80.0,
            critical_percent: 90.0,
            auto_cleanup_percent: 85.0,
            cleanup_target_percent: 75.0,
            min_file_age_secs: 180,
        }
    }
}

/// StorageGuardian instance
pub struct StorageGuardian {
    config: StorageConfig,
    hub: Arc<RecorderHub>,
    retention: RwLock<RetentionPolicy>,
    state: RwLock<StorageState>,
    cleaning: AtomicBool,
    monitor_running: AtomicBool,
}

impl StorageGuardian {
    /// Create new StorageGuardian
    pub fn new(config: StorageConfig, retention: RetentionPolicy, hub: Arc<RecorderHub>) -> Self {
        Self {
            config,
            hub,
            retention: RwLock::new(retention),
            state: RwLock::new(StorageState::default()),
            cleaning: AtomicBool::new(false),
            monitor_running: AtomicBool::new(false),
        }
    }

    pub fn config(&self) -> &StorageConfig {
        &self.config
    }

    /// Current state snapshot
    pub async fn state(&self) -> StorageState {
        let mut state = self.state.read().await.clone();
        state.auto_clean_running = self.cleaning.load(Ordering::SeqCst);
        state
    }

    // ========================================
    // Retention policy
    // ========================================

    /// Set retention days for a scope (`None` = global default)
    pub async fn set_retention_policy(&self, scope: Option<&str>, days: u32) -> crate::Result<()> {
        if days == 0 {
            return Err(crate::Error::Validation(
                "retention days must be at least 1".to_string(),
            ));
        }
        let mut retention = self.retention.write().await;
        retention.set_days(scope, days);
        tracing::info!(
            scope = scope.unwrap_or("<global>"),
            days = days,
            "Retention policy updated"
        );
        Ok(())
    }

    /// Get effective retention days for a scope
    pub async fn get_retention_days(&self, scope: Option<&str>) -> u32 {
        self.retention.read().await.get_days(scope)
    }

    // ========================================
    // Disk usage
    // ========================================

    /// Poll filesystem statistics for the recordings mount
    pub async fn check_disk_usage(&self) -> crate::Result<StorageState> {
        let (total, available) = mount_stats(&self.config.recordings_dir)?;
        Ok(self.apply_usage(total, available).await)
    }

    /// Apply a usage observation, emitting an alert event on level change
    pub async fn apply_usage(&self, total_bytes: u64, available_bytes: u64) -> StorageState {
        let used_bytes = total_bytes.saturating_sub(available_bytes);
        let usage_percent = if total_bytes > 0 {
            used_bytes as f64 / total_bytes as f64 * 100.0
        } else {
            0.0
        };
        let level = alert_level_for(
            usage_percent,
            self.config.warning_percent,
            self.config.critical_percent,
        );

        let (snapshot, transition) = {
            let mut state = self.state.write().await;
            let previous = state.alert_level;
            state.last_check_at = Some(Utc::now());
            state.total_bytes = total_bytes;
            state.used_bytes = used_bytes;
            state.available_bytes = available_bytes;
            state.usage_percent = usage_percent;
            state.alert_level = level;
            let transition = (previous != level).then_some(previous);
            (state.clone(), transition)
        };

        if let Some(previous) = transition {
            tracing::warn!(
                previous = previous.as_str(),
                current = level.as_str(),
                usage_percent = format!("{:.1}", usage_percent),
                "Storage alert level changed"
            );
            self.hub
                .broadcast(RecorderEvent::AlertLevelChanged(AlertLevelChangedMessage {
                    previous: previous.as_str().to_string(),
                    current: level.as_str().to_string(),
                    usage_percent,
                    available_bytes,
                }))
                .await;
        }

        snapshot
    }

    // ========================================
    // Recordings tree
    // ========================================

    /// Enumerate the recordings tree
    ///
    /// Creation time is approximated by mtime; segment files are written
    /// once and never modified after rotation.
    pub fn list_recordings(&self) -> Vec<RecordingFileInfo> {
        let root = &self.config.recordings_dir;
        let now = Utc::now();
        let mut files = Vec::new();

        for entry in WalkDir::new(root).into_iter().filter_map(|e| e.ok()) {
            if !entry.file_type().is_file() {
                continue;
            }
            let Ok(meta) = entry.metadata() else { continue };
            let modified_at = meta
                .modified()
                .map(DateTime::<Utc>::from)
                .unwrap_or_else(|_| now);
            let rel = entry.path().strip_prefix(root).unwrap_or(entry.path());
            let mut components = rel.components().filter_map(|c| c.as_os_str().to_str());
            let scenario = components.next().unwrap_or("").to_string();
            let camera_id = rel.components().filter_map(|c| c.as_os_str().to_str()).find_map(|c| {
                c.strip_prefix("camera_").map(|id| id.to_string())
            });

            files.push(RecordingFileInfo {
                path: entry.path().to_path_buf(),
                scenario,
                camera_id,
                kind: RecordingFileKind::of(entry.path()),
                size_bytes: meta.len(),
                modified_at,
                age_days: (now - modified_at).num_seconds() as f64 / 86_400.0,
            });
        }

        files
    }

    // ========================================
    // Cleanup
    // ========================================

    /// Run retention cleanup, escalating to emergency eviction (single-flight)
    pub async fn auto_cleanup(&self) -> crate::Result<CleanupReport> {
        if self.cleaning.swap(true, Ordering::SeqCst) {
            tracing::info!("Cleanup already in flight, skipping");
            return Ok(CleanupReport {
                skipped: true,
                ..CleanupReport::default()
            });
        }

        let result = self.run_cleanup().await;
        self.cleaning.store(false, Ordering::SeqCst);
        result
    }

    async fn run_cleanup(&self) -> crate::Result<CleanupReport> {
        let mut report = CleanupReport::default();

        let (count, freed) = self.retention_pass().await;
        report.deleted_count += count;
        report.freed_bytes += freed;

        // Still above the threshold? Evict oldest-first across the whole
        // tree, ignoring per-scope policy, until the target is met.
        if let Ok(state) = self.check_disk_usage().await {
            if state.usage_percent >= self.config.auto_cleanup_percent {
                let target_used =
                    (state.total_bytes as f64 * self.config.cleanup_target_percent / 100.0) as u64;
                let bytes_to_free = state.used_bytes.saturating_sub(target_used);
                let (count, freed) = self.emergency_eviction(bytes_to_free).await;
                report.deleted_count += count;
                report.freed_bytes += freed;
                report.emergency = true;
            }
        }

        self.prune_empty_dirs();

        {
            let mut state = self.state.write().await;
            state.total_deleted_count += report.deleted_count;
            state.total_freed_bytes += report.freed_bytes;
        }

        tracing::info!(
            deleted_count = report.deleted_count,
            freed_bytes = report.freed_bytes,
            emergency = report.emergency,
            "Cleanup pass completed"
        );

        self.hub
            .broadcast(RecorderEvent::CleanupCompleted(CleanupCompletedMessage {
                deleted_count: report.deleted_count,
                freed_bytes: report.freed_bytes,
                emergency: report.emergency,
                completed_at: Utc::now(),
            }))
            .await;

        Ok(report)
    }

    /// Delete segments exceeding their scope's effective retention
    ///
    /// Only segment files are candidates; manifests and sensor logs
    /// persist past video retention.
    pub async fn retention_pass(&self) -> (u64, u64) {
        let retention = self.retention.read().await.clone();
        let mut deleted = 0u64;
        let mut freed = 0u64;

        for file in self.list_recordings() {
            if file.kind != RecordingFileKind::Segment || !self.is_closed(&file) {
                continue;
            }
            let days = retention.effective_days(&file.scenario);
            if file.age_days <= days as f64 {
                continue;
            }
            match tokio::fs::remove_file(&file.path).await {
                Ok(()) => {
                    tracing::debug!(
                        path = %file.path.display(),
                        age_days = format!("{:.1}", file.age_days),
                        retention_days = days,
                        "Deleted expired recording"
                    );
                    deleted += 1;
                    freed += file.size_bytes;
                }
                Err(e) => {
                    // Never aborts the pass
                    tracing::warn!(path = %file.path.display(), error = %e, "Delete failed, skipping");
                }
            }
        }

        (deleted, freed)
    }

    /// Delete the globally oldest segments until `bytes_to_free` is
    /// reclaimed or candidates are exhausted; ignores per-scope retention
    pub async fn emergency_eviction(&self, bytes_to_free: u64) -> (u64, u64) {
        let mut candidates: Vec<RecordingFileInfo> = self
            .list_recordings()
            .into_iter()
            .filter(|f| f.kind == RecordingFileKind::Segment && self.is_closed(f))
            .collect();
        candidates.sort_by(|a, b| a.modified_at.cmp(&b.modified_at));

        let mut deleted = 0u64;
        let mut freed = 0u64;

        for file in candidates {
            if freed >= bytes_to_free {
                break;
            }
            match tokio::fs::remove_file(&file.path).await {
                Ok(()) => {
                    tracing::warn!(
                        path = %file.path.display(),
                        size_bytes = file.size_bytes,
                        "Emergency eviction deleted recording"
                    );
                    deleted += 1;
                    freed += file.size_bytes;
                }
                Err(e) => {
                    tracing::warn!(path = %file.path.display(), error = %e, "Eviction delete failed, skipping");
                }
            }
        }

        (deleted, freed)
    }

    /// Open-segment guard: only files past the minimum age are eligible
    fn is_closed(&self, file: &RecordingFileInfo) -> bool {
        (Utc::now() - file.modified_at).num_seconds() >= self.config.min_file_age_secs as i64
    }

    /// Remove empty directories left behind by deletions
    fn prune_empty_dirs(&self) {
        let root = &self.config.recordings_dir;
        for entry in WalkDir::new(root)
            .contents_first(true)
            .into_iter()
            .filter_map(|e| e.ok())
        {
            if entry.file_type().is_dir() && entry.path() != root.as_path() {
                // Fails on non-empty directories, which is the filter
                let _ = std::fs::remove_dir(entry.path());
            }
        }
    }

    // ========================================
    // Monitor loop
    // ========================================

    /// Start the level-triggered poll loop
    pub fn start_monitor(self: &Arc<Self>) {
        if self.monitor_running.swap(true, Ordering::SeqCst) {
            tracing::warn!("Storage monitor already running");
            return;
        }

        let guardian = self.clone();
        tokio::spawn(async move {
            let mut interval =
                tokio::time::interval(Duration::from_secs(guardian.config.poll_interval_secs));
            tracing::info!("Storage monitor started");
            loop {
                interval.tick().await;
                if !guardian.monitor_running.load(Ordering::SeqCst) {
                    break;
                }
                match guardian.check_disk_usage().await {
                    Ok(state) => {
                        if state.usage_percent >= guardian.config.auto_cleanup_percent
                            && !guardian.cleaning.load(Ordering::SeqCst)
                        {
                            if let Err(e) = guardian.auto_cleanup().await {
                                tracing::error!(error = %e, "Auto cleanup failed");
                            }
                        }
                    }
                    Err(e) => {
                        tracing::error!(error = %e, "Disk usage check failed");
                    }
                }
            }
            tracing::info!("Storage monitor stopped");
        });
    }

    /// Stop the poll loop
    pub fn stop_monitor(&self) {
        self.monitor_running.store(false, Ordering::SeqCst);
    }
}

/// Total/available bytes for the mount containing `path`
pub(crate) fn mount_stats(path: &Path) -> crate::Result<(u64, u64)> {
    let disks = Disks::new_with_refreshed_list();
    let mut best: Option<(usize, u64, u64)> = None;

    for disk in &disks {
        let mount = disk.mount_point();
        if path.starts_with(mount) {
            let depth = mount.components().count();
            if best.map(|(d, _, _)| depth > d).unwrap_or(true) {
                best = Some((depth, disk.total_space(), disk.available_space()));
            }
        }
    }

    best.map(|(_, total, available)| (total, available))
        .ok_or_else(|| {
            crate::Error::Storage(format!("no mount found for {}", path.display()))
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use filetime::{set_file_mtime, FileTime};
    use tempfile::TempDir;

    fn guardian_at(root: &Path, tune: impl FnOnce(&mut StorageConfig)) -> StorageGuardian {
        let mut config = StorageConfig {
            recordings_dir: root.to_path_buf(),
            min_file_age_secs: 0,
            ..StorageConfig::default()
        };
        tune(&mut config);
        StorageGuardian::new(config, RetentionPolicy::default(), Arc::new(RecorderHub::new()))
    }

    fn write_aged(root: &Path, rel: &str, bytes: usize, age_days: f64) {
        let path = root.join(rel);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, vec![0u8; bytes]).unwrap();
        let ts = Utc::now().timestamp() - (age_days * 86_400.0) as i64;
        set_file_mtime(&path, FileTime::from_unix_time(ts, 0)).unwrap();
    }

    #[test]
    fn test_alert_level_pure_function() {
        assert_eq!(alert_level_for(50.0, 80.0, 90.0), AlertLevel::Normal);
        assert_eq!(alert_level_for(80.0, 80.0, 90.0), AlertLevel::Warning);
        assert_eq!(alert_level_for(89.9, 80.0, 90.0), AlertLevel::Warning);
        assert_eq!(alert_level_for(90.0, 80.0, 90.0), AlertLevel::Critical);
    }

    #[tokio::test]
    async fn test_alert_events_only_on_transition() {
        let tmp = TempDir::new().unwrap();
        let guardian = guardian_at(tmp.path(), |_| {});
        let (_id, mut rx) = guardian.hub.subscribe("test").await;

        // Normal -> Normal: no event
        guardian.apply_usage(1000, 900).await;
        assert!(rx.try_recv().is_err());

        // Normal -> Warning: one event
        guardian.apply_usage(1000, 150).await;
        assert!(matches!(
            rx.try_recv(),
            Ok(RecorderEvent::AlertLevelChanged(_))
        ));

        // Warning -> Warning: no event
        guardian.apply_usage(1000, 140).await;
        assert!(rx.try_recv().is_err());

        // Warning -> Critical: one event
        let state = guardian.apply_usage(1000, 50).await;
        assert_eq!(state.alert_level, AlertLevel::Critical);
        match rx.try_recv() {
            Ok(RecorderEvent::AlertLevelChanged(msg)) => {
                assert_eq!(msg.previous, "warning");
                assert_eq!(msg.current, "critical");
            }
            other => panic!("expected alert event, got {:?}", other.is_ok()),
        }
    }

    #[tokio::test]
    async fn test_retention_pass_respects_scope_policy() {
        let tmp = TempDir::new().unwrap();
        let guardian = guardian_at(tmp.path(), |_| {});
        guardian.set_retention_policy(None, 10).await.unwrap();
        guardian
            .set_retention_policy(Some("Lab_A"), 2)
            .await
            .unwrap();

        write_aged(tmp.path(), "Lab_A/2026-03-01/camera_c1/a_000.mp4", 10, 5.0);
        write_aged(tmp.path(), "Lab_A/2026-03-13/camera_c1/b_000.mp4", 10, 1.0);
        write_aged(tmp.path(), "default/2026-03-01/camera_c2/c_000.mp4", 10, 5.0);
        write_aged(tmp.path(), "default/2026-02-01/camera_c2/d_000.mp4", 10, 20.0);

        let (deleted, freed) = guardian.retention_pass().await;
        assert_eq!(deleted, 2); // a (5d > 2d) and d (20d > 10d)
        assert_eq!(freed, 20);
        assert!(!tmp.path().join("Lab_A/2026-03-01/camera_c1/a_000.mp4").exists());
        assert!(tmp.path().join("Lab_A/2026-03-13/camera_c1/b_000.mp4").exists());
        assert!(tmp.path().join("default/2026-03-01/camera_c2/c_000.mp4").exists());
    }

    #[tokio::test]
    async fn test_cleanup_spares_manifests_and_sensor_logs() {
        let tmp = TempDir::new().unwrap();
        let guardian = guardian_at(tmp.path(), |_| {});
        guardian.set_retention_policy(None, 7).await.unwrap();

        write_aged(tmp.path(), "Lab/2026-01-01/camera_c1/a_000.mp4", 10, 30.0);
        write_aged(tmp.path(), "Lab/2026-01-01/camera_c1/session_a1b2c3d4.json", 10, 30.0);
        write_aged(tmp.path(), "Lab/2026-01-01/camera_c1/sensors_a1b2c3d4.jsonl", 10, 30.0);

        let (deleted, _) = guardian.retention_pass().await;
        assert_eq!(deleted, 1);
        assert!(!tmp.path().join("Lab/2026-01-01/camera_c1/a_000.mp4").exists());
        assert!(tmp.path().join("Lab/2026-01-01/camera_c1/session_a1b2c3d4.json").exists());
        assert!(tmp.path().join("Lab/2026-01-01/camera_c1/sensors_a1b2c3d4.jsonl").exists());

        // Even eviction with an unbounded target leaves them alone
        let (deleted, _) = guardian.emergency_eviction(u64::MAX).await;
        assert_eq!(deleted, 0);
        assert!(tmp.path().join("Lab/2026-01-01/camera_c1/session_a1b2c3d4.json").exists());
    }

    #[test]
    fn test_recording_file_kind() {
        assert_eq!(
            RecordingFileKind::of(Path::new("Lab_Cam_2026-03-14_09-26-53_007.mp4")),
            RecordingFileKind::Segment
        );
        assert_eq!(
            RecordingFileKind::of(Path::new("session_a1b2c3d4.json")),
            RecordingFileKind::Manifest
        );
        assert_eq!(
            RecordingFileKind::of(Path::new("sensors_a1b2c3d4.jsonl")),
            RecordingFileKind::SensorLog
        );
        assert_eq!(
            RecordingFileKind::of(Path::new("notes.txt")),
            RecordingFileKind::Other
        );
    }

    #[tokio::test]
    async fn test_retention_never_deletes_young_files() {
        let tmp = TempDir::new().unwrap();
        let guardian = guardian_at(tmp.path(), |_| {});
        guardian.set_retention_policy(None, 7).await.unwrap();

        write_aged(tmp.path(), "default/2026-03-14/camera_c1/a_000.mp4", 10, 6.9);
        let (deleted, _) = guardian.retention_pass().await;
        assert_eq!(deleted, 0);
    }

    #[tokio::test]
    async fn test_emergency_eviction_oldest_first_until_target() {
        let tmp = TempDir::new().unwrap();
        let guardian = guardian_at(tmp.path(), |_| {});

        write_aged(tmp.path(), "s/d/camera_c/old_000.mp4", 100, 9.0);
        write_aged(tmp.path(), "s/d/camera_c/mid_000.mp4", 100, 5.0);
        write_aged(tmp.path(), "s/d/camera_c/new_000.mp4", 100, 1.0);

        let (deleted, freed) = guardian.emergency_eviction(150).await;
        assert_eq!(deleted, 2);
        assert_eq!(freed, 200);
        assert!(!tmp.path().join("s/d/camera_c/old_000.mp4").exists());
        assert!(!tmp.path().join("s/d/camera_c/mid_000.mp4").exists());
        assert!(tmp.path().join("s/d/camera_c/new_000.mp4").exists());
    }

    #[tokio::test]
    async fn test_eviction_exhausts_candidates() {
        let tmp = TempDir::new().unwrap();
        let guardian = guardian_at(tmp.path(), |_| {});

        write_aged(tmp.path(), "s/d/camera_c/only_000.mp4", 50, 3.0);
        let (deleted, freed) = guardian.emergency_eviction(10_000).await;
        assert_eq!(deleted, 1);
        assert_eq!(freed, 50);
    }

    #[tokio::test]
    async fn test_open_segment_guard() {
        let tmp = TempDir::new().unwrap();
        let guardian = guardian_at(tmp.path(), |c| c.min_file_age_secs = 3600);

        // Fresh file: not a candidate even for emergency eviction
        write_aged(tmp.path(), "s/d/camera_c/open_000.mp4", 50, 0.0);
        let (deleted, _) = guardian.emergency_eviction(10_000).await;
        assert_eq!(deleted, 0);
    }

    #[tokio::test]
    async fn test_auto_cleanup_single_flight() {
        let tmp = TempDir::new().unwrap();
        let guardian = guardian_at(tmp.path(), |_| {});

        guardian.cleaning.store(true, Ordering::SeqCst);
        let report = guardian.auto_cleanup().await.unwrap();
        assert!(report.skipped);
        assert_eq!(report.deleted_count, 0);
        guardian.cleaning.store(false, Ordering::SeqCst);
    }

    #[tokio::test]
    async fn test_prune_empty_dirs() {
        let tmp = TempDir::new().unwrap();
        let guardian = guardian_at(tmp.path(), |_| {});

        write_aged(tmp.path(), "s/d/camera_c/x_000.mp4", 10, 9.0);
        guardian.set_retention_policy(None, 1).await.unwrap();
        let (deleted, _) = guardian.retention_pass().await;
        assert_eq!(deleted, 1);

        guardian.prune_empty_dirs();
        assert!(!tmp.path().join("s").exists());
        assert!(tmp.path().exists());
    }

    #[tokio::test]
    async fn test_list_recordings_tree_metadata() {
        let tmp = TempDir::new().unwrap();
        let guardian = guardian_at(tmp.path(), |_| {});

        write_aged(tmp.path(), "Lab_A/2026-03-14/camera_c9/a_001.mp4", 42, 2.0);
        let files = guardian.list_recordings();
        assert_eq!(files.len(), 1);
        assert_eq!(files[0].scenario, "Lab_A");
        assert_eq!(files[0].camera_id.as_deref(), Some("c9"));
        assert_eq!(files[0].kind, RecordingFileKind::Segment);
        assert_eq!(files[0].size_bytes, 42);
        assert!(files[0].age_days > 1.9 && files[0].age_days < 2.1);
    }
}
