//! Replication engine
//!
//! Scheduled off-box copy of closed recording segments to a configured
//! destination, with per-file retry, checksum verification, and remote
//! capacity guarding. Runs are single-flight; a manual trigger bypasses
//! the enabled/schedule gate but never interrupts a run in progress.

pub mod backend;

use chrono::{DateTime, Utc};
use cron::Schedule;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use walkdir::WalkDir;

use crate::config_store::ConfigStore;
use crate::recorder_hub::{RecorderEvent, RecorderHub, ReplicationProgressMessage};
use backend::{sha256_file, RemoteUsage, TransferBackend, TransferEngineKind};

/// Replication job configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReplicationConfig {
    pub enabled: bool,
    pub engine: TransferEngineKind,
    pub destination: String,
    /// Cron expression (seconds-resolution, 7 fields accepted)
    pub schedule: String,
    /// Local retention after successful export, in days
    pub export_retention_days: u32,
    pub delete_after_export: bool,
    pub verify_checksums: bool,
    /// Remote usage at/above this refuses new transfers
    pub soft_ceiling_percent: f64,
    /// Remote usage at/above this fails the run outright
    pub hard_ceiling_percent: f64,
    pub max_attempts: u32,
    pub backoff_base_secs: f64,
    pub backoff_max_secs: f64,
    /// Files younger than this are treated as still being written
    pub min_file_age_secs: u64,
}

impl Default for ReplicationConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            engine: TransferEngineKind::LocalMount,
            destination: String::new(),
            schedule: "0 0 3 * * * *".to_string(),
            export_retention_days: 7,
            delete_after_export: false,
            verify_checksums: true,
            soft_ceiling_percent: 85.0,
            hard_ceiling_percent: 95.0,
            max_attempts: 3,
            backoff_base_secs: 2.0,
            backoff_max_secs: 60.0,
            min_file_age_secs: 180,
        }
    }
}

/// Remote capacity verdict
#[derive(Debug, Clone, Copy, Serialize)]
pub struct RemoteSpaceCheck {
    pub usage_percent: f64,
    pub available_bytes: u64,
    pub can_transfer: bool,
    pub is_critical: bool,
}

/// Outcome of one run
#[derive(Debug, Clone, Default, Serialize)]
pub struct ReplicationReport {
    pub files_transferred: u64,
    pub bytes_transferred: u64,
    pub files_pruned: u64,
    pub skipped: bool,
}

/// Engine status snapshot
#[derive(Debug, Clone, Serialize)]
pub struct ReplicationStatus {
    pub running: bool,
    pub enabled: bool,
    pub last_sync_at: Option<DateTime<Utc>>,
    pub success_count: u64,
    pub fail_count: u64,
    pub last_error: Option<String>,
}

#[derive(Default)]
struct Counters {
    last_sync_at: Option<DateTime<Utc>>,
    success_count: u64,
    fail_count: u64,
    last_error: Option<String>,
}

pub struct ReplicationEngine {
    config: RwLock<ReplicationConfig>,
    backend: Arc<dyn TransferBackend>,
    recordings_dir: PathBuf,
    hub: Arc<RecorderHub>,
    /// Durable last-sync persistence (absent in tests)
    store: Option<Arc<ConfigStore>>,
    running: AtomicBool,
    scheduler_running: AtomicBool,
    counters: RwLock<Counters>,
}

impl ReplicationEngine {
    pub fn new(
        config: ReplicationConfig,
        recordings_dir: impl Into<PathBuf>,
        hub: Arc<RecorderHub>,
    ) -> Self {
        let backend: Arc<dyn TransferBackend> =
            backend::build_backend(config.engine, &config.destination).into();
        Self {
            config: RwLock::new(config),
            backend,
            recordings_dir: recordings_dir.into(),
            hub,
            store: None,
            running: AtomicBool::new(false),
            scheduler_running: AtomicBool::new(false),
            counters: RwLock::new(Counters::default()),
        }
    }

    /// Swap in a custom backend (tests, special deployments)
    pub fn with_backend(mut self, backend: Arc<dyn TransferBackend>) -> Self {
        self.backend = backend;
        self
    }

    /// Attach durable last-sync persistence
    pub fn with_store(mut self, store: Arc<ConfigStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Seed the last-sync time from persisted state (startup)
    pub async fn restore_last_sync(&self, at: DateTime<Utc>) {
        self.counters.write().await.last_sync_at = Some(at);
    }

    pub async fn status(&self) -> ReplicationStatus {
        let counters = self.counters.read().await;
        ReplicationStatus {
            running: self.running.load(Ordering::SeqCst),
            enabled: self.config.read().await.enabled,
            last_sync_at: counters.last_sync_at,
            success_count: counters.success_count,
            fail_count: counters.fail_count,
            last_error: counters.last_error.clone(),
        }
    }

    pub async fn update_config(&self, config: ReplicationConfig) -> crate::Result<()> {
        Schedule::from_str(&config.schedule)
            .map_err(|e| crate::Error::Validation(format!("bad schedule: {}", e)))?;
        if config.max_attempts == 0 {
            return Err(crate::Error::Validation(
                "max_attempts must be at least 1".to_string(),
            ));
        }
        *self.config.write().await = config;
        Ok(())
    }

    /// Probe the destination and judge it against the configured ceilings
    pub async fn check_remote_space(&self) -> crate::Result<RemoteSpaceCheck> {
        let usage = self.backend.probe().await?;
        let config = self.config.read().await;
        Ok(judge_remote(&usage, &config))
    }

    // ========================================
    // Runs
    // ========================================

    /// Run replication (single-flight)
    ///
    /// `force` bypasses the enabled gate; it never preempts a run already
    /// in progress.
    pub async fn replicate(&self, force: bool) -> crate::Result<ReplicationReport> {
        if !force && !self.config.read().await.enabled {
            return Ok(ReplicationReport {
                skipped: true,
                ..ReplicationReport::default()
            });
        }
        if self.running.swap(true, Ordering::SeqCst) {
            tracing::info!("Replication already in flight, skipping");
            return Ok(ReplicationReport {
                skipped: true,
                ..ReplicationReport::default()
            });
        }

        let result = self.run_replication().await;
        self.running.store(false, Ordering::SeqCst);

        let mut counters = self.counters.write().await;
        match &result {
            Ok(report) => {
                let now = Utc::now();
                counters.last_sync_at = Some(now);
                counters.success_count += 1;
                counters.last_error = None;
                tracing::info!(
                    files = report.files_transferred,
                    bytes = report.bytes_transferred,
                    pruned = report.files_pruned,
                    "Replication run complete"
                );
                if let Some(store) = &self.store {
                    if let Err(e) = store.service().set_replication_last_sync(now).await {
                        tracing::error!(error = %e, "Failed to persist last sync time");
                    }
                }
            }
            Err(e) => {
                counters.fail_count += 1;
                counters.last_error = Some(e.to_string());
                tracing::error!(error = %e, "Replication run failed");
            }
        }

        result
    }

    async fn run_replication(&self) -> crate::Result<ReplicationReport> {
        let config = self.config.read().await.clone();

        let usage = self.backend.probe().await?;
        let verdict = judge_remote(&usage, &config);
        if verdict.is_critical {
            return Err(crate::Error::Replication(format!(
                "destination at {:.1}% usage, above hard ceiling {:.1}%",
                verdict.usage_percent, config.hard_ceiling_percent
            )));
        }

        let files = eligible_files(&self.recordings_dir, config.min_file_age_secs);
        let total_bytes: u64 = files.iter().map(|f| f.size_bytes).sum();
        tracing::info!(
            backend = self.backend.name(),
            files = files.len(),
            total_bytes,
            "Starting replication run"
        );

        let started = std::time::Instant::now();
        let mut report = ReplicationReport::default();

        for file in &files {
            let attempts = self.transfer_with_retry(&file.path, &file.rel, &config).await?;
            report.files_transferred += 1;
            report.bytes_transferred += file.size_bytes;
            if attempts > 1 {
                tracing::warn!(
                    file = %file.rel.display(),
                    attempts,
                    "Transfer succeeded after retry"
                );
            }

            let elapsed = started.elapsed().as_secs_f64().max(0.001);
            let bytes_per_sec = report.bytes_transferred as f64 / elapsed;
            let remaining = total_bytes.saturating_sub(report.bytes_transferred);
            self.hub
                .broadcast(RecorderEvent::ReplicationProgress(
                    ReplicationProgressMessage {
                        percent: if total_bytes > 0 {
                            report.bytes_transferred as f64 / total_bytes as f64 * 100.0
                        } else {
                            100.0
                        },
                        bytes_per_sec,
                        eta_seconds: (remaining as f64 / bytes_per_sec.max(1.0)) as u64,
                        current_file: file.rel.display().to_string(),
                    },
                ))
                .await;
        }

        if config.delete_after_export {
            report.files_pruned = self.prune_exported(config.export_retention_days).await;
        }

        Ok(report)
    }

    /// Transfer one file with bounded retry, returning the attempt count
    async fn transfer_with_retry(
        &self,
        local: &Path,
        rel: &Path,
        config: &ReplicationConfig,
    ) -> crate::Result<u32> {
        let mut last_err = None;

        for attempt in 1..=config.max_attempts {
            match self.transfer_once(local, rel, config).await {
                Ok(()) => return Ok(attempt),
                Err(e) => {
                    tracing::warn!(
                        file = %rel.display(),
                        attempt,
                        error = %e,
                        "Transfer attempt failed"
                    );
                    last_err = Some(e);
                    if attempt < config.max_attempts {
                        tokio::time::sleep(backoff_delay(
                            attempt,
                            config.backoff_base_secs,
                            config.backoff_max_secs,
                        ))
                        .await;
                    }
                }
            }
        }

        Err(last_err.unwrap_or_else(|| {
            crate::Error::Replication("transfer failed with no attempts".to_string())
        }))
    }

    async fn transfer_once(
        &self,
        local: &Path,
        rel: &Path,
        config: &ReplicationConfig,
    ) -> crate::Result<()> {
        let usage = self.backend.probe().await?;
        let verdict = judge_remote(&usage, config);
        if !verdict.can_transfer {
            return Err(crate::Error::Replication(format!(
                "destination at {:.1}% usage, above soft ceiling {:.1}%",
                verdict.usage_percent, config.soft_ceiling_percent
            )));
        }

        self.backend.transfer(local, rel).await?;

        if config.verify_checksums {
            if let Some(remote) = self.backend.remote_digest(rel).await? {
                let local_digest = sha256_file(local).await?;
                if remote != local_digest {
                    return Err(crate::Error::Replication(format!(
                        "digest mismatch for {}",
                        rel.display()
                    )));
                }
            }
        }

        Ok(())
    }

    /// Delete exported segments older than the export retention window
    ///
    /// Manifests and sensor logs stay on local disk.
    async fn prune_exported(&self, retention_days: u32) -> u64 {
        let cutoff_secs = retention_days as u64 * 86_400;
        let mut pruned = 0u64;

        for file in eligible_files(&self.recordings_dir, cutoff_secs) {
            if file.path.extension().and_then(|e| e.to_str()) != Some("mp4") {
                continue;
            }
            match tokio::fs::remove_file(&file.path).await {
                Ok(()) => {
                    pruned += 1;
                    tracing::debug!(file = %file.rel.display(), "Pruned exported recording");
                }
                Err(e) => {
                    tracing::warn!(file = %file.rel.display(), error = %e, "Prune failed");
                }
            }
        }

        pruned
    }

    // ========================================
    // Scheduler
    // ========================================

    /// Start the cron tick loop (60s resolution)
    pub fn start_scheduler(self: &Arc<Self>) {
        if self.scheduler_running.swap(true, Ordering::SeqCst) {
            return;
        }

        let engine = Arc::clone(self);
        tokio::spawn(async move {
            tracing::info!("Replication scheduler started");
            let mut last_tick = Utc::now();

            while engine.scheduler_running.load(Ordering::SeqCst) {
                tokio::time::sleep(Duration::from_secs(60)).await;
                let now = Utc::now();
                let (enabled, expr) = {
                    let config = engine.config.read().await;
                    (config.enabled, config.schedule.clone())
                };

                if enabled {
                    match schedule_due(&expr, last_tick, now) {
                        Ok(true) => {
                            if let Err(e) = engine.replicate(false).await {
                                tracing::error!(error = %e, "Scheduled replication failed");
                            }
                        }
                        Ok(false) => {}
                        Err(e) => {
                            tracing::error!(error = %e, schedule = %expr, "Bad cron expression")
                        }
                    }
                }

                last_tick = now;
            }
            tracing::info!("Replication scheduler stopped");
        });
    }

    pub fn stop_scheduler(&self) {
        self.scheduler_running.store(false, Ordering::SeqCst);
    }
}

fn judge_remote(usage: &RemoteUsage, config: &ReplicationConfig) -> RemoteSpaceCheck {
    RemoteSpaceCheck {
        usage_percent: usage.usage_percent,
        available_bytes: usage.available_bytes,
        can_transfer: usage.usage_percent < config.soft_ceiling_percent,
        is_critical: usage.usage_percent >= config.hard_ceiling_percent,
    }
}

/// Exponential backoff with jitter so parallel retries spread out
fn backoff_delay(attempt: u32, base_secs: f64, max_secs: f64) -> Duration {
    let secs = base_secs.powi(attempt as i32).min(max_secs);
    let jitter = rand::thread_rng().gen_range(0.85..=1.15);
    Duration::from_secs_f64(secs * jitter)
}

/// True when a scheduled fire time falls in `(after, now]`
fn schedule_due(
    expr: &str,
    after: DateTime<Utc>,
    now: DateTime<Utc>,
) -> crate::Result<bool> {
    let schedule = Schedule::from_str(expr)
        .map_err(|e| crate::Error::Parse(format!("bad cron expression: {}", e)))?;
    Ok(schedule.after(&after).next().map(|t| t <= now).unwrap_or(false))
}

struct EligibleFile {
    path: PathBuf,
    rel: PathBuf,
    size_bytes: u64,
}

/// Closed recording files under the tree, oldest first
///
/// A file is closed once its mtime is at least `min_age_secs` old; the
/// segment in flight keeps receiving writes and stays younger than that.
fn eligible_files(root: &Path, min_age_secs: u64) -> Vec<EligibleFile> {
    let now = std::time::SystemTime::now();
    let mut files: Vec<(std::time::SystemTime, EligibleFile)> = Vec::new();

    for entry in WalkDir::new(root).into_iter().filter_map(|e| e.ok()) {
        if !entry.file_type().is_file() {
            continue;
        }
        let Ok(meta) = entry.metadata() else { continue };
        let Ok(modified) = meta.modified() else { continue };
        let age = now.duration_since(modified).unwrap_or_default();
        if age.as_secs() < min_age_secs {
            continue;
        }
        let rel = entry
            .path()
            .strip_prefix(root)
            .unwrap_or(entry.path())
            .to_path_buf();
        files.push((
            modified,
            EligibleFile {
                path: entry.path().to_path_buf(),
                rel,
                size_bytes: meta.len(),
            },
        ));
    }

    files.sort_by_key(|(modified, _)| *modified);
    files.into_iter().map(|(_, f)| f).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use tempfile::TempDir;

    /// Scripted backend: pops one outcome per call
    struct MockBackend {
        usage_percent: Mutex<f64>,
        transfer_outcomes: Mutex<VecDeque<crate::Result<()>>>,
        digests: Mutex<VecDeque<Option<String>>>,
        transfer_calls: Mutex<Vec<PathBuf>>,
    }

    impl MockBackend {
        fn new(usage_percent: f64) -> Self {
            Self {
                usage_percent: Mutex::new(usage_percent),
                transfer_outcomes: Mutex::new(VecDeque::new()),
                digests: Mutex::new(VecDeque::new()),
                transfer_calls: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl TransferBackend for MockBackend {
        fn name(&self) -> &'static str {
            "mock"
        }

        async fn probe(&self) -> crate::Result<RemoteUsage> {
            let percent = *self.usage_percent.lock().unwrap();
            let total = 1_000_000u64;
            let available = total - (total as f64 * percent / 100.0) as u64;
            Ok(RemoteUsage::from_totals(total, available))
        }

        async fn transfer(&self, local: &Path, _remote_rel: &Path) -> crate::Result<()> {
            self.transfer_calls.lock().unwrap().push(local.to_path_buf());
            self.transfer_outcomes
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or(Ok(()))
        }

        async fn remote_digest(&self, _remote_rel: &Path) -> crate::Result<Option<String>> {
            Ok(self.digests.lock().unwrap().pop_front().unwrap_or(None))
        }
    }

    fn engine_with(
        dir: &Path,
        backend: Arc<MockBackend>,
        tweak: impl FnOnce(&mut ReplicationConfig),
    ) -> ReplicationEngine {
        let mut config = ReplicationConfig {
            enabled: true,
            min_file_age_secs: 0,
            backoff_base_secs: 0.05,
            backoff_max_secs: 0.2,
            ..ReplicationConfig::default()
        };
        tweak(&mut config);
        ReplicationEngine::new(config, dir, Arc::new(RecorderHub::new())).with_backend(backend)
    }

    async fn seed_file(dir: &Path, rel: &str) -> PathBuf {
        let path = dir.join(rel);
        tokio::fs::create_dir_all(path.parent().unwrap()).await.unwrap();
        tokio::fs::write(&path, b"segment").await.unwrap();
        path
    }

    #[tokio::test]
    async fn test_retry_succeeds_on_second_attempt_with_backoff() {
        let tmp = TempDir::new().unwrap();
        let local = seed_file(tmp.path(), "s/2026-03-14/camera_c1/a_000.mp4").await;
        let expected = sha256_file(&local).await.unwrap();

        let backend = Arc::new(MockBackend::new(10.0));
        backend
            .transfer_outcomes
            .lock()
            .unwrap()
            .extend([Ok(()), Ok(())]);
        // First verify sees a truncated remote copy, second matches
        backend.digests.lock().unwrap().extend([
            Some("0000000000000000".to_string()),
            Some(expected),
        ]);

        let engine = engine_with(tmp.path(), Arc::clone(&backend), |_| {});
        let config = engine.config.read().await.clone();

        let started = std::time::Instant::now();
        let attempts = engine
            .transfer_with_retry(&local, Path::new("a_000.mp4"), &config)
            .await
            .unwrap();
        let elapsed = started.elapsed();

        assert_eq!(attempts, 2);
        assert_eq!(backend.transfer_calls.lock().unwrap().len(), 2);
        // One backoff sleep: base 50ms with +/-15% jitter
        assert!(elapsed >= Duration::from_millis(40), "elapsed {:?}", elapsed);
        assert!(elapsed < Duration::from_millis(500), "elapsed {:?}", elapsed);
    }

    #[tokio::test]
    async fn test_retry_budget_exhausted_fails() {
        let tmp = TempDir::new().unwrap();
        let local = seed_file(tmp.path(), "a_000.mp4").await;

        let backend = Arc::new(MockBackend::new(10.0));
        backend.transfer_outcomes.lock().unwrap().extend([
            Err(crate::Error::Replication("network down".to_string())),
            Err(crate::Error::Replication("network down".to_string())),
        ]);

        let engine = engine_with(tmp.path(), Arc::clone(&backend), |c| c.max_attempts = 2);
        let config = engine.config.read().await.clone();

        let result = engine
            .transfer_with_retry(&local, Path::new("a_000.mp4"), &config)
            .await;
        assert!(result.is_err());
        assert_eq!(backend.transfer_calls.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_run_refused_above_hard_ceiling() {
        let tmp = TempDir::new().unwrap();
        seed_file(tmp.path(), "a_000.mp4").await;

        let backend = Arc::new(MockBackend::new(97.0));
        let engine = engine_with(tmp.path(), Arc::clone(&backend), |_| {});

        let result = engine.replicate(true).await;
        assert!(result.is_err());
        assert!(backend.transfer_calls.lock().unwrap().is_empty());

        let status = engine.status().await;
        assert_eq!(status.fail_count, 1);
        assert!(status.last_error.is_some());
    }

    #[tokio::test]
    async fn test_disabled_run_skipped_unless_forced() {
        let tmp = TempDir::new().unwrap();
        seed_file(tmp.path(), "a_000.mp4").await;

        let backend = Arc::new(MockBackend::new(10.0));
        let expected = sha256_file(&tmp.path().join("a_000.mp4")).await.unwrap();
        backend.digests.lock().unwrap().push_back(Some(expected));

        let engine = engine_with(tmp.path(), Arc::clone(&backend), |c| c.enabled = false);

        let report = engine.replicate(false).await.unwrap();
        assert!(report.skipped);
        assert!(backend.transfer_calls.lock().unwrap().is_empty());

        let report = engine.replicate(true).await.unwrap();
        assert!(!report.skipped);
        assert_eq!(report.files_transferred, 1);
    }

    #[tokio::test]
    async fn test_run_transfers_oldest_first_and_updates_status() {
        let tmp = TempDir::new().unwrap();
        let old = seed_file(tmp.path(), "s/2026-03-13/camera_c1/a_000.mp4").await;
        let new = seed_file(tmp.path(), "s/2026-03-14/camera_c1/a_001.mp4").await;
        filetime::set_file_mtime(
            &old,
            filetime::FileTime::from_unix_time(Utc::now().timestamp() - 7200, 0),
        )
        .unwrap();

        let backend = Arc::new(MockBackend::new(10.0));
        let engine = engine_with(tmp.path(), Arc::clone(&backend), |c| {
            c.verify_checksums = false;
        });

        let report = engine.replicate(false).await.unwrap();
        assert_eq!(report.files_transferred, 2);

        let calls = backend.transfer_calls.lock().unwrap().clone();
        assert_eq!(calls, vec![old, new]);

        let status = engine.status().await;
        assert_eq!(status.success_count, 1);
        assert!(status.last_sync_at.is_some());
        assert!(status.last_error.is_none());
    }

    #[tokio::test]
    async fn test_delete_after_export_prunes_old_files() {
        let tmp = TempDir::new().unwrap();
        let old = seed_file(tmp.path(), "s/camera_c1/a_000.mp4").await;
        let recent = seed_file(tmp.path(), "s/camera_c1/a_001.mp4").await;
        let manifest = seed_file(tmp.path(), "s/camera_c1/session_a1b2c3d4.json").await;
        let aged = filetime::FileTime::from_unix_time(Utc::now().timestamp() - 10 * 86_400, 0);
        filetime::set_file_mtime(&old, aged).unwrap();
        filetime::set_file_mtime(&manifest, aged).unwrap();

        let backend = Arc::new(MockBackend::new(10.0));
        let engine = engine_with(tmp.path(), Arc::clone(&backend), |c| {
            c.verify_checksums = false;
            c.delete_after_export = true;
            c.export_retention_days = 7;
        });

        let report = engine.replicate(false).await.unwrap();
        assert_eq!(report.files_pruned, 1);
        assert!(!old.exists());
        assert!(recent.exists());
        // Manifest is past the window too but never pruned
        assert!(manifest.exists());
    }

    #[test]
    fn test_schedule_due_window() {
        // Daily at 03:00:00
        let expr = "0 0 3 * * * *";
        let before = "2026-03-14T02:59:00Z".parse::<DateTime<Utc>>().unwrap();
        let after = "2026-03-14T03:00:30Z".parse::<DateTime<Utc>>().unwrap();
        assert!(schedule_due(expr, before, after).unwrap());

        let mid1 = "2026-03-14T10:00:00Z".parse::<DateTime<Utc>>().unwrap();
        let mid2 = "2026-03-14T10:01:00Z".parse::<DateTime<Utc>>().unwrap();
        assert!(!schedule_due(expr, mid1, mid2).unwrap());

        assert!(schedule_due("not a cron", before, after).is_err());
    }

    #[test]
    fn test_backoff_delay_bounded() {
        for attempt in 1..=6 {
            let d = backoff_delay(attempt, 2.0, 10.0);
            assert!(d <= Duration::from_secs_f64(10.0 * 1.15));
            assert!(d >= Duration::from_secs_f64(2.0 * 0.85));
        }
    }
}
