//! RecorderHub - Typed Lifecycle Event Distribution
//!
//! ## Responsibilities
//!
//! - Subscriber registration for recorder lifecycle events
//! - Fan-out of recording/storage/replication events
//!
//! Events are delivered as typed `RecorderEvent` values, not serialized
//! payloads. The external telemetry/notification publisher subscribes here
//! and serializes for its own wire format.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::mpsc;
use tokio::sync::RwLock;
use uuid::Uuid;

/// Recorder event types
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
#[serde(rename_all = "snake_case")]
pub enum RecorderEvent {
    RecordingStarted(RecordingStartedMessage),
    RecordingStopped(RecordingStoppedMessage),
    RecordingFailed(RecordingFailedMessage),
    RecordingAbandoned(RecordingAbandonedMessage),
    /// A capture segment rotated out and is now closed
    NewSegment(NewSegmentMessage),
    /// Disk usage crossed an alert threshold (transitions only)
    AlertLevelChanged(AlertLevelChangedMessage),
    CleanupCompleted(CleanupCompletedMessage),
    /// Off-site transfer progress (percent, speed, ETA)
    ReplicationProgress(ReplicationProgressMessage),
}

/// Recording started message
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecordingStartedMessage {
    pub session_id: String,
    pub camera_id: String,
    pub scenario_name: Option<String>,
    pub output_dir: String,
    pub started_at: DateTime<Utc>,
}

/// Recording stopped message
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecordingStoppedMessage {
    pub session_id: String,
    pub camera_id: String,
    pub duration_seconds: i64,
    pub segment_count: usize,
    pub frames_processed: u64,
}

/// Recording failed message (transient failure, reconnect pending)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecordingFailedMessage {
    pub session_id: String,
    pub camera_id: String,
    pub reason: String,
    pub reconnect_attempt: u32,
    pub retry_in_seconds: Option<u64>,
}

/// Recording abandoned message (reconnect budget exhausted)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecordingAbandonedMessage {
    pub session_id: String,
    pub camera_id: String,
    pub total_attempts: u32,
    pub last_error: Option<String>,
}

/// New (rotated) segment message
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewSegmentMessage {
    pub session_id: String,
    pub camera_id: String,
    pub path: String,
    pub sequence: u32,
    pub size_bytes: u64,
}

/// Alert level changed message
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlertLevelChangedMessage {
    pub previous: String,
    pub current: String,
    pub usage_percent: f64,
    pub available_bytes: u64,
}

/// Cleanup completed message
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CleanupCompletedMessage {
    pub deleted_count: u64,
    pub freed_bytes: u64,
    pub emergency: bool,
    pub completed_at: DateTime<Utc>,
}

/// Replication progress message
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReplicationProgressMessage {
    pub percent: f64,
    pub bytes_per_sec: f64,
    pub eta_seconds: u64,
    pub current_file: String,
}

/// Subscriber entry
struct Subscriber {
    id: Uuid,
    name: String,
    tx: mpsc::UnboundedSender<RecorderEvent>,
}

/// RecorderHub instance
pub struct RecorderHub {
    subscribers: RwLock<HashMap<Uuid, Subscriber>>,
    subscriber_count: AtomicU64,
}

impl RecorderHub {
    /// Create new RecorderHub
    pub fn new() -> Self {
        Self {
            subscribers: RwLock::new(HashMap::new()),
            subscriber_count: AtomicU64::new(0),
        }
    }

    /// Register a new subscriber
    pub async fn subscribe(&self, name: &str) -> (Uuid, mpsc::UnboundedReceiver<RecorderEvent>) {
        let id = Uuid::new_v4();
        let (tx, rx) = mpsc::unbounded_channel();

        {
            let mut subscribers = self.subscribers.write().await;
            subscribers.insert(
                id,
                Subscriber {
                    id,
                    name: name.to_string(),
                    tx,
                },
            );
        }

        self.subscriber_count.fetch_add(1, Ordering::Relaxed);

        tracing::debug!(subscriber_id = %id, name = %name, "Hub subscriber registered");

        (id, rx)
    }

    /// Unregister a subscriber
    pub async fn unsubscribe(&self, id: &Uuid) {
        let mut subscribers = self.subscribers.write().await;
        if subscribers.remove(id).is_some() {
            self.subscriber_count.fetch_sub(1, Ordering::Relaxed);
            tracing::debug!(subscriber_id = %id, "Hub subscriber removed");
        }
    }

    /// Broadcast an event to all subscribers
    ///
    /// Subscribers whose receiver has been dropped are pruned.
    pub async fn broadcast(&self, event: RecorderEvent) {
        let kind = event.kind();
        tracing::debug!(event = %kind, "Broadcasting recorder event");

        let mut dead: Vec<Uuid> = Vec::new();
        {
            let subscribers = self.subscribers.read().await;
            for sub in subscribers.values() {
                if sub.tx.send(event.clone()).is_err() {
                    tracing::debug!(
                        subscriber_id = %sub.id,
                        name = %sub.name,
                        "Subscriber receiver dropped, scheduling removal"
                    );
                    dead.push(sub.id);
                }
            }
        }

        if !dead.is_empty() {
            let mut subscribers = self.subscribers.write().await;
            for id in dead {
                if subscribers.remove(&id).is_some() {
                    self.subscriber_count.fetch_sub(1, Ordering::Relaxed);
                }
            }
        }
    }

    /// Get subscriber count
    pub fn subscriber_count(&self) -> u64 {
        self.subscriber_count.load(Ordering::Relaxed)
    }
}

impl Default for RecorderHub {
    fn default() -> Self {
        Self::new()
    }
}

impl RecorderEvent {
    /// Event kind for logging
    pub fn kind(&self) -> &'static str {
        match self {
            RecorderEvent::RecordingStarted(_) => "recording_started",
            RecorderEvent::RecordingStopped(_) => "recording_stopped",
            RecorderEvent::RecordingFailed(_) => "recording_failed",
            RecorderEvent::RecordingAbandoned(_) => "recording_abandoned",
            RecorderEvent::NewSegment(_) => "new_segment",
            RecorderEvent::AlertLevelChanged(_) => "alert_level_changed",
            RecorderEvent::CleanupCompleted(_) => "cleanup_completed",
            RecorderEvent::ReplicationProgress(_) => "replication_progress",
        }
    }
}
