//! Session manifest
//!
//! The durable record of a completed session: identity, timing, the
//! measured start offsets of each sub-resource, and the produced
//! artifacts. Written once into the recording directory and never
//! modified afterwards.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::recording_supervisor::session::SegmentFile;
use crate::sensor_gateway::SensorLogSummary;

pub const MANIFEST_VERSION: &str = "1.0";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Manifest {
    pub version: String,
    pub session_id: String,
    pub camera: ManifestCamera,
    pub scenario: Option<ManifestScenario>,
    pub timing: ManifestTiming,
    pub synchronization: ManifestSync,
    pub video: ManifestVideo,
    pub sensors: Option<ManifestSensors>,
    pub generated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ManifestCamera {
    pub id: String,
    pub name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ManifestScenario {
    pub id: Option<String>,
    pub name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ManifestTiming {
    pub master_timestamp: DateTime<Utc>,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub duration_seconds: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ManifestSync {
    pub video_offset_ms: i64,
    pub sensor_offset_ms: i64,
    /// Always `abs(video_offset_ms - sensor_offset_ms)`
    pub total_offset_ms: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ManifestVideo {
    pub files: Vec<String>,
    pub frames_processed: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ManifestSensors {
    pub filename: String,
    pub record_count: u64,
    pub filepath: String,
}

/// Inputs for manifest generation at session stop
pub struct ManifestInput<'a> {
    pub session_id: &'a str,
    pub camera_id: &'a str,
    pub camera_name: &'a str,
    pub scenario_id: Option<&'a str>,
    pub scenario_name: Option<&'a str>,
    pub master_timestamp: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub video_offset_ms: i64,
    pub sensor_offset_ms: i64,
    pub segments: &'a [SegmentFile],
    pub frames_processed: u64,
    pub sensors: Option<&'a SensorLogSummary>,
}

impl Manifest {
    pub fn build(input: ManifestInput<'_>) -> Self {
        let duration_ms = (input.end_time - input.master_timestamp).num_milliseconds().max(0);
        Self {
            version: MANIFEST_VERSION.to_string(),
            session_id: input.session_id.to_string(),
            camera: ManifestCamera {
                id: input.camera_id.to_string(),
                name: input.camera_name.to_string(),
            },
            scenario: input.scenario_name.map(|name| ManifestScenario {
                id: input.scenario_id.map(|s| s.to_string()),
                name: name.to_string(),
            }),
            timing: ManifestTiming {
                master_timestamp: input.master_timestamp,
                start_time: input.master_timestamp,
                end_time: input.end_time,
                duration_seconds: duration_ms / 1000,
            },
            synchronization: ManifestSync {
                video_offset_ms: input.video_offset_ms,
                sensor_offset_ms: input.sensor_offset_ms,
                total_offset_ms: (input.video_offset_ms - input.sensor_offset_ms).abs(),
            },
            video: ManifestVideo {
                files: input
                    .segments
                    .iter()
                    .map(|s| s.path.display().to_string())
                    .collect(),
                frames_processed: input.frames_processed,
            },
            sensors: input.sensors.map(|s| ManifestSensors {
                filename: s.filename.clone(),
                record_count: s.record_count,
                filepath: s.filepath.display().to_string(),
            }),
            generated_at: Utc::now(),
        }
    }

    /// `session_{first8}.json`
    pub fn file_name(session_id: &str) -> String {
        format!("session_{}.json", &session_id[..session_id.len().min(8)])
    }

    /// Write into the recording directory, returning the manifest path
    pub async fn write_to(&self, dir: &Path) -> crate::Result<PathBuf> {
        let path = dir.join(Self::file_name(&self.session_id));
        let bytes = serde_json::to_vec_pretty(self)?;
        tokio::fs::create_dir_all(dir).await?;
        tokio::fs::write(&path, bytes).await?;
        Ok(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn input_at<'a>(master: DateTime<Utc>, end: DateTime<Utc>) -> ManifestInput<'a> {
        ManifestInput {
            session_id: "a1b2c3d4-e5f6-0000-0000-000000000000",
            camera_id: "cam-01",
            camera_name: "Front Door",
            scenario_id: Some("sc-9"),
            scenario_name: Some("Lab"),
            master_timestamp: master,
            end_time: end,
            video_offset_ms: 120,
            sensor_offset_ms: 350,
            segments: &[],
            frames_processed: 3600,
            sensors: None,
        }
    }

    #[test]
    fn test_offset_and_duration_invariants() {
        let master = Utc.with_ymd_and_hms(2026, 3, 14, 10, 0, 0).unwrap();
        let end = master + chrono::Duration::milliseconds(120_900);
        let manifest = Manifest::build(input_at(master, end));

        assert_eq!(
            manifest.synchronization.total_offset_ms,
            (manifest.synchronization.video_offset_ms
                - manifest.synchronization.sensor_offset_ms)
                .abs()
        );
        // floor((end - master) / 1000)
        assert_eq!(manifest.timing.duration_seconds, 120);
    }

    #[test]
    fn test_serializes_camel_case() {
        let master = Utc.with_ymd_and_hms(2026, 3, 14, 10, 0, 0).unwrap();
        let manifest = Manifest::build(input_at(master, master));
        let json = serde_json::to_value(&manifest).unwrap();

        assert_eq!(json["sessionId"], "a1b2c3d4-e5f6-0000-0000-000000000000");
        assert_eq!(json["timing"]["masterTimestamp"], json["timing"]["startTime"]);
        assert_eq!(json["synchronization"]["totalOffsetMs"], 230);
        assert_eq!(json["scenario"]["name"], "Lab");
        assert!(json["sensors"].is_null());
        assert_eq!(json["video"]["framesProcessed"], 3600);
    }

    #[test]
    fn test_file_name_uses_first_eight_chars() {
        assert_eq!(
            Manifest::file_name("a1b2c3d4-e5f6-0000-0000-000000000000"),
            "session_a1b2c3d4.json"
        );
        assert_eq!(Manifest::file_name("abc"), "session_abc.json");
    }
}
