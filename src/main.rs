//! IS24 Recserver - Continuous Recording Backend
//!
//! Main entry point for the Recserver application.

use is24_recserver::{
    config_store::ConfigStore,
    recorder_hub::RecorderHub,
    recording_supervisor::{RecordingSupervisor, StartOptions, SupervisorConfig},
    replication_engine::ReplicationEngine,
    sensor_gateway::{HttpSensorTrigger, JsonlSensorWriter},
    session_coordinator::SessionCoordinator,
    state::{AppConfig, AppState},
    storage_guardian::{StorageConfig, StorageGuardian},
};
use sqlx::mysql::MySqlPoolOptions;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if present
    dotenvy::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "is24_recserver=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting IS24 Recserver v{}", env!("CARGO_PKG_VERSION"));

    // Load configuration
    let config = AppConfig::default();
    tracing::info!(
        database_url = %config.database_url,
        recordings_dir = %config.recordings_dir.display(),
        ffmpeg_bin = %config.ffmpeg_bin,
        sensor_gateway_url = %config.sensor_gateway_url,
        "Configuration loaded"
    );

    // Create database pool
    let pool = MySqlPoolOptions::new()
        .max_connections(10)
        .acquire_timeout(Duration::from_secs(10))
        .connect(&config.database_url)
        .await?;

    tracing::info!("Database connected");

    // Initialize components
    let config_store = Arc::new(ConfigStore::new(pool.clone()).await?);
    tracing::info!("ConfigStore initialized");

    let hub = Arc::new(RecorderHub::new());

    let supervisor_settings = config_store.service().get_supervisor_settings().await?;
    let supervisor = Arc::new(RecordingSupervisor::new(
        SupervisorConfig {
            recordings_dir: config.recordings_dir.clone(),
            ffmpeg_bin: config.ffmpeg_bin.clone(),
            segment_seconds: supervisor_settings.segment_seconds,
            health_interval_secs: config.health_interval_secs,
            auto_reconnect: supervisor_settings.auto_reconnect,
            max_reconnect_attempts: supervisor_settings.max_reconnect_attempts,
            reconnect_base_ms: supervisor_settings.reconnect_base_ms,
            ..SupervisorConfig::default()
        },
        hub.clone(),
    ));
    tracing::info!("RecordingSupervisor initialized");

    let storage_settings = config_store.service().get_storage_settings().await?;
    let retention_policy = config_store.service().get_retention_policy().await?;
    let guardian = Arc::new(StorageGuardian::new(
        StorageConfig {
            recordings_dir: config.recordings_dir.clone(),
            poll_interval_secs: config.storage_poll_secs,
            warning_percent: storage_settings.warning_percent,
            critical_percent: storage_settings.critical_percent,
            auto_cleanup_percent: storage_settings.auto_cleanup_percent,
            cleanup_target_percent: storage_settings.cleanup_target_percent,
            ..StorageConfig::default()
        },
        retention_policy,
        hub.clone(),
    ));
    tracing::info!("StorageGuardian initialized");

    let replication_config = config_store.service().get_replication_config().await?;
    let replication = Arc::new(
        ReplicationEngine::new(
            replication_config,
            config.recordings_dir.clone(),
            hub.clone(),
        )
        .with_store(config_store.clone()),
    );
    if let Some(last_sync) = config_store
        .get_cached_setting("replication_last_sync")
        .await
        .and_then(|v| serde_json::from_value(v).ok())
    {
        replication.restore_last_sync(last_sync).await;
    }
    tracing::info!("ReplicationEngine initialized");

    let coordinator = Arc::new(SessionCoordinator::new(
        supervisor.clone(),
        Arc::new(JsonlSensorWriter::new()),
        Arc::new(HttpSensorTrigger::new(config.sensor_gateway_url.clone())),
    ));
    tracing::info!("SessionCoordinator initialized");

    // Create application state
    let state = AppState {
        pool,
        config,
        config_store,
        hub: hub.clone(),
        supervisor: supervisor.clone(),
        guardian: guardian.clone(),
        replication: replication.clone(),
        coordinator: coordinator.clone(),
    };

    // Event log task: every hub event lands in the structured log
    let (subscriber_id, mut events) = hub.subscribe("main-log").await;
    tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            tracing::info!(kind = event.kind(), "event");
        }
    });

    // Background monitors
    supervisor.start_monitor();
    guardian.start_monitor();
    replication.start_scheduler();
    tracing::info!("Background monitors started");

    // Session records left open by a previous crash
    match state.config_store.service().list_recent_sessions(200).await {
        Ok(records) => {
            for record in records.iter().filter(|r| r.ended_at.is_none()) {
                let fin = is24_recserver::config_store::SessionFinalize {
                    session_id: record.session_id.clone(),
                    ended_at: chrono::Utc::now(),
                    duration_seconds: 0,
                    segment_count: 0,
                    frames_processed: 0,
                    manifest_path: None,
                    status: "interrupted".to_string(),
                };
                if let Err(e) = state.config_store.service().record_session_stop(fin).await {
                    tracing::error!(session_id = %record.session_id, error = %e, "Failed to finalize dangling session");
                } else {
                    tracing::warn!(session_id = %record.session_id, "Finalized dangling session as interrupted");
                }
            }
        }
        Err(e) => tracing::error!(error = %e, "Failed to scan for dangling sessions"),
    }

    // Resume continuous recording for cameras flagged in the inventory
    match state.config_store.service().list_recording_cameras().await {
        Ok(cameras) => {
            for camera in cameras {
                let opts = StartOptions {
                    scenario_id: camera.scenario_id.clone(),
                    scenario_name: camera.scenario_name.clone(),
                    ..StartOptions::default()
                };
                match camera.to_source() {
                    Ok(source) => {
                        if let Err(e) = supervisor.start(&source, opts).await {
                            tracing::error!(camera_id = %source.camera_id, error = %e, "Auto-start failed");
                        }
                    }
                    Err(e) => {
                        tracing::warn!(camera_id = %camera.camera_id, error = %e, "Camera skipped")
                    }
                }
            }
        }
        Err(e) => tracing::error!(error = %e, "Failed to load recording cameras"),
    }

    // Record sessions in the audit table as they start and stop
    let audit_store = state.config_store.clone();
    let (audit_id, mut audit_events) = hub.subscribe("session-audit").await;
    tokio::spawn(async move {
        use is24_recserver::config_store::{SessionFinalize, SessionInsert};
        use is24_recserver::recorder_hub::RecorderEvent;
        while let Some(event) = audit_events.recv().await {
            let result = match &event {
                RecorderEvent::RecordingStarted(msg) => {
                    let camera_name = audit_store
                        .get_cached_cameras()
                        .await
                        .into_iter()
                        .find(|c| c.camera_id == msg.camera_id)
                        .map(|c| c.name)
                        .unwrap_or_else(|| msg.camera_id.clone());
                    audit_store
                        .service()
                        .record_session_start(SessionInsert {
                            session_id: msg.session_id.clone(),
                            camera_id: msg.camera_id.clone(),
                            camera_name,
                            scenario_id: None,
                            scenario_name: msg.scenario_name.clone(),
                            master_timestamp: msg.started_at,
                        })
                        .await
                }
                RecorderEvent::RecordingStopped(msg) => {
                    audit_store
                        .service()
                        .record_session_stop(SessionFinalize {
                            session_id: msg.session_id.clone(),
                            ended_at: chrono::Utc::now(),
                            duration_seconds: msg.duration_seconds,
                            segment_count: msg.segment_count as i32,
                            frames_processed: msg.frames_processed as i64,
                            manifest_path: None,
                            status: "stopped".to_string(),
                        })
                        .await
                }
                RecorderEvent::RecordingAbandoned(msg) => {
                    audit_store
                        .service()
                        .record_session_stop(SessionFinalize {
                            session_id: msg.session_id.clone(),
                            ended_at: chrono::Utc::now(),
                            duration_seconds: 0,
                            segment_count: 0,
                            frames_processed: 0,
                            manifest_path: None,
                            status: "abandoned".to_string(),
                        })
                        .await
                }
                _ => Ok(()),
            };
            if let Err(e) = result {
                tracing::error!(error = %e, "Session audit write failed");
            }
        }
    });

    tracing::info!("IS24 Recserver ready");

    // Run until interrupted
    tokio::signal::ctrl_c().await?;
    tracing::info!("Shutdown signal received");

    // Graceful shutdown: sessions first, then the monitors
    coordinator.stop_all().await;
    supervisor.stop_all().await;
    supervisor.stop_monitor();
    guardian.stop_monitor();
    replication.stop_scheduler();
    hub.unsubscribe(&subscriber_id).await;
    hub.unsubscribe(&audit_id).await;

    tracing::info!("IS24 Recserver stopped");
    Ok(())
}
