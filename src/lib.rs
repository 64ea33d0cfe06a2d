//! IS24 Recserver Library
//!
//! Continuous recording backend for camera/sensor capture rigs.
//!
//! ## Architecture (6 Components)
//!
//! 1. ConfigStore - SSoT for cameras, settings, session records
//! 2. RecordingSupervisor - Segmented capture process supervision
//! 3. StorageGuardian - Disk watching, retention, emergency eviction
//! 4. ReplicationEngine - Verified off-box copies on a schedule
//! 5. SessionCoordinator - Video + sensor sessions under one clock
//! 6. RecorderHub - Lifecycle/storage/replication event fan-out
//!
//! ## Design Principles
//!
//! - SSoT: ConfigStore is the single source of truth
//! - SOLID: Single responsibility per module
//! - Explicit state: no module-level globals, services are constructed
//!   and injected

pub mod config_store;
pub mod recorder_hub;
pub mod recording_supervisor;
pub mod replication_engine;
pub mod sensor_gateway;
pub mod session_coordinator;
pub mod storage_guardian;
pub mod error;
pub mod state;

pub use error::{Error, Result};
pub use state::AppState;
