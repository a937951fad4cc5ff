// Backend command surface
//
// The measurement backend (Modbus transport, recording import/export, settings
// persistence, dialogs) lives behind the `Backend` trait. Commands are async
// request/response calls; telemetry is pushed through a subscription channel.
//
// Implementations:
// - `SimulatedBackend`: in-process replay of recordings, used by tests and the CLI

mod recording;
mod simulated;

use crate::config::PlaybackSpeed;
use crate::entry::TelemetryEntry;
use crate::settings::{Settings, SettingsPatch};
use crate::types::{SessionInfo, TelemetryError, TelemetryResult};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc;

pub use recording::{export_csv, load_recording, Recording};
pub use simulated::{BackendCommand, SimulatedBackend};

/// Machine-readable error identifiers reported by backends
pub mod codes {
    pub const ALREADY_CONNECTED: &str = "already_connected";
    pub const NOT_CONNECTED: &str = "not_connected";
    pub const CONNECTION_FAILED: &str = "connection_failed";
    pub const NO_DATA: &str = "no_data";
    pub const IMPORT_FAILED: &str = "import_failed";
    pub const EXPORT_FAILED: &str = "export_failed";
    pub const SETTINGS_FAILED: &str = "settings_failed";
    pub const DIALOG_CANCELLED: &str = "dialog_cancelled";
    pub const TIMEOUT: &str = "timeout";
    pub const INJECTED: &str = "injected";
}

/// Failure reported by a backend command
#[derive(Debug, Clone, Error, Serialize, Deserialize, PartialEq, Eq)]
#[error("{code}: {message}")]
pub struct BackendError {
    pub code: String,
    pub message: String,
}

impl BackendError {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
        }
    }

    pub fn already_connected() -> Self {
        Self::new(codes::ALREADY_CONNECTED, "Already connected")
    }

    pub fn timeout(after: Duration) -> Self {
        Self::new(codes::TIMEOUT, format!("no response after {} ms", after.as_millis()))
    }

    pub fn is_already_connected(&self) -> bool {
        self.code == codes::ALREADY_CONNECTED
    }
}

pub type BackendResult<T> = Result<T, BackendError>;

/// Events pushed by the backend to subscribers
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", content = "payload", rename_all = "kebab-case")]
pub enum BackendEvent {
    TelemetryEntry(TelemetryEntry),
    SessionInitialData(SessionInfo),
}

/// Outcome of importing a recording into the backend
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ImportSummary {
    pub plate_count: usize,
    pub entry_count: usize,
}

/// Commands the telemetry core issues to the measurement backend
#[async_trait]
pub trait Backend: Send + Sync {
    /// Open the live transport. Reports `already_connected` if it is open.
    async fn connect_live(&self) -> BackendResult<()>;

    async fn disconnect_live(&self) -> BackendResult<()>;

    /// Start transmitting entries from the active source
    async fn start_replay(&self, info: SessionInfo) -> BackendResult<()>;

    async fn pause_replay(&self) -> BackendResult<()>;

    async fn resume_replay(&self) -> BackendResult<()>;

    /// Stop transmission and drop the backend-side history
    async fn cancel_replay(&self) -> BackendResult<()>;

    async fn set_speed(&self, speed: PlaybackSpeed) -> BackendResult<()>;

    /// Move the replay cursor by a signed number of seconds
    async fn skip(&self, offset_seconds: i64) -> BackendResult<()>;

    async fn import_file(&self, path: PathBuf) -> BackendResult<ImportSummary>;

    async fn choose_file_path(&self) -> BackendResult<PathBuf>;

    async fn choose_folder_path(&self) -> BackendResult<PathBuf>;

    async fn export(&self, path: PathBuf) -> BackendResult<()>;

    async fn get_settings(&self) -> BackendResult<Settings>;

    async fn save_settings(&self, patch: SettingsPatch) -> BackendResult<Settings>;

    async fn list_available_ports(&self) -> BackendResult<Vec<String>>;

    /// Open a new event subscription. Dropping the receiver unsubscribes.
    async fn subscribe(&self) -> BackendResult<mpsc::Receiver<BackendEvent>>;
}

/// Await a backend command, bounded by `timeout` when one is configured
pub async fn call<T, F>(timeout: Option<Duration>, command: F) -> TelemetryResult<T>
where
    F: Future<Output = BackendResult<T>>,
{
    let result = match timeout {
        Some(limit) => match tokio::time::timeout(limit, command).await {
            Ok(result) => result,
            Err(_) => Err(BackendError::timeout(limit)),
        },
        None => command.await,
    };
    result.map_err(TelemetryError::from)
}
