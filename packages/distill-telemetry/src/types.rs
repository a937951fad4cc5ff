// Common types for the telemetry core

use crate::backend::BackendError;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Result type for telemetry operations
pub type TelemetryResult<T> = Result<T, TelemetryError>;

/// Errors that can occur while driving a telemetry session
#[derive(Debug, Error)]
pub enum TelemetryError {
    /// Missing or out-of-range configuration, caught before any backend call
    #[error("Validation error: {0}")]
    Validation(String),

    /// The backend reported a failure for a command
    #[error("Transport error: {0}")]
    Transport(#[from] BackendError),

    /// A transition was requested from a state that does not accept it
    #[error("Cannot {action} while {state}")]
    StateConflict {
        action: &'static str,
        state: ConnectionState,
    },

    #[error("Event channel closed")]
    ChannelClosed,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("Import error: {0}")]
    Import(String),
}

impl TelemetryError {
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    pub fn is_validation(&self) -> bool {
        matches!(self, Self::Validation(_))
    }

    pub fn is_state_conflict(&self) -> bool {
        matches!(self, Self::StateConflict { .. })
    }

    pub fn is_transport(&self) -> bool {
        matches!(self, Self::Transport(_))
    }
}

/// Which data source is currently active
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "camelCase")]
pub enum ConnectionState {
    /// No source connected
    #[default]
    None,

    /// Streaming from the live measurement backend
    LiveConnected,

    /// Replaying an imported recording
    FileReplaying,

    /// Replay held, either by the user or because it reached 100%
    FilePaused,
}

impl ConnectionState {
    /// True for every state that owns a running session
    pub fn is_active(self) -> bool {
        !matches!(self, Self::None)
    }

    /// True for the two file-replay states
    pub fn is_file(self) -> bool {
        matches!(self, Self::FileReplaying | Self::FilePaused)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::None => "none",
            Self::LiveConnected => "liveConnected",
            Self::FileReplaying => "fileReplaying",
            Self::FilePaused => "filePaused",
        }
    }
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Initial conditions announced for (or configured on) a session
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct SessionInfo {
    pub plate_count: usize,
    pub initial_mass: f64,
    pub initial_composition: f64,
}

/// Events published by the connection controller to its observer
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    StateChanged {
        session_id: String,
        from: ConnectionState,
        to: ConnectionState,
    },
    /// Replay reached 100%; published once per session
    Completed { session_id: String },
    SessionInitialData {
        session_id: String,
        info: SessionInfo,
    },
    Error { session_id: String, error: String },
}

/// Counters describing what the ingestion pipeline did in the current session
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq)]
pub struct IngestionStats {
    pub entries_received: u64,
    pub entries_accepted: u64,
    pub entries_rejected: u64,
    pub stale_events_dropped: u64,
}
