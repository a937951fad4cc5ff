// Telemetry core for distillation column monitoring
//
// Ingests live or replayed process snapshots pushed by a measurement backend,
// keeps a bounded session history, and derives chart-ready projections from it.
//
// Architecture:
// - `entry`: Telemetry entry model and normalization
// - `buffer`: Bounded history anchored at the session's first entry
// - `projection`: Pure chart projections over history snapshots
// - `controller`: Connection state machine owning the active session
// - `playback`: Speed, skip and play/pause for file replay
// - `ingestion`: Subscription task feeding backend events into the session
// - `backend`: Backend command trait, recordings and a simulated backend
// - `config` / `settings`: Session configuration and persisted transport settings

pub mod backend;
pub mod buffer;
pub mod config;
pub mod controller;
pub mod entry;
pub mod ingestion;
pub mod playback;
pub mod projection;
pub mod settings;
pub mod types;

pub use backend::{Backend, BackendError, BackendEvent, SimulatedBackend};
pub use buffer::{HistoryBuffer, HistorySnapshot, DEFAULT_HISTORY_CAPACITY};
pub use config::{PlaybackSpeed, SessionConfig, TelemetryConfig};
pub use controller::{ConnectionController, SessionStatus};
pub use entry::{CompositionPair, TelemetryEntry};
pub use ingestion::Subscription;
pub use playback::PlaybackController;
pub use projection::Dashboard;
pub use settings::{Settings, SettingsPatch, SettingsStore, TransportSettings};
pub use types::{
    ConnectionState, IngestionStats, SessionEvent, SessionInfo, TelemetryError, TelemetryResult,
};
