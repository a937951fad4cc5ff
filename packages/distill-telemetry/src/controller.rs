// Connection controller - owns the active session and mediates every transition
//
// The controller manages:
// - Which data source is active (none / live / file replay / paused)
// - The session history buffer and its clearing on teardown
// - The ingestion subscription lifecycle
// - Backend commands issued for each transition
// - Event emission to an observer callback
//
// State, history and playback parameters live in one `SessionCore` behind a
// single lock. Transitions, including the teardown that follows a lost backend
// channel, are additionally serialized by an async lock held across their
// backend calls, so a transition observes a stable state from its guard check
// to its commit.

use crate::backend::{self, Backend, BackendEvent};
use crate::buffer::{HistoryBuffer, HistoryMetrics, HistorySnapshot};
use crate::config::{PlaybackSpeed, SessionConfig, TelemetryConfig};
use crate::entry::TelemetryEntry;
use crate::ingestion::{spawn_ingestion, Subscription};
use crate::playback::PlaybackController;
use crate::projection::Dashboard;
use crate::settings::{Settings, SettingsPatch};
use crate::types::{
    ConnectionState, IngestionStats, SessionEvent, SessionInfo, TelemetryError, TelemetryResult,
};
use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex as AsyncMutex};

pub(crate) type EventCallback = Arc<RwLock<Option<Box<dyn Fn(SessionEvent) + Send + Sync>>>>;

/// Playback parameters of a file session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct PlaybackParams {
    pub speed: PlaybackSpeed,
    pub skip_pending: Option<i64>,
}

/// Everything that must change atomically for one session
pub(crate) struct SessionCore {
    pub state: ConnectionState,
    pub history: HistoryBuffer,
    pub playback: PlaybackParams,
    pub session_info: Option<SessionInfo>,
    pub plate_count: Option<usize>,
    pub progress: f64,
    pub completion_notified: bool,
    pub epoch: u64,
    pub session_id: String,
    pub started_at: Option<DateTime<Utc>>,
    pub stats: IngestionStats,
    default_speed: PlaybackSpeed,
}

impl SessionCore {
    pub(crate) fn new(config: &TelemetryConfig) -> Self {
        Self {
            state: ConnectionState::None,
            history: HistoryBuffer::new(config.history_capacity),
            playback: PlaybackParams {
                speed: config.default_speed,
                skip_pending: None,
            },
            session_info: None,
            plate_count: None,
            progress: 0.0,
            completion_notified: false,
            epoch: 0,
            session_id: uuid::Uuid::new_v4().to_string(),
            started_at: None,
            stats: IngestionStats::default(),
            default_speed: config.default_speed,
        }
    }

    /// Move to `to`, returning the event to publish if the state changed
    pub fn set_state(&mut self, to: ConnectionState) -> Option<SessionEvent> {
        let from = self.state;
        if from == to {
            return None;
        }
        self.state = to;
        log::info!("Session {}: {} -> {}", self.session_id, from, to);
        Some(SessionEvent::StateChanged {
            session_id: self.session_id.clone(),
            from,
            to,
        })
    }

    /// Start a fresh session in `state` and return its epoch
    fn begin(
        &mut self,
        state: ConnectionState,
        plate_count: Option<usize>,
        info: Option<SessionInfo>,
    ) -> (u64, Option<SessionEvent>) {
        self.history.clear();
        self.epoch += 1;
        self.session_id = uuid::Uuid::new_v4().to_string();
        self.started_at = Some(Utc::now());
        self.plate_count = plate_count;
        self.session_info = info;
        self.progress = 0.0;
        self.completion_notified = false;
        self.stats = IngestionStats::default();
        self.playback.skip_pending = None;
        (self.epoch, self.set_state(state))
    }

    /// Tear the session down: back to `none` with an empty history.
    /// Bumping the epoch makes any in-flight event for the old session stale.
    pub fn end(&mut self) -> Option<SessionEvent> {
        self.history.clear();
        self.epoch += 1;
        self.plate_count = None;
        self.session_info = None;
        self.progress = 0.0;
        self.completion_notified = false;
        self.started_at = None;
        self.playback = PlaybackParams {
            speed: self.default_speed,
            skip_pending: None,
        };
        self.set_state(ConnectionState::None)
    }

    pub fn conflict(&self, action: &'static str) -> TelemetryError {
        TelemetryError::StateConflict {
            action,
            state: self.state,
        }
    }
}

/// Handles shared between the controller and its ingestion task
#[derive(Clone)]
pub(crate) struct SessionShared {
    pub core: Arc<Mutex<SessionCore>>,
    pub events: EventCallback,
    /// Serializes transitions, including teardown after channel loss
    pub transition: Arc<AsyncMutex<()>>,
}

impl SessionShared {
    /// Publish events to the observer. Never called with the core lock held.
    pub fn emit(&self, events: impl IntoIterator<Item = SessionEvent>) {
        let callback = self.events.read();
        if let Some(callback) = callback.as_ref() {
            for event in events {
                callback(event);
            }
        }
    }
}

/// Point-in-time summary of the session
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SessionStatus {
    pub session_id: String,
    pub state: ConnectionState,
    pub started_at: Option<DateTime<Utc>>,
    pub progress: f64,
    pub speed: PlaybackSpeed,
    pub plate_count: Option<usize>,
    pub history: HistoryMetrics,
    pub stats: IngestionStats,
}

/// Owns the telemetry session for one backend
pub struct ConnectionController {
    pub(crate) backend: Arc<dyn Backend>,
    pub(crate) config: TelemetryConfig,
    session_config: RwLock<SessionConfig>,
    file_path: RwLock<Option<PathBuf>>,
    pub(crate) shared: SessionShared,
    subscription: Mutex<Option<Subscription>>,
}

impl ConnectionController {
    pub fn new(backend: Arc<dyn Backend>, config: TelemetryConfig) -> TelemetryResult<Self> {
        config.validate()?;
        let core = SessionCore::new(&config);
        Ok(Self {
            backend,
            config,
            session_config: RwLock::new(SessionConfig::default()),
            file_path: RwLock::new(None),
            shared: SessionShared {
                core: Arc::new(Mutex::new(core)),
                events: Arc::new(RwLock::new(None)),
                transition: Arc::new(AsyncMutex::new(())),
            },
            subscription: Mutex::new(None),
        })
    }

    /// Set event callback function
    pub fn set_event_callback<F>(&self, callback: F)
    where
        F: Fn(SessionEvent) + Send + Sync + 'static,
    {
        *self.shared.events.write() = Some(Box::new(callback));
    }

    pub fn config(&self) -> &TelemetryConfig {
        &self.config
    }

    pub fn session_config(&self) -> SessionConfig {
        *self.session_config.read()
    }

    pub fn set_session_config(&self, config: SessionConfig) {
        *self.session_config.write() = config;
    }

    /// Edit the session configuration in place
    pub fn update_session_config<R>(&self, f: impl FnOnce(&mut SessionConfig) -> R) -> R {
        f(&mut *self.session_config.write())
    }

    pub fn file_path(&self) -> Option<PathBuf> {
        self.file_path.read().clone()
    }

    pub fn set_file_path(&self, path: impl Into<PathBuf>) {
        *self.file_path.write() = Some(path.into());
    }

    /// Playback commands for file sessions
    pub fn playback(&self) -> PlaybackController<'_> {
        PlaybackController::new(self)
    }

    pub(crate) async fn call<T, F>(&self, command: F) -> TelemetryResult<T>
    where
        F: std::future::Future<Output = backend::BackendResult<T>>,
    {
        backend::call(self.config.command_timeout, command).await
    }

    fn timeout(&self) -> Option<Duration> {
        self.config.command_timeout
    }

    fn subscribe_events(&self, rx: mpsc::Receiver<BackendEvent>, epoch: u64) {
        let subscription = spawn_ingestion(
            rx,
            self.shared.clone(),
            epoch,
            Arc::clone(&self.backend),
            self.timeout(),
        );
        // Replacing drops (and cancels) any subscription left by a closed channel
        *self.subscription.lock() = Some(subscription);
    }

    fn unsubscribe(&self) {
        if let Some(subscription) = self.subscription.lock().take() {
            subscription.cancel();
        }
    }

    /// Drop the subscription and return to `none` with a cleared history
    fn end_session(&self) {
        self.unsubscribe();
        let event = self.shared.core.lock().end();
        self.shared.emit(event);
    }

    fn guard_state(&self, action: &'static str, allowed: &[ConnectionState]) -> TelemetryResult<()> {
        let core = self.shared.core.lock();
        if allowed.contains(&core.state) {
            Ok(())
        } else {
            Err(core.conflict(action))
        }
    }

    /// Connect to the live backend
    ///
    /// Requires the session configuration to be complete and the stored
    /// transport settings to be valid before anything is sent to the
    /// transport. An `already_connected` answer counts as success.
    pub async fn connect_live(&self) -> TelemetryResult<()> {
        let _transition = self.shared.transition.lock().await;
        self.guard_state("connect live", &[ConnectionState::None])?;

        let info = self.session_config().validate()?;
        let settings = self.call(self.backend.get_settings()).await?;
        settings.validate()?;

        match self.call(self.backend.connect_live()).await {
            Ok(()) => {}
            Err(TelemetryError::Transport(e)) if e.is_already_connected() => {
                log::info!("Live transport already connected, continuing");
            }
            Err(e) => return Err(e),
        }

        let rx = match self.call(self.backend.subscribe()).await {
            Ok(rx) => rx,
            Err(e) => {
                self.best_effort_disconnect().await;
                return Err(e);
            }
        };

        let (epoch, event) = self.shared.core.lock().begin(
            ConnectionState::LiveConnected,
            Some(info.plate_count),
            Some(info),
        );
        self.shared.emit(event);
        self.subscribe_events(rx, epoch);

        if let Err(e) = self.call(self.backend.start_replay(info)).await {
            log::warn!("Starting live transmission failed, rolling back: {}", e);
            self.end_session();
            self.best_effort_disconnect().await;
            return Err(e);
        }

        log::info!(
            "Live session started: {} plates, initial mass {}, initial composition {}",
            info.plate_count,
            info.initial_mass,
            info.initial_composition
        );
        Ok(())
    }

    /// Disconnect the live backend. On failure the session stays connected.
    pub async fn disconnect_live(&self) -> TelemetryResult<()> {
        let _transition = self.shared.transition.lock().await;
        self.guard_state("disconnect", &[ConnectionState::LiveConnected])?;

        self.call(self.backend.disconnect_live()).await?;
        self.end_session();
        self.best_effort_cancel().await;
        Ok(())
    }

    /// Ask the backend's file dialog for a recording and remember it
    pub async fn choose_file(&self) -> TelemetryResult<PathBuf> {
        let path = self.call(self.backend.choose_file_path()).await?;
        self.set_file_path(path.clone());
        Ok(path)
    }

    pub async fn choose_folder(&self) -> TelemetryResult<PathBuf> {
        self.call(self.backend.choose_folder_path()).await
    }

    /// Import the chosen recording and start replaying it
    pub async fn connect_file(&self) -> TelemetryResult<()> {
        let _transition = self.shared.transition.lock().await;
        self.guard_state("connect file", &[ConnectionState::None])?;

        let path = self
            .file_path()
            .ok_or_else(|| TelemetryError::validation("no recording file selected"))?;

        let summary = self.call(self.backend.import_file(path.clone())).await?;
        let rx = self.call(self.backend.subscribe()).await?;

        let speed = self.shared.core.lock().playback.speed;
        if let Err(e) = self.call(self.backend.set_speed(speed)).await {
            log::warn!("Could not apply replay speed {}: {}", speed, e);
        }

        let session = self.session_config();
        let info = SessionInfo {
            plate_count: summary.plate_count,
            initial_mass: session.initial_mass.unwrap_or(0.0),
            initial_composition: session.initial_composition.unwrap_or(0.0),
        };

        let (epoch, event) = self
            .shared
            .core
            .lock()
            .begin(ConnectionState::FileReplaying, None, None);
        self.shared.emit(event);
        self.subscribe_events(rx, epoch);

        if let Err(e) = self.call(self.backend.start_replay(info)).await {
            log::warn!("Starting replay failed, rolling back: {}", e);
            self.end_session();
            self.best_effort_cancel().await;
            return Err(e);
        }

        log::info!(
            "Replaying {} ({} entries, {} plates)",
            path.display(),
            summary.entry_count,
            summary.plate_count
        );
        Ok(())
    }

    pub async fn pause(&self) -> TelemetryResult<()> {
        let _transition = self.shared.transition.lock().await;
        self.guard_state("pause", &[ConnectionState::FileReplaying])?;

        self.call(self.backend.pause_replay()).await?;
        let event = self.shared.core.lock().set_state(ConnectionState::FilePaused);
        self.shared.emit(event);
        Ok(())
    }

    /// Resume a paused replay that has not reached 100%
    pub async fn resume(&self) -> TelemetryResult<()> {
        let _transition = self.shared.transition.lock().await;
        {
            let core = self.shared.core.lock();
            if core.state != ConnectionState::FilePaused {
                return Err(core.conflict("resume"));
            }
            if core.progress >= 100.0 {
                return Err(TelemetryError::validation("replay already complete"));
            }
        }

        self.call(self.backend.resume_replay()).await?;
        let event = self.shared.core.lock().set_state(ConnectionState::FileReplaying);
        self.shared.emit(event);
        Ok(())
    }

    /// Stop the file session and clear its history
    pub async fn cancel(&self) -> TelemetryResult<()> {
        let _transition = self.shared.transition.lock().await;
        self.guard_state(
            "cancel",
            &[ConnectionState::FileReplaying, ConnectionState::FilePaused],
        )?;

        self.call(self.backend.cancel_replay()).await?;
        self.end_session();
        Ok(())
    }

    /// Tear down any active session regardless of state
    pub async fn shutdown(&self) {
        let _transition = self.shared.transition.lock().await;
        let state = self.state();
        self.end_session();
        match state {
            ConnectionState::LiveConnected => {
                self.best_effort_disconnect().await;
                self.best_effort_cancel().await;
            }
            ConnectionState::FileReplaying | ConnectionState::FilePaused => {
                self.best_effort_cancel().await;
            }
            ConnectionState::None => {}
        }
    }

    async fn best_effort_disconnect(&self) {
        if let Err(e) = self.call(self.backend.disconnect_live()).await {
            log::warn!("Best-effort disconnect failed: {}", e);
        }
    }

    async fn best_effort_cancel(&self) {
        if let Err(e) = self.call(self.backend.cancel_replay()).await {
            log::warn!("Best-effort cancel failed: {}", e);
        }
    }

    /// Export the backend-side history of the session to `path`
    pub async fn export(&self, path: impl AsRef<Path>) -> TelemetryResult<()> {
        self.call(self.backend.export(path.as_ref().to_path_buf())).await
    }

    pub async fn settings(&self) -> TelemetryResult<Settings> {
        self.call(self.backend.get_settings()).await
    }

    pub async fn save_settings(&self, patch: SettingsPatch) -> TelemetryResult<Settings> {
        self.call(self.backend.save_settings(patch)).await
    }

    pub async fn list_available_ports(&self) -> TelemetryResult<Vec<String>> {
        self.call(self.backend.list_available_ports()).await
    }

    pub fn state(&self) -> ConnectionState {
        self.shared.core.lock().state
    }

    pub fn session_id(&self) -> String {
        self.shared.core.lock().session_id.clone()
    }

    pub fn session_info(&self) -> Option<SessionInfo> {
        self.shared.core.lock().session_info
    }

    /// Latest replay progress in percent
    pub fn progress(&self) -> f64 {
        self.shared.core.lock().progress
    }

    pub fn is_complete(&self) -> bool {
        self.progress() >= 100.0
    }

    pub fn stats(&self) -> IngestionStats {
        self.shared.core.lock().stats
    }

    pub fn snapshot(&self) -> HistorySnapshot {
        self.shared.core.lock().history.snapshot()
    }

    pub fn latest(&self) -> Option<Arc<TelemetryEntry>> {
        self.shared.core.lock().history.latest().cloned()
    }

    pub fn history_len(&self) -> usize {
        self.shared.core.lock().history.len()
    }

    /// All chart projections computed from one consistent snapshot
    pub fn dashboard(&self) -> Dashboard {
        Dashboard::from_snapshot(&self.snapshot())
    }

    pub fn status(&self) -> SessionStatus {
        let core = self.shared.core.lock();
        SessionStatus {
            session_id: core.session_id.clone(),
            state: core.state,
            started_at: core.started_at,
            progress: core.progress,
            speed: core.playback.speed,
            plate_count: core.plate_count,
            history: core.history.metrics(),
            stats: core.stats,
        }
    }
}

impl Drop for ConnectionController {
    fn drop(&mut self) {
        // Cancelling the subscription stops ingestion immediately
        self.unsubscribe();
        log::info!("ConnectionController {} dropped", self.shared.core.lock().session_id);
    }
}
