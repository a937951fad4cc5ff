// In-process backend that replays recordings
//
// Behaves like the measurement backend as seen from the telemetry core:
// recordings are imported and transmitted entry by entry, either paced by a
// timer (1 s / speed per entry) or stepped manually for deterministic tests.
// Live mode keeps the connect/disconnect semantics and accepts injected
// entries. Every command can be made to fail or stall.

use super::recording::{export_csv, load_recording};
use super::{codes, Backend, BackendError, BackendEvent, BackendResult, ImportSummary};
use crate::config::PlaybackSpeed;
use crate::entry::TelemetryEntry;
use crate::settings::{Settings, SettingsPatch, SettingsStore};
use crate::types::SessionInfo;
use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use std::collections::{HashMap, VecDeque};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Identifies a backend command for call logs and fault injection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BackendCommand {
    ConnectLive,
    DisconnectLive,
    StartReplay,
    PauseReplay,
    ResumeReplay,
    CancelReplay,
    SetSpeed,
    Skip,
    ImportFile,
    ChooseFilePath,
    ChooseFolderPath,
    Export,
    GetSettings,
    SaveSettings,
    ListAvailablePorts,
    Subscribe,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Pacing {
    Manual,
    Timed(Duration),
}

#[derive(Debug, Default)]
enum Source {
    #[default]
    Empty,
    Live,
    Playback {
        entries: Vec<Arc<TelemetryEntry>>,
        cursor: usize,
        info: SessionInfo,
    },
}

#[derive(Default)]
struct Inner {
    live_connected: bool,
    source: Source,
    transmitting: bool,
    paused: bool,
    speed: PlaybackSpeed,
    history: Vec<Arc<TelemetryEntry>>,
    subscribers: Vec<mpsc::Sender<BackendEvent>>,
    emitter: Option<CancellationToken>,
    failures: HashMap<BackendCommand, VecDeque<BackendError>>,
    delays: HashMap<BackendCommand, Duration>,
    calls: Vec<BackendCommand>,
    file_dialog: Option<PathBuf>,
    folder_dialog: Option<PathBuf>,
    ports: Vec<String>,
}

impl Inner {
    fn stop_emitter(&mut self) {
        if let Some(token) = self.emitter.take() {
            token.cancel();
        }
    }
}

/// Cheaply cloneable handle to a simulated backend
#[derive(Clone)]
pub struct SimulatedBackend {
    inner: Arc<Mutex<Inner>>,
    settings: Arc<RwLock<Settings>>,
    store: Option<Arc<SettingsStore>>,
    pacing: Pacing,
}

impl Default for SimulatedBackend {
    fn default() -> Self {
        Self::manual()
    }
}

impl SimulatedBackend {
    fn with_pacing(pacing: Pacing) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner::default())),
            settings: Arc::new(RwLock::new(Settings::default())),
            store: None,
            pacing,
        }
    }

    /// Entries are only transmitted when `step` is called
    pub fn manual() -> Self {
        Self::with_pacing(Pacing::Manual)
    }

    /// Entries are transmitted every `base / speed`
    pub fn paced(base: Duration) -> Self {
        Self::with_pacing(Pacing::Timed(base))
    }

    /// Persist settings through `store` instead of keeping them in memory
    pub fn with_settings_store(mut self, store: SettingsStore) -> Self {
        *self.settings.write() = store.get();
        self.store = Some(Arc::new(store));
        self
    }

    pub fn set_file_dialog(&self, path: Option<PathBuf>) {
        self.inner.lock().file_dialog = path;
    }

    pub fn set_folder_dialog(&self, path: Option<PathBuf>) {
        self.inner.lock().folder_dialog = path;
    }

    pub fn set_ports(&self, ports: Vec<String>) {
        self.inner.lock().ports = ports;
    }

    /// Make the next call of `command` fail with `error`
    pub fn fail_next(&self, command: BackendCommand, error: BackendError) {
        self.inner
            .lock()
            .failures
            .entry(command)
            .or_default()
            .push_back(error);
    }

    /// Delay every call of `command` before it runs
    pub fn delay(&self, command: BackendCommand, delay: Duration) {
        self.inner.lock().delays.insert(command, delay);
    }

    /// Commands received so far, in order
    pub fn calls(&self) -> Vec<BackendCommand> {
        self.inner.lock().calls.clone()
    }

    pub fn call_count(&self, command: BackendCommand) -> usize {
        self.inner.lock().calls.iter().filter(|c| **c == command).count()
    }

    pub fn speed(&self) -> PlaybackSpeed {
        self.inner.lock().speed
    }

    pub fn is_live_connected(&self) -> bool {
        self.inner.lock().live_connected
    }

    pub fn is_transmitting(&self) -> bool {
        let inner = self.inner.lock();
        inner.transmitting && !inner.paused
    }

    /// Position of the replay cursor, if a recording is loaded
    pub fn cursor(&self) -> Option<usize> {
        match &self.inner.lock().source {
            Source::Playback { cursor, .. } => Some(*cursor),
            _ => None,
        }
    }

    pub fn subscriber_count(&self) -> usize {
        let mut inner = self.inner.lock();
        inner.subscribers.retain(|tx| !tx.is_closed());
        inner.subscribers.len()
    }

    /// Entries transmitted since the last cancel
    pub fn history_len(&self) -> usize {
        self.inner.lock().history.len()
    }

    async fn enter(&self, command: BackendCommand) -> BackendResult<()> {
        let (failure, delay) = {
            let mut inner = self.inner.lock();
            inner.calls.push(command);
            let failure = inner.failures.get_mut(&command).and_then(|q| q.pop_front());
            (failure, inner.delays.get(&command).copied())
        };
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        match failure {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }

    /// Push an event to every live subscriber, dropping closed ones
    pub async fn broadcast(&self, event: BackendEvent) {
        let subscribers = {
            let mut inner = self.inner.lock();
            inner.subscribers.retain(|tx| !tx.is_closed());
            inner.subscribers.clone()
        };
        for tx in subscribers {
            if tx.send(event.clone()).await.is_err() {
                log::debug!("Subscriber went away during broadcast");
            }
        }
    }

    /// Drop every subscription sender, as if the backend went away
    pub fn close_subscriptions(&self) {
        self.inner.lock().subscribers.clear();
    }

    /// Transmit the next replay entry
    ///
    /// Returns `None` when nothing is transmitting, the replay is paused, or
    /// the recording is exhausted (which also ends the transmission).
    pub async fn step(&self) -> Option<TelemetryEntry> {
        let entry = {
            let mut inner = self.inner.lock();
            if !inner.transmitting || inner.paused {
                return None;
            }
            let next = match &mut inner.source {
                Source::Playback { entries, cursor, .. } => {
                    if *cursor >= entries.len() {
                        None
                    } else {
                        let mut entry = (*entries[*cursor]).clone();
                        entry.percent_complete = (*cursor + 1) as f64 / entries.len() as f64 * 100.0;
                        *cursor += 1;
                        Some(entry)
                    }
                }
                _ => return None,
            };
            match next {
                Some(entry) => {
                    inner.history.push(Arc::new(entry.clone()));
                    entry
                }
                None => {
                    log::info!("Replay finished, no more data");
                    inner.transmitting = false;
                    inner.stop_emitter();
                    return None;
                }
            }
        };

        self.broadcast(BackendEvent::TelemetryEntry(entry.clone())).await;
        Some(entry)
    }

    /// Transmit a live reading; requires a live connection that is transmitting
    pub async fn push_live_entry(&self, entry: TelemetryEntry) -> BackendResult<()> {
        {
            let mut inner = self.inner.lock();
            if !inner.live_connected || !inner.transmitting {
                return Err(BackendError::new(codes::NOT_CONNECTED, "Live transport is not transmitting"));
            }
            inner.history.push(Arc::new(entry.clone()));
        }
        self.broadcast(BackendEvent::TelemetryEntry(entry)).await;
        Ok(())
    }

    fn spawn_emitter(&self) {
        let Pacing::Timed(base) = self.pacing else {
            return;
        };
        let token = CancellationToken::new();
        {
            let mut inner = self.inner.lock();
            inner.stop_emitter();
            inner.emitter = Some(token.clone());
        }

        let backend = self.clone();
        tokio::spawn(async move {
            loop {
                let interval = backend.inner.lock().speed.interval(base);
                tokio::select! {
                    biased;

                    _ = token.cancelled() => break,

                    _ = tokio::time::sleep(interval) => {
                        if backend.step().await.is_none() {
                            break;
                        }
                    }
                }
            }
            log::debug!("Replay emitter stopped");
        });
    }
}

#[async_trait]
impl Backend for SimulatedBackend {
    async fn connect_live(&self) -> BackendResult<()> {
        self.enter(BackendCommand::ConnectLive).await?;
        let mut inner = self.inner.lock();
        if inner.live_connected {
            return Err(BackendError::already_connected());
        }
        inner.live_connected = true;
        inner.source = Source::Live;
        log::info!("Live transport connected");
        Ok(())
    }

    async fn disconnect_live(&self) -> BackendResult<()> {
        self.enter(BackendCommand::DisconnectLive).await?;
        let mut inner = self.inner.lock();
        if !inner.live_connected {
            return Err(BackendError::new(codes::NOT_CONNECTED, "Live transport is not connected"));
        }
        inner.live_connected = false;
        inner.transmitting = false;
        inner.source = Source::Empty;
        log::info!("Live transport disconnected");
        Ok(())
    }

    async fn start_replay(&self, info: SessionInfo) -> BackendResult<()> {
        self.enter(BackendCommand::StartReplay).await?;
        let announced = {
            let mut inner = self.inner.lock();
            let announced = match &inner.source {
                Source::Empty => {
                    return Err(BackendError::new(codes::NO_DATA, "No data source selected"));
                }
                Source::Live => info,
                Source::Playback { info: recorded, .. } => SessionInfo {
                    plate_count: recorded.plate_count,
                    initial_mass: if recorded.initial_mass > 0.0 {
                        recorded.initial_mass
                    } else {
                        info.initial_mass
                    },
                    initial_composition: if recorded.initial_composition > 0.0 {
                        recorded.initial_composition
                    } else {
                        info.initial_composition
                    },
                },
            };
            inner.transmitting = true;
            inner.paused = false;
            announced
        };

        self.broadcast(BackendEvent::SessionInitialData(announced)).await;
        self.spawn_emitter();
        Ok(())
    }

    async fn pause_replay(&self) -> BackendResult<()> {
        self.enter(BackendCommand::PauseReplay).await?;
        let mut inner = self.inner.lock();
        if !inner.transmitting {
            return Err(BackendError::new(codes::NO_DATA, "Nothing is being transmitted"));
        }
        inner.paused = true;
        inner.stop_emitter();
        Ok(())
    }

    async fn resume_replay(&self) -> BackendResult<()> {
        self.enter(BackendCommand::ResumeReplay).await?;
        {
            let mut inner = self.inner.lock();
            if !inner.transmitting {
                return Err(BackendError::new(codes::NO_DATA, "Nothing is being transmitted"));
            }
            inner.paused = false;
        }
        self.spawn_emitter();
        Ok(())
    }

    async fn cancel_replay(&self) -> BackendResult<()> {
        self.enter(BackendCommand::CancelReplay).await?;
        let mut inner = self.inner.lock();
        inner.stop_emitter();
        inner.transmitting = false;
        inner.paused = false;
        inner.speed = PlaybackSpeed::default();
        inner.history.clear();
        if let Source::Playback { cursor, .. } = &mut inner.source {
            *cursor = 0;
        }
        Ok(())
    }

    async fn set_speed(&self, speed: PlaybackSpeed) -> BackendResult<()> {
        self.enter(BackendCommand::SetSpeed).await?;
        self.inner.lock().speed = speed;
        Ok(())
    }

    async fn skip(&self, offset_seconds: i64) -> BackendResult<()> {
        self.enter(BackendCommand::Skip).await?;
        let mut inner = self.inner.lock();
        let Source::Playback { entries, cursor, .. } = &mut inner.source else {
            return Ok(());
        };
        if entries.is_empty() {
            return Err(BackendError::new(codes::NO_DATA, "No data available"));
        }

        let last = entries.len() - 1;
        let current = entries[(*cursor).min(last)].timestamp;
        let target = current + offset_seconds as f64;
        let found = entries.iter().position(|e| e.timestamp >= target);
        *cursor = found.unwrap_or(last).min(last);
        log::debug!("Skipped {} s, cursor now {}", offset_seconds, cursor);
        Ok(())
    }

    async fn import_file(&self, path: PathBuf) -> BackendResult<ImportSummary> {
        self.enter(BackendCommand::ImportFile).await?;
        log::info!("Importing recording from {}", path.display());

        let recording = tokio::task::spawn_blocking(move || load_recording(&path))
            .await
            .map_err(|e| BackendError::new(codes::IMPORT_FAILED, e.to_string()))?
            .map_err(|e| BackendError::new(codes::IMPORT_FAILED, e.to_string()))?;

        let info = SessionInfo {
            plate_count: recording.plates(),
            initial_mass: recording.initial_mass.unwrap_or(0.0),
            initial_composition: recording.initial_composition.unwrap_or(0.0),
        };
        let entries = recording.into_shared_entries();
        let summary = ImportSummary {
            plate_count: info.plate_count,
            entry_count: entries.len(),
        };

        let mut inner = self.inner.lock();
        inner.stop_emitter();
        inner.transmitting = false;
        inner.paused = false;
        inner.source = Source::Playback {
            entries,
            cursor: 0,
            info,
        };
        Ok(summary)
    }

    async fn choose_file_path(&self) -> BackendResult<PathBuf> {
        self.enter(BackendCommand::ChooseFilePath).await?;
        self.inner
            .lock()
            .file_dialog
            .clone()
            .ok_or_else(|| BackendError::new(codes::DIALOG_CANCELLED, "No file selected"))
    }

    async fn choose_folder_path(&self) -> BackendResult<PathBuf> {
        self.enter(BackendCommand::ChooseFolderPath).await?;
        self.inner
            .lock()
            .folder_dialog
            .clone()
            .ok_or_else(|| BackendError::new(codes::DIALOG_CANCELLED, "No folder selected"))
    }

    async fn export(&self, path: PathBuf) -> BackendResult<()> {
        self.enter(BackendCommand::Export).await?;
        let history = self.inner.lock().history.clone();
        if history.is_empty() {
            return Err(BackendError::new(codes::NO_DATA, "No current data"));
        }
        tokio::task::spawn_blocking(move || export_csv(&path, &history))
            .await
            .map_err(|e| BackendError::new(codes::EXPORT_FAILED, e.to_string()))?
            .map_err(|e| BackendError::new(codes::EXPORT_FAILED, e.to_string()))
    }

    async fn get_settings(&self) -> BackendResult<Settings> {
        self.enter(BackendCommand::GetSettings).await?;
        Ok(self.settings.read().clone())
    }

    async fn save_settings(&self, patch: SettingsPatch) -> BackendResult<Settings> {
        self.enter(BackendCommand::SaveSettings).await?;
        let updated = match &self.store {
            Some(store) => store
                .update(patch)
                .map_err(|e| BackendError::new(codes::SETTINGS_FAILED, e.to_string()))?,
            None => {
                let mut settings = self.settings.read().clone();
                settings.apply(patch);
                settings
            }
        };
        *self.settings.write() = updated.clone();
        Ok(updated)
    }

    async fn list_available_ports(&self) -> BackendResult<Vec<String>> {
        self.enter(BackendCommand::ListAvailablePorts).await?;
        Ok(self.inner.lock().ports.clone())
    }

    async fn subscribe(&self) -> BackendResult<mpsc::Receiver<BackendEvent>> {
        self.enter(BackendCommand::Subscribe).await?;
        let (tx, rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        self.inner.lock().subscribers.push(tx);
        Ok(rx)
    }
}
