// Event ingestion - applies backend-pushed events to the active session
//
// One task per session drains the backend subscription. Each event is applied
// under the session core lock and only if the session epoch it was spawned
// for is still current, so a cleared session never picks up late entries.

use crate::backend::{self, Backend, BackendEvent};
use crate::controller::{SessionCore, SessionShared};
use crate::entry::TelemetryEntry;
use crate::types::{ConnectionState, SessionEvent, SessionInfo, TelemetryError};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Guard for a running ingestion task. Dropping it stops ingestion.
pub struct Subscription {
    token: CancellationToken,
    handle: Option<JoinHandle<()>>,
}

impl Subscription {
    pub fn cancel(&self) {
        self.token.cancel();
    }

    pub fn is_active(&self) -> bool {
        !self.token.is_cancelled() && self.handle.as_ref().is_some_and(|h| !h.is_finished())
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.token.cancel();
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
    }
}

pub(crate) fn spawn_ingestion(
    mut rx: mpsc::Receiver<BackendEvent>,
    shared: SessionShared,
    epoch: u64,
    backend: Arc<dyn Backend>,
    timeout: Option<Duration>,
) -> Subscription {
    let token = CancellationToken::new();
    let cancel_token = token.clone();

    let handle = tokio::spawn(async move {
        loop {
            tokio::select! {
                // Cancellation wins over pending events
                biased;

                _ = cancel_token.cancelled() => {
                    log::debug!("Ingestion for epoch {} cancelled", epoch);
                    break;
                }

                event = rx.recv() => {
                    match event {
                        Some(event) => {
                            let events = apply_event(&mut shared.core.lock(), epoch, event);
                            shared.emit(events);
                        }
                        None => {
                            channel_closed(&shared, epoch, backend.as_ref(), timeout).await;
                            break;
                        }
                    }
                }
            }
        }
    });

    Subscription {
        token,
        handle: Some(handle),
    }
}

/// Apply one backend event to the session, returning the events to publish
pub(crate) fn apply_event(core: &mut SessionCore, epoch: u64, event: BackendEvent) -> Vec<SessionEvent> {
    if core.epoch != epoch || !core.state.is_active() {
        core.stats.stale_events_dropped += 1;
        log::debug!("Dropping event for stale session epoch {}", epoch);
        return Vec::new();
    }

    match event {
        BackendEvent::SessionInitialData(info) => apply_initial_data(core, info),
        BackendEvent::TelemetryEntry(entry) => apply_entry(core, entry),
    }
}

fn apply_initial_data(core: &mut SessionCore, info: SessionInfo) -> Vec<SessionEvent> {
    log::debug!(
        "Session initial data: {} plates, mass {}, composition {}",
        info.plate_count,
        info.initial_mass,
        info.initial_composition
    );

    // Live sessions take their plate count from the operator's configuration
    if core.state.is_file() && core.history.is_empty() && info.plate_count > 0 {
        core.plate_count = Some(info.plate_count);
    }
    if core.state.is_file() || core.session_info.is_none() {
        core.session_info = Some(info);
    }

    vec![SessionEvent::SessionInitialData {
        session_id: core.session_id.clone(),
        info,
    }]
}

fn apply_entry(core: &mut SessionCore, entry: TelemetryEntry) -> Vec<SessionEvent> {
    core.stats.entries_received += 1;

    let entry = match entry.normalize(core.plate_count) {
        Ok(entry) => entry,
        Err(e) => {
            core.stats.entries_rejected += 1;
            log::warn!("Rejected telemetry entry: {}", e);
            return Vec::new();
        }
    };

    if core.plate_count.is_none() {
        core.plate_count = Some(entry.plate_count());
    }
    core.stats.entries_accepted += 1;
    core.progress = entry.percent_complete;
    let complete = entry.is_complete();
    log::debug!(
        "Entry t={} ({:.1}% complete, {} in history)",
        entry.timestamp,
        entry.percent_complete,
        core.history.len() + 1
    );
    core.history.append(entry);

    let mut events = Vec::new();
    if complete && core.state == ConnectionState::FileReplaying {
        events.extend(core.set_state(ConnectionState::FilePaused));
    }
    if complete && core.state.is_file() && !core.completion_notified {
        core.completion_notified = true;
        log::info!("Replay complete for session {}", core.session_id);
        events.push(SessionEvent::Completed {
            session_id: core.session_id.clone(),
        });
    }
    events
}

/// The backend dropped the subscription: force the session back to `none`
///
/// Runs under the transition lock so the backend cleanup cannot interleave
/// with a transition started by the user.
async fn channel_closed(
    shared: &SessionShared,
    epoch: u64,
    backend: &dyn Backend,
    timeout: Option<Duration>,
) {
    let _transition = shared.transition.lock().await;

    let (previous, events) = {
        let mut core = shared.core.lock();
        if core.epoch != epoch || !core.state.is_active() {
            log::debug!("Subscription for stale epoch {} closed", epoch);
            return;
        }
        let previous = core.state;
        let session_id = core.session_id.clone();
        let mut events: Vec<SessionEvent> = core.end().into_iter().collect();
        events.push(SessionEvent::Error {
            session_id,
            error: TelemetryError::ChannelClosed.to_string(),
        });
        (previous, events)
    };

    log::error!("Backend event channel closed while {}", previous);

    let result = if previous == ConnectionState::LiveConnected {
        backend::call(timeout, backend.disconnect_live()).await
    } else {
        backend::call(timeout, backend.cancel_replay()).await
    };
    if let Err(e) = result {
        log::warn!("Cleanup after channel loss failed: {}", e);
    }

    shared.emit(events);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TelemetryConfig;
    use crate::entry::CompositionPair;

    fn core_in(state: ConnectionState, plate_count: Option<usize>) -> SessionCore {
        let mut core = SessionCore::new(&TelemetryConfig::default());
        core.state = state;
        core.plate_count = plate_count;
        core.epoch = 1;
        core
    }

    fn entry(timestamp: f64, plates: usize, progress: f64) -> BackendEvent {
        BackendEvent::TelemetryEntry(
            TelemetryEntry::new(
                timestamp,
                vec![80.0; plates],
                vec![CompositionPair::new(0.3, 0.6); plates],
            )
            .with_progress(progress),
        )
    }

    #[test]
    fn test_stale_epoch_is_dropped() {
        let mut core = core_in(ConnectionState::FileReplaying, Some(2));
        assert!(apply_event(&mut core, 0, entry(0.0, 2, 10.0)).is_empty());
        assert!(core.history.is_empty());
        assert_eq!(core.stats.stale_events_dropped, 1);

        core.state = ConnectionState::None;
        apply_event(&mut core, 1, entry(0.0, 2, 10.0));
        assert!(core.history.is_empty());
    }

    #[test]
    fn test_plate_mismatch_rejected() {
        let mut core = core_in(ConnectionState::LiveConnected, Some(3));
        apply_event(&mut core, 1, entry(0.0, 2, 0.0));
        assert!(core.history.is_empty());
        assert_eq!(core.stats.entries_rejected, 1);

        apply_event(&mut core, 1, entry(1.0, 3, 0.0));
        assert_eq!(core.history.len(), 1);
        assert_eq!(core.stats.entries_accepted, 1);
    }

    #[test]
    fn test_plate_count_from_first_entry() {
        let mut core = core_in(ConnectionState::FileReplaying, None);
        apply_event(&mut core, 1, entry(0.0, 4, 10.0));
        assert_eq!(core.plate_count, Some(4));
        apply_event(&mut core, 1, entry(1.0, 5, 20.0));
        assert_eq!(core.history.len(), 1);
    }

    #[test]
    fn test_initial_data_sets_replay_plate_count() {
        let mut core = core_in(ConnectionState::FileReplaying, None);
        let info = SessionInfo {
            plate_count: 6,
            initial_mass: 800.0,
            initial_composition: 25.0,
        };
        let events = apply_event(&mut core, 1, BackendEvent::SessionInitialData(info));
        assert_eq!(core.plate_count, Some(6));
        assert_eq!(core.session_info, Some(info));
        assert!(matches!(events[0], SessionEvent::SessionInitialData { .. }));

        let mut live = core_in(ConnectionState::LiveConnected, Some(3));
        apply_event(&mut live, 1, BackendEvent::SessionInitialData(info));
        assert_eq!(live.plate_count, Some(3));
    }

    #[test]
    fn test_completion_pauses_once() {
        let mut core = core_in(ConnectionState::FileReplaying, Some(1));
        let first = apply_event(&mut core, 1, entry(0.0, 1, 100.0));
        assert_eq!(core.state, ConnectionState::FilePaused);
        assert_eq!(first.len(), 2);
        assert!(matches!(first[1], SessionEvent::Completed { .. }));

        let second = apply_event(&mut core, 1, entry(1.0, 1, 100.0));
        assert!(second.is_empty());
        assert_eq!(core.state, ConnectionState::FilePaused);
        assert_eq!(core.history.len(), 2);
    }

    #[test]
    fn test_live_entries_never_complete() {
        let mut core = core_in(ConnectionState::LiveConnected, Some(1));
        let events = apply_event(&mut core, 1, entry(0.0, 1, 100.0));
        assert!(events.is_empty());
        assert_eq!(core.state, ConnectionState::LiveConnected);
    }
}
