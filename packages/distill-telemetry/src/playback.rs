// Playback commands for file replay sessions

use crate::config::PlaybackSpeed;
use crate::controller::ConnectionController;
use crate::types::{ConnectionState, TelemetryError, TelemetryResult};

/// Skip offsets offered by the replay controls, in seconds
pub const SKIP_BACK_LONG: i64 = -3600;
pub const SKIP_BACK: i64 = -1800;
pub const SKIP_FORWARD: i64 = 1800;
pub const SKIP_FORWARD_LONG: i64 = 3600;

const FILE_STATES: [ConnectionState; 2] = [ConnectionState::FileReplaying, ConnectionState::FilePaused];

/// Speed, skip and play/pause controls of a [`ConnectionController`]
pub struct PlaybackController<'a> {
    controller: &'a ConnectionController,
}

impl<'a> PlaybackController<'a> {
    pub(crate) fn new(controller: &'a ConnectionController) -> Self {
        Self { controller }
    }

    pub fn speed(&self) -> PlaybackSpeed {
        self.controller.shared.core.lock().playback.speed
    }

    /// Offset sent to the backend and not yet acknowledged
    pub fn skip_pending(&self) -> Option<i64> {
        self.controller.shared.core.lock().playback.skip_pending
    }

    fn guard_file_session(&self, action: &'static str) -> TelemetryResult<()> {
        let core = self.controller.shared.core.lock();
        if FILE_STATES.contains(&core.state) {
            Ok(())
        } else {
            Err(core.conflict(action))
        }
    }

    /// Change the replay speed
    ///
    /// The local speed is updated even when the backend rejects the change.
    pub async fn set_speed(&self, speed: PlaybackSpeed) -> TelemetryResult<()> {
        let _transition = self.controller.shared.transition.lock().await;
        {
            let mut core = self.controller.shared.core.lock();
            if !FILE_STATES.contains(&core.state) {
                return Err(core.conflict("change speed"));
            }
            core.playback.speed = speed;
        }

        let backend = &self.controller.backend;
        self.controller
            .call(backend.set_speed(speed))
            .await
            .inspect_err(|e| log::warn!("Backend rejected speed {}: {}", speed, e))
    }

    /// Move the replay by a signed number of seconds
    pub async fn skip(&self, seconds: i64) -> TelemetryResult<()> {
        let _transition = self.controller.shared.transition.lock().await;
        self.guard_file_session("skip")?;

        let previous = {
            let mut core = self.controller.shared.core.lock();
            core.playback.skip_pending.replace(seconds)
        };
        log::debug!("Skipping {} s", seconds);

        let backend = &self.controller.backend;
        let result = self.controller.call(backend.skip(seconds)).await;
        self.controller.shared.core.lock().playback.skip_pending = previous;

        result.inspect_err(|e| log::warn!("Skip of {} s failed: {}", seconds, e))
    }

    /// Play/pause button
    ///
    /// Pauses a running replay, resumes a paused one, or starts a new replay
    /// of the chosen file when nothing is connected.
    pub async fn toggle(&self) -> TelemetryResult<()> {
        let (state, complete) = {
            let core = self.controller.shared.core.lock();
            (core.state, core.progress >= 100.0)
        };

        match state {
            ConnectionState::FileReplaying => self.controller.pause().await,
            ConnectionState::FilePaused if complete => {
                Err(TelemetryError::validation("replay already complete"))
            }
            ConnectionState::FilePaused => self.controller.resume().await,
            ConnectionState::None => self.controller.connect_file().await,
            ConnectionState::LiveConnected => Err(TelemetryError::StateConflict {
                action: "toggle playback",
                state,
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{codes, Backend, BackendCommand, BackendError, SimulatedBackend};
    use crate::config::TelemetryConfig;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_rejected_outside_file_session() {
        let backend = SimulatedBackend::manual();
        let controller =
            ConnectionController::new(Arc::new(backend.clone()), TelemetryConfig::default()).unwrap();
        let playback = controller.playback();

        assert!(playback
            .set_speed(PlaybackSpeed::X10)
            .await
            .unwrap_err()
            .is_state_conflict());
        assert_eq!(playback.speed(), PlaybackSpeed::X2);
        assert!(playback.skip(SKIP_FORWARD).await.unwrap_err().is_state_conflict());
        assert_eq!(backend.call_count(BackendCommand::Skip), 0);

        // Nothing selected to replay
        assert!(playback.toggle().await.unwrap_err().is_validation());
    }

    #[tokio::test]
    async fn test_toggle_conflicts_in_live_mode() {
        let backend = SimulatedBackend::manual();
        backend
            .save_settings(crate::settings::SettingsPatch {
                usb_port: Some("COM3".to_string()),
                ..Default::default()
            })
            .await
            .unwrap();
        let controller =
            ConnectionController::new(Arc::new(backend.clone()), TelemetryConfig::default()).unwrap();
        controller.update_session_config(|config| {
            config.set_initial_mass(100.0).unwrap();
            config.set_initial_composition(10.0).unwrap();
        });
        controller.connect_live().await.unwrap();

        let err = controller.playback().toggle().await.unwrap_err();
        assert!(err.is_state_conflict());
        assert_eq!(controller.state(), ConnectionState::LiveConnected);
    }

    #[tokio::test]
    async fn test_speed_failure_still_updates_locally() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("run.csv");
        std::fs::write(&path, "Timestamp,Temperature 1\n0,80\n10,81\n").unwrap();

        let backend = SimulatedBackend::manual();
        let controller =
            ConnectionController::new(Arc::new(backend.clone()), TelemetryConfig::default()).unwrap();
        controller.set_file_path(&path);
        controller.connect_file().await.unwrap();

        backend.fail_next(
            BackendCommand::SetSpeed,
            BackendError::new(codes::INJECTED, "speed rejected"),
        );
        let playback = controller.playback();
        assert!(playback.set_speed(PlaybackSpeed::X15).await.is_err());
        assert_eq!(playback.speed(), PlaybackSpeed::X15);

        backend.fail_next(BackendCommand::Skip, BackendError::new(codes::INJECTED, "skip rejected"));
        assert!(playback.skip(SKIP_BACK).await.is_err());
        assert_eq!(playback.skip_pending(), None);

        playback.skip(SKIP_FORWARD_LONG).await.unwrap();
        assert_eq!(playback.skip_pending(), None);
        assert_eq!(backend.cursor(), Some(1));
    }
}
