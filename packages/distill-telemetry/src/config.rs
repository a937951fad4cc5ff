// Runtime and session configuration

use crate::buffer::DEFAULT_HISTORY_CAPACITY;
use crate::types::{SessionInfo, TelemetryError, TelemetryResult};
use serde::{Deserialize, Serialize};
use std::time::Duration;

pub const MIN_PLATES: usize = 1;
pub const MAX_PLATES: usize = 15;

/// Replay speed multipliers offered to the user
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(try_from = "u32", into = "u32")]
pub enum PlaybackSpeed {
    X1,
    #[default]
    X2,
    X5,
    X10,
    X15,
}

impl PlaybackSpeed {
    pub const ALL: [PlaybackSpeed; 5] = [Self::X1, Self::X2, Self::X5, Self::X10, Self::X15];

    pub fn multiplier(self) -> u32 {
        match self {
            Self::X1 => 1,
            Self::X2 => 2,
            Self::X5 => 5,
            Self::X10 => 10,
            Self::X15 => 15,
        }
    }

    /// Delay between replayed entries at this speed
    pub fn interval(self, base: Duration) -> Duration {
        base / self.multiplier()
    }
}

impl TryFrom<u32> for PlaybackSpeed {
    type Error = TelemetryError;

    fn try_from(value: u32) -> Result<Self, Self::Error> {
        Self::ALL
            .into_iter()
            .find(|speed| speed.multiplier() == value)
            .ok_or_else(|| {
                TelemetryError::validation(format!(
                    "unsupported playback speed {}x (expected 1, 2, 5, 10 or 15)",
                    value
                ))
            })
    }
}

impl From<PlaybackSpeed> for u32 {
    fn from(speed: PlaybackSpeed) -> Self {
        speed.multiplier()
    }
}

impl std::fmt::Display for PlaybackSpeed {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}x", self.multiplier())
    }
}

/// Configuration of the telemetry core itself
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct TelemetryConfig {
    /// Recent entries kept after the session origin
    pub history_capacity: usize,

    /// Upper bound on any single backend command. `None` waits indefinitely.
    #[serde(with = "optional_millis")]
    pub command_timeout: Option<Duration>,

    pub default_speed: PlaybackSpeed,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            history_capacity: DEFAULT_HISTORY_CAPACITY,
            command_timeout: None,
            default_speed: PlaybackSpeed::default(),
        }
    }
}

impl TelemetryConfig {
    pub fn validate(&self) -> TelemetryResult<()> {
        if self.history_capacity == 0 {
            return Err(TelemetryError::validation("history capacity must be at least 1"));
        }
        if self.command_timeout == Some(Duration::ZERO) {
            return Err(TelemetryError::validation("command timeout must be positive"));
        }
        Ok(())
    }
}

mod optional_millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Option<Duration>, serializer: S) -> Result<S::Ok, S::Error> {
        match value {
            Some(duration) => serializer.serialize_some(&(duration.as_millis() as u64)),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<Duration>, D::Error> {
        Ok(Option::<u64>::deserialize(deserializer)?.map(Duration::from_millis))
    }
}

/// Plate count and initial conditions entered by the operator
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SessionConfig {
    pub plate_count: usize,
    pub initial_mass: Option<f64>,
    /// Percent of light component in the initial charge
    pub initial_composition: Option<f64>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            plate_count: MIN_PLATES,
            initial_mass: None,
            initial_composition: None,
        }
    }
}

impl SessionConfig {
    pub fn add_plate(&mut self) {
        if self.plate_count < MAX_PLATES {
            self.plate_count += 1;
        }
    }

    pub fn remove_plate(&mut self) {
        if self.plate_count > MIN_PLATES {
            self.plate_count -= 1;
        }
    }

    pub fn set_plates(&mut self, plate_count: usize) -> TelemetryResult<()> {
        validate_plate_count(plate_count)?;
        self.plate_count = plate_count;
        Ok(())
    }

    pub fn set_initial_mass(&mut self, initial_mass: f64) -> TelemetryResult<()> {
        validate_initial_mass(initial_mass)?;
        self.initial_mass = Some(initial_mass);
        Ok(())
    }

    pub fn set_initial_composition(&mut self, initial_composition: f64) -> TelemetryResult<()> {
        validate_initial_composition(initial_composition)?;
        self.initial_composition = Some(initial_composition);
        Ok(())
    }

    /// Check that everything a live session needs is present and in range
    pub fn validate(&self) -> TelemetryResult<SessionInfo> {
        validate_plate_count(self.plate_count)?;
        let initial_mass = self
            .initial_mass
            .ok_or_else(|| TelemetryError::validation("missing initial mass"))?;
        validate_initial_mass(initial_mass)?;
        let initial_composition = self
            .initial_composition
            .ok_or_else(|| TelemetryError::validation("missing initial composition"))?;
        validate_initial_composition(initial_composition)?;

        Ok(SessionInfo {
            plate_count: self.plate_count,
            initial_mass,
            initial_composition,
        })
    }
}

pub(crate) fn validate_plate_count(plate_count: usize) -> TelemetryResult<()> {
    if !(MIN_PLATES..=MAX_PLATES).contains(&plate_count) {
        return Err(TelemetryError::validation(format!(
            "plate count must be between {} and {}, got {}",
            MIN_PLATES, MAX_PLATES, plate_count
        )));
    }
    Ok(())
}

fn validate_initial_mass(initial_mass: f64) -> TelemetryResult<()> {
    if !initial_mass.is_finite() || initial_mass <= 0.0 {
        return Err(TelemetryError::validation("initial mass must be positive"));
    }
    Ok(())
}

fn validate_initial_composition(initial_composition: f64) -> TelemetryResult<()> {
    if !initial_composition.is_finite() || !(0.0..=100.0).contains(&initial_composition) {
        return Err(TelemetryError::validation(
            "initial composition must be between 0 and 100",
        ));
    }
    Ok(())
}
