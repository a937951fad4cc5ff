// Telemetry entry model
//
// One immutable snapshot of the column: per-plate temperatures and
// liquid/vapor compositions, replay progress and distilled mass.

use crate::types::{TelemetryError, TelemetryResult};
use serde::{Deserialize, Serialize};

/// Liquid/vapor fraction of the light component on one plate
///
/// Serialized with the backend's `x_1` / `y_1` field names. `None` means the
/// backend could not resolve the composition for that plate.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Default)]
pub struct CompositionPair {
    #[serde(rename = "x_1", default)]
    pub liquid: Option<f64>,
    #[serde(rename = "y_1", default)]
    pub vapor: Option<f64>,
}

impl CompositionPair {
    pub fn new(liquid: f64, vapor: f64) -> Self {
        Self {
            liquid: Some(liquid),
            vapor: Some(vapor),
        }
    }

    pub fn unknown() -> Self {
        Self::default()
    }

    pub fn is_absent(&self) -> bool {
        self.liquid.is_none() && self.vapor.is_none()
    }

    fn normalized(self) -> Self {
        Self {
            liquid: self.liquid.and_then(clamp_fraction),
            vapor: self.vapor.and_then(clamp_fraction),
        }
    }
}

fn clamp_fraction(value: f64) -> Option<f64> {
    (value.is_finite() && (0.0..=1.0).contains(&value)).then_some(value)
}

/// A single timestamped snapshot pushed by the backend
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct TelemetryEntry {
    /// Seconds; only differences between entries are ever displayed
    pub timestamp: f64,

    /// One reading per plate, bottom to top
    pub temperatures: Vec<f64>,

    /// One pair per plate, index-aligned with `temperatures`
    pub compositions: Vec<CompositionPair>,

    #[serde(rename = "percentageComplete", alias = "percentComplete", default)]
    pub percent_complete: f64,

    #[serde(default)]
    pub distilled_mass: f64,
}

impl TelemetryEntry {
    pub fn new(timestamp: f64, temperatures: Vec<f64>, compositions: Vec<CompositionPair>) -> Self {
        Self {
            timestamp,
            temperatures,
            compositions,
            percent_complete: 0.0,
            distilled_mass: 0.0,
        }
    }

    pub fn with_progress(mut self, percent_complete: f64) -> Self {
        self.percent_complete = percent_complete;
        self
    }

    pub fn with_distilled_mass(mut self, distilled_mass: f64) -> Self {
        self.distilled_mass = distilled_mass;
        self
    }

    pub fn plate_count(&self) -> usize {
        self.temperatures.len()
    }

    pub fn is_complete(&self) -> bool {
        self.percent_complete >= 100.0
    }

    /// Validate the entry against the session's plate count and clean up
    /// out-of-range values.
    ///
    /// Entries whose shape does not match the session are rejected; fractions
    /// outside `[0, 1]` become unknown, progress is clamped to `[0, 100]` and
    /// a negative mass is floored at zero.
    pub fn normalize(self, plate_count: Option<usize>) -> TelemetryResult<Self> {
        if self.temperatures.len() != self.compositions.len() {
            return Err(TelemetryError::validation(format!(
                "entry has {} temperatures but {} compositions",
                self.temperatures.len(),
                self.compositions.len()
            )));
        }
        if let Some(expected) = plate_count {
            if self.temperatures.len() != expected {
                return Err(TelemetryError::validation(format!(
                    "entry has {} plates, session expects {}",
                    self.temperatures.len(),
                    expected
                )));
            }
        }
        if !self.timestamp.is_finite() {
            return Err(TelemetryError::validation("entry timestamp is not finite"));
        }
        if let Some(index) = self.temperatures.iter().position(|t| !t.is_finite()) {
            return Err(TelemetryError::validation(format!(
                "plate {} temperature is not finite",
                index + 1
            )));
        }

        let percent_complete = if self.percent_complete.is_finite() {
            self.percent_complete.clamp(0.0, 100.0)
        } else {
            0.0
        };
        let distilled_mass = if self.distilled_mass.is_finite() {
            self.distilled_mass.max(0.0)
        } else {
            0.0
        };

        Ok(Self {
            compositions: self
                .compositions
                .into_iter()
                .map(CompositionPair::normalized)
                .collect(),
            percent_complete,
            distilled_mass,
            ..self
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(plates: usize) -> TelemetryEntry {
        TelemetryEntry::new(
            10.0,
            vec![80.0; plates],
            vec![CompositionPair::new(0.4, 0.6); plates],
        )
    }

    #[test]
    fn test_deserialize_backend_payload() {
        let json = r#"{
            "timestamp": 1700000000,
            "temperatures": [78.5, 81.25],
            "compositions": [{"x_1": 0.42, "y_1": 0.61}, {"x_1": null, "y_1": null}],
            "percentageComplete": 12.5,
            "distilledMass": 3.0
        }"#;
        let entry: TelemetryEntry = serde_json::from_str(json).unwrap();
        assert_eq!(entry.timestamp, 1_700_000_000.0);
        assert_eq!(entry.plate_count(), 2);
        assert_eq!(entry.compositions[0].liquid, Some(0.42));
        assert!(entry.compositions[1].is_absent());
        assert_eq!(entry.percent_complete, 12.5);
        assert_eq!(entry.distilled_mass, 3.0);
    }

    #[test]
    fn test_normalize_rejects_shape_mismatch() {
        let mut bad = entry(3);
        bad.compositions.pop();
        assert!(bad.normalize(None).unwrap_err().is_validation());

        assert!(entry(3).normalize(Some(2)).is_err());
        assert!(entry(3).normalize(Some(3)).is_ok());
    }

    #[test]
    fn test_normalize_rejects_non_finite_temperature() {
        let mut bad = entry(2);
        bad.temperatures[1] = f64::NAN;
        let err = bad.normalize(Some(2)).unwrap_err();
        assert!(err.to_string().contains("plate 2"));
    }

    #[test]
    fn test_normalize_cleans_values() {
        let mut raw = entry(2).with_progress(140.0).with_distilled_mass(-1.0);
        raw.compositions[0] = CompositionPair {
            liquid: Some(1.5),
            vapor: Some(f64::INFINITY),
        };
        let clean = raw.normalize(Some(2)).unwrap();
        assert!(clean.compositions[0].is_absent());
        assert_eq!(clean.compositions[1], CompositionPair::new(0.4, 0.6));
        assert_eq!(clean.percent_complete, 100.0);
        assert_eq!(clean.distilled_mass, 0.0);
        assert!(clean.is_complete());
    }
}
