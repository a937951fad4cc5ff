// Chart projections over a history snapshot
//
// Every function here is pure: same snapshot in, same view model out. They
// are recomputed on demand whenever the UI asks for a fresh view.

use crate::buffer::HistorySnapshot;
use crate::entry::TelemetryEntry;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Headroom added above the largest distilled mass
pub const MASS_DOMAIN_PADDING: f64 = 0.08;

/// Upper bound of the mass axis when nothing has been distilled yet
pub const DEFAULT_MASS_CEILING: f64 = 10.0;

/// Format an elapsed duration in seconds as `MM:SS`
///
/// Minutes are not wrapped into hours; negative durations read as `00:00`.
pub fn format_elapsed(seconds: f64) -> String {
    let total = if seconds.is_finite() && seconds > 0.0 {
        seconds.floor() as u64
    } else {
        0
    };
    format!("{:02}:{:02}", total / 60, total % 60)
}

fn elapsed_labels(entries: &[Arc<TelemetryEntry>]) -> Vec<String> {
    let Some(origin) = entries.first() else {
        return Vec::new();
    };
    entries
        .iter()
        .map(|entry| format_elapsed(entry.timestamp - origin.timestamp))
        .collect()
}

/// One named line on a time chart
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Series {
    pub name: String,
    pub values: Vec<f64>,
}

/// Time-axis chart: shared `MM:SS` labels and one or more series
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct TimeChart {
    pub labels: Vec<String>,
    pub series: Vec<Series>,
}

impl TimeChart {
    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    pub fn series(&self, name: &str) -> Option<&Series> {
        self.series.iter().find(|s| s.name == name)
    }

    /// Zip the labels with one series' values
    pub fn points(&self, name: &str) -> Vec<(String, f64)> {
        self.series(name)
            .map(|series| {
                self.labels
                    .iter()
                    .cloned()
                    .zip(series.values.iter().copied())
                    .collect()
            })
            .unwrap_or_default()
    }
}

/// Per-plate temperatures over elapsed session time
///
/// Series are named `plate1`, `plate2`, ... bottom to top. Elapsed time is
/// measured from the first entry of the snapshot, so the first label is
/// always `00:00`.
pub fn temperature_per_time(entries: &[Arc<TelemetryEntry>]) -> TimeChart {
    let labels = elapsed_labels(entries);
    if labels.is_empty() {
        return TimeChart::default();
    }

    let plates = entries.iter().map(|e| e.temperatures.len()).max().unwrap_or(0);
    let series = (0..plates)
        .map(|plate| Series {
            name: format!("plate{}", plate + 1),
            values: entries
                .iter()
                .map(|e| e.temperatures.get(plate).copied().unwrap_or(f64::NAN))
                .collect(),
        })
        .collect();

    TimeChart { labels, series }
}

/// Point on the vapor-vs-liquid (y vs x) chart
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct CompositionPoint {
    pub x: Option<f64>,
    pub y: Option<f64>,
}

/// Vapor fraction against liquid fraction for every plate of the latest entry
///
/// Empty when there is no entry or when no plate has any composition.
pub fn vapor_vs_liquid(entries: &[Arc<TelemetryEntry>]) -> Vec<CompositionPoint> {
    let Some(latest) = entries.last() else {
        return Vec::new();
    };
    if latest.compositions.iter().all(|pair| pair.is_absent()) {
        return Vec::new();
    }
    latest
        .compositions
        .iter()
        .map(|pair| CompositionPoint {
            x: pair.liquid,
            y: pair.vapor,
        })
        .collect()
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TemperatureCompositionPoint {
    /// Plate temperature rounded for display, e.g. `"81.25"`
    pub temperature: String,
    pub fraction: Option<f64>,
}

/// Liquid and vapor points of one plate sharing its temperature
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PlateComposition {
    /// 1-based plate number, bottom to top
    pub plate: usize,
    pub liquid: TemperatureCompositionPoint,
    pub vapor: TemperatureCompositionPoint,
}

/// Compositions against temperature for the latest entry, top plate first
pub fn composition_vs_temperature(entries: &[Arc<TelemetryEntry>]) -> Vec<PlateComposition> {
    let Some(latest) = entries.last() else {
        return Vec::new();
    };
    latest
        .temperatures
        .iter()
        .zip(latest.compositions.iter())
        .enumerate()
        .rev()
        .map(|(index, (temperature, pair))| {
            let label = format!("{:.2}", temperature);
            PlateComposition {
                plate: index + 1,
                liquid: TemperatureCompositionPoint {
                    temperature: label.clone(),
                    fraction: pair.liquid,
                },
                vapor: TemperatureCompositionPoint {
                    temperature: label,
                    fraction: pair.vapor,
                },
            }
        })
        .collect()
}

pub const DISTILLED_MASS_SERIES: &str = "distilledMass";

/// Distilled mass over elapsed time with its y-axis domain
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MassChart {
    pub chart: TimeChart,
    pub y_domain: (f64, f64),
}

impl MassChart {
    pub fn is_empty(&self) -> bool {
        self.chart.is_empty()
    }

    pub fn points(&self) -> Vec<(String, f64)> {
        self.chart.points(DISTILLED_MASS_SERIES)
    }
}

/// Y-axis domain for a mass series: `[0, ceil(max * 1.08)]`
pub fn mass_domain(max_mass: f64) -> (f64, f64) {
    if max_mass.is_finite() && max_mass > 0.0 {
        (0.0, (max_mass * (1.0 + MASS_DOMAIN_PADDING)).ceil())
    } else {
        (0.0, DEFAULT_MASS_CEILING)
    }
}

pub fn distilled_mass_per_time(entries: &[Arc<TelemetryEntry>]) -> MassChart {
    let labels = elapsed_labels(entries);
    let values: Vec<f64> = entries.iter().map(|e| e.distilled_mass).collect();
    let max_mass = values.iter().copied().fold(0.0_f64, f64::max);

    let chart = if labels.is_empty() {
        TimeChart::default()
    } else {
        TimeChart {
            labels,
            series: vec![Series {
                name: DISTILLED_MASS_SERIES.to_string(),
                values,
            }],
        }
    };

    MassChart {
        chart,
        y_domain: mass_domain(max_mass),
    }
}

/// All four chart projections computed from one snapshot
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Dashboard {
    /// Version of the snapshot these views were computed from
    pub version: u64,
    pub temperatures: TimeChart,
    pub vapor_vs_liquid: Vec<CompositionPoint>,
    pub composition_vs_temperature: Vec<PlateComposition>,
    pub distilled_mass: MassChart,
}

impl Dashboard {
    pub fn from_snapshot(snapshot: &HistorySnapshot) -> Self {
        Self {
            version: snapshot.version(),
            temperatures: temperature_per_time(snapshot),
            vapor_vs_liquid: vapor_vs_liquid(snapshot),
            composition_vs_temperature: composition_vs_temperature(snapshot),
            distilled_mass: distilled_mass_per_time(snapshot),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.temperatures.is_empty()
            && self.vapor_vs_liquid.is_empty()
            && self.composition_vs_temperature.is_empty()
            && self.distilled_mass.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::HistoryBuffer;
    use crate::entry::CompositionPair;

    fn entry(timestamp: f64, temperatures: Vec<f64>) -> Arc<TelemetryEntry> {
        let pairs = temperatures
            .iter()
            .map(|t| CompositionPair::new(t / 200.0, t / 100.0))
            .collect();
        Arc::new(TelemetryEntry::new(timestamp, temperatures, pairs))
    }

    #[test]
    fn test_format_elapsed() {
        assert_eq!(format_elapsed(0.0), "00:00");
        assert_eq!(format_elapsed(10.9), "00:10");
        assert_eq!(format_elapsed(75.0), "01:15");
        assert_eq!(format_elapsed(6000.0), "100:00");
        assert_eq!(format_elapsed(-5.0), "00:00");
    }

    #[test]
    fn test_temperature_per_time() {
        let entries = vec![
            entry(5000.0, vec![80.0, 85.0]),
            entry(5030.0, vec![81.0, 86.0]),
            entry(5095.0, vec![82.0, 87.0]),
        ];
        let chart = temperature_per_time(&entries);
        assert_eq!(chart.labels, vec!["00:00", "00:30", "01:35"]);
        assert_eq!(chart.series.len(), 2);
        assert_eq!(chart.series("plate1").unwrap().values, vec![80.0, 81.0, 82.0]);
        assert_eq!(chart.series("plate2").unwrap().values, vec![85.0, 86.0, 87.0]);
    }

    #[test]
    fn test_temperature_per_time_empty() {
        assert!(temperature_per_time(&[]).is_empty());
    }

    #[test]
    fn test_vapor_vs_liquid_uses_latest() {
        let mut latest = (*entry(2.0, vec![80.0, 90.0])).clone();
        latest.compositions[0] = CompositionPair::unknown();
        let entries = vec![entry(1.0, vec![70.0, 75.0]), Arc::new(latest)];

        let points = vapor_vs_liquid(&entries);
        assert_eq!(points.len(), 2);
        assert_eq!(points[0], CompositionPoint { x: None, y: None });
        assert_eq!(points[1].x, Some(0.45));
        assert_eq!(points[1].y, Some(0.9));
    }

    #[test]
    fn test_vapor_vs_liquid_all_absent() {
        let latest = TelemetryEntry::new(1.0, vec![80.0, 81.0], vec![CompositionPair::unknown(); 2]);
        assert!(vapor_vs_liquid(&[Arc::new(latest)]).is_empty());

        // A zero fraction is a reading, not an absence
        let zero = TelemetryEntry::new(
            1.0,
            vec![80.0],
            vec![CompositionPair {
                liquid: Some(0.0),
                vapor: None,
            }],
        );
        assert_eq!(vapor_vs_liquid(&[Arc::new(zero)]).len(), 1);
    }

    #[test]
    fn test_composition_vs_temperature_reversed() {
        let entries = vec![entry(1.0, vec![80.0, 90.126, 100.0])];
        let plates = composition_vs_temperature(&entries);
        assert_eq!(plates.len(), 3);
        assert_eq!(plates[0].plate, 3);
        assert_eq!(plates[2].plate, 1);
        assert_eq!(plates[1].liquid.temperature, "90.13");
        assert_eq!(plates[1].vapor.temperature, "90.13");
        assert_eq!(plates[2].liquid.fraction, Some(0.4));
        assert_eq!(plates[2].vapor.fraction, Some(0.8));
    }

    #[test]
    fn test_distilled_mass_scenario() {
        let entries: Vec<_> = [(1000.0, 0.0), (1010.0, 5.0), (1020.0, 12.0)]
            .into_iter()
            .map(|(ts, mass)| Arc::new(TelemetryEntry::new(ts, vec![80.0], vec![Default::default()]).with_distilled_mass(mass)))
            .collect();

        let chart = distilled_mass_per_time(&entries);
        assert_eq!(
            chart.points(),
            vec![
                ("00:00".to_string(), 0.0),
                ("00:10".to_string(), 5.0),
                ("00:20".to_string(), 12.0),
            ]
        );
        assert_eq!(chart.y_domain, (0.0, 13.0));
    }

    #[test]
    fn test_mass_domain_default_ceiling() {
        assert_eq!(mass_domain(0.0), (0.0, DEFAULT_MASS_CEILING));
        assert_eq!(mass_domain(0.3), (0.0, 1.0));
        assert_eq!(distilled_mass_per_time(&[]).y_domain, (0.0, DEFAULT_MASS_CEILING));
    }

    #[test]
    fn test_dashboard_empty_after_clear() {
        let mut buffer = HistoryBuffer::new(4);
        buffer.append(entry(1.0, vec![80.0]));
        buffer.append(entry(2.0, vec![81.0]));
        assert!(!Dashboard::from_snapshot(&buffer.snapshot()).is_empty());

        buffer.clear();
        let snapshot = buffer.snapshot();
        assert!(temperature_per_time(&snapshot).is_empty());
        assert!(vapor_vs_liquid(&snapshot).is_empty());
        assert!(composition_vs_temperature(&snapshot).is_empty());
        assert!(distilled_mass_per_time(&snapshot).is_empty());
        assert!(Dashboard::from_snapshot(&snapshot).is_empty());
    }

    #[test]
    fn test_projection_is_deterministic() {
        let mut buffer = HistoryBuffer::new(4);
        buffer.append(entry(10.0, vec![80.0, 81.0]));
        buffer.append(entry(25.0, vec![82.0, 83.0]));
        let snapshot = buffer.snapshot();
        assert_eq!(Dashboard::from_snapshot(&snapshot), Dashboard::from_snapshot(&snapshot));
    }
}
