// Recorded session files
//
// Two formats are understood:
// - `.json`: `{ "plateCount", "initialMass", "initialComposition", "entries": [...] }`
// - `.csv`: `Timestamp`, `Temperature i`, `Composition x_1 i`, `Composition y_1 i`
//   and optional `Percentage complete` / `Distilled mass` columns, one row per entry

use crate::config::validate_plate_count;
use crate::entry::{CompositionPair, TelemetryEntry};
use crate::types::{TelemetryError, TelemetryResult};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use std::sync::Arc;

const TIMESTAMP_HEADER: &str = "Timestamp";
const TEMPERATURE_PREFIX: &str = "Temperature ";
const LIQUID_PREFIX: &str = "Composition x_1 ";
const VAPOR_PREFIX: &str = "Composition y_1 ";
const PROGRESS_HEADER: &str = "Percentage complete";
const MASS_HEADER: &str = "Distilled mass";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct Recording {
    #[serde(default)]
    pub plate_count: usize,
    #[serde(default)]
    pub initial_mass: Option<f64>,
    #[serde(default)]
    pub initial_composition: Option<f64>,
    pub entries: Vec<TelemetryEntry>,
}

impl Recording {
    /// Plate count declared by the file, or taken from its first entry
    pub fn plates(&self) -> usize {
        if self.plate_count > 0 {
            self.plate_count
        } else {
            self.entries.first().map(|e| e.plate_count()).unwrap_or(0)
        }
    }

    pub fn into_shared_entries(self) -> Vec<Arc<TelemetryEntry>> {
        self.entries.into_iter().map(Arc::new).collect()
    }
}

/// Load a recording, picking the format from the file extension
pub fn load_recording(path: &Path) -> TelemetryResult<Recording> {
    let extension = path
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.to_ascii_lowercase());

    let (recording, first_row): (Recording, _) = match extension.as_deref() {
        Some("json") => {
            let reader = BufReader::new(File::open(path)?);
            (serde_json::from_reader(reader)?, ("entry", 1))
        }
        Some("csv") => (read_csv(path)?, ("row", 2)),
        _ => {
            return Err(TelemetryError::Import(format!(
                "unsupported recording format: {}",
                path.display()
            )))
        }
    };

    if recording.entries.is_empty() {
        return Err(TelemetryError::Import("recording has no entries".to_string()));
    }
    validate_entries(&recording, first_row)?;
    Ok(recording)
}

/// Every entry must survive normalization against the recording's plate
/// count, otherwise the replay could stop short of its completion entry
fn validate_entries(recording: &Recording, (label, first): (&str, usize)) -> TelemetryResult<()> {
    let plates = recording.plates();
    validate_plate_count(plates).map_err(|e| import_error("recording", e))?;

    for (index, entry) in recording.entries.iter().enumerate() {
        if let Err(e) = entry.clone().normalize(Some(plates)) {
            return Err(import_error(&format!("{} {}", label, index + first), e));
        }
    }
    Ok(())
}

fn import_error(location: &str, error: TelemetryError) -> TelemetryError {
    match error {
        TelemetryError::Validation(message) => {
            TelemetryError::Import(format!("{}: {}", location, message))
        }
        other => other,
    }
}

fn numbered_columns(headers: &csv::StringRecord, prefix: &str) -> Vec<usize> {
    let mut columns: Vec<(usize, usize)> = headers
        .iter()
        .enumerate()
        .filter_map(|(col, name)| {
            let number = name.trim().strip_prefix(prefix)?.trim().parse::<usize>().ok()?;
            Some((number, col))
        })
        .collect();
    columns.sort_unstable();
    columns.into_iter().map(|(_, col)| col).collect()
}

fn find_column(headers: &csv::StringRecord, name: &str) -> Option<usize> {
    headers
        .iter()
        .position(|header| header.trim().eq_ignore_ascii_case(name))
}

fn parse_cell(record: &csv::StringRecord, col: usize, row: usize) -> TelemetryResult<Option<f64>> {
    let raw = record.get(col).unwrap_or("").trim();
    if raw.is_empty() {
        return Ok(None);
    }
    raw.parse::<f64>().map(Some).map_err(|_| {
        TelemetryError::Import(format!("row {}: invalid number {:?} in column {}", row, raw, col + 1))
    })
}

fn read_csv(path: &Path) -> TelemetryResult<Recording> {
    let mut reader = csv::Reader::from_path(path)?;
    let headers = reader.headers()?.clone();

    let timestamp_col = find_column(&headers, TIMESTAMP_HEADER)
        .ok_or_else(|| TelemetryError::Import("missing Timestamp column".to_string()))?;
    let temperature_cols = numbered_columns(&headers, TEMPERATURE_PREFIX);
    if temperature_cols.is_empty() {
        return Err(TelemetryError::Import("missing Temperature columns".to_string()));
    }
    let liquid_cols = numbered_columns(&headers, LIQUID_PREFIX);
    let vapor_cols = numbered_columns(&headers, VAPOR_PREFIX);
    let progress_col = find_column(&headers, PROGRESS_HEADER);
    let mass_col = find_column(&headers, MASS_HEADER);
    let plates = temperature_cols.len();

    let mut entries = Vec::new();
    for (index, record) in reader.records().enumerate() {
        let record = record?;
        let row = index + 2;

        let timestamp = parse_cell(&record, timestamp_col, row)?
            .ok_or_else(|| TelemetryError::Import(format!("row {}: missing timestamp", row)))?;

        let mut temperatures = Vec::with_capacity(plates);
        for &col in &temperature_cols {
            let value = parse_cell(&record, col, row)?.ok_or_else(|| {
                TelemetryError::Import(format!("row {}: missing temperature", row))
            })?;
            temperatures.push(value);
        }

        let mut compositions = Vec::with_capacity(plates);
        for plate in 0..plates {
            let liquid = match liquid_cols.get(plate) {
                Some(&col) => parse_cell(&record, col, row)?,
                None => None,
            };
            let vapor = match vapor_cols.get(plate) {
                Some(&col) => parse_cell(&record, col, row)?,
                None => None,
            };
            compositions.push(CompositionPair { liquid, vapor });
        }

        let mut entry = TelemetryEntry::new(timestamp, temperatures, compositions);
        if let Some(col) = progress_col {
            entry.percent_complete = parse_cell(&record, col, row)?.unwrap_or(0.0);
        }
        if let Some(col) = mass_col {
            entry.distilled_mass = parse_cell(&record, col, row)?.unwrap_or(0.0);
        }
        entries.push(entry);
    }

    Ok(Recording {
        plate_count: plates,
        initial_mass: None,
        initial_composition: None,
        entries,
    })
}

fn csv_value(value: Option<f64>) -> String {
    value.map(|v| v.to_string()).unwrap_or_default()
}

/// Write entries in the same CSV layout `load_recording` reads
pub fn export_csv(path: &Path, entries: &[Arc<TelemetryEntry>]) -> TelemetryResult<()> {
    let first = entries
        .first()
        .ok_or_else(|| TelemetryError::Import("No current data".to_string()))?;
    let plates = first.plate_count();

    let mut writer = csv::Writer::from_path(path)?;

    let mut header = vec![TIMESTAMP_HEADER.to_string()];
    header.extend((1..=plates).map(|i| format!("{}{}", TEMPERATURE_PREFIX, i)));
    header.extend((1..=plates).map(|i| format!("{}{}", LIQUID_PREFIX, i)));
    header.extend((1..=plates).map(|i| format!("{}{}", VAPOR_PREFIX, i)));
    header.push(PROGRESS_HEADER.to_string());
    header.push(MASS_HEADER.to_string());
    writer.write_record(&header)?;

    for entry in entries {
        let mut row = vec![entry.timestamp.to_string()];
        row.extend(entry.temperatures.iter().map(|t| t.to_string()));
        row.extend(entry.compositions.iter().map(|c| csv_value(c.liquid)));
        row.extend(entry.compositions.iter().map(|c| csv_value(c.vapor)));
        row.push(entry.percent_complete.to_string());
        row.push(entry.distilled_mass.to_string());
        writer.write_record(&row)?;
    }

    writer.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_load_csv() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("run.csv");
        fs::write(
            &path,
            "Timestamp,Temperature 1,Temperature 2,Composition x_1 1,Composition x_1 2,Composition y_1 1,Composition y_1 2\n\
             0,80.5,90,0.2,0.3,0.5,\n\
             10,81,91,0.25,0.35,0.55,0.65\n",
        )
        .unwrap();

        let recording = load_recording(&path).unwrap();
        assert_eq!(recording.plates(), 2);
        assert_eq!(recording.entries.len(), 2);
        let first = &recording.entries[0];
        assert_eq!(first.temperatures, vec![80.5, 90.0]);
        assert_eq!(first.compositions[0], CompositionPair::new(0.2, 0.5));
        assert_eq!(first.compositions[1].vapor, None);
        assert_eq!(recording.entries[1].timestamp, 10.0);
    }

    #[test]
    fn test_load_json() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("run.json");
        fs::write(
            &path,
            r#"{"plateCount": 1, "initialMass": 900, "initialComposition": 30,
                "entries": [{"timestamp": 5, "temperatures": [78], "compositions": [{"x_1": 0.1, "y_1": 0.3}]}]}"#,
        )
        .unwrap();

        let recording = load_recording(&path).unwrap();
        assert_eq!(recording.plates(), 1);
        assert_eq!(recording.initial_mass, Some(900.0));
        assert_eq!(recording.entries[0].percent_complete, 0.0);
    }

    #[test]
    fn test_rejects_unknown_extension_and_empty() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("run.xlsx");
        fs::write(&path, "").unwrap();
        assert!(matches!(load_recording(&path), Err(TelemetryError::Import(_))));

        let path = dir.path().join("empty.csv");
        fs::write(&path, "Timestamp,Temperature 1\n").unwrap();
        assert!(matches!(load_recording(&path), Err(TelemetryError::Import(_))));
    }

    #[test]
    fn test_rejects_entries_replay_would_drop() {
        let dir = TempDir::new().unwrap();

        let path = dir.path().join("nan.csv");
        fs::write(&path, "Timestamp,Temperature 1\n0,80\n5,81\n10,NaN\n").unwrap();
        match load_recording(&path) {
            Err(TelemetryError::Import(message)) => {
                assert_eq!(message, "row 4: plate 1 temperature is not finite")
            }
            other => panic!("expected import error, got {:?}", other),
        }

        let path = dir.path().join("mixed.json");
        fs::write(
            &path,
            r#"{"plateCount": 2, "entries": [
                {"timestamp": 0, "temperatures": [78, 80], "compositions": [{}, {}]},
                {"timestamp": 5, "temperatures": [79], "compositions": [{}]}]}"#,
        )
        .unwrap();
        match load_recording(&path) {
            Err(TelemetryError::Import(message)) => assert!(message.starts_with("entry 2:")),
            other => panic!("expected import error, got {:?}", other),
        }
    }

    #[test]
    fn test_rejects_plate_count_out_of_range() {
        let dir = TempDir::new().unwrap();

        let path = dir.path().join("zero.json");
        fs::write(
            &path,
            r#"{"entries": [{"timestamp": 0, "temperatures": [], "compositions": []}]}"#,
        )
        .unwrap();
        assert!(matches!(load_recording(&path), Err(TelemetryError::Import(_))));

        let path = dir.path().join("wide.csv");
        let header: Vec<String> = (1..=16).map(|i| format!("Temperature {}", i)).collect();
        let row = vec!["80"; 16].join(",");
        fs::write(&path, format!("Timestamp,{}\n0,{}\n", header.join(","), row)).unwrap();
        match load_recording(&path) {
            Err(TelemetryError::Import(message)) => assert!(message.contains("got 16")),
            other => panic!("expected import error, got {:?}", other),
        }
    }

    #[test]
    fn test_export_then_import_preserves_unknown_fractions() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("export.csv");
        let entries = vec![Arc::new(
            TelemetryEntry::new(
                42.0,
                vec![79.0, 88.0],
                vec![CompositionPair::new(0.1, 0.2), CompositionPair::unknown()],
            )
            .with_progress(50.0)
            .with_distilled_mass(7.5),
        )];

        export_csv(&path, &entries).unwrap();
        let recording = load_recording(&path).unwrap();
        assert_eq!(recording.entries[0], *entries[0]);
    }

    #[test]
    fn test_export_requires_data() {
        let dir = TempDir::new().unwrap();
        assert!(export_csv(&dir.path().join("none.csv"), &[]).is_err());
    }
}
