use distill_telemetry::projection::format_elapsed;
use distill_telemetry::{Dashboard, SessionStatus};
use std::fmt::Write as _;
use std::io::Write;

/// Write JSON string to stdout.
pub fn write_output(json: &str) -> Result<(), String> {
    let stdout = std::io::stdout();
    let mut handle = stdout.lock();
    handle
        .write_all(json.as_bytes())
        .and_then(|_| handle.write_all(b"\n"))
        .map_err(|e| format!("Failed to write to stdout: {}", e))
}

/// Serialize a value to JSON (pretty or compact).
pub fn to_json<T: serde::Serialize>(value: &T, compact: bool) -> Result<String, String> {
    if compact {
        serde_json::to_string(value).map_err(|e| format!("JSON serialization failed: {}", e))
    } else {
        serde_json::to_string_pretty(value)
            .map_err(|e| format!("JSON serialization failed: {}", e))
    }
}

fn fraction(value: Option<f64>) -> String {
    value.map(|v| format!("{:.3}", v)).unwrap_or_else(|| "-".to_string())
}

/// Plain-text rendering of the dashboard for terminals
pub fn render_dashboard(status: &SessionStatus, dashboard: &Dashboard) -> String {
    let mut out = String::new();
    let elapsed = dashboard
        .temperatures
        .labels
        .last()
        .cloned()
        .unwrap_or_else(|| format_elapsed(0.0));

    let _ = writeln!(
        out,
        "[{}] {} {} entries, {:.1}% complete",
        elapsed, status.state, status.history.current_size, status.progress
    );

    for plate in &dashboard.composition_vs_temperature {
        let _ = writeln!(
            out,
            "  plate {:>2}: {:>7} C  x={} y={}",
            plate.plate,
            plate.liquid.temperature,
            fraction(plate.liquid.fraction),
            fraction(plate.vapor.fraction)
        );
    }

    let mass = &dashboard.distilled_mass;
    if let Some((_, latest)) = mass.points().last() {
        let _ = writeln!(
            out,
            "  distilled mass: {:.2} (axis {}..{})",
            latest, mass.y_domain.0, mass.y_domain.1
        );
    }
    out
}
