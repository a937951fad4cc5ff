use crate::cli::SpeedsArgs;
use crate::exit_codes;
use crate::output;
use distill_telemetry::PlaybackSpeed;
use serde::Serialize;
use std::time::Duration;

const BASE_INTERVAL: Duration = Duration::from_millis(1000);

#[derive(Serialize)]
struct SpeedInfo {
    multiplier: u32,
    interval_ms: u128,
    default: bool,
}

pub fn execute(args: SpeedsArgs) -> i32 {
    let speeds: Vec<SpeedInfo> = PlaybackSpeed::ALL
        .into_iter()
        .map(|speed| SpeedInfo {
            multiplier: speed.multiplier(),
            interval_ms: speed.interval(BASE_INTERVAL).as_millis(),
            default: speed == PlaybackSpeed::default(),
        })
        .collect();

    if args.json {
        match output::to_json(&speeds, false) {
            Ok(json) => {
                if let Err(e) = output::write_output(&json) {
                    eprintln!("Error: {}", e);
                    return exit_codes::EXECUTION_ERROR;
                }
            }
            Err(e) => {
                eprintln!("Error: {}", e);
                return exit_codes::EXECUTION_ERROR;
            }
        }
    } else {
        println!("Replay speeds:\n");
        println!("  {:<8} {:<14}", "Speed", "Entry every");
        println!("  {}", "-".repeat(24));
        for s in &speeds {
            let marker = if s.default { " (default)" } else { "" };
            println!(
                "  {:<8} {:<14}{}",
                format!("{}x", s.multiplier),
                format!("{} ms", s.interval_ms),
                marker
            );
        }
    }

    exit_codes::SUCCESS
}
