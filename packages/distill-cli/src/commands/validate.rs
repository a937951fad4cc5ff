use crate::cli::ValidateSettingsArgs;
use crate::exit_codes;
use crate::output;
use distill_telemetry::Settings;
use serde::Serialize;

#[derive(Serialize)]
struct ValidateOutput {
    file: String,
    valid: bool,
    settings: Option<Settings>,
    error: Option<String>,
}

fn load(args: &ValidateSettingsArgs) -> Result<Settings, String> {
    let content = std::fs::read_to_string(&args.file)
        .map_err(|e| format!("Cannot read {}: {}", args.file.display(), e))?;
    serde_json::from_str(&content).map_err(|e| format!("Invalid settings JSON: {}", e))
}

pub fn execute(args: ValidateSettingsArgs) -> i32 {
    let (settings, error) = match load(&args) {
        Ok(settings) => {
            let error = settings.validate().err().map(|e| e.to_string());
            (Some(settings), error)
        }
        Err(e) => (None, Some(e)),
    };

    let result = ValidateOutput {
        file: args.file.display().to_string(),
        valid: error.is_none(),
        settings,
        error: error.clone(),
    };

    if args.json {
        match output::to_json(&result, false) {
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
    } else if let Some(ref err) = error {
        eprintln!("Error: {}", err);
    } else if let Some(settings) = &result.settings {
        let modbus = &settings.modbus;
        println!(
            "Settings '{}' are valid ({} at {} baud, unit {}, timeout {} ms)",
            result.file, modbus.usb_port, modbus.baudrate, modbus.unit_id, modbus.timeout
        );
    }

    if error.is_some() {
        exit_codes::INPUT_ERROR
    } else {
        exit_codes::SUCCESS
    }
}
