use crate::cli::ReplayArgs;
use crate::exit_codes;
use crate::output;
use anyhow::{bail, Context};
use distill_telemetry::{
    ConnectionController, Dashboard, PlaybackSpeed, SessionEvent, SessionStatus, SimulatedBackend,
    TelemetryConfig,
};
use serde::Serialize;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

const POLL_INTERVAL: Duration = Duration::from_millis(20);

#[derive(Serialize)]
struct ReplayReport<'a> {
    file: &'a str,
    status: SessionStatus,
    dashboard: Dashboard,
}

enum Outcome {
    Completed,
    Interrupted,
}

pub async fn execute(args: ReplayArgs) -> i32 {
    let speed = match PlaybackSpeed::try_from(args.speed) {
        Ok(speed) => speed,
        Err(e) => {
            eprintln!("Error: {}", e);
            return exit_codes::INPUT_ERROR;
        }
    };
    if !args.file.is_file() {
        eprintln!("Error: File not found: {}", args.file.display());
        return exit_codes::INPUT_ERROR;
    }
    if args.interval_ms == 0 {
        eprintln!("Error: --interval-ms must be positive");
        return exit_codes::INPUT_ERROR;
    }

    match run(&args, speed).await {
        Ok(Outcome::Completed) => exit_codes::SUCCESS,
        Ok(Outcome::Interrupted) => exit_codes::INTERRUPTED,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            exit_codes::EXECUTION_ERROR
        }
    }
}

fn report(args: &ReplayArgs, controller: &ConnectionController) -> anyhow::Result<()> {
    let status = controller.status();
    let dashboard = controller.dashboard();

    if args.json {
        let file = args.file.to_string_lossy();
        let report = ReplayReport {
            file: &file,
            status,
            dashboard,
        };
        let json = output::to_json(&report, args.compact).map_err(anyhow::Error::msg)?;
        output::write_output(&json).map_err(anyhow::Error::msg)?;
    } else {
        print!("{}", output::render_dashboard(&status, &dashboard));
    }
    Ok(())
}

async fn run(args: &ReplayArgs, speed: PlaybackSpeed) -> anyhow::Result<Outcome> {
    let backend = SimulatedBackend::paced(Duration::from_millis(args.interval_ms));
    let config = TelemetryConfig {
        history_capacity: args.capacity,
        command_timeout: args.timeout_ms.map(Duration::from_millis),
        default_speed: speed,
    };
    let controller = ConnectionController::new(Arc::new(backend), config)
        .context("invalid replay configuration")?;

    let (tx, mut events) = mpsc::unbounded_channel();
    controller.set_event_callback(move |event| {
        let _ = tx.send(event);
    });

    controller.set_file_path(&args.file);
    controller
        .connect_file()
        .await
        .with_context(|| format!("failed to start replay of {}", args.file.display()))?;

    if !args.quiet {
        eprintln!("Replaying {} at {}...", args.file.display(), speed);
    }

    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);
    let mut tick = tokio::time::interval(POLL_INTERVAL);
    let mut last_printed = 0u64;

    let outcome = loop {
        tokio::select! {
            event = events.recv() => match event {
                Some(SessionEvent::Completed { .. }) => break Outcome::Completed,
                Some(SessionEvent::Error { error, .. }) => bail!("replay aborted: {}", error),
                Some(event) => log::debug!("{:?}", event),
                None => bail!("event stream ended unexpectedly"),
            },

            _ = tick.tick(), if args.every > 0 => {
                let accepted = controller.stats().entries_accepted;
                if accepted >= last_printed + args.every {
                    last_printed = accepted;
                    report(args, &controller)?;
                }
            }

            _ = &mut ctrl_c => {
                log::warn!("Interrupted, stopping replay");
                break Outcome::Interrupted;
            }
        }
    };

    report(args, &controller)?;

    if let Some(path) = &args.export {
        export(&controller, path).await?;
        if !args.quiet {
            eprintln!("Entries written to {}", path.display());
        }
    }

    controller.shutdown().await;
    Ok(outcome)
}

async fn export(controller: &ConnectionController, path: &Path) -> anyhow::Result<()> {
    controller
        .export(path)
        .await
        .with_context(|| format!("failed to export to {}", path.display()))
}
