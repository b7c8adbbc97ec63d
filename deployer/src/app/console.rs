//! Console side of a run: events on stdout, prompts on stderr, ready
//! signals from stdin

use std::sync::Arc;

use colored::Colorize;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, error, warn};

use crate::errors::DeployError;
use crate::models::events::DeployEvent;
use crate::server::state::ServerState;

/// Human-readable line for events worth showing on the terminal
pub fn describe(event: &DeployEvent) -> Option<String> {
    match event {
        DeployEvent::FlashPrompt {
            device_role,
            message,
        } => Some(format!(
            "{} {}\n{}",
            format!("[{}]", device_role).cyan().bold(),
            message,
            "Press Enter when ready.".yellow()
        )),
        DeployEvent::FlashComplete {
            device_role,
            success,
            message,
        } => {
            let status = if *success { "ok".green() } else { "failed".red() };
            Some(format!("{} {}: {}", format!("[{}]", device_role).cyan(), status, message))
        }
        DeployEvent::Error {
            message,
            recoverable,
        } => {
            let label = if *recoverable { "warning".yellow() } else { "error".red().bold() };
            Some(format!("{}: {}", label, message))
        }
        _ => None,
    }
}

/// Print every event as a JSON line until the sink side is dropped
pub async fn print_events(mut events: mpsc::UnboundedReceiver<DeployEvent>) {
    while let Some(event) = events.recv().await {
        match serde_json::to_string(&event) {
            Ok(line) => println!("{}", line),
            Err(e) => error!("Unable to serialize event: {}", e),
        }
        if let Some(text) = describe(&event) {
            eprintln!("{}", text);
        }
    }
    debug!("Event stream closed");
}

/// Treat each stdin line as a ready signal
pub async fn read_ready_lines(state: Arc<ServerState>, mut shutdown_rx: broadcast::Receiver<()>) {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            line = lines.next_line() => match line {
                Ok(Some(_)) => match state.release_gate() {
                    Ok(()) => debug!("Ready signal received on stdin"),
                    Err(DeployError::GateNotOpen) => debug!("Ignoring input, no device is waiting"),
                    Err(e) => warn!("Ready signal rejected: {}", e),
                },
                Ok(None) => {
                    debug!("stdin closed");
                    return;
                }
                Err(e) => {
                    error!("Unable to read stdin: {}", e);
                    return;
                }
            },
            _ = shutdown_rx.recv() => return,
        }
    }
}
