//! nuggetd - Entry Point
//!
//! Deploys the devices of a nugget specification: provisions runtimes,
//! deploys cloud services and walks the user through flashing each board.

use std::collections::HashMap;
use std::env;
use std::path::PathBuf;
use std::process;

use nugget_deployer::app::options::AppOptions;
use nugget_deployer::app::run::run;
use nugget_deployer::deploy::redeploy::{classify, RedeployAction};
use nugget_deployer::errors::DeployError;
use nugget_deployer::filesys::file::File;
use nugget_deployer::logs::{init_logging, LogOptions};
use nugget_deployer::models::spec::NuggetSpec;
use nugget_deployer::storage::settings::Settings;
use nugget_deployer::utils::version_info;

use tracing::{error, info, warn};

const USAGE: &str = "Usage: nuggetd --spec=<file> [--settings=<file>] [--previous=<file>] [--workspace=<dir>] [--skip-flash] [--classify] [--version]";

#[tokio::main]
async fn main() {
    // Parse command line arguments
    let args: Vec<String> = env::args().collect();
    let mut cli_args: HashMap<String, String> = HashMap::new();

    for arg in args.iter().skip(1) {
        if let Some((key, value)) = arg.split_once('=') {
            // Handle --key=value format
            let clean_key = key.trim_start_matches('-');
            cli_args.insert(clean_key.to_string(), value.to_string());
        } else if arg.starts_with("--") {
            // Handle standalone flags like --version
            let clean_key = arg.trim_start_matches('-');
            cli_args.insert(clean_key.to_string(), "true".to_string());
        }
    }

    // Print version and exit
    if cli_args.contains_key("version") {
        match serde_json::to_string_pretty(&version_info()) {
            Ok(version) => println!("{}", version),
            Err(e) => eprintln!("Failed to print version: {e}"),
        }
        return;
    }

    // Retrieve the settings file
    let settings = match cli_args.get("settings") {
        Some(path) => match Settings::load(&File::new(path)).await {
            Ok(settings) => settings,
            Err(e) => {
                eprintln!("{e}");
                process::exit(2);
            }
        },
        None => Settings::default(),
    };

    // Initialize logging
    let log_options = LogOptions {
        log_level: settings.log_level.clone(),
        json_format: settings.json_logs,
    };
    if let Err(e) = init_logging(log_options) {
        eprintln!("Failed to initialize logging: {e}");
    }

    let Some(spec_path) = cli_args.get("spec") else {
        eprintln!("{}", USAGE);
        process::exit(2);
    };
    let spec = match load_spec(spec_path).await {
        Ok(spec) => spec,
        Err(e) => {
            error!("{}", e);
            process::exit(2);
        }
    };

    let mut options = AppOptions::from_settings(&settings);
    if let Some(workspace) = cli_args.get("workspace") {
        options.workspace_dir = PathBuf::from(workspace);
    }
    if cli_args.contains_key("skip-flash") {
        options.run.skip_flash = true;
    }

    // Compare against the previously deployed specification
    if let Some(previous_path) = cli_args.get("previous") {
        let previous = match load_spec(previous_path).await {
            Ok(previous) => previous,
            Err(e) => {
                error!("{}", e);
                process::exit(2);
            }
        };
        let classification = classify(&previous, &spec);
        info!(
            "Redeploy classification: {:?} ({})",
            classification.action,
            classification.reasons.join("; ")
        );

        if cli_args.contains_key("classify") {
            match serde_json::to_string(&classification) {
                Ok(line) => println!("{}", line),
                Err(e) => error!("Unable to serialize classification: {}", e),
            }
            return;
        }

        match classification.action {
            RedeployAction::NoChange => {
                info!("Nothing changed since the last deployment");
                return;
            }
            RedeployAction::ConfigOnly => options.run.skip_flash = true,
            RedeployAction::FirmwareRequired => {}
        }
    } else if cli_args.contains_key("classify") {
        eprintln!("--classify needs --previous=<file>");
        process::exit(2);
    }

    info!("Running nuggetd with options: {:?}", options);
    let code = match run(spec, options, await_shutdown_signal()).await {
        Ok(report) if report.failed() == 0 => 0,
        Ok(report) => {
            warn!("{} device(s) failed to deploy", report.failed());
            1
        }
        Err(e) => {
            error!("Deployment failed: {e}");
            2
        }
    };

    // stdin reads cannot be cancelled, exit instead of waiting on the runtime
    process::exit(code);
}

async fn load_spec(path: &str) -> Result<NuggetSpec, DeployError> {
    File::new(path)
        .read_json::<NuggetSpec>()
        .await
        .map_err(|e| DeployError::Config(format!("Unable to read specification {}: {}", path, e)))
}

async fn await_shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let (mut sigterm, mut sigint) =
            match (signal(SignalKind::terminate()), signal(SignalKind::interrupt())) {
                (Ok(sigterm), Ok(sigint)) => (sigterm, sigint),
                _ => {
                    error!("Unable to install signal handlers, falling back to Ctrl+C");
                    if tokio::signal::ctrl_c().await.is_err() {
                        std::future::pending::<()>().await;
                    }
                    return;
                }
            };

        tokio::select! {
            _ = sigterm.recv() => {
                info!("SIGTERM received, shutting down...");
            }
            _ = sigint.recv() => {
                info!("SIGINT received, shutting down...");
            }
        }
    }

    #[cfg(not(unix))]
    {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
        info!("Ctrl+C received, shutting down...");
    }
}
