//! Main application run loop

use std::future::Future;
use std::sync::Arc;

use chrono::Utc;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::app::console::{print_events, read_ready_lines};
use crate::app::options::AppOptions;
use crate::deploy::cloud::GcloudDeployer;
use crate::deploy::events::{event_channel, EventSink};
use crate::deploy::gate::{flash_gate, FlashGate};
use crate::deploy::orchestrator::{DeploymentReport, DeviceOrchestrator};
use crate::deploy::outputs::Outputs;
use crate::deploy::provision::HttpRuntimeProvisioner;
use crate::deploy::strategy::StrategyRegistry;
use crate::errors::DeployError;
use crate::hardware::process::ProcessHardwareService;
use crate::hardware::HardwareService;
use crate::models::spec::NuggetSpec;
use crate::registry::plugins::PluginRegistry;
use crate::server::serve::serve;
use crate::server::state::ServerState;
use crate::storage::deployed::{load_deployed, save_deployed, DeployedState};

/// Deploy the devices of one specification
pub async fn run(
    spec: NuggetSpec,
    mut options: AppOptions,
    shutdown_signal: impl Future<Output = ()> + Send + 'static,
) -> Result<DeploymentReport, DeployError> {
    info!("Deploying nugget '{}'", spec.project_name());

    if options.run.skip_flash && options.run.previous_outputs.is_none() {
        options.run.previous_outputs = load_flashed_outputs(&options).await;
    }

    let (shutdown_tx, _shutdown_rx): (broadcast::Sender<()>, _) = broadcast::channel(1);
    let (events, event_rx) = event_channel();
    let (gate_handle, gate) = flash_gate();

    let mut orchestrator = init_orchestrator(&options, events, gate).await?;
    let server_state = Arc::new(ServerState::new(
        gate_handle,
        orchestrator.subscribe_state(),
    ));

    let printer_handle = tokio::spawn(print_events(event_rx));

    let stdin_handle = if options.enable_stdin_gate {
        Some(tokio::spawn(read_ready_lines(
            server_state.clone(),
            shutdown_tx.subscribe(),
        )))
    } else {
        None
    };

    let server_handle = if options.enable_server {
        let mut shutdown_rx = shutdown_tx.subscribe();
        let handle = serve(&options.server, server_state.clone(), async move {
            let _ = shutdown_rx.recv().await;
        })
        .await;
        match handle {
            Ok(handle) => Some(handle),
            Err(e) => {
                error!("Failed to start HTTP server: {}", e);
                None
            }
        }
    } else {
        None
    };

    let result = tokio::select! {
        result = orchestrator.deploy_devices(&spec, options.run.clone()) => result,
        _ = shutdown_signal => {
            info!("Shutdown signal received, abandoning deployment...");
            Err(DeployError::Internal("deployment interrupted".to_string()))
        }
    };

    // Dropping the orchestrator closes the event stream
    drop(orchestrator);
    if let Err(e) = printer_handle.await {
        error!("Event printer failed: {}", e);
    }

    let _ = shutdown_tx.send(());
    if let Some(handle) = stdin_handle {
        handle.abort();
    }
    if let Some(handle) = server_handle {
        await_server(handle, &options).await;
    }

    if let Ok(report) = &result {
        record_deployment(&options, &spec, report).await;
    }
    result
}

// ============================== DEPLOYMENT RECORD ================================ //

async fn load_flashed_outputs(options: &AppOptions) -> Option<Outputs> {
    match load_deployed(&options.deployed_file()).await {
        Ok(Some(state)) => {
            info!("Boards were last flashed for '{}' at {}", state.project, state.deployed_at);
            Some(state.outputs)
        }
        Ok(None) => {
            warn!("No record of an earlier deployment, devices that need injected values will be flashed");
            None
        }
        Err(e) => {
            warn!("{}, devices that need injected values will be flashed", e);
            None
        }
    }
}

async fn record_deployment(options: &AppOptions, spec: &NuggetSpec, report: &DeploymentReport) {
    if report.devices.is_empty() {
        return;
    }
    if report.failed() > 0 {
        warn!("Not recording this deployment, {} device(s) failed", report.failed());
        return;
    }

    let state = DeployedState {
        project: spec.project_name(),
        outputs: report.outputs.clone(),
        deployed_at: report.finished_at.unwrap_or_else(Utc::now),
    };
    let file = options.deployed_file();
    match save_deployed(&file, &state).await {
        Ok(()) => debug!("Deployment recorded in {}", file.path().display()),
        Err(e) => error!("Failed to record deployment: {}", e),
    }
}

// =============================== INITIALIZATION ================================== //

async fn init_orchestrator(
    options: &AppOptions,
    events: EventSink,
    gate: FlashGate,
) -> Result<DeviceOrchestrator, DeployError> {
    let registry = PluginRegistry::load(&options.plugins_dir).await?;
    info!(
        "Loaded {} device plugin(s) from {}",
        registry.len(),
        registry.root().display()
    );

    let hardware: Arc<dyn HardwareService> =
        Arc::new(ProcessHardwareService::new(&options.hardware));

    let mut orchestrator = DeviceOrchestrator::new(
        StrategyRegistry::new(hardware),
        events,
        gate,
        options.deploy_config(),
    )
    .with_registry(Arc::new(registry));

    if options.enable_provisioner {
        info!("Provisioning runtimes through {}", options.runtime.base_url);
        orchestrator =
            orchestrator.with_provisioner(Arc::new(HttpRuntimeProvisioner::new(&options.runtime)?));
    }
    if options.enable_cloud {
        info!("Cloud deploys target project {}", options.cloud.project);
        orchestrator = orchestrator.with_cloud(Arc::new(GcloudDeployer::new(&options.cloud)));
    }

    Ok(orchestrator)
}

// ================================= SHUTDOWN ===================================== //

async fn await_server(handle: JoinHandle<Result<(), DeployError>>, options: &AppOptions) {
    match tokio::time::timeout(options.max_shutdown_delay, handle).await {
        Ok(Ok(Ok(()))) => info!("HTTP server stopped"),
        Ok(Ok(Err(e))) => error!("HTTP server failed: {}", e),
        Ok(Err(e)) => error!("HTTP server task failed: {}", e),
        Err(_) => error!(
            "HTTP server did not stop within {:?}",
            options.max_shutdown_delay
        ),
    }
}
