//! Deployment orchestrator
//!
//! Runs one deployment: resolve the device order, provision runtimes, then
//! handle each device in turn. Flash devices wait at the gate until a human
//! confirms the board is plugged in. A failing device is reported and the
//! loop moves on; only a dependency cycle aborts the run.

use std::path::PathBuf;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use crate::deploy::cloud::{existing_api_key, CloudDeployer};
use crate::deploy::events::EventSink;
use crate::deploy::fsm::{RunEvent, RunFsm, RunState};
use crate::deploy::gate::FlashGate;
use crate::deploy::mapper::apply_device_fields;
use crate::deploy::outputs::Outputs;
use crate::deploy::provision::RuntimeProvisioner;
use crate::deploy::resolver::{resolve_plan, ResolvedDevice};
use crate::deploy::strategy::{FlashContext, ProgressFn, StrategyRegistry};
use crate::errors::DeployError;
use crate::hardware::FlashResult;
use crate::models::events::DeployEvent;
use crate::models::manifest::DeployMethod;
use crate::models::spec::NuggetSpec;
use crate::registry::ManifestLookup;

/// Target name of the final "all devices finished" signal
pub const ALL_DEVICES_TARGET: &str = "devices";

/// Message of the completion event sent for devices skipped by a config-only redeploy
pub const FIRMWARE_UNCHANGED: &str = "firmware unchanged";

/// Where the orchestrator stages files and deploys cloud services
#[derive(Debug, Clone)]
pub struct DeployConfig {
    /// Agent-generated sources, also the flash staging directory
    pub workspace_dir: PathBuf,

    /// Cloud region used when a manifest does not name one
    pub cloud_region: String,
}

/// Per-run options
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    /// Leave flash and esptool devices untouched where their firmware would
    /// not change
    pub skip_flash: bool,

    /// Outputs of the last completed run. With `skip_flash` they seed this
    /// run, so runtimes are not provisioned again and cloud services keep
    /// the API key the boards were flashed with.
    pub previous_outputs: Option<Outputs>,
}

impl RunOptions {
    /// Outputs the boards on the bench were flashed with, when they are kept
    fn flashed_outputs(&self) -> Option<&Outputs> {
        if self.skip_flash {
            self.previous_outputs.as_ref()
        } else {
            None
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceStatus {
    Deployed,
    Failed,
    Skipped,
}

/// How one device fared
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeviceOutcome {
    pub plugin_id: String,
    pub role: String,
    pub status: DeviceStatus,
    pub message: String,
}

/// Result of a deployment run
#[derive(Debug, Clone, Default)]
pub struct DeploymentReport {
    pub outputs: Outputs,
    pub devices: Vec<DeviceOutcome>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl DeploymentReport {
    pub fn failed(&self) -> usize {
        self.devices
            .iter()
            .filter(|d| d.status == DeviceStatus::Failed)
            .count()
    }
}

/// Device deployment orchestrator
pub struct DeviceOrchestrator {
    registry: Option<Arc<dyn ManifestLookup>>,
    strategies: StrategyRegistry,
    provisioner: Option<Arc<dyn RuntimeProvisioner>>,
    cloud: Option<Arc<dyn CloudDeployer>>,
    events: EventSink,
    gate: FlashGate,
    fsm: RunFsm,
    state_tx: watch::Sender<RunState>,
    config: DeployConfig,
}

impl DeviceOrchestrator {
    /// Create an orchestrator without a registry or collaborators
    pub fn new(
        strategies: StrategyRegistry,
        events: EventSink,
        gate: FlashGate,
        config: DeployConfig,
    ) -> Self {
        let fsm = RunFsm::new();
        let (state_tx, _) = watch::channel(fsm.state().clone());
        Self {
            registry: None,
            strategies,
            provisioner: None,
            cloud: None,
            events,
            gate,
            fsm,
            state_tx,
            config,
        }
    }

    pub fn with_registry(mut self, registry: Arc<dyn ManifestLookup>) -> Self {
        self.registry = Some(registry);
        self
    }

    pub fn with_provisioner(mut self, provisioner: Arc<dyn RuntimeProvisioner>) -> Self {
        self.provisioner = Some(provisioner);
        self
    }

    pub fn with_cloud(mut self, cloud: Arc<dyn CloudDeployer>) -> Self {
        self.cloud = Some(cloud);
        self
    }

    /// Subscribe to run state changes
    pub fn subscribe_state(&self) -> watch::Receiver<RunState> {
        self.state_tx.subscribe()
    }

    fn transition(&mut self, event: RunEvent) -> Result<(), DeployError> {
        self.fsm.process(event).map_err(DeployError::Internal)?;
        debug!("Run state: {:?}", self.fsm.state());
        self.state_tx.send_replace(self.fsm.state().clone());
        Ok(())
    }

    /// Deploy every device in the specification
    pub async fn deploy_devices(
        &mut self,
        spec: &NuggetSpec,
        options: RunOptions,
    ) -> Result<DeploymentReport, DeployError> {
        let Some(registry) = self.registry.clone() else {
            info!("No device registry configured, skipping device deployment");
            return Ok(DeploymentReport::default());
        };
        if spec.devices.is_empty() {
            info!("Specification declares no devices, skipping device deployment");
            return Ok(DeploymentReport::default());
        }

        let started_at = Utc::now();
        if !self.fsm.is_active() && *self.fsm.state() != RunState::Idle {
            self.transition(RunEvent::Reset)?;
        }
        self.transition(RunEvent::Resolve)?;

        let plan = match resolve_plan(&spec.devices, &*registry) {
            Ok(plan) => plan,
            Err(e) => {
                error!("Cannot order devices: {}", e);
                self.events.error(e.to_string(), false);
                self.transition(RunEvent::Fail(e.to_string()))?;
                return Err(e);
            }
        };
        info!(
            "Deploying {} device(s): {}",
            plan.len(),
            plan.iter()
                .map(|d| d.spec.plugin_id.as_str())
                .collect::<Vec<_>>()
                .join(", ")
        );
        self.transition(RunEvent::Resolved)?;

        let mapped = apply_device_fields(spec, &*registry);
        let project = spec.project_name();
        let mut outputs = match options.flashed_outputs() {
            Some(previous) => {
                info!("Keeping the {} output(s) the boards were flashed with", previous.len());
                previous.clone()
            }
            None => {
                let mut outputs = Outputs::new();
                self.provision_runtimes(&plan, &mapped, &mut outputs).await;
                outputs
            }
        };

        let mut devices = Vec::with_capacity(plan.len());
        for (index, device) in plan.iter().enumerate() {
            self.transition(RunEvent::DeployDevice {
                index,
                plugin_id: device.spec.plugin_id.clone(),
            })?;
            let outcome = self
                .deploy_device(device, &*registry, &project, &mut outputs, &options)
                .await;
            debug!("{} finished: {:?}", outcome.plugin_id, outcome.status);
            devices.push(outcome);
        }

        self.transition(RunEvent::Finish)?;
        self.events.emit(DeployEvent::DeployComplete {
            target: ALL_DEVICES_TARGET.to_string(),
            url: None,
        });

        let finished_at = Utc::now();
        info!(
            "Device deployment finished in {}s, {} of {} failed",
            (finished_at - started_at).num_seconds(),
            devices.iter().filter(|d| d.status == DeviceStatus::Failed).count(),
            devices.len()
        );
        let report = DeploymentReport {
            outputs,
            devices,
            started_at: Some(started_at),
            finished_at: Some(finished_at),
        };
        Ok(report)
    }

    async fn provision_runtimes(
        &mut self,
        plan: &[ResolvedDevice],
        spec: &NuggetSpec,
        outputs: &mut Outputs,
    ) {
        for device in plan.iter().filter(|d| d.manifest.deploy.needs_provisioning()) {
            let plugin_id = &device.spec.plugin_id;
            let Some(provisioner) = self.provisioner.clone() else {
                warn!("{} needs a runtime but no provisioner is configured", plugin_id);
                self.events.error(
                    format!("Runtime provisioning unavailable for {}", plugin_id),
                    true,
                );
                continue;
            };

            self.events.deploy_progress(format!("Provisioning runtime for {}", plugin_id), 0);
            match provisioner.provision(spec).await {
                Ok(runtime) => {
                    info!("Provisioned agent {} for {}", runtime.agent_id, plugin_id);
                    runtime.write_outputs(outputs);
                    self.events.deploy_progress(format!("Runtime ready for {}", plugin_id), 100);
                }
                Err(e) => {
                    error!("Runtime provisioning failed for {}: {}", plugin_id, e);
                    self.events.error(
                        format!("Runtime provisioning failed for {}: {}", plugin_id, e),
                        true,
                    );
                }
            }
        }
    }

    async fn deploy_device(
        &mut self,
        device: &ResolvedDevice,
        registry: &dyn ManifestLookup,
        project: &str,
        outputs: &mut Outputs,
        options: &RunOptions,
    ) -> DeviceOutcome {
        let role = device.manifest.role().to_string();
        let outcome = |status, message: String| DeviceOutcome {
            plugin_id: device.spec.plugin_id.clone(),
            role: role.clone(),
            status,
            message,
        };

        let method = match device.manifest.deploy.deploy_method() {
            Ok(method) => method,
            Err(e) => {
                warn!("Skipping {}: {}", device.spec.plugin_id, e);
                self.events.error(format!("Skipping {}: {}", role, e), true);
                return outcome(DeviceStatus::Skipped, e.to_string());
            }
        };

        match method {
            DeployMethod::Cloud => match self.deploy_cloud(device, &role, project, outputs).await {
                Ok(url) => outcome(DeviceStatus::Deployed, url.unwrap_or_default()),
                Err(e) => {
                    error!("Cloud deploy failed for {}: {}", device.spec.plugin_id, e);
                    self.events.error(format!("Cloud deploy failed for {}: {}", role, e), true);
                    self.events.emit(DeployEvent::DeployComplete {
                        target: role.clone(),
                        url: None,
                    });
                    outcome(DeviceStatus::Failed, e.to_string())
                }
            },
            DeployMethod::Flash | DeployMethod::Esptool
                if options.skip_flash
                    && injections_unchanged(
                        &device.manifest.deploy.requires,
                        options.flashed_outputs(),
                        outputs,
                    ) =>
            {
                info!("Firmware unchanged, not flashing {}", device.spec.plugin_id);
                self.events.flash_complete(&role, true, FIRMWARE_UNCHANGED);
                outcome(DeviceStatus::Skipped, FIRMWARE_UNCHANGED.to_string())
            }
            DeployMethod::Flash | DeployMethod::Esptool => {
                if options.skip_flash {
                    warn!(
                        "Values injected into {} changed since it was flashed, flashing again",
                        device.spec.plugin_id
                    );
                }
                match self.flash_device(device, &role, registry, outputs).await {
                    Ok(result) => {
                        let message = result.message_or_default();
                        self.events.flash_complete(&role, result.success, message.clone());
                        if result.success {
                            info!("Flashed {}", device.spec.plugin_id);
                            outcome(DeviceStatus::Deployed, message)
                        } else {
                            warn!("Flashing {} failed: {}", device.spec.plugin_id, message);
                            outcome(DeviceStatus::Failed, message)
                        }
                    }
                    Err(e) => {
                        error!("Flashing {} failed: {}", device.spec.plugin_id, e);
                        self.events.error(format!("Failed to flash {}: {}", role, e), true);
                        self.events.flash_complete(&role, false, e.to_string());
                        outcome(DeviceStatus::Failed, e.to_string())
                    }
                }
            }
        }
    }

    async fn deploy_cloud(
        &mut self,
        device: &ResolvedDevice,
        role: &str,
        project: &str,
        outputs: &mut Outputs,
    ) -> Result<Option<String>, DeployError> {
        self.events.emit(DeployEvent::DeployStarted {
            target: role.to_string(),
        });

        let cloud = self
            .cloud
            .clone()
            .ok_or_else(|| DeployError::Config("no cloud deployer configured".to_string()))?;

        let cloud_config = device.manifest.deploy.cloud.clone().unwrap_or_default();
        let workspace_dir = &self.config.workspace_dir;
        let source_dir = cloud_config
            .source_dir
            .map(|dir| workspace_dir.join(dir))
            .unwrap_or_else(|| workspace_dir.clone());
        let region = cloud_config
            .region
            .unwrap_or_else(|| self.config.cloud_region.clone());

        self.events
            .deploy_progress(format!("Deploying {} to the cloud", role), 10);
        let api_key = existing_api_key(&device.manifest.deploy.provides, outputs);
        if api_key.is_some() {
            debug!("{} keeps its API key", device.spec.plugin_id);
        }
        let result = cloud
            .deploy(&source_dir, workspace_dir, project, &region, api_key.as_deref())
            .await?;

        for (key, value) in result.to_provided(&device.manifest.deploy.provides) {
            debug!("{} provides {}", device.spec.plugin_id, key);
            outputs.insert(key, value);
        }

        self.events.deploy_progress(format!("{} deployed", role), 100);
        self.events.emit(DeployEvent::DeployComplete {
            target: role.to_string(),
            url: result.url.clone(),
        });
        Ok(result.url)
    }

    async fn flash_device(
        &mut self,
        device: &ResolvedDevice,
        role: &str,
        registry: &dyn ManifestLookup,
        outputs: &Outputs,
    ) -> Result<FlashResult, DeployError> {
        let plugin_id = &device.spec.plugin_id;
        let strategy = self.strategies.select(&device.manifest.deploy.method)?;
        let plugin_dir = registry
            .get_plugin_dir(plugin_id)
            .ok_or_else(|| DeployError::ManifestNotFound(plugin_id.clone()))?;
        let files = registry.get_flash_file_list(plugin_id).unwrap_or_default();

        self.gate.arm();
        self.transition(RunEvent::OpenGate)?;
        self.events.emit(DeployEvent::FlashPrompt {
            device_role: role.to_string(),
            message: device.manifest.prompt_message(),
        });
        info!("Waiting for {} to be connected", role);
        self.gate.wait().await?;
        self.transition(RunEvent::Release)?;

        let injections = outputs.injections_for(&device.manifest.deploy.requires);
        for key in &injections.missing {
            warn!("{} requires {} but no earlier step produced it", plugin_id, key);
            self.events.error(
                format!("Missing required output {} for {}", key, role),
                true,
            );
        }

        let sink = self.events.clone();
        let progress_role = role.to_string();
        let progress: ProgressFn = Arc::new(move |step: &str, percent: u8| {
            sink.flash_progress(&progress_role, step, percent);
        });

        let ctx = FlashContext {
            plugin_id: plugin_id.clone(),
            plugin_dir,
            workspace_dir: self.config.workspace_dir.clone(),
            fields: device.spec.fields.clone(),
            injections: injections.values,
            flash_config: device.manifest.deploy.flash.clone(),
            esptool_config: device.manifest.deploy.esptool.clone(),
            files,
            progress,
        };
        debug!("Flashing with {:?}", ctx);
        strategy.flash(&ctx).await
    }
}

/// Whether a board flashed with `flashed` would receive the same values now.
///
/// Without a record of the last run only a device that requires nothing is
/// known to be unchanged.
fn injections_unchanged(requires: &[String], flashed: Option<&Outputs>, current: &Outputs) -> bool {
    match flashed {
        Some(flashed) => flashed.injections_for(requires) == current.injections_for(requires),
        None => requires.is_empty(),
    }
}
