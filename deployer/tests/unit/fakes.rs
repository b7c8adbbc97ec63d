//! In-memory collaborators for driving the orchestrator

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use secrecy::SecretString;
use serde_json::{json, Value};
use tokio::sync::watch;

use nugget_deployer::deploy::cloud::{CloudDeployResult, CloudDeployer};
use nugget_deployer::deploy::fsm::RunState;
use nugget_deployer::deploy::gate::GateHandle;
use nugget_deployer::deploy::provision::{ProvisionedRuntime, RuntimeProvisioner};
use nugget_deployer::deploy::strategy::{FlashContext, FlashStrategy};
use nugget_deployer::errors::DeployError;
use nugget_deployer::hardware::{FirmwareImage, FlashResult, HardwareService};
use nugget_deployer::models::manifest::{DeployMethod, DeviceManifest};
use nugget_deployer::models::spec::NuggetSpec;
use nugget_deployer::registry::memory::MemoryRegistry;

/// Ordered record of collaborator calls shared by every fake
#[derive(Debug, Clone, Default)]
pub struct Journal(Arc<Mutex<Vec<String>>>);

impl Journal {
    pub fn push(&self, entry: impl Into<String>) {
        self.0.lock().unwrap().push(entry.into());
    }

    pub fn entries(&self) -> Vec<String> {
        self.0.lock().unwrap().clone()
    }
}

pub fn manifest(value: Value) -> DeviceManifest {
    serde_json::from_value(value).unwrap()
}

/// Manifest for a flash device with the given capabilities
pub fn flash_manifest(id: &str, provides: &[&str], requires: &[&str]) -> DeviceManifest {
    manifest(json!({
        "id": id,
        "name": id,
        "deploy": {
            "method": "flash",
            "provides": provides,
            "requires": requires,
            "flash": { "files": [format!("{}.py", id)] }
        }
    }))
}

pub fn registry(manifests: Vec<DeviceManifest>) -> MemoryRegistry {
    manifests.into_iter().fold(
        MemoryRegistry::new(PathBuf::from("/plugins/_shared")),
        |registry, manifest| {
            let dir = PathBuf::from("/plugins").join(&manifest.id);
            registry.with(manifest, dir)
        },
    )
}

/// Strategy that records what it was asked to flash
pub struct RecordingStrategy {
    pub method: DeployMethod,
    pub journal: Journal,
    pub injections: Arc<Mutex<BTreeMap<String, BTreeMap<String, String>>>>,
    pub fail_for: Option<String>,
}

impl RecordingStrategy {
    pub fn new(method: DeployMethod, journal: Journal) -> Self {
        Self {
            method,
            journal,
            injections: Arc::new(Mutex::new(BTreeMap::new())),
            fail_for: None,
        }
    }
}

#[async_trait]
impl FlashStrategy for RecordingStrategy {
    fn method(&self) -> DeployMethod {
        self.method
    }

    async fn flash(&self, ctx: &FlashContext) -> Result<FlashResult, DeployError> {
        self.journal.push(format!("flash {}", ctx.plugin_id));
        self.injections
            .lock()
            .unwrap()
            .insert(ctx.plugin_id.clone(), ctx.injections.clone());
        ctx.report("Flashing files", 50);
        if self.fail_for.as_deref() == Some(ctx.plugin_id.as_str()) {
            return Err(DeployError::Flash("board not responding".to_string()));
        }
        Ok(FlashResult::ok("flashed"))
    }
}

pub struct FakeProvisioner {
    pub journal: Journal,
    pub fail: bool,
    pub seen: Arc<Mutex<Vec<NuggetSpec>>>,
}

impl FakeProvisioner {
    pub fn new(journal: Journal) -> Self {
        Self {
            journal,
            fail: false,
            seen: Arc::new(Mutex::new(Vec::new())),
        }
    }
}

#[async_trait]
impl RuntimeProvisioner for FakeProvisioner {
    async fn provision(&self, spec: &NuggetSpec) -> Result<ProvisionedRuntime, DeployError> {
        self.journal.push("provision");
        self.seen.lock().unwrap().push(spec.clone());
        if self.fail {
            return Err(DeployError::Provision("runtime unreachable".to_string()));
        }
        Ok(ProvisionedRuntime {
            agent_id: "agent-1".to_string(),
            api_key: SecretString::from("key-1"),
            runtime_url: "http://runtime.local".to_string(),
        })
    }
}

pub struct FakeCloud {
    pub journal: Journal,
    pub url: Option<String>,
}

#[async_trait]
impl CloudDeployer for FakeCloud {
    async fn deploy(
        &self,
        _source_dir: &Path,
        _workspace_dir: &Path,
        project: &str,
        region: &str,
        api_key: Option<&str>,
    ) -> Result<CloudDeployResult, DeployError> {
        self.journal.push(format!("cloud {} {}", project, region));
        match &self.url {
            Some(url) => Ok(CloudDeployResult {
                url: Some(url.clone()),
                api_key: Some(api_key.unwrap_or("cloud-key").to_string()),
            }),
            None => Err(DeployError::Cloud("quota exceeded".to_string())),
        }
    }
}

/// Hardware that accepts every transfer, and every source unless `compile_error` is set
#[derive(Default)]
pub struct FakeHardware {
    pub compiled: Arc<Mutex<Vec<Vec<String>>>>,
    pub compile_error: Option<String>,
    pub flashed: Arc<Mutex<Vec<(PathBuf, Vec<String>)>>>,
    pub resets: Arc<Mutex<usize>>,
    pub images: Arc<Mutex<Vec<FirmwareImage>>>,
}

#[async_trait]
impl HardwareService for FakeHardware {
    async fn compile_sources(&self, _workspace_dir: &Path, files: &[String]) -> Result<(), DeployError> {
        self.compiled.lock().unwrap().push(files.to_vec());
        match &self.compile_error {
            Some(error) => Err(DeployError::Compile(error.clone())),
            None => Ok(()),
        }
    }

    async fn flash_files(&self, workspace_dir: &Path, files: &[String]) -> FlashResult {
        self.flashed
            .lock()
            .unwrap()
            .push((workspace_dir.to_path_buf(), files.to_vec()));
        FlashResult::ok("copied")
    }

    async fn reset_board(&self) -> Result<(), DeployError> {
        *self.resets.lock().unwrap() += 1;
        Ok(())
    }

    async fn flash_image(&self, image: &FirmwareImage) -> FlashResult {
        self.images.lock().unwrap().push(image.clone());
        FlashResult::ok("written")
    }
}

/// Press "ready" every time a device reaches the gate.
///
/// A notification whose latest state is `Gated` always means a new prompt:
/// the previous gate was left through `Release` first.
pub fn auto_confirm(handle: GateHandle, mut state: watch::Receiver<RunState>) {
    tokio::spawn(async move {
        while state.changed().await.is_ok() {
            let gated = matches!(&*state.borrow_and_update(), RunState::Gated { .. });
            if gated {
                let _ = handle.ready();
            }
        }
    });
}
