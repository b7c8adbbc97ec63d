//! Flash strategies and their selection by deploy method

use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Map, Value};

use crate::deploy::esptool::EsptoolStrategy;
use crate::deploy::serial::SerialReplStrategy;
use crate::errors::DeployError;
use crate::hardware::{FlashResult, HardwareService};
use crate::models::manifest::{DeployMethod, EsptoolConfig, FlashConfig};
use crate::registry::FlashFileList;

/// Progress callback: step description and percent complete
pub type ProgressFn = Arc<dyn Fn(&str, u8) + Send + Sync>;

/// Everything a strategy needs to flash one device
#[derive(Clone)]
pub struct FlashContext {
    pub plugin_id: String,

    /// Plugin directory holding `templates/`, `lib/` and `firmware/`
    pub plugin_dir: PathBuf,

    /// Directory where files are staged before transfer
    pub workspace_dir: PathBuf,

    /// Device field values from the specification
    pub fields: Map<String, Value>,

    /// Upstream outputs this device requires
    pub injections: BTreeMap<String, String>,

    pub flash_config: Option<FlashConfig>,

    pub esptool_config: Option<EsptoolConfig>,

    pub files: FlashFileList,

    pub progress: ProgressFn,
}

impl FlashContext {
    pub fn report(&self, step: &str, percent: u8) {
        (self.progress)(step, percent);
    }

    /// Field values and injections as one upper-cased substitution table.
    /// Injections win over fields with the same name.
    pub fn substitutions(&self) -> BTreeMap<String, String> {
        let mut table: BTreeMap<String, String> = self
            .fields
            .iter()
            .map(|(k, v)| (k.to_uppercase(), crate::utils::value_to_plain_string(v)))
            .collect();
        for (k, v) in &self.injections {
            table.insert(k.to_uppercase(), v.clone());
        }
        table
    }
}

impl std::fmt::Debug for FlashContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FlashContext")
            .field("plugin_id", &self.plugin_id)
            .field("plugin_dir", &self.plugin_dir)
            .field("workspace_dir", &self.workspace_dir)
            .field("injections", &self.injections.keys().collect::<Vec<_>>())
            .field("files", &self.files)
            .finish_non_exhaustive()
    }
}

/// A way of getting code onto a device
#[async_trait]
pub trait FlashStrategy: Send + Sync {
    /// Method this strategy handles
    fn method(&self) -> DeployMethod;

    /// Flash one device.
    ///
    /// A tool-level failure comes back as an unsuccessful [`FlashResult`];
    /// `Err` is for failures preparing the flash.
    async fn flash(&self, ctx: &FlashContext) -> Result<FlashResult, DeployError>;
}

/// Pick the strategy for a deploy method name
pub fn select_strategy(
    method: &str,
    hardware: Arc<dyn HardwareService>,
) -> Result<Arc<dyn FlashStrategy>, DeployError> {
    StrategyRegistry::new(hardware).select(method)
}

/// Flash strategies keyed by deploy method
#[derive(Clone)]
pub struct StrategyRegistry {
    strategies: HashMap<DeployMethod, Arc<dyn FlashStrategy>>,
}

impl StrategyRegistry {
    /// Registry with the serial REPL and programmer tool strategies
    pub fn new(hardware: Arc<dyn HardwareService>) -> Self {
        let mut registry = Self::empty();
        registry.register(Arc::new(SerialReplStrategy::new(hardware.clone())));
        registry.register(Arc::new(EsptoolStrategy::new(hardware)));
        registry
    }

    pub fn empty() -> Self {
        Self {
            strategies: HashMap::new(),
        }
    }

    /// Add or replace the strategy for its method
    pub fn register(&mut self, strategy: Arc<dyn FlashStrategy>) {
        self.strategies.insert(strategy.method(), strategy);
    }

    pub fn select(&self, method: &str) -> Result<Arc<dyn FlashStrategy>, DeployError> {
        let parsed: DeployMethod = method.parse()?;
        self.strategies
            .get(&parsed)
            .cloned()
            .ok_or_else(|| DeployError::UnknownDeployMethod(method.to_string()))
    }
}
