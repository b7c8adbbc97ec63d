//! Settings file management

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::errors::DeployError;
use crate::filesys::file::File;
use crate::logs::LogLevel;

/// Deployer settings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Settings {
    /// Log level
    #[serde(default)]
    pub log_level: LogLevel,

    /// Emit logs as JSON
    #[serde(default)]
    pub json_logs: bool,

    /// Device plugin registry
    #[serde(default)]
    pub registry: RegistrySettings,

    /// Directory holding the agent-generated project sources
    #[serde(default)]
    pub workspace_dir: Option<PathBuf>,

    /// Serial and programmer tools
    #[serde(default)]
    pub hardware: HardwareSettings,

    /// Agent runtime used for provisioning
    #[serde(default)]
    pub runtime: RuntimeSettings,

    /// Cloud deploy target
    #[serde(default)]
    pub cloud: CloudSettings,

    /// Local HTTP surface for the flash gate
    #[serde(default)]
    pub server: ServerSettings,
}

impl Settings {
    /// Read settings from a JSON file
    pub async fn load(file: &File) -> Result<Self, DeployError> {
        file.read_json::<Settings>().await.map_err(|e| {
            DeployError::Config(format!(
                "Unable to read settings file {}: {}",
                file.path().display(),
                e
            ))
        })
    }
}

fn default_true() -> bool {
    true
}

/// Plugin registry settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegistrySettings {
    /// Root directory with one subdirectory per device plugin
    #[serde(default = "default_plugins_dir")]
    pub plugins_dir: PathBuf,
}

fn default_plugins_dir() -> PathBuf {
    PathBuf::from("devices")
}

impl Default for RegistrySettings {
    fn default() -> Self {
        Self {
            plugins_dir: default_plugins_dir(),
        }
    }
}

/// Flashing tool settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HardwareSettings {
    /// Serial port, auto-detected when unset
    #[serde(default)]
    pub serial_port: Option<String>,

    #[serde(default = "default_mpremote_bin")]
    pub mpremote_bin: String,

    #[serde(default = "default_esptool_bin")]
    pub esptool_bin: String,

    /// Interpreter used to syntax-check sources before they are copied
    #[serde(default = "default_python_bin")]
    pub python_bin: String,

    /// Upper bound for any single flashing tool invocation
    #[serde(default = "default_flash_timeout")]
    pub flash_timeout_secs: u64,
}

fn default_mpremote_bin() -> String {
    "mpremote".to_string()
}

fn default_esptool_bin() -> String {
    "esptool.py".to_string()
}

fn default_python_bin() -> String {
    "python3".to_string()
}

fn default_flash_timeout() -> u64 {
    60
}

impl Default for HardwareSettings {
    fn default() -> Self {
        Self {
            serial_port: None,
            mpremote_bin: default_mpremote_bin(),
            esptool_bin: default_esptool_bin(),
            python_bin: default_python_bin(),
            flash_timeout_secs: default_flash_timeout(),
        }
    }
}

/// Agent runtime settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuntimeSettings {
    #[serde(default = "default_true")]
    pub enabled: bool,

    #[serde(default = "default_runtime_url")]
    pub base_url: String,

    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
}

fn default_runtime_url() -> String {
    "http://localhost:8000".to_string()
}

fn default_request_timeout() -> u64 {
    30
}

impl Default for RuntimeSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            base_url: default_runtime_url(),
            request_timeout_secs: default_request_timeout(),
        }
    }
}

/// Cloud deploy settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CloudSettings {
    #[serde(default)]
    pub enabled: bool,

    /// Cloud project id
    #[serde(default)]
    pub project: String,

    #[serde(default = "default_region")]
    pub region: String,

    #[serde(default = "default_gcloud_bin")]
    pub gcloud_bin: String,
}

fn default_region() -> String {
    "us-central1".to_string()
}

fn default_gcloud_bin() -> String {
    "gcloud".to_string()
}

impl Default for CloudSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            project: String::new(),
            region: default_region(),
            gcloud_bin: default_gcloud_bin(),
        }
    }
}

/// Gate server settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerSettings {
    #[serde(default)]
    pub enabled: bool,

    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    8765
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            host: default_host(),
            port: default_port(),
        }
    }
}
