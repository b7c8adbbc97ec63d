//! Device plugin manifest models

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::errors::DeployError;

/// How a device gets deployed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeployMethod {
    /// MicroPython file transfer over the serial REPL
    Flash,
    /// Binary image written with a programmer tool
    Esptool,
    /// Cloud service deploy
    Cloud,
}

impl DeployMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeployMethod::Flash => "flash",
            DeployMethod::Esptool => "esptool",
            DeployMethod::Cloud => "cloud",
        }
    }
}

impl fmt::Display for DeployMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DeployMethod {
    type Err = DeployError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "flash" => Ok(DeployMethod::Flash),
            "esptool" => Ok(DeployMethod::Esptool),
            "cloud" => Ok(DeployMethod::Cloud),
            other => Err(DeployError::UnknownDeployMethod(other.to_string())),
        }
    }
}

/// Static per-plugin descriptor
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceManifest {
    pub id: String,

    pub name: String,

    #[serde(default)]
    pub description: Option<String>,

    pub deploy: DeployDescriptor,

    #[serde(default)]
    pub spec_mapping: Option<SpecMapping>,
}

impl DeviceManifest {
    /// Role shown to the user in flash events
    pub fn role(&self) -> &str {
        self.spec_mapping
            .as_ref()
            .and_then(|m| m.role.as_deref())
            .unwrap_or(&self.id)
    }

    /// Instruction shown while the deployment waits for the device
    pub fn prompt_message(&self) -> String {
        let custom = match self.deploy.method.as_str() {
            "flash" => self.deploy.flash.as_ref().and_then(|f| f.prompt_message.clone()),
            "esptool" => self.deploy.esptool.as_ref().and_then(|e| e.prompt_message.clone()),
            _ => None,
        };
        custom.unwrap_or_else(|| {
            format!("Plug in your {} via USB and press Ready when it's connected.", self.name)
        })
    }
}

/// Deploy section of a manifest
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeployDescriptor {
    /// Deploy method name; validated when the device is deployed
    pub method: String,

    /// Output keys this device's deploy step produces
    #[serde(default)]
    pub provides: Vec<String>,

    /// Output keys this device's deploy step consumes
    #[serde(default)]
    pub requires: Vec<String>,

    #[serde(default)]
    pub runtime_provision: Option<RuntimeProvision>,

    #[serde(default)]
    pub flash: Option<FlashConfig>,

    #[serde(default)]
    pub esptool: Option<EsptoolConfig>,

    #[serde(default)]
    pub cloud: Option<CloudConfig>,
}

impl DeployDescriptor {
    /// Parse the method name
    pub fn deploy_method(&self) -> Result<DeployMethod, DeployError> {
        self.method.parse()
    }

    /// Whether a runtime must be provisioned before any flashing
    pub fn needs_provisioning(&self) -> bool {
        self.runtime_provision
            .as_ref()
            .map(|p| p.required)
            .unwrap_or(false)
    }
}

/// Runtime provisioning requirement
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RuntimeProvision {
    #[serde(default)]
    pub required: bool,

    #[serde(default)]
    pub config_fields: Vec<String>,
}

/// Serial REPL flash configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FlashConfig {
    /// Entry-point files, the first one is booted
    #[serde(default)]
    pub files: Vec<String>,

    /// Library files under the plugin's `lib/` directory
    #[serde(default)]
    pub lib: Vec<String>,

    /// Library files under the registry's shared directory
    #[serde(default)]
    pub shared_lib: Vec<String>,

    #[serde(default)]
    pub prompt_message: Option<String>,
}

/// Programmer tool configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EsptoolConfig {
    /// Image under the plugin's `firmware/` directory
    pub firmware_file: String,

    #[serde(default = "default_chip")]
    pub chip: String,

    #[serde(default = "default_flash_offset")]
    pub flash_offset: String,

    #[serde(default = "default_baud_rate")]
    pub baud_rate: u32,

    /// Where the generated runtime config is written, if the firmware reads one
    #[serde(default)]
    pub config_offset: Option<String>,

    #[serde(default)]
    pub prompt_message: Option<String>,
}

fn default_chip() -> String {
    "esp32s3".to_string()
}

fn default_flash_offset() -> String {
    "0x0".to_string()
}

fn default_baud_rate() -> u32 {
    460_800
}

/// Cloud deploy configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CloudConfig {
    /// Source directory relative to the plugin directory
    #[serde(default)]
    pub source_dir: Option<String>,

    /// Region override
    #[serde(default)]
    pub region: Option<String>,
}

/// How device fields map into the specification
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SpecMapping {
    #[serde(default)]
    pub role: Option<String>,

    /// Dot path in the specification -> device field name
    #[serde(default)]
    pub extract_fields: BTreeMap<String, String>,
}
