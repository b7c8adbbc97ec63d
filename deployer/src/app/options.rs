//! Application configuration options

use std::path::PathBuf;
use std::time::Duration;

use crate::deploy::orchestrator::{DeployConfig, RunOptions};
use crate::filesys::dir::Dir;
use crate::filesys::file::File;
use crate::storage::deployed::DEPLOYED_FILE;
use crate::storage::settings::{CloudSettings, HardwareSettings, RuntimeSettings, Settings};

/// Main application options
#[derive(Debug, Clone)]
pub struct AppOptions {
    /// Device plugin root
    pub plugins_dir: PathBuf,

    /// Agent-generated sources and flash staging
    pub workspace_dir: PathBuf,

    /// Serial and programmer tools
    pub hardware: HardwareSettings,

    /// Provision runtimes through the agent runtime API
    pub enable_provisioner: bool,

    pub runtime: RuntimeSettings,

    /// Deploy cloud devices with gcloud
    pub enable_cloud: bool,

    pub cloud: CloudSettings,

    /// Accept ready signals over HTTP
    pub enable_server: bool,

    pub server: ServerOptions,

    /// Accept ready signals as lines on stdin
    pub enable_stdin_gate: bool,

    pub run: RunOptions,

    /// Maximum delay for graceful shutdown
    pub max_shutdown_delay: Duration,
}

impl Default for AppOptions {
    fn default() -> Self {
        Self::from_settings(&Settings::default())
    }
}

impl AppOptions {
    /// Options from a settings file; the workspace defaults to the current directory
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            plugins_dir: settings.registry.plugins_dir.clone(),
            workspace_dir: settings
                .workspace_dir
                .clone()
                .unwrap_or_else(|| PathBuf::from(".")),
            hardware: settings.hardware.clone(),
            enable_provisioner: settings.runtime.enabled,
            runtime: settings.runtime.clone(),
            enable_cloud: settings.cloud.enabled,
            cloud: settings.cloud.clone(),
            enable_server: settings.server.enabled,
            server: ServerOptions {
                host: settings.server.host.clone(),
                port: settings.server.port,
            },
            enable_stdin_gate: true,
            run: RunOptions::default(),
            max_shutdown_delay: Duration::from_secs(5),
        }
    }

    /// Record of the last completed deployment in this workspace
    pub fn deployed_file(&self) -> File {
        Dir::new(&self.workspace_dir).file(DEPLOYED_FILE)
    }

    pub fn deploy_config(&self) -> DeployConfig {
        DeployConfig {
            workspace_dir: self.workspace_dir.clone(),
            cloud_region: self.cloud.region.clone(),
        }
    }
}

/// Local HTTP server options
#[derive(Debug, Clone)]
pub struct ServerOptions {
    /// Host to bind to
    pub host: String,

    /// Port to listen on
    pub port: u16,
}

impl Default for ServerOptions {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8765,
        }
    }
}
