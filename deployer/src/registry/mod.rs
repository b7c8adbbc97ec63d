//! Device manifest registry

pub mod memory;
pub mod plugins;

use std::path::PathBuf;

use crate::models::manifest::DeviceManifest;

/// Files a serial REPL flash needs for one plugin
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FlashFileList {
    /// Entry-point file names, relative to the workspace
    pub entry_files: Vec<String>,

    /// Absolute paths of plugin library files
    pub library_files: Vec<PathBuf>,

    /// Absolute paths of shared library files
    pub shared_files: Vec<PathBuf>,
}

/// Read-only manifest lookup consumed by the orchestrator
pub trait ManifestLookup: Send + Sync {
    /// Manifest for a plugin id
    fn get_manifest(&self, plugin_id: &str) -> Option<DeviceManifest>;

    /// Resolved flash file list for a plugin id
    fn get_flash_file_list(&self, plugin_id: &str) -> Option<FlashFileList>;

    /// Plugin directory on disk
    fn get_plugin_dir(&self, plugin_id: &str) -> Option<PathBuf>;
}
