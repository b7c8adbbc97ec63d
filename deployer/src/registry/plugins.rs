//! Device plugin registry loaded from disk
//!
//! Layout: `<plugins_dir>/<plugin>/device.json` with optional `templates/`,
//! `lib/` and `firmware/` directories next to it. `<plugins_dir>/_shared/`
//! holds library files any plugin can pull in.

use std::path::{Path, PathBuf};

use tracing::{debug, info, warn};

use crate::errors::DeployError;
use crate::filesys::dir::Dir;
use crate::models::manifest::DeviceManifest;
use crate::registry::memory::MemoryRegistry;
use crate::registry::{FlashFileList, ManifestLookup};

/// Manifest file name inside each plugin directory
pub const MANIFEST_FILE: &str = "device.json";

/// Directory holding shared library files
pub const SHARED_DIR: &str = "_shared";

/// Registry of device plugins found under a plugins directory
#[derive(Debug, Clone)]
pub struct PluginRegistry {
    root: PathBuf,
    inner: MemoryRegistry,
}

impl PluginRegistry {
    /// Scan `plugins_dir` for plugin manifests.
    ///
    /// Directories starting with `_` are not plugins. Manifests that fail to
    /// parse are logged and skipped.
    pub async fn load(plugins_dir: impl AsRef<Path>) -> Result<Self, DeployError> {
        let root = Dir::new(plugins_dir.as_ref());
        if !root.exists().await {
            return Err(DeployError::Config(format!(
                "Plugins directory does not exist: {}",
                root.path().display()
            )));
        }

        let mut inner = MemoryRegistry::new(root.subdir(SHARED_DIR).path());

        for plugin_path in root.list_dirs().await? {
            let plugin_dir = Dir::new(&plugin_path);
            let dir_name = plugin_path
                .file_name()
                .and_then(|n| n.to_str())
                .unwrap_or_default();
            if dir_name.starts_with('_') {
                continue;
            }

            let manifest_file = plugin_dir.file(MANIFEST_FILE);
            if !manifest_file.exists().await {
                debug!("Skipping {}: no {}", plugin_path.display(), MANIFEST_FILE);
                continue;
            }

            match manifest_file.read_json::<DeviceManifest>().await {
                Ok(manifest) => {
                    if manifest.id != dir_name {
                        warn!(
                            "Plugin directory {} declares id {}",
                            dir_name, manifest.id
                        );
                    }
                    debug!("Loaded device plugin: {} ({})", manifest.id, manifest.deploy.method);
                    inner.insert(manifest, plugin_path.clone());
                }
                Err(e) => {
                    warn!("Invalid manifest in {}: {}", plugin_path.display(), e);
                }
            }
        }

        info!("Loaded {} device plugin(s) from {}", inner.len(), root.path().display());

        Ok(Self {
            root: root.path().to_path_buf(),
            inner,
        })
    }

    /// Root plugins directory
    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }
}

impl ManifestLookup for PluginRegistry {
    fn get_manifest(&self, plugin_id: &str) -> Option<DeviceManifest> {
        self.inner.get_manifest(plugin_id)
    }

    fn get_flash_file_list(&self, plugin_id: &str) -> Option<FlashFileList> {
        self.inner.get_flash_file_list(plugin_id)
    }

    fn get_plugin_dir(&self, plugin_id: &str) -> Option<PathBuf> {
        self.inner.get_plugin_dir(plugin_id)
    }
}
