//! In-memory manifest registry for hosts that build manifests themselves

use std::collections::HashMap;
use std::path::PathBuf;

use crate::models::manifest::DeviceManifest;
use crate::registry::{FlashFileList, ManifestLookup};

#[derive(Debug, Clone)]
struct Entry {
    manifest: DeviceManifest,
    plugin_dir: PathBuf,
}

/// Manifest registry backed by a map
#[derive(Debug, Clone)]
pub struct MemoryRegistry {
    entries: HashMap<String, Entry>,
    shared_dir: PathBuf,
}

impl MemoryRegistry {
    /// Create an empty registry whose shared library files live in `shared_dir`
    pub fn new(shared_dir: impl Into<PathBuf>) -> Self {
        Self {
            entries: HashMap::new(),
            shared_dir: shared_dir.into(),
        }
    }

    /// Register a manifest under its id
    pub fn insert(&mut self, manifest: DeviceManifest, plugin_dir: impl Into<PathBuf>) {
        self.entries.insert(
            manifest.id.clone(),
            Entry {
                manifest,
                plugin_dir: plugin_dir.into(),
            },
        );
    }

    /// Builder-style insert
    pub fn with(mut self, manifest: DeviceManifest, plugin_dir: impl Into<PathBuf>) -> Self {
        self.insert(manifest, plugin_dir);
        self
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl ManifestLookup for MemoryRegistry {
    fn get_manifest(&self, plugin_id: &str) -> Option<DeviceManifest> {
        self.entries.get(plugin_id).map(|e| e.manifest.clone())
    }

    fn get_flash_file_list(&self, plugin_id: &str) -> Option<FlashFileList> {
        let entry = self.entries.get(plugin_id)?;
        Some(flash_file_list(&entry.manifest, &entry.plugin_dir, &self.shared_dir))
    }

    fn get_plugin_dir(&self, plugin_id: &str) -> Option<PathBuf> {
        self.entries.get(plugin_id).map(|e| e.plugin_dir.clone())
    }
}

/// Resolve a manifest's flash section against its plugin and shared directories
pub(crate) fn flash_file_list(
    manifest: &DeviceManifest,
    plugin_dir: &std::path::Path,
    shared_dir: &std::path::Path,
) -> FlashFileList {
    let Some(flash) = manifest.deploy.flash.as_ref() else {
        return FlashFileList::default();
    };

    FlashFileList {
        entry_files: flash.files.clone(),
        library_files: flash.lib.iter().map(|f| plugin_dir.join("lib").join(f)).collect(),
        shared_files: flash.shared_lib.iter().map(|f| shared_dir.join(f)).collect(),
    }
}
