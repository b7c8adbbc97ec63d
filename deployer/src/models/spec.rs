//! Nugget specification models

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// One device instance chosen by the user in the editor
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DeviceSpec {
    /// Device plugin id, used to look up the manifest
    #[serde(rename = "pluginId", alias = "plugin_id")]
    pub plugin_id: String,

    /// User-supplied field values (network credentials, channels, ...)
    #[serde(default)]
    pub fields: Map<String, Value>,
}

impl DeviceSpec {
    pub fn new(plugin_id: impl Into<String>) -> Self {
        Self {
            plugin_id: plugin_id.into(),
            fields: Map::new(),
        }
    }

    /// Builder-style field setter
    pub fn with_field(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.fields.insert(name.into(), value.into());
        self
    }
}

/// A nugget specification as produced by the editor.
///
/// Only `devices` is typed. Every other top-level section (`project`,
/// `runtime`, `display`, `deployment`, `portals`, ...) is kept as raw JSON
/// so that unknown sections survive a round trip.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NuggetSpec {
    #[serde(default)]
    pub devices: Vec<DeviceSpec>,

    #[serde(flatten)]
    pub sections: Map<String, Value>,
}

impl NuggetSpec {
    /// Get a non-device section by name
    pub fn section(&self, name: &str) -> Option<&Value> {
        self.sections.get(name)
    }

    /// Project name, falling back to "nugget"
    pub fn project_name(&self) -> String {
        self.sections
            .get("project")
            .and_then(|p| p.get("name").or_else(|| p.get("goal")))
            .and_then(|v| v.as_str())
            .map(|s| s.to_string())
            .unwrap_or_else(|| "nugget".to_string())
    }

    /// Read a value at a dot path such as `runtime.wifi_ssid`
    pub fn get_path(&self, path: &str) -> Option<&Value> {
        let mut parts = path.split('.');
        let mut current = self.sections.get(parts.next()?)?;
        for part in parts {
            current = current.get(part)?;
        }
        Some(current)
    }

    /// Write a value at a dot path, creating intermediate objects.
    ///
    /// A non-object value in the way is replaced by an object.
    pub fn set_path(&mut self, path: &str, value: Value) {
        let parts: Vec<&str> = path.split('.').filter(|p| !p.is_empty()).collect();
        let Some((last, parents)) = parts.split_last() else {
            return;
        };

        let mut current = &mut self.sections;
        for part in parents {
            let entry = current
                .entry(part.to_string())
                .or_insert_with(|| Value::Object(Map::new()));
            if !entry.is_object() {
                *entry = Value::Object(Map::new());
            }
            current = match entry {
                Value::Object(map) => map,
                _ => return,
            };
        }
        current.insert(last.to_string(), value);
    }
}
