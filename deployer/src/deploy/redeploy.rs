//! Redeploy classification
//!
//! Compares two specification snapshots and decides how much of a
//! deployment has to be repeated. Device field changes need new firmware;
//! changes elsewhere in the specification only need fresh configuration.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::models::spec::{DeviceSpec, NuggetSpec};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RedeployAction {
    NoChange,
    ConfigOnly,
    FirmwareRequired,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RedeployClassification {
    pub action: RedeployAction,
    pub reasons: Vec<String>,
}

impl RedeployClassification {
    fn new(action: RedeployAction, reasons: Vec<String>) -> Self {
        Self { action, reasons }
    }
}

/// Classify the change between two specifications
pub fn classify(old: &NuggetSpec, new: &NuggetSpec) -> RedeployClassification {
    let device_reasons = device_changes(&old.devices, &new.devices);
    if !device_reasons.is_empty() {
        return RedeployClassification::new(RedeployAction::FirmwareRequired, device_reasons);
    }

    let config_reasons = section_changes(&old.sections, &new.sections);
    if !config_reasons.is_empty() {
        return RedeployClassification::new(RedeployAction::ConfigOnly, config_reasons);
    }

    RedeployClassification::new(RedeployAction::NoChange, Vec::new())
}

/// Devices keyed by plugin id; repeated plugins get a `#n` suffix
fn keyed_devices(devices: &[DeviceSpec]) -> BTreeMap<String, &Map<String, Value>> {
    let mut seen: BTreeMap<&str, usize> = BTreeMap::new();
    let mut keyed = BTreeMap::new();
    for device in devices {
        let count = seen.entry(device.plugin_id.as_str()).or_insert(0);
        *count += 1;
        let key = if *count == 1 {
            device.plugin_id.clone()
        } else {
            format!("{}#{}", device.plugin_id, count)
        };
        keyed.insert(key, &device.fields);
    }
    keyed
}

fn device_changes(old: &[DeviceSpec], new: &[DeviceSpec]) -> Vec<String> {
    let old = keyed_devices(old);
    let new = keyed_devices(new);
    let mut reasons = Vec::new();

    for (key, old_fields) in &old {
        let Some(new_fields) = new.get(key) else {
            reasons.push(format!("Device {} removed", key));
            continue;
        };
        let names: BTreeSet<&String> = old_fields.keys().chain(new_fields.keys()).collect();
        for name in names {
            if old_fields.get(name) != new_fields.get(name) {
                reasons.push(format!("Device {} field {} changed", key, name));
            }
        }
    }
    for key in new.keys().filter(|k| !old.contains_key(*k)) {
        reasons.push(format!("Device {} added", key));
    }

    reasons
}

fn section_changes(old: &Map<String, Value>, new: &Map<String, Value>) -> Vec<String> {
    let mut reasons = Vec::new();
    let names: BTreeSet<&String> = old.keys().chain(new.keys()).collect();
    for name in names {
        diff_value(name, old.get(name), new.get(name), &mut reasons);
    }
    reasons
}

/// Report changed keys one level into each section, e.g. `runtime.greeting`
fn diff_value(path: &str, old: Option<&Value>, new: Option<&Value>, reasons: &mut Vec<String>) {
    match (old, new) {
        (Some(Value::Object(old_map)), Some(Value::Object(new_map))) if !path.contains('.') => {
            let keys: BTreeSet<&String> = old_map.keys().chain(new_map.keys()).collect();
            for key in keys {
                let child = format!("{}.{}", path, key);
                diff_value(&child, old_map.get(key), new_map.get(key), reasons);
            }
        }
        (old, new) if old != new => reasons.push(format!("{} changed", path)),
        _ => {}
    }
}
