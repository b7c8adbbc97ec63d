//! Output propagation between deploy steps

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Values produced by deploy steps, keyed by `provides` name.
///
/// Append-only for the length of one run: keys can be overwritten by a later
/// producer but are never removed.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Outputs {
    values: BTreeMap<String, String>,
}

/// Values selected for one device, plus the required keys that were absent
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Injections {
    pub values: BTreeMap<String, String>,
    pub missing: Vec<String>,
}

impl Outputs {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.values.insert(key.into(), value.into());
    }

    /// Write both the lower-case and upper-case form of `key`, so `requires`
    /// lists in either convention resolve
    pub fn insert_both_cases(&mut self, key: &str, value: &str) {
        self.insert(key.to_lowercase(), value);
        self.insert(key.to_uppercase(), value);
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.values.get(key).map(|v| v.as_str())
    }

    pub fn contains(&self, key: &str) -> bool {
        self.values.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.values.keys().map(|k| k.as_str())
    }

    /// Collect every `requires` key present in the map
    pub fn injections_for(&self, requires: &[String]) -> Injections {
        let mut injections = Injections::default();
        for key in requires {
            match self.values.get(key) {
                Some(value) => {
                    injections.values.insert(key.clone(), value.clone());
                }
                None => injections.missing.push(key.clone()),
            }
        }
        injections
    }
}
