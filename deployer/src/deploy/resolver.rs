//! Deployment order from `provides`/`requires` capabilities
//!
//! Device A must precede device B when B's manifest requires a key that A's
//! manifest provides and B does not provide itself. Among devices with no ordering constraint between them
//! the input order is kept, so the same specification always deploys in the
//! same order.

use tracing::warn;

use crate::errors::DeployError;
use crate::models::manifest::{DeployDescriptor, DeviceManifest};
use crate::models::spec::DeviceSpec;
use crate::registry::ManifestLookup;

/// A device paired with the manifest it was resolved against
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedDevice {
    pub spec: DeviceSpec,
    pub manifest: DeviceManifest,
}

/// Order devices so every provider precedes its consumers.
///
/// Devices without a manifest are dropped. A dependency cycle is an error.
pub fn resolve_order(
    devices: &[DeviceSpec],
    registry: &dyn ManifestLookup,
) -> Result<Vec<DeviceSpec>, DeployError> {
    Ok(resolve_plan(devices, registry)?
        .into_iter()
        .map(|d| d.spec)
        .collect())
}

/// Same as [`resolve_order`] but keeps each device's manifest
pub fn resolve_plan(
    devices: &[DeviceSpec],
    registry: &dyn ManifestLookup,
) -> Result<Vec<ResolvedDevice>, DeployError> {
    let resolved: Vec<ResolvedDevice> = devices
        .iter()
        .filter_map(|spec| match registry.get_manifest(&spec.plugin_id) {
            Some(manifest) => Some(ResolvedDevice {
                spec: spec.clone(),
                manifest,
            }),
            None => {
                warn!("No manifest for device plugin {}, leaving it out of the order", spec.plugin_id);
                None
            }
        })
        .collect();

    let descriptors: Vec<&DeployDescriptor> = resolved.iter().map(|d| &d.manifest.deploy).collect();
    let order = stable_topological_order(&descriptors).map_err(|stuck| {
        DeployError::DependencyCycle {
            devices: stuck
                .iter()
                .map(|&i| resolved[i].spec.plugin_id.clone())
                .collect(),
        }
    })?;

    let mut slots: Vec<Option<ResolvedDevice>> = resolved.into_iter().map(Some).collect();
    Ok(order
        .into_iter()
        .filter_map(|i| slots[i].take())
        .collect())
}

/// Kahn's algorithm that always emits the lowest-index ready node.
///
/// Returns the indices left unplaced when a cycle blocks progress.
fn stable_topological_order(descriptors: &[&DeployDescriptor]) -> Result<Vec<usize>, Vec<usize>> {
    let n = descriptors.len();
    let mut successors: Vec<Vec<usize>> = vec![Vec::new(); n];
    let mut in_degree = vec![0usize; n];

    for (provider, provider_desc) in descriptors.iter().enumerate() {
        for (consumer, consumer_desc) in descriptors.iter().enumerate() {
            if provider == consumer {
                continue;
            }
            // A key the consumer provides itself never orders it after another device
            let depends = consumer_desc
                .requires
                .iter()
                .filter(|key| !consumer_desc.provides.contains(key))
                .any(|key| provider_desc.provides.contains(key));
            if depends {
                successors[provider].push(consumer);
                in_degree[consumer] += 1;
            }
        }
    }

    let mut placed = vec![false; n];
    let mut order = Vec::with_capacity(n);

    while order.len() < n {
        let next = (0..n).find(|&i| !placed[i] && in_degree[i] == 0);
        let Some(next) = next else {
            return Err((0..n).filter(|&i| !placed[i]).collect());
        };

        placed[next] = true;
        order.push(next);
        for &succ in &successors[next] {
            in_degree[succ] -= 1;
        }
    }

    Ok(order)
}
