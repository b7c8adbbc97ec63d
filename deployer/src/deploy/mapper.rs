//! Copy device fields into the nugget specification

use tracing::debug;

use crate::models::spec::NuggetSpec;
use crate::registry::ManifestLookup;

/// Produce a specification with every device's mapped fields copied into
/// their nested paths, e.g. `WIFI_SSID` into `runtime.wifi_ssid`.
///
/// Fields the device does not set are left alone. When two devices map the
/// same path, the later device in declaration order wins.
pub fn apply_device_fields(spec: &NuggetSpec, registry: &dyn ManifestLookup) -> NuggetSpec {
    let mut mapped = spec.clone();

    for device in &spec.devices {
        let Some(manifest) = registry.get_manifest(&device.plugin_id) else {
            continue;
        };
        let Some(mapping) = manifest.spec_mapping.as_ref() else {
            continue;
        };

        for (path, field) in &mapping.extract_fields {
            if let Some(value) = device.fields.get(field) {
                debug!("Mapping {}.{} to {}", device.plugin_id, field, path);
                mapped.set_path(path, value.clone());
            }
        }
    }

    mapped
}
