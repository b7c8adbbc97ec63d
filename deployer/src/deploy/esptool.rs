//! Programmer tool flash strategy
//!
//! Writes a prebuilt firmware image. Device fields and injections go into a
//! `runtime_config.json` staged in the workspace; when the manifest names a
//! config offset that file is written to flash next to the image.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Map, Value};
use tracing::info;

use crate::deploy::strategy::{FlashContext, FlashStrategy};
use crate::errors::DeployError;
use crate::filesys::dir::Dir;
use crate::hardware::{FirmwareImage, FlashResult, HardwareService, ImageSegment};
use crate::models::manifest::DeployMethod;

/// Runtime configuration file read by the firmware on boot
pub const RUNTIME_CONFIG_FILE: &str = "runtime_config.json";

pub struct EsptoolStrategy {
    hardware: Arc<dyn HardwareService>,
}

impl EsptoolStrategy {
    pub fn new(hardware: Arc<dyn HardwareService>) -> Self {
        Self { hardware }
    }
}

/// Field values and injections under lower-case keys
pub fn runtime_config(ctx: &FlashContext) -> Value {
    let mut config = Map::new();
    for (k, v) in &ctx.fields {
        config.insert(k.to_lowercase(), v.clone());
    }
    for (k, v) in &ctx.injections {
        config.insert(k.to_lowercase(), Value::String(v.clone()));
    }
    Value::Object(config)
}

#[async_trait]
impl FlashStrategy for EsptoolStrategy {
    fn method(&self) -> DeployMethod {
        DeployMethod::Esptool
    }

    async fn flash(&self, ctx: &FlashContext) -> Result<FlashResult, DeployError> {
        let config = ctx.esptool_config.as_ref().ok_or_else(|| {
            DeployError::Flash(format!("Device plugin {} has no esptool section", ctx.plugin_id))
        })?;

        ctx.report("Checking firmware", 10);
        let firmware = Dir::new(&ctx.plugin_dir)
            .subdir("firmware")
            .file(&config.firmware_file);
        if !firmware.exists().await {
            return Err(DeployError::Flash(format!(
                "Firmware image not found: {}",
                firmware.path().display()
            )));
        }

        let mut segments = vec![ImageSegment {
            offset: config.flash_offset.clone(),
            path: firmware.path().to_path_buf(),
        }];

        ctx.report("Writing runtime config", 30);
        let workspace = Dir::new(&ctx.workspace_dir);
        let config_file = workspace.file(RUNTIME_CONFIG_FILE);
        config_file.write_json(&runtime_config(ctx)).await?;
        if let Some(offset) = &config.config_offset {
            segments.push(ImageSegment {
                offset: offset.clone(),
                path: config_file.path().to_path_buf(),
            });
        }

        ctx.report("Flashing firmware", 50);
        info!("Flashing {} with {}", ctx.plugin_id, config.firmware_file);
        let image = FirmwareImage {
            chip: config.chip.clone(),
            baud_rate: config.baud_rate,
            segments,
        };
        let result = self.hardware.flash_image(&image).await;

        if result.success {
            ctx.report("Done", 100);
        }
        Ok(result)
    }
}
