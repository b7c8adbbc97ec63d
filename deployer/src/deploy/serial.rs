//! Serial REPL flash strategy
//!
//! Stages a MicroPython file set in the workspace, syntax-checks it, then
//! copies it over the serial REPL and soft-resets the board. Staging order:
//! shared and plugin library files, entry points (plugin templates stand in
//! for anything the agents did not generate), the generated config module,
//! and a `main.py` boot wrapper that imports the real entry point.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tracing::{debug, info};

use crate::deploy::strategy::{FlashContext, FlashStrategy};
use crate::errors::DeployError;
use crate::filesys::dir::Dir;
use crate::filesys::file::File;
use crate::hardware::{FlashResult, HardwareService};
use crate::models::manifest::DeployMethod;

/// Generated module holding field values and injections
pub const CONFIG_MODULE: &str = "device_config.py";

/// File MicroPython runs on boot
pub const BOOT_FILE: &str = "main.py";

pub struct SerialReplStrategy {
    hardware: Arc<dyn HardwareService>,
}

impl SerialReplStrategy {
    pub fn new(hardware: Arc<dyn HardwareService>) -> Self {
        Self { hardware }
    }

    /// Copy files into the workspace and return the staged file names
    async fn stage(&self, ctx: &FlashContext, workspace: &Dir) -> Result<Vec<String>, DeployError> {
        let mut staged: Vec<String> = Vec::new();

        ctx.report("Copying library files", 10);
        for source in ctx.files.shared_files.iter().chain(&ctx.files.library_files) {
            let source = File::new(source);
            let name = source
                .name()
                .ok_or_else(|| {
                    DeployError::Flash(format!("Invalid library path: {}", source.path().display()))
                })?
                .to_string();
            source.copy_to(&workspace.file(&name)).await?;
            push_unique(&mut staged, name);
        }

        ctx.report("Preparing entry point", 30);
        let Some(entry) = ctx.files.entry_files.first() else {
            return Err(DeployError::Flash(format!(
                "Device plugin {} declares no entry files",
                ctx.plugin_id
            )));
        };

        let substitutions = ctx.substitutions();
        let templates = Dir::new(&ctx.plugin_dir).subdir("templates");
        for name in &ctx.files.entry_files {
            let dest = workspace.file(name);
            if dest.exists().await {
                debug!("Using generated {}", name);
            } else {
                let template = templates.file(name);
                if !template.exists().await {
                    return Err(DeployError::Flash(format!(
                        "{} was not generated and plugin {} has no template for it",
                        name, ctx.plugin_id
                    )));
                }
                info!("Falling back to {} template for {}", ctx.plugin_id, name);
                let rendered = render_template(&template.read_string().await?, &substitutions);
                dest.write_string(&rendered).await?;
            }
            push_unique(&mut staged, name.clone());
        }

        workspace
            .file(CONFIG_MODULE)
            .write_string(&render_config_module(&substitutions, &ctx.fields))
            .await?;
        push_unique(&mut staged, CONFIG_MODULE.to_string());

        if entry != BOOT_FILE {
            workspace
                .file(BOOT_FILE)
                .write_string(&render_boot_wrapper(entry))
                .await?;
            push_unique(&mut staged, BOOT_FILE.to_string());
        }

        Ok(staged)
    }
}

#[async_trait]
impl FlashStrategy for SerialReplStrategy {
    fn method(&self) -> DeployMethod {
        DeployMethod::Flash
    }

    async fn flash(&self, ctx: &FlashContext) -> Result<FlashResult, DeployError> {
        let workspace = Dir::new(&ctx.workspace_dir);
        workspace.create().await?;

        let staged = self.stage(ctx, &workspace).await?;

        ctx.report("Checking sources", 40);
        self.hardware.compile_sources(workspace.path(), &staged).await?;

        ctx.report("Flashing files", 50);
        let result = self.hardware.flash_files(workspace.path(), &staged).await;
        if !result.success {
            return Ok(result);
        }

        ctx.report("Resetting board", 90);
        self.hardware.reset_board().await?;

        ctx.report("Done", 100);
        Ok(result)
    }
}

fn push_unique(files: &mut Vec<String>, name: String) {
    if !files.contains(&name) {
        files.push(name);
    }
}

/// Replace `__KEY__` placeholders with values from `substitutions`.
///
/// One pass over the template: substituted values are never scanned again,
/// and unknown placeholders are left as they are.
pub fn render_template(template: &str, substitutions: &BTreeMap<String, String>) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;
    while let Some(start) = rest.find("__") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        let value = after
            .find("__")
            .and_then(|end| substitutions.get(&after[..end]).map(|v| (v, end)));
        match value {
            Some((value, end)) => {
                out.push_str(value);
                rest = &after[end + 2..];
            }
            None => {
                out.push('_');
                rest = &rest[start + 1..];
            }
        }
    }
    out.push_str(rest);
    out
}

/// Python module assigning every substitution as a module constant.
///
/// Field values keep their JSON type; injections are always strings.
pub fn render_config_module(
    substitutions: &BTreeMap<String, String>,
    fields: &serde_json::Map<String, Value>,
) -> String {
    let typed: BTreeMap<String, &Value> = fields
        .iter()
        .map(|(k, v)| (k.to_uppercase(), v))
        .collect();

    let mut out = String::from("# Generated at deploy time. Do not edit.\n");
    for (key, value) in substitutions {
        let literal = match typed.get(key) {
            Some(field) if crate::utils::value_to_plain_string(field) == *value => {
                python_literal(field)
            }
            _ => python_literal(&Value::String(value.clone())),
        };
        out.push_str(&format!("{} = {}\n", python_identifier(key), literal));
    }
    out
}

fn python_literal(value: &Value) -> String {
    match value {
        Value::Null => "None".to_string(),
        Value::Bool(true) => "True".to_string(),
        Value::Bool(false) => "False".to_string(),
        Value::Number(n) => n.to_string(),
        Value::String(s) => Value::String(s.clone()).to_string(),
        other => Value::String(other.to_string()).to_string(),
    }
}

fn python_identifier(key: &str) -> String {
    let ident: String = key
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect();
    if ident.starts_with(|c: char| c.is_ascii_digit()) {
        format!("_{}", ident)
    } else {
        ident
    }
}

/// Boot file that imports the entry module and prints any startup error
pub fn render_boot_wrapper(entry_file: &str) -> String {
    let module = Path::new(entry_file)
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or(entry_file);
    format!(
        "# Generated boot wrapper\n\
         try:\n    import {module}\n\
         except Exception as e:\n    import sys\n    sys.print_exception(e)\n"
    )
}
