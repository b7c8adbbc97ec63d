//! Cloud deploy client

use std::path::Path;
use std::process::Stdio;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::{debug, info};

use crate::deploy::outputs::Outputs;
use crate::errors::DeployError;
use crate::filesys::dir::Dir;
use crate::storage::settings::CloudSettings;
use crate::utils::generate_uuid;

/// What a cloud deploy produced
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CloudDeployResult {
    pub url: Option<String>,
    pub api_key: Option<String>,
}

impl CloudDeployResult {
    /// Map the result onto a manifest's `provides` keys.
    ///
    /// Keys naming a URL get the service URL, keys naming a key or token get
    /// the API key. Keys matching neither, or whose value is absent, are
    /// skipped.
    pub fn to_provided(&self, provides: &[String]) -> Vec<(String, String)> {
        provides
            .iter()
            .filter_map(|key| {
                let value = if is_url_key(key) {
                    self.url.clone()
                } else if is_secret_key(key) {
                    self.api_key.clone()
                } else {
                    None
                };
                value.map(|v| (key.clone(), v))
            })
            .collect()
    }
}

fn is_url_key(key: &str) -> bool {
    key.to_lowercase().contains("url")
}

fn is_secret_key(key: &str) -> bool {
    let lower = key.to_lowercase();
    !lower.contains("url") && (lower.contains("key") || lower.contains("token"))
}

/// API key an earlier deploy already handed out under one of `provides`
pub fn existing_api_key(provides: &[String], outputs: &Outputs) -> Option<String> {
    provides
        .iter()
        .filter(|key| is_secret_key(key))
        .find_map(|key| outputs.get(key))
        .map(|key| key.to_string())
}

/// Deploys a cloud-side service for a device plugin
#[async_trait]
pub trait CloudDeployer: Send + Sync {
    /// Deploy the service. With `api_key` set the service keeps that key,
    /// otherwise a new one is issued.
    async fn deploy(
        &self,
        source_dir: &Path,
        workspace_dir: &Path,
        project: &str,
        region: &str,
        api_key: Option<&str>,
    ) -> Result<CloudDeployResult, DeployError>;
}

/// Cloud Run deploys through the `gcloud` command line tool
pub struct GcloudDeployer {
    gcloud_bin: String,
    cloud_project: String,
}

impl GcloudDeployer {
    pub fn new(settings: &CloudSettings) -> Self {
        Self {
            gcloud_bin: settings.gcloud_bin.clone(),
            cloud_project: settings.project.clone(),
        }
    }
}

/// Cloud Run service names: lower-case letters, digits and dashes, at most 63 chars
pub fn service_name(project: &str) -> String {
    let mut name: String = project
        .to_lowercase()
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '-' })
        .collect();
    while name.contains("--") {
        name = name.replace("--", "-");
    }
    let name = name.trim_matches('-');
    let name = if name.is_empty() { "nugget" } else { name };
    let name = if name.starts_with(|c: char| c.is_ascii_digit()) {
        format!("n-{}", name)
    } else {
        name.to_string()
    };
    name.chars().take(63).collect::<String>().trim_end_matches('-').to_string()
}

/// Find the `Service URL:` line in the tool output
pub fn parse_service_url(output: &str) -> Option<String> {
    output.lines().find_map(|line| {
        line.trim()
            .strip_prefix("Service URL:")
            .map(|url| url.trim().to_string())
            .filter(|url| !url.is_empty())
    })
}

#[async_trait]
impl CloudDeployer for GcloudDeployer {
    async fn deploy(
        &self,
        source_dir: &Path,
        workspace_dir: &Path,
        project: &str,
        region: &str,
        api_key: Option<&str>,
    ) -> Result<CloudDeployResult, DeployError> {
        if self.cloud_project.is_empty() {
            return Err(DeployError::Config("cloud.project is not set".to_string()));
        }
        if !Dir::new(source_dir).exists().await {
            return Err(DeployError::Cloud(format!(
                "Source directory does not exist: {}",
                source_dir.display()
            )));
        }

        let service = service_name(project);
        let api_key = match api_key {
            Some(key) => key.to_string(),
            None => generate_uuid(),
        };
        info!("Deploying {} to Cloud Run in {}", service, region);

        let output = Command::new(&self.gcloud_bin)
            .current_dir(workspace_dir)
            .args(["run", "deploy", &service, "--source"])
            .arg(source_dir)
            .args(["--project", &self.cloud_project, "--region", region])
            .args(["--allow-unauthenticated", "--quiet"])
            .arg(format!("--set-env-vars=API_KEY={}", api_key))
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(|e| DeployError::Cloud(format!("Failed to run {}: {}", self.gcloud_bin, e)))?;

        let stdout = String::from_utf8_lossy(&output.stdout);
        let stderr = String::from_utf8_lossy(&output.stderr);
        if !output.status.success() {
            return Err(DeployError::Cloud(format!("Cloud deploy failed: {}", stderr.trim())));
        }

        // gcloud prints the service URL on stderr
        let url = parse_service_url(&stderr).or_else(|| parse_service_url(&stdout));
        debug!("Cloud deploy finished, url: {:?}", url);

        Ok(CloudDeployResult {
            url,
            api_key: Some(api_key),
        })
    }
}
