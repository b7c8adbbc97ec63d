//! Runtime provisioning
//!
//! Devices that talk to the agent runtime need an agent registered there
//! before they are flashed. The credentials come back as deployment outputs.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use tracing::{debug, error, info};
use url::Url;

use crate::deploy::outputs::Outputs;
use crate::errors::DeployError;
use crate::models::spec::NuggetSpec;
use crate::storage::settings::RuntimeSettings;

/// Credentials of a provisioned runtime agent
#[derive(Debug, Clone)]
pub struct ProvisionedRuntime {
    pub agent_id: String,
    pub api_key: SecretString,
    pub runtime_url: String,
}

impl ProvisionedRuntime {
    /// Record the credentials under lower- and upper-case keys
    pub fn write_outputs(&self, outputs: &mut Outputs) {
        outputs.insert_both_cases("agent_id", &self.agent_id);
        outputs.insert_both_cases("api_key", self.api_key.expose_secret());
        outputs.insert_both_cases("runtime_url", &self.runtime_url);
    }
}

/// Registers an agent for a specification
#[async_trait]
pub trait RuntimeProvisioner: Send + Sync {
    async fn provision(&self, spec: &NuggetSpec) -> Result<ProvisionedRuntime, DeployError>;
}

#[derive(Deserialize)]
struct ProvisionResponse {
    agent_id: String,
    api_key: String,
    #[serde(default)]
    runtime_url: Option<String>,
}

/// Provisioner talking to the agent runtime over HTTP
pub struct HttpRuntimeProvisioner {
    client: Client,
    base_url: Url,
}

impl HttpRuntimeProvisioner {
    pub fn new(settings: &RuntimeSettings) -> Result<Self, DeployError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(settings.request_timeout_secs))
            .build()?;
        let base_url = Url::parse(&settings.base_url).map_err(|e| {
            DeployError::Config(format!("Invalid runtime URL {}: {}", settings.base_url, e))
        })?;

        Ok(Self { client, base_url })
    }

    fn agents_url(&self) -> Result<Url, DeployError> {
        let base = self.base_url.as_str().trim_end_matches('/');
        Url::parse(&format!("{}/v1/agents", base))
            .map_err(|e| DeployError::Config(format!("Invalid runtime URL: {}", e)))
    }
}

#[async_trait]
impl RuntimeProvisioner for HttpRuntimeProvisioner {
    async fn provision(&self, spec: &NuggetSpec) -> Result<ProvisionedRuntime, DeployError> {
        let url = self.agents_url()?;
        debug!("POST {}", url);

        let response = self.client.post(url).json(spec).send().await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            error!("Runtime provisioning failed: {} - {}", status, body);
            return Err(DeployError::Provision(format!("{}: {}", status, body)));
        }

        let body: ProvisionResponse = response.json().await?;
        info!("Provisioned runtime agent {}", body.agent_id);

        Ok(ProvisionedRuntime {
            agent_id: body.agent_id,
            api_key: SecretString::from(body.api_key),
            runtime_url: body
                .runtime_url
                .unwrap_or_else(|| self.base_url.as_str().trim_end_matches('/').to_string()),
        })
    }
}
