//! Record of the last completed deployment
//!
//! Flashed boards keep the values injected at flash time, so a config-only
//! redeploy needs to know what they were.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::deploy::outputs::Outputs;
use crate::errors::DeployError;
use crate::filesys::file::File;

/// Location of the record, relative to the workspace
pub const DEPLOYED_FILE: &str = ".nugget/deployed.json";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeployedState {
    pub project: String,

    /// Outputs injected into the devices of that run
    pub outputs: Outputs,

    pub deployed_at: DateTime<Utc>,
}

/// Read the record, `None` when no deployment has completed yet
pub async fn load_deployed(file: &File) -> Result<Option<DeployedState>, DeployError> {
    if !file.exists().await {
        return Ok(None);
    }
    let state = file.read_json().await.map_err(|e| {
        DeployError::Config(format!(
            "Failed to read {}: {}",
            file.path().display(),
            e
        ))
    })?;
    Ok(Some(state))
}

pub async fn save_deployed(file: &File, state: &DeployedState) -> Result<(), DeployError> {
    file.write_json(state).await
}
