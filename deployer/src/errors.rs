//! Error types for the nugget deployer

use thiserror::Error;

/// Main error type for the nugget deployer
#[derive(Error, Debug)]
pub enum DeployError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("No manifest found for device plugin: {0}")]
    ManifestNotFound(String),

    #[error("Unknown deploy method: {0}")]
    UnknownDeployMethod(String),

    #[error("Dependency cycle between devices: {}", devices.join(", "))]
    DependencyCycle { devices: Vec<String> },

    #[error("Provisioning error: {0}")]
    Provision(String),

    #[error("Cloud deploy error: {0}")]
    Cloud(String),

    #[error("Flash error: {0}")]
    Flash(String),

    #[error("Compilation failed: {0}")]
    Compile(String),

    #[error("No ESP32 board detected. Connect your board via USB and try again.")]
    NoBoardDetected,

    #[error("Flash gate closed before the device was ready")]
    GateClosed,

    #[error("Flash gate already has a pending ready signal")]
    GateAlreadySignaled,

    #[error("No device is waiting to be connected")]
    GateNotOpen,

    #[error("Process error: {0}")]
    Process(String),

    #[error("Server error: {0}")]
    Server(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<anyhow::Error> for DeployError {
    fn from(err: anyhow::Error) -> Self {
        DeployError::Internal(err.to_string())
    }
}
