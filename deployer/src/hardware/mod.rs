//! Hardware service interface
//!
//! The orchestrator never talks to a board directly. Flash strategies hand
//! prepared files or images to a [`HardwareService`], which owns the process
//! invocation of the flashing tools.

pub mod process;

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::errors::DeployError;

/// Outcome of one flash attempt
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlashResult {
    pub success: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl FlashResult {
    pub fn ok(message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: Some(message.into()),
        }
    }

    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: Some(message.into()),
        }
    }

    /// Message or a generic fallback
    pub fn message_or_default(&self) -> String {
        match (&self.message, self.success) {
            (Some(m), _) => m.clone(),
            (None, true) => "Flash complete".to_string(),
            (None, false) => "Flash failed".to_string(),
        }
    }
}

/// One region written by the programmer tool
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageSegment {
    /// Flash address, as the tool expects it (e.g. `0x10000`)
    pub offset: String,
    pub path: PathBuf,
}

/// A binary image set for the programmer tool
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FirmwareImage {
    pub chip: String,
    pub baud_rate: u32,
    pub segments: Vec<ImageSegment>,
}

/// A board found on a serial port
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BoardInfo {
    pub port: String,
    pub board_type: String,
}

/// Process-level access to a connected board
#[async_trait]
pub trait HardwareService: Send + Sync {
    /// Syntax-check the Python sources among `files` before they are copied.
    ///
    /// Fails with [`DeployError::Compile`] listing what did not compile.
    async fn compile_sources(&self, workspace_dir: &Path, files: &[String]) -> Result<(), DeployError>;

    /// Copy files from `workspace_dir` onto the board's filesystem
    async fn flash_files(&self, workspace_dir: &Path, files: &[String]) -> FlashResult;

    /// Soft-reset the board so it boots the new files
    async fn reset_board(&self) -> Result<(), DeployError>;

    /// Write a binary image with the programmer tool
    async fn flash_image(&self, image: &FirmwareImage) -> FlashResult;
}
