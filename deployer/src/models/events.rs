//! Events emitted to the host during a deployment run

use serde::{Deserialize, Serialize};

/// Progress and result events, one way, no acknowledgement
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DeployEvent {
    DeployStarted {
        target: String,
    },

    DeployProgress {
        step: String,
        progress: u8,
    },

    DeployComplete {
        target: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        url: Option<String>,
    },

    FlashPrompt {
        device_role: String,
        message: String,
    },

    FlashProgress {
        device_role: String,
        step: String,
        progress: u8,
    },

    FlashComplete {
        device_role: String,
        success: bool,
        message: String,
    },

    Error {
        message: String,
        recoverable: bool,
    },
}
