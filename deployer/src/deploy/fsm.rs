//! Finite State Machine for one deployment run

use serde::{Deserialize, Serialize};

/// Run state, published to the host
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum RunState {
    /// No run in progress
    Idle,

    /// Looking up manifests and ordering devices
    Resolving,

    /// Provisioning runtimes ahead of any device step
    Provisioning,

    /// Handling the device at `index` in resolved order
    Deploying { index: usize, plugin_id: String },

    /// Waiting for the human to plug in the device
    Gated { index: usize, plugin_id: String },

    /// Flash strategy running
    Flashing { index: usize, plugin_id: String },

    /// Every device handled
    Done,

    /// Run aborted before any device was touched
    Failed { error: String },
}

impl RunState {
    fn device_index(&self) -> Option<usize> {
        match self {
            RunState::Deploying { index, .. }
            | RunState::Gated { index, .. }
            | RunState::Flashing { index, .. } => Some(*index),
            _ => None,
        }
    }
}

/// Run event
#[derive(Debug, Clone)]
pub enum RunEvent {
    /// Start a run
    Resolve,

    /// Order resolved
    Resolved,

    /// Move on to a device
    DeployDevice { index: usize, plugin_id: String },

    /// Flash prompt emitted
    OpenGate,

    /// Ready signal received
    Release,

    /// Loop complete
    Finish,

    /// Fatal run error
    Fail(String),

    /// Back to idle
    Reset,
}

/// Run FSM
#[derive(Debug, Clone)]
pub struct RunFsm {
    state: RunState,
}

impl RunFsm {
    /// Create a new FSM in idle state
    pub fn new() -> Self {
        Self {
            state: RunState::Idle,
        }
    }

    /// Get current state
    pub fn state(&self) -> &RunState {
        &self.state
    }

    /// Get error message if any
    pub fn error(&self) -> Option<&str> {
        match &self.state {
            RunState::Failed { error } => Some(error),
            _ => None,
        }
    }

    /// Process an event and transition state
    pub fn process(&mut self, event: RunEvent) -> Result<(), String> {
        let new_state = match (&self.state, &event) {
            // From Idle
            (RunState::Idle, RunEvent::Resolve) => RunState::Resolving,

            // From Resolving
            (RunState::Resolving, RunEvent::Resolved) => RunState::Provisioning,
            (RunState::Resolving, RunEvent::Fail(err)) => RunState::Failed { error: err.clone() },

            // From Provisioning
            (RunState::Provisioning, RunEvent::DeployDevice { index, plugin_id }) => {
                RunState::Deploying {
                    index: *index,
                    plugin_id: plugin_id.clone(),
                }
            }
            (RunState::Provisioning, RunEvent::Finish) => RunState::Done,

            // Device steps
            (RunState::Deploying { index, plugin_id }, RunEvent::OpenGate) => RunState::Gated {
                index: *index,
                plugin_id: plugin_id.clone(),
            },
            (RunState::Gated { index, plugin_id }, RunEvent::Release) => RunState::Flashing {
                index: *index,
                plugin_id: plugin_id.clone(),
            },
            (state, RunEvent::DeployDevice { index, plugin_id })
                if state.device_index().is_some_and(|current| *index > current) =>
            {
                RunState::Deploying {
                    index: *index,
                    plugin_id: plugin_id.clone(),
                }
            }
            (state, RunEvent::Finish) if state.device_index().is_some() => RunState::Done,

            // From Done / Failed
            (RunState::Done, RunEvent::Reset) | (RunState::Failed { .. }, RunEvent::Reset) => {
                RunState::Idle
            }

            // Invalid transitions
            (state, event) => {
                return Err(format!("Invalid transition: {:?} -> {:?}", state, event));
            }
        };

        self.state = new_state;
        Ok(())
    }

    /// Whether a run is in progress
    pub fn is_active(&self) -> bool {
        !matches!(
            self.state,
            RunState::Idle | RunState::Done | RunState::Failed { .. }
        )
    }
}

impl Default for RunFsm {
    fn default() -> Self {
        Self::new()
    }
}
