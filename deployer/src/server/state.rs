//! Server state

use tokio::sync::watch;
use tracing::debug;

use crate::deploy::fsm::RunState;
use crate::deploy::gate::GateHandle;
use crate::errors::DeployError;

/// Host-side state shared by the HTTP handlers and the console reader
pub struct ServerState {
    pub gate: GateHandle,
    pub run_state: watch::Receiver<RunState>,
}

impl ServerState {
    pub fn new(gate: GateHandle, run_state: watch::Receiver<RunState>) -> Self {
        Self { gate, run_state }
    }

    /// Current run state
    pub fn current_state(&self) -> RunState {
        self.run_state.borrow().clone()
    }

    /// Release the gate, but only while a device is waiting on it
    pub fn release_gate(&self) -> Result<(), DeployError> {
        match self.current_state() {
            RunState::Gated { plugin_id, .. } => {
                debug!("Ready signal for {}", plugin_id);
                self.gate.ready()
            }
            _ => Err(DeployError::GateNotOpen),
        }
    }
}
