//! Human confirmation gate
//!
//! A capacity-1 channel: the host holds [`GateHandle`]s and sends one
//! "ready" signal per prompt, the orchestrator owns the single
//! [`FlashGate`] receiver.

use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tracing::debug;

use crate::errors::DeployError;

/// Create a connected gate handle and gate
pub fn flash_gate() -> (GateHandle, FlashGate) {
    let (tx, rx) = mpsc::channel(1);
    (GateHandle { tx }, FlashGate { rx })
}

/// Host side of the gate
#[derive(Debug, Clone)]
pub struct GateHandle {
    tx: mpsc::Sender<()>,
}

impl GateHandle {
    /// Signal that the device is plugged in and ready
    pub fn ready(&self) -> Result<(), DeployError> {
        match self.tx.try_send(()) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(())) => Err(DeployError::GateAlreadySignaled),
            Err(TrySendError::Closed(())) => Err(DeployError::GateClosed),
        }
    }
}

/// Orchestrator side of the gate
#[derive(Debug)]
pub struct FlashGate {
    rx: mpsc::Receiver<()>,
}

impl FlashGate {
    /// Discard signals sent while no prompt was outstanding
    pub fn arm(&mut self) {
        while self.rx.try_recv().is_ok() {
            debug!("Discarding stale ready signal");
        }
    }

    /// Wait for the next ready signal
    pub async fn wait(&mut self) -> Result<(), DeployError> {
        self.rx.recv().await.ok_or(DeployError::GateClosed)
    }
}
