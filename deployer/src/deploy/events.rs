//! Event sink used by the orchestrator and flash strategies

use tokio::sync::mpsc;
use tracing::debug;

use crate::models::events::DeployEvent;

/// Create an event sink and the receiver the host reads from
pub fn event_channel() -> (EventSink, mpsc::UnboundedReceiver<DeployEvent>) {
    let (tx, rx) = mpsc::unbounded_channel();
    (EventSink { tx }, rx)
}

/// Sending half of the event stream. Emitting never fails; a host that
/// stopped listening just misses events.
#[derive(Debug, Clone)]
pub struct EventSink {
    tx: mpsc::UnboundedSender<DeployEvent>,
}

impl EventSink {
    pub fn emit(&self, event: DeployEvent) {
        if self.tx.send(event).is_err() {
            debug!("Event receiver dropped");
        }
    }

    pub fn error(&self, message: impl Into<String>, recoverable: bool) {
        self.emit(DeployEvent::Error {
            message: message.into(),
            recoverable,
        });
    }

    pub fn deploy_progress(&self, step: impl Into<String>, progress: u8) {
        self.emit(DeployEvent::DeployProgress {
            step: step.into(),
            progress,
        });
    }

    pub fn flash_progress(&self, device_role: &str, step: impl Into<String>, progress: u8) {
        self.emit(DeployEvent::FlashProgress {
            device_role: device_role.to_string(),
            step: step.into(),
            progress,
        });
    }

    pub fn flash_complete(&self, device_role: &str, success: bool, message: impl Into<String>) {
        self.emit(DeployEvent::FlashComplete {
            device_role: device_role.to_string(),
            success,
            message: message.into(),
        });
    }
}
