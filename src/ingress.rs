//! Command ingress boundary.
//!
//! [`CommandIngress`] is the handle the network layer holds. It validates
//! and admits raw commands into the bounded FIFO queue and touches the
//! safety clocks. Cloning is cheap; every clone feeds the same queue.

use crate::clock::SafetyClocks;
use crate::config::SafetyConfig;
use crate::error::AdmissionError;
use crate::protocol::{CommandKind, RawCommand};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::{self, error::SendTimeoutError};
use tracing::{debug, warn};

#[derive(Debug, Clone)]
pub struct CommandIngress {
    raw_tx: mpsc::Sender<RawCommand>,
    clocks: Arc<SafetyClocks>,
    admit_wait: Duration,
    emergency_admit_wait: Duration,
}

impl CommandIngress {
    pub fn new(
        raw_tx: mpsc::Sender<RawCommand>,
        clocks: Arc<SafetyClocks>,
        config: &SafetyConfig,
    ) -> Self {
        Self {
            raw_tx,
            clocks,
            admit_wait: config.admit_wait(),
            emergency_admit_wait: config.emergency_admit_wait(),
        }
    }

    /// Validates and admits a raw command.
    ///
    /// Waits at most the admission budget for queue space; `EmergencyStop`
    /// gets the longer budget but keeps its FIFO position. Any command
    /// reaching this call counts as user activity.
    pub async fn enqueue(&self, kind: CommandKind, speed: u32) -> Result<(), AdmissionError> {
        let command = match RawCommand::new(kind, speed) {
            Ok(command) => command,
            Err(e) => {
                warn!(?kind, speed, "rejecting command: {}", e);
                return Err(e);
            }
        };

        self.clocks.touch_user_activity();

        let wait = if kind == CommandKind::EmergencyStop {
            self.emergency_admit_wait
        } else {
            self.admit_wait
        };

        match self.raw_tx.send_timeout(command, wait).await {
            Ok(()) => {
                debug!(?command, "command admitted");
                Ok(())
            }
            Err(SendTimeoutError::Timeout(_)) => {
                warn!(?kind, "raw command queue full");
                Err(AdmissionError::QueueFull)
            }
            Err(SendTimeoutError::Closed(_)) => Err(AdmissionError::Closed),
        }
    }

    pub fn touch_user_activity(&self) {
        self.clocks.touch_user_activity();
    }

    pub fn touch_heartbeat(&self) {
        self.clocks.touch_heartbeat();
    }

    /// `true` behaves like a heartbeat; `false` requests a disconnect and
    /// forced stop on the arbiter's next cycle.
    pub fn set_connected(&self, connected: bool) {
        if connected {
            self.clocks.touch_heartbeat();
        } else {
            self.clocks.request_disconnect();
        }
    }

    pub fn clocks(&self) -> &Arc<SafetyClocks> {
        &self.clocks
    }
}
