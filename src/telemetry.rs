use crate::arbiter::{ArbiterStats, SafetyState};
use crate::clock::ClockReading;
use crate::error::ProtocolError;
use crate::protocol::WheelState;
use crate::status::DisplaySignal;
use serde::{Deserialize, Serialize};

pub const MAX_TELEMETRY_SIZE: usize = 1024;

/// Read-only view of the controller for status rendering and logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SafetySnapshot {
    pub connected: bool,
    pub locked: bool,
    pub motors_active: bool,
    pub left_wheel: WheelState,
    pub right_wheel: WheelState,
    pub speed: u8,
    pub age_of_user_activity_ms: Option<u64>,
    pub age_of_heartbeat_ms: Option<u64>,
    pub age_of_last_command_ms: Option<u64>,
    pub forced_stops: u32,
    pub stats: ArbiterStats,
}

impl SafetySnapshot {
    pub fn capture(
        state: &SafetyState,
        stats: &ArbiterStats,
        clocks: &ClockReading,
        now_ms: u64,
    ) -> Self {
        Self {
            connected: state.connected,
            locked: state.lock_mode,
            motors_active: state.motors_active,
            left_wheel: state.left,
            right_wheel: state.right,
            speed: state.speed,
            age_of_user_activity_ms: clocks.user_activity_age(now_ms),
            age_of_heartbeat_ms: clocks.heartbeat_age(now_ms),
            age_of_last_command_ms: clocks.last_command_age(now_ms),
            forced_stops: state.forced_stops,
            stats: *stats,
        }
    }

    pub fn display_signal(&self) -> DisplaySignal {
        DisplaySignal::derive(self.connected, self.locked, self.motors_active)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelemetryFrame {
    pub sequence_number: u32,
    pub uptime_ms: u64,
    pub signal: DisplaySignal,
    pub snapshot: SafetySnapshot,
}

/// Stamps snapshots with a sequence number for the periodic broadcast.
#[derive(Debug, Default)]
pub struct TelemetryCollector {
    sequence_counter: u32,
}

impl TelemetryCollector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn collect(&mut self, snapshot: SafetySnapshot, uptime_ms: u64) -> TelemetryFrame {
        self.sequence_counter = self.sequence_counter.wrapping_add(1);
        TelemetryFrame {
            sequence_number: self.sequence_counter,
            uptime_ms,
            signal: snapshot.display_signal(),
            snapshot,
        }
    }

    pub fn serialize(frame: &TelemetryFrame) -> Result<String, ProtocolError> {
        let json_str = serde_json::to_string(frame).map_err(|_| ProtocolError::SerializationError)?;
        if json_str.len() > MAX_TELEMETRY_SIZE {
            return Err(ProtocolError::MessageTooLarge);
        }
        Ok(json_str)
    }
}
