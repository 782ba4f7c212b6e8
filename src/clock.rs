//! Safety clock set.
//!
//! Three monotonic stamps shared between the ingress, the command processor
//! and the motor arbiter. Each stamp is a single `AtomicU64` holding
//! milliseconds since the clock origin, offset by one so that zero can mean
//! "never stamped". Stamps only move forward (`fetch_max`), so concurrent
//! touches from different cores can never roll a clock back.

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use tokio::time::Instant;

const NEVER: u64 = 0;

fn encode(ms: u64) -> u64 {
    ms.saturating_add(1)
}

fn decode(raw: u64) -> Option<u64> {
    raw.checked_sub(1)
}

#[derive(Debug)]
pub struct SafetyClocks {
    origin: Instant,
    user_activity: AtomicU64,
    heartbeat: AtomicU64,
    last_command: AtomicU64,
    disconnect_requested: AtomicBool,
}

/// Point-in-time copy of the three stamps.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ClockReading {
    pub user_activity_ms: Option<u64>,
    pub heartbeat_ms: Option<u64>,
    pub last_command_ms: Option<u64>,
}

impl ClockReading {
    pub fn user_activity_age(&self, now_ms: u64) -> Option<u64> {
        self.user_activity_ms.map(|t| now_ms.saturating_sub(t))
    }

    pub fn heartbeat_age(&self, now_ms: u64) -> Option<u64> {
        self.heartbeat_ms.map(|t| now_ms.saturating_sub(t))
    }

    pub fn last_command_age(&self, now_ms: u64) -> Option<u64> {
        self.last_command_ms.map(|t| now_ms.saturating_sub(t))
    }
}

impl SafetyClocks {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
            user_activity: AtomicU64::new(NEVER),
            heartbeat: AtomicU64::new(NEVER),
            last_command: AtomicU64::new(NEVER),
            disconnect_requested: AtomicBool::new(false),
        }
    }

    /// Milliseconds since the clock set was created.
    pub fn now_ms(&self) -> u64 {
        self.origin.elapsed().as_millis() as u64
    }

    /// Stamps both user activity and heartbeat.
    pub fn touch_user_activity(&self) {
        self.touch_user_activity_at(self.now_ms());
    }

    pub fn touch_user_activity_at(&self, now_ms: u64) {
        self.user_activity.fetch_max(encode(now_ms), Ordering::AcqRel);
        self.heartbeat.fetch_max(encode(now_ms), Ordering::AcqRel);
    }

    pub fn touch_heartbeat(&self) {
        self.touch_heartbeat_at(self.now_ms());
    }

    pub fn touch_heartbeat_at(&self, now_ms: u64) {
        self.heartbeat.fetch_max(encode(now_ms), Ordering::AcqRel);
    }

    pub fn mark_command_processed(&self) {
        self.mark_command_processed_at(self.now_ms());
    }

    pub fn mark_command_processed_at(&self, now_ms: u64) {
        self.last_command.fetch_max(encode(now_ms), Ordering::AcqRel);
    }

    /// Drops the heartbeat stamp and asks the arbiter to disconnect on its
    /// next cycle.
    pub fn request_disconnect(&self) {
        self.heartbeat.store(NEVER, Ordering::Release);
        self.disconnect_requested.store(true, Ordering::Release);
    }

    /// Consumes a pending disconnect request. Only the arbiter calls this.
    pub fn take_disconnect_request(&self) -> bool {
        self.disconnect_requested.swap(false, Ordering::AcqRel)
    }

    pub fn read(&self) -> ClockReading {
        ClockReading {
            user_activity_ms: decode(self.user_activity.load(Ordering::Acquire)),
            heartbeat_ms: decode(self.heartbeat.load(Ordering::Acquire)),
            last_command_ms: decode(self.last_command.load(Ordering::Acquire)),
        }
    }
}

impl Default for SafetyClocks {
    fn default() -> Self {
        Self::new()
    }
}
