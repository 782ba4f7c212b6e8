//! Actuation interface.
//!
//! The arbiter drives each wheel through [`Actuator::drive_side`]. Real
//! hardware sits behind this trait; [`SimulatedActuator`] models a dual
//! H-bridge (two direction pins and a PWM duty per side) for the simulator
//! binary and the tests.

use crate::protocol::{Side, WheelState};
use heapless::Vec;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::debug;

const MAX_PIN_HISTORY: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DriveDirection {
    Forward,
    Backward,
    Stop,
}

impl From<WheelState> for DriveDirection {
    fn from(state: WheelState) -> Self {
        match state {
            WheelState::Idle => DriveDirection::Stop,
            WheelState::Forward => DriveDirection::Forward,
            WheelState::Backward => DriveDirection::Backward,
        }
    }
}

/// Sets one side's direction and duty cycle.
///
/// Implementations must be idempotent and must never leave both direction
/// pins of a side asserted, not even transiently.
pub trait Actuator {
    fn drive_side(&mut self, side: Side, direction: DriveDirection, duty: u8);

    fn stop_all(&mut self) {
        self.drive_side(Side::Left, DriveDirection::Stop, 0);
        self.drive_side(Side::Right, DriveDirection::Stop, 0);
    }
}

impl<A: Actuator + ?Sized> Actuator for Box<A> {
    fn drive_side(&mut self, side: Side, direction: DriveDirection, duty: u8) {
        (**self).drive_side(side, direction, duty);
    }
}

/// Output state of one H-bridge channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct HBridgeChannel {
    pub forward_pin: bool,
    pub backward_pin: bool,
    pub duty: u8,
}

impl HBridgeChannel {
    pub fn direction(&self) -> DriveDirection {
        match (self.forward_pin, self.backward_pin) {
            (true, false) => DriveDirection::Forward,
            (false, true) => DriveDirection::Backward,
            _ => DriveDirection::Stop,
        }
    }

    pub fn is_shoot_through(&self) -> bool {
        self.forward_pin && self.backward_pin
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PinEvent {
    pub side: Side,
    pub channel: HBridgeChannel,
}

#[derive(Debug, Default)]
struct SimulatedBridge {
    left: HBridgeChannel,
    right: HBridgeChannel,
    pin_writes: u32,
    drive_calls: u32,
    history: Vec<PinEvent, MAX_PIN_HISTORY>,
}

impl SimulatedBridge {
    fn channel_mut(&mut self, side: Side) -> &mut HBridgeChannel {
        match side {
            Side::Left => &mut self.left,
            Side::Right => &mut self.right,
        }
    }

    fn write(&mut self, side: Side, update: impl FnOnce(&mut HBridgeChannel)) {
        let channel = self.channel_mut(side);
        update(channel);
        let event = PinEvent {
            side,
            channel: *channel,
        };
        debug_assert!(!event.channel.is_shoot_through(), "both direction pins asserted on {side:?}");

        self.pin_writes = self.pin_writes.wrapping_add(1);
        if self.history.is_full() {
            self.history.remove(0);
        }
        let _ = self.history.push(event);
    }
}

/// In-memory dual H-bridge. Clones share the same bridge, so a test can keep
/// one handle while the arbiter task owns another.
#[derive(Debug, Clone, Default)]
pub struct SimulatedActuator {
    bridge: Arc<Mutex<SimulatedBridge>>,
}

impl SimulatedActuator {
    pub fn new() -> Self {
        Self::default()
    }

    fn bridge(&self) -> MutexGuard<'_, SimulatedBridge> {
        self.bridge.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn channel(&self, side: Side) -> HBridgeChannel {
        let bridge = self.bridge();
        match side {
            Side::Left => bridge.left,
            Side::Right => bridge.right,
        }
    }

    /// Pin or duty writes that actually changed an output.
    pub fn pin_writes(&self) -> u32 {
        self.bridge().pin_writes
    }

    pub fn drive_calls(&self) -> u32 {
        self.bridge().drive_calls
    }

    pub fn history(&self) -> std::vec::Vec<PinEvent> {
        self.bridge().history.iter().copied().collect()
    }
}

impl Actuator for SimulatedActuator {
    fn drive_side(&mut self, side: Side, direction: DriveDirection, duty: u8) {
        let mut bridge = self.bridge();
        bridge.drive_calls = bridge.drive_calls.wrapping_add(1);

        let (want_forward, want_backward, want_duty) = match direction {
            DriveDirection::Forward => (true, false, duty),
            DriveDirection::Backward => (false, true, duty),
            DriveDirection::Stop => (false, false, 0),
        };

        let current = *bridge.channel_mut(side);

        // Release the opposing pin before asserting the new one.
        if current.forward_pin && !want_forward {
            bridge.write(side, |ch| ch.forward_pin = false);
        }
        if current.backward_pin && !want_backward {
            bridge.write(side, |ch| ch.backward_pin = false);
        }
        if current.duty != want_duty {
            bridge.write(side, |ch| ch.duty = want_duty);
        }
        if want_forward && !current.forward_pin {
            bridge.write(side, |ch| ch.forward_pin = true);
        }
        if want_backward && !current.backward_pin {
            bridge.write(side, |ch| ch.backward_pin = true);
        }

        let after = *bridge.channel_mut(side);
        if after != current {
            debug!(?side, ?direction, duty = want_duty, "wheel output changed");
        }
    }
}
