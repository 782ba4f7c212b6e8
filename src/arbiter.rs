//! Motor arbiter.
//!
//! The arbiter is the only owner of [`SafetyState`]. Every cycle it runs,
//! strictly in this order:
//!
//! 1. link intake: explicit disconnect requests and reconnection on a fresh
//!    heartbeat,
//! 2. the heartbeat check, which forces a disconnect and overrides lock mode,
//! 3. the activity check, which stops the wheels of an idle, unlocked
//!    operator,
//! 4. application of at most one processed command.
//!
//! Other components only ever see the state through the [`PublishedState`]
//! copy sent on a `watch` channel after each cycle.

use crate::actuation::{Actuator, DriveDirection};
use crate::clock::{ClockReading, SafetyClocks};
use crate::config::SafetyConfig;
use crate::controller::PipelineContext;
use crate::protocol::{ProcessedCommand, Side, WheelState};
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, watch};
use tokio::time;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct SafetyState {
    pub connected: bool,
    pub lock_mode: bool,
    pub motors_active: bool,
    pub left: WheelState,
    pub right: WheelState,
    pub speed: u8,
    /// Incremented on every forced stop; the processor resyncs on change.
    pub forced_stops: u32,
}

impl SafetyState {
    pub fn wheel(&self, side: Side) -> WheelState {
        match side {
            Side::Left => self.left,
            Side::Right => self.right,
        }
    }

    /// Cross-field invariants that hold after every arbiter step.
    pub fn is_consistent(&self) -> bool {
        let active_matches = self.motors_active == (self.left.is_moving() || self.right.is_moving());
        let disconnected_is_safe = self.connected
            || (!self.lock_mode && self.left == WheelState::Idle && self.right == WheelState::Idle);
        active_matches && disconnected_is_safe
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ArbiterStats {
    pub cycles: u64,
    pub connects: u32,
    pub commands_applied: u32,
    pub commands_discarded: u32,
    pub link_loss_stops: u32,
    pub explicit_disconnects: u32,
    pub idle_stops: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct PublishedState {
    pub state: SafetyState,
    pub stats: ArbiterStats,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StopReason {
    LinkLost,
    ExplicitDisconnect,
    UserIdle,
}

/// What a single arbiter cycle did.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ArbiterActions {
    pub connected: bool,
    pub forced_stop: Option<StopReason>,
    pub command_applied: bool,
    pub command_discarded: bool,
}

impl ArbiterActions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn has_actions(&self) -> bool {
        self.connected || self.forced_stop.is_some() || self.command_applied || self.command_discarded
    }
}

#[derive(Debug)]
pub struct MotorArbiter<A: Actuator> {
    state: SafetyState,
    stats: ArbiterStats,
    actuator: A,
    auto_stop_timeout_ms: u64,
    heartbeat_timeout_ms: u64,
}

impl<A: Actuator> MotorArbiter<A> {
    /// Creates the arbiter disconnected, unlocked and idle, and zeroes both
    /// outputs so the actuator starts from a known state.
    pub fn new(mut actuator: A, config: &SafetyConfig) -> Self {
        actuator.stop_all();
        Self {
            state: SafetyState::default(),
            stats: ArbiterStats::default(),
            actuator,
            auto_stop_timeout_ms: config.auto_stop_timeout_ms,
            heartbeat_timeout_ms: config.heartbeat_timeout_ms,
        }
    }

    /// One full cycle with an already dequeued command.
    pub fn step(
        &mut self,
        now_ms: u64,
        clocks: &SafetyClocks,
        command: Option<ProcessedCommand>,
    ) -> ArbiterActions {
        let mut actions = self.enforce(now_ms, clocks);
        if let Some(command) = command {
            self.apply_command(now_ms, clocks, command, &mut actions);
        }
        actions
    }

    /// Link intake plus both timeout checks.
    pub fn enforce(&mut self, now_ms: u64, clocks: &SafetyClocks) -> ArbiterActions {
        let mut actions = ArbiterActions::new();
        self.stats.cycles = self.stats.cycles.wrapping_add(1);

        if clocks.take_disconnect_request() && self.state.connected {
            info!("client requested disconnect");
            self.disconnect(StopReason::ExplicitDisconnect, &mut actions);
        }

        let reading = clocks.read();
        self.admit_link(now_ms, &reading, &mut actions);
        self.check_heartbeat(now_ms, &reading, &mut actions);
        self.check_activity(now_ms, &reading, &mut actions);

        debug_assert!(self.state.is_consistent(), "inconsistent state {:?}", self.state);
        actions
    }

    /// Drives both sides to the command's target. Discarded while
    /// disconnected or when built before the latest forced stop.
    pub fn apply_command(
        &mut self,
        now_ms: u64,
        clocks: &SafetyClocks,
        command: ProcessedCommand,
        actions: &mut ArbiterActions,
    ) {
        // The command may have been admitted after this cycle's intake ran.
        self.admit_link(now_ms, &clocks.read(), actions);

        if !self.state.connected {
            self.stats.commands_discarded = self.stats.commands_discarded.saturating_add(1);
            actions.command_discarded = true;
            debug!(?command, "discarding command while disconnected");
            return;
        }

        // Built before the latest forced stop; it may still carry the
        // stopped wheels.
        if command.forced_stops != self.state.forced_stops {
            self.stats.commands_discarded = self.stats.commands_discarded.saturating_add(1);
            actions.command_discarded = true;
            debug!(
                ?command,
                forced_stops = self.state.forced_stops,
                "discarding target built before forced stop"
            );
            return;
        }

        self.state.lock_mode = command.lock_mode;
        self.state.speed = command.speed;
        for side in [Side::Left, Side::Right] {
            self.drive(side, command.wheel(side), command.speed);
        }
        self.refresh_motors_active();

        self.stats.commands_applied = self.stats.commands_applied.saturating_add(1);
        actions.command_applied = true;
        debug!(?command, motors_active = self.state.motors_active, "applied command");

        debug_assert!(self.state.is_consistent(), "inconsistent state {:?}", self.state);
    }

    /// Zeroes every output and drops to the startup state.
    pub fn halt(&mut self) {
        self.state.connected = false;
        self.state.lock_mode = false;
        self.state.left = WheelState::Idle;
        self.state.right = WheelState::Idle;
        self.state.motors_active = false;
        self.actuator.stop_all();
    }

    fn admit_link(&mut self, now_ms: u64, reading: &ClockReading, actions: &mut ArbiterActions) {
        if self.state.connected {
            return;
        }

        let fresh = reading
            .heartbeat_age(now_ms)
            .is_some_and(|age| age <= self.heartbeat_timeout_ms);
        if fresh {
            self.state.connected = true;
            self.stats.connects = self.stats.connects.saturating_add(1);
            actions.connected = true;
            info!("client connected");
        }
    }

    fn check_heartbeat(&mut self, now_ms: u64, reading: &ClockReading, actions: &mut ArbiterActions) {
        if !self.state.connected {
            return;
        }

        let lapsed = reading
            .heartbeat_age(now_ms)
            .is_none_or(|age| age > self.heartbeat_timeout_ms);
        if lapsed {
            warn!(
                heartbeat_age_ms = ?reading.heartbeat_age(now_ms),
                locked = self.state.lock_mode,
                "heartbeat lost, forcing stop"
            );
            self.disconnect(StopReason::LinkLost, actions);
        }
    }

    fn check_activity(&mut self, now_ms: u64, reading: &ClockReading, actions: &mut ArbiterActions) {
        // Lock mode suppresses the idle stop, never the heartbeat check.
        if !self.state.connected || self.state.lock_mode || !self.state.motors_active {
            return;
        }

        let idle = reading
            .user_activity_age(now_ms)
            .is_none_or(|age| age > self.auto_stop_timeout_ms);
        if idle {
            warn!(
                activity_age_ms = ?reading.user_activity_age(now_ms),
                "operator idle, stopping motors"
            );
            self.force_stop(StopReason::UserIdle, actions);
        }
    }

    fn disconnect(&mut self, reason: StopReason, actions: &mut ArbiterActions) {
        self.state.connected = false;
        self.state.lock_mode = false;
        self.force_stop(reason, actions);
    }

    fn force_stop(&mut self, reason: StopReason, actions: &mut ArbiterActions) {
        self.state.left = WheelState::Idle;
        self.state.right = WheelState::Idle;
        self.state.motors_active = false;
        self.actuator.stop_all();

        self.state.forced_stops = self.state.forced_stops.wrapping_add(1);
        match reason {
            StopReason::LinkLost => self.stats.link_loss_stops = self.stats.link_loss_stops.saturating_add(1),
            StopReason::ExplicitDisconnect => {
                self.stats.explicit_disconnects = self.stats.explicit_disconnects.saturating_add(1);
            }
            StopReason::UserIdle => self.stats.idle_stops = self.stats.idle_stops.saturating_add(1),
        }
        actions.forced_stop = Some(reason);
    }

    fn drive(&mut self, side: Side, wheel: WheelState, speed: u8) {
        match side {
            Side::Left => self.state.left = wheel,
            Side::Right => self.state.right = wheel,
        }
        let duty = if wheel.is_moving() { speed } else { 0 };
        self.actuator.drive_side(side, DriveDirection::from(wheel), duty);
    }

    fn refresh_motors_active(&mut self) {
        self.state.motors_active = self.state.left.is_moving() || self.state.right.is_moving();
    }

    pub fn state(&self) -> &SafetyState {
        &self.state
    }

    pub fn stats(&self) -> &ArbiterStats {
        &self.stats
    }

    pub fn published(&self) -> PublishedState {
        PublishedState {
            state: self.state,
            stats: self.stats,
        }
    }

    pub fn actuator(&self) -> &A {
        &self.actuator
    }

    pub async fn run(
        mut self,
        mut processed_rx: mpsc::Receiver<ProcessedCommand>,
        published_tx: watch::Sender<PublishedState>,
        context: PipelineContext,
    ) -> ArbiterStats {
        let poll = context.config.command_poll();
        let clocks = &context.clocks;
        info!("motor arbiter started");

        while context.is_running() {
            let mut actions = self.enforce(clocks.now_ms(), clocks);
            if actions.forced_stop.is_some() {
                // The processor must see the new stop count before it folds
                // anything else.
                published_tx.send_replace(self.published());
            }

            match time::timeout(poll, processed_rx.recv()).await {
                Ok(Some(command)) => {
                    self.apply_command(clocks.now_ms(), clocks, command, &mut actions);
                }
                Ok(None) => break,
                Err(_) => {}
            }

            if actions.has_actions() {
                debug!(?actions, "arbiter cycle");
            }
            published_tx.send_replace(self.published());
            tokio::task::yield_now().await;
        }

        self.halt();
        published_tx.send_replace(self.published());
        info!(stats = ?self.stats, "motor arbiter stopped, outputs zeroed");
        self.stats
    }
}
