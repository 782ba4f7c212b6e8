//! Command processor.
//!
//! Folds each admitted [`RawCommand`] into a persistent left/right wheel pair
//! and lock flag, then hands the resolved [`ProcessedCommand`] to the motor
//! arbiter. The processed queue carries "latest intent": when it is full the
//! new command is dropped rather than waiting for the arbiter to catch up,
//! and the latest target is re-offered on later idle polls until accepted.

use crate::arbiter::PublishedState;
use crate::controller::PipelineContext;
use crate::protocol::{CommandKind, ProcessedCommand, RawCommand, WheelState};
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, watch};
use tokio::time;
use tracing::{debug, info};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ProcessorStats {
    pub folded: u32,
    pub forwarded: u32,
    pub dropped: u32,
    pub redelivered: u32,
    pub resyncs: u32,
}

#[derive(Debug, Default)]
pub struct CommandProcessor {
    left: WheelState,
    right: WheelState,
    lock_mode: bool,
    speed: u8,
    seen_forced_stops: u32,
    /// Set when the latest target could not be handed off.
    undelivered: bool,
    stats: ProcessorStats,
}

impl CommandProcessor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Applies one raw command to the wheel pair and returns the resulting
    /// target actuation.
    pub fn fold(&mut self, command: RawCommand) -> ProcessedCommand {
        match command.kind {
            CommandKind::MoveLeftForward => self.left = WheelState::Forward,
            CommandKind::MoveLeftBackward => self.left = WheelState::Backward,
            CommandKind::StopLeft => self.left = WheelState::Idle,
            CommandKind::MoveRightForward => self.right = WheelState::Forward,
            CommandKind::MoveRightBackward => self.right = WheelState::Backward,
            CommandKind::StopRight => self.right = WheelState::Idle,
            CommandKind::EmergencyStop => {
                self.left = WheelState::Idle;
                self.right = WheelState::Idle;
                self.lock_mode = false;
            }
            CommandKind::LockOn => self.lock_mode = true,
            // Releasing the lock always returns both wheels to neutral.
            CommandKind::LockOff => {
                self.left = WheelState::Idle;
                self.right = WheelState::Idle;
                self.lock_mode = false;
            }
        }

        // Non-motion commands keep the last commanded speed so a single-side
        // stop never changes the other side's duty.
        if command.kind.is_motion() {
            self.speed = command.speed;
        }

        self.stats.folded = self.stats.folded.saturating_add(1);
        self.snapshot()
    }

    /// Resets to neutral when the arbiter has forced a stop since the last
    /// call. Returns whether a reset happened.
    pub fn resync(&mut self, forced_stops: u32) -> bool {
        if forced_stops == self.seen_forced_stops {
            return false;
        }

        self.seen_forced_stops = forced_stops;
        self.left = WheelState::Idle;
        self.right = WheelState::Idle;
        self.lock_mode = false;
        self.stats.resyncs = self.stats.resyncs.saturating_add(1);
        true
    }

    /// Non-blocking hand-off. A full queue drops `command` and marks the
    /// current target as undelivered until [`redeliver`](Self::redeliver)
    /// or a later hand-off succeeds.
    pub fn forward(
        &mut self,
        command: ProcessedCommand,
        processed_tx: &mpsc::Sender<ProcessedCommand>,
    ) -> bool {
        match processed_tx.try_send(command) {
            Ok(()) => {
                self.stats.forwarded = self.stats.forwarded.saturating_add(1);
                self.undelivered = false;
                true
            }
            Err(_) => {
                self.stats.dropped = self.stats.dropped.saturating_add(1);
                self.undelivered = true;
                debug!(?command, "processed queue full, dropping command");
                false
            }
        }
    }

    /// Re-offers the current target after a dropped hand-off. Never waits.
    /// Returns whether a target was delivered.
    pub fn redeliver(&mut self, processed_tx: &mpsc::Sender<ProcessedCommand>) -> bool {
        if !self.undelivered {
            return false;
        }

        let command = self.snapshot();
        if processed_tx.try_send(command).is_err() {
            return false;
        }

        self.undelivered = false;
        self.stats.redelivered = self.stats.redelivered.saturating_add(1);
        debug!(?command, "redelivered latest target");
        true
    }

    pub fn is_undelivered(&self) -> bool {
        self.undelivered
    }

    pub fn snapshot(&self) -> ProcessedCommand {
        ProcessedCommand {
            left: self.left,
            right: self.right,
            speed: self.speed,
            lock_mode: self.lock_mode,
            forced_stops: self.seen_forced_stops,
        }
    }

    pub fn left(&self) -> WheelState {
        self.left
    }

    pub fn right(&self) -> WheelState {
        self.right
    }

    pub fn lock_mode(&self) -> bool {
        self.lock_mode
    }

    pub fn stats(&self) -> &ProcessorStats {
        &self.stats
    }

    pub async fn run(
        mut self,
        mut raw_rx: mpsc::Receiver<RawCommand>,
        processed_tx: mpsc::Sender<ProcessedCommand>,
        published: watch::Receiver<PublishedState>,
        context: PipelineContext,
    ) -> ProcessorStats {
        let poll = context.config.command_poll();
        info!("command processor started");

        while context.is_running() {
            match time::timeout(poll, raw_rx.recv()).await {
                Ok(Some(raw)) => {
                    let forced_stops = published.borrow().state.forced_stops;
                    if self.resync(forced_stops) {
                        debug!(forced_stops, "processor resynced after forced stop");
                    }

                    let processed = self.fold(raw);
                    context.clocks.mark_command_processed();
                    debug!(?raw, ?processed, "folded command");
                    self.forward(processed, &processed_tx);
                }
                Ok(None) => break,
                Err(_) => {
                    if self.is_undelivered() {
                        let forced_stops = published.borrow().state.forced_stops;
                        self.resync(forced_stops);
                        self.redeliver(&processed_tx);
                    }
                }
            }

            tokio::task::yield_now().await;
        }

        info!(stats = ?self.stats, "command processor stopped");
        self.stats
    }
}
