//! Status signaler.
//!
//! Purely observational: reads the arbiter's published state and renders a
//! coarse display signal as a blink cadence on a [`StatusIndicator`].

use crate::arbiter::{PublishedState, SafetyState};
use crate::controller::PipelineContext;
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tokio::time::{self, MissedTickBehavior};
use tracing::{info, trace};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DisplaySignal {
    Disconnected,
    Locked,
    Active,
    Idle,
}

impl DisplaySignal {
    /// Priority: Disconnected > Locked > Active > Idle.
    pub fn derive(connected: bool, locked: bool, motors_active: bool) -> Self {
        if !connected {
            DisplaySignal::Disconnected
        } else if locked {
            DisplaySignal::Locked
        } else if motors_active {
            DisplaySignal::Active
        } else {
            DisplaySignal::Idle
        }
    }

    pub fn from_state(state: &SafetyState) -> Self {
        Self::derive(state.connected, state.lock_mode, state.motors_active)
    }

    pub fn pattern(self) -> BlinkPattern {
        match self {
            DisplaySignal::Disconnected => BlinkPattern { on_ms: 100, off_ms: 100 },
            DisplaySignal::Locked => BlinkPattern { on_ms: 1000, off_ms: 0 },
            DisplaySignal::Active => BlinkPattern { on_ms: 500, off_ms: 500 },
            DisplaySignal::Idle => BlinkPattern { on_ms: 100, off_ms: 1900 },
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlinkPattern {
    pub on_ms: u64,
    pub off_ms: u64,
}

impl BlinkPattern {
    /// Indicator level `elapsed_ms` into the pattern. No off phase means
    /// solid on.
    pub fn level_at(&self, elapsed_ms: u64) -> bool {
        if self.off_ms == 0 {
            return true;
        }
        elapsed_ms % (self.on_ms + self.off_ms) < self.on_ms
    }
}

pub trait StatusIndicator {
    fn set_level(&mut self, on: bool);
}

/// Indicator for hosts without a status LED.
#[derive(Debug, Default)]
pub struct LogIndicator;

impl StatusIndicator for LogIndicator {
    fn set_level(&mut self, on: bool) {
        trace!(on, "status indicator");
    }
}

#[derive(Debug)]
pub struct StatusSignaler<I: StatusIndicator> {
    indicator: I,
    current: Option<DisplaySignal>,
    pattern_started_ms: u64,
    level: Option<bool>,
}

impl<I: StatusIndicator> StatusSignaler<I> {
    pub fn new(indicator: I) -> Self {
        Self {
            indicator,
            current: None,
            pattern_started_ms: 0,
            level: None,
        }
    }

    /// Re-evaluates the signal and updates the indicator if its level changed.
    pub fn tick(&mut self, now_ms: u64, state: &SafetyState) -> DisplaySignal {
        let signal = DisplaySignal::from_state(state);
        if self.current != Some(signal) {
            info!(?signal, "status signal changed");
            self.current = Some(signal);
            self.pattern_started_ms = now_ms;
        }

        let level = signal
            .pattern()
            .level_at(now_ms.saturating_sub(self.pattern_started_ms));
        if self.level != Some(level) {
            self.indicator.set_level(level);
            self.level = Some(level);
        }

        signal
    }

    pub fn current(&self) -> Option<DisplaySignal> {
        self.current
    }

    pub fn indicator(&self) -> &I {
        &self.indicator
    }

    pub async fn run(mut self, published: watch::Receiver<PublishedState>, context: PipelineContext) {
        let mut interval = time::interval(context.config.status_tick());
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        info!("status signaler started");

        while context.is_running() {
            interval.tick().await;
            // Copy out so the watch borrow is never held across an await.
            let state = published.borrow().state;
            self.tick(context.clocks.now_ms(), &state);
        }

        info!("status signaler stopped");
    }
}
