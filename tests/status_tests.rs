use std::collections::HashSet;
use teledrive::arbiter::SafetyState;
use teledrive::protocol::WheelState;
use teledrive::status::{BlinkPattern, DisplaySignal, StatusIndicator, StatusSignaler};

#[derive(Debug, Default)]
struct RecordingIndicator {
    levels: Vec<bool>,
}

impl StatusIndicator for RecordingIndicator {
    fn set_level(&mut self, on: bool) {
        self.levels.push(on);
    }
}

fn state(connected: bool, lock_mode: bool, left: WheelState) -> SafetyState {
    SafetyState {
        connected,
        lock_mode,
        motors_active: left.is_moving(),
        left,
        right: WheelState::Idle,
        speed: 100,
        forced_stops: 0,
    }
}

#[test]
fn test_signal_priority_order() {
    assert_eq!(DisplaySignal::derive(false, true, true), DisplaySignal::Disconnected);
    assert_eq!(DisplaySignal::derive(false, false, false), DisplaySignal::Disconnected);
    assert_eq!(DisplaySignal::derive(true, true, true), DisplaySignal::Locked);
    assert_eq!(DisplaySignal::derive(true, true, false), DisplaySignal::Locked);
    assert_eq!(DisplaySignal::derive(true, false, true), DisplaySignal::Active);
    assert_eq!(DisplaySignal::derive(true, false, false), DisplaySignal::Idle);
}

#[test]
fn test_each_signal_has_distinct_pattern() {
    let signals = [
        DisplaySignal::Disconnected,
        DisplaySignal::Locked,
        DisplaySignal::Active,
        DisplaySignal::Idle,
    ];
    let patterns: HashSet<(u64, u64)> = signals
        .iter()
        .map(|s| {
            let p = s.pattern();
            (p.on_ms, p.off_ms)
        })
        .collect();
    assert_eq!(patterns.len(), signals.len());
}

#[test]
fn test_blink_pattern_levels() {
    let blink = BlinkPattern { on_ms: 100, off_ms: 300 };
    assert!(blink.level_at(0));
    assert!(blink.level_at(99));
    assert!(!blink.level_at(100));
    assert!(!blink.level_at(399));
    assert!(blink.level_at(400));

    let solid = BlinkPattern { on_ms: 1000, off_ms: 0 };
    assert!((0..5000).step_by(250).all(|t| solid.level_at(t)));
}

#[test]
fn test_signaler_follows_state() {
    let mut signaler = StatusSignaler::new(RecordingIndicator::default());
    assert_eq!(signaler.current(), None);

    assert_eq!(signaler.tick(0, &SafetyState::default()), DisplaySignal::Disconnected);
    assert_eq!(signaler.tick(10, &state(true, false, WheelState::Idle)), DisplaySignal::Idle);
    assert_eq!(signaler.tick(20, &state(true, false, WheelState::Forward)), DisplaySignal::Active);
    assert_eq!(signaler.tick(30, &state(true, true, WheelState::Forward)), DisplaySignal::Locked);
    assert_eq!(signaler.current(), Some(DisplaySignal::Locked));
}

#[test]
fn test_signaler_blinks_disconnected_pattern() {
    let mut signaler = StatusSignaler::new(RecordingIndicator::default());
    let disconnected = SafetyState::default();

    for now in (0..400).step_by(50) {
        signaler.tick(now, &disconnected);
    }

    // 100 ms on / 100 ms off, only level changes reach the indicator.
    assert_eq!(signaler.indicator().levels, vec![true, false, true, false]);
}

#[test]
fn test_signaler_restarts_pattern_on_change() {
    let mut signaler = StatusSignaler::new(RecordingIndicator::default());

    signaler.tick(0, &SafetyState::default());
    signaler.tick(150, &SafetyState::default());
    // Locked is solid on from the moment it is entered.
    signaler.tick(160, &state(true, true, WheelState::Idle));
    signaler.tick(900, &state(true, true, WheelState::Idle));

    assert_eq!(signaler.indicator().levels, vec![true, false, true]);
}
