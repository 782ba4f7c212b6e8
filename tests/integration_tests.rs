use std::time::Duration;
use teledrive::*;
use teledrive::actuation::HBridgeChannel;
use teledrive::protocol::{CommandKind, Side, WheelState};
use tokio::time::sleep;

fn start() -> (Controller, SimulatedActuator, CommandIngress) {
    let actuator = SimulatedActuator::new();
    let controller = Controller::start(SafetyConfig::default(), actuator.clone(), LogIndicator)
        .expect("default config is valid");
    let ingress = controller.ingress();
    (controller, actuator, ingress)
}

/// Lets the processor and arbiter pick up whatever is queued.
async fn settle() {
    sleep(Duration::from_millis(50)).await;
}

/// Heartbeats without user input for `total_ms`.
async fn heartbeats_only(ingress: &CommandIngress, total_ms: u64) {
    let mut elapsed = 0;
    while elapsed < total_ms {
        sleep(Duration::from_millis(250)).await;
        ingress.touch_heartbeat();
        elapsed += 250;
    }
}

fn is_zeroed(channel: HBridgeChannel) -> bool {
    !channel.forward_pin && !channel.backward_pin && channel.duty == 0
}

#[tokio::test(start_paused = true)]
async fn test_controller_starts_disconnected() {
    let (controller, actuator, _ingress) = start();

    let snapshot = controller.snapshot();
    assert!(!snapshot.connected);
    assert!(!snapshot.locked);
    assert!(!snapshot.motors_active);
    assert_eq!(snapshot.left_wheel, WheelState::Idle);
    assert_eq!(snapshot.right_wheel, WheelState::Idle);
    assert_eq!(snapshot.display_signal(), DisplaySignal::Disconnected);
    assert!(is_zeroed(actuator.channel(Side::Left)));
    assert!(is_zeroed(actuator.channel(Side::Right)));

    controller.shutdown().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_command_drives_wheel() {
    let (controller, actuator, ingress) = start();

    ingress.touch_heartbeat();
    ingress.enqueue(CommandKind::MoveLeftForward, 200).await.unwrap();
    settle().await;

    let snapshot = controller.snapshot();
    assert!(snapshot.connected);
    assert!(snapshot.motors_active);
    assert_eq!(snapshot.left_wheel, WheelState::Forward);
    assert_eq!(snapshot.right_wheel, WheelState::Idle);
    assert_eq!(snapshot.display_signal(), DisplaySignal::Active);

    let left = actuator.channel(Side::Left);
    assert_eq!(left.direction(), DriveDirection::Forward);
    assert_eq!(left.duty, 200);
    assert!(is_zeroed(actuator.channel(Side::Right)));

    controller.shutdown().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_idle_operator_stops_motors_but_stays_connected() {
    let (controller, actuator, ingress) = start();

    ingress.touch_heartbeat();
    ingress.enqueue(CommandKind::MoveRightBackward, 120).await.unwrap();
    settle().await;
    assert_eq!(controller.snapshot().right_wheel, WheelState::Backward);

    heartbeats_only(&ingress, 2500).await;

    let snapshot = controller.snapshot();
    assert!(snapshot.connected);
    assert!(!snapshot.motors_active);
    assert_eq!(snapshot.right_wheel, WheelState::Idle);
    assert_eq!(snapshot.stats.idle_stops, 1);
    assert_eq!(snapshot.stats.link_loss_stops, 0);
    assert!(is_zeroed(actuator.channel(Side::Right)));

    controller.shutdown().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_idle_stopped_wheel_stays_stopped_after_next_command() {
    let (controller, actuator, ingress) = start();

    ingress.touch_heartbeat();
    ingress.enqueue(CommandKind::MoveLeftForward, 150).await.unwrap();
    settle().await;
    assert_eq!(controller.snapshot().left_wheel, WheelState::Forward);

    let idle_window = controller.config().auto_stop_timeout_ms + 500;
    heartbeats_only(&ingress, idle_window).await;
    let snapshot = controller.snapshot();
    assert_eq!(snapshot.left_wheel, WheelState::Idle);
    assert_eq!(snapshot.forced_stops, 1);

    ingress.enqueue(CommandKind::MoveRightForward, 150).await.unwrap();
    settle().await;

    let snapshot = controller.snapshot();
    assert!(snapshot.connected);
    assert_eq!(snapshot.left_wheel, WheelState::Idle);
    assert_eq!(snapshot.right_wheel, WheelState::Forward);
    assert!(is_zeroed(actuator.channel(Side::Left)));
    assert_eq!(actuator.channel(Side::Right).duty, 150);

    let report = controller.shutdown().await.unwrap();
    assert_eq!(report.processor.resyncs, 1);
}

#[tokio::test(start_paused = true)]
async fn test_lock_survives_idle_but_not_link_loss() {
    let (controller, actuator, ingress) = start();

    ingress.touch_heartbeat();
    ingress.enqueue(CommandKind::LockOn, 0).await.unwrap();
    ingress.enqueue(CommandKind::MoveLeftForward, 100).await.unwrap();
    settle().await;

    heartbeats_only(&ingress, 2500).await;

    let snapshot = controller.snapshot();
    assert!(snapshot.locked);
    assert_eq!(snapshot.left_wheel, WheelState::Forward);
    assert_eq!(snapshot.display_signal(), DisplaySignal::Locked);
    assert_eq!(actuator.channel(Side::Left).duty, 100);

    // Link goes silent.
    sleep(Duration::from_millis(3500)).await;

    let snapshot = controller.snapshot();
    assert!(!snapshot.connected);
    assert!(!snapshot.locked);
    assert!(!snapshot.motors_active);
    assert_eq!(snapshot.left_wheel, WheelState::Idle);
    assert_eq!(snapshot.stats.link_loss_stops, 1);
    assert_eq!(snapshot.stats.idle_stops, 0);
    assert!(is_zeroed(actuator.channel(Side::Left)));

    controller.shutdown().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_explicit_disconnect_resets_pipeline() {
    let (controller, actuator, ingress) = start();

    ingress.touch_heartbeat();
    ingress.enqueue(CommandKind::MoveLeftForward, 100).await.unwrap();
    settle().await;
    assert_eq!(controller.snapshot().left_wheel, WheelState::Forward);

    ingress.set_connected(false);
    settle().await;

    let snapshot = controller.snapshot();
    assert!(!snapshot.connected);
    assert_eq!(snapshot.left_wheel, WheelState::Idle);
    assert_eq!(snapshot.stats.explicit_disconnects, 1);

    // A new session must not resurrect the pre-disconnect left wheel.
    ingress.touch_heartbeat();
    ingress.enqueue(CommandKind::MoveRightForward, 100).await.unwrap();
    settle().await;

    let snapshot = controller.snapshot();
    assert!(snapshot.connected);
    assert_eq!(snapshot.left_wheel, WheelState::Idle);
    assert_eq!(snapshot.right_wheel, WheelState::Forward);
    assert!(is_zeroed(actuator.channel(Side::Left)));

    controller.shutdown().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_emergency_stop_ends_batch_neutral() {
    let (controller, actuator, ingress) = start();

    ingress.touch_heartbeat();
    ingress.enqueue(CommandKind::LockOn, 0).await.unwrap();
    ingress.enqueue(CommandKind::MoveLeftForward, 255).await.unwrap();
    ingress.enqueue(CommandKind::MoveRightBackward, 255).await.unwrap();
    ingress.enqueue(CommandKind::EmergencyStop, 0).await.unwrap();
    settle().await;

    let snapshot = controller.snapshot();
    assert!(snapshot.connected);
    assert!(!snapshot.locked);
    assert!(!snapshot.motors_active);
    assert_eq!(snapshot.left_wheel, WheelState::Idle);
    assert_eq!(snapshot.right_wheel, WheelState::Idle);
    assert!(is_zeroed(actuator.channel(Side::Left)));
    assert!(is_zeroed(actuator.channel(Side::Right)));
    assert!(actuator.history().iter().all(|event| !event.channel.is_shoot_through()));

    controller.shutdown().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_zeroes_outputs() {
    let (controller, actuator, ingress) = start();

    ingress.touch_heartbeat();
    ingress.enqueue(CommandKind::MoveLeftBackward, 90).await.unwrap();
    ingress.enqueue(CommandKind::MoveRightForward, 90).await.unwrap();
    settle().await;
    assert!(controller.snapshot().motors_active);

    let report = controller.shutdown().await.unwrap();

    assert_eq!(report.processor.folded, 2);
    assert!(report.arbiter.commands_applied >= 1);
    assert_eq!(report.arbiter.connects, 1);
    assert!(is_zeroed(actuator.channel(Side::Left)));
    assert!(is_zeroed(actuator.channel(Side::Right)));

    let result = ingress.enqueue(CommandKind::StopLeft, 0).await;
    assert_eq!(result, Err(AdmissionError::Closed));
}

#[tokio::test(start_paused = true)]
async fn test_subscribers_observe_published_state() {
    let (controller, _actuator, ingress) = start();
    let mut published = controller.subscribe();

    ingress.touch_heartbeat();
    ingress.enqueue(CommandKind::MoveRightForward, 40).await.unwrap();
    settle().await;

    published.changed().await.unwrap();
    let state = published.borrow().state;
    assert!(state.connected);
    assert_eq!(state.right, WheelState::Forward);
    assert_eq!(state.speed, 40);
    assert!(state.is_consistent());

    controller.shutdown().await.unwrap();
}

#[test]
fn test_invalid_config_is_rejected() {
    let config = SafetyConfig {
        auto_stop_timeout_ms: 5000,
        ..SafetyConfig::default()
    };

    let result = Controller::start(config, SimulatedActuator::new(), LogIndicator);

    assert!(matches!(result, Err(ControllerError::Config(_))));
}
