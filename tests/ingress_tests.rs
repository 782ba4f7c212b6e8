use std::sync::Arc;
use std::time::Duration;
use teledrive::clock::SafetyClocks;
use teledrive::config::SafetyConfig;
use teledrive::protocol::{CommandKind, RawCommand};
use teledrive::{AdmissionError, CommandIngress};
use tokio::sync::mpsc;

fn ingress_with_capacity(capacity: usize) -> (CommandIngress, mpsc::Receiver<RawCommand>) {
    let (tx, rx) = mpsc::channel(capacity);
    let ingress = CommandIngress::new(tx, Arc::new(SafetyClocks::new()), &SafetyConfig::default());
    (ingress, rx)
}

#[test]
fn test_raw_command_speed_validation() {
    assert!(RawCommand::new(CommandKind::MoveLeftForward, 1).is_ok());
    assert!(RawCommand::new(CommandKind::MoveRightBackward, 255).is_ok());

    assert_eq!(
        RawCommand::new(CommandKind::MoveLeftForward, 0),
        Err(AdmissionError::InvalidSpeed { kind: CommandKind::MoveLeftForward, speed: 0 })
    );
    assert_eq!(
        RawCommand::new(CommandKind::MoveRightForward, 256),
        Err(AdmissionError::InvalidSpeed { kind: CommandKind::MoveRightForward, speed: 256 })
    );
    assert!(RawCommand::new(CommandKind::StopLeft, 300).is_err());
}

#[test]
fn test_non_motion_speed_is_normalized() {
    let cmd = RawCommand::new(CommandKind::LockOn, 42).unwrap();
    assert_eq!(cmd.speed, 0);

    let cmd = RawCommand::new(CommandKind::EmergencyStop, 0).unwrap();
    assert_eq!(cmd.speed, 0);
}

#[tokio::test(start_paused = true)]
async fn test_invalid_speed_never_reaches_queue() {
    let (ingress, mut rx) = ingress_with_capacity(4);

    let result = ingress.enqueue(CommandKind::MoveLeftForward, 1000).await;

    assert!(matches!(result, Err(AdmissionError::InvalidSpeed { .. })));
    assert!(rx.try_recv().is_err());
    assert_eq!(ingress.clocks().read().user_activity_ms, None);
}

#[tokio::test(start_paused = true)]
async fn test_queue_full_reports_back_pressure() {
    let (ingress, mut rx) = ingress_with_capacity(2);

    ingress.enqueue(CommandKind::MoveLeftForward, 10).await.unwrap();
    ingress.enqueue(CommandKind::MoveRightForward, 20).await.unwrap();

    let started = tokio::time::Instant::now();
    let result = ingress.enqueue(CommandKind::StopLeft, 0).await;
    let waited = started.elapsed();

    assert_eq!(result, Err(AdmissionError::QueueFull));
    assert!(waited >= Duration::from_millis(SafetyConfig::default().admit_wait_ms));

    // Nothing beyond capacity was accepted.
    assert_eq!(rx.try_recv().unwrap().kind, CommandKind::MoveLeftForward);
    assert_eq!(rx.try_recv().unwrap().kind, CommandKind::MoveRightForward);
    assert!(rx.try_recv().is_err());
}

#[tokio::test(start_paused = true)]
async fn test_emergency_stop_waits_longer_for_admission() {
    let (ingress, _rx) = ingress_with_capacity(1);
    let config = SafetyConfig::default();
    ingress.enqueue(CommandKind::MoveLeftForward, 10).await.unwrap();

    let started = tokio::time::Instant::now();
    let result = ingress.enqueue(CommandKind::EmergencyStop, 0).await;

    assert_eq!(result, Err(AdmissionError::QueueFull));
    assert!(started.elapsed() >= Duration::from_millis(config.emergency_admit_wait_ms));
}

#[tokio::test(start_paused = true)]
async fn test_emergency_stop_admitted_when_space_frees_up() {
    let (ingress, mut rx) = ingress_with_capacity(1);
    ingress.enqueue(CommandKind::MoveLeftForward, 10).await.unwrap();

    let consumer = tokio::spawn(async move {
        // Drain after the normal budget but inside the emergency budget.
        tokio::time::sleep(Duration::from_millis(100)).await;
        let first = rx.recv().await.map(|c| c.kind);
        let second = rx.recv().await.map(|c| c.kind);
        (first, second)
    });

    ingress.enqueue(CommandKind::EmergencyStop, 0).await.unwrap();

    let (first, second) = consumer.await.unwrap();
    assert_eq!(first, Some(CommandKind::MoveLeftForward));
    assert_eq!(second, Some(CommandKind::EmergencyStop));
}

#[tokio::test(start_paused = true)]
async fn test_queue_preserves_fifo_order() {
    let (ingress, mut rx) = ingress_with_capacity(8);
    let kinds = [
        CommandKind::LockOn,
        CommandKind::MoveLeftForward,
        CommandKind::MoveRightBackward,
        CommandKind::EmergencyStop,
        CommandKind::StopRight,
    ];

    for kind in kinds {
        let speed = if kind.is_motion() { 50 } else { 0 };
        ingress.enqueue(kind, speed).await.unwrap();
    }

    for kind in kinds {
        assert_eq!(rx.recv().await.map(|c| c.kind), Some(kind));
    }
}

#[tokio::test(start_paused = true)]
async fn test_enqueue_counts_as_user_activity() {
    let (ingress, _rx) = ingress_with_capacity(4);
    tokio::time::advance(Duration::from_millis(250)).await;

    ingress.enqueue(CommandKind::MoveLeftBackward, 30).await.unwrap();

    let reading = ingress.clocks().read();
    assert_eq!(reading.user_activity_ms, Some(250));
    assert_eq!(reading.heartbeat_ms, Some(250));
}

#[tokio::test(start_paused = true)]
async fn test_clock_touches() {
    let (ingress, _rx) = ingress_with_capacity(1);

    tokio::time::advance(Duration::from_millis(100)).await;
    ingress.touch_heartbeat();
    let reading = ingress.clocks().read();
    assert_eq!(reading.heartbeat_ms, Some(100));
    assert_eq!(reading.user_activity_ms, None);

    tokio::time::advance(Duration::from_millis(100)).await;
    ingress.touch_user_activity();
    let reading = ingress.clocks().read();
    assert_eq!(reading.heartbeat_ms, Some(200));
    assert_eq!(reading.user_activity_ms, Some(200));

    ingress.set_connected(false);
    assert_eq!(ingress.clocks().read().heartbeat_ms, None);
    assert!(ingress.clocks().take_disconnect_request());

    ingress.set_connected(true);
    assert_eq!(ingress.clocks().read().heartbeat_ms, Some(200));
}

#[tokio::test(start_paused = true)]
async fn test_enqueue_after_shutdown_reports_closed() {
    let (ingress, rx) = ingress_with_capacity(1);
    drop(rx);

    let result = ingress.enqueue(CommandKind::StopLeft, 0).await;

    assert_eq!(result, Err(AdmissionError::Closed));
}
