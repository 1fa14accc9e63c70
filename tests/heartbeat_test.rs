mod common;

use std::sync::atomic::Ordering;
use std::time::Duration;

use channel_orion::error::SessionError;
use channel_orion::heartbeat::{AckTrigger, HeartbeatAction, HeartbeatMonitor, HeartbeatState};
use common::*;
use orion_client::Session;
use tokio::time::Instant;

fn monitor(api: &std::sync::Arc<FakeApi>, idle_ms: u64) -> HeartbeatMonitor {
    let session = Session::new("tok-1", USER_ID, None);
    HeartbeatMonitor::new(api.clone(), session, Duration::from_millis(idle_ms))
}

#[tokio::test(start_paused = true)]
async fn test_touch_rearms_single_deadline() {
    let api = FakeApi::new();
    let mut hb = monitor(&api, 1000);
    let start = Instant::now();
    assert_eq!(hb.deadline(), start + Duration::from_millis(1000));

    tokio::time::advance(Duration::from_millis(600)).await;
    hb.touch();
    assert_eq!(hb.deadline(), start + Duration::from_millis(1600));
}

#[tokio::test(start_paused = true)]
async fn test_ping_is_acknowledged_once() {
    let api = FakeApi::new();
    let mut hb = monitor(&api, 1000);

    hb.on_ping();
    hb.on_ping();
    assert_eq!(hb.state(), HeartbeatState::Ponging);

    let outcome = hb.next_ack().await.expect("ack outcome");
    assert_eq!(outcome.trigger, AckTrigger::Ping);
    assert_eq!(hb.on_ack(outcome), HeartbeatAction::None);
    assert_eq!(hb.state(), HeartbeatState::AwaitingPing);
    assert_eq!(api.count(|c| *c == Call::Pong), 1);
}

#[tokio::test(start_paused = true)]
async fn test_idle_keepalive_and_failed_ack() {
    let api = FakeApi::new();
    api.pong_failures.store(1, Ordering::SeqCst);
    let mut hb = monitor(&api, 200);

    tokio::time::sleep_until(hb.deadline()).await;
    hb.on_idle();
    assert!(hb.deadline() > Instant::now());

    let outcome = hb.next_ack().await.expect("ack outcome");
    assert_eq!(outcome.trigger, AckTrigger::IdleTimeout);
    match hb.on_ack(outcome) {
        HeartbeatAction::Reengage(SessionError::HeartbeatLost(_)) => {}
        other => panic!("expected re-engagement, got {other:?}"),
    }
    assert_eq!(hb.state(), HeartbeatState::AwaitingPing);
}

#[tokio::test(start_paused = true)]
async fn test_unanswered_ack_fails_after_one_idle_period() {
    let api = FakeApi::new();
    api.pong_hangs.store(true, Ordering::SeqCst);
    let mut hb = monitor(&api, 500);

    hb.on_ping();
    let sent = Instant::now();
    let outcome = hb.next_ack().await.expect("ack outcome");
    assert!(sent.elapsed() >= Duration::from_millis(500));
    assert_eq!(outcome.trigger, AckTrigger::Ping);
    assert!(matches!(hb.on_ack(outcome), HeartbeatAction::Reengage(SessionError::HeartbeatLost(_))));

    // the monitor accepts the next keepalive again
    hb.on_ping();
    assert_eq!(hb.state(), HeartbeatState::Ponging);
    assert!(wait_for(Duration::from_millis(100), || api.count(|c| *c == Call::Pong) == 2).await);
}
