//! End-to-end call flows between clients connected through a relay.

use std::time::Duration;

use call_signal::{
    CallClient, CallSnapshot, CallStatus, CallWarning, ClientOptions, ConnectionState, Direction,
    EndReason, MediaKind, RelayServer, UserId,
};
use tokio::time::timeout;

// ============================================================================
// Helpers
// ============================================================================

const WAIT: Duration = Duration::from_secs(5);

fn fast_options() -> ClientOptions {
    ClientOptions::new()
        .with_connect_timeout(Duration::from_secs(2))
        .with_reconnect_delay(Duration::from_millis(50), Duration::from_millis(200))
}

async fn join(relay: &RelayServer, user: &str, options: ClientOptions) -> CallClient {
    let client = CallClient::builder()
        .server_url(relay.ws_url())
        .user(user)
        .options(options)
        .start()
        .await
        .expect("client starts");

    let id = UserId::new(user);
    timeout(WAIT, async {
        while !relay.is_online(&id) {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("relay registers user");

    let mut snapshots = client.subscribe();
    timeout(WAIT, snapshots.wait_for(|s| !s.connectivity_degraded))
        .await
        .expect("connectivity reported")
        .expect("coordinator alive");

    client
}

async fn wait_until(client: &CallClient, predicate: impl FnMut(&CallSnapshot) -> bool) -> CallSnapshot {
    let mut snapshots = client.subscribe();
    timeout(WAIT, snapshots.wait_for(predicate))
        .await
        .expect("snapshot condition reached in time")
        .expect("coordinator alive")
        .clone()
}

async fn wait_status(client: &CallClient, status: CallStatus) -> CallSnapshot {
    wait_until(client, |s| s.status == status).await
}

async fn wait_ended(client: &CallClient, reason: EndReason) -> CallSnapshot {
    wait_until(client, |s| {
        s.status == CallStatus::Idle && s.last_end_reason() == Some(reason)
    })
    .await
}

/// Two clients with an active audio call from alice to bob.
async fn active_pair(relay: &RelayServer, options: ClientOptions) -> (CallClient, CallClient) {
    active_pair_with(relay, options, options).await
}

async fn active_pair_with(
    relay: &RelayServer,
    alice_options: ClientOptions,
    bob_options: ClientOptions,
) -> (CallClient, CallClient) {
    let alice = join(relay, "alice", alice_options).await;
    let bob = join(relay, "bob", bob_options).await;

    alice.place_call("bob", MediaKind::Audio).await.unwrap();
    wait_status(&bob, CallStatus::Incoming).await;
    bob.answer_call().await.unwrap();
    wait_status(&alice, CallStatus::Active).await;

    (alice, bob)
}

// ============================================================================
// Scenarios
// ============================================================================

#[tokio::test]
async fn test_outgoing_call_accepted_then_hung_up() {
    let relay = RelayServer::bind_localhost().await.unwrap();
    let alice = join(&relay, "alice", fast_options()).await;
    let bob = join(&relay, "bob", fast_options()).await;

    let placed = alice.place_call("bob", MediaKind::Audio).await.unwrap();
    assert_eq!(placed.status, CallStatus::Outgoing);
    let call_id = placed.session.as_ref().unwrap().id;

    let ringing = wait_status(&bob, CallStatus::Incoming).await;
    let incoming = ringing.session.unwrap();
    assert_eq!(incoming.id, call_id);
    assert_eq!(incoming.remote, UserId::new("alice"));
    assert_eq!(incoming.direction, Direction::Incoming);

    bob.answer_call().await.unwrap();
    let active = wait_status(&alice, CallStatus::Active).await;
    assert_eq!(active.session.unwrap().id, call_id);

    let speaker = alice.toggle_speaker().await.unwrap();
    assert!(speaker.speaker_on());

    let idle = alice.end_call().await.unwrap();
    assert_eq!(idle.status, CallStatus::Idle);
    assert_eq!(idle.last_end_reason(), Some(EndReason::LocalHangup));

    wait_ended(&bob, EndReason::RemoteHangup).await;

    alice.shutdown().await;
    bob.shutdown().await;
}

#[tokio::test]
async fn test_incoming_call_declined() {
    let relay = RelayServer::bind_localhost().await.unwrap();
    let alice = join(&relay, "alice", fast_options()).await;
    let bob = join(&relay, "bob", fast_options()).await;

    alice.place_call("bob", MediaKind::Video).await.unwrap();
    let ringing = wait_status(&bob, CallStatus::Incoming).await;
    assert_eq!(ringing.session.unwrap().media_kind, MediaKind::Video);

    let idle = bob.decline_call().await.unwrap();
    assert_eq!(idle.last_end_reason(), Some(EndReason::Declined));

    wait_ended(&alice, EndReason::Declined).await;
}

#[tokio::test]
async fn test_caller_cancels_before_answer() {
    let relay = RelayServer::bind_localhost().await.unwrap();
    let alice = join(&relay, "alice", fast_options()).await;
    let bob = join(&relay, "bob", fast_options()).await;

    alice.place_call("bob", MediaKind::Audio).await.unwrap();
    wait_status(&bob, CallStatus::Incoming).await;

    let idle = alice.end_call().await.unwrap();
    assert_eq!(idle.last_end_reason(), Some(EndReason::Cancelled));
    wait_ended(&bob, EndReason::Cancelled).await;

    // Answering the cancelled call is rejected without side effects.
    let err = bob.answer_call().await.unwrap_err();
    assert!(err.is_call_state_error());
    assert_eq!(alice.snapshot().status, CallStatus::Idle);
}

#[tokio::test]
async fn test_third_party_offer_gets_busy() {
    let relay = RelayServer::bind_localhost().await.unwrap();
    let (alice, bob) = active_pair(&relay, fast_options()).await;
    let carol = join(&relay, "carol", fast_options()).await;

    carol.place_call("bob", MediaKind::Audio).await.unwrap();
    wait_ended(&carol, EndReason::RemoteBusy).await;

    let snapshot = bob.snapshot();
    assert_eq!(snapshot.status, CallStatus::Active);
    assert_eq!(snapshot.session.unwrap().remote, UserId::new("alice"));
    assert_eq!(alice.snapshot().status, CallStatus::Active);
}

#[tokio::test]
async fn test_offline_callee_gets_busy() {
    let relay = RelayServer::bind_localhost().await.unwrap();
    let alice = join(&relay, "alice", fast_options()).await;

    alice.place_call("nobody", MediaKind::Audio).await.unwrap();
    wait_ended(&alice, EndReason::RemoteBusy).await;
}

#[tokio::test]
async fn test_place_call_while_in_call_is_rejected() {
    let relay = RelayServer::bind_localhost().await.unwrap();
    let (alice, _bob) = active_pair(&relay, fast_options()).await;

    let before = alice.snapshot();
    let err = alice.place_call("carol", MediaKind::Video).await.unwrap_err();
    assert!(matches!(err, call_signal::Error::AlreadyInCall { status: CallStatus::Active }));
    assert_eq!(alice.snapshot(), before);
}

#[tokio::test]
async fn test_call_survives_reconnect() {
    let relay = RelayServer::bind_localhost().await.unwrap();
    let (alice, bob) = active_pair(&relay, fast_options()).await;
    let mut warnings = alice.warnings();

    assert!(relay.drop_user(&UserId::new("alice")));

    let degraded = wait_until(&alice, |s| s.connectivity_degraded).await;
    assert_eq!(degraded.status, CallStatus::Active);

    let restored = wait_until(&alice, |s| !s.connectivity_degraded).await;
    assert_eq!(restored.status, CallStatus::Active);
    assert_eq!(alice.connection().state(), ConnectionState::Connected);

    let first = timeout(WAIT, warnings.recv()).await.unwrap().unwrap();
    assert_eq!(first, CallWarning::ConnectivityDegraded);
    let second = timeout(WAIT, warnings.recv()).await.unwrap().unwrap();
    assert_eq!(second, CallWarning::ConnectivityRestored);

    // Signaling still works after the reconnect.
    timeout(WAIT, async {
        while !relay.is_online(&UserId::new("alice")) {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .unwrap();
    bob.end_call().await.unwrap();
    wait_ended(&alice, EndReason::RemoteHangup).await;
}

#[tokio::test]
async fn test_hangup_during_outage_ends_call_after_reconnect() {
    let relay = RelayServer::bind_localhost().await.unwrap();
    let slow_reconnect = fast_options().with_reconnect_delay(Duration::from_millis(500), Duration::from_secs(1));
    let (alice, bob) = active_pair_with(&relay, slow_reconnect, fast_options()).await;

    assert!(relay.drop_user(&UserId::new("alice")));

    // The relay drops bob's end; alice is offline.
    let ended = bob.end_call().await.unwrap();
    assert_eq!(ended.last_end_reason(), Some(EndReason::LocalHangup));
    let degraded = wait_until(&alice, |s| s.connectivity_degraded).await;
    assert_eq!(degraded.status, CallStatus::Active);

    let ended = wait_ended(&alice, EndReason::RemoteHangup).await;
    assert!(!ended.connectivity_degraded);
    assert!(alice.is_connected());
    assert_eq!(bob.snapshot().status, CallStatus::Idle);
}

#[tokio::test]
async fn test_call_ends_when_connectivity_does_not_recover() {
    let relay = RelayServer::bind_localhost().await.unwrap();
    let options = fast_options().with_degraded_timeout(Duration::from_millis(300));
    let (alice, bob) = active_pair(&relay, options).await;

    relay.shutdown();

    wait_ended(&alice, EndReason::ConnectivityTimeout).await;
    wait_ended(&bob, EndReason::ConnectivityTimeout).await;
    assert!(!alice.is_connected());
}
