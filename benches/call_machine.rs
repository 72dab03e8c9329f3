//! Call signaling benchmark suite.
//!
//! - Full call lifecycles through the pure state machine
//! - Signal frame encode/decode
//! - Offer/answer/hangup round trips through a local relay
//!
//! Run with: cargo bench --bench call_machine
//! Results saved to: target/criterion/

use std::hint::black_box;
use std::time::Duration;

use call_signal::call::{CallMachine, Command};
use call_signal::{
    CallClient, CallId, CallPayload, CallStatus, MediaKind, RelayServer, Signal, SignalKind,
    UserId,
};
use criterion::{BenchmarkId, Criterion, criterion_group, criterion_main};
use tokio::runtime::Runtime;

// ============================================================================
// Benchmark Parameters
// ============================================================================

const LIFECYCLE_COUNTS: &[usize] = &[1, 100, 1000];

// ============================================================================
// Helpers
// ============================================================================

fn offer_to(local: &UserId) -> Signal {
    Signal::new(
        SignalKind::Offer,
        CallPayload::new(
            CallId::generate(),
            UserId::new("bob"),
            local.clone(),
            MediaKind::Audio,
        ),
    )
}

/// Incoming call, answer, toggles, remote hangup.
fn run_lifecycle(machine: &mut CallMachine) {
    let offer = offer_to(machine.local_user());
    machine.signal(&offer).unwrap();
    machine.command(Command::Answer).unwrap();
    machine.command(Command::ToggleMute).unwrap();
    machine.command(Command::ToggleSpeaker).unwrap();

    let hangup = Signal::new(SignalKind::End, offer.payload);
    black_box(machine.signal(&hangup).unwrap());
}

// ============================================================================
// Benchmark: State Machine
// ============================================================================

fn bench_machine(c: &mut Criterion) {
    let mut group = c.benchmark_group("machine");

    for &count in LIFECYCLE_COUNTS {
        group.bench_with_input(BenchmarkId::new("lifecycles", count), &count, |b, &n| {
            b.iter(|| {
                let mut machine = CallMachine::new(UserId::new("alice"), true);
                for _ in 0..n {
                    run_lifecycle(&mut machine);
                }
                assert_eq!(machine.status(), CallStatus::Idle);
            });
        });
    }

    group.bench_function("busy_rejection", |b| {
        let mut machine = CallMachine::new(UserId::new("alice"), true);
        let first = offer_to(machine.local_user());
        machine.signal(&first).unwrap();

        b.iter(|| {
            let intruder = offer_to(machine.local_user());
            black_box(machine.signal(&intruder).is_err())
        });
    });

    group.finish();
}

// ============================================================================
// Benchmark: Wire Codec
// ============================================================================

fn bench_codec(c: &mut Criterion) {
    let mut group = c.benchmark_group("codec");
    let signal = offer_to(&UserId::new("alice"));
    let text = signal.encode().unwrap();

    group.bench_function("encode", |b| b.iter(|| black_box(signal.encode().unwrap())));
    group.bench_function("decode", |b| {
        b.iter(|| black_box(Signal::decode(black_box(&text)).unwrap()))
    });

    group.finish();
}

// ============================================================================
// Benchmark: Relay Round Trip
// ============================================================================

fn bench_relay_round_trip(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();

    let (_relay, alice, bob) = rt.block_on(async {
        let relay = RelayServer::bind_localhost().await.unwrap();
        let alice = start(&relay, "alice").await;
        let bob = start(&relay, "bob").await;
        (relay, alice, bob)
    });

    let mut group = c.benchmark_group("relay");
    group.sample_size(20);
    group.measurement_time(Duration::from_secs(10));

    let (caller, callee) = (&alice, &bob);
    group.bench_function("offer_answer_hangup", |b| {
        b.to_async(&rt).iter(|| async move {
            let (alice, bob) = (caller, callee);
            alice.place_call("bob", MediaKind::Audio).await.unwrap();
            wait(bob, CallStatus::Incoming).await;
            bob.answer_call().await.unwrap();
            wait(alice, CallStatus::Active).await;
            alice.end_call().await.unwrap();
            wait(bob, CallStatus::Idle).await;
        });
    });

    group.finish();

    rt.block_on(async {
        alice.shutdown().await;
        bob.shutdown().await;
    });
}

async fn start(relay: &RelayServer, user: &str) -> CallClient {
    let client = CallClient::builder()
        .server_url(relay.ws_url())
        .user(user)
        .start()
        .await
        .unwrap();

    let id = UserId::new(user);
    while !relay.is_online(&id) {
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    client
}

async fn wait(client: &CallClient, status: CallStatus) {
    let mut snapshots = client.subscribe();
    snapshots.wait_for(|s| s.status == status).await.unwrap();
}

// ============================================================================
// Criterion Setup
// ============================================================================

criterion_group!(benches, bench_machine, bench_codec, bench_relay_round_trip);
criterion_main!(benches);
