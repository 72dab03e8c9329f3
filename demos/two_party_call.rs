//! Two clients calling each other through an in-process relay.
//!
//! Demonstrates:
//! - Starting a RelayServer on a random local port
//! - Connecting two CallClients
//! - Offer, answer, mute/speaker toggles and hangup
//! - A busy rejection from a third caller
//!
//! Usage:
//!   cargo run --example two_party_call
//!   cargo run --example two_party_call -- --debug

// ============================================================================
// Imports
// ============================================================================

use std::time::Duration;

use anyhow::{Context, Result};
use call_signal::{CallClient, CallSnapshot, CallStatus, MediaKind, RelayServer, UserId};
use tracing_subscriber::EnvFilter;

// ============================================================================
// Main
// ============================================================================

#[tokio::main]
async fn main() {
    let debug = std::env::args().any(|a| a == "--debug");
    init_logging(debug);

    if let Err(e) = run().await {
        eprintln!("\n[ERROR] {e:#}");
        std::process::exit(1);
    }
}

async fn run() -> Result<()> {
    println!("=== Two Party Call ===\n");

    // ========================================================================
    // Relay & Clients
    // ========================================================================

    println!("[1] Starting relay...");
    let relay = RelayServer::bind_localhost()
        .await
        .context("failed to start relay")?;
    println!("    ✓ Listening on {}\n", relay.ws_url());

    println!("[2] Connecting clients...");
    let alice = join(&relay, "alice").await?;
    let bob = join(&relay, "bob").await?;
    let carol = join(&relay, "carol").await?;
    println!("    ✓ alice, bob and carol online\n");

    // ========================================================================
    // Call
    // ========================================================================

    println!("[3] alice calls bob (video)...");
    let placed = alice
        .place_call("bob", MediaKind::Video)
        .await
        .context("alice could not place the call")?;
    print_snapshot("alice", &placed);

    let ringing = wait(&bob, CallStatus::Incoming).await?;
    print_snapshot("bob", &ringing);

    println!("\n[4] bob answers...");
    bob.answer_call().await.context("bob could not answer")?;
    let active = wait(&alice, CallStatus::Active).await?;
    print_snapshot("alice", &active);

    println!("\n[5] Toggles...");
    print_snapshot("alice", &alice.toggle_mute().await?);
    print_snapshot("bob", &bob.toggle_speaker().await?);

    println!("\n[6] carol calls bob...");
    carol.place_call("bob", MediaKind::Audio).await?;
    let rejected = wait(&carol, CallStatus::Idle).await?;
    print_snapshot("carol", &rejected);
    print_snapshot("bob", &bob.snapshot());

    println!("\n[7] alice hangs up...");
    print_snapshot("alice", &alice.end_call().await?);
    print_snapshot("bob", &wait(&bob, CallStatus::Idle).await?);

    // ========================================================================
    // Cleanup
    // ========================================================================

    println!("\n[8] Shutting down...");
    for client in [&alice, &bob, &carol] {
        client.shutdown().await;
    }
    relay.shutdown();
    println!("    ✓ Done");

    Ok(())
}

// ============================================================================
// Helpers
// ============================================================================

fn init_logging(debug: bool) {
    let filter = if debug { "call_signal=debug" } else { "call_signal=info" };

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(filter))
        .with_target(false)
        .init();
}

async fn join(relay: &RelayServer, user: &str) -> Result<CallClient> {
    let client = CallClient::builder()
        .server_url(relay.ws_url())
        .user(user)
        .start()
        .await
        .with_context(|| format!("{user} failed to connect"))?;

    let id = UserId::new(user);
    while !relay.is_online(&id) {
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    Ok(client)
}

async fn wait(client: &CallClient, status: CallStatus) -> Result<CallSnapshot> {
    let mut snapshots = client.subscribe();
    let snapshot = snapshots
        .wait_for(|s| s.status == status)
        .await
        .with_context(|| format!("{} stopped before reaching {status}", client.user()))?;
    Ok(snapshot.clone())
}

fn print_snapshot(who: &str, snapshot: &CallSnapshot) {
    let remote = snapshot
        .session
        .as_ref()
        .map_or_else(|| "-".to_string(), |s| s.remote.to_string());
    let ended = snapshot
        .last_end_reason()
        .map_or_else(|| "-".to_string(), |r| r.to_string());

    println!(
        "    {who:<6} status={:<9} remote={remote:<6} muted={:<5} speaker={:<5} last_end={ended}",
        snapshot.status.to_string(),
        snapshot.muted(),
        snapshot.speaker_on(),
    );
}
