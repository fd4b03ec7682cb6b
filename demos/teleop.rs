//! Minimal teleoperation session.
//!
//! Demonstrates:
//! - Building a link from `LIFTCORE_*` environment variables
//! - Watching connection state, latency and telemetry
//! - Sending commands with automatic protocol negotiation
//! - Clean shutdown
//!
//! Usage:
//!   cargo run --example teleop
//!   LIFTCORE_TRANSPORT=socket cargo run --example teleop -- --debug

// ============================================================================
// Imports
// ============================================================================

use std::time::Duration;

use liftcore_link::{Link, LinkEvent, LinkEventKind, LinkOptions, LogKind, Result};
use tracing_subscriber::EnvFilter;

// ============================================================================
// Main
// ============================================================================

#[tokio::main]
async fn main() {
    let debug = std::env::args().any(|arg| arg == "--debug");
    init_logging(debug);

    if let Err(e) = run().await {
        eprintln!("\n[ERROR] {e}");
        std::process::exit(1);
    }
}

fn init_logging(debug: bool) {
    let default = if debug { "liftcore_link=debug" } else { "liftcore_link=info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

async fn run() -> Result<()> {
    println!("=== LiftCore teleop ===\n");

    // ========================================================================
    // Connect
    // ========================================================================

    let options = LinkOptions::from_env();
    println!("[1] API: {}  transport: {:?}", options.api_url, options.transport);

    let link = Link::builder().options(options).build()?;

    link.on(LinkEventKind::Connection, |event| {
        if let LinkEvent::Connection(state) = event {
            println!("    connection: {state}");
        }
    });
    link.on(LinkEventKind::Log, |event| {
        if let LinkEvent::Log(entry) = event
            && entry.kind != LogKind::Info
        {
            println!("    [{:?}] {}", entry.kind, entry.message);
        }
    });

    // ========================================================================
    // Observe
    // ========================================================================

    println!("[2] Waiting for telemetry...");
    let mut events = link.subscribe();
    let watch = tokio::time::timeout(Duration::from_secs(15), async {
        while let Ok(event) = events.recv().await {
            if let LinkEvent::Telemetry(snapshot) = event {
                return Some(snapshot);
            }
        }
        None
    })
    .await;

    match watch {
        Ok(Some(snapshot)) => println!(
            "    battery={:?} mode={:?} status={:?}",
            snapshot.battery(),
            snapshot.mode(),
            snapshot.status()
        ),
        _ => println!("    no telemetry yet (state: {})", link.state()),
    }

    if let Ok(rtt) = link.probe_health().await {
        println!("    /health round trip: {} ms", rtt.as_millis());
    }

    // ========================================================================
    // Command
    // ========================================================================

    println!("\n[3] Lifting mast...");
    match link.lift_up().await {
        Ok(receipt) => println!("    ✓ {receipt}"),
        Err(e) if e.is_rejection() => println!("    ✗ refused: {e}"),
        Err(e) => println!("    ✗ not delivered: {e}"),
    }

    println!("[4] Stopping...");
    match link.stop().await {
        Ok(receipt) => println!("    ✓ {receipt}"),
        Err(e) => println!("    ✗ {e}"),
    }

    for (family, variant) in link.protocol_cache().snapshot() {
        println!("    {family} → {variant}");
    }

    if let Some(latency) = link.latency() {
        println!("    heartbeat latency: {} ms", latency.as_millis());
    }

    // ========================================================================
    // Shutdown
    // ========================================================================

    link.shutdown().await;
    println!("\n=== done ===");
    Ok(())
}
