// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Basic highlight-sync usage example.
//!
//! Demonstrates:
//! 1. Wiring the engine against the in-memory remote
//! 2. Saving highlights through the dual-write repository
//! 3. Going offline, recording, and resyncing on reconnect
//! 4. Pulling another device's changes
//! 5. Displaying metrics
//! 6. Clean shutdown
//!
//! # Run
//!
//! ```bash
//! cargo run --example basic_usage
//! ```

use highlight_sync::storage::SqlHighlightStore;
use highlight_sync::{
    AuthSession, EventType, Highlight, HighlightColor, InMemoryRemote, Signal, SyncConfig,
    SyncEngine, SyncEngineDeps, WriteOptions,
};
use metrics_util::debugging::{DebugValue, DebuggingRecorder, Snapshotter};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let recorder = DebuggingRecorder::new();
    let snapshotter = recorder.snapshotter();
    recorder.install().expect("failed to install metrics recorder");

    tracing_subscriber::fmt()
        .with_target(false)
        .compact()
        .init();

    println!("\n╔═══════════════════════════════════════════════════════════════╗");
    println!("║           highlight-sync: Basic Usage Example                 ║");
    println!("╚═══════════════════════════════════════════════════════════════╝\n");

    // ─────────────────────────────────────────────────────────────────────────
    // 1. Wire the engine
    // ─────────────────────────────────────────────────────────────────────────
    println!("📦 Configuring highlight-sync...");
    let auth = AuthSession::signed_in("reader-42");
    let remote = Arc::new(InMemoryRemote::new(auth.clone()));
    let config = SyncConfig {
        sync_interval: Duration::from_millis(250),
        ..SyncConfig::for_device("laptop")
    };

    let deps = SyncEngineDeps::open(config, Arc::clone(&remote), auth.clone(), true).await?;
    let engine = Arc::new(SyncEngine::new(deps));
    let highlights = engine.repository(Arc::new(SqlHighlightStore::new(engine.db())));
    println!("   State: {}", engine.state());

    let (stop, stopped) = watch::channel(false);
    let runner = tokio::spawn({
        let engine = Arc::clone(&engine);
        async move { engine.run(stopped).await }
    });

    // ─────────────────────────────────────────────────────────────────────────
    // 2. Save a few highlights
    // ─────────────────────────────────────────────────────────────────────────
    println!("\n📝 Saving highlights...");
    let passages = [
        ("https://example.com/essay", "The map is not the territory.", HighlightColor::Yellow),
        ("https://example.com/essay", "<b>Bold</b> claims need <script>x()</script>evidence.", HighlightColor::Pink),
        ("https://example.com/notes", "Write it down before you forget.", HighlightColor::Green),
    ];
    for (url, text, color) in passages {
        let saved = highlights
            .add(
                Highlight::new(url, text, vec!["0:32".into()], color),
                WriteOptions::default(),
            )
            .await?;
        engine
            .emit(EventType::HighlightCreated, serde_json::to_value(&saved)?)
            .await?;
        println!("   └─ {} → {:?} ({})", saved.id, saved.text, saved.color);
    }
    highlights.settle().await;
    println!("   ✅ Remote now holds {} records", remote.record_count());

    // ─────────────────────────────────────────────────────────────────────────
    // 3. Offline, then back online
    // ─────────────────────────────────────────────────────────────────────────
    println!("\n📴 Going offline...");
    engine.network().set_online(false);
    engine
        .emit(EventType::CollectionCreated, json!({"id": "col-1", "name": "Favourites"}))
        .await?;
    println!("   └─ Offline queue: {}", engine.offline().offline_queue_size());

    let mut signals = engine.signals().subscribe();
    println!("\n📶 Back online, waiting for resync...");
    engine.network().set_online(true);
    let waited = tokio::time::timeout(Duration::from_secs(5), async {
        while let Ok(signal) = signals.recv().await {
            if let Signal::SyncCompleted { synced, .. } = signal {
                if synced > 0 {
                    return synced;
                }
            }
        }
        0
    })
    .await;
    match waited {
        Ok(synced) => println!("   ✅ Resynced {synced} events"),
        Err(_) => println!("   ⚠️  Resync did not finish in time"),
    }

    // ─────────────────────────────────────────────────────────────────────────
    // 4. Pull changes made on another device
    // ─────────────────────────────────────────────────────────────────────────
    println!("\n📥 Pulling changes from another device...");
    let tablet_highlight = Highlight::new(
        "https://example.com/notes",
        "Highlighted on the tablet.",
        vec!["0:26".into()],
        HighlightColor::Blue,
    );
    remote.insert_event(highlight_sync::Event::new(
        EventType::HighlightCreated,
        serde_json::to_value(&tablet_highlight)?,
        "tablet",
    ));
    let pulled = engine.pull_remote(0, &highlights).await?;
    println!(
        "   └─ pulled={} appended={} duplicates={} applied={}",
        pulled.pulled, pulled.appended, pulled.duplicates, pulled.applied
    );
    for h in highlights.find_by_url("https://example.com/notes").await? {
        println!("   └─ {} → {:?}", h.id, h.text);
    }

    // ─────────────────────────────────────────────────────────────────────────
    // 5. Status and metrics
    // ─────────────────────────────────────────────────────────────────────────
    let status = engine.status().await?;
    println!("\n📊 Status:");
    println!("   └─ {status:?}");
    println!("\n📈 Raw Metrics:");
    dump_metrics(&snapshotter);

    // ─────────────────────────────────────────────────────────────────────────
    // 6. Clean shutdown
    // ─────────────────────────────────────────────────────────────────────────
    println!("\n🛑 Shutting down...");
    stop.send(true)?;
    runner.await?;
    println!("   ✅ Shutdown complete! State: {}", engine.state());

    println!("\n╔═══════════════════════════════════════════════════════════════╗");
    println!("║                    Example complete!                          ║");
    println!("╚═══════════════════════════════════════════════════════════════╝\n");
    Ok(())
}

/// Print every captured metric, grouped by kind.
fn dump_metrics(snapshotter: &Snapshotter) {
    let mut lines: Vec<(String, String)> = Vec::new();

    for (composite_key, _, _, value) in snapshotter.snapshot().into_vec() {
        let (_, key) = composite_key.into_parts();
        let labels: Vec<String> = key
            .labels()
            .map(|l| format!("{}={}", l.key(), l.value()))
            .collect();
        let name = if labels.is_empty() {
            key.name().to_string()
        } else {
            format!("{}{{{}}}", key.name(), labels.join(","))
        };
        let rendered = match value {
            DebugValue::Counter(v) => format!("counter {v}"),
            DebugValue::Gauge(v) => format!("gauge {:.2}", v.into_inner()),
            DebugValue::Histogram(samples) => {
                let count = samples.len();
                let sum: f64 = samples.iter().map(|v| v.into_inner()).sum();
                format!("histogram count={count} sum={sum:.4}")
            }
        };
        lines.push((name, rendered));
    }

    lines.sort();
    if lines.is_empty() {
        println!("   └─ (no metrics recorded)");
    }
    for (name, value) in &lines {
        println!("   └─ {name} = {value}");
    }
}
