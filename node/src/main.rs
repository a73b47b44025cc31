// Copyright (c) 2026 Verdant Systems. MIT License.
// See LICENSE for details.

//! # orchard-node
//!
//! Operational host for the Orchard event ledger. Wires up a local-mode
//! [`LedgerService`], spawns the retry and key-rotation workers, feeds the
//! ledger a stream of demo sensor readings, and shuts everything down
//! cleanly on Ctrl-C — flushing the sensor batch and joining both workers
//! before exit.
//!
//! The HTTP API that fronted the original deployment lives elsewhere; this
//! binary exists so the background workers have a host process and so the
//! ledger can be exercised end-to-end from a terminal.

mod cli;
mod logging;

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use serde_json::json;
use tracing::info;

use orchard_ledger::{spawn_workers, LedgerConfig, LedgerService, ShipmentStatus};

use cli::{Commands, OrchardCli, RunArgs};
use logging::LogFormat;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = OrchardCli::parse();

    match cli.command {
        Commands::Run(args) => run(args).await,
        Commands::Keygen => keygen(),
        Commands::Version => {
            println!("orchard-node {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
    }
}

async fn run(args: RunArgs) -> anyhow::Result<()> {
    logging::init(&args.log_level, LogFormat::from_str_lossy(&args.log_format));

    let mut config = LedgerConfig {
        sensor_batch_size: args.batch_size,
        cache_ttl: Duration::from_secs(args.cache_ttl_secs),
        retry_interval: Duration::from_secs(args.retry_interval_secs),
        ..LedgerConfig::default()
    };
    if let Some(secret) = args.field_secret {
        config.field_secret = secret;
    }

    let service =
        Arc::new(LedgerService::local(config).context("failed to initialize ledger service")?);
    let workers = spawn_workers(Arc::clone(&service));

    info!(
        interval_ms = args.feed_interval_ms,
        batch_size = args.batch_size,
        "ledger running; press Ctrl-C to stop"
    );

    // Seed a shipment so the demo feed has something to hang history on.
    let shipment = service
        .create_shipment_record(
            json!({
                "shipment_id": "SHIP-DEMO-1",
                "origin": "WH001",
                "destination": "Market Street depot",
                "fruit_type": "apple"
            })
            .as_object()
            .unwrap()
            .clone(),
        )
        .await?;
    info!(hash = %shipment.hash, "demo shipment recorded");
    service
        .update_shipment_status("SHIP-DEMO-1", ShipmentStatus::InTransit, None)
        .await?;

    // Demo telemetry loop. Values wander deterministically — the point is
    // to exercise the pipeline, not to simulate an orchard.
    let mut tick: u64 = 0;
    let mut interval = tokio::time::interval(Duration::from_millis(args.feed_interval_ms.max(10)));
    loop {
        tokio::select! {
            _ = interval.tick() => {
                let temperature = 4.0 + (tick % 12) as f64 * 0.25;
                let humidity = 82.0 + (tick % 7) as f64;
                let receipt = service
                    .record_sensor_data(
                        "SENSOR-DEMO-1",
                        json!({"temperature": temperature, "humidity": humidity})
                            .as_object()
                            .unwrap()
                            .clone(),
                    )
                    .await?;
                info!(hash = %receipt.hash, path = %receipt.path, tick, "reading recorded");
                tick += 1;
            }
            _ = shutdown_signal() => {
                info!("shutdown signal received, draining");
                break;
            }
        }
    }

    // Drain what the batch buffer still holds, then stop the workers.
    let flushed = service.flush_sensor_batch().await;
    if flushed > 0 {
        info!(flushed, "sensor batch drained on shutdown");
    }
    workers.shutdown().await;

    let status = service.get_status().await;
    println!("{}", serde_json::to_string_pretty(&status)?);
    Ok(())
}

fn keygen() -> anyhow::Result<()> {
    let service = LedgerService::local(LedgerConfig::default())
        .context("failed to initialize ledger service")?;
    print!("{}", service.export_public_key_pem()?);
    Ok(())
}

/// Resolves when the process is asked to stop: Ctrl-C everywhere, plus
/// SIGTERM on Unix so container runtimes get a clean exit too.
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl-C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}
