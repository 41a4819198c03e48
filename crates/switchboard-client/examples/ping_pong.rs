// ABOUTME: Demo host: one coordinator, two views and a worker exchanging messages and RPCs.
// ABOUTME: Run with `cargo run -p switchboard-client --example ping_pong -- --rounds 5`.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use serde_json::{json, Value};
use switchboard_client::{handler, listener, Endpoint, Throttled, ViewClient, WorkerClient};
use switchboard_coordinator::Coordinator;
use switchboard_core::{ProcessSpec, Selector, SwitchboardConfig};
use tracing::info;

#[derive(Parser)]
#[command(name = "ping_pong")]
#[command(about = "Broker channels between in-process endpoints")]
struct Cli {
    /// Number of ping rounds
    #[arg(short, long, default_value_t = 3)]
    rounds: u32,

    /// Config file (default: ~/.config/switchboard/switchboard.toml)
    #[arg(long)]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    switchboard_log::init();
    let cli = Cli::parse();

    let path = cli.config.unwrap_or_else(SwitchboardConfig::default_path);
    let config = SwitchboardConfig::load_or_default(&path)
        .with_context(|| format!("loading {}", path.display()))?;

    let coordinator = Coordinator::spawn(&config);

    let controller = ViewClient::connect(
        coordinator
            .attach(ProcessSpec::view().with_url("app://controller"))
            .await?,
        Some("controller".to_string()),
        config.clone(),
    )
    .await?;
    let output = ViewClient::connect(
        coordinator
            .attach(ProcessSpec::view().with_url("app://output"))
            .await?,
        Some("output".to_string()),
        config.clone(),
    )
    .await?;
    let indexer = WorkerClient::connect(
        coordinator.attach(ProcessSpec::worker()).await?,
        "indexer",
        Some("background".to_string()),
        config.clone(),
    )?;

    output.on(
        "ping",
        listener(|sender, args| {
            info!(from = %sender.label(), ?args, "ping");
            Ok(())
        }),
    );
    output.handle(
        "add",
        handler(|_sender, args| async move {
            Ok(json!(args.iter().filter_map(Value::as_i64).sum::<i64>()))
        }),
    );
    controller.on(
        "indexed",
        listener(|sender, args| {
            info!(from = %sender.label(), ?args, "indexed");
            Ok(())
        }),
    );

    // Queued until the worker is confirmed.
    indexer
        .send(&Selector::identifier("controller"), "indexed", vec![json!("startup")])
        .await?;
    indexer.wait_registered().await?;

    let to_output = Selector::identifier("output");
    for round in 0..cli.rounds {
        controller.send(&to_output, "ping", vec![json!(round)]).await?;
        let sum = controller
            .invoke(&to_output, "add", vec![json!(round), json!(round)], None)
            .await?;
        info!(round, %sum, "add");
    }

    let progress = Throttled::new(Arc::new(controller.clone()));
    for step in 0..=100 {
        progress.send(to_output.clone(), "ping", vec![json!(format!("{step}%"))]);
    }

    tokio::time::sleep(Duration::from_millis(100)).await;
    let snapshot = coordinator.snapshot().await?;
    info!(version = snapshot.version, endpoints = snapshot.len(), "Done");
    coordinator.shutdown().await;
    Ok(())
}
