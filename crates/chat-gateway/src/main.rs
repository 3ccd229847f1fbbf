//! Gateway runner
//!
//! Run with:
//! ```bash
//! BOT_TOKEN=... cargo run -p chat-gateway
//! ```
//!
//! Configuration is loaded from environment variables.

use anyhow::Context;
use chat_common::{try_init_tracing_with_config, ClientConfig, TracingConfig};
use chat_gateway::{
    CoordinatorConfig, DispatchEvent, EventContext, HandlerRegistry, ShardCoordinator,
    ShardEventKind,
};
use chat_rest::RestDispatcher;
use std::sync::Arc;
use tracing::{error, info, warn};

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        error!(error = %e, "Gateway runner failed");
        eprintln!("Error: {e:#}");
        std::process::exit(1);
    }
}

async fn run() -> anyhow::Result<()> {
    let config = ClientConfig::from_env().context("failed to load configuration")?;

    if let Err(e) = try_init_tracing_with_config(TracingConfig::for_environment(config.app.env)) {
        eprintln!("Warning: Failed to initialize tracing: {e}");
    }

    info!(
        env = ?config.app.env,
        intents = config.gateway.intents.bits(),
        "Configuration loaded"
    );

    let rest = RestDispatcher::from_config(&config).context("failed to build REST client")?;

    let registry = HandlerRegistry::builder()
        .on_any(|ctx: EventContext, event: Arc<DispatchEvent>| async move {
            tracing::debug!(
                shard_id = ctx.shard_id,
                seq = ctx.sequence,
                event = event.name(),
                "Dispatch"
            );
        })
        .build();

    let mut coordinator = ShardCoordinator::new(CoordinatorConfig::from(&config), rest, registry);

    if let Some(mut events) = coordinator.take_events() {
        tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                match &event.kind {
                    ShardEventKind::Dispatch(_) => {}
                    ShardEventKind::FatallyClosed { code, reason } => {
                        error!(shard_id = event.shard_id, code, reason = %reason, "Shard closed fatally");
                    }
                    ShardEventKind::Disconnected { reason: Some(reason) } => {
                        warn!(shard_id = event.shard_id, reason = %reason, "Shard disconnected");
                    }
                    kind => info!(shard_id = event.shard_id, event = kind.name(), "Shard event"),
                }
            }
        });
    }

    let report = coordinator.connect().await.context("failed to start shards")?;
    for failure in &report.failed {
        warn!(shard_id = failure.shard_id, error = %failure.error, "Shard not ready");
    }
    if report.ready.is_empty() && report.has_fatal() {
        coordinator.disconnect().await;
        anyhow::bail!("no shard could connect");
    }

    info!(ready = ?report.ready, "Gateway running, press Ctrl+C to stop");
    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for shutdown signal")?;

    info!("Shutting down");
    coordinator.disconnect().await;
    Ok(())
}
