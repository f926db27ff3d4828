//! xpbridged — simulator telemetry bridge daemon.

use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::task::JoinHandle;

use xpbridge_core::config::BridgeConfig;
use xpbridge_services::{
    discover_with_retries, AircraftMonitor, DatarefStore, Endpoint, Receiver, SimLink,
    StringReadOptions, StringReader, SubscriptionChannel, TcpSink,
};

mod position;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    // Load config
    if let Err(e) = BridgeConfig::write_default_if_missing() {
        tracing::warn!(error = %e, "failed to write default config");
    }
    let config = BridgeConfig::load().unwrap_or_else(|e| {
        tracing::warn!(error = %e, "failed to load config, using defaults");
        BridgeConfig::default()
    });
    tracing::info!("xpbridged starting");

    // Shared state
    let store = Arc::new(DatarefStore::new());
    let link = Arc::new(SimLink::new());
    let channel = SubscriptionChannel::new(link.clone(), store.clone());
    let sink = Arc::new(TcpSink::new(config.sink.address.clone()));

    // The receiver idles until the endpoint below is installed.
    let mut receiver_task = tokio::spawn(Receiver::new(link.clone(), store.clone()).run());

    // ── Discovery ────────────────────────────────────────────────────────────
    tracing::info!(
        group = %config.discovery.multicast_group,
        port = config.discovery.port,
        "looking for simulator"
    );
    let beacon = discover_with_retries(&config.discovery)
        .await
        .context("failed to find a running simulator")?;
    tracing::info!(
        addr = %beacon.addr(),
        hostname = %beacon.hostname,
        version = beacon.version_number,
        role = beacon.role,
        "simulator found"
    );

    let endpoint = Endpoint::for_beacon(&beacon)
        .await
        .context("failed to bind simulator socket")?;
    link.install(endpoint);

    // ── Subscriptions ────────────────────────────────────────────────────────
    let requested = config.subscriptions.datarefs.len();
    let sent = channel
        .subscribe_all(&config.subscriptions.datarefs, config.subscriptions.update_freq_hz)
        .await;
    tracing::info!(
        requested,
        sent,
        freq_hz = config.subscriptions.update_freq_hz,
        "telemetry subscriptions sent"
    );

    // ── Shutdown channel ─────────────────────────────────────────────────────
    let (shutdown_tx, _) = tokio::sync::broadcast::channel::<()>(1);

    {
        let shutdown = shutdown_tx.clone();
        tokio::spawn(async move {
            tokio::signal::ctrl_c().await.ok();
            tracing::info!("shutdown signal received");
            let _ = shutdown.send(());
        });
    }

    // ── Spawn tasks ──────────────────────────────────────────────────────────

    let mut monitor_task = {
        let options = StringReadOptions {
            poll_interval: config.aircraft.string_poll_interval(),
            timeout: config.aircraft.string_timeout(),
            ..Default::default()
        };
        let reader = StringReader::new(channel.clone(), store.clone(), options);
        let monitor = AircraftMonitor::new(reader, sink.clone(), config.aircraft.poll_interval());
        tokio::spawn(monitor.run())
    };

    let mut publish_task = tokio::spawn(position::publish_loop(
        store.clone(),
        sink.clone(),
        config.subscriptions.publish_interval(),
    ));

    tracing::info!(sink = %sink.addr(), "bridge running");

    // ── Wait for exit ────────────────────────────────────────────────────────

    let mut shutdown_rx = shutdown_tx.subscribe();

    tokio::select! {
        _ = shutdown_rx.recv()     => tracing::info!("shutting down"),
        r = &mut receiver_task     => tracing::error!("receiver exited: {:?}", r),
        r = &mut monitor_task      => tracing::error!("aircraft monitor exited: {:?}", r),
        r = &mut publish_task      => tracing::error!("position publisher exited: {:?}", r),
    }

    shutdown(&channel, vec![monitor_task, publish_task]).await;
    receiver_task.abort();
    tracing::info!("connection closed");

    Ok(())
}

/// Stop every task that may still subscribe, then unsubscribe whatever is
/// left registered. The monitor re-arms its trigger after each refetch, so
/// it has to be gone before the registry snapshot is taken.
async fn shutdown(channel: &SubscriptionChannel, tasks: Vec<JoinHandle<()>>) {
    for task in &tasks {
        task.abort();
    }
    for task in tasks {
        // a handle already driven to completion by select! must not be polled again
        if task.is_finished() {
            continue;
        }
        if let Err(e) = task.await {
            if !e.is_cancelled() {
                tracing::warn!(error = %e, "task failed during shutdown");
            }
        }
    }
    channel.unsubscribe_all().await;
}
