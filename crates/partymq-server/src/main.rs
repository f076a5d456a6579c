//! partymq - Key-partitioning router for RabbitMQ

use anyhow::{anyhow, Context};
use clap::Parser;
use partymq_core::PartitionCache;
use partymq_server::api::{self, AppState};
use partymq_server::broker::{AmqpBroker, ROUTING_EXCHANGE};
use partymq_server::config::RouterConfig;
use partymq_server::consumer::{ConsumerController, KeyExtractor};
use partymq_server::heartbeat::{spawn_sweep_loop, HeartbeatMonitor};
use partymq_server::observability::{
    events, init_metrics, init_tracing, shutdown_tracing, MetricsState, TracingConfig,
};
use partymq_server::sender::Sender;
use partymq_server::version;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{error, info, warn};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = RouterConfig::parse();

    init_tracing(TracingConfig::from_env()).map_err(|e| anyhow!(e))?;

    info!(version = %version::full_version(), "Starting partymq");
    info!(
        source_queue = %config.source_queue,
        key_source = ?config.key_source,
        key_name = %config.key_name,
        bind_addr = %config.bind_addr,
        "Configuration loaded"
    );

    let metrics_state = match init_metrics() {
        Ok(state) => Some(state),
        Err(e) => {
            warn!(error = %e, "Failed to initialize metrics, /metrics disabled");
            None
        }
    };

    let result = run(config, metrics_state).await;
    if let Err(e) = &result {
        error!(error = %e, "partymq exited with error");
    }

    shutdown_tracing();
    result
}

async fn run(
    config: RouterConfig,
    metrics_state: Option<MetricsState>,
) -> anyhow::Result<()> {
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let connection_lost = Arc::new(AtomicBool::new(false));

    info!("Connecting to broker...");
    let broker = Arc::new(
        AmqpBroker::connect(&config.rabbit_cs)
            .await
            .context("failed to connect to broker")?,
    );
    {
        let shutdown_tx = shutdown_tx.clone();
        let connection_lost = Arc::clone(&connection_lost);
        broker.on_connection_lost(move |e| {
            events::broker_connection_lost(&e.to_string());
            connection_lost.store(true, Ordering::Release);
            shutdown_tx.send_replace(true);
        });
    }
    broker
        .declare_exchange(ROUTING_EXCHANGE)
        .await
        .context("failed to declare routing exchange")?;

    let cache = Arc::new(PartitionCache::new());
    let heartbeat = Arc::new(HeartbeatMonitor::new(Arc::clone(&cache), config.heartbeat_ttl));
    let sweeper = spawn_sweep_loop(
        Arc::clone(&heartbeat),
        config.heartbeat_check_interval,
        shutdown_rx.clone(),
    );

    let sender = Arc::new(Sender::new(Arc::clone(&cache), Arc::clone(&broker)));
    let controller = ConsumerController::new(
        Arc::clone(&broker),
        sender,
        KeyExtractor::new(config.key_source, config.key_name.clone()),
        config.consumer_config(),
    );
    let consumer_state = controller.state();
    let consumer = tokio::spawn(controller.run(shutdown_rx.clone()));

    let readiness = Arc::new(AtomicBool::new(true));
    let state = AppState {
        cache,
        heartbeat,
        exchange: ROUTING_EXCHANGE.to_string(),
        consumer: consumer_state,
        readiness: Arc::clone(&readiness),
        metrics_state,
    };
    let app = api::create_router(state);

    {
        let shutdown_tx = shutdown_tx.clone();
        tokio::spawn(async move {
            shutdown_signal().await;
            info!("Shutdown signal received");
            shutdown_tx.send_replace(true);
        });
    }

    info!(bind_addr = %config.bind_addr, "Starting API server");
    let listener = tokio::net::TcpListener::bind(&config.bind_addr)
        .await
        .with_context(|| format!("failed to bind {}", config.bind_addr))?;

    let mut server_shutdown = shutdown_rx.clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = server_shutdown.wait_for(|stop| *stop).await;
            readiness.store(false, Ordering::Release);
        })
        .await
        .context("API server failed")?;

    shutdown_tx.send_replace(true);

    if consumer.await.is_err() {
        warn!("Consumer task panicked");
    }
    if sweeper.await.is_err() {
        warn!("Heartbeat sweep task panicked");
    }

    if connection_lost.load(Ordering::Acquire) {
        return Err(anyhow!("broker connection lost"));
    }

    if let Err(e) = broker.close().await {
        warn!(error = %e, "Failed to close broker connections");
    }
    info!("partymq stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
