use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

use socketio_cluster_adapter::{ClusterAdapter, Config, InMemoryAdapter, RedisTransport, ServerSideEmit};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    dotenvy::dotenv().ok();

    let log_level = std::env::var("RUST_LOG")
        .unwrap_or_else(|_| "info".to_string())
        .parse()
        .unwrap_or(Level::INFO);

    let subscriber = FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_target(false)
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true)
        .finish();

    tracing::subscriber::set_global_default(subscriber)?;

    let config = Config::from_env()?;
    info!(
        "Starting cluster node for namespace {} (redis: {})",
        config.namespace, config.redis.url
    );

    let transport = Arc::new(RedisTransport::connect(&config.redis, &config.namespace).await?);
    let local = Arc::new(InMemoryAdapter::new(&config.namespace));
    let (emit_tx, mut emit_rx) = mpsc::unbounded_channel::<ServerSideEmit>();

    let adapter = ClusterAdapter::new(
        &config.namespace,
        config.adapter.clone(),
        local,
        transport.clone(),
        emit_tx,
    );
    info!("Server id: {}", adapter.uid());

    // Peers answer the initial heartbeat right away: subscribe first
    let inbox = transport.subscribe(adapter.uid()).await?;
    let listener = adapter.listen(inbox);
    adapter.init().await;

    let emits = tokio::spawn(async move {
        while let Some(emit) = emit_rx.recv().await {
            info!(
                "Server-side emit {:?} with {} arguments",
                emit.event_name(),
                emit.args.len()
            );
            if let Some(ack) = emit.ack {
                ack.call(serde_json::Value::Null);
            }
        }
    });

    let mut report = tokio::time::interval(config.adapter.heartbeat_interval.max(Duration::from_secs(1)));

    loop {
        tokio::select! {
            _ = report.tick() => {
                info!("Live servers: {}", adapter.server_count().await);
            }
            result = tokio::signal::ctrl_c() => {
                if let Err(e) = result {
                    tracing::error!("Failed to listen for shutdown signal: {}", e);
                }
                break;
            }
        }
    }

    info!("Shutting down cluster node");
    adapter.close();
    listener.abort();
    emits.abort();

    Ok(())
}
