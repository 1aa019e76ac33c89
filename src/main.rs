use anyhow::Result;
use futures::future;
use smartsense_core::config::Config;
use smartsense_core::ingest::TelemetryRouter;
use smartsense_core::mqtt;
use smartsense_core::pipeline::{build_pool, spawn_worker, BatchCommand, IngestStats, PipelineHandle};
use smartsense_core::registry::NodeRegistry;
use std::sync::Arc;
use std::sync::atomic::Ordering;
use tokio::sync::mpsc;

fn init_tracing() -> Result<()> {
    use tracing_subscriber::layer::SubscriberExt;
    use tracing_subscriber::util::SubscriberInitExt;

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "info,smartsense_core=info".into());
    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_target(true)
        .with_thread_ids(true);

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt_layer)
        .try_init()?;

    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::from_env()?;
    init_tracing()?;

    let pool = build_pool(&config.database_url, config.db_pool_size).await?;
    let stats = Arc::new(IngestStats::new());
    let (tx, rx) = mpsc::channel::<BatchCommand>(config.max_queue);
    let pipeline = PipelineHandle::new(tx, stats.clone());

    let _worker_handle = spawn_worker(
        pool.clone(),
        rx,
        stats.clone(),
        config.batch_size,
        config.flush_interval(),
    );

    let registry = NodeRegistry::new(pool);
    let router = TelemetryRouter::new(registry, pipeline.clone(), config.mqtt_topic_root.clone());

    // The sender side stays alive so control surfaces spawned later can
    // still push node commands through the listener.
    let (_command_tx, command_rx) = mqtt::command_channel();

    let mqtt_handle = if config.enable_mqtt_listener {
        let config_clone = config.clone();
        let router_clone = router.clone();
        Some(tokio::spawn(async move {
            mqtt::run_listener(config_clone, router_clone, command_rx).await
        }))
    } else {
        None
    };

    let heartbeat_handle = {
        let stats = stats.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(std::time::Duration::from_secs(60));
            loop {
                ticker.tick().await;
                tracing::debug!(
                    queue_depth = stats.queue_depth.load(Ordering::Relaxed),
                    last_batch = stats.last_batch_len.load(Ordering::Relaxed),
                    avg_flush_micros = stats.average_flush_micros.load(Ordering::Relaxed),
                    mqtt_connected = stats.mqtt_connected.load(Ordering::Relaxed),
                    "ingest heartbeat"
                );
            }
        })
    };

    tokio::select! {
        _ = async {
            if let Some(handle) = mqtt_handle {
                if let Err(err) = handle.await { tracing::warn!(error=%err, "MQTT task failed"); }
            } else {
                future::pending::<()>().await;
            }
        } => {}
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("shutdown signal received");
        }
    }

    heartbeat_handle.abort();
    drop(pipeline);

    Ok(())
}
