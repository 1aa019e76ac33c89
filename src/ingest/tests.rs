use super::TelemetryRouter;
use crate::pipeline::{spawn_worker, BatchCommand, IngestStats, PipelineHandle};
use crate::registry::NodeRegistry;
use anyhow::Result;
use serde_json::json;
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use std::env;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::time::Duration;

async fn setup_test_pool(database_url: &str, schema: &str) -> Result<PgPool> {
    let admin_pool = PgPoolOptions::new()
        .max_connections(1)
        .connect(database_url)
        .await?;
    sqlx::query(&format!("CREATE SCHEMA IF NOT EXISTS {}", schema))
        .execute(&admin_pool)
        .await?;
    drop(admin_pool);

    let schema_name = schema.to_string();
    let pool = PgPoolOptions::new()
        .max_connections(5)
        .after_connect(move |conn, _meta| {
            let schema = schema_name.clone();
            Box::pin(async move {
                sqlx::query(&format!("SET search_path TO {}", schema))
                    .execute(conn)
                    .await?;
                Ok(())
            })
        })
        .connect(database_url)
        .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS nodes (
            id bigserial primary key,
            node_id text not null unique,
            name text not null,
            location text not null default 'Unknown',
            description text not null default '',
            is_active boolean not null default true,
            last_seen timestamptz not null,
            created_at timestamptz not null default now()
        )
        "#,
    )
    .execute(&pool)
    .await?;
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS sensor_readings (
            id bigserial primary key,
            node_id bigint not null,
            sensor_type text not null,
            metric_name text not null,
            value double precision not null,
            unit text not null default '',
            timestamp timestamptz not null,
            unique (node_id, metric_name, timestamp)
        )
        "#,
    )
    .execute(&pool)
    .await?;
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS insights (
            id bigserial primary key,
            node_id bigint not null,
            insight_type text not null,
            title text not null,
            description text not null,
            severity text not null default 'info',
            metadata jsonb not null default '{}'::jsonb,
            is_read boolean not null default false,
            created_at timestamptz not null default now()
        )
        "#,
    )
    .execute(&pool)
    .await?;

    Ok(pool)
}

async fn drop_test_schema(database_url: &str, schema: &str) -> Result<()> {
    let admin_pool = PgPoolOptions::new()
        .max_connections(1)
        .connect(database_url)
        .await?;
    let _ = sqlx::query(&format!("DROP SCHEMA IF EXISTS {} CASCADE", schema))
        .execute(&admin_pool)
        .await;
    Ok(())
}

fn build_router(pool: &PgPool) -> TelemetryRouter {
    let stats = Arc::new(IngestStats::new());
    let (tx, rx) = mpsc::channel::<BatchCommand>(64);
    let pipeline = PipelineHandle::new(tx, stats.clone());
    let _worker = spawn_worker(pool.clone(), rx, stats, 5, Duration::from_millis(25));
    TelemetryRouter::new(NodeRegistry::new(pool.clone()), pipeline, "smartsense")
}

#[tokio::test]
async fn test_status_message_upserts_node_with_monotonic_last_seen() -> Result<()> {
    if env::var("SMARTSENSE_INTEGRATION_TEST").ok().as_deref() != Some("1") {
        return Ok(());
    }
    let database_url = match env::var("SMARTSENSE_TEST_DATABASE_URL") {
        Ok(value) => value,
        Err(_) => return Ok(()),
    };

    let schema = format!("smartsense_test_status_{}", std::process::id());
    let pool = setup_test_pool(&database_url, &schema).await?;
    let router = build_router(&pool);

    let fresh_ms: i64 = 1_700_000_100_000;
    let stale_ms: i64 = 1_700_000_000_000;

    let mut payload = serde_json::to_vec(&json!({
        "status": "online",
        "timestamp": fresh_ms,
        "location": "Greenhouse 2"
    }))?;
    router.route("smartsense/NODE001/status", &mut payload).await;

    // A delayed offline report still patches liveness but cannot move
    // last_seen backwards.
    let mut stale = serde_json::to_vec(&json!({
        "status": "offline",
        "timestamp": stale_ms
    }))?;
    router.route("smartsense/NODE001/status", &mut stale).await;

    let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM nodes WHERE node_id = 'NODE001'")
        .fetch_one(&pool)
        .await?;
    assert_eq!(count, 1);

    let (is_active, location, last_seen_ms): (bool, String, i64) = sqlx::query_as(
        r#"
        SELECT is_active, location, (extract(epoch FROM last_seen) * 1000)::bigint
        FROM nodes WHERE node_id = 'NODE001'
        "#,
    )
    .fetch_one(&pool)
    .await?;
    assert!(!is_active);
    assert_eq!(location, "Greenhouse 2");
    assert_eq!(last_seen_ms, fresh_ms);

    drop_test_schema(&database_url, &schema).await?;
    Ok(())
}

#[tokio::test]
async fn test_sensors_message_persists_numeric_metrics_only() -> Result<()> {
    if env::var("SMARTSENSE_INTEGRATION_TEST").ok().as_deref() != Some("1") {
        return Ok(());
    }
    let database_url = match env::var("SMARTSENSE_TEST_DATABASE_URL") {
        Ok(value) => value,
        Err(_) => return Ok(()),
    };

    let schema = format!("smartsense_test_sensors_{}", std::process::id());
    let pool = setup_test_pool(&database_url, &schema).await?;
    let router = build_router(&pool);

    let ts_ms: i64 = 1_700_000_200_000;
    let mut payload = serde_json::to_vec(&json!({
        "timestamp": ts_ms,
        "sensors": {
            "temperature": { "value": 23.5, "unit": "C" },
            "co2": { "value": "412", "unit": "ppm" },
            "air_quality": { "value": "good" }
        }
    }))?;
    router.route("smartsense/NODE001/sensors", &mut payload).await;
    router.flush().await?;

    let rows: Vec<(String, String, f64, String)> = sqlx::query_as(
        r#"
        SELECT r.sensor_type, r.metric_name, r.value, r.unit
        FROM sensor_readings r
        JOIN nodes n ON n.id = r.node_id
        WHERE n.node_id = 'NODE001'
        ORDER BY r.metric_name
        "#,
    )
    .fetch_all(&pool)
    .await?;

    assert_eq!(rows.len(), 2);
    assert_eq!(
        rows[0],
        ("SCD40".to_string(), "co2".to_string(), 412.0, "ppm".to_string())
    );
    assert_eq!(
        rows[1],
        ("BME680".to_string(), "temperature".to_string(), 23.5, "C".to_string())
    );

    // Redelivery of the same message is absorbed by the insert conflict.
    let mut replay = serde_json::to_vec(&json!({
        "timestamp": ts_ms,
        "sensors": {
            "temperature": { "value": 23.5, "unit": "C" }
        }
    }))?;
    router.route("smartsense/NODE001/sensors", &mut replay).await;
    router.flush().await?;

    let count: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM sensor_readings WHERE metric_name = 'temperature'",
    )
    .fetch_one(&pool)
    .await?;
    assert_eq!(count, 1);

    drop_test_schema(&database_url, &schema).await?;
    Ok(())
}

#[tokio::test]
async fn test_malformed_topics_and_payloads_create_nothing() -> Result<()> {
    if env::var("SMARTSENSE_INTEGRATION_TEST").ok().as_deref() != Some("1") {
        return Ok(());
    }
    let database_url = match env::var("SMARTSENSE_TEST_DATABASE_URL") {
        Ok(value) => value,
        Err(_) => return Ok(()),
    };

    let schema = format!("smartsense_test_malformed_{}", std::process::id());
    let pool = setup_test_pool(&database_url, &schema).await?;
    let router = build_router(&pool);

    let mut ok_body = serde_json::to_vec(&json!({
        "status": "online",
        "timestamp": 1_700_000_000_000i64
    }))?;
    router.route("othersystem/NODE001/status", &mut ok_body.clone()).await;
    router.route("smartsense/NODE001/firmware", &mut ok_body.clone()).await;
    router.route("smartsense/NODE001/status/extra", &mut ok_body).await;

    let mut junk = b"not json".to_vec();
    router.route("smartsense/NODE001/status", &mut junk).await;
    router.flush().await?;

    let node_count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM nodes")
        .fetch_one(&pool)
        .await?;
    let reading_count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM sensor_readings")
        .fetch_one(&pool)
        .await?;
    assert_eq!(node_count, 0);
    assert_eq!(reading_count, 0);

    drop_test_schema(&database_url, &schema).await?;
    Ok(())
}
