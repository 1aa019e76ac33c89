use anyhow::{Context, Result};
use dotenvy::dotenv;
use std::env;
use std::time::Duration;

#[derive(Clone, Debug)]
pub struct Config {
    pub database_url: String,
    pub db_pool_size: u32,
    pub mqtt_host: String,
    pub mqtt_port: u16,
    pub mqtt_username: Option<String>,
    pub mqtt_password: Option<String>,
    pub mqtt_topic_root: String,
    pub mqtt_keepalive_secs: u64,
    pub mqtt_client_id: String,
    pub batch_size: usize,
    pub flush_interval_ms: u64,
    pub max_queue: usize,
    pub enable_mqtt_listener: bool,
    pub query_timeout_secs: u64,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        dotenv().ok();

        let database_url = env::var("SMARTSENSE_DATABASE_URL")
            .or_else(|_| env::var("DATABASE_URL"))
            .ok()
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty())
            .context("SMARTSENSE_DATABASE_URL or DATABASE_URL is required")?;

        let mqtt_host =
            env::var("SMARTSENSE_MQTT_HOST").unwrap_or_else(|_| "127.0.0.1".to_string());
        let mqtt_port = env::var("SMARTSENSE_MQTT_PORT")
            .ok()
            .and_then(|v| v.parse::<u16>().ok())
            .unwrap_or(1883);
        let mqtt_username = env::var("SMARTSENSE_MQTT_USERNAME").ok();
        let mqtt_password = env::var("SMARTSENSE_MQTT_PASSWORD").ok();
        let mqtt_topic_root =
            env::var("SMARTSENSE_MQTT_TOPIC_ROOT").unwrap_or_else(|_| "smartsense".to_string());
        let mqtt_keepalive_secs = env::var("SMARTSENSE_MQTT_KEEPALIVE_SECS")
            .ok()
            .and_then(|v| v.parse::<u64>().ok())
            .unwrap_or(30);
        let mqtt_client_id = env::var("SMARTSENSE_MQTT_CLIENT_ID")
            .unwrap_or_else(|_| format!("smartsense-core-{}", std::process::id()));

        let batch_size = env::var("SMARTSENSE_BATCH_SIZE")
            .ok()
            .and_then(|v| v.parse::<usize>().ok())
            .unwrap_or(500);
        let flush_interval_ms = env::var("SMARTSENSE_FLUSH_INTERVAL_MS")
            .ok()
            .and_then(|v| v.parse::<u64>().ok())
            .unwrap_or(750);
        let max_queue = env::var("SMARTSENSE_MAX_QUEUE")
            .ok()
            .and_then(|v| v.parse::<usize>().ok())
            .unwrap_or(batch_size * 10);
        let db_pool_size = env::var("SMARTSENSE_DB_POOL_SIZE")
            .ok()
            .and_then(|v| v.parse::<u32>().ok())
            .unwrap_or(10);

        let enable_mqtt_listener = env::var("SMARTSENSE_ENABLE_MQTT")
            .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
            .unwrap_or(true);
        let query_timeout_secs = env::var("SMARTSENSE_QUERY_TIMEOUT_SECS")
            .ok()
            .and_then(|v| v.parse::<u64>().ok())
            .unwrap_or(30);

        Ok(Self {
            database_url,
            db_pool_size,
            mqtt_host,
            mqtt_port,
            mqtt_username,
            mqtt_password,
            mqtt_topic_root,
            mqtt_keepalive_secs,
            mqtt_client_id,
            batch_size,
            flush_interval_ms,
            max_queue,
            enable_mqtt_listener,
            query_timeout_secs,
        })
    }

    pub fn flush_interval(&self) -> Duration {
        Duration::from_millis(self.flush_interval_ms)
    }

    pub fn mqtt_keepalive(&self) -> Duration {
        Duration::from_secs(self.mqtt_keepalive_secs)
    }

    pub fn query_timeout(&self) -> Duration {
        Duration::from_secs(self.query_timeout_secs)
    }
}
