//! Wire format for inbound node messages.
//!
//! Topics have the shape `{root}/{node_id}/{kind}` and payloads are JSON.
//! Payloads are decoded into a closed set of message kinds before any field
//! is touched; anything that does not match is rejected by the router.

use anyhow::Result;
use chrono::{DateTime, TimeZone, Utc};
use serde::Deserialize;
use std::collections::HashMap;

/// One normalized reading headed for the insert pipeline.
#[derive(Debug, Clone)]
pub struct ReadingRow {
    pub node_id: i64,
    pub sensor_type: String,
    pub metric_name: String,
    pub value: f64,
    pub unit: String,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeStatus {
    Online,
    Offline,
}

impl NodeStatus {
    pub fn is_online(self) -> bool {
        matches!(self, NodeStatus::Online)
    }
}

/// `{root}/{id}/status` payload.
#[derive(Debug, Deserialize)]
pub struct StatusPayload {
    pub status: NodeStatus,
    pub timestamp: i64,
    #[serde(default)]
    pub location: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
}

/// `{root}/{id}/sensors` payload: one envelope timestamp plus a map of
/// metric name to sample.
#[derive(Debug, Deserialize)]
pub struct SensorsPayload {
    pub timestamp: i64,
    pub sensors: HashMap<String, SensorEntry>,
}

#[derive(Debug, Deserialize)]
pub struct SensorEntry {
    pub value: WireValue,
    #[serde(default)]
    pub unit: String,
    #[serde(default)]
    pub timestamp: Option<i64>,
}

/// Sensor values arrive as numbers or as strings; some firmware also sends
/// qualitative text ("good", "excellent") which never becomes a reading.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub enum WireValue {
    Number(f64),
    Text(String),
    Other(serde_json::Value),
}

impl WireValue {
    /// Coerce to a finite float, parsing numeric strings. `None` means the
    /// metric is dropped without touching its siblings.
    pub fn as_finite_f64(&self) -> Option<f64> {
        let value = match self {
            WireValue::Number(value) => *value,
            WireValue::Text(text) => text.trim().parse::<f64>().ok()?,
            WireValue::Other(_) => return None,
        };
        value.is_finite().then_some(value)
    }
}

/// Split a topic into `(node_id, kind)`, requiring exactly three segments
/// under the configured root. The kind segment is not validated here so the
/// router can warn about unknown kinds separately from malformed shapes.
pub fn split_topic<'a>(topic_root: &str, topic: &'a str) -> Option<(&'a str, &'a str)> {
    let parts: Vec<&str> = topic.split('/').collect();
    if parts.len() != 3 || parts[0] != topic_root || parts[1].is_empty() {
        return None;
    }
    Some((parts[1], parts[2]))
}

pub fn decode_status(payload: &mut [u8]) -> Result<StatusPayload> {
    Ok(simd_json::from_slice(payload)?)
}

pub fn decode_sensors(payload: &mut [u8]) -> Result<SensorsPayload> {
    Ok(simd_json::from_slice(payload)?)
}

/// Resolve the instrument family for a metric. Namespaced metric names
/// ("BME680/temperature") carry their own family; bare names go through a
/// fixed table of known channels.
pub fn sensor_type_for(metric_name: &str) -> &str {
    if let Some((prefix, _)) = metric_name.split_once('/') {
        if !prefix.is_empty() {
            return prefix;
        }
    }
    match metric_name {
        "temperature" | "humidity" | "pressure" | "gas_resistance" | "air_quality_score" => {
            "BME680"
        }
        "co2" | "co2_level" => "SCD40",
        "pm1_0" | "pm2_5" | "pm10" | "pm2_5_aqi" => "PMS5003",
        "illuminance" | "light_level" => "BH1750",
        _ => "UNKNOWN",
    }
}

pub fn millis_to_dt(ms: i64) -> DateTime<Utc> {
    let secs = ms.div_euclid(1000);
    let nanos = (ms.rem_euclid(1000) * 1_000_000) as u32;
    Utc.timestamp_opt(secs, nanos)
        .single()
        .unwrap_or_else(Utc::now)
}
