//! Telemetry core for SmartSense environmental sensor nodes.
//!
//! Field nodes publish status and sensor readings over MQTT; this crate
//! normalizes those messages into time-series rows in Postgres and serves
//! derived analytics (windowed statistics, anomaly insights, chart-ready
//! aggregates) over a plain async API. Network front-ends are expected to
//! live in a separate layer and call into [`analytics::Analytics`].

pub mod analytics;
pub mod config;
pub mod error;
pub mod ingest;
pub mod mqtt;
pub mod pipeline;
pub mod registry;
pub mod telemetry;
