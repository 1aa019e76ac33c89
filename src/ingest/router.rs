use super::TelemetryRouter;
use crate::telemetry::{self, ReadingRow, SensorsPayload, StatusPayload};
use anyhow::Result;

impl TelemetryRouter {
    /// Route one transport message. Never returns an error: malformed
    /// topics, unknown kinds, undecodable payloads and per-metric junk are
    /// logged and dropped; storage failures are logged per message.
    pub async fn route(&self, topic: &str, payload: &mut [u8]) {
        let Some((node_id, kind)) = telemetry::split_topic(&self.topic_root, topic) else {
            tracing::warn!(topic = %topic, "discarding message with malformed topic");
            return;
        };

        match kind {
            "status" => match telemetry::decode_status(payload) {
                Ok(status) => {
                    if let Err(err) = self.handle_status(node_id, status).await {
                        tracing::error!(error = %err, node = %node_id, "failed to apply status message");
                    }
                }
                Err(err) => {
                    tracing::warn!(error = %err, node = %node_id, "failed to decode status payload")
                }
            },
            "sensors" => match telemetry::decode_sensors(payload) {
                Ok(data) => {
                    if let Err(err) = self.handle_sensors(node_id, data).await {
                        tracing::error!(error = %err, node = %node_id, "failed to ingest sensor data");
                    }
                }
                Err(err) => {
                    tracing::warn!(error = %err, node = %node_id, "failed to decode sensors payload")
                }
            },
            other => {
                tracing::warn!(topic = %topic, kind = %other, "discarding message with unknown kind")
            }
        }
    }

    async fn handle_status(&self, node_id: &str, status: StatusPayload) -> Result<()> {
        let observed_at = telemetry::millis_to_dt(status.timestamp);
        let node = self
            .registry
            .upsert_node(
                node_id,
                observed_at,
                status.location.as_deref(),
                status.description.as_deref(),
                Some(status.status.is_online()),
            )
            .await?;
        tracing::info!(node = %node.node_id, online = node.is_active, "node status updated");
        Ok(())
    }

    async fn handle_sensors(&self, node_id: &str, data: SensorsPayload) -> Result<()> {
        let envelope_ts = telemetry::millis_to_dt(data.timestamp);
        // Liveness is untouched here; only last-seen moves forward.
        let node = self
            .registry
            .upsert_node(node_id, envelope_ts, None, None, None)
            .await?;

        let mut batch = Vec::with_capacity(data.sensors.len());
        for (metric_name, entry) in data.sensors {
            let Some(value) = entry.value.as_finite_f64() else {
                tracing::debug!(node = %node_id, metric = %metric_name, "skipping non-numeric sensor value");
                continue;
            };
            let timestamp = entry
                .timestamp
                .map(telemetry::millis_to_dt)
                .unwrap_or(envelope_ts);
            batch.push(ReadingRow {
                node_id: node.id,
                sensor_type: telemetry::sensor_type_for(&metric_name).to_string(),
                metric_name,
                value,
                unit: entry.unit,
                timestamp,
            });
        }

        if batch.is_empty() {
            return Ok(());
        }

        let queued = batch.len();
        for reading in batch {
            self.pipeline.enqueue(reading).await?;
        }
        tracing::debug!(node = %node_id, queued, "queued sensor readings");
        Ok(())
    }
}
