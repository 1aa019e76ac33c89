use super::Analytics;
use crate::error::CoreError;
use chrono::{DateTime, Utc};
use serde::Serialize;

pub const ANOMALY_WINDOW_HOURS: f64 = 24.0;
pub const DEVIATION_THRESHOLD: f64 = 2.0;

#[derive(Debug, Clone, Serialize)]
pub struct Anomaly {
    pub sensor_type: String,
    pub latest_value: f64,
    pub average: f64,
    pub stddev: f64,
    pub deviation: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct AnomalyReport {
    pub node_id: String,
    pub anomalies: Vec<Anomaly>,
    pub total_checked: usize,
    pub analyzed_at: DateTime<Utc>,
}

/// How many standard deviations the latest value sits from the mean.
/// `None` when the series has no spread, in which case any value is
/// considered ordinary.
pub(crate) fn deviation_from_mean(latest: f64, avg: f64, stddev: f64) -> Option<f64> {
    if stddev <= 0.0 {
        return None;
    }
    Some((latest - avg).abs() / stddev)
}

#[cfg(test)]
mod unit {
    use super::*;

    #[test]
    fn flat_series_is_never_anomalous() {
        assert!(deviation_from_mean(99.0, 10.0, 0.0).is_none());
        assert!(deviation_from_mean(99.0, 10.0, -1.0).is_none());
    }

    #[test]
    fn threshold_is_strict() {
        // avg 18, stddev 16, latest 50 sits exactly two deviations out.
        let deviation = deviation_from_mean(50.0, 18.0, 16.0).unwrap();
        assert_eq!(deviation, 2.0);
        assert!(deviation <= DEVIATION_THRESHOLD);
    }

    #[test]
    fn outliers_past_two_deviations_flag() {
        let deviation = deviation_from_mean(60.0, 18.0, 16.0).unwrap();
        assert!(deviation > DEVIATION_THRESHOLD);
    }

    #[test]
    fn deviation_is_two_sided() {
        let low = deviation_from_mean(-24.0, 18.0, 16.0).unwrap();
        assert!(low > DEVIATION_THRESHOLD);
    }
}

impl Analytics {
    /// Check every sensor type on a node against its trailing 24h
    /// baseline and persist a warning insight per flagged type.
    pub async fn detect_anomalies(&self, node_id: &str) -> Result<AnomalyReport, CoreError> {
        self.bounded("anomaly detection", self.detect_anomalies_inner(node_id))
            .await
    }

    async fn detect_anomalies_inner(&self, node_id: &str) -> Result<AnomalyReport, CoreError> {
        let node = self.registry.get_node(node_id).await?;

        let sensor_types: Vec<String> = sqlx::query_scalar(
            r#"
            SELECT DISTINCT sensor_type
            FROM sensor_readings
            WHERE node_id = $1
            ORDER BY sensor_type
            "#,
        )
        .bind(node.id)
        .fetch_all(&self.pool)
        .await?;

        let total_checked = sensor_types.len();
        let mut anomalies = Vec::new();

        for sensor_type in sensor_types {
            let Some(stats) = self
                .statistics_inner(&node.node_id, &sensor_type, ANOMALY_WINDOW_HOURS)
                .await?
            else {
                continue;
            };

            let Some(deviation) =
                deviation_from_mean(stats.latest.value, stats.avg, stats.stddev)
            else {
                continue;
            };
            if deviation <= DEVIATION_THRESHOLD {
                continue;
            }

            let anomaly = Anomaly {
                sensor_type: sensor_type.clone(),
                latest_value: stats.latest.value,
                average: stats.avg,
                stddev: stats.stddev,
                deviation,
            };
            tracing::info!(
                node = %node.node_id,
                sensor_type = %sensor_type,
                deviation,
                "anomalous sensor reading detected"
            );
            self.insert_insight(
                node.id,
                "anomaly",
                "warning",
                &format!("Anomaly in {}", sensor_type),
                &format!(
                    "Anomaly detected in {}: value {} deviates significantly from average {}",
                    sensor_type, stats.latest.value, stats.avg
                ),
                serde_json::to_value(&anomaly).unwrap_or_default(),
            )
            .await?;
            anomalies.push(anomaly);
        }

        Ok(AnomalyReport {
            node_id: node.node_id,
            anomalies,
            total_checked,
            analyzed_at: Utc::now(),
        })
    }
}
