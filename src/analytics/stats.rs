use super::{round2, Analytics};
use crate::error::CoreError;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::Serialize;
use sqlx::FromRow;

#[derive(Debug, Clone, Serialize, FromRow)]
pub struct LatestReading {
    pub metric_name: String,
    pub value: f64,
    pub unit: String,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SensorStatistics {
    pub node_id: String,
    pub sensor_type: String,
    pub period: String,
    pub count: usize,
    pub avg: f64,
    pub min: f64,
    pub max: f64,
    pub stddev: f64,
    pub latest: LatestReading,
}

/// Most recent value per (sensor_type, metric_name) pair on a node.
#[derive(Debug, Clone, Serialize, FromRow)]
pub struct CurrentReading {
    pub sensor_type: String,
    pub metric_name: String,
    pub value: f64,
    pub unit: String,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, FromRow)]
pub struct SensorTypeEntry {
    pub sensor_type: String,
    pub metric_name: String,
    pub unit: String,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) struct Summary {
    pub avg: f64,
    pub min: f64,
    pub max: f64,
    pub stddev: f64,
}

/// Population statistics over the sample set. `None` iff empty.
pub(crate) fn summarize(values: &[f64]) -> Option<Summary> {
    if values.is_empty() {
        return None;
    }
    let count = values.len() as f64;
    let avg = values.iter().sum::<f64>() / count;
    let min = values.iter().copied().fold(f64::INFINITY, f64::min);
    let max = values.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    let variance = values.iter().map(|v| (v - avg).powi(2)).sum::<f64>() / count;
    Some(Summary {
        avg,
        min,
        max,
        stddev: variance.sqrt(),
    })
}

#[derive(FromRow)]
struct StatRow {
    metric_name: String,
    value: f64,
    unit: String,
    timestamp: DateTime<Utc>,
}

#[cfg(test)]
mod unit {
    use super::*;
    use crate::analytics::round2;

    #[test]
    fn summarize_empty_is_none() {
        assert!(summarize(&[]).is_none());
    }

    #[test]
    fn summarize_uses_population_stddev() {
        let summary = summarize(&[10.0, 10.0, 10.0, 10.0, 50.0]).unwrap();
        assert_eq!(summary.avg, 18.0);
        assert_eq!(summary.min, 10.0);
        assert_eq!(summary.max, 50.0);
        assert_eq!(summary.stddev, 16.0);
    }

    #[test]
    fn summarize_single_value() {
        let summary = summarize(&[23.5]).unwrap();
        assert_eq!(summary.avg, 23.5);
        assert_eq!(summary.min, 23.5);
        assert_eq!(summary.max, 23.5);
        assert_eq!(summary.stddev, 0.0);
    }

    #[test]
    fn round2_truncates_to_cents() {
        assert_eq!(round2(16.666_666), 16.67);
        assert_eq!(round2(0.004), 0.0);
        assert_eq!(round2(18.0), 18.0);
    }
}

impl Analytics {
    /// Summary statistics for one sensor type over a trailing window.
    /// `Ok(None)` when the node exists but produced no readings in the
    /// window.
    pub async fn statistics(
        &self,
        node_id: &str,
        sensor_type: &str,
        window_hours: f64,
    ) -> Result<Option<SensorStatistics>, CoreError> {
        self.bounded(
            "statistics query",
            self.statistics_inner(node_id, sensor_type, window_hours),
        )
        .await
    }

    pub(super) async fn statistics_inner(
        &self,
        node_id: &str,
        sensor_type: &str,
        window_hours: f64,
    ) -> Result<Option<SensorStatistics>, CoreError> {
        let node = self.registry.get_node(node_id).await?;
        let end = Utc::now();
        let start =
            end - ChronoDuration::milliseconds((window_hours * 3_600_000.0).round() as i64);

        let rows = sqlx::query_as::<_, StatRow>(
            r#"
            SELECT metric_name, value, unit, timestamp
            FROM sensor_readings
            WHERE node_id = $1 AND sensor_type = $2
              AND timestamp >= $3 AND timestamp <= $4
            ORDER BY timestamp ASC
            "#,
        )
        .bind(node.id)
        .bind(sensor_type)
        .bind(start)
        .bind(end)
        .fetch_all(&self.pool)
        .await?;

        let values: Vec<f64> = rows.iter().map(|row| row.value).collect();
        let Some(summary) = summarize(&values) else {
            return Ok(None);
        };
        // Non-empty per the guard above.
        let last = rows.last().expect("rows are non-empty");

        Ok(Some(SensorStatistics {
            node_id: node.node_id,
            sensor_type: sensor_type.to_string(),
            period: format!("{} hours", window_hours),
            count: rows.len(),
            avg: round2(summary.avg),
            min: round2(summary.min),
            max: round2(summary.max),
            stddev: round2(summary.stddev),
            latest: LatestReading {
                metric_name: last.metric_name.clone(),
                value: last.value,
                unit: last.unit.clone(),
                timestamp: last.timestamp,
            },
        }))
    }

    /// Latest reading per metric on a node, across all its sensors.
    pub async fn current_values(&self, node_id: &str) -> Result<Vec<CurrentReading>, CoreError> {
        self.bounded("current values query", async {
            let node = self.registry.get_node(node_id).await?;
            let rows = sqlx::query_as::<_, CurrentReading>(
                r#"
                SELECT DISTINCT ON (sensor_type, metric_name)
                       sensor_type, metric_name, value, unit, timestamp
                FROM sensor_readings
                WHERE node_id = $1
                ORDER BY sensor_type, metric_name, timestamp DESC
                "#,
            )
            .bind(node.id)
            .fetch_all(&self.pool)
            .await?;
            Ok(rows)
        })
        .await
    }

    /// Distinct (sensor_type, metric_name, unit) triples a node has ever
    /// reported.
    pub async fn sensor_types(&self, node_id: &str) -> Result<Vec<SensorTypeEntry>, CoreError> {
        self.bounded("sensor types query", async {
            let node = self.registry.get_node(node_id).await?;
            let rows = sqlx::query_as::<_, SensorTypeEntry>(
                r#"
                SELECT DISTINCT sensor_type, metric_name, unit
                FROM sensor_readings
                WHERE node_id = $1
                ORDER BY sensor_type, metric_name
                "#,
            )
            .bind(node.id)
            .fetch_all(&self.pool)
            .await?;
            Ok(rows)
        })
        .await
    }
}
