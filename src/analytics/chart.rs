use super::{round2, Analytics};
use crate::error::CoreError;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::Serialize;
use sqlx::{FromRow, Postgres, QueryBuilder};

/// Parameters for one chart build. Explicit bounds win over the
/// trailing-hours shorthand; `realtime` skips bucketing and returns raw
/// rows.
#[derive(Debug, Clone)]
pub struct ChartQuery {
    pub sensor_type: Option<String>,
    pub metric_name: Option<String>,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
    pub hours: f64,
    pub points: u32,
    pub realtime: bool,
}

impl Default for ChartQuery {
    fn default() -> Self {
        Self {
            sensor_type: None,
            metric_name: None,
            start_time: None,
            end_time: None,
            hours: 24.0,
            points: 100,
            realtime: false,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ChartPoint {
    pub timestamp: DateTime<Utc>,
    pub value: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct ChartSeries {
    pub sensor_type: String,
    pub metric_name: String,
    pub unit: String,
    pub data: Vec<ChartPoint>,
}

#[derive(Debug, Clone, Serialize)]
pub struct Chart {
    pub node_id: String,
    pub node_name: String,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub interval_minutes: i64,
    pub sensors: Vec<ChartSeries>,
}

/// Resolve the query window. Explicit bounds are honored as given; a
/// missing start falls back `hours` before the end, a missing end falls
/// forward `hours` after the start or to now.
pub(crate) fn resolve_time_range(
    now: DateTime<Utc>,
    start: Option<DateTime<Utc>>,
    end: Option<DateTime<Utc>>,
    hours: f64,
) -> (DateTime<Utc>, DateTime<Utc>) {
    let span = ChronoDuration::milliseconds((hours * 3_600_000.0).round() as i64);
    match (start, end) {
        (Some(start), Some(end)) => (start, end),
        (Some(start), None) => (start, start + span),
        (None, Some(end)) => (end - span, end),
        (None, None) => (now - span, now),
    }
}

/// Bucket width that keeps the series at or under the point budget.
pub(crate) fn bucket_interval_minutes(range_ms: i64, points: u32) -> i64 {
    let per_point = points.max(1) as i64 * 60_000;
    (range_ms + per_point - 1) / per_point.max(1)
}

#[derive(FromRow)]
struct SeriesKey {
    sensor_type: String,
    metric_name: String,
    unit: String,
}

#[derive(FromRow)]
struct RawPoint {
    timestamp: DateTime<Utc>,
    value: f64,
}

#[derive(FromRow)]
struct BucketPoint {
    bucket: DateTime<Utc>,
    avg_value: f64,
}

#[cfg(test)]
mod unit {
    use super::*;
    use chrono::TimeZone;

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(secs, 0).unwrap()
    }

    #[test]
    fn explicit_bounds_win() {
        let now = at(10_000);
        let (start, end) = resolve_time_range(now, Some(at(100)), Some(at(200)), 24.0);
        assert_eq!((start, end), (at(100), at(200)));
    }

    #[test]
    fn missing_end_extends_forward_from_start() {
        let now = at(10_000);
        let (start, end) = resolve_time_range(now, Some(at(100)), None, 1.0);
        assert_eq!(start, at(100));
        assert_eq!(end, at(100) + ChronoDuration::hours(1));
    }

    #[test]
    fn missing_start_reaches_back_from_end() {
        let now = at(10_000);
        let (start, end) = resolve_time_range(now, None, Some(at(7_200)), 1.0);
        assert_eq!(end, at(7_200));
        assert_eq!(start, at(7_200) - ChronoDuration::hours(1));
    }

    #[test]
    fn default_window_ends_now() {
        let now = at(100_000);
        let (start, end) = resolve_time_range(now, None, None, 24.0);
        assert_eq!(end, now);
        assert_eq!(start, now - ChronoDuration::hours(24));
    }

    #[test]
    fn fractional_hours_resolve_to_millis() {
        let now = at(10_000);
        let (start, end) = resolve_time_range(now, None, None, 0.25);
        assert_eq!(end - start, ChronoDuration::minutes(15));
    }

    #[test]
    fn one_hour_at_sixty_points_is_one_minute() {
        assert_eq!(bucket_interval_minutes(3_600_000, 60), 1);
    }

    #[test]
    fn interval_rounds_up() {
        // 90 minutes over 60 points needs 2-minute buckets.
        assert_eq!(bucket_interval_minutes(5_400_000, 60), 2);
    }

    #[test]
    fn zero_points_is_clamped() {
        assert_eq!(bucket_interval_minutes(3_600_000, 0), 60);
    }

    #[test]
    fn bucket_count_stays_within_budget() {
        for range_ms in [1i64, 59_999, 60_000, 3_600_000, 86_400_000, 2_592_000_000] {
            for points in [1u32, 50, 100, 500] {
                let mins = bucket_interval_minutes(range_ms, points).max(1);
                let buckets = (range_ms + mins * 60_000 - 1) / (mins * 60_000);
                assert!(
                    buckets <= points as i64,
                    "range {range_ms} points {points} gave {buckets} buckets"
                );
            }
        }
    }
}

impl Analytics {
    /// One series per metric active in the window, bucket-averaged to at
    /// most `points` samples unless the query asks for raw rows.
    pub async fn build_chart(&self, node_id: &str, query: &ChartQuery) -> Result<Chart, CoreError> {
        self.bounded("chart query", self.build_chart_inner(node_id, query))
            .await
    }

    async fn build_chart_inner(
        &self,
        node_id: &str,
        query: &ChartQuery,
    ) -> Result<Chart, CoreError> {
        let node = self.registry.get_node(node_id).await?;
        let (start, end) =
            resolve_time_range(Utc::now(), query.start_time, query.end_time, query.hours);
        let range_ms = (end - start).num_milliseconds().max(1);
        let interval_minutes = bucket_interval_minutes(range_ms, query.points).max(1);

        let mut discovery: QueryBuilder<Postgres> = QueryBuilder::new(
            "SELECT DISTINCT sensor_type, metric_name, unit \
             FROM sensor_readings WHERE node_id = ",
        );
        discovery.push_bind(node.id);
        discovery.push(" AND timestamp >= ").push_bind(start);
        discovery.push(" AND timestamp <= ").push_bind(end);
        if let Some(sensor_type) = &query.sensor_type {
            discovery.push(" AND sensor_type = ").push_bind(sensor_type);
        }
        if let Some(metric_name) = &query.metric_name {
            discovery.push(" AND metric_name = ").push_bind(metric_name);
        }
        discovery.push(" ORDER BY sensor_type, metric_name");
        let keys: Vec<SeriesKey> = discovery
            .build_query_as()
            .fetch_all(&self.pool)
            .await?;

        let mut sensors = Vec::with_capacity(keys.len());
        for key in keys {
            let data = if query.realtime {
                let rows = sqlx::query_as::<_, RawPoint>(
                    r#"
                    SELECT timestamp, value
                    FROM sensor_readings
                    WHERE node_id = $1 AND sensor_type = $2 AND metric_name = $3
                      AND timestamp >= $4 AND timestamp <= $5
                    ORDER BY timestamp ASC
                    "#,
                )
                .bind(node.id)
                .bind(&key.sensor_type)
                .bind(&key.metric_name)
                .bind(start)
                .bind(end)
                .fetch_all(&self.pool)
                .await?;
                rows.into_iter()
                    .map(|row| ChartPoint {
                        timestamp: row.timestamp,
                        value: round2(row.value),
                    })
                    .collect()
            } else {
                // Buckets are anchored at the window start; the half-open
                // upper bound keeps the series within the point budget.
                let rows = sqlx::query_as::<_, BucketPoint>(
                    r#"
                    SELECT date_bin(make_interval(mins => $6::int), timestamp, $4) AS bucket,
                           AVG(value) AS avg_value
                    FROM sensor_readings
                    WHERE node_id = $1 AND sensor_type = $2 AND metric_name = $3
                      AND timestamp >= $4 AND timestamp < $5
                    GROUP BY bucket
                    ORDER BY bucket ASC
                    "#,
                )
                .bind(node.id)
                .bind(&key.sensor_type)
                .bind(&key.metric_name)
                .bind(start)
                .bind(end)
                .bind(interval_minutes as i32)
                .fetch_all(&self.pool)
                .await?;
                rows.into_iter()
                    .map(|row| ChartPoint {
                        timestamp: row.bucket,
                        value: round2(row.avg_value),
                    })
                    .collect()
            };

            sensors.push(ChartSeries {
                sensor_type: key.sensor_type,
                metric_name: key.metric_name,
                unit: key.unit,
                data,
            });
        }

        Ok(Chart {
            node_id: node.node_id,
            node_name: node.name,
            start_time: start,
            end_time: end,
            interval_minutes,
            sensors,
        })
    }
}
