//! Read-side analytics over stored readings: summary statistics, chart
//! series, anomaly detection and the insight log.

mod anomaly;
mod chart;
mod insights;
mod stats;


pub use anomaly::{Anomaly, AnomalyReport, ANOMALY_WINDOW_HOURS, DEVIATION_THRESHOLD};
pub use chart::{Chart, ChartPoint, ChartQuery, ChartSeries};
pub use insights::{Insight, InsightType};
pub use stats::{CurrentReading, LatestReading, SensorStatistics, SensorTypeEntry};

use crate::error::CoreError;
use crate::registry::NodeRegistry;
use sqlx::PgPool;
use std::future::Future;
use std::time::Duration;

#[derive(Clone)]
pub struct Analytics {
    pool: PgPool,
    registry: NodeRegistry,
    query_timeout: Duration,
}

impl Analytics {
    pub fn new(pool: PgPool, query_timeout: Duration) -> Self {
        let registry = NodeRegistry::new(pool.clone());
        Self {
            pool,
            registry,
            query_timeout,
        }
    }

    /// Wrap one public query in the configured deadline so a slow or
    /// wedged statement surfaces as a typed timeout instead of hanging
    /// the caller.
    async fn bounded<T>(
        &self,
        what: &'static str,
        fut: impl Future<Output = Result<T, CoreError>>,
    ) -> Result<T, CoreError> {
        tokio::time::timeout(self.query_timeout, fut)
            .await
            .map_err(|_| CoreError::Timeout(what))?
    }
}

pub(crate) fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}
