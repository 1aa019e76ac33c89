use super::Analytics;
use crate::error::CoreError;
use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::{FromRow, Postgres, QueryBuilder};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum InsightType {
    Summary,
    Anomaly,
    Recommendation,
    Prediction,
    Alert,
}

impl InsightType {
    pub fn as_str(&self) -> &'static str {
        match self {
            InsightType::Summary => "summary",
            InsightType::Anomaly => "anomaly",
            InsightType::Recommendation => "recommendation",
            InsightType::Prediction => "prediction",
            InsightType::Alert => "alert",
        }
    }
}

#[derive(Debug, Clone, Serialize, FromRow)]
pub struct Insight {
    pub id: i64,
    pub node_id: i64,
    pub insight_type: String,
    pub title: String,
    pub description: String,
    pub severity: String,
    pub metadata: serde_json::Value,
    pub is_read: bool,
    pub created_at: DateTime<Utc>,
}

const INSIGHT_COLUMNS: &str =
    "id, node_id, insight_type, title, description, severity, metadata, is_read, created_at";

impl Analytics {
    pub(crate) async fn insert_insight(
        &self,
        node_db_id: i64,
        insight_type: &str,
        severity: &str,
        title: &str,
        description: &str,
        metadata: serde_json::Value,
    ) -> Result<i64, CoreError> {
        let id: i64 = sqlx::query_scalar(
            r#"
            INSERT INTO insights (node_id, insight_type, title, description, severity, metadata)
            VALUES ($1, $2, $3, $4, $5, $6)
            RETURNING id
            "#,
        )
        .bind(node_db_id)
        .bind(insight_type)
        .bind(title)
        .bind(description)
        .bind(severity)
        .bind(metadata)
        .fetch_one(&self.pool)
        .await?;
        Ok(id)
    }

    /// Newest-first insight log, optionally narrowed to one node or one
    /// insight type.
    pub async fn list_insights(
        &self,
        node_id: Option<&str>,
        insight_type: Option<InsightType>,
        limit: i64,
    ) -> Result<Vec<Insight>, CoreError> {
        self.bounded("insights query", async {
            let node_db_id = match node_id {
                Some(node_id) => Some(self.registry.get_node(node_id).await?.id),
                None => None,
            };

            let mut builder: QueryBuilder<Postgres> = QueryBuilder::new(format!(
                "SELECT {INSIGHT_COLUMNS} FROM insights WHERE TRUE"
            ));
            if let Some(id) = node_db_id {
                builder.push(" AND node_id = ").push_bind(id);
            }
            if let Some(insight_type) = insight_type {
                builder
                    .push(" AND insight_type = ")
                    .push_bind(insight_type.as_str());
            }
            builder
                .push(" ORDER BY created_at DESC LIMIT ")
                .push_bind(limit.clamp(1, 500));

            let insights = builder.build_query_as().fetch_all(&self.pool).await?;
            Ok(insights)
        })
        .await
    }

    pub async fn mark_insight_read(&self, insight_id: i64) -> Result<(), CoreError> {
        self.bounded("insight update", async {
            let result = sqlx::query("UPDATE insights SET is_read = TRUE WHERE id = $1")
                .bind(insight_id)
                .execute(&self.pool)
                .await?;
            if result.rows_affected() == 0 {
                return Err(CoreError::InsightNotFound(insight_id));
            }
            Ok(())
        })
        .await
    }
}
