//! Canonical node identity and liveness.
//!
//! Nodes are store-resident records keyed by their external id; the
//! pipeline creates them implicitly on first contact and never deletes
//! them. Only this module mutates liveness and last-seen.

use crate::error::CoreError;
use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::{FromRow, PgPool};

#[derive(Debug, Clone, Serialize, FromRow)]
pub struct Node {
    pub id: i64,
    pub node_id: String,
    pub name: String,
    pub location: String,
    pub description: String,
    pub is_active: bool,
    pub last_seen: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

#[derive(Clone)]
pub struct NodeRegistry {
    pool: PgPool,
}

impl NodeRegistry {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Create-or-update in a single statement so concurrent status and
    /// sensor messages for the same node cannot lose updates. Only the
    /// fields supplied are patched; `last_seen` is monotonic so delayed
    /// messages cannot regress liveness tracking.
    pub async fn upsert_node(
        &self,
        node_id: &str,
        observed_at: DateTime<Utc>,
        location: Option<&str>,
        description: Option<&str>,
        liveness: Option<bool>,
    ) -> Result<Node, CoreError> {
        let node = sqlx::query_as::<_, Node>(
            r#"
            INSERT INTO nodes (node_id, name, location, description, is_active, last_seen)
            VALUES ($1, $1, COALESCE($3, 'Unknown'), COALESCE($4, ''), COALESCE($5, TRUE), $2)
            ON CONFLICT (node_id) DO UPDATE
            SET last_seen = GREATEST(nodes.last_seen, EXCLUDED.last_seen),
                location = COALESCE($3, nodes.location),
                description = COALESCE($4, nodes.description),
                is_active = COALESCE($5, nodes.is_active)
            RETURNING id, node_id, name, location, description, is_active, last_seen, created_at
            "#,
        )
        .bind(node_id)
        .bind(observed_at)
        .bind(location)
        .bind(description)
        .bind(liveness)
        .fetch_one(&self.pool)
        .await?;
        Ok(node)
    }

    pub async fn get_node(&self, node_id: &str) -> Result<Node, CoreError> {
        sqlx::query_as::<_, Node>(
            r#"
            SELECT id, node_id, name, location, description, is_active, last_seen, created_at
            FROM nodes
            WHERE node_id = $1
            "#,
        )
        .bind(node_id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| CoreError::NodeNotFound(node_id.to_string()))
    }

    pub async fn list_nodes(&self) -> Result<Vec<Node>, CoreError> {
        let nodes = sqlx::query_as::<_, Node>(
            r#"
            SELECT id, node_id, name, location, description, is_active, last_seen, created_at
            FROM nodes
            ORDER BY last_seen DESC
            "#,
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(nodes)
    }
}
