use thiserror::Error;

/// Typed failures surfaced by the analytics query surface and the node
/// registry. Ingestion-side code contains its failures locally and only
/// logs them; callers of the query surface get one of these instead so the
/// outer layer can map them onto its own failure representation.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("node {0} not found")]
    NodeNotFound(String),

    #[error("insight {0} not found")]
    InsightNotFound(i64),

    #[error("storage error: {0}")]
    Storage(#[from] sqlx::Error),

    #[error("{0} timed out")]
    Timeout(&'static str),
}
