mod router;

#[cfg(test)]
mod tests;

use crate::pipeline::{IngestStats, PipelineHandle};
use crate::registry::NodeRegistry;
use std::sync::Arc;

/// Turns one inbound transport message into node upserts and reading
/// inserts. Every per-message failure is contained here so a bad message
/// can never stop the stream.
#[derive(Clone)]
pub struct TelemetryRouter {
    registry: NodeRegistry,
    pipeline: PipelineHandle,
    topic_root: String,
}

impl TelemetryRouter {
    pub fn new(registry: NodeRegistry, pipeline: PipelineHandle, topic_root: impl Into<String>) -> Self {
        Self {
            registry,
            pipeline,
            topic_root: topic_root.into(),
        }
    }

    pub fn stats(&self) -> Arc<IngestStats> {
        self.pipeline.stats()
    }

    pub async fn flush(&self) -> anyhow::Result<()> {
        self.pipeline.flush().await
    }
}
