// PUBLISH_MATERIAL: render a resource's Markdown through the
// document-conversion pipeline and store the output file.

use std::sync::Arc;

use async_trait::async_trait;
use lumen_core::error::Result;
use lumen_core::job::{Job, JobType, UsageMetrics};
use lumen_queue::{HandlerContext, JobHandler};
use lumen_storage::Database;
use uuid::Uuid;

use crate::external::MarkdownPipeline;
use crate::payload::{parse_payload, PublishMaterialPayload};

pub struct PublishMaterialHandler {
    db: Database,
    pipeline: Arc<dyn MarkdownPipeline>,
}

impl PublishMaterialHandler {
    pub fn new(db: Database, pipeline: Arc<dyn MarkdownPipeline>) -> Self {
        Self { db, pipeline }
    }
}

#[async_trait]
impl JobHandler for PublishMaterialHandler {
    fn job_type(&self) -> JobType {
        JobType::PublishMaterial
    }

    async fn handle(&self, job: Job, ctx: HandlerContext) -> Result<serde_json::Value> {
        let payload: PublishMaterialPayload = parse_payload(&job.payload)?;

        // Idempotence: reuse a prior completed publish of the same tuple
        // rather than re-rendering.
        if let Some(previous) = self
            .db
            .find_completed_publish(
                payload.resource_kind.as_str(),
                payload.resource_id,
                payload.format.as_str(),
                payload.include_images,
            )
            .await?
        {
            if let Some(result) = previous.result {
                return Ok(result);
            }
        }

        let markdown = self
            .db
            .resource_markdown(payload.resource_kind.as_str(), payload.resource_id)
            .await?;

        ctx.progress
            .report(25, Some("loaded source markdown"), None, UsageMetrics::default())
            .await?;

        let enriched = self
            .pipeline
            .enrich_with_cited_images(&markdown, payload.include_images)
            .await?;

        ctx.progress
            .report(60, Some("enriched with cited images"), None, UsageMetrics::default())
            .await?;

        let export_id = Uuid::now_v7();
        let file_path = self
            .pipeline
            .convert_and_store(&enriched, payload.format.as_str(), export_id)
            .await?;

        ctx.progress
            .report(100, Some("converted"), None, UsageMetrics::default())
            .await?;

        Ok(serde_json::json!({ "file_path": file_path.to_string_lossy() }))
    }
}
