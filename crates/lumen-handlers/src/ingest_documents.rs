// INGEST_DOCUMENTS: convert to PDF if needed, rasterize pages,
// interpret each page with a vision-capable chat call, persist sorted by
// page number.

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64_STANDARD;
use base64::Engine;
use futures::StreamExt;
use lumen_core::config::{HandlerConfig, TaskModelTable};
use lumen_core::error::{PipelineError, Result};
use lumen_core::job::{Job, JobType, UsageMetrics};
use lumen_providers::{ChatContentPart, ChatMessage, ChatProvider, ChatRequest, ChatRole};
use lumen_queue::{HandlerContext, JobHandler};
use lumen_storage::Database;
use tokio::sync::Semaphore;

use crate::external::{OfficeConverter, PdfRasterizer, RasterizedPage};
use crate::payload::{parse_payload, IngestDocumentsPayload};

const INGEST_TASK: &str = "documents_ingestion";

pub struct IngestDocumentsHandler {
    db: Database,
    router: Arc<dyn ChatProvider>,
    office_converter: Arc<dyn OfficeConverter>,
    rasterizer: Arc<dyn PdfRasterizer>,
    config: HandlerConfig,
    task_models: TaskModelTable,
    scratch_root: PathBuf,
    /// Two-letter language code spliced into the ingest prompt's
    /// language-requirement clause.
    language_code: String,
}

impl IngestDocumentsHandler {
    pub fn new(
        db: Database,
        router: Arc<dyn ChatProvider>,
        office_converter: Arc<dyn OfficeConverter>,
        rasterizer: Arc<dyn PdfRasterizer>,
        config: HandlerConfig,
        task_models: TaskModelTable,
        scratch_root: PathBuf,
        language_code: String,
    ) -> Self {
        Self {
            db,
            router,
            office_converter,
            rasterizer,
            config,
            task_models,
            scratch_root,
            language_code,
        }
    }

    async fn interpret_page(&self, page: &RasterizedPage) -> Result<lumen_providers::ChatChunk> {
        let bytes = tokio::fs::read(&page.path)
            .await
            .map_err(|e| PipelineError::external_tool(format!("reading rasterized page: {e}")))?;
        let data_url = format!("data:image/png;base64,{}", BASE64_STANDARD.encode(bytes));

        let prompt = format!(
            "Extract all readable text from this document page. Respond in {}.",
            self.language_code
        );
        let request = ChatRequest::new(
            self.task_models.resolve(INGEST_TASK),
            vec![ChatMessage::parts(
                ChatRole::User,
                vec![ChatContentPart::text(prompt), ChatContentPart::image(data_url)],
            )],
        );

        let chunk = self.router.chat(request).await?;
        if let Some(err) = chunk.error {
            return Err(PipelineError::provider(err));
        }
        Ok(chunk)
    }
}

#[async_trait]
impl JobHandler for IngestDocumentsHandler {
    fn job_type(&self) -> JobType {
        JobType::IngestDocuments
    }

    async fn handle(&self, job: Job, ctx: HandlerContext) -> Result<serde_json::Value> {
        let payload: IngestDocumentsPayload = parse_payload(&job.payload)?;
        let document_id = payload.document_id;
        let source_path = PathBuf::from(&payload.source_path);
        let scratch_dir = self.scratch_root.join("ingest").join(job.id.to_string());

        if ctx.is_cancelled() {
            return Err(PipelineError::Cancelled);
        }

        let lower = payload.source_path.to_lowercase();
        let pdf_path = if lower.ends_with(".pdf") {
            source_path.clone()
        } else {
            self.office_converter
                .convert_to_pdf(&source_path, &scratch_dir)
                .await?
        };

        if ctx.is_cancelled() {
            return Err(PipelineError::Cancelled);
        }

        let mut pages = self
            .rasterizer
            .rasterize(&pdf_path, &scratch_dir, self.config.render_dots_per_inch)
            .await?;
        pages.sort_by_key(|p| p.page_number);

        let total_pages = pages.len().max(1);
        let fanout = self.config.page_fanout.min(5).max(1);
        let semaphore = Arc::new(Semaphore::new(fanout));

        // Cancellation is checked before acquiring the concurrency semaphore
        // for each page: a single unbounded check up front plus the
        // per-page check inside the mapped future below.
        let results: Vec<Result<(RasterizedPage, lumen_providers::ChatChunk)>> =
            futures::stream::iter(pages)
                .map(|page| {
                    let semaphore = semaphore.clone();
                    let ctx = ctx.clone();
                    async move {
                        if ctx.is_cancelled() {
                            return Err(PipelineError::Cancelled);
                        }
                        let _permit = semaphore.acquire_owned().await.map_err(|e| {
                            PipelineError::Internal(anyhow::anyhow!("semaphore closed: {e}"))
                        })?;
                        let chunk = self.interpret_page(&page).await?;
                        Ok((page, chunk))
                    }
                })
                .buffer_unordered(fanout)
                .collect()
                .await;

        let mut interpreted: Vec<(RasterizedPage, lumen_providers::ChatChunk)> =
            Vec::with_capacity(results.len());
        for result in results {
            // First encountered error wins and aborts the job.
            interpreted.push(result?);
        }
        interpreted.sort_by_key(|(page, _)| page.page_number);

        let mut total_usage = UsageMetrics::default();
        for (index, (page, chunk)) in interpreted.iter().enumerate() {
            self.db
                .insert_reference_page(
                    document_id,
                    page.page_number as i32,
                    &page.path.to_string_lossy(),
                    &chunk.text,
                )
                .await?;

            total_usage.input_tokens += i64::from(chunk.input_tokens);
            total_usage.output_tokens += i64::from(chunk.output_tokens);
            total_usage.cost_usd += chunk.cost;

            let progress = (((index + 1) as f64 / total_pages as f64) * 100.0) as i32;
            ctx.progress
                .report(progress, None, None, total_usage)
                .await?;
        }

        Ok(serde_json::json!({ "page_count": interpreted.len() }))
    }
}
