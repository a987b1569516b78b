// TRANSCRIBE_MEDIA: extract/split each media file, transcribe its
// segments in bounded-concurrency batches, polish each batch, and persist
// both original and lecture-global time fields.

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64_STANDARD;
use base64::Engine;
use lumen_core::config::{HandlerConfig, TaskModelTable};
use lumen_core::error::{PipelineError, Result};
use lumen_core::job::{Job, JobType, UsageMetrics};
use lumen_providers::{ChatChunk, ChatContentPart, ChatMessage, ChatRequest, ChatRole, ChatProvider};
use lumen_queue::{HandlerContext, JobHandler};
use lumen_storage::Database;
use tokio::sync::Semaphore;
use uuid::Uuid;

use crate::external::{AudioSegment, MediaSplitter};
use crate::payload::{parse_payload, TranscribeMediaPayload};

const POLISH_TASK: &str = "content_polishing";
const POLISH_MAX_TOKENS: u32 = 16384;

/// One segment's transcript, before the batch is polished.
struct RawSegment {
    index: u32,
    text: String,
    original_start_ms: i64,
    original_end_ms: i64,
}

pub struct TranscribeMediaHandler {
    db: Database,
    router: Arc<dyn ChatProvider>,
    splitter: Arc<dyn MediaSplitter>,
    config: HandlerConfig,
    task_models: TaskModelTable,
    scratch_root: PathBuf,
}

impl TranscribeMediaHandler {
    pub fn new(
        db: Database,
        router: Arc<dyn ChatProvider>,
        splitter: Arc<dyn MediaSplitter>,
        config: HandlerConfig,
        task_models: TaskModelTable,
        scratch_root: PathBuf,
    ) -> Self {
        Self {
            db,
            router,
            splitter,
            config,
            task_models,
            scratch_root,
        }
    }

    /// Resolves a source media id to the file path the splitter should read.
    /// Media storage is assumed content-addressed under the scratch root
    /// by id.
    fn media_source_path(&self, media_id: Uuid) -> PathBuf {
        self.scratch_root.join("media").join(media_id.to_string())
    }

    async fn transcribe_segment(
        &self,
        segment: &AudioSegment,
        ctx: &HandlerContext,
    ) -> Result<(String, ChatChunk)> {
        if ctx.is_cancelled() {
            return Err(PipelineError::Cancelled);
        }
        let bytes = tokio::fs::read(&segment.path)
            .await
            .map_err(|e| PipelineError::external_tool(format!("reading segment audio: {e}")))?;
        let data_base64 = BASE64_STANDARD.encode(bytes);
        let format = segment
            .path
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or("wav")
            .to_string();

        let request = ChatRequest::new(
            self.task_models.resolve("audio_transcription"),
            vec![ChatMessage::parts(
                ChatRole::User,
                vec![
                    ChatContentPart::text("Transcribe this audio segment verbatim."),
                    ChatContentPart::input_audio(data_base64, format),
                ],
            )],
        );

        let chunk = self.router.chat(request).await?;
        if let Some(err) = &chunk.error {
            return Err(PipelineError::provider(err.clone()));
        }
        Ok((chunk.text.clone(), chunk))
    }

    async fn polish_batch(
        &self,
        raw: &[RawSegment],
    ) -> Result<(Option<String>, ChatChunk)> {
        let concatenated = raw
            .iter()
            .map(|s| s.text.as_str())
            .collect::<Vec<_>>()
            .join("\n");

        let request = ChatRequest::new(
            self.task_models.resolve(POLISH_TASK),
            vec![ChatMessage::text(
                ChatRole::User,
                format!(
                    "Lightly clean up transcript disfluencies and punctuation in the \
                     following text. Preserve the original language exactly — do not \
                     translate. Return only the cleaned text.\n\n{concatenated}"
                ),
            )],
        )
        .with_max_tokens(POLISH_MAX_TOKENS);

        match self.router.chat(request).await {
            Ok(chunk) if chunk.error.is_none() => {
                let text = chunk.text.clone();
                Ok((Some(text), chunk))
            }
            _ => Ok((None, ChatChunk::default())),
        }
    }
}

#[async_trait]
impl JobHandler for TranscribeMediaHandler {
    fn job_type(&self) -> JobType {
        JobType::TranscribeMedia
    }

    async fn handle(&self, job: Job, ctx: HandlerContext) -> Result<serde_json::Value> {
        let payload: TranscribeMediaPayload = parse_payload(&job.payload)?;
        let lecture_id = payload.lecture_id;
        let total_media = payload.media_ids.len().max(1);

        let fanout = self.config.segment_fanout.min(5).max(1);
        let semaphore = Arc::new(Semaphore::new(fanout));

        let mut global_offset_ms: i64 = 0;
        let mut total_usage = UsageMetrics::default();
        let mut persisted_segment_ids = Vec::new();

        for (media_index, media_id) in payload.media_ids.iter().enumerate() {
            if ctx.is_cancelled() {
                return Err(PipelineError::Cancelled);
            }

            let source_path = self.media_source_path(*media_id);
            let media_scratch = self.scratch_root.join("transcribe").join(job.id.to_string());

            let segments = self
                .splitter
                .extract_and_split(&source_path, &media_scratch, self.config.audio_chunk_length_seconds)
                .await?;

            let measured = self
                .splitter
                .measured_duration_seconds(&source_path)
                .await?;
            let media_duration_ms = match measured {
                Some(secs) => (secs * 1000.0) as i64,
                None => {
                    i64::from(segments.len() as u32)
                        * i64::from(self.config.audio_chunk_length_seconds)
                        * 1000
                }
            };

            let mut raw_segments: Vec<RawSegment> = Vec::with_capacity(segments.len());

            for batch in segments.chunks(self.config.refining_batch_size.max(1)) {
                if ctx.is_cancelled() {
                    return Err(PipelineError::Cancelled);
                }

                use futures::StreamExt;
                let segment_duration_ms = i64::from(self.config.audio_chunk_length_seconds) * 1000;

                let semaphore_for_batch = semaphore.clone();
                let ctx_for_batch = ctx.clone();
                let results: Vec<Result<(AudioSegment, String, ChatChunk)>> =
                    futures::stream::iter(batch.iter().cloned())
                        .map(move |segment| {
                            let semaphore = semaphore_for_batch.clone();
                            let ctx = ctx_for_batch.clone();
                            async move {
                                let _permit = semaphore.acquire_owned().await.map_err(|e| {
                                    PipelineError::Internal(anyhow::anyhow!("semaphore closed: {e}"))
                                })?;
                                let (text, chunk) = self.transcribe_segment(&segment, &ctx).await?;
                                Ok((segment, text, chunk))
                            }
                        })
                        .buffer_unordered(fanout)
                        .collect()
                        .await;

                let mut batch_raw: Vec<RawSegment> = Vec::with_capacity(batch.len());
                for result in results {
                    let (segment, text, usage_chunk) = result?;
                    let original_start_ms = i64::from(segment.index) * segment_duration_ms;
                    let original_end_ms = original_start_ms + segment_duration_ms;

                    total_usage.input_tokens += i64::from(usage_chunk.input_tokens);
                    total_usage.output_tokens += i64::from(usage_chunk.output_tokens);
                    total_usage.cost_usd += usage_chunk.cost;

                    batch_raw.push(RawSegment {
                        index: segment.index,
                        text,
                        original_start_ms,
                        original_end_ms,
                    });
                }
                batch_raw.sort_by_key(|s| s.index);

                let (polished, polish_chunk) = self.polish_batch(&batch_raw).await?;
                total_usage.input_tokens += i64::from(polish_chunk.input_tokens);
                total_usage.output_tokens += i64::from(polish_chunk.output_tokens);
                total_usage.cost_usd += polish_chunk.cost;

                match polished {
                    Some(merged_text) => {
                        let first = batch_raw.first().expect("batch is non-empty");
                        let last = batch_raw.last().expect("batch is non-empty");
                        raw_segments.push(RawSegment {
                            index: first.index,
                            text: merged_text,
                            original_start_ms: first.original_start_ms,
                            original_end_ms: last.original_end_ms,
                        });
                    }
                    None => raw_segments.extend(batch_raw),
                }
            }

            // The final segment of the file is almost always shorter than
            // the fixed chunk length; clamp it to the measured duration so
            // the merged segment's range never runs past the file's end.
            if let Some(last) = raw_segments.last_mut() {
                last.original_end_ms = last.original_end_ms.min(media_duration_ms);
            }

            for raw in &raw_segments {
                let global_start_ms = global_offset_ms + raw.original_start_ms;
                let global_end_ms = global_offset_ms + raw.original_end_ms;
                let id = self
                    .db
                    .insert_transcript_segment(
                        lecture_id,
                        *media_id,
                        raw.index as i32,
                        &raw.text,
                        raw.original_start_ms,
                        raw.original_end_ms,
                        global_start_ms,
                        global_end_ms,
                    )
                    .await?;
                persisted_segment_ids.push(id);
            }

            global_offset_ms += media_duration_ms;

            let progress = (((media_index + 1) as f64 / total_media as f64) * 100.0) as i32;
            ctx.progress
                .report(progress, None, None, total_usage)
                .await?;
        }

        Ok(serde_json::json!({ "segment_count": persisted_segment_ids.len() }))
    }
}
