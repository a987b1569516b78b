// Job table repository: enqueue, atomic claim, progress writes,
// terminal transitions, crash recovery, and reads. Follows the
// `Database` + `sqlx::query_as` repository convention used throughout
// this crate's storage layer.

use async_trait::async_trait;
use lumen_core::error::{PipelineError, Result};
use lumen_core::job::{Job, JobFilter, JobStatus, JobType};
use lumen_core::readiness::{LectureStatus, ProcessingStatus, ReadinessWriter};
use sqlx::PgPool;
use uuid::Uuid;

use crate::models::{job_status_db_str, job_type_db_str, JobRow, ProcessingStatusRow, TextBlobRow};

#[derive(Clone)]
pub struct Database {
    pool: PgPool,
}

impl Database {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn from_url(database_url: &str) -> anyhow::Result<Self> {
        let pool = PgPool::connect(database_url).await?;
        Ok(Self { pool })
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    // ============================================
    // Jobs: write path
    // ============================================

    /// Inserts a new row with `status=PENDING, progress=0`.
    pub async fn enqueue_job(
        &self,
        user_id: Uuid,
        job_type: JobType,
        payload: serde_json::Value,
        course_id: Option<Uuid>,
        lecture_id: Option<Uuid>,
    ) -> Result<Uuid> {
        let id = Uuid::now_v7();
        sqlx::query(
            r#"
            INSERT INTO jobs (id, user_id, course_id, lecture_id, job_type, status, progress, payload,
                               input_tokens, output_tokens, estimated_cost_usd, created_at)
            VALUES ($1, $2, $3, $4, $5, 'PENDING', 0, $6, 0, 0, 0, NOW())
            "#,
        )
        .bind(id)
        .bind(user_id)
        .bind(course_id)
        .bind(lecture_id)
        .bind(job_type_db_str(job_type))
        .bind(&payload)
        .execute(&self.pool)
        .await
        .map_err(map_storage_error)?;

        Ok(id)
    }

    /// Atomic claim protocol: selects the oldest `PENDING` row and
    /// transitions it to `RUNNING` in one round trip. `FOR UPDATE SKIP
    /// LOCKED` gives the "exactly one worker wins" guarantee without an
    /// explicit multi-statement transaction, and lets concurrent callers
    /// skip rows already claimed instead of blocking on them.
    pub async fn claim_next_job(&self) -> Result<Option<Job>> {
        let row = sqlx::query_as::<_, JobRow>(
            r#"
            UPDATE jobs
            SET status = 'RUNNING', started_at = NOW()
            WHERE id = (
                SELECT id FROM jobs
                WHERE status = 'PENDING'
                ORDER BY created_at ASC
                LIMIT 1
                FOR UPDATE SKIP LOCKED
            )
            RETURNING id, user_id, course_id, lecture_id, job_type, status, progress, progress_message,
                      payload, result, error, metadata, input_tokens, output_tokens, estimated_cost_usd,
                      created_at, started_at, completed_at
            "#,
        )
        .fetch_optional(&self.pool)
        .await
        .map_err(map_storage_error)?;

        row.map(|r| r.into_job().map_err(PipelineError::Internal))
            .transpose()
    }

    /// Progress callback write: updates columns and returns the
    /// refreshed row so the caller can publish it. `input_tokens`/
    /// `output_tokens`/`cost_usd` are the handler's *running total to date*
    /// for this job, not a per-call delta — handlers already keep their own
    /// cumulative accumulator (see `UsageMetrics`), so this sets the columns
    /// directly rather than adding, which would double-count on every call
    /// past the first.
    pub async fn update_progress(
        &self,
        id: Uuid,
        progress: i32,
        message: Option<&str>,
        metadata: Option<serde_json::Value>,
        input_tokens: i64,
        output_tokens: i64,
        cost_usd: f64,
    ) -> Result<Job> {
        let row = sqlx::query_as::<_, JobRow>(
            r#"
            UPDATE jobs
            SET progress = $2,
                progress_message = COALESCE($3, progress_message),
                metadata = COALESCE($4, metadata),
                input_tokens = $5,
                output_tokens = $6,
                estimated_cost_usd = $7
            WHERE id = $1
            RETURNING id, user_id, course_id, lecture_id, job_type, status, progress, progress_message,
                      payload, result, error, metadata, input_tokens, output_tokens, estimated_cost_usd,
                      created_at, started_at, completed_at
            "#,
        )
        .bind(id)
        .bind(progress)
        .bind(message)
        .bind(&metadata)
        .bind(input_tokens)
        .bind(output_tokens)
        .bind(cost_usd)
        .fetch_one(&self.pool)
        .await
        .map_err(map_storage_error)?;

        row.into_job().map_err(PipelineError::Internal)
    }

    /// Handler returned successfully.
    pub async fn complete_job(&self, id: Uuid, result: serde_json::Value) -> Result<Job> {
        let row = sqlx::query_as::<_, JobRow>(
            r#"
            UPDATE jobs
            SET status = 'COMPLETED', progress = 100, completed_at = NOW(), result = $2
            WHERE id = $1
            RETURNING id, user_id, course_id, lecture_id, job_type, status, progress, progress_message,
                      payload, result, error, metadata, input_tokens, output_tokens, estimated_cost_usd,
                      created_at, started_at, completed_at
            "#,
        )
        .bind(id)
        .bind(&result)
        .fetch_one(&self.pool)
        .await
        .map_err(map_storage_error)?;

        row.into_job().map_err(PipelineError::Internal)
    }

    /// Handler returned an error.
    pub async fn fail_job(&self, id: Uuid, error: &str) -> Result<Job> {
        let row = sqlx::query_as::<_, JobRow>(
            r#"
            UPDATE jobs
            SET status = 'FAILED', completed_at = NOW(), error = $2
            WHERE id = $1
            RETURNING id, user_id, course_id, lecture_id, job_type, status, progress, progress_message,
                      payload, result, error, metadata, input_tokens, output_tokens, estimated_cost_usd,
                      created_at, started_at, completed_at
            "#,
        )
        .bind(id)
        .bind(error)
        .fetch_one(&self.pool)
        .await
        .map_err(map_storage_error)?;

        row.into_job().map_err(PipelineError::Internal)
    }

    /// `CancelJob`: legal only from `PENDING|RUNNING`; silently a
    /// no-op otherwise, returning the current row either way so the caller
    /// can decide whether to publish.
    pub async fn cancel_job(&self, id: Uuid) -> Result<Job> {
        let row = sqlx::query_as::<_, JobRow>(
            r#"
            UPDATE jobs
            SET status = 'CANCELLED', completed_at = NOW()
            WHERE id = $1 AND status IN ('PENDING', 'RUNNING')
            RETURNING id, user_id, course_id, lecture_id, job_type, status, progress, progress_message,
                      payload, result, error, metadata, input_tokens, output_tokens, estimated_cost_usd,
                      created_at, started_at, completed_at
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(map_storage_error)?;

        match row {
            Some(r) => r.into_job().map_err(PipelineError::Internal),
            None => self.get_job(id).await?.ok_or_else(|| {
                PipelineError::invalid_input(format!("job {id} does not exist"))
            }),
        }
    }

    /// Crash recovery: every row found `RUNNING` on queue start is
    /// forcibly transitioned to `FAILED`. Returns the ids that were reset
    /// so the caller can publish one terminal event per job.
    pub async fn reset_running_to_failed(&self) -> Result<Vec<Uuid>> {
        let rows: Vec<(Uuid,)> = sqlx::query_as(
            r#"
            UPDATE jobs
            SET status = 'FAILED', completed_at = NOW(),
                error = 'server restarted while task was running'
            WHERE status = 'RUNNING'
            RETURNING id
            "#,
        )
        .fetch_all(&self.pool)
        .await
        .map_err(map_storage_error)?;

        Ok(rows.into_iter().map(|(id,)| id).collect())
    }

    // ============================================
    // Jobs: read path
    // ============================================

    pub async fn get_job(&self, id: Uuid) -> Result<Option<Job>> {
        let row = sqlx::query_as::<_, JobRow>(
            r#"
            SELECT id, user_id, course_id, lecture_id, job_type, status, progress, progress_message,
                   payload, result, error, metadata, input_tokens, output_tokens, estimated_cost_usd,
                   created_at, started_at, completed_at
            FROM jobs WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(map_storage_error)?;

        row.map(|r| r.into_job().map_err(PipelineError::Internal))
            .transpose()
    }

    pub async fn list_jobs(&self, filter: JobFilter) -> Result<Vec<Job>> {
        let rows = sqlx::query_as::<_, JobRow>(
            r#"
            SELECT id, user_id, course_id, lecture_id, job_type, status, progress, progress_message,
                   payload, result, error, metadata, input_tokens, output_tokens, estimated_cost_usd,
                   created_at, started_at, completed_at
            FROM jobs
            WHERE ($1::uuid IS NULL OR lecture_id = $1)
              AND ($2::text IS NULL OR job_type = $2)
              AND ($3::text IS NULL OR status = $3)
            ORDER BY created_at ASC
            "#,
        )
        .bind(filter.lecture_id)
        .bind(filter.job_type.map(job_type_db_str))
        .bind(filter.status.map(job_status_db_str))
        .fetch_all(&self.pool)
        .await
        .map_err(map_storage_error)?;

        rows.into_iter()
            .map(|r| r.into_job().map_err(PipelineError::Internal))
            .collect()
    }

    // ============================================
    // TRANSCRIBE_MEDIA persistence
    // ============================================

    #[allow(clippy::too_many_arguments)]
    pub async fn insert_transcript_segment(
        &self,
        lecture_id: Uuid,
        media_id: Uuid,
        media_index: i32,
        text: &str,
        original_start_ms: i64,
        original_end_ms: i64,
        global_start_ms: i64,
        global_end_ms: i64,
    ) -> Result<Uuid> {
        let id = Uuid::now_v7();
        sqlx::query(
            r#"
            INSERT INTO transcript_segments
                (id, lecture_id, media_id, media_index, text,
                 original_start_ms, original_end_ms, global_start_ms, global_end_ms)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            "#,
        )
        .bind(id)
        .bind(lecture_id)
        .bind(media_id)
        .bind(media_index)
        .bind(text)
        .bind(original_start_ms)
        .bind(original_end_ms)
        .bind(global_start_ms)
        .bind(global_end_ms)
        .execute(&self.pool)
        .await
        .map_err(map_storage_error)?;
        Ok(id)
    }

    // ============================================
    // INGEST_DOCUMENTS persistence
    // ============================================

    pub async fn insert_reference_page(
        &self,
        document_id: Uuid,
        page_number: i32,
        image_path: &str,
        extracted_text: &str,
    ) -> Result<Uuid> {
        let id = Uuid::now_v7();
        sqlx::query(
            r#"
            INSERT INTO reference_pages (id, document_id, page_number, image_path, extracted_text)
            VALUES ($1, $2, $3, $4, $5)
            "#,
        )
        .bind(id)
        .bind(document_id)
        .bind(page_number)
        .bind(image_path)
        .bind(extracted_text)
        .execute(&self.pool)
        .await
        .map_err(map_storage_error)?;
        Ok(id)
    }

    // ============================================
    // BUILD_MATERIAL sources
    // ============================================

    /// Concatenated transcript text for a lecture, ordered by global start
    /// time, used as grounding input to the outline/content LLM stages.
    pub async fn lecture_transcript_text(&self, lecture_id: Uuid) -> Result<String> {
        let rows: Vec<TextBlobRow> = sqlx::query_as(
            r#"
            SELECT text FROM transcript_segments
            WHERE lecture_id = $1
            ORDER BY global_start_ms ASC
            "#,
        )
        .bind(lecture_id)
        .fetch_all(&self.pool)
        .await
        .map_err(map_storage_error)?;
        Ok(rows.into_iter().map(|r| r.text).collect::<Vec<_>>().join("\n\n"))
    }

    /// Concatenated document page extracts for a lecture's reference
    /// documents, ordered by document then page number.
    pub async fn lecture_document_extracts(&self, lecture_id: Uuid) -> Result<String> {
        let rows: Vec<TextBlobRow> = sqlx::query_as(
            r#"
            SELECT rp.extracted_text AS text
            FROM reference_pages rp
            JOIN reference_documents rd ON rd.id = rp.document_id
            WHERE rd.lecture_id = $1
            ORDER BY rp.document_id, rp.page_number ASC
            "#,
        )
        .bind(lecture_id)
        .fetch_all(&self.pool)
        .await
        .map_err(map_storage_error)?;
        Ok(rows.into_iter().map(|r| r.text).collect::<Vec<_>>().join("\n\n"))
    }

    // ============================================
    // PUBLISH_MATERIAL
    // ============================================

    /// Markdown content for the resource being published. Table is chosen
    /// by `resource_kind` (`tool` | `document` | `lecture_transcript`); the
    /// Markdown AST itself is an external collaborator, this only reads
    /// the stored source text.
    pub async fn resource_markdown(&self, resource_kind: &str, resource_id: Uuid) -> Result<String> {
        let table = match resource_kind {
            "tool" => "tools",
            "document" => "reference_documents",
            "lecture_transcript" => "transcripts",
            other => return Err(PipelineError::invalid_input(format!("unknown resource kind: {other}"))),
        };
        let row: Option<TextBlobRow> = sqlx::query_as(&format!(
            "SELECT markdown_content AS text FROM {table} WHERE id = $1"
        ))
        .bind(resource_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(map_storage_error)?;
        row.map(|r| r.text)
            .ok_or_else(|| PipelineError::invalid_input(format!("{resource_kind} {resource_id} not found")))
    }

    /// Idempotence check: a prior `COMPLETED` PUBLISH_MATERIAL on
    /// the same `(resource, format, include_images)` tuple can be reused.
    pub async fn find_completed_publish(
        &self,
        resource_kind: &str,
        resource_id: Uuid,
        format: &str,
        include_images: bool,
    ) -> Result<Option<Job>> {
        let row: Option<JobRow> = sqlx::query_as(
            r#"
            SELECT id, user_id, course_id, lecture_id, job_type, status, progress, progress_message,
                   payload, result, error, metadata, input_tokens, output_tokens, estimated_cost_usd,
                   created_at, started_at, completed_at
            FROM jobs
            WHERE job_type = 'PUBLISH_MATERIAL'
              AND status = 'COMPLETED'
              AND payload->>'resource_kind' = $1
              AND payload->>'resource_id' = $2
              AND payload->>'format' = $3
              AND (payload->>'include_images')::boolean = $4
            ORDER BY created_at DESC
            LIMIT 1
            "#,
        )
        .bind(resource_kind)
        .bind(resource_id.to_string())
        .bind(format)
        .bind(include_images)
        .fetch_optional(&self.pool)
        .await
        .map_err(map_storage_error)?;

        row.map(|r| r.into_job().map_err(PipelineError::Internal))
            .transpose()
    }

    // ============================================
    // Readiness inputs
    // ============================================

    pub async fn transcript_status(&self, lecture_id: Uuid) -> Result<Option<ProcessingStatus>> {
        let row: Option<ProcessingStatusRow> = sqlx::query_as(
            "SELECT status FROM transcripts WHERE lecture_id = $1",
        )
        .bind(lecture_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(map_storage_error)?;

        row.map(|r| parse_processing_status(&r.status))
            .transpose()
            .map_err(PipelineError::Internal)
    }

    pub async fn document_statuses(&self, lecture_id: Uuid) -> Result<Vec<ProcessingStatus>> {
        let rows: Vec<ProcessingStatusRow> = sqlx::query_as(
            "SELECT extraction_status AS status FROM reference_documents WHERE lecture_id = $1",
        )
        .bind(lecture_id)
        .fetch_all(&self.pool)
        .await
        .map_err(map_storage_error)?;

        rows.iter()
            .map(|r| parse_processing_status(&r.status))
            .collect::<anyhow::Result<Vec<_>>>()
            .map_err(PipelineError::Internal)
    }
}

#[async_trait]
impl ReadinessWriter for Database {
    async fn write_lecture_status(&self, lecture_id: Uuid, status: LectureStatus) -> Result<()> {
        let status_str = match status {
            LectureStatus::Ready => "ready",
            LectureStatus::Processing => "processing",
            LectureStatus::Failed => "failed",
        };
        sqlx::query("UPDATE lectures SET derived_status = $2 WHERE id = $1")
            .bind(lecture_id)
            .bind(status_str)
            .execute(&self.pool)
            .await
            .map_err(map_storage_error)?;
        Ok(())
    }
}

fn parse_processing_status(s: &str) -> anyhow::Result<ProcessingStatus> {
    Ok(match s {
        "completed" => ProcessingStatus::Completed,
        "processing" => ProcessingStatus::Processing,
        "failed" => ProcessingStatus::Failed,
        other => anyhow::bail!("unknown processing status in storage row: {other}"),
    })
}

/// Connection-pool contention and serialization failures are the "database
/// busy" case the claim protocol is defined to retry silently; every
/// other sqlx error surfaces as `Internal`.
fn map_storage_error(err: sqlx::Error) -> PipelineError {
    match &err {
        sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed => {
            PipelineError::transient_storage(err.to_string())
        }
        sqlx::Error::Database(db_err) if db_err.code().as_deref() == Some("40001") => {
            // serialization_failure
            PipelineError::transient_storage(err.to_string())
        }
        _ => PipelineError::Internal(err.into()),
    }
}
