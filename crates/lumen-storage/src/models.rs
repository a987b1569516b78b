// Row types mirrored from the `jobs` table. Kept separate
// from `lumen_core::job::Job` so sqlx's `FromRow` derive never leaks into
// the domain crate.

use chrono::{DateTime, Utc};
use sqlx::FromRow;
use uuid::Uuid;

use lumen_core::job::{Job, JobStatus, JobType};

#[derive(Debug, Clone, FromRow)]
pub struct JobRow {
    pub id: Uuid,
    pub user_id: Uuid,
    pub course_id: Option<Uuid>,
    pub lecture_id: Option<Uuid>,
    pub job_type: String,
    pub status: String,
    pub progress: i32,
    pub progress_message: Option<String>,
    pub payload: serde_json::Value,
    pub result: Option<serde_json::Value>,
    pub error: Option<String>,
    pub metadata: Option<serde_json::Value>,
    pub input_tokens: i64,
    pub output_tokens: i64,
    pub estimated_cost_usd: f64,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl JobRow {
    pub fn into_job(self) -> anyhow::Result<Job> {
        Ok(Job {
            id: self.id,
            user_id: self.user_id,
            course_id: self.course_id,
            lecture_id: self.lecture_id,
            job_type: parse_job_type(&self.job_type)?,
            status: parse_job_status(&self.status)?,
            progress: self.progress,
            progress_message: self.progress_message,
            payload: self.payload,
            result: self.result,
            error: self.error,
            metadata: self.metadata,
            input_tokens: self.input_tokens,
            output_tokens: self.output_tokens,
            estimated_cost_usd: self.estimated_cost_usd,
            created_at: self.created_at,
            started_at: self.started_at,
            completed_at: self.completed_at,
        })
    }
}

pub fn job_type_db_str(job_type: JobType) -> &'static str {
    job_type.as_str()
}

pub fn job_status_db_str(status: JobStatus) -> &'static str {
    match status {
        JobStatus::Pending => "PENDING",
        JobStatus::Running => "RUNNING",
        JobStatus::Completed => "COMPLETED",
        JobStatus::Failed => "FAILED",
        JobStatus::Cancelled => "CANCELLED",
    }
}

fn parse_job_type(s: &str) -> anyhow::Result<JobType> {
    Ok(match s {
        "TRANSCRIBE_MEDIA" => JobType::TranscribeMedia,
        "INGEST_DOCUMENTS" => JobType::IngestDocuments,
        "BUILD_MATERIAL" => JobType::BuildMaterial,
        "PUBLISH_MATERIAL" => JobType::PublishMaterial,
        other => anyhow::bail!("unknown job_type in storage row: {other}"),
    })
}

fn parse_job_status(s: &str) -> anyhow::Result<JobStatus> {
    Ok(match s {
        "PENDING" => JobStatus::Pending,
        "RUNNING" => JobStatus::Running,
        "COMPLETED" => JobStatus::Completed,
        "FAILED" => JobStatus::Failed,
        "CANCELLED" => JobStatus::Cancelled,
        other => anyhow::bail!("unknown status in storage row: {other}"),
    })
}

/// One row of `documents.extraction_status` or `transcripts.status`, read by
/// the Readiness Evaluator.
#[derive(Debug, Clone, FromRow)]
pub struct ProcessingStatusRow {
    pub status: String,
}

#[derive(Debug, Clone, FromRow)]
pub struct TextBlobRow {
    pub text: String,
}
