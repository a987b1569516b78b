// Job domain types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// The four job types the pipeline knows how to dispatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobType {
    TranscribeMedia,
    IngestDocuments,
    BuildMaterial,
    PublishMaterial,
}

impl JobType {
    /// `TRANSCRIBE_MEDIA` and `INGEST_DOCUMENTS` are CPU-bound via external
    /// tools and are gated by the heavy-task semaphore.
    pub fn is_heavy(self) -> bool {
        matches!(self, JobType::TranscribeMedia | JobType::IngestDocuments)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            JobType::TranscribeMedia => "TRANSCRIBE_MEDIA",
            JobType::IngestDocuments => "INGEST_DOCUMENTS",
            JobType::BuildMaterial => "BUILD_MATERIAL",
            JobType::PublishMaterial => "PUBLISH_MATERIAL",
        }
    }
}

/// Legal states of a job row.
///
/// Transitions: `Pending -> Running -> {Completed, Failed}`, and
/// `Pending|Running -> Cancelled`. No other edge is legal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl JobStatus {
    /// Terminal statuses are the ones after which no further transition is legal.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            JobStatus::Completed | JobStatus::Failed | JobStatus::Cancelled
        )
    }

    /// Whether `next` is a legal transition from `self`.
    pub fn can_transition_to(self, next: JobStatus) -> bool {
        use JobStatus::*;
        match (self, next) {
            (Pending, Running) => true,
            (Running, Completed) => true,
            (Running, Failed) => true,
            (Pending, Failed) => true,
            (Pending, Cancelled) => true,
            (Running, Cancelled) => true,
            _ => false,
        }
    }
}

/// A durable unit of asynchronous work with a lifecycle row in the store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: Uuid,
    pub user_id: Uuid,
    pub course_id: Option<Uuid>,
    pub lecture_id: Option<Uuid>,
    pub job_type: JobType,
    pub status: JobStatus,
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

impl Job {
    /// Validates the invariants that apply to a single row in isolation
    /// (the cross-row "exactly one worker running" invariant is enforced by
    /// the claim protocol, not here).
    pub fn check_invariants(&self) -> Result<(), String> {
        if self.status == JobStatus::Completed && self.progress != 100 {
            return Err(format!(
                "job {} is COMPLETED but progress={}",
                self.id, self.progress
            ));
        }
        let left_pending = self.status != JobStatus::Pending;
        if left_pending != self.started_at.is_some() {
            return Err(format!(
                "job {} started_at presence disagrees with status {:?}",
                self.id, self.status
            ));
        }
        if self.status.is_terminal() != self.completed_at.is_some() {
            return Err(format!(
                "job {} completed_at presence disagrees with status {:?}",
                self.id, self.status
            ));
        }
        Ok(())
    }
}

/// Filter for `List` read operations.
#[derive(Debug, Clone, Default)]
pub struct JobFilter {
    pub lecture_id: Option<Uuid>,
    pub job_type: Option<JobType>,
    pub status: Option<JobStatus>,
}

/// Event published on `job:<id>` and delivered to WebSocket subscribers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobUpdate {
    pub id: Uuid,
    pub status: JobStatus,
    pub progress: i32,
    pub message: Option<String>,
    pub metadata: Option<serde_json::Value>,
    pub error: Option<String>,
    pub result: Option<serde_json::Value>,
    pub input_tokens: i64,
    pub output_tokens: i64,
    pub estimated_cost: f64,
}

impl From<&Job> for JobUpdate {
    fn from(job: &Job) -> Self {
        JobUpdate {
            id: job.id,
            status: job.status,
            progress: job.progress,
            message: job.progress_message.clone(),
            metadata: job.metadata.clone(),
            error: job.error.clone(),
            result: job.result.clone(),
            input_tokens: job.input_tokens,
            output_tokens: job.output_tokens,
            estimated_cost: job.estimated_cost_usd,
        }
    }
}

/// Token/cost accounting delta reported alongside a progress update.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct UsageMetrics {
    pub input_tokens: i64,
    pub output_tokens: i64,
    pub cost_usd: f64,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_job() -> Job {
        Job {
            id: Uuid::now_v7(),
            user_id: Uuid::now_v7(),
            course_id: None,
            lecture_id: None,
            job_type: JobType::TranscribeMedia,
            status: JobStatus::Pending,
            progress: 0,
            progress_message: None,
            payload: serde_json::json!({}),
            result: None,
            error: None,
            metadata: None,
            input_tokens: 0,
            output_tokens: 0,
            estimated_cost_usd: 0.0,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
        }
    }

    #[test]
    fn pending_to_running_legal() {
        assert!(JobStatus::Pending.can_transition_to(JobStatus::Running));
    }

    #[test]
    fn completed_to_running_illegal() {
        assert!(!JobStatus::Completed.can_transition_to(JobStatus::Running));
    }

    #[test]
    fn cancelled_is_terminal_and_not_re_enterable() {
        assert!(JobStatus::Cancelled.is_terminal());
        assert!(!JobStatus::Cancelled.can_transition_to(JobStatus::Running));
    }

    #[test]
    fn invariant_rejects_completed_without_full_progress() {
        let mut job = base_job();
        job.status = JobStatus::Completed;
        job.completed_at = Some(Utc::now());
        job.started_at = Some(Utc::now());
        job.progress = 80;
        assert!(job.check_invariants().is_err());
    }

    #[test]
    fn invariant_accepts_well_formed_completed_job() {
        let mut job = base_job();
        job.status = JobStatus::Completed;
        job.started_at = Some(Utc::now());
        job.completed_at = Some(Utc::now());
        job.progress = 100;
        assert!(job.check_invariants().is_ok());
    }

    #[test]
    fn heavy_task_classification() {
        assert!(JobType::TranscribeMedia.is_heavy());
        assert!(JobType::IngestDocuments.is_heavy());
        assert!(!JobType::BuildMaterial.is_heavy());
        assert!(!JobType::PublishMaterial.is_heavy());
    }
}
