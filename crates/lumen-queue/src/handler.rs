// Job Handler contract and the progress-reporter capability object passed
// by reference in place of a closure over the queue.

use async_trait::async_trait;
use lumen_core::error::Result;
use lumen_core::job::{Job, JobType, UsageMetrics};
use lumen_bus::{channel_key_job, BusEvent, ProgressBus};
use lumen_storage::Database;
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// Registered under a job `type`; orchestrates the work for that type.
#[async_trait]
pub trait JobHandler: Send + Sync {
    fn job_type(&self) -> JobType;

    /// Runs the handler. MUST honor `ctx.cancel` between every external
    /// call or inner loop iteration. A returned `Ok` completes the
    /// job with that value as `result`; a returned `Err` fails it, except
    /// `PipelineError::Cancelled` which the queue treats as a non-failure.
    async fn handle(&self, job: Job, ctx: HandlerContext) -> Result<Value>;
}

/// Per-invocation context passed to a handler: the progress-reporting
/// capability and its cancellation token. Explicit and by-reference rather
/// than a closure captured over the queue instance, so the thread-safety
/// contract is visible at the call site instead of hidden in shared state.
#[derive(Clone)]
pub struct HandlerContext {
    pub progress: ProgressReporter,
    pub cancel: CancellationToken,
}

impl HandlerContext {
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

/// Safe to call from any task and at any rate.
/// Writes the job's progress columns then publishes a `JobUpdate` on
/// `job:<id>` — in that order, so a subscriber that reacts to the event by
/// immediately calling `GetJob` observes the write.
#[derive(Clone)]
pub struct ProgressReporter {
    db: Database,
    bus: ProgressBus,
    job_id: Uuid,
}

impl ProgressReporter {
    pub fn new(db: Database, bus: ProgressBus, job_id: Uuid) -> Self {
        Self { db, bus, job_id }
    }

    /// `metrics` is the handler's cumulative usage for the job so far, not a
    /// delta since the last call — the store sets the accounting columns to
    /// these values rather than adding to them.
    pub async fn report(
        &self,
        progress: i32,
        message: Option<&str>,
        metadata: Option<Value>,
        metrics: UsageMetrics,
    ) -> Result<()> {
        let job = self
            .db
            .update_progress(
                self.job_id,
                progress,
                message,
                metadata,
                metrics.input_tokens,
                metrics.output_tokens,
                metrics.cost_usd,
            )
            .await?;

        self.bus
            .publish(&channel_key_job(self.job_id), BusEvent::JobProgress((&job).into()))
            .await;

        Ok(())
    }
}
