// Job Queue: durable FIFO-by-created_at queue, fixed-size worker
// pool, heavy-task admission control, crash recovery, cancellation.
//
// Worker shape: per-job task handles and cancel flags tracked in an
// `Arc<RwLock<HashMap<...>>>`, with semaphore-bounded dispatch and a
// watch-channel for graceful shutdown, running directly against this
// crate's own job table.

use std::collections::HashMap;
use std::sync::Arc;

use lumen_core::config::QueueConfig;
use lumen_core::error::{PipelineError, Result};
use lumen_core::job::{Job, JobFilter, JobType, JobUpdate};
use lumen_core::readiness::{evaluate_readiness, ReadinessWriter};
use lumen_bus::{channel_key_job, BusEvent, ProgressBus};
use lumen_storage::Database;
use tokio::sync::{watch, Mutex, RwLock, Semaphore};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use crate::handler::{HandlerContext, JobHandler, ProgressReporter};

pub struct JobQueue {
    db: Database,
    bus: ProgressBus,
    config: QueueConfig,
    handlers: RwLock<HashMap<JobType, Arc<dyn JobHandler>>>,
    /// Single permit; guards `TRANSCRIBE_MEDIA` and `INGEST_DOCUMENTS`.
    heavy_task_semaphore: Arc<Semaphore>,
    active_tasks: Arc<RwLock<HashMap<Uuid, JoinHandle<()>>>>,
    cancel_tokens: Arc<Mutex<HashMap<Uuid, CancellationToken>>>,
    shutdown_tx: watch::Sender<bool>,
    shutdown_rx: watch::Receiver<bool>,
}

impl JobQueue {
    pub fn new(db: Database, bus: ProgressBus, config: QueueConfig) -> Arc<Self> {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        Arc::new(Self {
            db,
            bus,
            config,
            handlers: RwLock::new(HashMap::new()),
            heavy_task_semaphore: Arc::new(Semaphore::new(1)),
            active_tasks: Arc::new(RwLock::new(HashMap::new())),
            cancel_tokens: Arc::new(Mutex::new(HashMap::new())),
            shutdown_tx,
            shutdown_rx,
        })
    }

    pub async fn register_handler(&self, handler: Arc<dyn JobHandler>) {
        self.handlers.write().await.insert(handler.job_type(), handler);
    }

    /// `Enqueue(userId, type, payload, courseId?, lectureId?) -> jobId`.
    pub async fn enqueue(
        &self,
        user_id: Uuid,
        job_type: JobType,
        payload: serde_json::Value,
        course_id: Option<Uuid>,
        lecture_id: Option<Uuid>,
    ) -> Result<Uuid> {
        self.db
            .enqueue_job(user_id, job_type, payload, course_id, lecture_id)
            .await
    }

    pub async fn get_job(&self, id: Uuid) -> Result<Option<Job>> {
        self.db.get_job(id).await
    }

    pub async fn list_jobs(&self, filter: JobFilter) -> Result<Vec<Job>> {
        self.db.list_jobs(filter).await
    }

    /// `CancelJob(id)`: idempotent. Transitions the row when legal and
    /// cancels the job's token; a job not currently running (or already
    /// terminal) is a silent no-op.
    #[instrument(skip(self))]
    pub async fn cancel_job(&self, id: Uuid) -> Result<Job> {
        if let Some(token) = self.cancel_tokens.lock().await.get(&id) {
            token.cancel();
        }
        let job = self.db.cancel_job(id).await?;
        if job.status == lumen_core::job::JobStatus::Cancelled {
            self.bus
                .publish(&channel_key_job(id), BusEvent::JobProgress((&job).into()))
                .await;
        }
        Ok(job)
    }

    /// Crash recovery: every row found `RUNNING` is forced to
    /// `FAILED`. Run once, before starting the worker pool.
    #[instrument(skip(self))]
    pub async fn recover_crashed_jobs(&self) -> Result<()> {
        let ids = self.db.reset_running_to_failed().await?;
        if !ids.is_empty() {
            warn!(count = ids.len(), "reset RUNNING jobs to FAILED after restart");
        }
        for id in ids {
            if let Some(job) = self.db.get_job(id).await? {
                self.bus
                    .publish(&channel_key_job(id), BusEvent::JobProgress((&job).into()))
                    .await;
                self.reevaluate_readiness_if_applicable(&job).await;
            }
        }
        Ok(())
    }

    /// Spawns the fixed-size worker pool. Each worker loops on a fixed
    /// 1 s tick, attempting the claim protocol; idle workers simply wait
    /// for the next tick (no adaptive backoff).
    pub fn start(self: &Arc<Self>) -> Vec<JoinHandle<()>> {
        (0..self.config.worker_count)
            .map(|worker_index| {
                let queue = Arc::clone(self);
                tokio::spawn(async move { queue.worker_loop(worker_index).await })
            })
            .collect()
    }

    /// Signals all workers to stop claiming new jobs. In-flight jobs are
    /// not forcibly aborted — handlers are expected to observe
    /// cancellation and return promptly; this only stops new claims.
    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(true);
    }

    #[instrument(skip(self), fields(worker_index))]
    async fn worker_loop(self: Arc<Self>, worker_index: usize) {
        let mut shutdown_rx = self.shutdown_rx.clone();
        let mut ticker = tokio::time::interval(self.config.tick_interval);
        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                _ = shutdown_rx.changed() => {
                    debug!(worker_index, "worker shutting down");
                    return;
                }
            }
            if *shutdown_rx.borrow() {
                return;
            }
            self.claim_and_dispatch_once(worker_index).await;
        }
    }

    async fn claim_and_dispatch_once(self: &Arc<Self>, worker_index: usize) {
        let job = match self.db.claim_next_job().await {
            Ok(Some(job)) => job,
            Ok(None) => return,
            Err(e) if e.is_transient() => {
                debug!(worker_index, %e, "claim collision, retrying next tick");
                return;
            }
            Err(e) => {
                error!(worker_index, %e, "claim protocol failed");
                return;
            }
        };
        self.dispatch(job).await;
    }

    /// Looks up the handler, acquires the heavy-task permit if needed, runs
    /// the handler, and applies the terminal transition.
    #[instrument(skip(self, job), fields(job_id = %job.id, job_type = ?job.job_type))]
    async fn dispatch(self: &Arc<Self>, job: Job) {
        let job_id = job.id;
        let job_type = job.job_type;

        let Some(handler) = self.handlers.read().await.get(&job_type).cloned() else {
            error!(job_id = %job_id, "no handler registered for job type");
            let _ = self
                .db
                .fail_job(job_id, &format!("no handler registered for {job_type:?}"))
                .await;
            return;
        };

        let token = CancellationToken::new();
        self.cancel_tokens.lock().await.insert(job_id, token.clone());

        let queue = Arc::clone(self);
        let handle = tokio::spawn(async move {
            let permit = if job_type.is_heavy() {
                tokio::select! {
                    res = queue.heavy_task_semaphore.clone().acquire_owned() => res.ok(),
                    _ = token.cancelled() => {
                        queue.finish_job(&job, Err(PipelineError::Cancelled)).await;
                        queue.cancel_tokens.lock().await.remove(&job_id);
                        queue.active_tasks.write().await.remove(&job_id);
                        return;
                    }
                }
            } else {
                None
            };
            let _permit = permit;

            let ctx = HandlerContext {
                progress: ProgressReporter::new(queue.db.clone(), queue.bus.clone(), job_id),
                cancel: token.clone(),
            };

            let outcome = handler.handle(job.clone(), ctx).await;
            queue.finish_job(&job, outcome).await;
            queue.cancel_tokens.lock().await.remove(&job_id);
            queue.active_tasks.write().await.remove(&job_id);
        });

        self.active_tasks.write().await.insert(job_id, handle);
    }

    /// Applies the terminal transition for a completed handler invocation.
    async fn finish_job(self: &Arc<Self>, job: &Job, outcome: Result<serde_json::Value>) {
        let job_id = job.id;
        match outcome {
            Ok(result) => match self.db.complete_job(job_id, result).await {
                Ok(updated) => {
                    self.bus
                        .publish(&channel_key_job(job_id), BusEvent::JobProgress((&updated).into()))
                        .await;
                    self.reevaluate_readiness_if_applicable(&updated).await;
                }
                Err(e) => error!(job_id = %job_id, %e, "failed to persist job completion"),
            },
            Err(e) if e.is_cancelled() => {
                // row is already CANCELLED via cancel_job; no further publish.
                debug!(job_id = %job_id, "handler observed cancellation");
            }
            Err(e) => match self.db.fail_job(job_id, &e.to_string()).await {
                Ok(updated) => {
                    self.bus
                        .publish(&channel_key_job(job_id), BusEvent::JobProgress((&updated).into()))
                        .await;
                    self.reevaluate_readiness_if_applicable(&updated).await;
                }
                Err(storage_err) => {
                    error!(job_id = %job_id, %storage_err, "failed to persist job failure")
                }
            },
        }
    }

    /// Invoked after terminal transitions of TRANSCRIBE_MEDIA and
    /// INGEST_DOCUMENTS jobs for the affected lecture.
    async fn reevaluate_readiness_if_applicable(&self, job: &Job) {
        if !job.job_type.is_heavy() {
            return;
        }
        let Some(lecture_id) = job.lecture_id else {
            return;
        };
        let transcript_status = match self.db.transcript_status(lecture_id).await {
            Ok(s) => s,
            Err(e) => {
                error!(%e, "failed to read transcript status for readiness");
                return;
            }
        };
        let document_statuses = match self.db.document_statuses(lecture_id).await {
            Ok(s) => s,
            Err(e) => {
                error!(%e, "failed to read document statuses for readiness");
                return;
            }
        };
        let status = evaluate_readiness(transcript_status, &document_statuses);
        if let Err(e) = self.db.write_lecture_status(lecture_id, status).await {
            error!(%e, "failed to persist lecture readiness");
            return;
        }
        info!(%lecture_id, ?status, "lecture readiness re-evaluated");
    }
}

/// Helper used by `lumen-ws` and the server binary to build a `JobUpdate`
/// without depending on the internal row shape.
pub fn job_update(job: &Job) -> JobUpdate {
    job.into()
}
