// Integration tests against a real Postgres database.
// Run with: DATABASE_URL=postgres://... cargo test --test claim_protocol_test -- --ignored

use std::sync::Arc;

use async_trait::async_trait;
use lumen_bus::ProgressBus;
use lumen_core::config::QueueConfig;
use lumen_core::error::Result;
use lumen_core::job::{Job, JobStatus, JobType};
use lumen_queue::{HandlerContext, JobHandler, JobQueue};
use lumen_storage::Database;
use serde_json::json;
use uuid::Uuid;

struct EchoHandler;

#[async_trait]
impl JobHandler for EchoHandler {
    fn job_type(&self) -> JobType {
        JobType::BuildMaterial
    }

    async fn handle(&self, job: Job, ctx: HandlerContext) -> Result<serde_json::Value> {
        ctx.progress
            .report(50, Some("halfway"), None, Default::default())
            .await?;
        Ok(json!({ "echoed": job.payload }))
    }
}

async fn test_db() -> Database {
    let url = std::env::var("DATABASE_URL").expect("DATABASE_URL must be set for this test");
    Database::from_url(&url).await.expect("connect")
}

#[tokio::test]
#[ignore]
async fn happy_path_job_completes() {
    let db = test_db().await;
    let bus = ProgressBus::new();
    let queue = JobQueue::new(db, bus, QueueConfig {
        worker_count: 1,
        tick_interval: std::time::Duration::from_millis(50),
    });
    queue.register_handler(Arc::new(EchoHandler)).await;

    let user_id = Uuid::now_v7();
    let job_id = queue
        .enqueue(user_id, JobType::BuildMaterial, json!({"a": 1}), None, None)
        .await
        .unwrap();

    let _handles = queue.start();
    tokio::time::sleep(std::time::Duration::from_millis(500)).await;

    let job = queue.get_job(job_id).await.unwrap().unwrap();
    assert_eq!(job.status, JobStatus::Completed);
    assert_eq!(job.progress, 100);
    queue.shutdown();
}

#[tokio::test]
#[ignore]
async fn crash_recovery_fails_running_rows() {
    let db = test_db().await;
    let job_id = db
        .enqueue_job(Uuid::now_v7(), JobType::BuildMaterial, json!({}), None, None)
        .await
        .unwrap();
    // simulate a worker that claimed the row and then the process died
    db.claim_next_job().await.unwrap();

    let bus = ProgressBus::new();
    let queue = JobQueue::new(db, bus, QueueConfig::default());
    queue.recover_crashed_jobs().await.unwrap();

    let job = queue.get_job(job_id).await.unwrap().unwrap();
    assert_eq!(job.status, JobStatus::Failed);
    assert_eq!(
        job.error.as_deref(),
        Some("server restarted while task was running")
    );
}
