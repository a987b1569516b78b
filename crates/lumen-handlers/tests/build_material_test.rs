// Integration tests against a real Postgres database.
// Run with: DATABASE_URL=postgres://... cargo test --test build_material_test -- --ignored

use std::sync::Arc;

use async_trait::async_trait;
use lumen_bus::ProgressBus;
use lumen_core::config::{BudgetConfig, TaskModelTable};
use lumen_core::error::{PipelineError, Result};
use lumen_core::job::{Job, JobStatus, JobType};
use lumen_handlers::build_material::BuildMaterialHandler;
use lumen_providers::{ChatChunk, ChatProvider, ChatRequest, ChatResponseStream};
use futures::stream;
use lumen_queue::{HandlerContext, JobHandler, ProgressReporter};
use lumen_storage::Database;
use serde_json::json;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

struct FixedTextProvider {
    text: &'static str,
    cost_per_call: f64,
}

#[async_trait]
impl ChatProvider for FixedTextProvider {
    async fn chat_stream(&self, _request: ChatRequest) -> Result<ChatResponseStream> {
        let chunk = ChatChunk {
            text: self.text.to_string(),
            input_tokens: 100,
            output_tokens: 100,
            cost: self.cost_per_call,
            error: None,
            done: true,
        };
        Ok(Box::pin(stream::once(async move { chunk })))
    }
}

async fn test_db() -> Database {
    let url = std::env::var("DATABASE_URL").expect("DATABASE_URL must be set for this test");
    Database::from_url(&url).await.expect("connect")
}

fn ctx(db: &Database, bus: &ProgressBus, job_id: Uuid) -> HandlerContext {
    HandlerContext {
        progress: ProgressReporter::new(db.clone(), bus.clone(), job_id),
        cancel: CancellationToken::new(),
    }
}

fn base_job(lecture_id: Uuid) -> Job {
    Job {
        id: Uuid::now_v7(),
        user_id: Uuid::now_v7(),
        course_id: None,
        lecture_id: Some(lecture_id),
        job_type: JobType::BuildMaterial,
        status: JobStatus::Running,
        progress: 0,
        progress_message: None,
        payload: json!({
            "lecture_id": lecture_id,
            "material_type": "guide",
            "length": "short",
            "language_code": "en",
        }),
        result: None,
        error: None,
        metadata: None,
        input_tokens: 0,
        output_tokens: 0,
        estimated_cost_usd: 0.0,
        created_at: chrono::Utc::now(),
        started_at: None,
        completed_at: None,
    }
}

#[tokio::test]
#[ignore]
async fn runs_all_four_stages_and_returns_polished_content() {
    let db = test_db().await;
    let bus = ProgressBus::new();
    let lecture_id = Uuid::now_v7();

    let handler = BuildMaterialHandler::new(
        db.clone(),
        Arc::new(FixedTextProvider {
            text: "stage output",
            cost_per_call: 0.01,
        }),
        TaskModelTable::from_env().unwrap(),
        BudgetConfig::default(),
    );

    let job = base_job(lecture_id);
    let handler_ctx = ctx(&db, &bus, job.id);

    let result = handler.handle(job, handler_ctx).await.unwrap();
    assert_eq!(result["content"], json!("stage output"));
}

#[tokio::test]
#[ignore]
async fn exceeding_cost_ceiling_fails_the_job() {
    let db = test_db().await;
    let bus = ProgressBus::new();
    let lecture_id = Uuid::now_v7();

    let handler = BuildMaterialHandler::new(
        db.clone(),
        Arc::new(FixedTextProvider {
            text: "stage output",
            cost_per_call: 10.0,
        }),
        TaskModelTable::from_env().unwrap(),
        BudgetConfig {
            max_cost_per_job_usd: 1.0,
        },
    );

    let job = base_job(lecture_id);
    let handler_ctx = ctx(&db, &bus, job.id);

    let err = handler.handle(job, handler_ctx).await.unwrap_err();
    assert!(matches!(err, PipelineError::BudgetExceeded(_)));
}
