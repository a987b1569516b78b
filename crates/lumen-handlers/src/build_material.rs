// BUILD_MATERIAL: four LLM stages over a lecture's transcript and
// document extracts, gated on derived readiness and the Cost/Budget Guard.

use std::sync::Arc;

use async_trait::async_trait;
use futures::StreamExt;
use lumen_core::config::{BudgetConfig, TaskModelTable};
use lumen_core::error::{PipelineError, Result};
use lumen_core::job::{Job, JobType};
use lumen_core::readiness::LectureStatus;
use lumen_providers::{ChatMessage, ChatProvider, ChatRequest, ChatRole};
use lumen_queue::{HandlerContext, JobHandler};
use lumen_storage::Database;

use crate::budget::BudgetGuard;
use crate::payload::{parse_payload, BuildMaterialPayload, MaterialType};

/// One LLM stage in the pipeline: its task-model name, the progress range it
/// owns, and how to build its prompt from the accumulated context.
struct Stage {
    task: &'static str,
    progress_end: i32,
}

const STAGES: [Stage; 4] = [
    Stage {
        task: "outline_creation",
        progress_end: 25,
    },
    Stage {
        task: "content_generation",
        progress_end: 60,
    },
    Stage {
        task: "content_verification",
        progress_end: 85,
    },
    Stage {
        task: "content_polishing",
        progress_end: 100,
    },
];

pub struct BuildMaterialHandler {
    db: Database,
    router: Arc<dyn ChatProvider>,
    task_models: TaskModelTable,
    budget_config: BudgetConfig,
}

impl BuildMaterialHandler {
    pub fn new(
        db: Database,
        router: Arc<dyn ChatProvider>,
        task_models: TaskModelTable,
        budget_config: BudgetConfig,
    ) -> Self {
        Self {
            db,
            router,
            task_models,
            budget_config,
        }
    }

    fn material_label(material_type: MaterialType) -> &'static str {
        match material_type {
            MaterialType::Guide => "study guide",
            MaterialType::Flashcards => "flashcard set",
            MaterialType::Quiz => "quiz",
        }
    }

    fn stage_prompt(
        stage: &Stage,
        payload: &BuildMaterialPayload,
        sources: &str,
        previous: &str,
    ) -> String {
        let label = Self::material_label(payload.material_type);
        match stage.task {
            "outline_creation" => format!(
                "Produce a structured outline for a {label} of length \"{}\" in language \
                 \"{}\", grounded only in the following sources:\n\n{sources}",
                payload.length, payload.language_code
            ),
            "content_generation" => format!(
                "Expand this outline section by section into full {label} content, citing \
                 the source file and page range for every claim using a footnote convention:\n\n\
                 OUTLINE:\n{previous}\n\nSOURCES:\n{sources}"
            ),
            "content_verification" => format!(
                "Re-read this draft against the sources and rewrite it, removing or flagging \
                 any claim not supported by the cited footnotes:\n\nDRAFT:\n{previous}\n\n\
                 SOURCES:\n{sources}"
            ),
            "content_polishing" => format!(
                "Normalize citation formatting, tighten section titles, and format equations \
                 in this content. Return only the final text:\n\n{previous}"
            ),
            other => unreachable!("unknown build_material stage {other}"),
        }
    }
}

#[async_trait]
impl JobHandler for BuildMaterialHandler {
    fn job_type(&self) -> JobType {
        JobType::BuildMaterial
    }

    async fn handle(&self, job: Job, ctx: HandlerContext) -> Result<serde_json::Value> {
        let payload: BuildMaterialPayload = parse_payload(&job.payload)?;

        let transcript_status = self.db.transcript_status(payload.lecture_id).await?;
        let document_statuses = self.db.document_statuses(payload.lecture_id).await?;
        let status = lumen_core::readiness::evaluate_readiness(transcript_status, &document_statuses);
        if status != LectureStatus::Ready {
            return Err(PipelineError::not_ready(format!(
                "lecture {} is not ready for material generation",
                payload.lecture_id
            )));
        }

        let transcript_text = self.db.lecture_transcript_text(payload.lecture_id).await?;
        let document_extracts = self.db.lecture_document_extracts(payload.lecture_id).await?;
        let sources = format!(
            "TRANSCRIPT:\n{transcript_text}\n\nDOCUMENT EXTRACTS:\n{document_extracts}"
        );

        let mut guard = BudgetGuard::new(self.budget_config, ctx.cancel.clone());
        let mut previous = String::new();

        for stage in &STAGES {
            if ctx.is_cancelled() {
                return Err(PipelineError::Cancelled);
            }

            let prompt = Self::stage_prompt(stage, &payload, &sources, &previous);
            let request = ChatRequest::new(
                self.task_models.resolve(stage.task),
                vec![ChatMessage::text(ChatRole::User, prompt)],
            );

            let mut stream = self.router.chat_stream(request).await?;
            let mut text = String::new();
            while let Some(chunk) = stream.next().await {
                if ctx.is_cancelled() {
                    return Err(PipelineError::Cancelled);
                }
                if let Some(err) = chunk.error {
                    return Err(PipelineError::provider(err));
                }
                text.push_str(&chunk.text);
                guard.record_chunk(&chunk)?;
            }
            previous = text;

            ctx.progress
                .report(stage.progress_end, None, None, guard.usage())
                .await?;
        }

        Ok(serde_json::json!({ "content": previous }))
    }
}
