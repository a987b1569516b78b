// Readiness Evaluator: a pure function over transcript/document
// status plus a writer that persists the derived value.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::Result;

/// Per-type terminal/non-terminal status used by the evaluator. Both
/// transcripts and documents share this shape in the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProcessingStatus {
    Completed,
    Processing,
    Failed,
}

/// Derived aggregate status of a lecture.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LectureStatus {
    Ready,
    Processing,
    Failed,
}

/// Pure computation: `ready` iff transcript is absent or completed AND every
/// document is completed; `failed` if any terminal failure is present;
/// `processing` otherwise.
pub fn evaluate_readiness(
    transcript_status: Option<ProcessingStatus>,
    document_statuses: &[ProcessingStatus],
) -> LectureStatus {
    let transcript_failed = transcript_status == Some(ProcessingStatus::Failed);
    let any_document_failed = document_statuses
        .iter()
        .any(|s| *s == ProcessingStatus::Failed);
    if transcript_failed || any_document_failed {
        return LectureStatus::Failed;
    }

    let transcript_ready = matches!(
        transcript_status,
        None | Some(ProcessingStatus::Completed)
    );
    let documents_ready = document_statuses
        .iter()
        .all(|s| *s == ProcessingStatus::Completed);

    if transcript_ready && documents_ready {
        LectureStatus::Ready
    } else {
        LectureStatus::Processing
    }
}

/// Persists the derived status. Implemented by the storage crate; kept as a
/// trait here so handlers and the queue can depend on the evaluator without
/// depending on the concrete store.
#[async_trait]
pub trait ReadinessWriter: Send + Sync {
    async fn write_lecture_status(&self, lecture_id: Uuid, status: LectureStatus) -> Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use ProcessingStatus::*;

    #[test]
    fn ready_when_transcript_absent_and_documents_complete() {
        assert_eq!(
            evaluate_readiness(None, &[Completed, Completed]),
            LectureStatus::Ready
        );
    }

    #[test]
    fn processing_when_one_document_lags() {
        // transcript completed, documents {completed, processing}
        assert_eq!(
            evaluate_readiness(Some(Completed), &[Completed, Processing]),
            LectureStatus::Processing
        );
    }

    #[test]
    fn ready_once_all_documents_complete() {
        assert_eq!(
            evaluate_readiness(Some(Completed), &[Completed, Completed]),
            LectureStatus::Ready
        );
    }

    #[test]
    fn failed_when_any_terminal_failure_present() {
        assert_eq!(
            evaluate_readiness(Some(Completed), &[Completed, Failed]),
            LectureStatus::Failed
        );
        assert_eq!(
            evaluate_readiness(Some(Failed), &[Completed]),
            LectureStatus::Failed
        );
    }

    #[test]
    fn processing_when_transcript_still_running() {
        assert_eq!(
            evaluate_readiness(Some(Processing), &[]),
            LectureStatus::Processing
        );
    }
}
