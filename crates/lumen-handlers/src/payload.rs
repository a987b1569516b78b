// Tagged payload/result shapes per job type: a tagged union per job type,
// (de)serialized at the queue boundary. The durable column stays opaque
// `serde_json::Value`; parsing happens here and fails loudly on shape
// mismatch.

use lumen_core::error::{PipelineError, Result};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Deserialize)]
pub struct TranscribeMediaPayload {
    pub lecture_id: Uuid,
    pub media_ids: Vec<Uuid>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct IngestDocumentsPayload {
    pub document_id: Uuid,
    pub source_path: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MaterialType {
    Guide,
    Flashcards,
    Quiz,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BuildMaterialPayload {
    pub lecture_id: Uuid,
    pub material_type: MaterialType,
    pub length: String,
    pub language_code: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PublishResourceKind {
    Tool,
    Document,
    LectureTranscript,
}

impl PublishResourceKind {
    pub fn as_str(self) -> &'static str {
        match self {
            PublishResourceKind::Tool => "tool",
            PublishResourceKind::Document => "document",
            PublishResourceKind::LectureTranscript => "lecture_transcript",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PublishFormat {
    Pdf,
    PdfNoImages,
    Docx,
    Md,
}

impl PublishFormat {
    pub fn as_str(self) -> &'static str {
        match self {
            PublishFormat::Pdf => "pdf",
            PublishFormat::PdfNoImages => "pdf_no_images",
            PublishFormat::Docx => "docx",
            PublishFormat::Md => "md",
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct PublishMaterialPayload {
    pub resource_kind: PublishResourceKind,
    pub resource_id: Uuid,
    pub format: PublishFormat,
    #[serde(default)]
    pub include_images: bool,
}

/// Parses a job's opaque payload into the typed shape its handler expects.
/// Fails loudly (as `InvalidInput`) on shape mismatch rather than silently
/// defaulting fields.
pub fn parse_payload<T: for<'de> Deserialize<'de>>(payload: &serde_json::Value) -> Result<T> {
    serde_json::from_value(payload.clone())
        .map_err(|e| PipelineError::invalid_input(format!("malformed job payload: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_malformed_transcribe_payload() {
        let bad = serde_json::json!({ "media_ids": "not-an-array" });
        let result: Result<TranscribeMediaPayload> = parse_payload(&bad);
        assert!(matches!(result, Err(PipelineError::InvalidInput(_))));
    }

    #[test]
    fn parses_well_formed_build_material_payload() {
        let good = serde_json::json!({
            "lecture_id": Uuid::now_v7(),
            "material_type": "guide",
            "length": "short",
            "language_code": "en",
        });
        let parsed: BuildMaterialPayload = parse_payload(&good).unwrap();
        assert_eq!(parsed.material_type, MaterialType::Guide);
    }
}
