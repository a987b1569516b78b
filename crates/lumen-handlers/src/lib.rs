pub mod budget;
pub mod build_material;
pub mod external;
pub mod ingest_documents;
pub mod payload;
pub mod publish_material;
pub mod transcribe_media;

pub use budget::BudgetGuard;
pub use build_material::BuildMaterialHandler;
pub use external::{
    AudioSegment, MarkdownPipeline, MediaSplitter, OfficeConverter, PdfRasterizer, RasterizedPage,
};
pub use ingest_documents::IngestDocumentsHandler;
pub use publish_material::PublishMaterialHandler;
pub use transcribe_media::TranscribeMediaHandler;
