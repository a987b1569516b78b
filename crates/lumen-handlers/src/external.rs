// Interfaces to the external collaborators (shell invocations of
// ffmpeg/ghostscript/libreoffice/pandoc/tectonic). The core only consumes
// these contracts — concrete process invocation lives outside this
// repository. Every method's contract is the same: exit-code zero on
// success, inputs/outputs are scratch-directory file paths.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use lumen_core::error::Result;
use uuid::Uuid;

/// One extracted, fixed-length audio segment.
#[derive(Debug, Clone)]
pub struct AudioSegment {
    pub path: PathBuf,
    /// Index within the media file, in ascending filename/time order.
    pub index: u32,
}

/// ffmpeg boundary: extracts a mono/compressed audio track and splits it
/// into fixed-length segments.
#[async_trait]
pub trait MediaSplitter: Send + Sync {
    /// Extracts audio from `media_path` into `scratch_dir`, then splits it
    /// into segments of `chunk_seconds`. Returns segments sorted by
    /// filename (the splitter's own ordering).
    async fn extract_and_split(
        &self,
        media_path: &Path,
        scratch_dir: &Path,
        chunk_seconds: u32,
    ) -> Result<Vec<AudioSegment>>;

    /// Measured duration of the source file, for the global-offset
    /// accounting across media files. `None` if the tool can't report it
    /// (caller falls back to `num_segments * segment_duration`).
    async fn measured_duration_seconds(&self, media_path: &Path) -> Result<Option<f64>>;
}

/// libreoffice boundary: office-document to PDF conversion.
#[async_trait]
pub trait OfficeConverter: Send + Sync {
    async fn convert_to_pdf(&self, source_path: &Path, scratch_dir: &Path) -> Result<PathBuf>;
}

/// One rasterized page.
#[derive(Debug, Clone)]
pub struct RasterizedPage {
    pub path: PathBuf,
    pub page_number: u32,
}

/// ghostscript boundary: PDF page rasterization.
#[async_trait]
pub trait PdfRasterizer: Send + Sync {
    async fn rasterize(
        &self,
        pdf_path: &Path,
        scratch_dir: &Path,
        dots_per_inch: u32,
    ) -> Result<Vec<RasterizedPage>>;
}

/// pandoc/tectonic boundary plus the Markdown AST collaborator (the
/// Markdown AST and its renderers are also out of scope — this trait is
/// the seam the publish handler calls through).
#[async_trait]
pub trait MarkdownPipeline: Send + Sync {
    /// Appends cited-page images as figures to the section where they are
    /// first cited. A no-op for formats without images.
    async fn enrich_with_cited_images(&self, markdown: &str, include_images: bool) -> Result<String>;

    /// Converts enriched Markdown through the external document-conversion
    /// pipeline into the requested format, storing the result under the
    /// exports directory and returning its path.
    async fn convert_and_store(
        &self,
        markdown: &str,
        format: &str,
        export_id: Uuid,
    ) -> Result<PathBuf>;
}
