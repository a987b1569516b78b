// Concrete process-invoking adapters for the external collaborators
// (ffmpeg, libreoffice, ghostscript, pandoc/tectonic). These are
// deliberately kept out of `lumen-handlers` — the core only consumes these
// contracts: the handler crate only depends on the
// `MediaSplitter`/`OfficeConverter`/`PdfRasterizer`/`MarkdownPipeline`
// traits, and this binary — the literal OS process — is where shelling out
// actually happens. Every invocation follows the same external process
// contract: exit-code zero on success, stderr captured as the diagnostic
// on failure, scratch-directory file paths for input/output.

use std::path::{Path, PathBuf};
use std::process::Stdio;

use async_trait::async_trait;
use lumen_core::error::{PipelineError, Result};
use lumen_handlers::{AudioSegment, MarkdownPipeline, MediaSplitter, OfficeConverter, PdfRasterizer, RasterizedPage};
use regex::Regex;
use tokio::process::Command;
use uuid::Uuid;

async fn run(mut command: Command, tool: &str) -> Result<Vec<u8>> {
    let output = command
        .stdin(Stdio::null())
        .output()
        .await
        .map_err(|e| PipelineError::external_tool(format!("spawning {tool}: {e}")))?;
    if !output.status.success() {
        return Err(PipelineError::external_tool(format!(
            "{tool} exited with {}: {}",
            output.status,
            String::from_utf8_lossy(&output.stderr).trim()
        )));
    }
    Ok(output.stdout)
}

/// ffmpeg-backed `MediaSplitter`: extracts a mono mp3 track, then segments
/// it with ffmpeg's own `segment` muxer (which already names outputs in
/// ascending order, so segments come back sorted by filename for free).
pub struct FfmpegMediaSplitter {
    ffmpeg_bin: String,
    ffprobe_bin: String,
}

impl FfmpegMediaSplitter {
    pub fn new() -> Self {
        Self {
            ffmpeg_bin: std::env::var("LUMEN_FFMPEG_BIN").unwrap_or_else(|_| "ffmpeg".to_string()),
            ffprobe_bin: std::env::var("LUMEN_FFPROBE_BIN").unwrap_or_else(|_| "ffprobe".to_string()),
        }
    }
}

impl Default for FfmpegMediaSplitter {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl MediaSplitter for FfmpegMediaSplitter {
    async fn extract_and_split(
        &self,
        media_path: &Path,
        scratch_dir: &Path,
        chunk_seconds: u32,
    ) -> Result<Vec<AudioSegment>> {
        tokio::fs::create_dir_all(scratch_dir)
            .await
            .map_err(|e| PipelineError::external_tool(format!("creating scratch dir: {e}")))?;

        let extracted = scratch_dir.join("extracted.mp3");
        run(
            Command::new(&self.ffmpeg_bin).args([
                "-y",
                "-i",
                &media_path.to_string_lossy(),
                "-vn",
                "-ac",
                "1",
                "-c:a",
                "libmp3lame",
                &extracted.to_string_lossy(),
            ]),
            "ffmpeg (extract)",
        )
        .await?;

        let segment_pattern = scratch_dir.join("segment_%04d.mp3");
        run(
            Command::new(&self.ffmpeg_bin).args([
                "-y",
                "-i",
                &extracted.to_string_lossy(),
                "-f",
                "segment",
                "-segment_time",
                &chunk_seconds.to_string(),
                "-c",
                "copy",
                &segment_pattern.to_string_lossy(),
            ]),
            "ffmpeg (segment)",
        )
        .await?;

        let mut entries = tokio::fs::read_dir(scratch_dir)
            .await
            .map_err(|e| PipelineError::external_tool(format!("reading scratch dir: {e}")))?;
        let mut paths = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| PipelineError::external_tool(format!("reading scratch dir entry: {e}")))?
        {
            let path = entry.path();
            if path.file_name().and_then(|n| n.to_str()).is_some_and(|n| n.starts_with("segment_")) {
                paths.push(path);
            }
        }
        paths.sort();

        Ok(paths
            .into_iter()
            .enumerate()
            .map(|(index, path)| AudioSegment {
                path,
                index: index as u32,
            })
            .collect())
    }

    async fn measured_duration_seconds(&self, media_path: &Path) -> Result<Option<f64>> {
        let stdout = run(
            Command::new(&self.ffprobe_bin).args([
                "-v",
                "error",
                "-show_entries",
                "format=duration",
                "-of",
                "csv=p=0",
                &media_path.to_string_lossy(),
            ]),
            "ffprobe",
        )
        .await?;
        let text = String::from_utf8_lossy(&stdout);
        Ok(text.trim().parse::<f64>().ok())
    }
}

/// libreoffice-backed `OfficeConverter`.
pub struct LibreOfficeConverter {
    libreoffice_bin: String,
}

impl LibreOfficeConverter {
    pub fn new() -> Self {
        Self {
            libreoffice_bin: std::env::var("LUMEN_LIBREOFFICE_BIN")
                .unwrap_or_else(|_| "libreoffice".to_string()),
        }
    }
}

impl Default for LibreOfficeConverter {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl OfficeConverter for LibreOfficeConverter {
    async fn convert_to_pdf(&self, source_path: &Path, scratch_dir: &Path) -> Result<PathBuf> {
        tokio::fs::create_dir_all(scratch_dir)
            .await
            .map_err(|e| PipelineError::external_tool(format!("creating scratch dir: {e}")))?;

        run(
            Command::new(&self.libreoffice_bin).args([
                "--headless",
                "--convert-to",
                "pdf",
                "--outdir",
                &scratch_dir.to_string_lossy(),
                &source_path.to_string_lossy(),
            ]),
            "libreoffice",
        )
        .await?;

        let stem = source_path
            .file_stem()
            .ok_or_else(|| PipelineError::invalid_input("source path has no file stem"))?;
        let output = scratch_dir.join(stem).with_extension("pdf");
        if !tokio::fs::try_exists(&output).await.unwrap_or(false) {
            return Err(PipelineError::external_tool(
                "libreoffice did not produce the expected pdf output",
            ));
        }
        Ok(output)
    }
}

/// ghostscript-backed `PdfRasterizer`. gs's `%04d` output
/// pattern already yields sorted filenames.
pub struct GhostscriptRasterizer {
    gs_bin: String,
}

impl GhostscriptRasterizer {
    pub fn new() -> Self {
        Self {
            gs_bin: std::env::var("LUMEN_GHOSTSCRIPT_BIN").unwrap_or_else(|_| "gs".to_string()),
        }
    }
}

impl Default for GhostscriptRasterizer {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl PdfRasterizer for GhostscriptRasterizer {
    async fn rasterize(
        &self,
        pdf_path: &Path,
        scratch_dir: &Path,
        dots_per_inch: u32,
    ) -> Result<Vec<RasterizedPage>> {
        tokio::fs::create_dir_all(scratch_dir)
            .await
            .map_err(|e| PipelineError::external_tool(format!("creating scratch dir: {e}")))?;

        let output_pattern = scratch_dir.join("page_%04d.png");
        run(
            Command::new(&self.gs_bin).args([
                "-q",
                "-dBATCH",
                "-dNOPAUSE",
                "-sDEVICE=png16m",
                &format!("-r{dots_per_inch}"),
                &format!("-sOutputFile={}", output_pattern.to_string_lossy()),
                &pdf_path.to_string_lossy(),
            ]),
            "ghostscript",
        )
        .await?;

        let mut entries = tokio::fs::read_dir(scratch_dir)
            .await
            .map_err(|e| PipelineError::external_tool(format!("reading scratch dir: {e}")))?;
        let mut pages = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| PipelineError::external_tool(format!("reading scratch dir entry: {e}")))?
        {
            let path = entry.path();
            let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
                continue;
            };
            let Some(number) = name
                .strip_prefix("page_")
                .and_then(|rest| rest.strip_suffix(".png"))
                .and_then(|digits| digits.parse::<u32>().ok())
            else {
                continue;
            };
            pages.push(RasterizedPage {
                path,
                page_number: number,
            });
        }
        pages.sort_by_key(|p| p.page_number);
        Ok(pages)
    }
}

/// pandoc/tectonic-backed `MarkdownPipeline`. The figure-citation
/// convention is a single inline token, `{{fig:<path>}}`, emitted by the
/// `content_generation` stage's footnote convention — the Markdown AST
/// that owns real footnote rendering is an out-of-scope collaborator
///, so this only recognizes the one token it needs to enrich or
/// strip.
pub struct PandocTectonicPipeline {
    pandoc_bin: String,
    exports_dir: PathBuf,
    figure_token: Regex,
}

impl PandocTectonicPipeline {
    pub fn new(exports_dir: PathBuf) -> Self {
        Self {
            pandoc_bin: std::env::var("LUMEN_PANDOC_BIN").unwrap_or_else(|_| "pandoc".to_string()),
            exports_dir,
            figure_token: Regex::new(r"\{\{fig:([^}]+)\}\}").expect("valid regex"),
        }
    }
}

#[async_trait]
impl MarkdownPipeline for PandocTectonicPipeline {
    async fn enrich_with_cited_images(&self, markdown: &str, include_images: bool) -> Result<String> {
        if include_images {
            Ok(self
                .figure_token
                .replace_all(markdown, "![figure]($1)")
                .into_owned())
        } else {
            Ok(self.figure_token.replace_all(markdown, "").into_owned())
        }
    }

    async fn convert_and_store(&self, markdown: &str, format: &str, export_id: Uuid) -> Result<PathBuf> {
        tokio::fs::create_dir_all(&self.exports_dir)
            .await
            .map_err(|e| PipelineError::external_tool(format!("creating exports dir: {e}")))?;

        let source_path = self.exports_dir.join(format!("{export_id}.md"));
        tokio::fs::write(&source_path, markdown)
            .await
            .map_err(|e| PipelineError::external_tool(format!("writing source markdown: {e}")))?;

        if format == "md" {
            return Ok(source_path);
        }

        let extension = match format {
            "pdf" | "pdf_no_images" => "pdf",
            "docx" => "docx",
            other => return Err(PipelineError::invalid_input(format!("unknown publish format: {other}"))),
        };
        let output_path = self.exports_dir.join(format!("{export_id}.{extension}"));

        let mut args = vec![
            source_path.to_string_lossy().into_owned(),
            "-o".to_string(),
            output_path.to_string_lossy().into_owned(),
        ];
        if extension == "pdf" {
            args.push("--pdf-engine=tectonic".to_string());
        }
        run(Command::new(&self.pandoc_bin).args(&args), "pandoc").await?;

        Ok(output_path)
    }
}
