//! Full-document conversion entry points.
//!
//! [`convert`] runs every stage strictly in order over one source document:
//! support files, SVG extraction, reference resolution, pandoc, the LaTeX
//! patcher and (optionally) XeLaTeX. The document text and the figure list
//! are the only state handed from one stage to the next.

use crate::config::ConversionConfig;
use crate::error::{Diagnostic, Md2TexError};
use crate::output::{ConversionOutput, ConversionStats, FigureRecord};
use crate::pipeline::extract::GraphicsExtractor;
use crate::pipeline::input::{self, SourceDocument};
use crate::pipeline::locate::ImageLocator;
use crate::pipeline::pandoc::{ConvertRequest, DocumentConverter, PandocConverter};
use crate::pipeline::patch::{self, PatchContext, Patched};
use crate::pipeline::resolve::ReferenceResolver;
use crate::pipeline::support;
use crate::pipeline::typeset::{TypesetEngine, XelatexEngine};
use crate::progress::Stage;
use crate::templates;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info};

/// Convert a Markdown file to LaTeX (and PDF, when typesetting is enabled).
///
/// # Returns
/// `Ok(ConversionOutput)` on success, even if some images could not be
/// located or some figures fell back to raw SVG (see `output.diagnostics`).
///
/// # Errors
/// Returns `Err(Md2TexError)` only for fatal errors:
/// - Source document missing or unreadable
/// - Output directory not writable
/// - pandoc or XeLaTeX missing, timed out or failed
pub async fn convert(
    source: impl AsRef<Path>,
    config: &ConversionConfig,
) -> Result<ConversionOutput, Md2TexError> {
    let total_start = Instant::now();
    let source = source.as_ref();
    info!("Starting conversion: {}", source.display());

    // ── Step 1: Resolve input ────────────────────────────────────────────
    let doc = input::resolve_source(source)?;
    // External tools run inside the output directory, so every path handed
    // to them must be absolute.
    let output_dir = doc.output_dir(config);
    let output_dir =
        std::path::absolute(&output_dir).map_err(|e| Md2TexError::write(&output_dir, e))?;
    tokio::fs::create_dir_all(&output_dir)
        .await
        .map_err(|e| Md2TexError::write(&output_dir, e))?;
    debug!("Output directory: {}", output_dir.display());

    if let Some(ref cb) = config.progress_callback {
        cb.on_conversion_start(&doc.path.to_string_lossy());
    }

    // ── Step 2: Support files ────────────────────────────────────────────
    if let Some(ref style_dir) = config.style_dir {
        support::copy_styles(style_dir, &output_dir)?;
    }
    let bibliographies = support::copy_cited_bibliographies(&doc.dir, &output_dir, &doc.content)?;

    let mut diagnostics: Vec<Diagnostic> = Vec::new();

    // ── Step 3: Extract inline SVG ───────────────────────────────────────
    let stage_start = start_stage(config, Stage::ExtractGraphics);
    let extraction = GraphicsExtractor::new(&output_dir, config)
        .extract(&doc.content)
        .await?;
    if let Some(ref cb) = config.progress_callback {
        for figure in &extraction.figures {
            cb.on_figure(figure);
        }
    }
    diagnostics.extend(extraction.diagnostics);
    let figures = extraction.figures;
    let extract_duration_ms = finish_stage(config, Stage::ExtractGraphics, stage_start);

    // ── Step 4: Resolve image references ─────────────────────────────────
    let stage_start = start_stage(config, Stage::ResolveReferences);
    let locator = ImageLocator::for_source(&doc.dir, config);
    let resolution = ReferenceResolver::new(&locator, &output_dir, config)
        .with_reserved_stems(figures.iter().map(|f| FigureRecord::asset_stem_for(f.index)))
        .resolve(&extraction.document)?;
    if let Some(ref cb) = config.progress_callback {
        for reference in &resolution.references {
            cb.on_reference(reference);
        }
    }
    diagnostics.extend(resolution.diagnostics);
    let references = resolution.references;
    let references_resolved = references.iter().filter(|r| r.is_resolved()).count();
    finish_stage(config, Stage::ResolveReferences, stage_start);

    // ── Step 5: Markdown → LaTeX ─────────────────────────────────────────
    let stage_start = start_stage(config, Stage::Convert);
    let tex_path = output_dir.join(format!("{}.tex", doc.stem));
    let svg_package = figures.iter().any(|f| f.is_vector_fallback);
    let markdown = format!(
        "{}{}",
        templates::metadata_header(&doc.title(), svg_package),
        resolution.document
    );
    run_converter(
        &doc,
        &output_dir,
        &tex_path,
        &markdown,
        bibliographies.first().cloned(),
        config,
    )
    .await?;
    let convert_duration_ms = finish_stage(config, Stage::Convert, stage_start);

    // ── Step 6: Patch the generated LaTeX ────────────────────────────────
    let stage_start = start_stage(config, Stage::Patch);
    let ctx = PatchContext::new(&output_dir, config)
        .with_figures(figures.clone())
        .with_locator(locator);
    let patched = patch::patch_file(&tex_path, &ctx)?;
    diagnostics.extend(patched.diagnostics);
    finish_stage(config, Stage::Patch, stage_start);

    // ── Step 7: Typeset ──────────────────────────────────────────────────
    let mut typeset_duration_ms = 0;
    let pdf_path = if config.typeset {
        let stage_start = start_stage(config, Stage::Typeset);
        let engine: Arc<dyn TypesetEngine> = match config.engine {
            Some(ref engine) => Arc::clone(engine),
            None => Arc::new(XelatexEngine::new(Duration::from_secs(
                config.typeset_timeout_secs,
            ))),
        };
        debug!("Typesetting with {}", engine.name());
        let pdf = engine.typeset(&tex_path, config.typeset_passes).await?;
        typeset_duration_ms = finish_stage(config, Stage::Typeset, stage_start);
        Some(pdf)
    } else {
        None
    };

    // ── Step 8: Compute stats ────────────────────────────────────────────
    let stats = ConversionStats {
        figures: figures.len(),
        vector_fallbacks: figures.iter().filter(|f| f.is_vector_fallback).count(),
        references_resolved,
        references_unresolved: references.len() - references_resolved,
        extract_duration_ms,
        convert_duration_ms,
        typeset_duration_ms,
        total_duration_ms: total_start.elapsed().as_millis() as u64,
    };

    info!(
        "Conversion complete: {} figure(s), {} diagnostic(s), {}ms total",
        stats.figures,
        diagnostics.len(),
        stats.total_duration_ms
    );

    if let Some(ref cb) = config.progress_callback {
        cb.on_conversion_complete(figures.len(), diagnostics.len());
    }

    Ok(ConversionOutput {
        title: doc.title(),
        output_dir,
        tex_path,
        pdf_path,
        figures,
        references,
        diagnostics,
        stats,
    })
}

/// Synchronous wrapper around [`convert`].
///
/// Creates a temporary tokio runtime internally.
pub fn convert_sync(
    source: impl AsRef<Path>,
    config: &ConversionConfig,
) -> Result<ConversionOutput, Md2TexError> {
    tokio::runtime::Runtime::new()
        .map_err(|e| Md2TexError::Internal(format!("Failed to create tokio runtime: {}", e)))?
        .block_on(convert(source, config))
}

/// Re-run the patcher over an existing `.tex` file.
///
/// Figure records are not available here, so placeholder captions fall back
/// to whatever the document already carries. Images missing from the assets
/// directory are searched for relative to the file's directory.
pub fn patch_only(tex_path: impl AsRef<Path>, config: &ConversionConfig) -> Result<Patched, Md2TexError> {
    let tex_path = tex_path.as_ref();
    let dir = tex_path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from("."));
    let ctx = PatchContext::new(&dir, config).with_locator(ImageLocator::for_source(&dir, config));
    let patched = patch::patch_file(tex_path, &ctx)?;
    info!(
        "Patched {} ({} diagnostic(s))",
        tex_path.display(),
        patched.diagnostics.len()
    );
    Ok(patched)
}

// ── Internal helpers ─────────────────────────────────────────────────────

/// Write the header-prefixed Markdown to a temporary file next to the
/// output and hand it to the configured converter. The temporary file is
/// removed when this returns.
async fn run_converter(
    doc: &SourceDocument,
    output_dir: &Path,
    tex_path: &Path,
    markdown: &str,
    bibliography: Option<PathBuf>,
    config: &ConversionConfig,
) -> Result<(), Md2TexError> {
    let mut tmp = tempfile::Builder::new()
        .prefix(&format!(".{}-", doc.stem))
        .suffix(".md")
        .tempfile_in(output_dir)
        .map_err(|e| Md2TexError::write(output_dir, e))?;
    tmp.write_all(markdown.as_bytes())
        .and_then(|_| tmp.flush())
        .map_err(|e| Md2TexError::write(tmp.path(), e))?;

    let converter: Arc<dyn DocumentConverter> = match config.converter {
        Some(ref converter) => Arc::clone(converter),
        None => Arc::new(PandocConverter::new(Duration::from_secs(
            config.pandoc_timeout_secs,
        ))),
    };
    let request = ConvertRequest {
        input: tmp.path().to_path_buf(),
        output: tex_path.to_path_buf(),
        bibliography,
        working_dir: output_dir.to_path_buf(),
    };
    info!("Converting with {}", converter.name());
    converter.convert(&request).await
}

fn start_stage(config: &ConversionConfig, stage: Stage) -> Instant {
    if let Some(ref cb) = config.progress_callback {
        cb.on_stage_start(stage);
    }
    info!("Stage: {}", stage);
    Instant::now()
}

/// Fire the completion callback and return the elapsed milliseconds.
fn finish_stage(config: &ConversionConfig, stage: Stage, started: Instant) -> u64 {
    let elapsed_ms = started.elapsed().as_millis() as u64;
    debug!("{} finished in {}ms", stage, elapsed_ms);
    if let Some(ref cb) = config.progress_callback {
        cb.on_stage_complete(stage, elapsed_ms);
    }
    elapsed_ms
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn missing_source_is_fatal_before_any_stage() {
        let tmp = tempfile::tempdir().unwrap();
        let config = ConversionConfig::builder()
            .output_dir(tmp.path())
            .typeset(false)
            .build()
            .unwrap();
        let err = convert(tmp.path().join("absent.md"), &config).await.unwrap_err();
        assert!(matches!(err, Md2TexError::SourceNotFound { .. }));
        assert_eq!(std::fs::read_dir(tmp.path()).unwrap().count(), 0);
    }

    #[test]
    fn patch_only_missing_file() {
        let config = ConversionConfig::default();
        let err = patch_only("/definitely/not/here.tex", &config).unwrap_err();
        assert!(matches!(err, Md2TexError::SourceNotFound { .. }));
    }

    #[test]
    fn patch_only_rewrites_legacy_image() {
        let tmp = tempfile::tempdir().unwrap();
        let tex = tmp.path().join("doc.tex");
        std::fs::write(
            &tex,
            "\\begin{document}\n!(Overview)(pics/figure\\_1.png)\n\\end{document}\n",
        )
        .unwrap();
        let config = ConversionConfig::default();
        patch_only(&tex, &config).unwrap();
        let out = std::fs::read_to_string(&tex).unwrap();
        assert!(out.contains("\\begin{figure}"), "got: {out}");
        assert!(out.contains("\\caption{Overview}"), "got: {out}");
    }
}
