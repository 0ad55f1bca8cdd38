//! SVG conversion through an ordered chain of converters.
//!
//! Each converter implements [`Rasterizer`]. [`RasterChain`] tries them in
//! order and stops at the first one that exits cleanly *and* leaves a
//! non-empty output file. Failures never escape the chain: each one becomes a
//! [`Diagnostic`] and the next converter is tried. When every converter fails
//! the raw SVG itself is used and the figure is marked as a vector fallback.
//!
//! | Backend | Output | Invocation |
//! |---------|--------|------------|
//! | Inkscape | PDF | `inkscape <svg> --export-filename <pdf> --export-area-drawing` |
//! | rsvg-convert | PDF | `rsvg-convert -f pdf -o <pdf> <svg>` |
//! | resvg | PNG | in-process render, `spawn_blocking` |
//!
//! Every converter runs under the configured converter timeout.

use crate::config::{ConversionConfig, RasterBackend, ReportingLevel};
use crate::error::Diagnostic;
use crate::pipeline::encode;
use crate::pipeline::exec::{run_tool, ExecError};
use async_trait::async_trait;
use once_cell::sync::OnceCell;
use resvg::tiny_skia::{Pixmap, Transform};
use resvg::usvg::fontdb::Database;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};

/// Longest edge, in pixels, the in-process renderer will allocate.
const MAX_EDGE_PX: f32 = 8000.0;

/// Why a single converter failed.
#[derive(Debug, Error)]
pub enum RasterizeError {
    #[error(transparent)]
    Tool(#[from] ExecError),

    #[error("exit status {status:?}: {stderr}")]
    ExitStatus { status: Option<i32>, stderr: String },

    #[error("no output written to '{}'", path.display())]
    EmptyOutput { path: PathBuf },

    #[error("render failed: {0}")]
    Render(String),

    #[error("render timed out after {}s", .0.as_secs_f32())]
    Timeout(Duration),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// One converter in the chain.
#[async_trait]
pub trait Rasterizer: Send + Sync {
    fn name(&self) -> &str;

    /// Extension of the file this converter writes.
    fn extension(&self) -> &'static str;

    /// Convert `svg_path` to `target_base.<extension>` and return that path.
    async fn rasterize(&self, svg_path: &Path, target_base: &Path)
        -> Result<PathBuf, RasterizeError>;
}

/// Result of running the chain for one figure.
#[derive(Debug, Clone)]
pub struct RasterOutcome {
    /// The file to include: the converted output, or the SVG on fallback.
    pub path: PathBuf,
    pub is_vector_fallback: bool,
    /// Name of the converter that succeeded.
    pub converter: Option<String>,
    pub diagnostics: Vec<Diagnostic>,
}

/// Ordered fallback list of converters.
pub struct RasterChain {
    rasterizers: Vec<Box<dyn Rasterizer>>,
    reporting: ReportingLevel,
}

impl RasterChain {
    pub fn new(rasterizers: Vec<Box<dyn Rasterizer>>, reporting: ReportingLevel) -> Self {
        Self {
            rasterizers,
            reporting,
        }
    }

    /// Build the chain named by `config.rasterizers`.
    pub fn from_config(config: &ConversionConfig) -> Self {
        let timeout = Duration::from_secs(config.converter_timeout_secs);
        let rasterizers = config
            .rasterizers
            .iter()
            .map(|backend| -> Box<dyn Rasterizer> {
                match backend {
                    RasterBackend::Inkscape | RasterBackend::RsvgConvert => {
                        Box::new(CommandRasterizer::new(*backend, timeout))
                    }
                    RasterBackend::Resvg => {
                        Box::new(ResvgRasterizer::new(config.raster_dpi).with_timeout(timeout))
                    }
                }
            })
            .collect();
        Self::new(rasterizers, config.reporting)
    }

    /// An output from an earlier run for the same SVG, if one is on disk.
    pub fn existing_output(&self, target_base: &Path) -> Option<PathBuf> {
        self.rasterizers
            .iter()
            .map(|r| target_base.with_extension(r.extension()))
            .find(|p| is_nonempty_file(p))
    }

    /// Remove every output an earlier run may have written for `target_base`.
    pub async fn discard_outputs(&self, target_base: &Path) -> std::io::Result<()> {
        for rasterizer in &self.rasterizers {
            let path = target_base.with_extension(rasterizer.extension());
            match tokio::fs::remove_file(&path).await {
                Ok(()) => debug!("Removed stale '{}'", path.display()),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }

    /// Try each converter in turn. Never fails.
    pub async fn run(&self, figure: usize, svg_path: &Path, target_base: &Path) -> RasterOutcome {
        let mut diagnostics = Vec::new();

        for rasterizer in &self.rasterizers {
            match rasterizer.rasterize(svg_path, target_base).await {
                Ok(path) => {
                    self.reporting.note(format_args!(
                        "Figure {}: converted by {} → {}",
                        figure,
                        rasterizer.name(),
                        path.display()
                    ));
                    return RasterOutcome {
                        path,
                        is_vector_fallback: false,
                        converter: Some(rasterizer.name().to_string()),
                        diagnostics,
                    };
                }
                Err(e) => {
                    warn!("Figure {}: {} failed: {}", figure, rasterizer.name(), e);
                    diagnostics.push(Diagnostic::ConverterFailed {
                        figure,
                        converter: rasterizer.name().to_string(),
                        detail: e.to_string(),
                    });
                }
            }
        }

        warn!("Figure {}: every converter failed, using the SVG directly", figure);
        diagnostics.push(Diagnostic::VectorFallback { figure });
        RasterOutcome {
            path: svg_path.to_path_buf(),
            is_vector_fallback: true,
            converter: None,
            diagnostics,
        }
    }
}

// ── External converters ──────────────────────────────────────────────────────

/// Inkscape or rsvg-convert, producing PDF.
pub struct CommandRasterizer {
    backend: RasterBackend,
    timeout: Duration,
}

impl CommandRasterizer {
    pub fn new(backend: RasterBackend, timeout: Duration) -> Self {
        Self { backend, timeout }
    }

    fn args(&self, svg: &Path, out: &Path) -> Vec<OsString> {
        match self.backend {
            RasterBackend::Inkscape => vec![
                svg.into(),
                "--export-filename".into(),
                out.into(),
                "--export-area-drawing".into(),
            ],
            _ => vec![
                "-f".into(),
                "pdf".into(),
                "-o".into(),
                out.into(),
                svg.into(),
            ],
        }
    }
}

#[async_trait]
impl Rasterizer for CommandRasterizer {
    fn name(&self) -> &str {
        self.backend.name()
    }

    fn extension(&self) -> &'static str {
        "pdf"
    }

    async fn rasterize(
        &self,
        svg_path: &Path,
        target_base: &Path,
    ) -> Result<PathBuf, RasterizeError> {
        let out = target_base.with_extension(self.extension());
        let result = run_tool(self.name(), self.args(svg_path, &out), None, self.timeout).await?;
        if !result.success {
            return Err(RasterizeError::ExitStatus {
                status: result.status,
                stderr: result.stderr.trim().to_string(),
            });
        }
        if !is_nonempty_file(&out) {
            return Err(RasterizeError::EmptyOutput { path: out });
        }
        Ok(out)
    }
}

// ── In-process converter ─────────────────────────────────────────────────────

/// Default bound on a single in-process render.
const DEFAULT_RENDER_TIMEOUT: Duration = Duration::from_secs(30);

/// resvg renderer producing PNG at a fixed DPI.
pub struct ResvgRasterizer {
    dpi: u32,
    timeout: Duration,
    fonts: OnceCell<Arc<Database>>,
}

impl ResvgRasterizer {
    pub fn new(dpi: u32) -> Self {
        Self {
            dpi,
            timeout: DEFAULT_RENDER_TIMEOUT,
            fonts: OnceCell::new(),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// System fonts, loaded on first use and shared by every figure.
    fn fonts(&self) -> Arc<Database> {
        Arc::clone(self.fonts.get_or_init(|| {
            let mut db = Database::new();
            db.load_system_fonts();
            Arc::new(db)
        }))
    }
}

#[async_trait]
impl Rasterizer for ResvgRasterizer {
    fn name(&self) -> &str {
        "resvg"
    }

    fn extension(&self) -> &'static str {
        "png"
    }

    async fn rasterize(
        &self,
        svg_path: &Path,
        target_base: &Path,
    ) -> Result<PathBuf, RasterizeError> {
        let svg = tokio::fs::read_to_string(svg_path).await?;
        let fonts = self.fonts();
        let dpi = self.dpi;

        let png = run_blocking(self.timeout, move || render_png(&svg, dpi, fonts)).await?;

        let out = target_base.with_extension(self.extension());
        tokio::fs::write(&out, &png).await?;
        if !is_nonempty_file(&out) {
            return Err(RasterizeError::EmptyOutput { path: out });
        }
        Ok(out)
    }
}

/// Run `render` on the blocking pool, giving up after `timeout`.
///
/// A render that times out is abandoned, not stopped: its thread finishes in
/// the background and its result is dropped.
async fn run_blocking<F>(timeout: Duration, render: F) -> Result<Vec<u8>, RasterizeError>
where
    F: FnOnce() -> Result<Vec<u8>, RasterizeError> + Send + 'static,
{
    match tokio::time::timeout(timeout, tokio::task::spawn_blocking(render)).await {
        Ok(joined) => {
            joined.map_err(|e| RasterizeError::Render(format!("render task panicked: {e}")))?
        }
        Err(_) => Err(RasterizeError::Timeout(timeout)),
    }
}

/// Render SVG source to PNG bytes at `dpi` (SVG user units are 96 DPI).
pub fn render_png(svg: &str, dpi: u32, fonts: Arc<Database>) -> Result<Vec<u8>, RasterizeError> {
    let mut options = resvg::usvg::Options::default();
    options.fontdb = fonts;

    let tree = resvg::usvg::Tree::from_str(svg, &options)
        .map_err(|e| RasterizeError::Render(format!("failed to parse SVG: {e}")))?;

    let size = tree.size().to_int_size();
    let (width, height) = (size.width() as f32, size.height() as f32);
    let mut scale = dpi as f32 / 96.0;
    let longest = width.max(height) * scale;
    if longest > MAX_EDGE_PX {
        scale *= MAX_EDGE_PX / longest;
    }

    let px_w = (width * scale).ceil().max(1.0) as u32;
    let px_h = (height * scale).ceil().max(1.0) as u32;
    let mut pixmap = Pixmap::new(px_w, px_h).ok_or_else(|| {
        RasterizeError::Render(format!("failed to allocate {px_w}x{px_h} surface"))
    })?;

    resvg::render(&tree, Transform::from_scale(scale, scale), &mut pixmap.as_mut());

    encode::encode_png(&pixmap).map_err(|e| RasterizeError::Render(format!("PNG encoding: {e}")))
}

pub fn is_nonempty_file(path: &Path) -> bool {
    std::fs::metadata(path)
        .map(|m| m.is_file() && m.len() > 0)
        .unwrap_or(false)
}
