//! Configuration types for Markdown-to-LaTeX conversion.
//!
//! All conversion behaviour is controlled through [`ConversionConfig`], built
//! via its [`ConversionConfigBuilder`]. Every stage receives the config (or a
//! context derived from it) explicitly; nothing is read from process-wide
//! mutable state.

use crate::error::Md2TexError;
use crate::pipeline::pandoc::DocumentConverter;
use crate::pipeline::typeset::TypesetEngine;
use crate::progress::ProgressCallback;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;
use tracing::{debug, info};

/// Directory names the image locator treats as "assets-like".
pub const DEFAULT_ASSET_DIR_NAMES: &[&str] = &["pics", "assets", "images", "img", "figures"];

/// Keywords that mark a line of prose as describing the graphic below it.
pub const DEFAULT_CAPTION_KEYWORDS: &[&str] = &[
    "svg visualization",
    "visualization",
    "visualisation",
    "diagram",
    "chart",
    "可视化",
    "示意图",
];

/// Configuration for a Markdown-to-LaTeX conversion.
///
/// # Example
/// ```rust
/// use md2tex::{ConversionConfig, RasterBackend};
///
/// let config = ConversionConfig::builder()
///     .assets_dir("pics")
///     .rasterizers(vec![RasterBackend::Resvg])
///     .typeset(false)
///     .build()
///     .unwrap();
/// ```
#[derive(Clone)]
pub struct ConversionConfig {
    /// Parent of the per-document output directory. `None` → the source's directory.
    pub output_dir: Option<PathBuf>,

    /// Root of the locator's working-directory candidates. `None` → the process's current directory.
    pub working_dir: Option<PathBuf>,

    /// Name of the assets subdirectory inside the output directory. Default: `pics`.
    pub assets_dir: String,

    /// Directory names searched by the image locator. Default: [`DEFAULT_ASSET_DIR_NAMES`].
    pub asset_dir_names: Vec<String>,

    /// Maximum depth of the recursive asset-directory walk. Default: 6.
    ///
    /// `0` disables the walk so only the fixed candidate locations are tried.
    pub walk_depth: usize,

    /// SVG converters, tried in order. Default: Inkscape, rsvg-convert, resvg.
    pub rasterizers: Vec<RasterBackend>,

    /// Per-figure timeout for each external SVG converter, in seconds. Default: 30.
    pub converter_timeout_secs: u64,

    /// Output resolution of the in-process rasterizer. Range: 72–600. Default: 300.
    pub raster_dpi: u32,

    /// Keywords for the "preceding prose" caption rule.
    pub caption_keywords: Vec<String>,

    /// Minimum character count for the "first long text" caption rule. Default: 10.
    pub caption_min_chars: usize,

    /// Word used in generated captions (`"{figure_name} {index}"`). Default: `Figure`.
    pub figure_name: String,

    /// Width option given to every generated `\includegraphics`. Default: `0.8\textwidth`.
    pub figure_width: String,

    /// `\setCJKmainfont` value inserted into the preamble when set.
    pub cjk_font: Option<String>,

    /// Directory whose `*.sty` files are copied next to the `.tex`.
    pub style_dir: Option<PathBuf>,

    /// Run the typesetting engine after conversion. Default: true.
    pub typeset: bool,

    /// Number of typesetting passes (cross-references need two). Default: 2.
    pub typeset_passes: u32,

    /// Timeout for each typesetting pass, in seconds. Default: 120.
    pub typeset_timeout_secs: u64,

    /// Timeout for the Markdown-to-LaTeX converter, in seconds. Default: 120.
    pub pandoc_timeout_secs: u64,

    /// How much per-item detail the stages report. Default: Normal.
    pub reporting: ReportingLevel,

    /// Receives stage and figure events.
    pub progress_callback: Option<ProgressCallback>,

    /// Pre-constructed Markdown-to-LaTeX converter. `None` → pandoc.
    pub converter: Option<Arc<dyn DocumentConverter>>,

    /// Pre-constructed typesetting engine. `None` → XeLaTeX.
    pub engine: Option<Arc<dyn TypesetEngine>>,
}

impl Default for ConversionConfig {
    fn default() -> Self {
        Self {
            output_dir: None,
            working_dir: None,
            assets_dir: "pics".to_string(),
            asset_dir_names: DEFAULT_ASSET_DIR_NAMES.iter().map(|s| s.to_string()).collect(),
            walk_depth: 6,
            rasterizers: vec![
                RasterBackend::Inkscape,
                RasterBackend::RsvgConvert,
                RasterBackend::Resvg,
            ],
            converter_timeout_secs: 30,
            raster_dpi: 300,
            caption_keywords: DEFAULT_CAPTION_KEYWORDS.iter().map(|s| s.to_string()).collect(),
            caption_min_chars: 10,
            figure_name: "Figure".to_string(),
            figure_width: "0.8\\textwidth".to_string(),
            cjk_font: None,
            style_dir: None,
            typeset: true,
            typeset_passes: 2,
            typeset_timeout_secs: 120,
            pandoc_timeout_secs: 120,
            reporting: ReportingLevel::default(),
            progress_callback: None,
            converter: None,
            engine: None,
        }
    }
}

impl fmt::Debug for ConversionConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConversionConfig")
            .field("output_dir", &self.output_dir)
            .field("working_dir", &self.working_dir)
            .field("assets_dir", &self.assets_dir)
            .field("asset_dir_names", &self.asset_dir_names)
            .field("walk_depth", &self.walk_depth)
            .field("rasterizers", &self.rasterizers)
            .field("converter_timeout_secs", &self.converter_timeout_secs)
            .field("raster_dpi", &self.raster_dpi)
            .field("caption_min_chars", &self.caption_min_chars)
            .field("figure_name", &self.figure_name)
            .field("figure_width", &self.figure_width)
            .field("cjk_font", &self.cjk_font)
            .field("style_dir", &self.style_dir)
            .field("typeset", &self.typeset)
            .field("typeset_passes", &self.typeset_passes)
            .field("reporting", &self.reporting)
            .field("converter", &self.converter.as_ref().map(|_| "<dyn DocumentConverter>"))
            .field("engine", &self.engine.as_ref().map(|_| "<dyn TypesetEngine>"))
            .finish()
    }
}

impl ConversionConfig {
    /// Create a new builder for `ConversionConfig`.
    pub fn builder() -> ConversionConfigBuilder {
        ConversionConfigBuilder {
            config: Self::default(),
        }
    }
}

/// Builder for [`ConversionConfig`].
#[derive(Debug)]
pub struct ConversionConfigBuilder {
    config: ConversionConfig,
}

impl ConversionConfigBuilder {
    pub fn output_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.output_dir = Some(dir.into());
        self
    }

    pub fn working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.working_dir = Some(dir.into());
        self
    }

    pub fn assets_dir(mut self, name: impl Into<String>) -> Self {
        self.config.assets_dir = name.into();
        self
    }

    pub fn asset_dir_names(mut self, names: Vec<String>) -> Self {
        self.config.asset_dir_names = names;
        self
    }

    pub fn walk_depth(mut self, depth: usize) -> Self {
        self.config.walk_depth = depth.min(64);
        self
    }

    pub fn rasterizers(mut self, chain: Vec<RasterBackend>) -> Self {
        self.config.rasterizers = chain;
        self
    }

    pub fn converter_timeout_secs(mut self, secs: u64) -> Self {
        self.config.converter_timeout_secs = secs.max(1);
        self
    }

    pub fn raster_dpi(mut self, dpi: u32) -> Self {
        self.config.raster_dpi = dpi.clamp(72, 600);
        self
    }

    pub fn caption_keywords(mut self, keywords: Vec<String>) -> Self {
        self.config.caption_keywords = keywords;
        self
    }

    pub fn caption_min_chars(mut self, n: usize) -> Self {
        self.config.caption_min_chars = n;
        self
    }

    pub fn figure_name(mut self, name: impl Into<String>) -> Self {
        self.config.figure_name = name.into();
        self
    }

    pub fn figure_width(mut self, width: impl Into<String>) -> Self {
        self.config.figure_width = width.into();
        self
    }

    pub fn cjk_font(mut self, font: impl Into<String>) -> Self {
        self.config.cjk_font = Some(font.into());
        self
    }

    pub fn style_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.style_dir = Some(dir.into());
        self
    }

    pub fn typeset(mut self, v: bool) -> Self {
        self.config.typeset = v;
        self
    }

    pub fn typeset_passes(mut self, n: u32) -> Self {
        self.config.typeset_passes = n;
        self
    }

    pub fn typeset_timeout_secs(mut self, secs: u64) -> Self {
        self.config.typeset_timeout_secs = secs.max(1);
        self
    }

    pub fn pandoc_timeout_secs(mut self, secs: u64) -> Self {
        self.config.pandoc_timeout_secs = secs.max(1);
        self
    }

    pub fn reporting(mut self, level: ReportingLevel) -> Self {
        self.config.reporting = level;
        self
    }

    pub fn progress_callback(mut self, cb: ProgressCallback) -> Self {
        self.config.progress_callback = Some(cb);
        self
    }

    pub fn converter(mut self, converter: Arc<dyn DocumentConverter>) -> Self {
        self.config.converter = Some(converter);
        self
    }

    pub fn engine(mut self, engine: Arc<dyn TypesetEngine>) -> Self {
        self.config.engine = Some(engine);
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<ConversionConfig, Md2TexError> {
        let c = &self.config;
        if !is_plain_dir_name(&c.assets_dir) {
            return Err(Md2TexError::InvalidConfig(format!(
                "assets directory must be a single relative path component, got '{}'",
                c.assets_dir
            )));
        }
        if c.figure_name.trim().is_empty() {
            return Err(Md2TexError::InvalidConfig(
                "figure name must not be empty".into(),
            ));
        }
        if c.typeset && c.typeset_passes == 0 {
            return Err(Md2TexError::InvalidConfig(
                "typeset passes must be ≥ 1 when typesetting is enabled".into(),
            ));
        }
        Ok(self.config)
    }
}

fn is_plain_dir_name(name: &str) -> bool {
    !name.is_empty()
        && name != "."
        && name != ".."
        && !name.contains('/')
        && !name.contains('\\')
}

// ── Enums ────────────────────────────────────────────────────────────────

/// One SVG converter in the rasterizer chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RasterBackend {
    /// `inkscape --export-filename=<pdf> --export-area-drawing`
    Inkscape,
    /// `rsvg-convert -f pdf -o <pdf>`
    RsvgConvert,
    /// In-process rendering to PNG via resvg.
    Resvg,
}

impl RasterBackend {
    pub fn name(self) -> &'static str {
        match self {
            RasterBackend::Inkscape => "inkscape",
            RasterBackend::RsvgConvert => "rsvg-convert",
            RasterBackend::Resvg => "resvg",
        }
    }
}

impl fmt::Display for RasterBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for RasterBackend {
    type Err = Md2TexError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "inkscape" => Ok(RasterBackend::Inkscape),
            "rsvg-convert" | "rsvg" => Ok(RasterBackend::RsvgConvert),
            "resvg" => Ok(RasterBackend::Resvg),
            other => Err(Md2TexError::InvalidConfig(format!(
                "unknown rasterizer '{other}' (expected inkscape, rsvg-convert or resvg)"
            ))),
        }
    }
}

/// How much per-item detail the pipeline reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ReportingLevel {
    /// Per-item notes are dropped; warnings still go through `tracing`.
    Quiet,
    /// Per-item notes at `debug`. (default)
    #[default]
    Normal,
    /// Per-item notes at `info`.
    Verbose,
}

impl ReportingLevel {
    /// Emit a per-item note at the level this setting asks for.
    pub fn note(self, message: impl fmt::Display) {
        match self {
            ReportingLevel::Quiet => {}
            ReportingLevel::Normal => debug!("{message}"),
            ReportingLevel::Verbose => info!("{message}"),
        }
    }
}
