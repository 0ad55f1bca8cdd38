//! Output types: per-figure records, per-reference records and run summary.
//!
//! Every type here is `Serialize + Deserialize` so the CLI can emit the
//! whole run as JSON (`md2tex --json`).

use crate::error::Diagnostic;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Prefix of every placeholder token inserted during SVG extraction.
///
/// Only ASCII letters and digits, so pandoc never escapes it.
pub const PLACEHOLDER_PREFIX: &str = "MDTEXFIG";

/// One graphic discovered in the source document.
///
/// Created by [`crate::pipeline::extract`], read by the patcher, then
/// returned to the caller inside [`ConversionOutput`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FigureRecord {
    /// 1-based position in document order.
    pub index: usize,
    /// Path of the asset relative to the output directory, e.g. `pics/figure_1.pdf`.
    pub source_path: String,
    /// Inferred caption. `None` means "use the generated default".
    pub caption: Option<String>,
    /// Token standing in for the graphic until the patcher runs.
    pub placeholder_token: String,
    /// Every converter failed and the raw SVG is used.
    pub is_vector_fallback: bool,
}

impl FigureRecord {
    /// Placeholder token for the figure at `index`.
    pub fn token_for(index: usize) -> String {
        format!("{PLACEHOLDER_PREFIX}{index:04}")
    }

    /// File stem of the assets written for the figure at `index`.
    pub fn asset_stem_for(index: usize) -> String {
        format!("figure_{index}")
    }

    /// Caption text, falling back to `"{figure_name} {index}"`.
    pub fn caption_or_default(&self, figure_name: &str) -> String {
        match self.caption.as_deref() {
            Some(c) if !c.trim().is_empty() => c.to_string(),
            _ => format!("{} {}", figure_name, self.index),
        }
    }

    /// Cross-reference label of the finished figure block.
    pub fn label(&self) -> String {
        format!("fig:figure_{}", self.index)
    }
}

/// Which authoring syntax an image reference was written in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReferenceSyntax {
    /// `![caption](path)`
    Standard,
    /// `!(caption)(path)`
    LegacyParen,
}

/// An image mentioned in the source document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageReference {
    pub syntax: ReferenceSyntax,
    /// Alt/caption text as written.
    pub alt: String,
    /// Path as written by the author.
    pub written_path: String,
    /// Absolute path of the backing file, once located.
    pub resolved_path: Option<PathBuf>,
    /// Rewritten path relative to the output directory, once located.
    pub normalized_path: Option<String>,
}

impl ImageReference {
    pub fn is_resolved(&self) -> bool {
        self.normalized_path.is_some()
    }
}

/// Result of a full conversion run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversionOutput {
    /// Document title used in the metadata header.
    pub title: String,
    /// Directory holding the `.tex`, assets and (optionally) the PDF.
    pub output_dir: PathBuf,
    /// The patched LaTeX document.
    pub tex_path: PathBuf,
    /// The rendered PDF, when typesetting was requested and succeeded.
    pub pdf_path: Option<PathBuf>,
    /// Extracted SVG figures in document order.
    pub figures: Vec<FigureRecord>,
    /// Image references found in the source.
    pub references: Vec<ImageReference>,
    /// Non-fatal problems encountered along the way.
    pub diagnostics: Vec<Diagnostic>,
    pub stats: ConversionStats,
}

/// Counters and timings for one run.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConversionStats {
    pub figures: usize,
    pub vector_fallbacks: usize,
    pub references_resolved: usize,
    pub references_unresolved: usize,
    pub extract_duration_ms: u64,
    pub convert_duration_ms: u64,
    pub typeset_duration_ms: u64,
    pub total_duration_ms: u64,
}
