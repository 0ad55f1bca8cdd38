//! # md2tex
//!
//! Convert Markdown documents with inline SVG and loosely written image
//! references into LaTeX (and PDF) where every graphic sits in a proper
//! figure environment with a caption, a label and a file that exists.
//!
//! ## Why this crate?
//!
//! pandoc converts Markdown to LaTeX well, but documents written for the web
//! rarely survive the trip intact: inline `<svg>` blocks are dropped, images
//! point at directories that only exist relative to the author's machine,
//! captions live inside the graphic's `<title>` or in the paragraph above it,
//! and hand-written `!(caption)(path)` references come out as literal text.
//! This crate reconciles all of that with heuristics before and after the
//! pandoc run.
//!
//! ## Pipeline Overview
//!
//! ```text
//! Markdown
//!  │
//!  ├─ 1. Input     validate the source, derive <out>/<stem>/
//!  ├─ 2. Extract   inline SVG → pics/figure_N.{pdf,png,svg} + caption cascade
//!  ├─ 3. Resolve   locate referenced images, copy into pics/
//!  ├─ 4. Convert   metadata header + pandoc → <stem>.tex
//!  ├─ 5. Patch     idempotent repair passes over the LaTeX
//!  └─ 6. Typeset   XeLaTeX × 2 → <stem>.pdf (optional)
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use md2tex::{convert, ConversionConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = ConversionConfig::builder()
//!         .output_dir("build")
//!         .cjk_font("Noto Serif CJK SC")
//!         .build()?;
//!     let output = convert("notes.md", &config).await?;
//!     println!("{}", output.tex_path.display());
//!     for d in &output.diagnostics {
//!         eprintln!("warning: {d}");
//!     }
//!     Ok(())
//! }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`   | on      | Enables the `md2tex` binary (clap + anyhow + tracing-subscriber + indicatif) |
//!
//! Disable `cli` when using only the library:
//! ```toml
//! md2tex = { version = "0.3", default-features = false }
//! ```
//!
//! ## External tools
//!
//! | Tool | Needed for | Missing → |
//! |------|-----------|-----------|
//! | `pandoc` | Markdown → LaTeX | fatal `ToolNotFound` |
//! | `xelatex` | LaTeX → PDF | fatal `ToolNotFound` (skip with `typeset(false)`) |
//! | `inkscape`, `rsvg-convert` | SVG → PDF | next rasterizer in the chain |

// ── Modules ──────────────────────────────────────────────────────────────

pub mod config;
pub mod convert;
pub mod error;
pub mod output;
pub mod pipeline;
pub mod progress;
pub mod templates;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use config::{ConversionConfig, ConversionConfigBuilder, RasterBackend, ReportingLevel};
pub use convert::{convert, convert_sync, patch_only};
pub use error::{Diagnostic, Md2TexError};
pub use output::{ConversionOutput, ConversionStats, FigureRecord, ImageReference, ReferenceSyntax};
pub use pipeline::pandoc::{ConvertRequest, DocumentConverter};
pub use pipeline::patch::{patch_document, patch_file, PatchContext, Patched};
pub use pipeline::typeset::TypesetEngine;
pub use progress::{ConversionProgressCallback, NoopProgressCallback, ProgressCallback, Stage};
