//! Error types for the md2tex library.
//!
//! Two distinct types reflect two distinct failure modes:
//!
//! * [`Md2TexError`]: **Fatal**: the run cannot proceed (source document
//!   missing, output directory not writable, pandoc or XeLaTeX failed).
//!   Returned as `Err(Md2TexError)` from the top-level `convert*` functions.
//!
//! * [`Diagnostic`]: **Non-fatal**: one image reference could not be
//!   located, or one SVG converter failed and the chain moved on. Stored in
//!   [`crate::output::ConversionOutput::diagnostics`] so callers can inspect
//!   what was degraded without losing the whole document.

use std::path::PathBuf;
use thiserror::Error;

/// All fatal errors returned by the md2tex library.
#[derive(Debug, Error)]
pub enum Md2TexError {
    // ── Input errors ──────────────────────────────────────────────────────
    /// Source Markdown document was not found at the given path.
    #[error("Markdown source not found: '{path}'\nCheck the path exists and is readable.")]
    SourceNotFound { path: PathBuf },

    /// Process does not have read permission on the file.
    #[error("Permission denied reading '{path}'\nTry: chmod +r {path:?}")]
    PermissionDenied { path: PathBuf },

    /// The file exists but could not be read as UTF-8 text.
    #[error("Failed to read '{path}': {source}")]
    ReadFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // ── I/O errors ────────────────────────────────────────────────────────
    /// Could not create or write a file in the output tree.
    #[error("Failed to write '{path}': {source}")]
    OutputWriteFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // ── External tool errors ──────────────────────────────────────────────
    /// A required external binary is not on `PATH`.
    #[error("'{tool}' was not found on PATH.\n{hint}")]
    ToolNotFound { tool: String, hint: String },

    /// An external tool did not finish within its timeout.
    #[error("'{tool}' timed out after {secs}s")]
    ToolTimeout { tool: String, secs: u64 },

    /// The Markdown-to-LaTeX converter exited unsuccessfully.
    #[error("'{tool}' failed (exit status {status:?}):\n{stderr}")]
    ConverterFailed {
        tool: String,
        status: Option<i32>,
        stderr: String,
    },

    /// The typesetting engine did not produce a non-empty PDF.
    #[error("Typesetting did not produce '{pdf}'\n{detail}")]
    TypesetFailed { pdf: PathBuf, detail: String },

    // ── Config errors ─────────────────────────────────────────────────────
    /// Builder validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // ── Catch-all ─────────────────────────────────────────────────────────
    /// Unexpected internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Md2TexError {
    /// Wrap an I/O error raised while writing `path`.
    pub(crate) fn write(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Md2TexError::OutputWriteFailed {
            path: path.into(),
            source,
        }
    }
}

/// A non-fatal problem recorded during conversion.
///
/// The pipeline keeps going after every one of these; they exist so the
/// caller can report what was degraded.
#[derive(Debug, Clone, PartialEq, Eq, Error, serde::Serialize, serde::Deserialize)]
pub enum Diagnostic {
    /// An image reference could not be located in any candidate directory.
    #[error("Image '{path}' could not be located; reference left unchanged")]
    UnresolvedReference { path: String },

    /// One converter in the rasterizer chain failed for a figure.
    #[error("Figure {figure}: converter '{converter}' failed: {detail}")]
    ConverterFailed {
        figure: usize,
        converter: String,
        detail: String,
    },

    /// Every converter failed; the raw SVG is used directly.
    #[error("Figure {figure}: all converters failed, using SVG source directly")]
    VectorFallback { figure: usize },

    /// A graphics inclusion in the typeset output points at a missing file.
    #[error("Included graphic '{path}' is missing from the assets directory")]
    MissingAsset { path: String },

    /// A referenced image shares its asset name with a different file that
    /// is already in the assets directory. The existing file is kept.
    #[error("Image '{path}' differs from the existing asset '{existing}', which was kept")]
    AssetNameCollision { path: String, existing: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn converter_failed_display_includes_stderr() {
        let e = Md2TexError::ConverterFailed {
            tool: "pandoc".into(),
            status: Some(64),
            stderr: "Unknown option --foo".into(),
        };
        let msg = e.to_string();
        assert!(msg.contains("pandoc"), "got: {msg}");
        assert!(msg.contains("64"), "got: {msg}");
        assert!(msg.contains("Unknown option --foo"), "got: {msg}");
    }

    #[test]
    fn tool_timeout_display() {
        let e = Md2TexError::ToolTimeout {
            tool: "xelatex".into(),
            secs: 120,
        };
        assert!(e.to_string().contains("120s"));
    }

    #[test]
    fn diagnostic_display() {
        let d = Diagnostic::UnresolvedReference {
            path: "img/missing.png".into(),
        };
        assert!(d.to_string().contains("img/missing.png"));

        let d = Diagnostic::VectorFallback { figure: 3 };
        assert!(d.to_string().contains("Figure 3"));
    }

    #[test]
    fn diagnostic_serialises_to_json() {
        let d = Diagnostic::ConverterFailed {
            figure: 1,
            converter: "inkscape".into(),
            detail: "exit status 1".into(),
        };
        let json = serde_json::to_string(&d).expect("serialise");
        assert!(json.contains("inkscape"));
        let back: Diagnostic = serde_json::from_str(&json).expect("deserialise");
        assert_eq!(back, d);
    }
}
