//! Typesetting: `.tex` → `.pdf`.
//!
//! Cross-references need two runs, so the engine is invoked
//! `typeset_passes` times in the output directory. The exit status of the
//! engine is not trusted: XeLaTeX in non-stop mode routinely exits non-zero
//! after recoverable errors while still writing a usable PDF. Success is
//! judged only by the PDF itself, which must exist, be non-empty and have been
//! written by this run.

use crate::error::Md2TexError;
use crate::pipeline::exec::run_tool;
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};
use tracing::{debug, info, warn};

const XELATEX_HINT: &str = "Install a TeX distribution with XeLaTeX \
     (TeX Live: https://tug.org/texlive/, macOS: brew install --cask mactex).";

/// Most `!` error lines carried into a failure report.
const MAX_ERROR_LINES: usize = 20;

/// A LaTeX typesetting engine.
#[async_trait]
pub trait TypesetEngine: Send + Sync {
    fn name(&self) -> &str;

    /// Typeset `tex` with `passes` runs and return the rendered PDF.
    async fn typeset(&self, tex: &Path, passes: u32) -> Result<PathBuf, Md2TexError>;
}

/// `xelatex -interaction=nonstopmode <file>.tex`, run in the file's directory.
#[derive(Debug, Clone)]
pub struct XelatexEngine {
    timeout: Duration,
}

impl XelatexEngine {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

impl Default for XelatexEngine {
    fn default() -> Self {
        Self::new(Duration::from_secs(120))
    }
}

#[async_trait]
impl TypesetEngine for XelatexEngine {
    fn name(&self) -> &str {
        "xelatex"
    }

    async fn typeset(&self, tex: &Path, passes: u32) -> Result<PathBuf, Md2TexError> {
        let dir = tex.parent().unwrap_or_else(|| Path::new("."));
        let file_name = tex
            .file_name()
            .ok_or_else(|| Md2TexError::Internal(format!("not a file: {}", tex.display())))?;
        let pdf = tex.with_extension("pdf");
        let before = modified(&pdf);
        let mut stderr = String::new();

        for pass in 1..=passes {
            info!("xelatex pass {}/{}", pass, passes);
            let out = run_tool(
                "xelatex",
                [
                    std::ffi::OsStr::new("-interaction=nonstopmode"),
                    file_name,
                ],
                Some(dir),
                self.timeout,
            )
            .await
            .map_err(|e| e.into_fatal(XELATEX_HINT))?;

            if !out.success {
                warn!(
                    "xelatex pass {} exited with status {:?}; checking for output",
                    pass, out.status
                );
            }
            stderr = out.stderr;
        }

        if is_fresh_pdf(&pdf, before) {
            info!("Typeset {}", pdf.display());
            return Ok(pdf);
        }

        let log = std::fs::read_to_string(tex.with_extension("log")).unwrap_or_default();
        let mut detail = summarize_log(&log);
        if !stderr.trim().is_empty() {
            detail.push('\n');
            detail.push_str(stderr.trim());
        }
        Err(Md2TexError::TypesetFailed { pdf, detail })
    }
}

fn modified(path: &Path) -> Option<SystemTime> {
    std::fs::metadata(path).and_then(|m| m.modified()).ok()
}

/// The PDF exists, is non-empty and changed since `before` was sampled.
pub fn is_fresh_pdf(pdf: &Path, before: Option<SystemTime>) -> bool {
    let Ok(meta) = std::fs::metadata(pdf) else {
        return false;
    };
    if !meta.is_file() || meta.len() == 0 {
        return false;
    }
    match (before, meta.modified().ok()) {
        (None, _) => true,
        (Some(b), Some(now)) => now != b,
        (Some(_), None) => false,
    }
}

/// The `Output written on …` line and the `!` error lines of a LaTeX log.
pub fn summarize_log(log: &str) -> String {
    let mut lines: Vec<&str> = Vec::new();
    if let Some(written) = log.lines().find(|l| l.starts_with("Output written on")) {
        lines.push(written);
    }
    lines.extend(
        log.lines()
            .filter(|l| l.starts_with('!'))
            .take(MAX_ERROR_LINES),
    );
    if lines.is_empty() {
        debug!("LaTeX log has no output or error lines");
        return "no output written (see the .log file for details)".to_string();
    }
    lines.join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn summary_collects_output_and_error_lines() {
        let log = "This is XeTeX\n! Undefined control sequence.\nl.12 \\foo\n\
                   ! LaTeX Error: File `svg.sty' not found.\n\
                   Output written on doc.pdf (3 pages).\n";
        let summary = summarize_log(log);
        let lines: Vec<&str> = summary.lines().collect();
        assert_eq!(lines[0], "Output written on doc.pdf (3 pages).");
        assert_eq!(lines[1], "! Undefined control sequence.");
        assert_eq!(lines.len(), 3);
    }

    #[test]
    fn summary_of_empty_log() {
        assert!(summarize_log("").contains("no output"));
    }

    #[test]
    fn fresh_pdf_checks() {
        let tmp = tempfile::tempdir().unwrap();
        let pdf = tmp.path().join("doc.pdf");
        assert!(!is_fresh_pdf(&pdf, None));

        std::fs::write(&pdf, b"").unwrap();
        assert!(!is_fresh_pdf(&pdf, None), "empty PDF is a failure");

        std::fs::write(&pdf, b"%PDF").unwrap();
        assert!(is_fresh_pdf(&pdf, None));

        let stamp = modified(&pdf);
        assert!(!is_fresh_pdf(&pdf, stamp), "stale PDF from an earlier run");
    }

    #[tokio::test]
    async fn missing_engine_is_tool_not_found() {
        // Without xelatex on PATH this must be ToolNotFound, never a panic.
        if which::which("xelatex").is_ok() {
            return;
        }
        let tmp = tempfile::tempdir().unwrap();
        let tex = tmp.path().join("doc.tex");
        std::fs::write(&tex, "\\documentclass{article}\\begin{document}x\\end{document}").unwrap();
        let err = XelatexEngine::default().typeset(&tex, 1).await.unwrap_err();
        assert!(matches!(err, Md2TexError::ToolNotFound { .. }));
    }
}
