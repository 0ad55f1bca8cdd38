//! Markdown → LaTeX conversion.
//!
//! The pipeline only needs "turn this Markdown file into that `.tex` file";
//! [`DocumentConverter`] is that seam. [`PandocConverter`] is the production
//! implementation. Tests inject their own converter through
//! [`crate::config::ConversionConfigBuilder::converter`].

use crate::error::Md2TexError;
use crate::pipeline::exec::run_tool;
use async_trait::async_trait;
use std::ffi::OsString;
use std::path::PathBuf;
use std::time::Duration;
use tracing::{debug, info};

const PANDOC_HINT: &str = "Install pandoc from https://pandoc.org/installing.html \
     (macOS: brew install pandoc, Debian/Ubuntu: apt install pandoc).";

/// What to convert and where to write it.
#[derive(Debug, Clone)]
pub struct ConvertRequest {
    /// Markdown with the metadata header already prepended.
    pub input: PathBuf,
    /// The `.tex` file to write.
    pub output: PathBuf,
    /// Bibliography passed to citation processing, when the document cites one.
    pub bibliography: Option<PathBuf>,
    /// Directory the converter runs in; relative asset paths resolve here.
    pub working_dir: PathBuf,
}

/// A Markdown-to-LaTeX converter.
#[async_trait]
pub trait DocumentConverter: Send + Sync {
    fn name(&self) -> &str;

    /// Convert `request.input` into `request.output`.
    ///
    /// A failed conversion is fatal for the run and must carry the tool's
    /// stderr in [`Md2TexError::ConverterFailed`].
    async fn convert(&self, request: &ConvertRequest) -> Result<(), Md2TexError>;
}

/// `pandoc <in> -o <out> --pdf-engine=xelatex -s --listings`.
#[derive(Debug, Clone)]
pub struct PandocConverter {
    timeout: Duration,
}

impl PandocConverter {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }

    fn args(request: &ConvertRequest) -> Vec<OsString> {
        let mut args: Vec<OsString> = vec![
            request.input.clone().into(),
            "-o".into(),
            request.output.clone().into(),
            "--pdf-engine=xelatex".into(),
            "-s".into(),
            "--listings".into(),
        ];
        if let Some(bib) = &request.bibliography {
            args.push("--bibliography".into());
            args.push(bib.clone().into());
            args.push("--citeproc".into());
        }
        args
    }
}

impl Default for PandocConverter {
    fn default() -> Self {
        Self::new(Duration::from_secs(120))
    }
}

#[async_trait]
impl DocumentConverter for PandocConverter {
    fn name(&self) -> &str {
        "pandoc"
    }

    async fn convert(&self, request: &ConvertRequest) -> Result<(), Md2TexError> {
        let args = Self::args(request);
        debug!("pandoc {:?}", args);

        let out = run_tool(
            "pandoc",
            &args,
            Some(&request.working_dir),
            self.timeout,
        )
        .await
        .map_err(|e| e.into_fatal(PANDOC_HINT))?;

        if !out.success {
            return Err(Md2TexError::ConverterFailed {
                tool: "pandoc".into(),
                status: out.status,
                stderr: out.stderr.trim().to_string(),
            });
        }
        if !out.stderr.trim().is_empty() {
            debug!("pandoc stderr: {}", out.stderr.trim());
        }
        info!("pandoc wrote {}", request.output.display());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(bib: Option<&str>) -> ConvertRequest {
        ConvertRequest {
            input: PathBuf::from("/out/doc/.md2tex-input.md"),
            output: PathBuf::from("/out/doc/doc.tex"),
            bibliography: bib.map(PathBuf::from),
            working_dir: PathBuf::from("/out/doc"),
        }
    }

    #[test]
    fn args_without_bibliography() {
        let args = PandocConverter::args(&request(None));
        let args: Vec<String> = args.iter().map(|a| a.to_string_lossy().into_owned()).collect();
        assert_eq!(
            args,
            vec![
                "/out/doc/.md2tex-input.md",
                "-o",
                "/out/doc/doc.tex",
                "--pdf-engine=xelatex",
                "-s",
                "--listings"
            ]
        );
    }

    #[test]
    fn args_with_bibliography_enable_citeproc() {
        let args = PandocConverter::args(&request(Some("/out/doc/refs.bib")));
        let tail: Vec<String> = args[args.len() - 3..]
            .iter()
            .map(|a| a.to_string_lossy().into_owned())
            .collect();
        assert_eq!(tail, vec!["--bibliography", "/out/doc/refs.bib", "--citeproc"]);
    }
}
