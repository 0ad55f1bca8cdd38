//! Input resolution: validate the source Markdown and derive the output layout.
//!
//! A missing or unreadable source is the only input failure, and it is fatal:
//! it is reported before any stage touches the filesystem.

use crate::config::ConversionConfig;
use crate::error::Md2TexError;
use once_cell::sync::Lazy;
use regex::Regex;
use std::path::{Path, PathBuf};
use tracing::debug;

/// A source document that exists and has been read.
#[derive(Debug, Clone)]
pub struct SourceDocument {
    /// Canonical path of the Markdown file.
    pub path: PathBuf,
    /// Directory containing the file; relative image paths resolve against it.
    pub dir: PathBuf,
    /// File name without extension; names the output directory and `.tex`.
    pub stem: String,
    pub content: String,
}

impl SourceDocument {
    /// Title for the metadata header: first `# Heading`, else the stem.
    pub fn title(&self) -> String {
        document_title(&self.content).unwrap_or_else(|| self.stem.clone())
    }

    /// `<output_dir or source dir>/<stem>`.
    pub fn output_dir(&self, config: &ConversionConfig) -> PathBuf {
        config
            .output_dir
            .as_deref()
            .unwrap_or(&self.dir)
            .join(&self.stem)
    }
}

/// Read and validate the source document.
pub fn resolve_source(path: impl AsRef<Path>) -> Result<SourceDocument, Md2TexError> {
    let path = path.as_ref();

    if !path.is_file() {
        return Err(Md2TexError::SourceNotFound {
            path: path.to_path_buf(),
        });
    }

    let content = match std::fs::read_to_string(path) {
        Ok(c) => c,
        Err(e) if e.kind() == std::io::ErrorKind::PermissionDenied => {
            return Err(Md2TexError::PermissionDenied {
                path: path.to_path_buf(),
            });
        }
        Err(e) => {
            return Err(Md2TexError::ReadFailed {
                path: path.to_path_buf(),
                source: e,
            });
        }
    };

    let canonical = std::fs::canonicalize(path).map_err(|e| Md2TexError::ReadFailed {
        path: path.to_path_buf(),
        source: e,
    })?;
    let dir = canonical
        .parent()
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from("."));
    let stem = canonical
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "document".to_string());

    debug!("Resolved source: {}", canonical.display());

    Ok(SourceDocument {
        path: canonical,
        dir,
        stem,
        content,
    })
}

static RE_TITLE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?m)^#[ \t]+(.+?)[ \t#]*$").unwrap());

/// First level-1 ATX heading of the document.
pub fn document_title(content: &str) -> Option<String> {
    RE_TITLE
        .captures(content)
        .map(|c| c[1].trim().to_string())
        .filter(|t| !t.is_empty())
}
