//! Support files copied next to the generated `.tex`: LaTeX style files and
//! the bibliographies the document actually cites.

use crate::error::Md2TexError;
use crate::pipeline::resolve::copy_if_absent;
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Copy every `*.sty` in `style_dir` into `output_dir`, keeping existing files.
///
/// A missing style directory is reported and skipped.
pub fn copy_styles(style_dir: &Path, output_dir: &Path) -> Result<Vec<PathBuf>, Md2TexError> {
    let entries = match std::fs::read_dir(style_dir) {
        Ok(e) => e,
        Err(e) => {
            warn!("Style directory '{}' unreadable: {}", style_dir.display(), e);
            return Ok(Vec::new());
        }
    };

    let mut styles: Vec<PathBuf> = entries
        .filter_map(Result::ok)
        .map(|e| e.path())
        .filter(|p| p.is_file() && has_extension(p, "sty"))
        .collect();
    styles.sort();

    let mut copied = Vec::new();
    for sty in styles {
        let Some(name) = sty.file_name() else { continue };
        let dest = output_dir.join(name);
        if copy_if_absent(&sty, &dest)? {
            copied.push(dest);
        }
    }
    if !copied.is_empty() {
        info!("Copied {} style file(s)", copied.len());
    }
    Ok(copied)
}

static RE_BIB_KEY: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"@[A-Za-z]+\s*\{\s*([^,\s]+)\s*,").unwrap());

static RE_CITATION: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?:^|[\s\[;(-])@([\w][\w:.#$%&+?<>~/-]*)").unwrap());

/// Citation keys used in a Markdown document (`@key`, `[@key]`, `[-@key]`).
pub fn cited_keys(markdown: &str) -> HashSet<String> {
    RE_CITATION
        .captures_iter(markdown)
        .map(|c| c[1].trim_end_matches(['.', ':', ',', ';']).to_string())
        .collect()
}

/// Entry keys defined in a BibTeX file.
pub fn bib_entry_keys(bib: &str) -> Vec<String> {
    RE_BIB_KEY
        .captures_iter(bib)
        .map(|c| c[1].to_string())
        .collect()
}

/// `*.bib` files in `source_dir` with at least one entry cited by `markdown`,
/// copied into `output_dir`. Returns the destination paths in name order.
pub fn copy_cited_bibliographies(
    source_dir: &Path,
    output_dir: &Path,
    markdown: &str,
) -> Result<Vec<PathBuf>, Md2TexError> {
    let cited = cited_keys(markdown);
    if cited.is_empty() {
        return Ok(Vec::new());
    }

    let mut bibs: Vec<PathBuf> = match std::fs::read_dir(source_dir) {
        Ok(entries) => entries
            .filter_map(Result::ok)
            .map(|e| e.path())
            .filter(|p| p.is_file() && has_extension(p, "bib"))
            .collect(),
        Err(_) => return Ok(Vec::new()),
    };
    bibs.sort();

    let mut used = Vec::new();
    for bib in bibs {
        let Ok(content) = std::fs::read_to_string(&bib) else {
            warn!("Skipping unreadable bibliography '{}'", bib.display());
            continue;
        };
        if !bib_entry_keys(&content).iter().any(|k| cited.contains(k)) {
            debug!("'{}' has no cited entries", bib.display());
            continue;
        }
        let Some(name) = bib.file_name() else { continue };
        let dest = output_dir.join(name);
        copy_if_absent(&bib, &dest)?;
        used.push(dest);
    }
    Ok(used)
}

fn has_extension(path: &Path, ext: &str) -> bool {
    path.extension()
        .map(|e| e.eq_ignore_ascii_case(ext))
        .unwrap_or(false)
}
