//! Reference resolution: locate the files behind Markdown image references
//! and copy them into the assets directory.
//!
//! Two syntaxes are recognised:
//!
//! * `![caption](path)` (an optional `"title"` after the path is kept)
//! * `!(caption)(path)`, the legacy form, whose caption often carries a
//!   figure number such as `图 1: …`
//!
//! A located file is copied to `<assets>/<file name>` only when nothing is
//! there yet, so re-running never touches an existing asset. An existing
//! asset of the same name with different content is kept and reported as a
//! [`Diagnostic::AssetNameCollision`]. File stems reserved for extracted
//! figures (`figure_N`) are never reused: such a file is copied as
//! `figure_N-src.<ext>` instead. The reference is rewritten to the asset path
//! in its original syntax. A reference that cannot be located is left exactly
//! as written and reported as a [`Diagnostic::UnresolvedReference`].
//!
//! References inside fenced blocks and inline code spans are code, not
//! images, and are left alone.

use crate::config::{ConversionConfig, ReportingLevel};
use crate::error::{Diagnostic, Md2TexError};
use crate::output::{ImageReference, ReferenceSyntax, PLACEHOLDER_PREFIX};
use crate::pipeline::extract::code_regions;
use crate::pipeline::locate::{is_remote, ImageLocator};
use once_cell::sync::Lazy;
use regex::{Captures, Regex};
use std::collections::HashSet;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

static RE_STANDARD: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"!\[([^\]\n]*)\]\(\s*(<[^>\n]+>|[^\s()]+)(\s+"[^"\n]*")?\s*\)"#).unwrap()
});

static RE_LEGACY: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"!\(([^()\n]*)\)\(\s*([^\s()]+)\s*\)").unwrap());

/// Output of the resolution stage.
#[derive(Debug, Clone)]
pub struct Resolution {
    pub document: String,
    /// Every reference examined, in syntax order then document order.
    pub references: Vec<ImageReference>,
    pub diagnostics: Vec<Diagnostic>,
}

/// Locates referenced images and normalises their paths.
pub struct ReferenceResolver<'a> {
    locator: &'a ImageLocator,
    /// Absolute assets directory, `<output>/<assets_name>`.
    assets_dir: PathBuf,
    assets_name: String,
    /// Asset file stems owned by extracted figures.
    reserved_stems: HashSet<String>,
    reporting: ReportingLevel,
}

impl<'a> ReferenceResolver<'a> {
    pub fn new(locator: &'a ImageLocator, output_dir: &Path, config: &ConversionConfig) -> Self {
        Self {
            locator,
            assets_dir: output_dir.join(&config.assets_dir),
            assets_name: config.assets_dir.clone(),
            reserved_stems: HashSet::new(),
            reporting: config.reporting,
        }
    }

    /// Keep referenced images from sharing a file stem with these assets.
    pub fn with_reserved_stems(mut self, stems: impl IntoIterator<Item = String>) -> Self {
        self.reserved_stems.extend(stems);
        self
    }

    pub fn resolve(&self, document: &str) -> Result<Resolution, Md2TexError> {
        let mut references = Vec::new();
        let mut diagnostics = Vec::new();

        let doc = self.rewrite(
            &RE_STANDARD,
            ReferenceSyntax::Standard,
            document,
            &mut references,
            &mut diagnostics,
        )?;
        let doc = self.rewrite(
            &RE_LEGACY,
            ReferenceSyntax::LegacyParen,
            &doc,
            &mut references,
            &mut diagnostics,
        )?;

        let resolved = references.iter().filter(|r| r.is_resolved()).count();
        info!(
            "Resolved {}/{} image reference(s)",
            resolved,
            references.len()
        );

        Ok(Resolution {
            document: doc,
            references,
            diagnostics,
        })
    }

    fn rewrite(
        &self,
        re: &Regex,
        syntax: ReferenceSyntax,
        text: &str,
        references: &mut Vec<ImageReference>,
        diagnostics: &mut Vec<Diagnostic>,
    ) -> Result<String, Md2TexError> {
        let code = code_regions(text);
        let mut failure = None;
        let out = re.replace_all(text, |caps: &Captures<'_>| {
            let at = caps.get(0).map_or(0, |m| m.start());
            if failure.is_some() || code.iter().any(|r| r.contains(&at)) {
                return caps[0].to_string();
            }
            match self.resolve_one(syntax, caps, diagnostics) {
                Ok(Some((reference, rewritten))) => {
                    if !reference.is_resolved() {
                        diagnostics.push(Diagnostic::UnresolvedReference {
                            path: reference.written_path.clone(),
                        });
                    }
                    references.push(reference);
                    rewritten
                }
                Ok(None) => caps[0].to_string(),
                Err(e) => {
                    failure = Some(e);
                    caps[0].to_string()
                }
            }
        });
        match failure {
            Some(e) => Err(e),
            None => Ok(out.into_owned()),
        }
    }

    /// `None` for references this stage does not own (placeholders, remote
    /// URLs). Otherwise the reference record and its replacement text.
    fn resolve_one(
        &self,
        syntax: ReferenceSyntax,
        caps: &Captures<'_>,
        diagnostics: &mut Vec<Diagnostic>,
    ) -> Result<Option<(ImageReference, String)>, Md2TexError> {
        let alt = caps[1].to_string();
        let raw_path = caps[2].to_string();
        let written = raw_path
            .trim_start_matches('<')
            .trim_end_matches('>')
            .to_string();
        let title = caps.get(3).map_or("", |m| m.as_str());

        if alt.contains(PLACEHOLDER_PREFIX) || is_remote(&written) {
            return Ok(None);
        }

        let mut reference = ImageReference {
            syntax,
            alt: alt.clone(),
            written_path: written.clone(),
            resolved_path: None,
            normalized_path: None,
        };

        let Some(mut file_name) = Path::new(&written).file_name().map(|n| n.to_os_string()) else {
            return Ok(Some((reference, caps[0].to_string())));
        };

        let located = self.locator.locate(&written);
        if let Some(ref found) = located {
            if !same_file(&found.path, &self.assets_dir.join(&file_name)) {
                if let Some(renamed) = self.unreserved_name(&file_name) {
                    self.reporting.note(format_args!(
                        "'{}' shares a figure asset name; copying as '{}'",
                        written,
                        renamed.to_string_lossy()
                    ));
                    file_name = renamed;
                }
            }
        }
        let dest = self.assets_dir.join(&file_name);
        let normalized = format!("{}/{}", self.assets_name, file_name.to_string_lossy());

        match located {
            Some(found) => {
                if !same_file(&found.path, &dest)
                    && !copy_if_absent(&found.path, &dest)?
                    && contents_differ(&found.path, &dest)
                {
                    warn!(
                        "'{}' differs from existing '{}'; keeping the existing file",
                        found.path.display(),
                        normalized
                    );
                    diagnostics.push(Diagnostic::AssetNameCollision {
                        path: written.clone(),
                        existing: normalized.clone(),
                    });
                }
                reference.resolved_path = Some(found.path);
            }
            None if dest.is_file() => {
                debug!("'{}' not located, but '{}' already exists", written, normalized);
                reference.resolved_path = Some(dest.clone());
            }
            None => {
                warn!("Image '{}' could not be located; reference left unchanged", written);
                return Ok(Some((reference, caps[0].to_string())));
            }
        }

        self.reporting
            .note(format_args!("Reference '{}' → '{}'", written, normalized));
        reference.normalized_path = Some(normalized.clone());

        let rewritten = match syntax {
            ReferenceSyntax::Standard => format!("![{alt}]({normalized}{title})"),
            ReferenceSyntax::LegacyParen => format!("!({alt})({normalized})"),
        };
        Ok(Some((reference, rewritten)))
    }

    /// `file_name` with `-src` appended to its stem when that stem belongs
    /// to an extracted figure.
    fn unreserved_name(&self, file_name: &OsString) -> Option<OsString> {
        let path = Path::new(file_name);
        let stem = path.file_stem()?.to_string_lossy();
        if !self.reserved_stems.contains(&*stem) {
            return None;
        }
        let renamed = match path.extension() {
            Some(ext) => format!("{stem}-src.{}", ext.to_string_lossy()),
            None => format!("{stem}-src"),
        };
        Some(renamed.into())
    }
}

/// Copy `from` to `to` unless `to` already exists. Returns whether a copy was made.
pub fn copy_if_absent(from: &Path, to: &Path) -> Result<bool, Md2TexError> {
    if to.exists() {
        debug!("'{}' already present, not copying", to.display());
        return Ok(false);
    }
    if let Some(parent) = to.parent() {
        std::fs::create_dir_all(parent).map_err(|e| Md2TexError::write(parent, e))?;
    }
    std::fs::copy(from, to).map_err(|e| Md2TexError::write(to, e))?;
    debug!("Copied '{}' → '{}'", from.display(), to.display());
    Ok(true)
}

/// Whether two files hold different bytes. Unreadable counts as different.
fn contents_differ(a: &Path, b: &Path) -> bool {
    match (std::fs::read(a), std::fs::read(b)) {
        (Ok(a), Ok(b)) => a != b,
        _ => true,
    }
}

fn same_file(a: &Path, b: &Path) -> bool {
    match (std::fs::canonicalize(a), std::fs::canonicalize(b)) {
        (Ok(a), Ok(b)) => a == b,
        _ => false,
    }
}
