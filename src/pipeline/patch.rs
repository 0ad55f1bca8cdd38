//! Document patcher: repair the LaTeX the converter produced.
//!
//! Pandoc gets most figures right, but some arrive broken: placeholder
//! captions, bare `\includegraphics` outside any float, image markup trapped
//! in a listing, legacy `!(caption)(path)` text, escaped figure source and
//! paths that point outside the assets directory. The patcher fixes these in
//! a fixed sequence of passes.
//!
//! ## Pass order
//!
//! 1. Escaping repair: figure source that survived as escaped text
//! 2. Listing unwrap: inclusions trapped in `lstlisting`/`verbatim`, empty wrappers
//! 3. Legacy repair: `!(cap)(path)`, `!{[}cap{]}(path)` and raw placeholder images
//! 4. Caption substitution: placeholder tokens → real captions and labels
//! 5. Figure wrapping: bare inclusions get a figure environment
//! 6. Path repair: every inclusion points into the assets directory
//! 7. Width normalisation: option-less `\includegraphics` gets a width
//! 8. Preamble repair: CJK font and `svg` package
//!
//! Escaping and listing repair run first so the later passes see real LaTeX.
//! Legacy repair runs before caption substitution so a placeholder found in
//! legacy text keeps its figure's label. Wrapping runs after substitution so
//! a bare inclusion is matched to its figure by path.
//!
//! Every pass is idempotent: applied to its own output it changes nothing, so
//! [`patch_document`] is safe to run any number of times on the same file.

use crate::config::{ConversionConfig, ReportingLevel};
use crate::error::{Diagnostic, Md2TexError};
use crate::output::{FigureRecord, PLACEHOLDER_PREFIX};
use crate::pipeline::locate::{is_remote, ImageLocator};
use crate::pipeline::resolve::copy_if_absent;
use crate::templates::{escape_latex, figure_block, figure_env, unescape_latex_path};
use once_cell::sync::Lazy;
use regex::{Captures, Regex};
use std::collections::HashSet;
use std::ops::Range;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Environments whose content is verbatim text.
const VERBATIM_ENVS: &[&str] = &["lstlisting", "verbatim", "Verbatim"];

/// Environments an inclusion may legitimately sit in without its own figure.
const ENCLOSING_ENVS: &[&str] = &[
    "figure",
    "figure*",
    "wrapfigure",
    "subfigure",
    "table",
    "table*",
    "longtable",
    "tabular",
    "tabular*",
    "minipage",
];

/// Extensions tried, in order, for an extensionless `\includegraphics` path.
const GRAPHICS_EXTENSIONS: &[&str] = &["pdf", "png", "jpg", "jpeg", "eps"];

const PANDOC_BOUNDED: &str = "\\pandocbounded{";
const BEGIN_DOCUMENT: &str = "\\begin{document}";

/// Everything the passes need besides the document itself.
#[derive(Debug, Clone)]
pub struct PatchContext {
    pub output_dir: PathBuf,
    /// Assets directory name, relative to `output_dir`.
    pub assets_dir: String,
    pub figures: Vec<FigureRecord>,
    pub figure_name: String,
    pub figure_width: String,
    pub cjk_font: Option<String>,
    /// Used by path repair to find images missing from the assets directory.
    pub locator: Option<ImageLocator>,
    pub reporting: ReportingLevel,
}

impl PatchContext {
    pub fn new(output_dir: impl Into<PathBuf>, config: &ConversionConfig) -> Self {
        Self {
            output_dir: output_dir.into(),
            assets_dir: config.assets_dir.clone(),
            figures: Vec::new(),
            figure_name: config.figure_name.clone(),
            figure_width: config.figure_width.clone(),
            cjk_font: config.cjk_font.clone(),
            locator: None,
            reporting: config.reporting,
        }
    }

    pub fn with_figures(mut self, figures: Vec<FigureRecord>) -> Self {
        self.figures = figures;
        self
    }

    pub fn with_locator(mut self, locator: ImageLocator) -> Self {
        self.locator = Some(locator);
        self
    }

    /// LaTeX-escaped caption of a figure record.
    fn caption_for(&self, fig: &FigureRecord) -> String {
        escape_latex(&fig.caption_or_default(&self.figure_name))
    }

    /// The record whose placeholder token occurs in `text`.
    fn record_by_token(&self, text: &str) -> Option<&FigureRecord> {
        let token = RE_TOKEN.find(text)?.as_str();
        self.figures.iter().find(|f| f.placeholder_token == token)
    }

    /// The record whose asset is `path`, with or without its extension.
    fn record_by_path(&self, path: &str) -> Option<&FigureRecord> {
        let path = Path::new(path);
        self.figures.iter().find(|f| {
            let source = Path::new(&f.source_path);
            source == path || source.with_extension("").as_path() == path
        })
    }
}

/// Patched document plus the problems found while patching.
#[derive(Debug, Clone)]
pub struct Patched {
    pub document: String,
    pub diagnostics: Vec<Diagnostic>,
}

/// Apply every pass, in order.
pub fn patch_document(input: &str, ctx: &PatchContext) -> Patched {
    let mut diagnostics = Vec::new();
    let s = repair_escaped_figures(input);
    let s = unwrap_listings(&s);
    let s = repair_legacy_images(&s, ctx);
    let s = substitute_captions(&s, ctx);
    let s = wrap_bare_includes(&s, ctx);
    let s = repair_paths(&s, ctx, &mut diagnostics);
    let s = normalize_widths(&s, ctx);
    let document = repair_preamble(&s, ctx);
    debug!(
        "Patched document: {} → {} bytes, {} diagnostic(s)",
        input.len(),
        document.len(),
        diagnostics.len()
    );
    Patched {
        document,
        diagnostics,
    }
}

/// Re-apply the passes to a `.tex` file on disk. The file is only rewritten
/// when patching changed it.
pub fn patch_file(path: impl AsRef<Path>, ctx: &PatchContext) -> Result<Patched, Md2TexError> {
    let path = path.as_ref();
    let original = std::fs::read_to_string(path).map_err(|e| match e.kind() {
        std::io::ErrorKind::NotFound => Md2TexError::SourceNotFound {
            path: path.to_path_buf(),
        },
        _ => Md2TexError::ReadFailed {
            path: path.to_path_buf(),
            source: e,
        },
    })?;
    let patched = patch_document(&original, ctx);
    if patched.document != original {
        std::fs::write(path, &patched.document).map_err(|e| Md2TexError::write(path, e))?;
        debug!("Rewrote {}", path.display());
    }
    Ok(patched)
}

// ── Shared scanning ──────────────────────────────────────────────────────────

static RE_TOKEN: Lazy<Regex> =
    Lazy::new(|| Regex::new(&format!(r"\b{PLACEHOLDER_PREFIX}\d{{4,}}\b")).unwrap());

static RE_INCLUDE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"\\include(graphics|svg)(?:\[((?:[^\[\]{}]|\{[^{}]*\})*)\])?\{((?:[^{}]|\{[^{}]*\})*)\}",
    )
    .unwrap()
});

static RE_LABEL: Lazy<Regex> = Lazy::new(|| Regex::new(r"\\label\{([^{}]*)\}").unwrap());

static RE_ALT: Lazy<Regex> = Lazy::new(|| Regex::new(r"alt=\{([^{}]*)\}").unwrap());

static RE_DIGITS: Lazy<Regex> = Lazy::new(|| Regex::new(r"\d+").unwrap());

static RE_WS: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").unwrap());

/// Byte ranges of every `\begin{name}…\end{name}` for the given names.
/// An unterminated environment runs to the end of the document.
fn env_ranges(doc: &str, names: &[&str]) -> Vec<Range<usize>> {
    let mut ranges = Vec::new();
    for name in names {
        let begin = format!("\\begin{{{name}}}");
        let end = format!("\\end{{{name}}}");
        let mut at = 0;
        while let Some(off) = doc[at..].find(&begin) {
            let start = at + off;
            let body = start + begin.len();
            let stop = doc[body..]
                .find(&end)
                .map_or(doc.len(), |o| body + o + end.len());
            ranges.push(start..stop);
            at = stop;
        }
    }
    ranges
}

/// Everything before `\begin{document}`; empty for a body-only fragment.
fn preamble_range(doc: &str) -> Range<usize> {
    0..doc.find(BEGIN_DOCUMENT).unwrap_or(0)
}

fn inside(ranges: &[Range<usize>], pos: usize) -> bool {
    ranges.iter().any(|r| r.contains(&pos))
}

/// Replace each match of `re` that starts outside `skip` with `f`'s result.
/// `None` keeps the match as it is.
fn replace_outside<F>(doc: &str, re: &Regex, skip: &[Range<usize>], mut f: F) -> String
where
    F: FnMut(&Captures<'_>) -> Option<String>,
{
    let mut out = String::with_capacity(doc.len());
    let mut last = 0;
    for caps in re.captures_iter(doc) {
        let Some(m) = caps.get(0) else { continue };
        if inside(skip, m.start()) {
            continue;
        }
        if let Some(replacement) = f(&caps) {
            out.push_str(&doc[last..m.start()]);
            out.push_str(&replacement);
            last = m.end();
        }
    }
    out.push_str(&doc[last..]);
    out
}

/// Hands out `fig:image_{k}` labels that do not collide with the document's.
struct LabelAllocator {
    used: HashSet<String>,
    next: usize,
}

impl LabelAllocator {
    fn for_document(doc: &str) -> Self {
        Self {
            used: RE_LABEL
                .captures_iter(doc)
                .map(|c| c[1].to_string())
                .collect(),
            next: 0,
        }
    }

    /// `fig:image_{marker}` when free, else the next free ordinal.
    fn image_label(&mut self, marker: Option<usize>) -> (usize, String) {
        if let Some(k) = marker {
            let label = format!("fig:image_{k}");
            if self.used.insert(label.clone()) {
                return (k, label);
            }
        }
        let mut k = self.next + 1;
        loop {
            let label = format!("fig:image_{k}");
            if self.used.insert(label.clone()) {
                self.next = k;
                return (k, label);
            }
            k += 1;
        }
    }

    /// `preferred` when free, else a fresh image label.
    fn claim(&mut self, preferred: String) -> String {
        if self.used.insert(preferred.clone()) {
            preferred
        } else {
            self.image_label(None).1
        }
    }
}

// ── Pass 1: Escaping repair ──────────────────────────────────────────────────

static RE_ESCAPED_FIGURE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?s)\\textbackslash\{\}begin\\\{figure\\\}.*?\\textbackslash\{\}end\\\{figure\\\}")
        .unwrap()
});

static RE_DOUBLED_FIGURE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?s)\\\\begin\{figure\*?\}.*?\\\\end\{figure\*?\}").unwrap()
});

static RE_DOUBLED_CMD: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"\\\\(?:begin\{figure\*?\}|end\{figure\*?\}|centering\b|includegraphics|includesvg|caption\{|label\{)",
    )
    .unwrap()
});

/// Figure source that reached the output as text: either run through the
/// converter's escaping (`\textbackslash{}begin\{figure\}`) or written with
/// doubled backslashes (`\\begin{figure}`).
fn repair_escaped_figures(input: &str) -> String {
    let s = RE_ESCAPED_FIGURE.replace_all(input, |caps: &Captures<'_>| {
        caps[0]
            .replace("\\textbackslash{}", "\\")
            .replace("\\{", "{")
            .replace("\\}", "}")
            .replace("{[}", "[")
            .replace("{]}", "]")
    });

    let mut out = String::with_capacity(s.len());
    let mut last = 0;
    for m in RE_DOUBLED_FIGURE.find_iter(&s) {
        // A third backslash means the text is itself escaped; leave it.
        if s[..m.start()].ends_with('\\') {
            continue;
        }
        out.push_str(&s[last..m.start()]);
        out.push_str(
            &RE_DOUBLED_CMD.replace_all(m.as_str(), |c: &Captures<'_>| c[0][1..].to_string()),
        );
        last = m.end();
    }
    out.push_str(&s[last..]);
    out
}

// ── Pass 2: Listing unwrap ───────────────────────────────────────────────────

static RE_LISTINGS: Lazy<Vec<Regex>> = Lazy::new(|| {
    VERBATIM_ENVS
        .iter()
        .map(|env| {
            Regex::new(&format!(
                r"(?s)\\begin\{{{env}\}}(?:\[[^\]\n]*\])?(.*?)\\end\{{{env}\}}"
            ))
            .unwrap()
        })
        .collect()
});

/// Unwrap listing blocks that hold image inclusions or placeholders; delete
/// empty ones. Other listings are real code and stay.
fn unwrap_listings(input: &str) -> String {
    let mut doc = input.to_string();
    for re in RE_LISTINGS.iter() {
        doc = re
            .replace_all(&doc, |caps: &Captures<'_>| {
                let body = caps[1].trim();
                if body.is_empty() {
                    String::new()
                } else if body.contains("\\includegraphics")
                    || body.contains("\\includesvg")
                    || RE_TOKEN.is_match(body)
                {
                    body.to_string()
                } else {
                    caps[0].to_string()
                }
            })
            .into_owned();
    }
    doc
}

// ── Pass 3: Legacy repair ────────────────────────────────────────────────────

/// `!(caption)(path)` as the converter passes it through, path escaped.
static RE_LEGACY_PAREN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"!\(([^()]*)\)\(\s*([^()\s]+)\s*\)").unwrap());

/// `![caption](path)` the converter could not parse, brackets escaped.
static RE_LEGACY_BRACKET: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)!\{\[\}(.*?)\{\]\}\(([^()]+)\)").unwrap());

/// An unconverted placeholder image, as left behind by listing unwrap.
static RE_RAW_PLACEHOLDER: Lazy<Regex> = Lazy::new(|| {
    Regex::new(&format!(
        r"!\[([^\]\n]*\b{PLACEHOLDER_PREFIX}\d{{4,}}\b[^\]\n]*)\]\(([^()\s]+)\)"
    ))
    .unwrap()
});

fn repair_legacy_images(input: &str, ctx: &PatchContext) -> String {
    let mut doc = input.to_string();
    let forms: [(&Regex, bool); 3] = [
        (&*RE_LEGACY_PAREN, true),
        (&*RE_LEGACY_BRACKET, true),
        (&*RE_RAW_PLACEHOLDER, false),
    ];
    for (re, escaped) in forms {
        let mut skip = env_ranges(&doc, VERBATIM_ENVS);
        skip.extend(env_ranges(&doc, ENCLOSING_ENVS));
        skip.push(preamble_range(&doc));
        let mut labels = LabelAllocator::for_document(&doc);
        doc = replace_outside(&doc, re, &skip, |caps| {
            Some(legacy_figure(caps, escaped, ctx, &mut labels))
        });
    }
    doc
}

/// `escaped`: the caption already went through the converter's escaping.
fn legacy_figure(
    caps: &Captures<'_>,
    escaped: bool,
    ctx: &PatchContext,
    labels: &mut LabelAllocator,
) -> String {
    let caption_text = RE_WS.replace_all(caps[1].trim(), " ").into_owned();
    let path = unescape_latex_path(caps[2].trim());

    if let Some(fig) = ctx.record_by_token(&caption_text) {
        let label = labels.claim(fig.label());
        ctx.reporting.note(format_args!(
            "Placeholder image for figure {} rebuilt as a figure block",
            fig.index
        ));
        return figure_block(
            &fig.source_path,
            &ctx.caption_for(fig),
            &label,
            &ctx.figure_width,
        );
    }

    let marker = RE_DIGITS
        .find(&caption_text)
        .and_then(|m| m.as_str().parse().ok());
    let (k, label) = labels.image_label(marker);
    let caption = if caption_text.is_empty() {
        format!("{} {}", ctx.figure_name, k)
    } else if escaped {
        caption_text
    } else {
        escape_latex(&caption_text)
    };
    ctx.reporting
        .note(format_args!("Legacy image '{}' → {}", path, label));
    figure_block(&path, &caption, &label, &ctx.figure_width)
}

// ── Pass 4: Caption substitution ─────────────────────────────────────────────

static RE_CAPTION: Lazy<Regex> = Lazy::new(|| Regex::new(r"\\caption\{([^{}]*)\}").unwrap());

fn substitute_captions(input: &str, ctx: &PatchContext) -> String {
    if ctx.figures.is_empty() || !RE_TOKEN.is_match(input) {
        return input.to_string();
    }

    let s = RE_CAPTION
        .replace_all(input, |caps: &Captures<'_>| match ctx.record_by_token(&caps[1]) {
            Some(fig) => {
                ctx.reporting
                    .note(format_args!("Figure {}: caption substituted", fig.index));
                format!(
                    "\\caption{{{}}}\n\\label{{{}}}",
                    ctx.caption_for(fig),
                    fig.label()
                )
            }
            None => caps[0].to_string(),
        })
        .into_owned();

    let s = RE_ALT
        .replace_all(&s, |caps: &Captures<'_>| match ctx.record_by_token(&caps[1]) {
            Some(fig) => format!("alt={{{}}}", ctx.caption_for(fig)),
            None => caps[0].to_string(),
        })
        .into_owned();

    RE_TOKEN
        .replace_all(&s, |caps: &Captures<'_>| {
            match ctx.figures.iter().find(|f| f.placeholder_token == caps[0]) {
                Some(fig) => ctx.caption_for(fig),
                None => caps[0].to_string(),
            }
        })
        .into_owned()
}

// ── Pass 5: Figure wrapping ──────────────────────────────────────────────────

fn wrap_bare_includes(input: &str, ctx: &PatchContext) -> String {
    let mut skip = env_ranges(input, ENCLOSING_ENVS);
    skip.extend(env_ranges(input, VERBATIM_ENVS));
    skip.push(preamble_range(input));
    let mut labels = LabelAllocator::for_document(input);

    let mut out = String::with_capacity(input.len());
    let mut last = 0;
    for caps in RE_INCLUDE.captures_iter(input) {
        let Some(m) = caps.get(0) else { continue };
        if inside(&skip, m.start()) {
            continue;
        }
        let (mut start, mut end) = (m.start(), m.end());
        if input[..start].ends_with(PANDOC_BOUNDED)
            && input[end..].starts_with('}')
            && start - PANDOC_BOUNDED.len() >= last
        {
            start -= PANDOC_BOUNDED.len();
            end += 1;
        }

        let kind = &caps[1];
        let options = caps.get(2).map_or("", |o| o.as_str());
        let path = &caps[3];

        let record = ctx
            .record_by_path(&unescape_latex_path(path))
            .or_else(|| ctx.record_by_token(options));
        let (caption, label) = match record {
            Some(fig) => (ctx.caption_for(fig), labels.claim(fig.label())),
            None => {
                let (k, label) = labels.image_label(None);
                let caption = RE_ALT
                    .captures(options)
                    .map(|c| c[1].trim().to_string())
                    .filter(|a| !a.is_empty())
                    .unwrap_or_else(|| format!("{} {}", ctx.figure_name, k));
                (caption, label)
            }
        };

        let include = format!("\\include{}[width={}]{{{}}}", kind, ctx.figure_width, path);
        ctx.reporting
            .note(format_args!("Wrapped bare inclusion of '{}' as {}", path, label));
        out.push_str(&input[last..start]);
        out.push_str(&figure_env(&include, &caption, &label));
        last = end;
    }
    out.push_str(&input[last..]);
    out
}

// ── Pass 6: Path repair ──────────────────────────────────────────────────────

fn repair_paths(input: &str, ctx: &PatchContext, diagnostics: &mut Vec<Diagnostic>) -> String {
    let mut skip = env_ranges(input, VERBATIM_ENVS);
    skip.push(preamble_range(input));
    replace_outside(input, &RE_INCLUDE, &skip, |caps| {
        let kind = &caps[1];
        let fixed = repair_path(kind, &caps[3], ctx, diagnostics)?;
        let options = caps
            .get(2)
            .map(|o| format!("[{}]", o.as_str()))
            .unwrap_or_default();
        Some(format!("\\include{kind}{options}{{{fixed}}}"))
    })
}

/// The rewritten path, or `None` to keep the inclusion as written.
fn repair_path(
    kind: &str,
    raw: &str,
    ctx: &PatchContext,
    diagnostics: &mut Vec<Diagnostic>,
) -> Option<String> {
    let path = unescape_latex_path(raw.trim());
    if path.is_empty() || is_remote(&path) {
        return None;
    }
    let file_name = Path::new(&path).file_name()?.to_string_lossy().into_owned();
    let target = format!("{}/{}", ctx.assets_dir, file_name);
    let assets = ctx.output_dir.join(&ctx.assets_dir);
    let names = candidate_names(&file_name, kind);

    if names.iter().any(|n| assets.join(n).is_file()) {
        return (raw != target).then_some(target);
    }

    for name in &names {
        let written = Path::new(&path).with_file_name(name);
        let found = Some(ctx.output_dir.join(&written))
            .filter(|p| p.is_file())
            .or_else(|| {
                ctx.locator
                    .as_ref()?
                    .locate(&written.to_string_lossy())
                    .map(|l| l.path)
            });
        let Some(source) = found else { continue };
        match copy_if_absent(&source, &assets.join(name)) {
            Ok(_) => {
                ctx.reporting.note(format_args!(
                    "Recovered '{}' from {}",
                    path,
                    source.display()
                ));
                return (raw != target).then_some(target);
            }
            Err(e) => {
                warn!("Could not copy '{}': {}", source.display(), e);
                break;
            }
        }
    }

    warn!("Included graphic '{}' is missing", path);
    diagnostics.push(Diagnostic::MissingAsset { path });
    None
}

/// File names to look for: the name itself, or the name with each extension
/// the inclusion command would try.
fn candidate_names(file_name: &str, kind: &str) -> Vec<String> {
    if Path::new(file_name).extension().is_some() {
        return vec![file_name.to_string()];
    }
    if kind == "svg" {
        return vec![format!("{file_name}.svg")];
    }
    GRAPHICS_EXTENSIONS
        .iter()
        .map(|ext| format!("{file_name}.{ext}"))
        .collect()
}

// ── Pass 7: Width normalisation ──────────────────────────────────────────────

fn normalize_widths(input: &str, ctx: &PatchContext) -> String {
    let mut s = input.to_string();
    for cmd in ["\\includegraphics", "\\includesvg"] {
        s = s.replace(
            &format!("{cmd}{{"),
            &format!("{cmd}[width={}]{{", ctx.figure_width),
        );
    }
    s
}

// ── Pass 8: Preamble repair ──────────────────────────────────────────────────

static RE_SVG_PACKAGE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\\usepackage(?:\[[^\]]*\])?\{svg\}").unwrap());

fn repair_preamble(input: &str, ctx: &PatchContext) -> String {
    let Some(pos) = input.find(BEGIN_DOCUMENT) else {
        return input.to_string();
    };

    let mut additions = String::new();
    if let Some(font) = &ctx.cjk_font {
        if !input.contains("\\setCJKmainfont") {
            additions.push_str(&format!("\\setCJKmainfont{{{font}}}\n"));
        }
    }
    if input[pos..].contains("\\includesvg") && !RE_SVG_PACKAGE.is_match(input) {
        additions.push_str("\\usepackage{svg}\n");
    }
    if additions.is_empty() {
        return input.to_string();
    }

    let mut out = String::with_capacity(input.len() + additions.len());
    out.push_str(&input[..pos]);
    out.push_str(&additions);
    out.push_str(&input[pos..]);
    out
}

// ── Tests ────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn record(index: usize, path: &str, caption: Option<&str>) -> FigureRecord {
        FigureRecord {
            index,
            source_path: path.to_string(),
            caption: caption.map(str::to_string),
            placeholder_token: FigureRecord::token_for(index),
            is_vector_fallback: path.ends_with(".svg"),
        }
    }

    fn ctx(out: &Path) -> PatchContext {
        PatchContext::new(out, &ConversionConfig::default())
    }

    fn body(doc: &str) -> String {
        format!("\\documentclass{{ctexart}}\n\\begin{{document}}\n{doc}\n\\end{{document}}\n")
    }

    #[test]
    fn caption_placeholder_gets_caption_and_label() {
        let tmp = tempfile::tempdir().unwrap();
        let c = ctx(tmp.path()).with_figures(vec![record(1, "pics/figure_1.pdf", Some("Growth & Decay"))]);
        let doc = "\\begin{figure}\n\\centering\n\\pandocbounded{\\includegraphics[keepaspectratio,alt={MDTEXFIG0001}]{pics/figure_1.pdf}}\n\\caption{MDTEXFIG0001}\n\\end{figure}";

        let out = substitute_captions(doc, &c);
        assert!(out.contains("\\caption{Growth \\& Decay}\n\\label{fig:figure_1}"));
        assert!(out.contains("alt={Growth \\& Decay}"));
        assert!(!out.contains("MDTEXFIG"));
    }

    #[test]
    fn missing_caption_uses_default_name() {
        let tmp = tempfile::tempdir().unwrap();
        let c = ctx(tmp.path()).with_figures(vec![record(2, "pics/figure_2.png", None)]);
        let out = substitute_captions("\\caption{MDTEXFIG0002}", &c);
        assert_eq!(out, "\\caption{Figure 2}\n\\label{fig:figure_2}");
    }

    #[test]
    fn bare_include_is_wrapped_with_alt_caption() {
        let tmp = tempfile::tempdir().unwrap();
        let doc = "Text \\pandocbounded{\\includegraphics[keepaspectratio,alt={A chart}]{img/chart.png}} more.";
        let out = wrap_bare_includes(doc, &ctx(tmp.path()));
        assert_eq!(
            out,
            "Text \\begin{figure}[htbp]\n\\centering\n\
             \\includegraphics[width=0.8\\textwidth]{img/chart.png}\n\
             \\caption{A chart}\n\\label{fig:image_1}\n\\end{figure} more."
        );
    }

    #[test]
    fn record_include_takes_record_caption() {
        let tmp = tempfile::tempdir().unwrap();
        let c = ctx(tmp.path()).with_figures(vec![record(3, "pics/figure_3.svg", Some("Flow"))]);
        let out = wrap_bare_includes("\\includesvg[keepaspectratio]{pics/figure_3}", &c);
        assert!(out.contains("\\includesvg[width=0.8\\textwidth]{pics/figure_3}"));
        assert!(out.contains("\\caption{Flow}"));
        assert!(out.contains("\\label{fig:figure_3}"));
    }

    #[test]
    fn includes_in_figures_and_tables_are_left_alone() {
        let tmp = tempfile::tempdir().unwrap();
        let doc = "\\begin{figure}\n\\includegraphics{a.png}\n\\end{figure}\n\
                   \\begin{longtable}[]{l}\n\\includegraphics{b.png} \\\\\n\\end{longtable}";
        assert_eq!(wrap_bare_includes(doc, &ctx(tmp.path())), doc);
    }

    #[test]
    fn listing_with_include_is_unwrapped_and_empty_listing_removed() {
        let doc = "a\n\\begin{lstlisting}[language=html]\n\\includegraphics{pics/x.png}\n\\end{lstlisting}\n\
                   b\n\\begin{lstlisting}\n\n\\end{lstlisting}\nc\n\
                   \\begin{lstlisting}\nfn main() {}\n\\end{lstlisting}";
        let out = unwrap_listings(doc);
        assert_eq!(
            out,
            "a\n\\includegraphics{pics/x.png}\nb\n\nc\n\\begin{lstlisting}\nfn main() {}\n\\end{lstlisting}"
        );
    }

    #[test]
    fn legacy_paren_form_becomes_figure() {
        let tmp = tempfile::tempdir().unwrap();
        let out = repair_legacy_images("!(图 1: 示意图)(pics/figure\\_1.pdf)", &ctx(tmp.path()));
        assert_eq!(
            out,
            "\\begin{figure}[htbp]\n\\centering\n\
             \\includegraphics[width=0.8\\textwidth]{pics/figure_1.pdf}\n\
             \\caption{图 1: 示意图}\n\\label{fig:image_1}\n\\end{figure}"
        );
    }

    #[test]
    fn legacy_marker_collision_takes_next_ordinal() {
        let tmp = tempfile::tempdir().unwrap();
        let doc = "\\label{fig:image_1}\n!(图 1: a)(x.pdf)\n!(图 1: b)(y.pdf)";
        let out = repair_legacy_images(doc, &ctx(tmp.path()));
        assert!(out.contains("\\caption{图 1: a}\n\\label{fig:image_2}"));
        assert!(out.contains("\\caption{图 1: b}\n\\label{fig:image_3}"));
    }

    #[test]
    fn legacy_bracket_form_and_wrapped_caption() {
        let tmp = tempfile::tempdir().unwrap();
        let out = repair_legacy_images("!{[}Wide\nview{]}(my pic.png)", &ctx(tmp.path()));
        assert!(out.contains("{my pic.png}"));
        assert!(out.contains("\\caption{Wide view}"));
    }

    #[test]
    fn raw_placeholder_from_listing_uses_record() {
        let tmp = tempfile::tempdir().unwrap();
        let c = ctx(tmp.path()).with_figures(vec![record(2, "pics/figure_2.svg", Some("Stack"))]);
        let doc = "\\begin{lstlisting}\n![MDTEXFIG0002](pics/figure_2.svg)\n\\end{lstlisting}";
        let out = repair_legacy_images(&unwrap_listings(doc), &c);
        assert!(out.contains("\\includesvg[width=0.8\\textwidth]{pics/figure_2.svg}"));
        assert!(out.contains("\\caption{Stack}\n\\label{fig:figure_2}"));
    }

    #[test]
    fn escaped_figure_source_is_restored() {
        let doc = "\\textbackslash{}begin\\{figure\\}{[}htbp{]} \\textbackslash{}centering \
                   \\textbackslash{}includegraphics\\{pics/x.png\\} \\textbackslash{}caption\\{X\\} \
                   \\textbackslash{}end\\{figure\\}";
        assert_eq!(
            repair_escaped_figures(doc),
            "\\begin{figure}[htbp] \\centering \\includegraphics{pics/x.png} \\caption{X} \\end{figure}"
        );
    }

    #[test]
    fn doubled_backslash_figure_is_restored() {
        let doc = "\\\\begin{figure}[htbp]\n\\\\centering\n\\\\includegraphics{pics/y.png}\n\\\\caption{Y}\n\\\\end{figure}";
        assert_eq!(
            repair_escaped_figures(doc),
            "\\begin{figure}[htbp]\n\\centering\n\\includegraphics{pics/y.png}\n\\caption{Y}\n\\end{figure}"
        );
    }

    #[test]
    fn path_repair_copies_located_file() {
        let tmp = tempfile::tempdir().unwrap();
        let src = tmp.path().join("src");
        let out = tmp.path().join("out");
        fs::create_dir_all(src.join("img")).unwrap();
        fs::write(src.join("img/chart.png"), b"png").unwrap();
        let config = ConversionConfig::default();
        let c = PatchContext::new(&out, &config).with_locator(ImageLocator::new(&src, tmp.path(), &config));

        let mut diags = Vec::new();
        let doc = body("\\includegraphics[width=3cm]{img/chart.png}");
        let fixed = repair_paths(&doc, &c, &mut diags);
        assert!(fixed.contains("\\includegraphics[width=3cm]{pics/chart.png}"));
        assert!(out.join("pics/chart.png").is_file());
        assert!(diags.is_empty());
    }

    #[test]
    fn path_repair_handles_extensionless_svg() {
        let tmp = tempfile::tempdir().unwrap();
        fs::create_dir_all(tmp.path().join("pics")).unwrap();
        fs::write(tmp.path().join("pics/figure_4.svg"), "<svg/>").unwrap();
        let mut diags = Vec::new();
        let doc = body("\\includesvg{pics/figure_4}");
        assert_eq!(repair_paths(&doc, &ctx(tmp.path()), &mut diags), doc);
        assert!(diags.is_empty());
    }

    #[test]
    fn missing_asset_is_reported_and_left() {
        let tmp = tempfile::tempdir().unwrap();
        let mut diags = Vec::new();
        let doc = body("\\includegraphics{nowhere/gone.png}");
        assert_eq!(repair_paths(&doc, &ctx(tmp.path()), &mut diags), doc);
        assert_eq!(
            diags,
            vec![Diagnostic::MissingAsset {
                path: "nowhere/gone.png".into()
            }]
        );
    }

    #[test]
    fn preamble_gets_font_and_svg_package() {
        let tmp = tempfile::tempdir().unwrap();
        let config = ConversionConfig::builder().cjk_font("Noto Serif CJK SC").build().unwrap();
        let c = PatchContext::new(tmp.path(), &config);
        let doc = body("\\includesvg[width=1cm]{pics/a}");
        let out = repair_preamble(&doc, &c);
        assert!(out.contains("\\setCJKmainfont{Noto Serif CJK SC}\n\\usepackage{svg}\n\\begin{document}"));
        assert_eq!(repair_preamble(&out, &c), out);
    }

    #[test]
    fn full_patch_is_idempotent() {
        let tmp = tempfile::tempdir().unwrap();
        let c = ctx(tmp.path()).with_figures(vec![
            record(1, "pics/figure_1.pdf", Some("Growth Curve")),
            record(2, "pics/figure_2.svg", None),
        ]);
        let doc = body(
            "\\begin{figure}\n\\centering\n\
             \\pandocbounded{\\includegraphics[keepaspectratio,alt={MDTEXFIG0001}]{pics/figure_1.pdf}}\n\
             \\caption{MDTEXFIG0001}\n\\end{figure}\n\n\
             Inline \\pandocbounded{\\includegraphics[keepaspectratio,alt={A chart}]{img/chart.png}} here.\n\n\
             !(图 2: 示意图)(pics/figure\\_9.pdf)\n\n\
             \\begin{lstlisting}\n\\end{lstlisting}\n\n\
             \\begin{lstlisting}[language=html]\n![MDTEXFIG0002](pics/figure_2.svg)\n\\end{lstlisting}\n\n\
             \\includesvg{pics/figure_3}\n\n\
             \\textbackslash{}begin\\{figure\\}{[}htbp{]} \\textbackslash{}centering \
             \\textbackslash{}includegraphics\\{pics/x.png\\} \\textbackslash{}caption\\{X\\} \
             \\textbackslash{}end\\{figure\\}",
        );

        let once = patch_document(&doc, &c).document;
        let twice = patch_document(&once, &c).document;
        assert_eq!(once, twice);

        assert!(!once.contains("MDTEXFIG"));
        assert!(!once.contains("lstlisting"));
        assert!(!once.contains("textbackslash"));
        assert!(!once.contains("\\includegraphics{"));
        assert!(once.contains("\\usepackage{svg}"));
        assert_eq!(once.matches("\\begin{figure}").count(), 6);
        assert_eq!(once.matches("\\label{fig:figure_1}").count(), 1);
        assert_eq!(once.matches("\\label{fig:figure_2}").count(), 1);
    }

    #[test]
    fn patch_file_rewrites_only_on_change() {
        let tmp = tempfile::tempdir().unwrap();
        let tex = tmp.path().join("doc.tex");
        fs::write(&tex, body("!(Plot)(plot.pdf)")).unwrap();

        let c = ctx(tmp.path());
        patch_file(&tex, &c).unwrap();
        let first = fs::read_to_string(&tex).unwrap();
        assert!(first.contains("\\caption{Plot}"));

        patch_file(&tex, &c).unwrap();
        assert_eq!(fs::read_to_string(&tex).unwrap(), first);

        let err = patch_file(tmp.path().join("absent.tex"), &c).unwrap_err();
        assert!(matches!(err, Md2TexError::SourceNotFound { .. }));
    }
}
