//! Graphics extraction: pull inline SVG out of the Markdown.
//!
//! Every balanced `<svg>…</svg>` block (nested `<svg>` elements included) is
//! written to `<assets>/figure_{index}.svg`, pushed through the
//! [`RasterChain`], captioned by the [`CaptionCascade`] and replaced by a
//! one-line image reference:
//!
//! ```text
//! ![MDTEXFIG0001](pics/figure_1.pdf)
//! ```
//!
//! An SVG that is the sole content of a fenced block tagged `html`, `svg` or
//! `xml` takes the fence with it. SVG inside any other fenced block is code,
//! not a graphic, and is left alone.
//!
//! Re-running on the same document is cheap: the SVG file is only rewritten
//! when its content changed, and an existing non-empty converted file next to
//! an unchanged SVG is reused instead of converting again. Rewriting the SVG
//! removes every converted file left from its previous content.

use crate::config::{ConversionConfig, ReportingLevel};
use crate::error::{Diagnostic, Md2TexError};
use crate::output::FigureRecord;
use crate::pipeline::caption::CaptionCascade;
use crate::pipeline::rasterize::RasterChain;
use std::ops::Range;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Fence languages whose content is treated as a renderable graphic.
const GRAPHIC_FENCE_LANGS: &[&str] = &["html", "svg", "xml"];

/// Output of the extraction stage.
#[derive(Debug, Clone)]
pub struct Extraction {
    /// The document with every graphic replaced by its placeholder reference.
    pub document: String,
    /// One record per graphic, indices `1..=N` in document order.
    pub figures: Vec<FigureRecord>,
    pub diagnostics: Vec<Diagnostic>,
}

/// Extracts inline SVG into the assets directory.
pub struct GraphicsExtractor {
    /// Absolute assets directory, `<output>/<assets_name>`.
    assets_dir: PathBuf,
    /// Assets directory as it appears in rewritten references.
    assets_name: String,
    cascade: CaptionCascade,
    chain: RasterChain,
    reporting: ReportingLevel,
}

impl GraphicsExtractor {
    pub fn new(output_dir: &Path, config: &ConversionConfig) -> Self {
        Self {
            assets_dir: output_dir.join(&config.assets_dir),
            assets_name: config.assets_dir.clone(),
            cascade: CaptionCascade::from_config(config),
            chain: RasterChain::from_config(config),
            reporting: config.reporting,
        }
    }

    /// Replace the converter chain.
    pub fn with_chain(mut self, chain: RasterChain) -> Self {
        self.chain = chain;
        self
    }

    pub async fn extract(&self, document: &str) -> Result<Extraction, Md2TexError> {
        let blocks = graphic_blocks(document);
        if blocks.is_empty() {
            debug!("No inline SVG found");
            return Ok(Extraction {
                document: document.to_string(),
                figures: Vec::new(),
                diagnostics: Vec::new(),
            });
        }

        tokio::fs::create_dir_all(&self.assets_dir)
            .await
            .map_err(|e| Md2TexError::write(&self.assets_dir, e))?;

        let mut out = String::with_capacity(document.len());
        let mut figures = Vec::with_capacity(blocks.len());
        let mut diagnostics = Vec::new();
        let mut cursor = 0;

        for (i, block) in blocks.iter().enumerate() {
            let index = i + 1;
            let svg = &document[block.svg.clone()];
            let preceding = &document[..block.replace.start];

            let (record, mut diags) = self.extract_one(index, svg, preceding).await?;
            diagnostics.append(&mut diags);

            out.push_str(&document[cursor..block.replace.start]);
            out.push_str(&format!(
                "\n\n![{}]({})\n\n",
                record.placeholder_token, record.source_path
            ));
            cursor = block.replace.end;
            figures.push(record);
        }
        out.push_str(&document[cursor..]);

        info!("Extracted {} inline SVG figure(s)", figures.len());
        Ok(Extraction {
            document: out,
            figures,
            diagnostics,
        })
    }

    async fn extract_one(
        &self,
        index: usize,
        svg: &str,
        preceding: &str,
    ) -> Result<(FigureRecord, Vec<Diagnostic>), Md2TexError> {
        let base = self.assets_dir.join(FigureRecord::asset_stem_for(index));
        let svg_path = base.with_extension("svg");
        let written = write_if_changed(&svg_path, svg).await?;

        let reused = if written {
            self.chain
                .discard_outputs(&base)
                .await
                .map_err(|e| Md2TexError::write(&base, e))?;
            None
        } else {
            self.chain.existing_output(&base)
        };

        let (asset, is_vector_fallback, diagnostics) = match reused {
            Some(path) => {
                self.reporting.note(format_args!(
                    "Figure {index}: SVG unchanged, reusing {}",
                    path.display()
                ));
                (path, false, Vec::new())
            }
            None => {
                let outcome = self.chain.run(index, &svg_path, &base).await;
                (outcome.path, outcome.is_vector_fallback, outcome.diagnostics)
            }
        };

        let caption = match self.cascade.infer(svg, preceding) {
            Some((caption, rule)) => {
                self.reporting
                    .note(format_args!("Figure {index}: caption from {rule}: {caption}"));
                Some(caption)
            }
            None => {
                self.reporting
                    .note(format_args!("Figure {index}: no caption signal"));
                None
            }
        };

        let file_name = asset
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| format!("{}.svg", FigureRecord::asset_stem_for(index)));

        let record = FigureRecord {
            index,
            source_path: format!("{}/{}", self.assets_name, file_name),
            caption,
            placeholder_token: FigureRecord::token_for(index),
            is_vector_fallback,
        };
        Ok((record, diagnostics))
    }
}

/// Write `content` to `path` unless the file already holds exactly that.
///
/// Returns whether the file was written.
async fn write_if_changed(path: &Path, content: &str) -> Result<bool, Md2TexError> {
    if let Ok(existing) = tokio::fs::read(path).await {
        if existing == content.as_bytes() {
            return Ok(false);
        }
    }
    tokio::fs::write(path, content)
        .await
        .map_err(|e| Md2TexError::write(path, e))?;
    Ok(true)
}

// ── Block scanning ───────────────────────────────────────────────────────────

/// One graphic found in the document.
#[derive(Debug, Clone, PartialEq, Eq)]
struct GraphicBlock {
    /// The `<svg>…</svg>` source.
    svg: Range<usize>,
    /// What the placeholder replaces: the SVG alone, or its whole fence.
    replace: Range<usize>,
}

fn graphic_blocks(text: &str) -> Vec<GraphicBlock> {
    let fences = fenced_blocks(text);
    svg_blocks(text)
        .into_iter()
        .filter_map(|svg| {
            let fence = fences
                .iter()
                .find(|f| f.outer.start <= svg.start && svg.end <= f.outer.end);
            match fence {
                None => Some(GraphicBlock {
                    replace: svg.clone(),
                    svg,
                }),
                Some(f) if !f.is_graphic() => None,
                Some(f) if text[f.inner.clone()].trim() == text[svg.clone()].trim() => {
                    Some(GraphicBlock {
                        replace: f.outer.clone(),
                        svg,
                    })
                }
                Some(_) => Some(GraphicBlock {
                    replace: svg.clone(),
                    svg,
                }),
            }
        })
        .collect()
}

/// Byte ranges of every top-level balanced `<svg>…</svg>` block outside
/// code. An opening tag without a matching close is skipped.
fn svg_blocks(text: &str) -> Vec<Range<usize>> {
    let fences = fenced_blocks(text);
    let mut masked: Vec<Range<usize>> = fences
        .iter()
        .filter(|f| !f.is_graphic())
        .map(|f| f.outer.clone())
        .collect();
    masked.extend(code_spans(text, &fences));

    // ASCII lowercasing and blanking whole characters keep byte offsets
    // valid for `text`.
    let mut bytes = text.to_ascii_lowercase().into_bytes();
    for range in &masked {
        bytes[range.clone()].fill(b' ');
    }
    let lower = String::from_utf8_lossy(&bytes);

    let mut blocks = Vec::new();
    let mut pos = 0;
    while let Some(start) = next_open_tag(&lower, pos) {
        match block_end(&lower, start) {
            Some(end) => {
                blocks.push(start..end);
                pos = end;
            }
            None => pos = start + 4,
        }
    }
    blocks
}

fn next_open_tag(lower: &str, from: usize) -> Option<usize> {
    let mut at = from;
    while let Some(off) = lower[at..].find("<svg") {
        let i = at + off;
        match lower.as_bytes().get(i + 4) {
            Some(b' ' | b'\t' | b'\n' | b'\r' | b'>' | b'/') => return Some(i),
            _ => at = i + 4,
        }
    }
    None
}

fn block_end(lower: &str, start: usize) -> Option<usize> {
    let mut depth = 0usize;
    let mut at = start;
    loop {
        let open = next_open_tag(lower, at);
        let close = lower[at..].find("</svg").map(|off| at + off);
        let opens_first = match (open, close) {
            (Some(o), Some(c)) => o < c,
            (Some(_), None) => true,
            (None, Some(_)) => false,
            (None, None) => return None,
        };
        if opens_first {
            let o = open?;
            let tag_end = o + lower[o..].find('>')? + 1;
            if !lower[..tag_end].ends_with("/>") {
                depth += 1;
            } else if depth == 0 {
                return Some(tag_end);
            }
            at = tag_end;
        } else {
            let c = close?;
            let tag_end = c + lower[c..].find('>')? + 1;
            depth = depth.checked_sub(1)?;
            if depth == 0 {
                return Some(tag_end);
            }
            at = tag_end;
        }
    }
}

/// Ranges of `text` that hold code rather than prose: every fenced block
/// and every inline code span.
pub(crate) fn code_regions(text: &str) -> Vec<Range<usize>> {
    let fences = fenced_blocks(text);
    let mut regions = code_spans(text, &fences);
    regions.extend(fences.into_iter().map(|f| f.outer));
    regions
}

/// Inline code spans outside `fences`. A span opens with a run of backticks
/// and closes at the next run of the same length in the same paragraph.
fn code_spans(text: &str, fences: &[Fence]) -> Vec<Range<usize>> {
    let bytes = text.as_bytes();
    let mut spans = Vec::new();
    let mut i = 0;
    while i < bytes.len() {
        if let Some(f) = fences.iter().find(|f| f.outer.contains(&i)) {
            i = f.outer.end;
            continue;
        }
        if bytes[i] != b'`' {
            i += 1;
            continue;
        }
        let run = backtick_run(&bytes[i..]);
        match closing_run(bytes, i + run, run) {
            Some(end) => {
                spans.push(i..end);
                i = end;
            }
            None => i += run,
        }
    }
    spans
}

fn backtick_run(bytes: &[u8]) -> usize {
    bytes.iter().take_while(|&&b| b == b'`').count()
}

/// End of the first backtick run of exactly `len` at or after `from`,
/// stopping at a blank line.
fn closing_run(bytes: &[u8], from: usize, len: usize) -> Option<usize> {
    let mut j = from;
    while j < bytes.len() {
        match bytes[j] {
            b'`' => {
                let run = backtick_run(&bytes[j..]);
                if run == len {
                    return Some(j + run);
                }
                j += run;
            }
            b'\n' if starts_with_blank_line(&bytes[j + 1..]) => return None,
            _ => j += 1,
        }
    }
    None
}

/// Whether `rest` begins with a line holding nothing but spaces or tabs.
fn starts_with_blank_line(rest: &[u8]) -> bool {
    let indent = rest.iter().take_while(|&&b| b == b' ' || b == b'\t').count();
    matches!(rest.get(indent), Some(b'\n' | b'\r'))
}

#[derive(Debug)]
struct Fence {
    /// Opening line through closing line, newline included.
    outer: Range<usize>,
    /// Content between the fence lines.
    inner: Range<usize>,
    /// First word of the info string, lowercased.
    lang: String,
}

impl Fence {
    /// Tagged with a language whose content renders as a graphic.
    fn is_graphic(&self) -> bool {
        GRAPHIC_FENCE_LANGS.contains(&self.lang.as_str())
    }
}

/// Fenced code blocks (```` ``` ```` or `~~~`). An unclosed fence runs to the
/// end of the document.
fn fenced_blocks(text: &str) -> Vec<Fence> {
    let mut fences = Vec::new();
    let mut open: Option<(usize, usize, char, usize, String)> = None;
    let mut offset = 0;

    for line in text.split_inclusive('\n') {
        let line_start = offset;
        offset += line.len();
        let trimmed = line.trim_start_matches(' ');
        if line.len() - trimmed.len() > 3 {
            continue;
        }
        let marker = match trimmed.chars().next() {
            Some(c @ ('`' | '~')) => c,
            _ => continue,
        };
        let run = trimmed.chars().take_while(|&c| c == marker).count();
        if run < 3 {
            continue;
        }
        let rest = trimmed[run..].trim();

        if open.is_none() {
            let lang = rest
                .split_whitespace()
                .next()
                .unwrap_or("")
                .trim_start_matches('{')
                .trim_start_matches('.')
                .trim_end_matches('}')
                .to_ascii_lowercase();
            open = Some((line_start, offset, marker, run, lang));
            continue;
        }

        let closes = matches!(
            &open,
            Some((_, _, m, n, _)) if marker == *m && run >= *n && rest.is_empty()
        );
        if closes {
            if let Some((start, inner_start, _, _, lang)) = open.take() {
                fences.push(Fence {
                    outer: start..offset,
                    inner: inner_start..line_start,
                    lang,
                });
            }
        }
    }

    if let Some((start, inner_start, _, _, lang)) = open {
        fences.push(Fence {
            outer: start..text.len(),
            inner: inner_start..text.len(),
            lang,
        });
    }
    fences
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::rasterize::{RasterizeError, Rasterizer};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    const SVG_A: &str = r#"<svg width="10" height="10"><text class="title">Growth Curve</text></svg>"#;

    /// Writes a tiny fake PDF and counts its invocations.
    struct FakePdf {
        calls: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl Rasterizer for FakePdf {
        fn name(&self) -> &str {
            "fake-pdf"
        }
        fn extension(&self) -> &'static str {
            "pdf"
        }
        async fn rasterize(&self, _svg: &Path, base: &Path) -> Result<PathBuf, RasterizeError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let out = base.with_extension("pdf");
            std::fs::write(&out, b"%PDF-1.4 fake")?;
            Ok(out)
        }
    }

    struct Broken;

    #[async_trait]
    impl Rasterizer for Broken {
        fn name(&self) -> &str {
            "broken"
        }
        fn extension(&self) -> &'static str {
            "pdf"
        }
        async fn rasterize(&self, _: &Path, _: &Path) -> Result<PathBuf, RasterizeError> {
            Err(RasterizeError::Render("nope".into()))
        }
    }

    fn extractor(out: &Path, rasterizer: Box<dyn Rasterizer>) -> GraphicsExtractor {
        let config = ConversionConfig::default();
        GraphicsExtractor::new(out, &config)
            .with_chain(RasterChain::new(vec![rasterizer], ReportingLevel::Quiet))
    }

    fn fake(calls: &Arc<AtomicUsize>) -> Box<dyn Rasterizer> {
        Box::new(FakePdf {
            calls: Arc::clone(calls),
        })
    }

    #[test]
    fn scanner_balances_nested_svg() {
        let doc = "a <svg><g><svg x=\"1\"><rect/></svg></g></svg> b <svg/> c";
        let blocks = svg_blocks(doc);
        assert_eq!(blocks.len(), 2);
        assert_eq!(&doc[blocks[0].clone()], "<svg><g><svg x=\"1\"><rect/></svg></g></svg>");
        assert_eq!(&doc[blocks[1].clone()], "<svg/>");
    }

    #[test]
    fn scanner_ignores_lookalike_tags() {
        assert!(svg_blocks("<svgfoo>x</svgfoo>").is_empty());
        assert!(svg_blocks("<svg width='1'>unterminated").is_empty());
    }

    #[test]
    fn svg_named_in_inline_code_is_not_a_graphic() {
        let doc = "Use the `<svg>` element.\n\n<svg><text class=\"title\">Growth Curve</text></svg>\n";
        let blocks = graphic_blocks(doc);
        assert_eq!(blocks.len(), 1);
        assert_eq!(
            &doc[blocks[0].svg.clone()],
            "<svg><text class=\"title\">Growth Curve</text></svg>"
        );
    }

    #[test]
    fn double_backtick_span_hides_its_contents() {
        let doc = "``a ` <svg> b`` then <svg></svg>";
        let blocks = svg_blocks(doc);
        assert_eq!(blocks.len(), 1);
        assert_eq!(&doc[blocks[0].clone()], "<svg></svg>");
    }

    #[test]
    fn unmatched_open_tag_does_not_hide_later_blocks() {
        let doc = "Stray <svg width=\"1\"> in prose.\n\n<svg><rect/></svg>\n\n<svg></svg>\n";
        let blocks = svg_blocks(doc);
        assert_eq!(blocks.len(), 2);
        assert_eq!(&doc[blocks[0].clone()], "<svg><rect/></svg>");
        assert_eq!(&doc[blocks[1].clone()], "<svg></svg>");
    }

    #[test]
    fn unclosed_backtick_is_plain_text() {
        let doc = "a ` stray\n\n<svg></svg>";
        assert_eq!(svg_blocks(doc).len(), 1);
    }

    #[test]
    fn code_regions_cover_fences_and_spans() {
        let doc = "x `![a](b.png)` y\n\n```md\n![c](d.png)\n```\n";
        let regions = code_regions(doc);
        let covered = |needle: &str| {
            let at = doc.find(needle).unwrap();
            regions.iter().any(|r| r.contains(&at))
        };
        assert!(covered("![a]"));
        assert!(covered("![c]"));
        assert!(!covered("x "));
    }

    #[test]
    fn html_fence_is_consumed_with_its_svg() {
        let doc = "Intro\n\n```html\n<svg></svg>\n```\n\nAfter\n";
        let blocks = graphic_blocks(doc);
        assert_eq!(blocks.len(), 1);
        assert_eq!(&doc[blocks[0].replace.clone()], "```html\n<svg></svg>\n```\n");
    }

    #[test]
    fn svg_in_other_fences_is_code() {
        let doc = "```js\nconst s = '<svg></svg>';\n```\n";
        assert!(graphic_blocks(doc).is_empty());
    }

    #[test]
    fn fence_with_more_than_svg_keeps_fence() {
        let doc = "```html\n<div>\n<svg></svg>\n</div>\n```\n";
        let blocks = graphic_blocks(doc);
        assert_eq!(blocks.len(), 1);
        assert_eq!(blocks[0].replace, blocks[0].svg);
    }

    #[tokio::test]
    async fn n_blocks_give_n_contiguous_records() {
        let tmp = tempfile::tempdir().unwrap();
        let calls = Arc::new(AtomicUsize::new(0));
        let doc = format!("# T\n\n{SVG_A}\n\ntext\n\n<svg><rect/></svg>\n\n```svg\n<svg></svg>\n```\n");

        let ex = extractor(tmp.path(), fake(&calls)).extract(&doc).await.unwrap();
        let indices: Vec<usize> = ex.figures.iter().map(|f| f.index).collect();
        assert_eq!(indices, vec![1, 2, 3]);

        let mut tokens: Vec<&str> = ex.figures.iter().map(|f| f.placeholder_token.as_str()).collect();
        tokens.sort();
        tokens.dedup();
        assert_eq!(tokens.len(), 3);
        for f in &ex.figures {
            assert_eq!(ex.document.matches(&f.placeholder_token).count(), 1);
        }
        assert!(!ex.document.contains("<svg"));
        assert!(!ex.document.contains("```svg"));
    }

    #[tokio::test]
    async fn record_carries_caption_and_converted_asset() {
        let tmp = tempfile::tempdir().unwrap();
        let calls = Arc::new(AtomicUsize::new(0));
        let ex = extractor(tmp.path(), fake(&calls))
            .extract(&format!("Before\n\n{SVG_A}\n"))
            .await
            .unwrap();

        let fig = &ex.figures[0];
        assert_eq!(fig.caption.as_deref(), Some("Growth Curve"));
        assert_eq!(fig.source_path, "pics/figure_1.pdf");
        assert!(!fig.is_vector_fallback);
        assert!(tmp.path().join("pics/figure_1.svg").is_file());
        assert!(ex.document.contains("![MDTEXFIG0001](pics/figure_1.pdf)"));
    }

    #[tokio::test]
    async fn failed_chain_uses_svg() {
        let tmp = tempfile::tempdir().unwrap();
        let ex = extractor(tmp.path(), Box::new(Broken))
            .extract(SVG_A)
            .await
            .unwrap();
        let fig = &ex.figures[0];
        assert!(fig.is_vector_fallback);
        assert_eq!(fig.source_path, "pics/figure_1.svg");
        assert!(ex.diagnostics.contains(&Diagnostic::VectorFallback { figure: 1 }));
    }

    #[tokio::test]
    async fn rerun_reuses_converted_output() {
        let tmp = tempfile::tempdir().unwrap();
        let calls = Arc::new(AtomicUsize::new(0));
        let ex = extractor(tmp.path(), fake(&calls));

        ex.extract(SVG_A).await.unwrap();
        let second = ex.extract(SVG_A).await.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(second.figures[0].source_path, "pics/figure_1.pdf");

        // Changed SVG content is converted again.
        ex.extract("<svg><rect width=\"2\"/></svg>").await.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn changed_svg_never_reuses_an_older_conversion() {
        use crate::pipeline::rasterize::ResvgRasterizer;

        let tmp = tempfile::tempdir().unwrap();
        let calls = Arc::new(AtomicUsize::new(0));
        let red = r##"<svg xmlns="http://www.w3.org/2000/svg" width="4" height="4"><rect width="4" height="4" fill="#f00"/></svg>"##;
        let blue = r##"<svg xmlns="http://www.w3.org/2000/svg" width="4" height="4"><rect width="4" height="4" fill="#00f"/></svg>"##;
        let chain = |first: Box<dyn Rasterizer>| {
            GraphicsExtractor::new(tmp.path(), &ConversionConfig::default()).with_chain(
                RasterChain::new(
                    vec![first, Box::new(ResvgRasterizer::new(96))],
                    ReportingLevel::Quiet,
                ),
            )
        };

        let first = chain(fake(&calls)).extract(red).await.unwrap();
        assert_eq!(first.figures[0].source_path, "pics/figure_1.pdf");

        // The PDF converter is unavailable when the SVG changes.
        let second = chain(Box::new(Broken)).extract(blue).await.unwrap();
        assert_eq!(second.figures[0].source_path, "pics/figure_1.png");
        assert!(!tmp.path().join("pics/figure_1.pdf").exists());

        let third = chain(fake(&calls)).extract(blue).await.unwrap();
        assert_eq!(third.figures[0].source_path, "pics/figure_1.png");
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn document_without_svg_is_untouched() {
        let tmp = tempfile::tempdir().unwrap();
        let calls = Arc::new(AtomicUsize::new(0));
        let doc = "# Plain\n\nNo graphics here.\n";
        let ex = extractor(tmp.path(), fake(&calls)).extract(doc).await.unwrap();
        assert_eq!(ex.document, doc);
        assert!(ex.figures.is_empty());
        assert!(!tmp.path().join("pics").exists());
    }
}
