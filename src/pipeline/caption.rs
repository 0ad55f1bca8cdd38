//! Caption inference for inline SVG figures.
//!
//! Authored SVG rarely carries caption metadata, so the caption is guessed
//! from a cascade of independent rules, most reliable first. The first rule
//! that produces a non-empty caption wins; later rules are not consulted.
//!
//! | # | Rule | Signal |
//! |---|------|--------|
//! | 1 | [`TitleElement`] | `<title>` element |
//! | 2 | [`TitleClassText`] | `<text class="title">`, `<tspan>` children inlined |
//! | 3 | [`PrecedingProse`] | line just above the SVG containing a visualisation keyword |
//! | 4 | [`FirstLongText`] | first `<text>` longer than the minimum length |
//!
//! When nothing matches the caller falls back to `"Figure {index}"`.

use crate::config::ConversionConfig;
use once_cell::sync::Lazy;
use regex::Regex;

/// One step of the cascade.
pub trait CaptionRule: Send + Sync {
    /// Short name used in log output.
    fn name(&self) -> &'static str;

    /// Try to produce a caption from the SVG source and the document text
    /// that precedes it.
    fn infer(&self, svg: &str, preceding: &str) -> Option<String>;
}

/// Ordered list of caption rules.
pub struct CaptionCascade {
    rules: Vec<Box<dyn CaptionRule>>,
}

impl CaptionCascade {
    pub fn new(rules: Vec<Box<dyn CaptionRule>>) -> Self {
        Self { rules }
    }

    /// The standard four-rule cascade, parameterised by the config.
    pub fn from_config(config: &ConversionConfig) -> Self {
        Self::new(vec![
            Box::new(TitleElement),
            Box::new(TitleClassText),
            Box::new(PrecedingProse::new(config.caption_keywords.clone())),
            Box::new(FirstLongText::new(config.caption_min_chars)),
        ])
    }

    /// First non-empty caption and the name of the rule that produced it.
    pub fn infer(&self, svg: &str, preceding: &str) -> Option<(String, &'static str)> {
        self.rules.iter().find_map(|rule| {
            rule.infer(svg, preceding)
                .map(|c| c.trim().to_string())
                .filter(|c| !c.is_empty())
                .map(|c| (c, rule.name()))
        })
    }
}

impl Default for CaptionCascade {
    fn default() -> Self {
        Self::from_config(&ConversionConfig::default())
    }
}

// ── Rule 1: <title> ──────────────────────────────────────────────────────────

static RE_TITLE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?is)<title\b[^>]*>(.*?)</title\s*>").unwrap());

/// `<title>` content, decoded of nested markup and entities.
pub struct TitleElement;

impl CaptionRule for TitleElement {
    fn name(&self) -> &'static str {
        "title element"
    }

    fn infer(&self, svg: &str, _preceding: &str) -> Option<String> {
        RE_TITLE
            .captures(svg)
            .map(|c| clean_text(&c[1]))
            .filter(|t| !t.is_empty())
    }
}

// ── Rule 2: <text class="title"> ─────────────────────────────────────────────

static RE_TITLE_CLASS_TEXT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r#"(?is)<text\b[^>]*\bclass\s*=\s*["'](?:[^"']*\s)?title(?:\s[^"']*)?["'][^>]*>(.*?)</text\s*>"#,
    )
    .unwrap()
});

static RE_TSPAN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?is)<tspan\b[^>]*>(.*?)</tspan\s*>").unwrap());

/// Text element carrying the `title` class.
pub struct TitleClassText;

impl CaptionRule for TitleClassText {
    fn name(&self) -> &'static str {
        "title-class text"
    }

    fn infer(&self, svg: &str, _preceding: &str) -> Option<String> {
        let inner = RE_TITLE_CLASS_TEXT.captures(svg)?.get(1)?.as_str();
        let inlined = RE_TSPAN.replace_all(inner, "$1");
        Some(clean_text(&inlined)).filter(|t| !t.is_empty())
    }
}

// ── Rule 3: preceding prose ──────────────────────────────────────────────────

/// The nearest non-blank line above the SVG, when it mentions a keyword.
/// A line that closes an earlier SVG is markup, not prose, and yields nothing.
pub struct PrecedingProse {
    keywords: Vec<String>,
}

impl PrecedingProse {
    pub fn new(keywords: Vec<String>) -> Self {
        Self {
            keywords: keywords.into_iter().map(|k| k.to_lowercase()).collect(),
        }
    }
}

impl CaptionRule for PrecedingProse {
    fn name(&self) -> &'static str {
        "preceding prose"
    }

    fn infer(&self, _svg: &str, preceding: &str) -> Option<String> {
        let line = preceding
            .lines()
            .rev()
            .map(str::trim)
            .find(|l| !l.is_empty() && !l.starts_with("```"))?;
        let lower = line.to_lowercase();
        if lower.contains("</svg") || !self.keywords.iter().any(|k| lower.contains(k.as_str())) {
            return None;
        }
        let line = clean_text(line);
        let cleaned = line
            .trim_start_matches('#')
            .trim()
            .trim_matches(|c| c == '*' || c == '_')
            .trim()
            .trim_end_matches([':', '：'])
            .trim();
        Some(cleaned.to_string()).filter(|t| !t.is_empty())
    }
}

// ── Rule 4: first long <text> ────────────────────────────────────────────────

static RE_TEXT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?is)<text\b[^>]*>(.*?)</text\s*>").unwrap());

/// First `<text>` whose cleaned content is longer than `min_chars` characters.
pub struct FirstLongText {
    min_chars: usize,
}

impl FirstLongText {
    pub fn new(min_chars: usize) -> Self {
        Self { min_chars }
    }
}

impl CaptionRule for FirstLongText {
    fn name(&self) -> &'static str {
        "first long text"
    }

    fn infer(&self, svg: &str, _preceding: &str) -> Option<String> {
        RE_TEXT
            .captures_iter(svg)
            .map(|c| clean_text(&c[1]))
            .find(|t| t.chars().count() > self.min_chars)
    }
}

// ── Helpers ──────────────────────────────────────────────────────────────────

static RE_TAG: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?s)<[^>]*>").unwrap());
static RE_WS: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").unwrap());
static RE_CDATA: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?s)<!\[CDATA\[(.*?)\]\]>").unwrap());

/// Unwrap CDATA, strip tags, decode entities, collapse whitespace.
pub fn clean_text(markup: &str) -> String {
    let unwrapped = RE_CDATA.replace_all(markup, "$1");
    let stripped = RE_TAG.replace_all(&unwrapped, "");
    let decoded = decode_entities(&stripped);
    RE_WS.replace_all(decoded.trim(), " ").into_owned()
}

static RE_ENTITY: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"&(#[0-9]+|#[xX][0-9a-fA-F]+|[a-zA-Z]+);").unwrap());

/// Decode the XML predefined entities and numeric character references.
pub fn decode_entities(text: &str) -> String {
    RE_ENTITY
        .replace_all(text, |caps: &regex::Captures<'_>| {
            let body = &caps[1];
            let decoded = match body {
                "amp" => Some('&'),
                "lt" => Some('<'),
                "gt" => Some('>'),
                "quot" => Some('"'),
                "apos" => Some('\''),
                "nbsp" => Some(' '),
                _ if body.starts_with("#x") || body.starts_with("#X") => {
                    u32::from_str_radix(&body[2..], 16).ok().and_then(char::from_u32)
                }
                _ if body.starts_with('#') => body[1..].parse().ok().and_then(char::from_u32),
                _ => None,
            };
            decoded.map_or_else(|| caps[0].to_string(), |c| c.to_string())
        })
        .into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cascade() -> CaptionCascade {
        CaptionCascade::default()
    }

    #[test]
    fn title_element_wins() {
        let svg = r#"<svg><title>Revenue &amp; Cost</title><text class="title">Other</text></svg>"#;
        let (caption, rule) = cascade().infer(svg, "").unwrap();
        assert_eq!(caption, "Revenue & Cost");
        assert_eq!(rule, "title element");
    }

    #[test]
    fn empty_title_falls_through() {
        let svg = r#"<svg><title>  </title><text class="title">Growth Curve</text></svg>"#;
        let (caption, rule) = cascade().infer(svg, "").unwrap();
        assert_eq!(caption, "Growth Curve");
        assert_eq!(rule, "title-class text");
    }

    #[test]
    fn title_class_only() {
        let svg = r#"<svg width="400"><text x="10" y="20" class="title">Growth Curve</text></svg>"#;
        assert_eq!(cascade().infer(svg, "").unwrap().0, "Growth Curve");
    }

    #[test]
    fn title_class_inlines_tspans() {
        let svg = r#"<svg><text class="chart title" font-size="18"><tspan>Monthly</tspan> <tspan dy="1">Users</tspan><a>!</a></text></svg>"#;
        let got = TitleClassText.infer(svg, "").unwrap();
        assert_eq!(got, "Monthly Users!");
    }

    #[test]
    fn subtitle_class_is_not_title() {
        let svg = r#"<svg><text class="subtitle">short</text></svg>"#;
        assert!(TitleClassText.infer(svg, "").is_none());
    }

    #[test]
    fn preceding_prose_with_keyword() {
        let svg = r#"<svg><rect/></svg>"#;
        let before = "Intro paragraph.\n\n**Figure: Network Diagram of the cluster**\n\n";
        let (caption, rule) = cascade().infer(svg, before).unwrap();
        assert_eq!(caption, "Figure: Network Diagram of the cluster");
        assert_eq!(rule, "preceding prose");
    }

    #[test]
    fn preceding_prose_skips_fence_line() {
        let rule = PrecedingProse::new(vec!["chart".into()]);
        let before = "### Sales chart\n```html\n";
        assert_eq!(rule.infer("", before).unwrap(), "Sales chart");
    }

    #[test]
    fn tail_of_previous_svg_is_not_prose() {
        let rule = PrecedingProse::new(vec!["chart".into()]);
        let before = "<svg>\n<text>Sales chart</text></svg>\n\n";
        assert!(rule.infer("<svg></svg>", before).is_none());
        assert!(rule.infer("", "<svg><text>chart</text>\n</svg>\n").is_none());
    }

    #[test]
    fn inline_markup_is_stripped_from_prose() {
        let rule = PrecedingProse::new(vec!["diagram".into()]);
        let got = rule.infer("", "<b>Network diagram</b> &amp; legend\n").unwrap();
        assert_eq!(got, "Network diagram & legend");
    }

    #[test]
    fn preceding_prose_without_keyword_is_ignored() {
        let rule = PrecedingProse::new(vec!["diagram".into()]);
        assert!(rule.infer("", "Just some text\n").is_none());
    }

    #[test]
    fn first_long_text_fallback() {
        let svg = r#"<svg><text>Axis</text><text>Quarterly revenue by region</text></svg>"#;
        let (caption, rule) = cascade().infer(svg, "").unwrap();
        assert_eq!(caption, "Quarterly revenue by region");
        assert_eq!(rule, "first long text");
    }

    #[test]
    fn length_threshold_is_exclusive() {
        let rule = FirstLongText::new(10);
        assert!(rule.infer("<svg><text>0123456789</text></svg>", "").is_none());
        assert_eq!(
            rule.infer("<svg><text>0123456789A</text></svg>", "").unwrap(),
            "0123456789A"
        );
    }

    #[test]
    fn threshold_counts_characters_not_bytes() {
        let rule = FirstLongText::new(10);
        // 6 CJK characters = 18 bytes
        assert!(rule.infer("<svg><text>用户增长曲线</text></svg>", "").is_none());
    }

    #[test]
    fn no_signal_is_absent() {
        let svg = r#"<svg><rect width="10"/><text>x</text></svg>"#;
        assert!(cascade().infer(svg, "Unrelated text\n").is_none());
    }

    #[test]
    fn decode_numeric_entities() {
        assert_eq!(decode_entities("&#65;&#x42;&lt;&unknown;"), "AB<&unknown;");
    }
}
