//! Text templates: the metadata header handed to pandoc and the LaTeX figure
//! block every graphic ends up in.
//!
//! Keeping both here means the exact shape of generated LaTeX is defined in
//! one place, and the patcher's "already correct" checks can be written
//! against the same strings.

/// Packages always loaded through the metadata header.
const HEADER_PACKAGES: &[&str] = &[
    "\\usepackage{geometry}",
    "\\geometry{a4paper, margin=1in}",
    "\\usepackage{graphicx}",
    "\\usepackage{xcolor}",
    "\\usepackage{hyperref}",
    "\\usepackage{fontspec}",
    "\\usepackage{float}",
];

/// YAML metadata header prepended to the Markdown before conversion.
///
/// `svg_package` adds `\usepackage{svg}` for documents that fall back to
/// including raw SVG files.
pub fn metadata_header(title: &str, svg_package: bool) -> String {
    let mut yaml = String::from("---\n");
    yaml.push_str(&format!("title: \"{}\"\n", yaml_escape(title)));
    yaml.push_str("documentclass: ctexart\n");
    yaml.push_str("classoption:\n  - a4paper\n  - UTF8\n");
    yaml.push_str("header-includes:\n");
    for pkg in HEADER_PACKAGES {
        yaml.push_str(&format!("  - '{}'\n", pkg));
    }
    if svg_package {
        yaml.push_str("  - '\\usepackage{svg}'\n");
    }
    yaml.push_str("---\n\n");
    yaml
}

fn yaml_escape(s: &str) -> String {
    s.replace('\\', "\\\\").replace('"', "\\\"")
}

/// Render a complete figure environment.
///
/// `.svg` paths use `\includesvg`, everything else `\includegraphics`.
pub fn figure_block(path: &str, caption: &str, label: &str, width: &str) -> String {
    figure_env(&include_command(path, width), caption, label)
}

/// Wrap an existing inclusion command in a figure environment.
pub fn figure_env(include: &str, caption: &str, label: &str) -> String {
    format!(
        "\\begin{{figure}}[htbp]\n\\centering\n{}\n\\caption{{{}}}\n\\label{{{}}}\n\\end{{figure}}",
        include, caption, label
    )
}

/// The inclusion command for `path` at the given width.
pub fn include_command(path: &str, width: &str) -> String {
    if is_svg_path(path) {
        format!("\\includesvg[width={}]{{{}}}", width, path)
    } else {
        format!("\\includegraphics[width={}]{{{}}}", width, path)
    }
}

pub fn is_svg_path(path: &str) -> bool {
    path.to_ascii_lowercase().ends_with(".svg")
}

/// Escape text for use inside a LaTeX argument such as `\caption{…}`.
pub fn escape_latex(text: &str) -> String {
    let mut out = String::with_capacity(text.len() + 8);
    for ch in text.chars() {
        match ch {
            '\\' => out.push_str("\\textbackslash{}"),
            '&' | '%' | '$' | '#' | '_' | '{' | '}' => {
                out.push('\\');
                out.push(ch);
            }
            '~' => out.push_str("\\textasciitilde{}"),
            '^' => out.push_str("\\textasciicircum{}"),
            '\n' | '\r' => out.push(' '),
            _ => out.push(ch),
        }
    }
    out
}

/// Undo the escaping pandoc applies to file paths in LaTeX output.
pub fn unescape_latex_path(path: &str) -> String {
    path.replace("\\_", "_")
        .replace("\\#", "#")
        .replace("\\%", "%")
        .replace("\\&", "&")
        .replace("\\textasciitilde{}", "~")
}
