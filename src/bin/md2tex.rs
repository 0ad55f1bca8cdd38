//! CLI binary for md2tex.
//!
//! A thin shim over the library crate that maps CLI flags
//! to `ConversionConfig` and prints results.

use anyhow::{Context, Result};
use clap::Parser;
use indicatif::{ProgressBar, ProgressStyle};
use md2tex::{
    convert, patch_only, ConversionConfig, ConversionProgressCallback, FigureRecord,
    ImageReference, ProgressCallback, RasterBackend, ReportingLevel, Stage,
};
use std::io;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

// ── ANSI colour helpers (no extra deps) ──────────────────────────────────────

fn green(s: &str) -> String {
    format!("\x1b[32m{s}\x1b[0m")
}
fn yellow(s: &str) -> String {
    format!("\x1b[33m{s}\x1b[0m")
}
fn dim(s: &str) -> String {
    format!("\x1b[2m{s}\x1b[0m")
}
fn bold(s: &str) -> String {
    format!("\x1b[1m{s}\x1b[0m")
}
fn cyan(s: &str) -> String {
    format!("\x1b[36m{s}\x1b[0m")
}

// ── CLI progress callback using indicatif ────────────────────────────────────

/// Terminal progress callback: a spinner naming the current stage, plus one
/// log line per extracted figure and per unresolved image.
struct CliProgressCallback {
    bar: ProgressBar,
    unresolved: AtomicUsize,
}

impl CliProgressCallback {
    fn new() -> Arc<Self> {
        let bar = ProgressBar::new_spinner();
        let style = ProgressStyle::with_template("{spinner:.cyan} {prefix:.bold}  {msg}  {elapsed:.dim}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner())
            .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", "⠿"]);
        bar.set_style(style);
        bar.set_prefix("Preparing");
        bar.enable_steady_tick(Duration::from_millis(80));

        Arc::new(Self {
            bar,
            unresolved: AtomicUsize::new(0),
        })
    }
}

impl ConversionProgressCallback for CliProgressCallback {
    fn on_conversion_start(&self, source: &str) {
        self.bar.println(format!(
            "{} {}",
            cyan("◆"),
            bold(&format!("Converting {source}"))
        ));
    }

    fn on_stage_start(&self, stage: Stage) {
        self.bar.set_prefix(stage.to_string());
        self.bar.set_message("");
    }

    fn on_figure(&self, figure: &FigureRecord) {
        let mark = if figure.is_vector_fallback {
            yellow("◇")
        } else {
            green("✓")
        };
        self.bar.println(format!(
            "  {} Figure {:>3}  {:<28}  {}",
            mark,
            figure.index,
            figure.source_path,
            dim(figure.caption.as_deref().unwrap_or("(no caption)")),
        ));
    }

    fn on_reference(&self, reference: &ImageReference) {
        if !reference.is_resolved() {
            self.unresolved.fetch_add(1, Ordering::SeqCst);
            self.bar.println(format!(
                "  {} {}  {}",
                yellow("?"),
                reference.written_path,
                dim("not found"),
            ));
        }
    }

    fn on_stage_complete(&self, stage: Stage, elapsed_ms: u64) {
        self.bar.set_message(format!("{stage} done in {elapsed_ms}ms"));
    }

    fn on_conversion_complete(&self, figures: usize, diagnostics: usize) {
        self.bar.finish_and_clear();
        let unresolved = self.unresolved.load(Ordering::SeqCst);
        if diagnostics == 0 {
            eprintln!(
                "{} {} figure(s) reconciled",
                green("✔"),
                bold(&figures.to_string())
            );
        } else {
            eprintln!(
                "{} {} figure(s) reconciled  ({} warning(s), {} image(s) not found)",
                yellow("⚠"),
                bold(&figures.to_string()),
                diagnostics,
                unresolved,
            );
        }
    }
}

const AFTER_HELP: &str = r#"EXAMPLES:
  # Markdown → LaTeX + PDF next to the source (notes/notes.tex, notes/notes.pdf)
  md2tex notes.md

  # Separate output tree, LaTeX only
  md2tex notes.md -o build --no-pdf

  # Chinese document with a house style
  md2tex 报告.md --cjk-font "Noto Serif CJK SC" --figure-name 图 --style-dir ~/tex/styles

  # Only the in-process rasterizer (no Inkscape / rsvg-convert)
  md2tex notes.md --rasterizers resvg

  # Re-run the LaTeX repair passes on an existing file
  md2tex --patch-only build/notes/notes.tex

  # Machine-readable summary
  md2tex --json notes.md > run.json

EXTERNAL TOOLS:
  pandoc         required    Markdown → LaTeX
  xelatex        optional    LaTeX → PDF (skip with --no-pdf)
  inkscape       optional    SVG → PDF, first in the default chain
  rsvg-convert   optional    SVG → PDF, second in the default chain

ENVIRONMENT VARIABLES:
  Every flag can be set as MD2TEX_<FLAG>, e.g. MD2TEX_OUTPUT, MD2TEX_CJK_FONT.
  RUST_LOG       Override the log filter (e.g. RUST_LOG=md2tex=debug)
"#;

/// Convert Markdown with inline SVG into LaTeX and PDF.
#[derive(Parser, Debug)]
#[command(
    name = "md2tex",
    version,
    about = "Convert Markdown with inline SVG and loose image references into LaTeX and PDF",
    long_about = "Convert a Markdown document into LaTeX (via pandoc) and PDF (via XeLaTeX). \
Inline SVG is extracted and converted, image references are located and copied next to the \
output, and every graphic ends up in a captioned, labelled figure environment.",
    arg_required_else_help = true,
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    /// Markdown source document.
    #[arg(required_unless_present = "patch_only")]
    input: Option<PathBuf>,

    /// Parent of the output directory (default: the source's directory).
    #[arg(short, long, env = "MD2TEX_OUTPUT")]
    output: Option<PathBuf>,

    /// Directory whose *.sty files are copied next to the output.
    #[arg(long, env = "MD2TEX_STYLE_DIR")]
    style_dir: Option<PathBuf>,

    /// Name of the assets directory inside the output directory.
    #[arg(long, env = "MD2TEX_ASSETS_DIR", default_value = "pics")]
    assets_dir: String,

    /// Stop after patching the .tex file; do not run XeLaTeX.
    #[arg(long, env = "MD2TEX_NO_PDF")]
    no_pdf: bool,

    /// Print the run summary (ConversionOutput) as JSON on stdout.
    #[arg(long, env = "MD2TEX_JSON")]
    json: bool,

    /// Main CJK font set in the preamble (e.g. "Noto Serif CJK SC").
    #[arg(long, env = "MD2TEX_CJK_FONT")]
    cjk_font: Option<String>,

    /// Caption used for figures without one.
    #[arg(long, env = "MD2TEX_FIGURE_NAME", default_value = "Figure")]
    figure_name: String,

    /// SVG converters to try, in order: inkscape, rsvg-convert, resvg.
    #[arg(
        long,
        env = "MD2TEX_RASTERIZERS",
        value_delimiter = ',',
        default_value = "inkscape,rsvg-convert,resvg"
    )]
    rasterizers: Vec<RasterBackend>,

    /// Per-converter timeout in seconds.
    #[arg(long, env = "MD2TEX_CONVERTER_TIMEOUT", default_value_t = 30)]
    converter_timeout: u64,

    /// Directory depth searched below asset-like directories.
    #[arg(long, env = "MD2TEX_WALK_DEPTH", default_value_t = 6)]
    walk_depth: usize,

    /// Re-run the LaTeX repair passes on an existing .tex file and exit.
    #[arg(long, value_name = "TEX", conflicts_with = "input")]
    patch_only: Option<PathBuf>,

    /// Disable the progress spinner.
    #[arg(long, env = "MD2TEX_NO_PROGRESS")]
    no_progress: bool,

    /// Enable DEBUG-level tracing logs and per-item notes.
    #[arg(short, long, env = "MD2TEX_VERBOSE")]
    verbose: bool,

    /// Suppress all output except errors.
    #[arg(short, long, env = "MD2TEX_QUIET", conflicts_with = "verbose")]
    quiet: bool,
}

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        eprintln!("Error: {e:#}");
        std::process::exit(1);
    }
}

async fn run() -> Result<()> {
    let cli = Cli::parse();

    // ── Logging setup ────────────────────────────────────────────────────
    // The spinner carries the progress; library INFO logs would interleave
    // with it, so they are only shown when it is off.
    let show_progress = !cli.quiet && !cli.no_progress && !cli.json && cli.patch_only.is_none();
    let filter = if cli.verbose {
        "debug"
    } else if cli.quiet || show_progress {
        "error"
    } else {
        "info"
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .with_writer(io::stderr)
        .init();

    let progress_cb: Option<ProgressCallback> = if show_progress {
        Some(CliProgressCallback::new() as Arc<dyn ConversionProgressCallback>)
    } else {
        None
    };
    let config = build_config(&cli, progress_cb)?;

    // ── Patch-only mode ──────────────────────────────────────────────────
    if let Some(ref tex) = cli.patch_only {
        let patched = patch_only(tex, &config)
            .with_context(|| format!("Failed to patch {}", tex.display()))?;
        if cli.json {
            println!(
                "{}",
                serde_json::to_string_pretty(&patched.diagnostics)
                    .context("Failed to serialise diagnostics")?
            );
        } else if !cli.quiet {
            for d in &patched.diagnostics {
                eprintln!("  {} {}", yellow("⚠"), d);
            }
            eprintln!("{} patched {}", green("✔"), bold(&tex.display().to_string()));
        }
        return Ok(());
    }

    // ── Run conversion ───────────────────────────────────────────────────
    let input = cli
        .input
        .as_ref()
        .context("A Markdown source document is required")?;
    let output = convert(input, &config).await.context("Conversion failed")?;

    if cli.json {
        let json = serde_json::to_string_pretty(&output).context("Failed to serialise output")?;
        println!("{json}");
        return Ok(());
    }

    if !cli.quiet {
        if !show_progress {
            for d in &output.diagnostics {
                eprintln!("  {} {}", yellow("⚠"), d);
            }
        }
        eprintln!(
            "   {}  →  {}",
            dim(&format!("{}ms", output.stats.total_duration_ms)),
            bold(&output.tex_path.display().to_string()),
        );
        if let Some(ref pdf) = output.pdf_path {
            eprintln!("   {}  →  {}", dim("pdf"), bold(&pdf.display().to_string()));
        }
    }

    Ok(())
}

/// Map CLI args to `ConversionConfig`.
fn build_config(cli: &Cli, progress: Option<ProgressCallback>) -> Result<ConversionConfig> {
    let reporting = if cli.verbose {
        ReportingLevel::Verbose
    } else if cli.quiet {
        ReportingLevel::Quiet
    } else {
        ReportingLevel::Normal
    };

    let mut builder = ConversionConfig::builder()
        .assets_dir(cli.assets_dir.clone())
        .figure_name(cli.figure_name.clone())
        .rasterizers(cli.rasterizers.clone())
        .converter_timeout_secs(cli.converter_timeout)
        .walk_depth(cli.walk_depth)
        .typeset(!cli.no_pdf)
        .reporting(reporting);

    if let Some(ref dir) = cli.output {
        builder = builder.output_dir(dir.clone());
    }
    if let Some(ref dir) = cli.style_dir {
        builder = builder.style_dir(dir.clone());
    }
    if let Some(ref font) = cli.cjk_font {
        builder = builder.cjk_font(font.clone());
    }
    if let Some(cb) = progress {
        builder = builder.progress_callback(cb);
    }

    builder.build().context("Invalid configuration")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_definition_is_consistent() {
        use clap::CommandFactory;
        Cli::command().debug_assert();
    }

    #[test]
    fn rasterizer_list_parses() {
        let cli = Cli::try_parse_from(["md2tex", "doc.md", "--rasterizers", "resvg,inkscape"]).unwrap();
        assert_eq!(
            cli.rasterizers,
            vec![RasterBackend::Resvg, RasterBackend::Inkscape]
        );
    }

    #[test]
    fn patch_only_needs_no_input() {
        let cli = Cli::try_parse_from(["md2tex", "--patch-only", "out/doc.tex"]).unwrap();
        assert!(cli.input.is_none());
        assert_eq!(cli.patch_only, Some(PathBuf::from("out/doc.tex")));
    }

    #[test]
    fn flags_map_onto_config() {
        let cli = Cli::try_parse_from([
            "md2tex", "doc.md", "--no-pdf", "--cjk-font", "Noto Serif CJK SC", "-v",
        ])
        .unwrap();
        let config = build_config(&cli, None).unwrap();
        assert!(!config.typeset);
        assert_eq!(config.cjk_font.as_deref(), Some("Noto Serif CJK SC"));
        assert_eq!(config.reporting, ReportingLevel::Verbose);
    }
}
