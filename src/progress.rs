//! Progress-callback trait for per-stage conversion events.
//!
//! Inject an [`Arc<dyn ConversionProgressCallback>`] via
//! [`crate::config::ConversionConfigBuilder::progress_callback`] to receive
//! events as the pipeline moves through its stages.
//!
//! # Example
//!
//! ```rust
//! use md2tex::{ConversionConfig, ConversionProgressCallback, FigureRecord};
//! use std::sync::{Arc, atomic::{AtomicUsize, Ordering}};
//!
//! struct FigureCounter {
//!     seen: AtomicUsize,
//! }
//!
//! impl ConversionProgressCallback for FigureCounter {
//!     fn on_figure(&self, figure: &FigureRecord) {
//!         self.seen.fetch_add(1, Ordering::SeqCst);
//!         eprintln!("figure {} → {}", figure.index, figure.source_path);
//!     }
//! }
//!
//! let config = ConversionConfig::builder()
//!     .progress_callback(Arc::new(FigureCounter { seen: AtomicUsize::new(0) }))
//!     .build()
//!     .unwrap();
//! ```

use crate::output::{FigureRecord, ImageReference};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// The pipeline stages, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Stage {
    /// Pull inline SVG out of the Markdown and convert it.
    ExtractGraphics,
    /// Locate and copy referenced image files.
    ResolveReferences,
    /// Run the Markdown-to-LaTeX converter.
    Convert,
    /// Repair the converter's LaTeX.
    Patch,
    /// Run the typesetting engine.
    Typeset,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Stage::ExtractGraphics => "extracting graphics",
            Stage::ResolveReferences => "resolving image references",
            Stage::Convert => "converting to LaTeX",
            Stage::Patch => "patching LaTeX",
            Stage::Typeset => "typesetting",
        })
    }
}

/// Called by the conversion pipeline as it runs.
///
/// All methods have default no-op implementations so callers only override
/// what they care about. Stages run one after another, so events never
/// arrive concurrently, but the trait is `Send + Sync` so callbacks can be
/// shared with other tasks.
pub trait ConversionProgressCallback: Send + Sync {
    /// Called once before the first stage.
    fn on_conversion_start(&self, source: &str) {
        let _ = source;
    }

    /// Called when a stage begins.
    fn on_stage_start(&self, stage: Stage) {
        let _ = stage;
    }

    /// Called after each SVG figure has been extracted and converted.
    fn on_figure(&self, figure: &FigureRecord) {
        let _ = figure;
    }

    /// Called after each image reference has been processed, resolved or not.
    fn on_reference(&self, reference: &ImageReference) {
        let _ = reference;
    }

    /// Called when a stage finishes.
    fn on_stage_complete(&self, stage: Stage, elapsed_ms: u64) {
        let _ = (stage, elapsed_ms);
    }

    /// Called once after the last stage.
    ///
    /// * `figures`: SVG figures extracted
    /// * `diagnostics`: non-fatal problems recorded
    fn on_conversion_complete(&self, figures: usize, diagnostics: usize) {
        let _ = (figures, diagnostics);
    }
}

/// A no-op implementation for callers that don't need progress events.
pub struct NoopProgressCallback;

impl ConversionProgressCallback for NoopProgressCallback {}

/// Convenience alias matching the type stored in [`crate::config::ConversionConfig`].
pub type ProgressCallback = Arc<dyn ConversionProgressCallback>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[derive(Default)]
    struct StageRecorder {
        stages: Mutex<Vec<(Stage, bool)>>,
    }

    impl ConversionProgressCallback for StageRecorder {
        fn on_stage_start(&self, stage: Stage) {
            self.stages.lock().unwrap().push((stage, false));
        }

        fn on_stage_complete(&self, stage: Stage, _elapsed_ms: u64) {
            self.stages.lock().unwrap().push((stage, true));
        }
    }

    #[test]
    fn noop_callback_does_not_panic() {
        let cb = NoopProgressCallback;
        cb.on_conversion_start("doc.md");
        cb.on_stage_start(Stage::Convert);
        cb.on_stage_complete(Stage::Convert, 12);
        cb.on_conversion_complete(2, 0);
    }

    #[test]
    fn recorder_sees_stage_pairs() {
        let rec = StageRecorder::default();
        rec.on_stage_start(Stage::Patch);
        rec.on_stage_complete(Stage::Patch, 3);
        let stages = rec.stages.lock().unwrap();
        assert_eq!(*stages, vec![(Stage::Patch, false), (Stage::Patch, true)]);
    }

    #[test]
    fn stage_display_is_human_readable() {
        assert_eq!(Stage::Typeset.to_string(), "typesetting");
    }
}
