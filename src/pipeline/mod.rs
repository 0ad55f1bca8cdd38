//! Pipeline stages for Markdown-to-LaTeX conversion.
//!
//! Each submodule implements exactly one transformation step. Stages hand
//! the document text to each other explicitly; none keeps a reference into
//! it across a stage boundary.
//!
//! ## Data Flow
//!
//! ```text
//! input ──▶ extract ──▶ resolve ──▶ pandoc ──▶ patch ──▶ typeset
//! (.md)     (SVG)       (images)    (.tex)     (repair)  (.pdf)
//! ```
//!
//! 1. [`input`]: validate the source and derive the output layout
//! 2. [`extract`]: replace inline SVG with placeholder image references,
//!    converting each through [`rasterize`] and captioning it via [`caption`]
//! 3. [`resolve`]: find referenced images with [`locate`] and copy them
//!    into the assets directory
//! 4. [`pandoc`]: external Markdown → LaTeX conversion
//! 5. [`patch`]: idempotent repair passes over the generated LaTeX
//! 6. [`typeset`]: external LaTeX → PDF rendering
//!
//! [`exec`] runs external tools with a timeout, [`encode`] turns rendered
//! pixmaps into PNG and [`support`] copies style and bibliography files.

pub mod caption;
pub mod encode;
pub mod exec;
pub mod extract;
pub mod input;
pub mod locate;
pub mod pandoc;
pub mod patch;
pub mod rasterize;
pub mod resolve;
pub mod support;
pub mod typeset;
