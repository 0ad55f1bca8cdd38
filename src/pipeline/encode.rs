//! Image encoding: resvg `Pixmap` → PNG bytes.
//!
//! tiny-skia stores premultiplied RGBA; PNG wants straight alpha, so every
//! pixel is demultiplied before it is handed to the `image` encoder.

use image::error::{ParameterError, ParameterErrorKind};
use image::{DynamicImage, ImageError, RgbaImage};
use resvg::tiny_skia::Pixmap;
use std::io::Cursor;
use tracing::debug;

/// Encode a rendered pixmap as a PNG file body.
pub fn encode_png(pixmap: &Pixmap) -> Result<Vec<u8>, ImageError> {
    let mut rgba = Vec::with_capacity(pixmap.data().len());
    for px in pixmap.pixels() {
        let c = px.demultiply();
        rgba.extend_from_slice(&[c.red(), c.green(), c.blue(), c.alpha()]);
    }

    let img = RgbaImage::from_raw(pixmap.width(), pixmap.height(), rgba).ok_or_else(|| {
        ImageError::Parameter(ParameterError::from_kind(
            ParameterErrorKind::DimensionMismatch,
        ))
    })?;

    let mut buf = Vec::new();
    DynamicImage::ImageRgba8(img).write_to(&mut Cursor::new(&mut buf), image::ImageFormat::Png)?;
    debug!(
        "Encoded {}x{} pixmap → {} bytes PNG",
        pixmap.width(),
        pixmap.height(),
        buf.len()
    );
    Ok(buf)
}
