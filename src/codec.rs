//! Pixel buffers at the engine boundary.
//!
//! Callers always see straight (non-premultiplied) RGBA, row-major, 4 bytes
//! per pixel, no padding. Engines declare their own layout through
//! [`RenderEngine::ALPHA_MODE`]; this module converts in both directions.

use image::RgbaImage;

use crate::engine::{AlphaMode, EngineErrorKind, EngineImage, RenderEngine};
use crate::pipeline::OutputFormat;
use crate::{Error, Result};

/// Format used when the caller asks for none: lossless, palette based
pub const DEFAULT_FORMAT: &str = "png256";

/// Encode a caller-assembled straight RGBA buffer with the engine's encoders
pub fn encode<E: RenderEngine>(pixels: &[u8], width: u32, height: u32, format: &str) -> Result<Vec<u8>> {
    check_buffer(pixels, width, height)?;
    let format = match OutputFormat::parse(format) {
        OutputFormat::Raw => return Ok(pixels.to_vec()),
        OutputFormat::Encoded(f) => f,
    };
    E::encode_straight(pixels, width, height, &format).map_err(|e| match e.kind() {
        EngineErrorKind::Encode => Error::encode(e),
        _ => Error::InputError(e.to_string()),
    })
}

/// Encode an [`RgbaImage`] with the engine's encoders
pub fn encode_image<E: RenderEngine>(img: &RgbaImage, format: &str) -> Result<Vec<u8>> {
    encode::<E>(img.as_raw(), img.width(), img.height(), format)
}

/// Read an engine image back out as straight RGBA
pub fn raw_from_engine<E: RenderEngine>(image: &E::Image) -> Vec<u8> {
    let mut raw = E::image_to_raw(image);
    if E::ALPHA_MODE == AlphaMode::Premultiplied {
        unpremultiply_rgba_in_place(&mut raw);
    }
    raw
}

/// Read an engine image back out as an [`RgbaImage`]
pub fn rgba_image_from_engine<E: RenderEngine>(image: &E::Image) -> Result<RgbaImage> {
    let (width, height) = (image.width(), image.height());
    RgbaImage::from_raw(width, height, raw_from_engine::<E>(image)).ok_or_else(|| {
        Error::RenderError(format!(
            "engine returned a pixel buffer that does not match {}x{}",
            width, height
        ))
    })
}

fn check_buffer(pixels: &[u8], width: u32, height: u32) -> Result<()> {
    if pixels.is_empty() || width == 0 || height == 0 {
        return Err(Error::InputError("cannot encode an empty image".into()));
    }
    let expected = (width as usize)
        .checked_mul(height as usize)
        .and_then(|n| n.checked_mul(4))
        .ok_or_else(|| {
            Error::InputError(format!("image size {}x{} is too large", width, height))
        })?;
    if pixels.len() != expected {
        return Err(Error::InputError(format!(
            "buffer of {} bytes does not match {}x{} RGBA ({} bytes)",
            pixels.len(),
            width,
            height,
            expected
        )));
    }
    Ok(())
}

pub fn premultiply_rgba_in_place(bytes: &mut [u8]) {
    for pixel in bytes.chunks_exact_mut(4) {
        let alpha = pixel[3] as u16;
        pixel[0] = ((pixel[0] as u16 * alpha + 127) / 255) as u8;
        pixel[1] = ((pixel[1] as u16 * alpha + 127) / 255) as u8;
        pixel[2] = ((pixel[2] as u16 * alpha + 127) / 255) as u8;
    }
}

pub fn unpremultiply_rgba_in_place(bytes: &mut [u8]) {
    for pixel in bytes.chunks_exact_mut(4) {
        let alpha = pixel[3];
        if alpha == 0 {
            pixel[0] = 0;
            pixel[1] = 0;
            pixel[2] = 0;
            continue;
        }

        let alpha_u16 = alpha as u16;
        pixel[0] = ((pixel[0] as u16 * 255 + (alpha_u16 / 2)) / alpha_u16).min(255) as u8;
        pixel[1] = ((pixel[1] as u16 * 255 + (alpha_u16 / 2)) / alpha_u16).min(255) as u8;
        pixel[2] = ((pixel[2] as u16 * 255 + (alpha_u16 / 2)) / alpha_u16).min(255) as u8;
    }
}
