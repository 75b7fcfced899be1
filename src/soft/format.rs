//! Output encoders of the software engine.
//!
//! Format strings follow the usual map-server conventions:
//!
//! | format | output |
//! |---|---|
//! | `png`, `png32` | 32-bit RGBA PNG |
//! | `png24` | 24-bit RGB PNG, alpha dropped |
//! | `png8`, `png256` | palette PNG; `:c=N` caps the colors (2..=256), `:m=o` or `:m=h` picks the method |
//! | `jpeg`, `jpg`, `jpegNN`, `jpeg:quality=NN` | baseline JPEG, quality 1..=100 (default 85) |
//!
//! Palette output is lossless whenever the image has no more colors than
//! the palette allows.

use image::codecs::jpeg::JpegEncoder;
use image::codecs::png::PngEncoder;
use image::{ExtendedColorType, ImageEncoder};
use std::collections::HashMap;

const DEFAULT_JPEG_QUALITY: u8 = 85;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ImageFormat {
    Rgba,
    Rgb,
    Palette { colors: u16 },
    Jpeg { quality: u8 },
}

impl ImageFormat {
    pub fn parse(format: &str) -> Result<Self, String> {
        let mut parts = format.trim().split(':');
        let base = parts.next().unwrap_or_default().to_ascii_lowercase();
        let options: Vec<(&str, &str)> = parts
            .map(|opt| opt.split_once('=').unwrap_or((opt, "")))
            .collect();

        let mut parsed = match base.as_str() {
            "png" | "png32" => ImageFormat::Rgba,
            "png24" => ImageFormat::Rgb,
            "png8" | "png256" => ImageFormat::Palette { colors: 256 },
            "jpeg" | "jpg" => ImageFormat::Jpeg {
                quality: DEFAULT_JPEG_QUALITY,
            },
            other => {
                let digits = other
                    .strip_prefix("jpeg")
                    .or_else(|| other.strip_prefix("jpg"))
                    .ok_or_else(|| format!("unknown image format '{}'", format))?;
                ImageFormat::Jpeg {
                    quality: parse_quality(digits, format)?,
                }
            }
        };

        for (key, value) in options {
            match (&mut parsed, key) {
                (ImageFormat::Palette { colors }, "c") => {
                    *colors = value
                        .parse::<u16>()
                        .ok()
                        .filter(|c| (2..=256).contains(c))
                        .ok_or_else(|| format!("invalid color count '{}' in '{}'", value, format))?;
                }
                (ImageFormat::Palette { .. }, "m") => {
                    if value != "o" && value != "h" {
                        return Err(format!("unknown palette method '{}' in '{}'", value, format));
                    }
                }
                (ImageFormat::Jpeg { quality }, "quality") => {
                    *quality = parse_quality(value, format)?;
                }
                // compression level and transparency mode: accepted, defaults used
                (ImageFormat::Rgba | ImageFormat::Rgb | ImageFormat::Palette { .. }, "z" | "t") => {}
                _ => return Err(format!("unknown option '{}' for format '{}'", key, format)),
            }
        }
        Ok(parsed)
    }
}

fn parse_quality(digits: &str, format: &str) -> Result<u8, String> {
    digits
        .parse::<u8>()
        .ok()
        .filter(|q| (1..=100).contains(q))
        .ok_or_else(|| format!("invalid JPEG quality in '{}'", format))
}

/// Encode straight RGBA pixels
pub(crate) fn encode(rgba: &[u8], width: u32, height: u32, format: &str) -> Result<Vec<u8>, String> {
    let mut out = Vec::new();
    match ImageFormat::parse(format)? {
        ImageFormat::Rgba => PngEncoder::new(&mut out)
            .write_image(rgba, width, height, ExtendedColorType::Rgba8)
            .map_err(|e| format!("PNG encoding failed: {}", e))?,
        ImageFormat::Rgb => PngEncoder::new(&mut out)
            .write_image(&drop_alpha(rgba), width, height, ExtendedColorType::Rgb8)
            .map_err(|e| format!("PNG encoding failed: {}", e))?,
        ImageFormat::Palette { colors } => {
            let quantized = quantize(rgba, colors as usize);
            write_indexed(&mut out, &quantized, width, height)
                .map_err(|e| format!("PNG encoding failed: {}", e))?;
        }
        ImageFormat::Jpeg { quality } => JpegEncoder::new_with_quality(&mut out, quality)
            .encode(&drop_alpha(rgba), width, height, ExtendedColorType::Rgb8)
            .map_err(|e| format!("JPEG encoding failed: {}", e))?,
    }
    Ok(out)
}

fn drop_alpha(rgba: &[u8]) -> Vec<u8> {
    rgba.chunks_exact(4)
        .flat_map(|px| [px[0], px[1], px[2]])
        .collect()
}

/// A palette plus one index per pixel
#[derive(Debug)]
pub(crate) struct Quantized {
    pub palette: Vec<[u8; 4]>,
    pub indices: Vec<u8>,
}

/// Reduce an image to at most `max_colors` entries.
///
/// Exact when the image already fits. Otherwise low bits are dropped from
/// every channel until the buckets fit, and each bucket is represented by
/// the mean of its members. Palette order is order of first appearance.
pub(crate) fn quantize(rgba: &[u8], max_colors: usize) -> Quantized {
    let max_colors = max_colors.clamp(1, 256);
    for shift in 0..=8u32 {
        let mask = if shift == 8 { 0 } else { 0xffu8 << shift };
        let mut slots: HashMap<[u8; 4], usize> = HashMap::new();
        let mut sums: Vec<[u64; 5]> = Vec::new();
        let mut indices = Vec::with_capacity(rgba.len() / 4);
        let mut overflow = false;

        for px in rgba.chunks_exact(4) {
            let key = [px[0] & mask, px[1] & mask, px[2] & mask, px[3] & mask];
            let slot = match slots.get(&key) {
                Some(&slot) => slot,
                None => {
                    if sums.len() == max_colors {
                        overflow = true;
                        break;
                    }
                    slots.insert(key, sums.len());
                    sums.push([0; 5]);
                    sums.len() - 1
                }
            };
            let sum = &mut sums[slot];
            for (acc, &channel) in sum.iter_mut().zip(px) {
                *acc += channel as u64;
            }
            sum[4] += 1;
            indices.push(slot as u8);
        }

        if overflow {
            continue;
        }
        let palette = sums
            .iter()
            .map(|s| {
                let n = s[4].max(1);
                let mean = |v: u64| ((v + n / 2) / n) as u8;
                [mean(s[0]), mean(s[1]), mean(s[2]), mean(s[3])]
            })
            .collect();
        return Quantized { palette, indices };
    }
    // shift 8 collapses everything into one bucket, which always fits
    Quantized {
        palette: vec![[0, 0, 0, 0]],
        indices: vec![0; rgba.len() / 4],
    }
}

fn write_indexed(
    out: &mut Vec<u8>,
    quantized: &Quantized,
    width: u32,
    height: u32,
) -> Result<(), png::EncodingError> {
    let rgb: Vec<u8> = quantized
        .palette
        .iter()
        .flat_map(|c| [c[0], c[1], c[2]])
        .collect();
    let alpha: Vec<u8> = quantized.palette.iter().map(|c| c[3]).collect();

    let mut encoder = png::Encoder::new(out, width, height);
    encoder.set_color(png::ColorType::Indexed);
    encoder.set_depth(png::BitDepth::Eight);
    encoder.set_palette(rgb);
    if alpha.iter().any(|&a| a < 255) {
        encoder.set_trns(alpha);
    }
    let mut writer = encoder.write_header()?;
    writer.write_image_data(&quantized.indices)?;
    writer.finish()
}
