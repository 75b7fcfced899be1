//! Render options and the render-to-output pipeline.
//!
//! Each call is independent: rasterize with the engine against the current
//! viewport and layer flags, then hand back raw pixels, encoded bytes or a
//! file. Nothing is cached between calls.

use image::RgbaImage;
use log::{debug, info};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Instant;

use crate::codec::{self, DEFAULT_FORMAT};
use crate::engine::{EngineImage, RenderEngine};
use crate::map::MapHandle;
use crate::{Error, Result};

/// Rendering options
///
/// # Examples
///
/// ```
/// let opts = rfmap::RenderOpts { format: "jpeg80".into(), ..Default::default() };
/// assert_eq!(opts.scale, 0.0);
/// ```
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RenderOpts {
    /// Render at a fixed scale denominator; 0 fits the current extent
    pub scale: f64,
    /// Multiplier for line widths, symbol and font sizes (printing, HiDPI).
    /// 0 means unset and renders at 1.0.
    pub scale_factor: f64,
    /// Output format (`png256`, `png`, `jpeg80`, ...) or `raw` for unencoded
    /// RGBA. Empty selects `png256`.
    pub format: String,
}

impl RenderOpts {
    pub fn with_format(format: impl Into<String>) -> Self {
        Self {
            format: format.into(),
            ..Default::default()
        }
    }

    /// Validated `(scale, scale_factor)` as passed to the engine
    fn engine_params(&self) -> Result<(f64, f64)> {
        if !self.scale.is_finite() || self.scale < 0.0 {
            return Err(Error::InputError(format!(
                "scale must be >= 0, got {}",
                self.scale
            )));
        }
        let scale_factor = if self.scale_factor == 0.0 {
            1.0
        } else {
            self.scale_factor
        };
        if !scale_factor.is_finite() || scale_factor < 0.0 {
            return Err(Error::InputError(format!(
                "scale factor must be > 0, got {}",
                self.scale_factor
            )));
        }
        Ok((self.scale, scale_factor))
    }
}

/// What the caller asked the pipeline to produce
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutputFormat {
    /// Unencoded straight RGBA
    Raw,
    /// An engine encoding identifier, with any modifiers (`png256:c=64`)
    Encoded(String),
}

impl OutputFormat {
    pub fn parse(format: &str) -> Self {
        match format.trim() {
            "raw" => OutputFormat::Raw,
            "" => OutputFormat::Encoded(DEFAULT_FORMAT.to_string()),
            other => OutputFormat::Encoded(other.to_string()),
        }
    }

    pub fn is_raw(&self) -> bool {
        matches!(self, OutputFormat::Raw)
    }
}

/// A rendered map: either raw pixels or encoded bytes, never both
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RenderedImage {
    Raw {
        width: u32,
        height: u32,
        /// Straight RGBA, `width * height * 4` bytes, row-major
        pixels: Vec<u8>,
    },
    Encoded {
        format: String,
        bytes: Vec<u8>,
    },
}

impl RenderedImage {
    pub fn as_bytes(&self) -> &[u8] {
        match self {
            RenderedImage::Raw { pixels, .. } => pixels,
            RenderedImage::Encoded { bytes, .. } => bytes,
        }
    }

    pub fn into_bytes(self) -> Vec<u8> {
        match self {
            RenderedImage::Raw { pixels, .. } => pixels,
            RenderedImage::Encoded { bytes, .. } => bytes,
        }
    }
}

impl<E: RenderEngine> MapHandle<E> {
    fn rasterize(&self, opts: &RenderOpts) -> Result<E::Image> {
        let (scale, scale_factor) = opts.engine_params()?;
        let engine = self.engine()?;
        let started = Instant::now();
        let image = engine
            .render_to_image(scale, scale_factor)
            .map_err(Error::render)?;
        debug!(
            "rasterized {}x{} (scale {}, factor {}) in {:?}",
            image.width(),
            image.height(),
            scale,
            scale_factor,
            started.elapsed()
        );
        Ok(image)
    }

    /// Render the map into raw pixels or encoded bytes, depending on
    /// `opts.format`
    pub fn render_output(&self, opts: &RenderOpts) -> Result<RenderedImage> {
        let format = OutputFormat::parse(&opts.format);
        let image = self.rasterize(opts)?;
        match format {
            OutputFormat::Raw => Ok(RenderedImage::Raw {
                width: image.width(),
                height: image.height(),
                pixels: codec::raw_from_engine::<E>(&image),
            }),
            OutputFormat::Encoded(format) => {
                let bytes = E::image_to_encoded(&image, &format).map_err(Error::encode)?;
                Ok(RenderedImage::Encoded { format, bytes })
            }
        }
    }

    /// Render the map and return the encoded image (or the raw RGBA buffer
    /// when `opts.format` is `raw`)
    pub fn render(&self, opts: &RenderOpts) -> Result<Vec<u8>> {
        self.render_output(opts).map(RenderedImage::into_bytes)
    }

    /// Render the map as an unencoded image. `opts.format` is ignored.
    pub fn render_image(&self, opts: &RenderOpts) -> Result<RgbaImage> {
        let image = self.rasterize(opts)?;
        codec::rgba_image_from_engine::<E>(&image)
    }

    /// Render the map and write the encoded image to `path`.
    ///
    /// `raw` is not a file format: it is rejected before anything is
    /// rendered or written.
    pub fn render_to_file(&self, opts: &RenderOpts, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let format = match OutputFormat::parse(&opts.format) {
            OutputFormat::Raw => {
                return Err(Error::InputError(
                    "the raw format cannot be written to a file".into(),
                ))
            }
            OutputFormat::Encoded(format) => format,
        };

        let image = self.rasterize(opts)?;
        let bytes = E::image_to_encoded(&image, &format).map_err(Error::encode)?;
        std::fs::write(path, &bytes).map_err(|source| Error::FileSystemError {
            path: path.to_path_buf(),
            source,
        })?;
        info!("wrote {} ({} bytes, {})", path.display(), bytes.len(), format);
        Ok(())
    }

    /// Encode an externally assembled straight RGBA buffer with this map's
    /// engine
    pub fn encode(pixels: &[u8], width: u32, height: u32, format: &str) -> Result<Vec<u8>> {
        codec::encode::<E>(pixels, width, height, format)
    }
}
