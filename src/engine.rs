//! The rendering engine boundary.
//!
//! A [`RenderEngine`] is the opaque collaborator the facade drives: it parses
//! map descriptions, tracks the viewport and layer flags, rasterizes, and owns
//! the image encoders. The facade in this crate never draws anything itself.
//!
//! Engines report failures as [`EngineError`]s. The facade wraps them into
//! [`crate::Error`] variants, keeping the diagnostic text verbatim behind the
//! [`ENGINE_NAMESPACE`] prefix.

use std::fmt;
use std::path::Path;

use crate::viewport::BBox;
use crate::Color;

/// Prefix carried by every engine-originated diagnostic
pub const ENGINE_NAMESPACE: &str = "engine: ";

/// Result type alias for engine calls
pub type EngineResult<T> = std::result::Result<T, EngineError>;

/// Which engine operation failed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineErrorKind {
    /// Parsing or resolving a map description
    Load,
    /// The current or requested extent cannot be used
    Extent,
    /// Rasterization
    Render,
    /// Encoding to an output format
    Encode,
}

/// A failure reported by the engine, with its diagnostic text
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineError {
    kind: EngineErrorKind,
    message: String,
}

impl EngineError {
    pub fn new(kind: EngineErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn kind(&self) -> EngineErrorKind {
        self.kind
    }

    /// The diagnostic text exactly as the engine produced it
    pub fn message(&self) -> &str {
        &self.message
    }

    pub(crate) fn is_extent(&self) -> bool {
        self.kind == EngineErrorKind::Extent
    }
}

impl fmt::Display for EngineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", ENGINE_NAMESPACE, self.message)
    }
}

impl std::error::Error for EngineError {}

/// How an engine stores color next to alpha in its pixel buffers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AlphaMode {
    /// RGBA with color channels independent of alpha
    Straight,
    /// RGBA with color channels already multiplied by alpha
    Premultiplied,
}

/// A rasterized image owned by an engine
pub trait EngineImage {
    fn width(&self) -> u32;
    fn height(&self) -> u32;
}

/// Core trait for rendering engine implementations
///
/// Index-based layer accessors must tolerate out-of-range indices:
/// `layer_name` returns `None`, `layer_is_active` returns `false` and
/// `set_layer_active` does nothing.
pub trait RenderEngine {
    /// Engine-native image type produced by [`RenderEngine::render_to_image`]
    type Image: EngineImage;

    /// Pixel layout used by [`RenderEngine::image_to_raw`] and
    /// [`RenderEngine::image_from_raw`]
    const ALPHA_MODE: AlphaMode;

    /// Create an engine with an empty map of the given output size
    fn new(width: u32, height: u32) -> EngineResult<Self>
    where
        Self: Sized;

    /// Replace the current map with the given description. `base` is the
    /// directory relative references inside the description resolve against.
    /// On failure the previous map must stay untouched.
    fn load_description(&mut self, text: &str, base: Option<&Path>) -> EngineResult<()>;

    /// Zoom to the combined extent of all active layers
    fn zoom_all(&mut self) -> EngineResult<()>;

    /// Set the visible extent; validity is checked at render time
    fn zoom_to_box(&mut self, bbox: BBox);

    fn resize(&mut self, width: u32, height: u32);

    fn srs(&self) -> String;

    fn set_srs(&mut self, srs: &str);

    /// The current visible extent, if one has been set
    fn extent(&self) -> Option<BBox>;

    /// Scale denominator of the current extent (0.0 when no extent is set)
    fn scale_denominator(&self) -> f64;

    fn background(&self) -> Option<Color>;

    fn set_background(&mut self, color: Color);

    fn layer_count(&self) -> usize;

    fn layer_name(&self, index: usize) -> Option<&str>;

    fn layer_is_active(&self, index: usize) -> bool;

    fn set_layer_active(&mut self, index: usize, active: bool);

    fn set_max_extent(&mut self, bbox: BBox);

    fn reset_max_extent(&mut self);

    fn set_buffer_size(&mut self, pixels: u32);

    /// Rasterize the map. `scale` > 0 pins the scale denominator used for
    /// visibility decisions; `scale_factor` multiplies symbol sizes.
    fn render_to_image(&self, scale: f64, scale_factor: f64) -> EngineResult<Self::Image>;

    /// Copy the image's pixels out in [`RenderEngine::ALPHA_MODE`] layout
    fn image_to_raw(image: &Self::Image) -> Vec<u8>;

    /// Encode the image into the named format
    fn image_to_encoded(image: &Self::Image, format: &str) -> EngineResult<Vec<u8>>;

    /// Build an image from pixels in [`RenderEngine::ALPHA_MODE`] layout.
    /// Callers guarantee `raw.len() == width * height * 4`.
    fn image_from_raw(raw: &[u8], width: u32, height: u32) -> EngineResult<Self::Image>;

    /// Encode a straight RGBA buffer into the named format.
    ///
    /// The default goes through [`RenderEngine::image_from_raw`]. For a
    /// premultiplied engine that loses color precision at partial alpha, so
    /// such engines should encode the straight pixels directly.
    fn encode_straight(
        pixels: &[u8],
        width: u32,
        height: u32,
        format: &str,
    ) -> EngineResult<Vec<u8>>
    where
        Self: Sized,
    {
        let image = match Self::ALPHA_MODE {
            AlphaMode::Straight => Self::image_from_raw(pixels, width, height)?,
            AlphaMode::Premultiplied => {
                let mut buf = pixels.to_vec();
                crate::codec::premultiply_rgba_in_place(&mut buf);
                Self::image_from_raw(&buf, width, height)?
            }
        };
        Self::image_to_encoded(&image, format)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn engine_error_display_is_namespaced() {
        let err = EngineError::new(EngineErrorKind::Encode, "unknown format 'bmp'");
        assert_eq!(err.to_string(), "engine: unknown format 'bmp'");
        assert_eq!(err.message(), "unknown format 'bmp'");
        assert_eq!(err.kind(), EngineErrorKind::Encode);
    }
}
