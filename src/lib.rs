//! RFox Map
//!
//! A map rendering facade for Rust: load a declarative map description,
//! override which layers take part in rendering, position the viewport, and
//! produce raw pixels, encoded image bytes or files.
//!
//! # Features
//!
//! - **Engine-agnostic core**: everything drives a [`RenderEngine`]; the facade
//!   never draws by itself
//! - **Software engine** (`soft`, default): a pure-Rust engine for a small
//!   Mapnik-style XML subset with GeoJSON datasources
//! - **Async worker** (`async`): a handle pinned to its own thread behind an
//!   async interface
//!
//! # Example
//!
//! ```no_run
//! use rfmap::{LayerStatus, MapConfig, RenderOpts};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let mut map = rfmap::new_map(MapConfig::default())?;
//! map.load("styles/world.xml")?;
//! map.zoom_all()?;
//! map.select_layers(|name: &str| {
//!     if name == "labels" { LayerStatus::Exclude } else { LayerStatus::Default }
//! })?;
//! let png = map.render(&RenderOpts::default())?;
//! map.reset_layers()?;
//! std::fs::write("world.png", png)?;
//! # Ok(())
//! # }
//! ```

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

pub mod error;
pub use error::{Error, Result};

pub mod codec;
pub mod engine;
pub mod layers;
pub mod map;
pub mod pipeline;
pub mod registry;
pub mod viewport;

// Software engine: tiny-skia rasterizer + quick-xml stylesheet loader
#[cfg(feature = "soft")]
pub mod soft;

// Async-friendly handle (one map per worker thread)
#[cfg(feature = "async")]
pub mod async_api;

#[cfg(test)]
pub(crate) mod mock;

pub use engine::{AlphaMode, EngineError, EngineErrorKind, EngineImage, RenderEngine};
pub use layers::{LayerPolicy, LayerSelector, LayerStatus};
pub use map::{MapConfig, MapHandle};
pub use pipeline::{OutputFormat, RenderOpts, RenderedImage};
pub use viewport::BBox;

#[cfg(feature = "async")]
pub use async_api::MapWorker;

#[cfg(feature = "soft")]
pub use soft::SoftEngine;

/// A straight (non-premultiplied) RGBA color
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Color {
    pub r: u8,
    pub g: u8,
    pub b: u8,
    pub a: u8,
}

impl Color {
    pub const fn rgba(r: u8, g: u8, b: u8, a: u8) -> Self {
        Self { r, g, b, a }
    }

    pub const fn rgb(r: u8, g: u8, b: u8) -> Self {
        Self::rgba(r, g, b, 255)
    }

    pub const TRANSPARENT: Color = Color::rgba(0, 0, 0, 0);
    pub const WHITE: Color = Color::rgb(255, 255, 255);
    pub const BLACK: Color = Color::rgb(0, 0, 0);
}

impl fmt::Display for Color {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{:02x}{:02x}{:02x}{:02x}", self.r, self.g, self.b, self.a)
    }
}

impl FromStr for Color {
    type Err = Error;

    /// Accepts `#rgb`, `#rgba`, `#rrggbb`, `#rrggbbaa`, `rgb(r,g,b)`,
    /// `rgba(r,g,b,a)` (alpha in 0..=1) and a handful of color names.
    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim();
        let bad = || Error::InputError(format!("invalid color '{}'", s));

        if let Some(hex) = s.strip_prefix('#') {
            let digits: Vec<u8> = hex
                .chars()
                .map(|c| c.to_digit(16).map(|d| d as u8))
                .collect::<Option<_>>()
                .ok_or_else(bad)?;
            return match digits.len() {
                3 | 4 => {
                    let mut c = digits.iter().map(|d| d * 17);
                    let (r, g, b) = (c.next(), c.next(), c.next());
                    let a = c.next().unwrap_or(255);
                    match (r, g, b) {
                        (Some(r), Some(g), Some(b)) => Ok(Color::rgba(r, g, b, a)),
                        _ => Err(bad()),
                    }
                }
                6 | 8 => {
                    let mut c = digits.chunks(2).map(|p| p[0] * 16 + p[1]);
                    let (r, g, b) = (c.next(), c.next(), c.next());
                    let a = c.next().unwrap_or(255);
                    match (r, g, b) {
                        (Some(r), Some(g), Some(b)) => Ok(Color::rgba(r, g, b, a)),
                        _ => Err(bad()),
                    }
                }
                _ => Err(bad()),
            };
        }

        let lower = s.to_ascii_lowercase();
        if let Some(args) = lower
            .strip_prefix("rgba(")
            .or_else(|| lower.strip_prefix("rgb("))
            .and_then(|rest| rest.strip_suffix(')'))
        {
            let parts: Vec<&str> = args.split(',').map(str::trim).collect();
            let channel = |p: &str| p.parse::<u8>().map_err(|_| bad());
            return match parts.as_slice() {
                [r, g, b] => Ok(Color::rgb(channel(r)?, channel(g)?, channel(b)?)),
                [r, g, b, a] => {
                    let alpha: f32 = a.parse().map_err(|_| bad())?;
                    if !(0.0..=1.0).contains(&alpha) {
                        return Err(bad());
                    }
                    Ok(Color::rgba(
                        channel(r)?,
                        channel(g)?,
                        channel(b)?,
                        (alpha * 255.0).round() as u8,
                    ))
                }
                _ => Err(bad()),
            };
        }

        match lower.as_str() {
            "transparent" => Ok(Color::TRANSPARENT),
            "white" => Ok(Color::WHITE),
            "black" => Ok(Color::BLACK),
            "red" => Ok(Color::rgb(255, 0, 0)),
            "green" => Ok(Color::rgb(0, 128, 0)),
            "blue" => Ok(Color::rgb(0, 0, 255)),
            "gray" | "grey" => Ok(Color::rgb(128, 128, 128)),
            "steelblue" => Ok(Color::rgb(70, 130, 180)),
            _ => Err(bad()),
        }
    }
}

/// Crate version information
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Version {
    pub major: u32,
    pub minor: u32,
    pub patch: u32,
    pub string: &'static str,
}

/// Version of this crate
pub fn version() -> Version {
    let part = |s: &str| s.parse().unwrap_or(0);
    Version {
        major: part(env!("CARGO_PKG_VERSION_MAJOR")),
        minor: part(env!("CARGO_PKG_VERSION_MINOR")),
        patch: part(env!("CARGO_PKG_VERSION_PATCH")),
        string: env!("CARGO_PKG_VERSION"),
    }
}

/// Create a map handle backed by the default engine
#[cfg(feature = "soft")]
pub fn new_map(config: MapConfig) -> Result<MapHandle<SoftEngine>> {
    MapHandle::new(config)
}

/// Encode an image with the default engine's encoders
#[cfg(feature = "soft")]
pub fn encode(img: &image::RgbaImage, format: &str) -> Result<Vec<u8>> {
    codec::encode_image::<SoftEngine>(img, format)
}
