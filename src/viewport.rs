//! Viewport control: extent, output size, maximum extent and buffer.

use log::debug;
use serde::{Deserialize, Serialize};
use std::str::FromStr;

use crate::engine::RenderEngine;
use crate::map::MapHandle;
use crate::{Error, Result};

/// An axis-aligned box in map units.
///
/// No ordering is enforced: an inverted box is kept as given and rejected by
/// the engine when it is used.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BBox {
    pub minx: f64,
    pub miny: f64,
    pub maxx: f64,
    pub maxy: f64,
}

impl BBox {
    pub const fn new(minx: f64, miny: f64, maxx: f64, maxy: f64) -> Self {
        Self {
            minx,
            miny,
            maxx,
            maxy,
        }
    }

    pub fn width(&self) -> f64 {
        self.maxx - self.minx
    }

    pub fn height(&self) -> f64 {
        self.maxy - self.miny
    }

    /// Finite, correctly ordered and with a non-zero area
    pub fn is_valid(&self) -> bool {
        [self.minx, self.miny, self.maxx, self.maxy]
            .iter()
            .all(|v| v.is_finite())
            && self.width() > 0.0
            && self.height() > 0.0
    }

    pub fn center(&self) -> (f64, f64) {
        (
            (self.minx + self.maxx) / 2.0,
            (self.miny + self.maxy) / 2.0,
        )
    }

    pub fn contains(&self, x: f64, y: f64) -> bool {
        x >= self.minx && x <= self.maxx && y >= self.miny && y <= self.maxy
    }

    pub fn intersects(&self, other: &BBox) -> bool {
        self.minx <= other.maxx
            && other.minx <= self.maxx
            && self.miny <= other.maxy
            && other.miny <= self.maxy
    }

    /// The overlapping part of two boxes, if any
    pub fn intersection(&self, other: &BBox) -> Option<BBox> {
        if !self.intersects(other) {
            return None;
        }
        Some(BBox::new(
            self.minx.max(other.minx),
            self.miny.max(other.miny),
            self.maxx.min(other.maxx),
            self.maxy.min(other.maxy),
        ))
    }

    /// The smallest box covering both
    pub fn union(&self, other: &BBox) -> BBox {
        BBox::new(
            self.minx.min(other.minx),
            self.miny.min(other.miny),
            self.maxx.max(other.maxx),
            self.maxy.max(other.maxy),
        )
    }

    /// Grow by `dx`/`dy` on each side
    pub fn pad(&self, dx: f64, dy: f64) -> BBox {
        BBox::new(self.minx - dx, self.miny - dy, self.maxx + dx, self.maxy + dy)
    }
}

impl FromStr for BBox {
    type Err = Error;

    /// `minx,miny,maxx,maxy`
    fn from_str(s: &str) -> Result<Self> {
        let values: Vec<f64> = s
            .split(',')
            .map(|p| p.trim().parse::<f64>())
            .collect::<std::result::Result<_, _>>()
            .map_err(|e| Error::InputError(format!("invalid bbox '{}': {}", s, e)))?;
        match values.as_slice() {
            [minx, miny, maxx, maxy] => Ok(BBox::new(*minx, *miny, *maxx, *maxy)),
            _ => Err(Error::InputError(format!(
                "invalid bbox '{}': expected minx,miny,maxx,maxy",
                s
            ))),
        }
    }
}

impl<E: RenderEngine> MapHandle<E> {
    /// Zoom to the combined extent of all active layers.
    ///
    /// Fails with [`Error::ViewportError`] when no layer provides data; the
    /// extent is left unchanged in that case.
    pub fn zoom_all(&mut self) -> Result<()> {
        self.engine_mut()?.zoom_all().map_err(Error::viewport)?;
        debug!("zoomed to all: {:?}", self.engine()?.extent());
        Ok(())
    }

    /// Zoom to the given box, in the map's spatial reference. The box is not
    /// validated here; an unusable box fails the next render.
    pub fn zoom_to_box(&mut self, bbox: BBox) -> Result<()> {
        self.engine_mut()?.zoom_to_box(bbox);
        Ok(())
    }

    /// Shorthand for [`MapHandle::zoom_to_box`]
    pub fn zoom_to(&mut self, minx: f64, miny: f64, maxx: f64, maxy: f64) -> Result<()> {
        self.zoom_to_box(BBox::new(minx, miny, maxx, maxy))
    }

    /// Change the output size in pixels. Both dimensions must be positive.
    /// The stored extent is left as is; renders fit it to the new aspect.
    pub fn resize(&mut self, width: u32, height: u32) -> Result<()> {
        if width == 0 || height == 0 {
            return Err(Error::InputError(format!(
                "map size must be positive, got {}x{}",
                width, height
            )));
        }
        self.engine_mut()?.resize(width, height);
        self.width = width;
        self.height = height;
        Ok(())
    }

    pub fn width(&self) -> Result<u32> {
        self.engine()?;
        Ok(self.width)
    }

    pub fn height(&self) -> Result<u32> {
        self.engine()?;
        Ok(self.height)
    }

    /// The visible extent, once one has been set
    pub fn extent(&self) -> Result<Option<BBox>> {
        Ok(self.engine()?.extent())
    }

    /// Current scale denominator. Call after [`MapHandle::resize`] and a zoom.
    pub fn scale_denominator(&self) -> Result<f64> {
        Ok(self.engine()?.scale_denominator())
    }

    /// Limit how far later zoom operations may range
    pub fn set_max_extent(&mut self, bbox: BBox) -> Result<()> {
        self.engine_mut()?.set_max_extent(bbox);
        Ok(())
    }

    pub fn reset_max_extent(&mut self) -> Result<()> {
        self.engine_mut()?.reset_max_extent();
        Ok(())
    }

    /// Pixel margin around the image within which labels and symbols are
    /// still placed before clipping. Does not change the output size.
    pub fn set_buffer_size(&mut self, pixels: u32) -> Result<()> {
        self.engine_mut()?.set_buffer_size(pixels);
        Ok(())
    }
}
