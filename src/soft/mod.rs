//! Pure-Rust software engine.
//!
//! Loads a small Mapnik-style XML subset, reads GeoJSON datasources and
//! rasterizes with tiny-skia into premultiplied RGBA.

mod datasource;
mod format;
mod projection;
mod raster;
mod style;

use log::{debug, warn};
use std::collections::HashMap;
use std::path::Path;
use std::time::Instant;
use tiny_skia::{IntSize, Pixmap};

use crate::engine::{
    AlphaMode, EngineError, EngineErrorKind, EngineImage, EngineResult, RenderEngine,
};
use crate::viewport::BBox;
use crate::Color;
use projection::{Projection, DEFAULT_SRS};
use style::{Layer, Style};

/// A rendered frame, premultiplied RGBA
#[derive(Debug, Clone)]
pub struct SoftImage {
    pixmap: Pixmap,
}

impl SoftImage {
    pub fn pixmap(&self) -> &Pixmap {
        &self.pixmap
    }
}

impl EngineImage for SoftImage {
    fn width(&self) -> u32 {
        self.pixmap.width()
    }

    fn height(&self) -> u32 {
        self.pixmap.height()
    }
}

/// The default [`RenderEngine`]
#[derive(Debug)]
pub struct SoftEngine {
    width: u32,
    height: u32,
    srs: String,
    background: Option<Color>,
    buffer_size: u32,
    max_extent: Option<BBox>,
    extent: Option<BBox>,
    styles: HashMap<String, Style>,
    layers: Vec<Layer>,
}

impl SoftEngine {
    fn projection(&self) -> Projection {
        Projection::parse(&self.srs)
    }

    /// Grow `bbox` around its center until it has the output aspect ratio
    fn fit_aspect(&self, bbox: BBox) -> BBox {
        if !bbox.is_valid() {
            return bbox;
        }
        let (cx, cy) = bbox.center();
        let output_ratio = self.width as f64 / self.height as f64;
        if bbox.width() / bbox.height() > output_ratio {
            let half = bbox.width() / output_ratio / 2.0;
            BBox::new(bbox.minx, cy - half, bbox.maxx, cy + half)
        } else {
            let half = bbox.height() * output_ratio / 2.0;
            BBox::new(cx - half, bbox.miny, cx + half, bbox.maxy)
        }
    }

    /// Data extent of every active layer, in map units
    fn active_data_extent(&self) -> Option<BBox> {
        let map_proj = self.projection();
        self.layers
            .iter()
            .filter(|l| l.active)
            .filter_map(|l| {
                let envelope = l.datasource.as_ref()?.envelope?;
                let layer_proj = l
                    .srs
                    .as_deref()
                    .map(Projection::parse)
                    .unwrap_or_else(|| map_proj.clone());
                let projected = layer_proj.transform_box(&map_proj, &envelope);
                if projected.is_none() {
                    warn!("layer '{}' cannot be projected into '{}'", l.name, self.srs);
                }
                projected
            })
            .reduce(|a, b| a.union(&b))
    }
}

/// A degenerate (point or line) extent gets some room around it
fn widen_degenerate(bbox: BBox) -> BBox {
    let dx = if bbox.width() > 0.0 { 0.0 } else { (bbox.height() / 2.0).max(1.0) };
    let dy = if bbox.height() > 0.0 { 0.0 } else { (bbox.width() / 2.0).max(1.0) };
    bbox.pad(dx, dy)
}

impl RenderEngine for SoftEngine {
    type Image = SoftImage;
    const ALPHA_MODE: AlphaMode = AlphaMode::Premultiplied;

    fn new(width: u32, height: u32) -> EngineResult<Self> {
        if width == 0 || height == 0 {
            return Err(EngineError::new(
                EngineErrorKind::Render,
                format!("invalid map size {}x{}", width, height),
            ));
        }
        Ok(Self {
            width,
            height,
            srs: DEFAULT_SRS.to_string(),
            background: None,
            buffer_size: 0,
            max_extent: None,
            extent: None,
            styles: HashMap::new(),
            layers: Vec::new(),
        })
    }

    fn load_description(&mut self, text: &str, base: Option<&Path>) -> EngineResult<()> {
        let started = Instant::now();
        let desc = style::parse_map(text, base)
            .map_err(|e| EngineError::new(EngineErrorKind::Load, e))?;

        if let Some(srs) = desc.srs {
            self.srs = srs;
        }
        if let Some(bg) = desc.background {
            self.background = Some(bg);
        }
        if let Some(buffer) = desc.buffer_size {
            self.buffer_size = buffer;
        }
        if let Some(max) = desc.max_extent {
            self.max_extent = Some(max);
        }
        self.styles = desc.styles;
        self.layers = desc.layers;
        debug!(
            "parsed stylesheet: {} styles, {} layers in {:?}",
            self.styles.len(),
            self.layers.len(),
            started.elapsed()
        );
        Ok(())
    }

    fn zoom_all(&mut self) -> EngineResult<()> {
        let data = match (self.active_data_extent(), self.max_extent) {
            (Some(data), Some(max)) => data.intersection(&max).unwrap_or(max),
            (Some(data), None) => data,
            (None, Some(max)) => max,
            (None, None) => {
                return Err(EngineError::new(
                    EngineErrorKind::Extent,
                    "could not zoom to combined layer extents: no active layer has data",
                ))
            }
        };
        self.extent = Some(self.fit_aspect(widen_degenerate(data)));
        Ok(())
    }

    fn zoom_to_box(&mut self, bbox: BBox) {
        let clipped = match self.max_extent {
            Some(max) if bbox.is_valid() => bbox.intersection(&max).unwrap_or(bbox),
            _ => bbox,
        };
        self.extent = Some(self.fit_aspect(clipped));
    }

    /// The stored extent is kept as is; rendering fits it to the new aspect
    fn resize(&mut self, width: u32, height: u32) {
        self.width = width;
        self.height = height;
    }

    fn srs(&self) -> String {
        self.srs.clone()
    }

    fn set_srs(&mut self, srs: &str) {
        self.srs = srs.to_string();
    }

    fn extent(&self) -> Option<BBox> {
        self.extent
    }

    fn scale_denominator(&self) -> f64 {
        match self.extent {
            Some(e) if e.is_valid() => projection::scale_denominator(
                self.fit_aspect(e).width(),
                self.width,
                self.projection().is_geographic(),
            ),
            _ => 0.0,
        }
    }

    fn background(&self) -> Option<Color> {
        self.background
    }

    fn set_background(&mut self, color: Color) {
        self.background = Some(color);
    }

    fn layer_count(&self) -> usize {
        self.layers.len()
    }

    fn layer_name(&self, index: usize) -> Option<&str> {
        self.layers.get(index).map(|l| l.name.as_str())
    }

    fn layer_is_active(&self, index: usize) -> bool {
        self.layers.get(index).map_or(false, |l| l.active)
    }

    fn set_layer_active(&mut self, index: usize, active: bool) {
        if let Some(layer) = self.layers.get_mut(index) {
            layer.active = active;
        }
    }

    fn set_max_extent(&mut self, bbox: BBox) {
        self.max_extent = Some(bbox);
    }

    fn reset_max_extent(&mut self) {
        self.max_extent = None;
    }

    fn set_buffer_size(&mut self, pixels: u32) {
        self.buffer_size = pixels;
    }

    fn render_to_image(&self, scale: f64, scale_factor: f64) -> EngineResult<SoftImage> {
        let extent = match self.extent {
            Some(e) if e.is_valid() => self.fit_aspect(e),
            Some(e) => {
                return Err(EngineError::new(
                    EngineErrorKind::Extent,
                    format!(
                        "map extent {},{},{},{} is not valid",
                        e.minx, e.miny, e.maxx, e.maxy
                    ),
                ))
            }
            None => {
                return Err(EngineError::new(
                    EngineErrorKind::Extent,
                    "map extent is not set; zoom before rendering",
                ))
            }
        };

        let projection = self.projection();
        let job = raster::RenderJob {
            extent,
            width: self.width,
            height: self.height,
            projection: &projection,
            background: self.background,
            buffer_size: self.buffer_size,
            scale_denominator: if scale > 0.0 {
                scale
            } else {
                self.scale_denominator()
            },
            scale_factor,
        };
        let pixmap = raster::render(&job, &self.layers, &self.styles)
            .map_err(|e| EngineError::new(EngineErrorKind::Render, e))?;
        Ok(SoftImage { pixmap })
    }

    fn image_to_raw(image: &SoftImage) -> Vec<u8> {
        image.pixmap.data().to_vec()
    }

    fn image_to_encoded(image: &SoftImage, format: &str) -> EngineResult<Vec<u8>> {
        let straight: Vec<u8> = image
            .pixmap
            .pixels()
            .iter()
            .flat_map(|p| {
                let c = p.demultiply();
                [c.red(), c.green(), c.blue(), c.alpha()]
            })
            .collect();
        format::encode(&straight, image.width(), image.height(), format)
            .map_err(|e| EngineError::new(EngineErrorKind::Encode, e))
    }

    fn encode_straight(
        pixels: &[u8],
        width: u32,
        height: u32,
        format: &str,
    ) -> EngineResult<Vec<u8>> {
        format::encode(pixels, width, height, format)
            .map_err(|e| EngineError::new(EngineErrorKind::Encode, e))
    }

    fn image_from_raw(raw: &[u8], width: u32, height: u32) -> EngineResult<SoftImage> {
        let size = IntSize::from_wh(width, height).ok_or_else(|| {
            EngineError::new(
                EngineErrorKind::Render,
                format!("invalid image size {}x{}", width, height),
            )
        })?;
        let pixmap = Pixmap::from_vec(raw.to_vec(), size).ok_or_else(|| {
            EngineError::new(
                EngineErrorKind::Render,
                format!("{} bytes do not form a {}x{} image", raw.len(), width, height),
            )
        })?;
        Ok(SoftImage { pixmap })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SHEET: &str = r##"<Map srs="+init=epsg:4326" background-color="#ffffff">
  <Style name="fill"><Rule><PolygonSymbolizer fill="#ff0000"/></Rule></Style>
  <Layer name="box">
    <StyleName>fill</StyleName>
    <Datasource>
      <Parameter name="type">geojson</Parameter>
      <Parameter name="inline">{"type":"Polygon","coordinates":[[[0,0],[40,0],[40,20],[0,20],[0,0]]]}</Parameter>
    </Datasource>
  </Layer>
  <Layer name="empty" status="off"/>
</Map>"##;

    fn engine() -> SoftEngine {
        let mut e = SoftEngine::new(200, 100).unwrap();
        e.load_description(SHEET, None).unwrap();
        e
    }

    #[test]
    fn load_exposes_layers_and_map_settings() {
        let e = engine();
        assert_eq!(e.layer_count(), 2);
        assert_eq!(e.layer_name(0), Some("box"));
        assert!(e.layer_is_active(0));
        assert!(!e.layer_is_active(1));
        assert!(!e.layer_is_active(9));
        assert_eq!(e.layer_name(9), None);
        assert_eq!(e.srs(), "+init=epsg:4326");
        assert_eq!(e.background(), Some(Color::WHITE));
    }

    #[test]
    fn failed_load_keeps_previous_map() {
        let mut e = engine();
        let err = e.load_description("<Map><Layer></Map>", None).unwrap_err();
        assert_eq!(err.kind(), EngineErrorKind::Load);
        assert_eq!(e.layer_count(), 2);
    }

    #[test]
    fn zoom_all_fits_data_to_aspect() {
        let mut e = engine();
        e.zoom_all().unwrap();
        assert_eq!(e.extent(), Some(BBox::new(0.0, 0.0, 40.0, 20.0)));

        e.resize(100, 100);
        assert_eq!(e.extent(), Some(BBox::new(0.0, 0.0, 40.0, 20.0)));
    }

    #[test]
    fn resize_fits_aspect_only_at_render_time() {
        let mut e = engine();
        e.zoom_to_box(BBox::new(-40.0, 0.0, 80.0, 60.0));
        let before = e.scale_denominator();
        e.resize(100, 100);
        assert_eq!(e.extent(), Some(BBox::new(-40.0, 0.0, 80.0, 60.0)));
        // the 120x60 box is drawn as 120x120 around its center
        assert!((e.scale_denominator() / before - 2.0).abs() < 1e-9);

        let img = e.render_to_image(0.0, 1.0).unwrap();
        assert_eq!((img.width(), img.height()), (100, 100));
        let raw = SoftEngine::image_to_raw(&img);
        let at = |x: usize, y: usize| &raw[(y * 100 + x) * 4..(y * 100 + x) * 4 + 4];
        // (10, 10) in map units sits at pixel (41, 66)
        assert_eq!(at(41, 66), &[255, 0, 0, 255]);
        assert_eq!(at(41, 20), &[255, 255, 255, 255]);
    }

    #[test]
    fn zoom_all_without_data_keeps_extent() {
        let mut e = engine();
        e.zoom_to_box(BBox::new(0.0, 0.0, 2.0, 1.0));
        e.set_layer_active(0, false);
        let err = e.zoom_all().unwrap_err();
        assert_eq!(err.kind(), EngineErrorKind::Extent);
        assert_eq!(e.extent(), Some(BBox::new(0.0, 0.0, 2.0, 1.0)));
    }

    #[test]
    fn zoom_respects_max_extent() {
        let mut e = engine();
        e.set_max_extent(BBox::new(0.0, 0.0, 20.0, 10.0));
        e.zoom_to_box(BBox::new(-100.0, -50.0, 100.0, 50.0));
        assert_eq!(e.extent(), Some(BBox::new(0.0, 0.0, 20.0, 10.0)));
        e.zoom_all().unwrap();
        assert_eq!(e.extent(), Some(BBox::new(0.0, 0.0, 20.0, 10.0)));
    }

    #[test]
    fn scale_denominator_tracks_extent() {
        let mut e = engine();
        assert_eq!(e.scale_denominator(), 0.0);
        e.set_srs("+init=epsg:3857");
        e.zoom_to_box(BBox::new(0.0, 0.0, 56.0, 28.0));
        // 0.28 m per pixel
        assert!((e.scale_denominator() - 1000.0).abs() < 1e-9);
    }

    #[test]
    fn render_needs_a_valid_extent() {
        let mut e = engine();
        let err = e.render_to_image(0.0, 1.0).unwrap_err();
        assert_eq!(err.kind(), EngineErrorKind::Extent);
        e.zoom_to_box(BBox::new(5.0, 5.0, -5.0, -5.0));
        let err = e.render_to_image(0.0, 1.0).unwrap_err();
        assert_eq!(err.kind(), EngineErrorKind::Extent);
    }

    #[test]
    fn render_draws_the_polygon() {
        let mut e = engine();
        e.zoom_to_box(BBox::new(-40.0, 0.0, 80.0, 60.0));
        let img = e.render_to_image(0.0, 1.0).unwrap();
        assert_eq!((img.width(), img.height()), (200, 100));
        let raw = SoftEngine::image_to_raw(&img);
        let at = |x: usize, y: usize| &raw[(y * 200 + x) * 4..(y * 200 + x) * 4 + 4];
        // (10, 10) in map units sits at pixel (83, 83)
        assert_eq!(at(83, 83), &[255, 0, 0, 255]);
        assert_eq!(at(10, 10), &[255, 255, 255, 255]);
    }

    #[test]
    fn raw_roundtrip_through_engine_image() {
        let raw = vec![10, 20, 30, 255, 0, 0, 0, 0];
        let img = SoftEngine::image_from_raw(&raw, 2, 1).unwrap();
        assert_eq!(SoftEngine::image_to_raw(&img), raw);
        assert!(SoftEngine::image_from_raw(&raw, 3, 1).is_err());
    }

    #[test]
    fn encode_errors_are_encode_kind() {
        let img = SoftEngine::image_from_raw(&[0; 4], 1, 1).unwrap();
        let err = SoftEngine::image_to_encoded(&img, "gif").unwrap_err();
        assert_eq!(err.kind(), EngineErrorKind::Encode);
    }
}
