//! In-memory engine used by the facade's unit tests.
//!
//! Descriptions look like `layers: a, b, !c` (`!` marks an inactive layer).
//! Rendering fills the frame with the background color and counts calls.

use std::cell::Cell;
use std::path::Path;

use crate::engine::{
    AlphaMode, EngineError, EngineErrorKind, EngineImage, EngineResult, RenderEngine,
};
use crate::viewport::BBox;
use crate::Color;

#[derive(Debug)]
pub(crate) struct MockImage {
    width: u32,
    height: u32,
    data: Vec<u8>,
}

impl EngineImage for MockImage {
    fn width(&self) -> u32 {
        self.width
    }

    fn height(&self) -> u32 {
        self.height
    }
}

#[derive(Debug, Default)]
pub(crate) struct MockEngine {
    pub width: u32,
    pub height: u32,
    pub srs: String,
    pub background: Option<Color>,
    pub buffer_size: u32,
    pub max_extent: Option<BBox>,
    pub extent: Option<BBox>,
    pub layers: Vec<(String, bool)>,
    pub fail_render: bool,
    pub engine_calls: Cell<usize>,
    pub last_render: Cell<Option<(f64, f64)>>,
}

impl MockEngine {
    pub fn push_layer(&mut self, name: &str, active: bool) {
        self.layers.push((name.to_string(), active));
    }

    fn touch(&self) {
        self.engine_calls.set(self.engine_calls.get() + 1);
    }
}

impl RenderEngine for MockEngine {
    type Image = MockImage;
    const ALPHA_MODE: AlphaMode = AlphaMode::Straight;

    fn new(width: u32, height: u32) -> EngineResult<Self> {
        Ok(Self {
            width,
            height,
            srs: "+init=epsg:4326".to_string(),
            ..Default::default()
        })
    }

    fn load_description(&mut self, text: &str, _base: Option<&Path>) -> EngineResult<()> {
        self.touch();
        let list = text
            .strip_prefix("layers:")
            .ok_or_else(|| EngineError::new(EngineErrorKind::Load, "expected 'layers:'"))?;
        self.layers = list
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(|s| match s.strip_prefix('!') {
                Some(name) => (name.to_string(), false),
                None => (s.to_string(), true),
            })
            .collect();
        Ok(())
    }

    fn zoom_all(&mut self) -> EngineResult<()> {
        self.touch();
        if !self.layers.iter().any(|(_, active)| *active) {
            return Err(EngineError::new(
                EngineErrorKind::Extent,
                "no active layers to zoom to",
            ));
        }
        self.extent = Some(BBox::new(-180.0, -90.0, 180.0, 90.0));
        Ok(())
    }

    fn zoom_to_box(&mut self, bbox: BBox) {
        self.touch();
        self.extent = Some(bbox);
    }

    fn resize(&mut self, width: u32, height: u32) {
        self.touch();
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
        self.extent
            .map(|e| e.width() / self.width as f64)
            .unwrap_or(0.0)
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
        self.layers.get(index).map(|(name, _)| name.as_str())
    }

    fn layer_is_active(&self, index: usize) -> bool {
        self.layers.get(index).map(|(_, a)| *a).unwrap_or(false)
    }

    fn set_layer_active(&mut self, index: usize, active: bool) {
        if let Some(layer) = self.layers.get_mut(index) {
            layer.1 = active;
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

    fn render_to_image(&self, scale: f64, scale_factor: f64) -> EngineResult<MockImage> {
        self.touch();
        self.last_render.set(Some((scale, scale_factor)));
        if self.fail_render {
            return Err(EngineError::new(EngineErrorKind::Render, "datasource missing"));
        }
        match self.extent {
            Some(e) if e.is_valid() => {}
            _ => {
                return Err(EngineError::new(EngineErrorKind::Extent, "invalid extent"));
            }
        }
        let c = self.background.unwrap_or(Color::TRANSPARENT);
        let data = [c.r, c.g, c.b, c.a].repeat((self.width * self.height) as usize);
        Ok(MockImage {
            width: self.width,
            height: self.height,
            data,
        })
    }

    fn image_to_raw(image: &MockImage) -> Vec<u8> {
        image.data.clone()
    }

    fn image_to_encoded(image: &MockImage, format: &str) -> EngineResult<Vec<u8>> {
        match format {
            "png" | "png256" => {
                let mut out = format!("{}:{}x{}:", format, image.width, image.height).into_bytes();
                out.extend_from_slice(&image.data);
                Ok(out)
            }
            other => Err(EngineError::new(
                EngineErrorKind::Encode,
                format!("unknown format '{}'", other),
            )),
        }
    }

    fn image_from_raw(raw: &[u8], width: u32, height: u32) -> EngineResult<MockImage> {
        Ok(MockImage {
            width,
            height,
            data: raw.to_vec(),
        })
    }
}
