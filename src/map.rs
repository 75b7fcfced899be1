//! The map handle: one engine-side map plus the facade state around it.

use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::engine::RenderEngine;
use crate::layers::LayerVisibility;
use crate::viewport::BBox;
use crate::{Color, Error, Result};

/// Configuration applied when a [`MapHandle`] is created
///
/// Defaults match a fresh engine map: 800×600 pixels, the engine's default
/// SRS, no background, no buffer and no maximum extent.
///
/// # Examples
///
/// ```
/// let cfg = rfmap::MapConfig::default();
/// assert_eq!((cfg.width, cfg.height), (800, 600));
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MapConfig {
    /// Output width in pixels
    pub width: u32,
    /// Output height in pixels
    pub height: u32,
    /// Spatial reference of the map, e.g. `+init=epsg:3857`
    pub srs: Option<String>,
    /// Background color; `None` keeps the engine/stylesheet default
    pub background: Option<Color>,
    /// Label/symbol margin outside the frame, in pixels
    pub buffer_size: u32,
    /// Clamp for later zoom operations
    pub max_extent: Option<BBox>,
}

impl Default for MapConfig {
    fn default() -> Self {
        Self {
            width: 800,
            height: 600,
            srs: None,
            background: None,
            buffer_size: 0,
            max_extent: None,
        }
    }
}

/// Owns one engine-side map and its render state.
///
/// Every operation takes `&mut self` or `&self`, so a single handle cannot be
/// driven from two threads at once; distinct handles are independent. The
/// engine is released exactly once, either by [`MapHandle::release`] or on
/// drop. Any call after `release` fails with [`Error::ResourceError`].
pub struct MapHandle<E: RenderEngine> {
    pub(crate) engine: Option<E>,
    pub(crate) width: u32,
    pub(crate) height: u32,
    pub(crate) layers: LayerVisibility,
}

impl<E: RenderEngine> MapHandle<E> {
    /// Create a handle with a new engine map configured from `config`
    pub fn new(config: MapConfig) -> Result<Self> {
        if config.width == 0 || config.height == 0 {
            return Err(Error::InputError(format!(
                "map size must be positive, got {}x{}",
                config.width, config.height
            )));
        }

        let mut engine = E::new(config.width, config.height).map_err(Error::render)?;
        if let Some(srs) = &config.srs {
            engine.set_srs(srs);
        }
        if let Some(bg) = config.background {
            engine.set_background(bg);
        }
        if config.buffer_size > 0 {
            engine.set_buffer_size(config.buffer_size);
        }
        if let Some(extent) = config.max_extent {
            engine.set_max_extent(extent);
        }

        debug!("created map handle {}x{}", config.width, config.height);
        Ok(Self {
            engine: Some(engine),
            width: config.width,
            height: config.height,
            layers: LayerVisibility::default(),
        })
    }

    pub(crate) fn engine(&self) -> Result<&E> {
        self.engine.as_ref().ok_or(Error::ResourceError)
    }

    /// Direct access to the engine.
    ///
    /// Changes made here bypass the facade: the layer snapshot in particular
    /// assumes layers are not added or reordered behind its back.
    pub fn engine_mut(&mut self) -> Result<&mut E> {
        self.engine.as_mut().ok_or(Error::ResourceError)
    }

    /// Whether [`MapHandle::release`] has already been called
    pub fn is_released(&self) -> bool {
        self.engine.is_none()
    }

    /// Release the engine-side map. A second call is a usage error.
    pub fn release(&mut self) -> Result<()> {
        match self.engine.take() {
            Some(engine) => {
                drop(engine);
                self.layers = LayerVisibility::default();
                debug!("released map handle");
                Ok(())
            }
            None => Err(Error::ResourceError),
        }
    }

    /// Load a map description from a file.
    ///
    /// Relative references inside the description resolve against the
    /// file's directory.
    pub fn load(&mut self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        self.engine()?;
        let text = std::fs::read_to_string(path)
            .map_err(|e| Error::LoadError(format!("cannot read {}: {}", path.display(), e)))?;
        self.load_string(&text, path.parent())
    }

    /// Load a map description from text
    pub fn load_string(&mut self, text: &str, base: Option<&Path>) -> Result<()> {
        let engine = self.engine.as_mut().ok_or(Error::ResourceError)?;
        engine.load_description(text, base).map_err(Error::load)?;

        if self.layers.is_held() {
            warn!("map reloaded while a layer override is active; reset_layers() will use the old snapshot");
        }
        info!("loaded map with {} layers", engine.layer_count());
        Ok(())
    }

    /// Spatial reference of the map as a proj string
    pub fn srs(&self) -> Result<String> {
        Ok(self.engine()?.srs())
    }

    /// Set the spatial reference (`+init=epsg:4326`, `+proj=merc ...`, ...)
    pub fn set_srs(&mut self, srs: &str) -> Result<()> {
        self.engine_mut()?.set_srs(srs);
        Ok(())
    }

    /// The background color, if the map has one
    pub fn background(&self) -> Result<Option<Color>> {
        Ok(self.engine()?.background())
    }

    pub fn set_background(&mut self, color: Color) -> Result<()> {
        self.engine_mut()?.set_background(color);
        Ok(())
    }
}

impl<E: RenderEngine> std::fmt::Debug for MapHandle<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MapHandle")
            .field("width", &self.width)
            .field("height", &self.height)
            .field("released", &self.is_released())
            .field("layer_override", &self.layers.is_held())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::MockEngine;

    #[test]
    fn test_default_config() {
        let cfg = MapConfig::default();
        assert_eq!(cfg.width, 800);
        assert_eq!(cfg.height, 600);
        assert!(cfg.srs.is_none());
        assert_eq!(cfg.buffer_size, 0);
    }

    #[test]
    fn config_is_applied_to_engine() {
        let cfg = MapConfig {
            srs: Some("+init=epsg:3857".into()),
            background: Some(Color::WHITE),
            buffer_size: 32,
            max_extent: Some(BBox::new(0.0, 0.0, 10.0, 10.0)),
            ..Default::default()
        };
        let map: MapHandle<MockEngine> = MapHandle::new(cfg).unwrap();
        let engine = map.engine().unwrap();
        assert_eq!(engine.srs, "+init=epsg:3857");
        assert_eq!(engine.background, Some(Color::WHITE));
        assert_eq!(engine.buffer_size, 32);
        assert_eq!(engine.max_extent, Some(BBox::new(0.0, 0.0, 10.0, 10.0)));
    }

    #[test]
    fn config_from_json_fills_defaults() {
        let cfg: MapConfig =
            serde_json::from_str(r#"{"width": 256, "background": {"r":1,"g":2,"b":3,"a":255}}"#)
                .unwrap();
        assert_eq!(cfg.width, 256);
        assert_eq!(cfg.height, 600);
        assert_eq!(cfg.background, Some(Color::rgb(1, 2, 3)));
    }

    #[test]
    fn zero_sized_config_is_rejected() {
        let cfg = MapConfig {
            width: 0,
            ..Default::default()
        };
        let err = MapHandle::<MockEngine>::new(cfg).unwrap_err();
        assert!(matches!(err, Error::InputError(_)));
    }

    #[test]
    fn use_after_release_is_a_resource_error() {
        let mut map: MapHandle<MockEngine> = MapHandle::new(MapConfig::default()).unwrap();
        map.release().unwrap();
        assert!(map.is_released());
        assert!(matches!(map.srs(), Err(Error::ResourceError)));
        assert!(matches!(map.set_background(Color::BLACK), Err(Error::ResourceError)));
        assert!(matches!(map.load_string("<Map/>", None), Err(Error::ResourceError)));
        assert!(matches!(map.release(), Err(Error::ResourceError)));
    }

    #[test]
    fn failed_load_is_a_load_error() {
        let mut map: MapHandle<MockEngine> = MapHandle::new(MapConfig::default()).unwrap();
        let err = map.load_string("not a map", None).unwrap_err();
        assert!(matches!(err, Error::LoadError(_)));
        assert!(err.is_engine_error());
    }

    #[test]
    fn missing_file_is_a_load_error() {
        let mut map: MapHandle<MockEngine> = MapHandle::new(MapConfig::default()).unwrap();
        let err = map.load("/definitely/not/here.xml").unwrap_err();
        assert!(matches!(err, Error::LoadError(_)));
        assert!(!err.is_engine_error());
    }
}
