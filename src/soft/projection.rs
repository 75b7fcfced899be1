//! Spatial reference handling for the software engine.
//!
//! Only geographic coordinates and spherical mercator are understood. Any
//! other SRS string is carried as-is and can only be paired with an identical
//! string.

use std::f64::consts::PI;

use crate::viewport::BBox;

/// WGS84 equatorial radius in meters
pub(crate) const EARTH_RADIUS: f64 = 6_378_137.0;

/// Meters per degree along the equator
pub(crate) const METERS_PER_DEGREE: f64 = EARTH_RADIUS * 2.0 * PI / 360.0;

/// Standardized rendering pixel size (OGC SLD), in meters
pub(crate) const PIXEL_SIZE: f64 = 0.00028;

/// Latitude limit of the square mercator world
const MAX_LATITUDE: f64 = 85.051_128_779_806_6;

pub(crate) const DEFAULT_SRS: &str = "+proj=longlat +ellps=WGS84 +datum=WGS84 +no_defs";

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Projection {
    Geographic,
    WebMercator,
    Other(String),
}

impl Projection {
    pub fn parse(srs: &str) -> Self {
        let lower = srs.trim().to_ascii_lowercase();
        if lower.contains("epsg:4326")
            || lower.contains("+proj=longlat")
            || lower.contains("+proj=latlong")
        {
            Projection::Geographic
        } else if ["epsg:3857", "epsg:900913", "epsg:3785", "+proj=merc"]
            .iter()
            .any(|k| lower.contains(k))
        {
            Projection::WebMercator
        } else {
            Projection::Other(srs.trim().to_string())
        }
    }

    pub fn is_geographic(&self) -> bool {
        matches!(self, Projection::Geographic)
    }

    /// Whether points can be carried from `self` into `target`
    pub fn can_transform_to(&self, target: &Projection) -> bool {
        match (self, target) {
            (Projection::Other(a), Projection::Other(b)) => a == b,
            (Projection::Other(_), _) | (_, Projection::Other(_)) => false,
            _ => true,
        }
    }

    /// Move a point from `self` into `target`. `None` when the pair is not
    /// supported.
    pub fn transform(&self, target: &Projection, x: f64, y: f64) -> Option<(f64, f64)> {
        match (self, target) {
            (Projection::Geographic, Projection::WebMercator) => Some(forward_mercator(x, y)),
            (Projection::WebMercator, Projection::Geographic) => Some(inverse_mercator(x, y)),
            _ if self.can_transform_to(target) => Some((x, y)),
            _ => None,
        }
    }

    /// Transform a box corner by corner. Both supported projections are
    /// monotonic per axis, so the corners stay corners.
    pub fn transform_box(&self, target: &Projection, bbox: &BBox) -> Option<BBox> {
        let (minx, miny) = self.transform(target, bbox.minx, bbox.miny)?;
        let (maxx, maxy) = self.transform(target, bbox.maxx, bbox.maxy)?;
        Some(BBox::new(minx, miny, maxx, maxy))
    }
}

fn forward_mercator(lon: f64, lat: f64) -> (f64, f64) {
    let lat = lat.clamp(-MAX_LATITUDE, MAX_LATITUDE);
    let x = lon.to_radians() * EARTH_RADIUS;
    let y = (PI / 4.0 + lat.to_radians() / 2.0).tan().ln() * EARTH_RADIUS;
    (x, y)
}

fn inverse_mercator(x: f64, y: f64) -> (f64, f64) {
    let lon = (x / EARTH_RADIUS).to_degrees();
    let lat = (2.0 * (y / EARTH_RADIUS).exp().atan() - PI / 2.0).to_degrees();
    (lon, lat)
}

/// Scale denominator for `map_width` map units spread over `pixels` pixels
pub(crate) fn scale_denominator(map_width: f64, pixels: u32, geographic: bool) -> f64 {
    if pixels == 0 {
        return 0.0;
    }
    let mut units_per_pixel = map_width / pixels as f64;
    if geographic {
        units_per_pixel *= METERS_PER_DEGREE;
    }
    units_per_pixel / PIXEL_SIZE
}
