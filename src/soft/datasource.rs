//! GeoJSON datasources.
//!
//! Features are flattened into plain geometries at load time; properties are
//! not kept since the stylesheet subset has no filters.

use serde::Deserialize;
use serde_json::Value;
use std::path::{Path, PathBuf};

use crate::registry;
use crate::viewport::BBox;

/// A single map-unit position
pub(crate) type Coord = (f64, f64);

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Geometry {
    Point(Coord),
    LineString(Vec<Coord>),
    /// Exterior ring first, then holes
    Polygon(Vec<Vec<Coord>>),
}

impl Geometry {
    pub fn envelope(&self) -> Option<BBox> {
        let mut points: Box<dyn Iterator<Item = &Coord> + '_> = match self {
            Geometry::Point(p) => Box::new(std::iter::once(p)),
            Geometry::LineString(line) => Box::new(line.iter()),
            Geometry::Polygon(rings) => Box::new(rings.iter().flatten()),
        };
        let &(x, y) = points.next()?;
        Some(points.fold(BBox::new(x, y, x, y), |acc, &(x, y)| {
            acc.union(&BBox::new(x, y, x, y))
        }))
    }

    /// Apply `f` to every coordinate. Fails as soon as `f` does.
    pub fn map_coords<F>(&self, mut f: F) -> Option<Geometry>
    where
        F: FnMut(Coord) -> Option<Coord>,
    {
        Some(match self {
            Geometry::Point(p) => Geometry::Point(f(*p)?),
            Geometry::LineString(l) => {
                Geometry::LineString(l.iter().map(|c| f(*c)).collect::<Option<_>>()?)
            }
            Geometry::Polygon(rings) => Geometry::Polygon(
                rings
                    .iter()
                    .map(|r| r.iter().map(|c| f(*c)).collect::<Option<Vec<_>>>())
                    .collect::<Option<_>>()?,
            ),
        })
    }
}

/// Loaded geometries plus their combined envelope
#[derive(Debug, Clone, Default)]
pub(crate) struct Datasource {
    pub geometries: Vec<Geometry>,
    pub envelope: Option<BBox>,
}

impl Datasource {
    fn from_geometries(geometries: Vec<Geometry>) -> Self {
        let envelope = geometries
            .iter()
            .filter_map(Geometry::envelope)
            .reduce(|a, b| a.union(&b));
        Self {
            geometries,
            envelope,
        }
    }
}

#[derive(Deserialize)]
struct FeatureCollectionJson {
    features: Vec<FeatureJson>,
}

#[derive(Deserialize)]
struct FeatureJson {
    geometry: Option<GeometryJson>,
}

type Position = Vec<f64>;

#[derive(Deserialize)]
#[serde(tag = "type")]
enum GeometryJson {
    Point { coordinates: Position },
    MultiPoint { coordinates: Vec<Position> },
    LineString { coordinates: Vec<Position> },
    MultiLineString { coordinates: Vec<Vec<Position>> },
    Polygon { coordinates: Vec<Vec<Position>> },
    MultiPolygon { coordinates: Vec<Vec<Vec<Position>>> },
    GeometryCollection { geometries: Vec<GeometryJson> },
}

fn position(p: &Position) -> Result<Coord, String> {
    match p.as_slice() {
        [x, y, ..] => Ok((*x, *y)),
        _ => Err(format!("position needs at least two coordinates, got {}", p.len())),
    }
}

fn line(ps: &[Position]) -> Result<Vec<Coord>, String> {
    ps.iter().map(position).collect()
}

fn polygon(rings: &[Vec<Position>]) -> Result<Geometry, String> {
    Ok(Geometry::Polygon(
        rings.iter().map(|r| line(r)).collect::<Result<_, _>>()?,
    ))
}

impl GeometryJson {
    fn flatten_into(&self, out: &mut Vec<Geometry>) -> Result<(), String> {
        match self {
            GeometryJson::Point { coordinates } => out.push(Geometry::Point(position(coordinates)?)),
            GeometryJson::MultiPoint { coordinates } => {
                for p in coordinates {
                    out.push(Geometry::Point(position(p)?));
                }
            }
            GeometryJson::LineString { coordinates } => {
                out.push(Geometry::LineString(line(coordinates)?))
            }
            GeometryJson::MultiLineString { coordinates } => {
                for l in coordinates {
                    out.push(Geometry::LineString(line(l)?));
                }
            }
            GeometryJson::Polygon { coordinates } => out.push(polygon(coordinates)?),
            GeometryJson::MultiPolygon { coordinates } => {
                for p in coordinates {
                    out.push(polygon(p)?);
                }
            }
            GeometryJson::GeometryCollection { geometries } => {
                for g in geometries {
                    g.flatten_into(out)?;
                }
            }
        }
        Ok(())
    }
}

/// Parse a GeoJSON document: a FeatureCollection, a single Feature or a bare
/// geometry.
pub(crate) fn parse_geojson(text: &str) -> Result<Datasource, String> {
    let value: Value =
        serde_json::from_str(text).map_err(|e| format!("invalid GeoJSON: {}", e))?;
    let kind = value
        .get("type")
        .and_then(Value::as_str)
        .ok_or("GeoJSON object has no 'type'")?
        .to_string();

    let invalid = |e: serde_json::Error| format!("invalid GeoJSON {}: {}", kind, e);
    let mut geometries = Vec::new();
    match kind.as_str() {
        "FeatureCollection" => {
            let fc: FeatureCollectionJson = serde_json::from_value(value).map_err(invalid)?;
            for geometry in fc.features.iter().filter_map(|f| f.geometry.as_ref()) {
                geometry.flatten_into(&mut geometries)?;
            }
        }
        "Feature" => {
            let feature: FeatureJson = serde_json::from_value(value).map_err(invalid)?;
            if let Some(geometry) = &feature.geometry {
                geometry.flatten_into(&mut geometries)?;
            }
        }
        _ => {
            let geometry: GeometryJson = serde_json::from_value(value).map_err(invalid)?;
            geometry.flatten_into(&mut geometries)?;
        }
    }
    Ok(Datasource::from_geometries(geometries))
}

/// Find a datasource file: absolute paths as given, relative ones against
/// `base` first, then every registered datasource directory.
pub(crate) fn resolve_file(file: &str, base: Option<&Path>) -> Result<PathBuf, String> {
    let path = Path::new(file);
    if path.is_absolute() {
        return if path.is_file() {
            Ok(path.to_path_buf())
        } else {
            Err(format!("datasource file {} not found", path.display()))
        };
    }

    base.map(Path::to_path_buf)
        .into_iter()
        .chain(registry::datasource_paths())
        .map(|dir| dir.join(path))
        .find(|candidate| candidate.is_file())
        .ok_or_else(|| format!("datasource file '{}' not found in any search path", file))
}

pub(crate) fn load_file(file: &str, base: Option<&Path>) -> Result<Datasource, String> {
    let path = resolve_file(file, base)?;
    let text = std::fs::read_to_string(&path)
        .map_err(|e| format!("cannot read {}: {}", path.display(), e))?;
    parse_geojson(&text).map_err(|e| format!("{}: {}", path.display(), e))
}
