//! Rasterization of a loaded map with tiny-skia.

use log::{debug, trace};
use std::collections::HashMap;
use tiny_skia::{FillRule, LineCap, LineJoin, Paint, Path, PathBuilder, Pixmap, Stroke, Transform};

use super::datasource::{Coord, Geometry};
use super::projection::Projection;
use super::style::{Layer, Style, Symbolizer};
use crate::viewport::BBox;
use crate::Color;

/// Everything one render pass needs besides the layers themselves
#[derive(Debug, Clone)]
pub(crate) struct RenderJob<'a> {
    pub extent: BBox,
    pub width: u32,
    pub height: u32,
    pub projection: &'a Projection,
    pub background: Option<Color>,
    pub buffer_size: u32,
    /// Scale denominator deciding layer and rule visibility
    pub scale_denominator: f64,
    pub scale_factor: f64,
}

impl RenderJob<'_> {
    fn to_pixel(&self, (x, y): Coord) -> (f32, f32) {
        let sx = self.width as f64 / self.extent.width();
        let sy = self.height as f64 / self.extent.height();
        (
            ((x - self.extent.minx) * sx) as f32,
            ((self.extent.maxy - y) * sy) as f32,
        )
    }

    /// The extent grown by the buffer, used to cull features
    fn query_extent(&self) -> BBox {
        let units_per_pixel = self.extent.width() / self.width as f64;
        let pad = self.buffer_size as f64 * units_per_pixel;
        self.extent.pad(pad, pad)
    }
}

pub(crate) fn render(
    job: &RenderJob<'_>,
    layers: &[Layer],
    styles: &HashMap<String, Style>,
) -> Result<Pixmap, String> {
    let mut pixmap = Pixmap::new(job.width, job.height)
        .ok_or_else(|| format!("cannot allocate a {}x{} canvas", job.width, job.height))?;
    if let Some(bg) = job.background {
        pixmap.fill(tiny_skia::Color::from_rgba8(bg.r, bg.g, bg.b, bg.a));
    }

    let query = job.query_extent();
    for layer in layers {
        if !layer.visible_at(job.scale_denominator) {
            trace!("layer '{}' not visible at 1:{:.0}", layer.name, job.scale_denominator);
            continue;
        }
        let Some(ds) = &layer.datasource else {
            continue;
        };

        let layer_proj = layer
            .srs
            .as_deref()
            .map(Projection::parse)
            .unwrap_or_else(|| job.projection.clone());
        if !layer_proj.can_transform_to(job.projection) {
            return Err(format!(
                "cannot project layer '{}' from '{}' into the map SRS",
                layer.name,
                layer.srs.as_deref().unwrap_or_default()
            ));
        }

        let geometries: Vec<Geometry> = ds
            .geometries
            .iter()
            .filter_map(|g| g.map_coords(|(x, y)| layer_proj.transform(job.projection, x, y)))
            .filter(|g| g.envelope().map_or(false, |e| e.intersects(&query)))
            .collect();
        debug!(
            "layer '{}': {} of {} features in view",
            layer.name,
            geometries.len(),
            ds.geometries.len()
        );

        for style_name in &layer.styles {
            let Some(style) = styles.get(style_name) else {
                continue;
            };
            for rule in style.rules.iter().filter(|r| r.visible_at(job.scale_denominator)) {
                for symbolizer in &rule.symbolizers {
                    draw(&mut pixmap, job, symbolizer, &geometries);
                }
            }
        }
    }
    Ok(pixmap)
}

fn draw(pixmap: &mut Pixmap, job: &RenderJob<'_>, symbolizer: &Symbolizer, geometries: &[Geometry]) {
    let sf = job.scale_factor as f32;
    match *symbolizer {
        Symbolizer::Polygon { fill, opacity } => {
            let paint = paint(fill, opacity);
            for rings in geometries.iter().filter_map(|g| match g {
                Geometry::Polygon(rings) => Some(rings),
                _ => None,
            }) {
                if let Some(path) = rings_path(job, rings, true) {
                    pixmap.fill_path(&path, &paint, FillRule::EvenOdd, Transform::identity(), None);
                }
            }
        }
        Symbolizer::Line {
            stroke,
            width,
            opacity,
        } => {
            let paint = paint(stroke, opacity);
            let stroke = Stroke {
                width: width * sf,
                line_cap: LineCap::Round,
                line_join: LineJoin::Round,
                ..Stroke::default()
            };
            for geometry in geometries {
                let path = match geometry {
                    Geometry::LineString(line) => rings_path(job, std::slice::from_ref(line), false),
                    Geometry::Polygon(rings) => rings_path(job, rings, true),
                    Geometry::Point(_) => None,
                };
                if let Some(path) = path {
                    pixmap.stroke_path(&path, &paint, &stroke, Transform::identity(), None);
                }
            }
        }
        Symbolizer::Markers {
            fill,
            width,
            opacity,
        } => {
            let paint = paint(fill, opacity);
            let radius = width * sf / 2.0;
            for point in geometries.iter().filter_map(|g| match g {
                Geometry::Point(p) => Some(*p),
                _ => None,
            }) {
                let (x, y) = job.to_pixel(point);
                if let Some(circle) = PathBuilder::from_circle(x, y, radius) {
                    pixmap.fill_path(&circle, &paint, FillRule::Winding, Transform::identity(), None);
                }
            }
        }
    }
}

fn paint(color: Color, opacity: f32) -> Paint<'static> {
    let alpha = (color.a as f32 * opacity).round().clamp(0.0, 255.0) as u8;
    let mut paint = Paint::default();
    paint.set_color_rgba8(color.r, color.g, color.b, alpha);
    paint.anti_alias = true;
    paint
}

fn rings_path(job: &RenderJob<'_>, rings: &[Vec<Coord>], close: bool) -> Option<Path> {
    let mut pb = PathBuilder::new();
    for ring in rings {
        let mut points = ring.iter().map(|c| job.to_pixel(*c));
        let Some((x, y)) = points.next() else {
            continue;
        };
        pb.move_to(x, y);
        for (x, y) in points {
            pb.line_to(x, y);
        }
        if close {
            pb.close();
        }
    }
    pb.finish()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::soft::datasource::Datasource;
    use crate::soft::style::Rule;

    fn job(projection: &Projection) -> RenderJob<'_> {
        RenderJob {
            extent: BBox::new(0.0, 0.0, 10.0, 10.0),
            width: 10,
            height: 10,
            projection,
            background: Some(Color::WHITE),
            buffer_size: 0,
            scale_denominator: 1000.0,
            scale_factor: 1.0,
        }
    }

    fn layer(geometries: Vec<Geometry>) -> Layer {
        Layer {
            name: "l".into(),
            srs: None,
            active: true,
            min_scale: None,
            max_scale: None,
            styles: vec!["s".into()],
            datasource: Some(Datasource {
                envelope: None,
                geometries,
            }),
        }
    }

    fn styles(symbolizer: Symbolizer, min_scale: Option<f64>) -> HashMap<String, Style> {
        let mut map = HashMap::new();
        map.insert(
            "s".to_string(),
            Style {
                rules: vec![Rule {
                    min_scale,
                    max_scale: None,
                    symbolizers: vec![symbolizer],
                }],
            },
        );
        map
    }

    fn pixel(pixmap: &Pixmap, x: u32, y: u32) -> [u8; 4] {
        let c = pixmap.pixel(x, y).unwrap();
        [c.red(), c.green(), c.blue(), c.alpha()]
    }

    fn square() -> Geometry {
        Geometry::Polygon(vec![vec![(2.0, 2.0), (8.0, 2.0), (8.0, 8.0), (2.0, 8.0)]])
    }

    #[test]
    fn background_only() {
        let proj = Projection::Geographic;
        let pixmap = render(&job(&proj), &[], &HashMap::new()).unwrap();
        assert_eq!(pixel(&pixmap, 0, 0), [255, 255, 255, 255]);
    }

    #[test]
    fn polygon_fill_lands_inside_only() {
        let proj = Projection::Geographic;
        let red = Symbolizer::Polygon {
            fill: Color::rgb(255, 0, 0),
            opacity: 1.0,
        };
        let pixmap = render(&job(&proj), &[layer(vec![square()])], &styles(red, None)).unwrap();
        assert_eq!(pixel(&pixmap, 5, 5), [255, 0, 0, 255]);
        assert_eq!(pixel(&pixmap, 0, 9), [255, 255, 255, 255]);
    }

    #[test]
    fn y_axis_points_up() {
        let proj = Projection::Geographic;
        let top = Geometry::Polygon(vec![vec![(0.0, 5.0), (10.0, 5.0), (10.0, 10.0), (0.0, 10.0)]]);
        let blue = Symbolizer::Polygon {
            fill: Color::rgb(0, 0, 255),
            opacity: 1.0,
        };
        let pixmap = render(&job(&proj), &[layer(vec![top])], &styles(blue, None)).unwrap();
        assert_eq!(pixel(&pixmap, 5, 1), [0, 0, 255, 255]);
        assert_eq!(pixel(&pixmap, 5, 8), [255, 255, 255, 255]);
    }

    #[test]
    fn rule_outside_scale_range_draws_nothing() {
        let proj = Projection::Geographic;
        let red = Symbolizer::Polygon {
            fill: Color::rgb(255, 0, 0),
            opacity: 1.0,
        };
        let pixmap =
            render(&job(&proj), &[layer(vec![square()])], &styles(red, Some(5000.0))).unwrap();
        assert_eq!(pixel(&pixmap, 5, 5), [255, 255, 255, 255]);
    }

    #[test]
    fn inactive_layer_is_skipped() {
        let proj = Projection::Geographic;
        let mut l = layer(vec![square()]);
        l.active = false;
        let red = Symbolizer::Polygon {
            fill: Color::rgb(255, 0, 0),
            opacity: 1.0,
        };
        let pixmap = render(&job(&proj), &[l], &styles(red, None)).unwrap();
        assert_eq!(pixel(&pixmap, 5, 5), [255, 255, 255, 255]);
    }

    #[test]
    fn markers_scale_with_factor() {
        let proj = Projection::Geographic;
        let dot = Symbolizer::Markers {
            fill: Color::BLACK,
            width: 2.0,
            opacity: 1.0,
        };
        let layers = [layer(vec![Geometry::Point((5.0, 5.0))])];

        let small = render(&job(&proj), &layers, &styles(dot.clone(), None)).unwrap();
        assert_eq!(pixel(&small, 2, 5), [255, 255, 255, 255]);

        let mut big_job = job(&proj);
        big_job.scale_factor = 4.0;
        let big = render(&big_job, &layers, &styles(dot, None)).unwrap();
        assert_eq!(pixel(&big, 2, 5), [0, 0, 0, 255]);
    }

    #[test]
    fn unprojectable_layer_fails() {
        let proj = Projection::Geographic;
        let mut l = layer(vec![square()]);
        l.srs = Some("+proj=utm +zone=33".into());
        let red = Symbolizer::Polygon {
            fill: Color::rgb(255, 0, 0),
            opacity: 1.0,
        };
        let err = render(&job(&proj), &[l], &styles(red, None)).unwrap_err();
        assert!(err.contains("cannot project layer 'l'"));
    }
}
