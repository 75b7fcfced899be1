//! Stylesheet loader for the software engine.
//!
//! Understands a small Mapnik-style XML subset: a `<Map>` root with
//! `<Style>`/`<Rule>` blocks, polygon, line and marker symbolizers, and
//! `<Layer>`s backed by GeoJSON datasources. Elements outside the subset are
//! skipped with a warning; malformed values are load errors.

use log::{debug, warn};
use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use super::datasource::{self, Datasource};
use crate::viewport::BBox;
use crate::Color;

/// Parsed `<Map>` element
#[derive(Debug, Default)]
pub(crate) struct MapDescription {
    pub srs: Option<String>,
    pub background: Option<Color>,
    pub buffer_size: Option<u32>,
    pub max_extent: Option<BBox>,
    pub styles: HashMap<String, Style>,
    pub layers: Vec<Layer>,
}

#[derive(Debug, Clone, Default)]
pub(crate) struct Style {
    pub rules: Vec<Rule>,
}

#[derive(Debug, Clone, Default)]
pub(crate) struct Rule {
    pub min_scale: Option<f64>,
    pub max_scale: Option<f64>,
    pub symbolizers: Vec<Symbolizer>,
}

impl Rule {
    /// Min inclusive, max exclusive
    pub fn visible_at(&self, scale_denominator: f64) -> bool {
        in_scale_range(scale_denominator, self.min_scale, self.max_scale)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Symbolizer {
    Polygon { fill: Color, opacity: f32 },
    Line { stroke: Color, width: f32, opacity: f32 },
    Markers { fill: Color, width: f32, opacity: f32 },
}

#[derive(Debug, Clone)]
pub(crate) struct Layer {
    pub name: String,
    pub srs: Option<String>,
    pub active: bool,
    pub min_scale: Option<f64>,
    pub max_scale: Option<f64>,
    pub styles: Vec<String>,
    pub datasource: Option<Datasource>,
}

impl Layer {
    pub fn visible_at(&self, scale_denominator: f64) -> bool {
        self.active && in_scale_range(scale_denominator, self.min_scale, self.max_scale)
    }
}

fn in_scale_range(scale: f64, min: Option<f64>, max: Option<f64>) -> bool {
    min.map_or(true, |m| scale >= m) && max.map_or(true, |m| scale < m)
}

/// Minimal element tree built from quick-xml events
#[derive(Debug, Default)]
struct Node {
    name: String,
    attrs: Vec<(String, String)>,
    text: String,
    children: Vec<Node>,
}

impl Node {
    fn from_start(e: &BytesStart) -> Result<Self, String> {
        let name = std::str::from_utf8(e.name().as_ref())
            .map_err(|err| format!("invalid UTF-8 in element name: {}", err))?
            .to_string();
        let mut attrs = Vec::new();
        for attr in e.attributes() {
            let attr = attr.map_err(|err| format!("attribute error in <{}>: {}", name, err))?;
            let key = std::str::from_utf8(attr.key.as_ref())
                .map_err(|err| format!("invalid UTF-8 in attribute key: {}", err))?
                .to_string();
            let value = attr
                .unescape_value()
                .map_err(|err| format!("invalid value for '{}' in <{}>: {}", key, name, err))?
                .into_owned();
            attrs.push((key, value));
        }
        Ok(Self {
            name,
            attrs,
            ..Default::default()
        })
    }

    fn attr(&self, key: &str) -> Option<&str> {
        self.attrs
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    /// Parse an optional attribute, naming the element in the error
    fn parse_attr<T: FromStr>(&self, key: &str) -> Result<Option<T>, String>
    where
        T::Err: std::fmt::Display,
    {
        self.attr(key)
            .map(|raw| {
                raw.trim().parse::<T>().map_err(|e| {
                    format!(
                        "invalid value '{}' for attribute '{}' of <{}>: {}",
                        raw, key, self.name, e
                    )
                })
            })
            .transpose()
    }

    fn parse_text<T: FromStr>(&self) -> Result<T, String>
    where
        T::Err: std::fmt::Display,
    {
        self.text
            .trim()
            .parse::<T>()
            .map_err(|e| format!("invalid content '{}' in <{}>: {}", self.text, self.name, e))
    }
}

fn parse_tree(xml: &str) -> Result<Node, String> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);

    let mut stack: Vec<Node> = Vec::new();
    let mut root: Option<Node> = None;

    loop {
        match reader.read_event() {
            Ok(Event::Start(ref e)) => stack.push(Node::from_start(e)?),
            Ok(Event::Empty(ref e)) => {
                let node = Node::from_start(e)?;
                match stack.last_mut() {
                    Some(parent) => parent.children.push(node),
                    None => root = Some(node),
                }
            }
            Ok(Event::End(_)) => {
                let node = stack.pop().ok_or("unbalanced closing tag")?;
                match stack.last_mut() {
                    Some(parent) => parent.children.push(node),
                    None => root = Some(node),
                }
            }
            Ok(Event::Text(ref e)) => {
                let text = e
                    .unescape()
                    .map_err(|err| format!("invalid text: {}", err))?;
                if let Some(node) = stack.last_mut() {
                    node.text.push_str(&text);
                }
            }
            Ok(Event::CData(e)) => {
                let text = String::from_utf8(e.into_inner().into_owned())
                    .map_err(|err| format!("invalid UTF-8 in CDATA: {}", err))?;
                if let Some(node) = stack.last_mut() {
                    node.text.push_str(&text);
                }
            }
            Ok(Event::Eof) => break,
            Err(e) => {
                return Err(format!(
                    "XML error at position {}: {}",
                    reader.buffer_position(),
                    e
                ))
            }
            _ => {}
        }
    }

    if !stack.is_empty() {
        return Err("unexpected end of document".into());
    }
    root.ok_or_else(|| "empty document".to_string())
}

/// Parse a stylesheet. `base` resolves relative datasource files.
pub(crate) fn parse_map(xml: &str, base: Option<&Path>) -> Result<MapDescription, String> {
    let root = parse_tree(xml)?;
    if root.name != "Map" {
        return Err(format!("expected <Map> root element, found <{}>", root.name));
    }

    let mut desc = MapDescription {
        srs: root.attr("srs").map(str::to_string),
        background: root.parse_attr::<Color>("background-color")?,
        buffer_size: root.parse_attr::<u32>("buffer-size")?,
        max_extent: root.parse_attr::<BBox>("maximum-extent")?,
        ..Default::default()
    };

    // `base` on <Map> shifts relative datasource lookups
    let base: Option<PathBuf> = match (root.attr("base"), base) {
        (Some(extra), Some(dir)) => Some(dir.join(extra)),
        (Some(extra), None) => Some(PathBuf::from(extra)),
        (None, dir) => dir.map(Path::to_path_buf),
    };

    for child in &root.children {
        match child.name.as_str() {
            "Style" => {
                let name = child
                    .attr("name")
                    .ok_or("<Style> requires a 'name' attribute")?
                    .to_string();
                let style = parse_style(child)?;
                if desc.styles.insert(name.clone(), style).is_some() {
                    warn!("style '{}' defined twice; the last one wins", name);
                }
            }
            "Layer" => desc.layers.push(parse_layer(child, base.as_deref())?),
            "Parameters" | "FontSet" => debug!("ignoring <{}>", child.name),
            other => warn!("skipping unsupported element <{}> in <Map>", other),
        }
    }

    for layer in &desc.layers {
        for style in &layer.styles {
            if !desc.styles.contains_key(style) {
                warn!("layer '{}' references unknown style '{}'", layer.name, style);
            }
        }
    }
    Ok(desc)
}

fn parse_style(node: &Node) -> Result<Style, String> {
    let mut rules = Vec::new();
    for child in &node.children {
        if child.name != "Rule" {
            warn!("skipping unsupported element <{}> in <Style>", child.name);
            continue;
        }
        let mut rule = Rule::default();
        for item in &child.children {
            match item.name.as_str() {
                "MinScaleDenominator" => rule.min_scale = Some(item.parse_text()?),
                "MaxScaleDenominator" => rule.max_scale = Some(item.parse_text()?),
                "PolygonSymbolizer" => rule.symbolizers.push(Symbolizer::Polygon {
                    fill: item
                        .parse_attr("fill")?
                        .unwrap_or(Color::rgb(128, 128, 128)),
                    opacity: opacity(item, "fill-opacity")?,
                }),
                "LineSymbolizer" => rule.symbolizers.push(Symbolizer::Line {
                    stroke: item.parse_attr("stroke")?.unwrap_or(Color::BLACK),
                    width: positive(item, "stroke-width", 1.0)?,
                    opacity: opacity(item, "stroke-opacity")?,
                }),
                "MarkersSymbolizer" => rule.symbolizers.push(Symbolizer::Markers {
                    fill: item.parse_attr("fill")?.unwrap_or(Color::rgb(0, 0, 255)),
                    width: positive(item, "width", 10.0)?,
                    opacity: opacity(item, "opacity")?,
                }),
                other => warn!("skipping unsupported element <{}> in <Rule>", other),
            }
        }
        rules.push(rule);
    }
    Ok(Style { rules })
}

fn opacity(node: &Node, key: &str) -> Result<f32, String> {
    let value = node.parse_attr::<f32>(key)?.unwrap_or(1.0);
    if !(0.0..=1.0).contains(&value) {
        return Err(format!("{} of <{}> must be within 0..1, got {}", key, node.name, value));
    }
    Ok(value)
}

fn positive(node: &Node, key: &str, default: f32) -> Result<f32, String> {
    let value = node.parse_attr::<f32>(key)?.unwrap_or(default);
    if !value.is_finite() || value <= 0.0 {
        return Err(format!("{} of <{}> must be positive, got {}", key, node.name, value));
    }
    Ok(value)
}

fn parse_layer(node: &Node, base: Option<&Path>) -> Result<Layer, String> {
    let name = node
        .attr("name")
        .ok_or("<Layer> requires a 'name' attribute")?
        .to_string();
    let active = match node.attr("status") {
        None | Some("on") | Some("true") | Some("1") => true,
        Some("off") | Some("false") | Some("0") => false,
        Some(other) => return Err(format!("invalid status '{}' for layer '{}'", other, name)),
    };

    let mut layer = Layer {
        srs: node.attr("srs").map(str::to_string),
        active,
        min_scale: node.parse_attr("minimum-scale-denominator")?,
        max_scale: node.parse_attr("maximum-scale-denominator")?,
        styles: Vec::new(),
        datasource: None,
        name,
    };

    for child in &node.children {
        match child.name.as_str() {
            "StyleName" => layer.styles.push(child.text.trim().to_string()),
            "Datasource" => {
                let ds = parse_datasource(child, base)
                    .map_err(|e| format!("layer '{}': {}", layer.name, e))?;
                layer.datasource = Some(ds);
            }
            other => warn!("skipping unsupported element <{}> in layer '{}'", other, layer.name),
        }
    }
    Ok(layer)
}

fn parse_datasource(node: &Node, base: Option<&Path>) -> Result<Datasource, String> {
    let params: HashMap<&str, &str> = node
        .children
        .iter()
        .filter(|c| c.name == "Parameter")
        .filter_map(|c| c.attr("name").map(|k| (k, c.text.trim())))
        .collect();

    match params.get("type").copied() {
        Some("geojson") => {}
        Some(other) => return Err(format!("unsupported datasource type '{}'", other)),
        None => return Err("datasource has no 'type' parameter".into()),
    }

    let base: Option<PathBuf> = match (params.get("base"), base) {
        (Some(extra), Some(dir)) => Some(dir.join(extra)),
        (Some(extra), None) => Some(PathBuf::from(extra)),
        (None, dir) => dir.map(Path::to_path_buf),
    };

    match (params.get("inline"), params.get("file")) {
        (Some(inline), _) => datasource::parse_geojson(inline),
        (None, Some(file)) => datasource::load_file(file, base.as_deref()),
        (None, None) => Err("geojson datasource needs an 'inline' or 'file' parameter".into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SHEET: &str = r##"<?xml version="1.0" encoding="utf-8"?>
<!-- test sheet -->
<Map srs="+init=epsg:4326" background-color="#b8dee6" buffer-size="16" maximum-extent="-180,-90,180,90">
  <Style name="land">
    <Rule>
      <MaxScaleDenominator>1e9</MaxScaleDenominator>
      <PolygonSymbolizer fill="#f2efe9" fill-opacity="0.5"/>
      <LineSymbolizer stroke="steelblue" stroke-width="2"/>
    </Rule>
    <Rule>
      <MinScaleDenominator>1e9</MinScaleDenominator>
      <TextSymbolizer/>
    </Rule>
  </Style>
  <Layer name="countries" status="on">
    <StyleName>land</StyleName>
    <Datasource>
      <Parameter name="type">geojson</Parameter>
      <Parameter name="inline"><![CDATA[{"type":"Point","coordinates":[1,2]}]]></Parameter>
    </Datasource>
  </Layer>
  <Layer name="hidden" status="off" minimum-scale-denominator="500"/>
</Map>"##;

    #[test]
    fn parses_map_attributes_styles_and_layers() {
        let desc = parse_map(SHEET, None).unwrap();
        assert_eq!(desc.srs.as_deref(), Some("+init=epsg:4326"));
        assert_eq!(desc.background, Some(Color::rgb(0xb8, 0xde, 0xe6)));
        assert_eq!(desc.buffer_size, Some(16));
        assert_eq!(desc.max_extent, Some(BBox::new(-180.0, -90.0, 180.0, 90.0)));

        let land = &desc.styles["land"];
        assert_eq!(land.rules.len(), 2);
        assert_eq!(land.rules[0].max_scale, Some(1e9));
        assert_eq!(
            land.rules[0].symbolizers,
            vec![
                Symbolizer::Polygon {
                    fill: Color::rgb(0xf2, 0xef, 0xe9),
                    opacity: 0.5
                },
                Symbolizer::Line {
                    stroke: Color::rgb(70, 130, 180),
                    width: 2.0,
                    opacity: 1.0
                },
            ]
        );
        assert!(land.rules[1].symbolizers.is_empty());

        assert_eq!(desc.layers.len(), 2);
        let countries = &desc.layers[0];
        assert!(countries.active);
        assert_eq!(countries.styles, vec!["land".to_string()]);
        assert_eq!(countries.datasource.as_ref().unwrap().geometries.len(), 1);
        let hidden = &desc.layers[1];
        assert!(!hidden.active);
        assert_eq!(hidden.min_scale, Some(500.0));
        assert!(hidden.datasource.is_none());
    }

    #[test]
    fn scale_ranges_are_min_inclusive_max_exclusive() {
        let rule = Rule {
            min_scale: Some(100.0),
            max_scale: Some(200.0),
            symbolizers: vec![],
        };
        assert!(rule.visible_at(100.0));
        assert!(rule.visible_at(199.9));
        assert!(!rule.visible_at(200.0));
        assert!(!rule.visible_at(99.0));
    }

    #[test]
    fn rejects_malformed_documents() {
        assert!(parse_map("", None).is_err());
        assert!(parse_map("<Map><Layer name='a'></Map>", None).is_err());
        assert!(parse_map("<Style name='x'/>", None).is_err());
        assert!(parse_map(r#"<Map background-color="nope"/>"#, None).is_err());
        assert!(parse_map(r#"<Map><Layer/></Map>"#, None).is_err());
        assert!(parse_map(r#"<Map><Layer name="a" status="maybe"/></Map>"#, None).is_err());
    }

    #[test]
    fn rejects_bad_symbolizer_values() {
        let sheet = r#"<Map><Style name="s"><Rule><LineSymbolizer stroke-width="-1"/></Rule></Style></Map>"#;
        let err = parse_map(sheet, None).unwrap_err();
        assert!(err.contains("stroke-width"));
    }

    #[test]
    fn unsupported_datasource_type_is_an_error() {
        let sheet = r#"<Map><Layer name="roads"><Datasource>
            <Parameter name="type">shape</Parameter>
            <Parameter name="file">roads.shp</Parameter>
        </Datasource></Layer></Map>"#;
        let err = parse_map(sheet, None).unwrap_err();
        assert!(err.contains("roads"));
        assert!(err.contains("shape"));
    }

    #[test]
    fn file_datasource_resolves_against_base() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("data")).unwrap();
        std::fs::write(
            dir.path().join("data").join("line.geojson"),
            r#"{"type":"LineString","coordinates":[[0,0],[4,3]]}"#,
        )
        .unwrap();
        let sheet = r#"<Map><Layer name="l"><Datasource>
            <Parameter name="type">geojson</Parameter>
            <Parameter name="base">data</Parameter>
            <Parameter name="file">line.geojson</Parameter>
        </Datasource></Layer></Map>"#;
        let desc = parse_map(sheet, Some(dir.path())).unwrap();
        let ds = desc.layers[0].datasource.as_ref().unwrap();
        assert_eq!(ds.envelope, Some(BBox::new(0.0, 0.0, 4.0, 3.0)));

        assert!(parse_map(sheet, None).is_err());
    }
}
