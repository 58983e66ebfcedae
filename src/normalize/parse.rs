use geo::{Coord, Geometry, LineString, MultiLineString, MultiPoint, MultiPolygon, Point, Polygon};
use serde_json::{Map, Value};

use crate::error::{GeoError, Result};
use crate::geom::GeometryKind;

/// A feature after structural parsing, before any coordinate fix-ups.
#[derive(Debug, Clone)]
pub(crate) struct ParsedFeature {
    pub(crate) geometry: Geometry<f64>,
    pub(crate) kind: GeometryKind,
    pub(crate) properties: Map<String, Value>,
}

type Parse<T> = std::result::Result<T, String>;

fn type_of(value: &Value) -> Option<&str> { value.get("type").and_then(Value::as_str) }

/// Unwrap the top-level object into its list of raw features.
/// A bare Feature becomes a one-element list.
pub(crate) fn collection_features(root: Value) -> Result<Vec<Value>> {
    let Value::Object(mut object) = root else {
        return Err(GeoError::validation("GeoJSON root must be an object"));
    };
    let kind = object.get("type").and_then(Value::as_str).map(str::to_owned);
    match kind.as_deref() {
        Some("Feature") => Ok(vec![Value::Object(object)]),
        Some("FeatureCollection") => match object.remove("features") {
            Some(Value::Array(features)) if features.is_empty() => {
                Err(GeoError::validation("FeatureCollection has no features"))
            }
            Some(Value::Array(features)) => Ok(features),
            _ => Err(GeoError::validation("FeatureCollection `features` must be an array")),
        },
        Some(other) => Err(GeoError::validation(format!(
            "unsupported GeoJSON type {other}; expected Feature or FeatureCollection"
        ))),
        None => Err(GeoError::validation("GeoJSON root is missing `type`")),
    }
}

/// Parse one raw feature; errors carry the feature's index.
pub(crate) fn parse_feature(idx: usize, value: Value) -> Result<ParsedFeature> {
    let Value::Object(mut object) = value else {
        return Err(GeoError::at_feature(idx, "feature must be an object"));
    };
    match object.get("type").and_then(Value::as_str) {
        Some("Feature") => {}
        other => {
            return Err(GeoError::at_feature(idx, format!("expected type Feature, got {}", other.unwrap_or("nothing"))));
        }
    }

    let geometry = match object.get("geometry") {
        None | Some(Value::Null) => return Err(GeoError::at_feature(idx, "missing geometry")),
        Some(geometry) => geometry,
    };
    let (geometry, kind) = geometry_value(geometry).map_err(|msg| GeoError::at_feature(idx, msg))?;

    let properties = match object.remove("properties") {
        None | Some(Value::Null) => Map::new(),
        Some(Value::Object(map)) => map,
        Some(_) => return Err(GeoError::at_feature(idx, "properties must be an object or null")),
    };

    Ok(ParsedFeature { geometry, kind, properties })
}

/// Parse a caller-supplied GeoJSON geometry object.
pub fn parse_geometry(value: &Value) -> Result<Geometry<f64>> {
    geometry_value(value).map(|(geometry, _)| geometry).map_err(GeoError::validation)
}

fn geometry_value(value: &Value) -> Parse<(Geometry<f64>, GeometryKind)> {
    let name = type_of(value).ok_or("geometry must be an object with a `type`")?;
    let kind = GeometryKind::from_geojson(name)
        .ok_or_else(|| format!("unsupported geometry type {name}"))?;
    let coords = value.get("coordinates")
        .ok_or_else(|| format!("{name} is missing `coordinates`"))?;

    let geometry = match kind {
        GeometryKind::Point => Geometry::Point(Point(position(coords)?)),
        GeometryKind::LineString => Geometry::LineString(line(coords)?),
        GeometryKind::Polygon => Geometry::Polygon(polygon(coords)?),
        GeometryKind::MultiPoint => {
            let points = non_empty(coords, "MultiPoint")?.iter()
                .map(|c| position(c).map(Point))
                .collect::<Parse<Vec<_>>>()?;
            Geometry::MultiPoint(MultiPoint(points))
        }
        GeometryKind::MultiLineString => {
            let lines = non_empty(coords, "MultiLineString")?.iter()
                .map(line)
                .collect::<Parse<Vec<_>>>()?;
            Geometry::MultiLineString(MultiLineString(lines))
        }
        GeometryKind::MultiPolygon => {
            let polygons = non_empty(coords, "MultiPolygon")?.iter()
                .map(polygon)
                .collect::<Parse<Vec<_>>>()?;
            Geometry::MultiPolygon(MultiPolygon(polygons))
        }
    };
    Ok((geometry, kind))
}

fn non_empty<'a>(value: &'a Value, what: &str) -> Parse<&'a Vec<Value>> {
    match value.as_array() {
        Some(items) if !items.is_empty() => Ok(items),
        Some(_) => Err(format!("{what} coordinates are empty")),
        None => Err(format!("{what} coordinates must be an array")),
    }
}

/// A position is an array of at least two finite numbers; extra ordinates are dropped.
fn position(value: &Value) -> Parse<Coord<f64>> {
    let items = value.as_array()
        .filter(|items| items.len() >= 2)
        .ok_or("position must be an array of at least two numbers")?;
    let x = items[0].as_f64().ok_or("position components must be numbers")?;
    let y = items[1].as_f64().ok_or("position components must be numbers")?;
    if !x.is_finite() || !y.is_finite() {
        return Err(format!("position [{x}, {y}] is not finite"));
    }
    Ok(Coord { x, y })
}

fn positions(value: &Value, min: usize, what: &str) -> Parse<LineString<f64>> {
    let items = value.as_array().ok_or_else(|| format!("{what} must be an array of positions"))?;
    if items.len() < min {
        return Err(format!("{what} needs at least {min} positions, got {}", items.len()));
    }
    items.iter().map(position).collect::<Parse<Vec<_>>>().map(LineString)
}

fn line(value: &Value) -> Parse<LineString<f64>> { positions(value, 2, "LineString") }

fn polygon(value: &Value) -> Parse<Polygon<f64>> {
    let rings = non_empty(value, "Polygon")?;
    let mut rings = rings.iter().map(|ring| positions(ring, 4, "Polygon ring"));
    let exterior = rings.next().ok_or("Polygon has no rings")??;
    let interiors = rings.collect::<Parse<Vec<_>>>()?;
    Ok(Polygon::new(exterior, interiors))
}
