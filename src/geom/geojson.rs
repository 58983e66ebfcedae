use geo::{Coord, Geometry, LineString, Polygon};
use serde_json::{json, Value};

#[inline]
fn position(c: &Coord<f64>) -> Value { json!([c.x, c.y]) }

fn positions(ls: &LineString<f64>) -> Value {
    Value::Array(ls.coords().map(position).collect())
}

fn rings(poly: &Polygon<f64>) -> Value {
    let mut out = vec![positions(poly.exterior())];
    out.extend(poly.interiors().iter().map(positions));
    Value::Array(out)
}

/// Encode a geometry as a GeoJSON geometry object.
/// Kinds outside the six supported ones encode as `null`.
pub fn geometry_to_geojson(geometry: &Geometry<f64>) -> Value {
    let (kind, coordinates) = match geometry {
        Geometry::Point(p) => ("Point", position(&p.0)),
        Geometry::LineString(ls) => ("LineString", positions(ls)),
        Geometry::Polygon(poly) => ("Polygon", rings(poly)),
        Geometry::MultiPoint(mp) => ("MultiPoint", Value::Array(mp.iter().map(|p| position(&p.0)).collect())),
        Geometry::MultiLineString(mls) => ("MultiLineString", Value::Array(mls.iter().map(positions).collect())),
        Geometry::MultiPolygon(mp) => ("MultiPolygon", Value::Array(mp.iter().map(rings).collect())),
        _ => return Value::Null,
    };
    json!({ "type": kind, "coordinates": coordinates })
}
