use std::fmt::Write;
use std::str::FromStr;

use anyhow::{anyhow, Result};
use geo::{Coord, Geometry, LineString, Polygon};

use crate::error::GeoError;

fn write_coord(out: &mut String, c: &Coord<f64>) {
    let _ = write!(out, "{} {}", c.x, c.y);
}

fn write_joined<T>(out: &mut String, items: impl IntoIterator<Item = T>, mut each: impl FnMut(&mut String, T)) {
    out.push('(');
    for (i, item) in items.into_iter().enumerate() {
        if i > 0 { out.push_str(", "); }
        each(out, item);
    }
    out.push(')');
}

fn write_line(out: &mut String, ls: &LineString<f64>) {
    write_joined(out, ls.coords(), write_coord);
}

fn write_polygon(out: &mut String, poly: &Polygon<f64>) {
    write_joined(out, std::iter::once(poly.exterior()).chain(poly.interiors()), write_line);
}

/// Canonical WKT for one of the six supported geometry kinds.
pub fn to_wkt(geometry: &Geometry<f64>) -> Result<String, GeoError> {
    let mut out = String::new();
    match geometry {
        Geometry::Point(p) => {
            out.push_str("POINT(");
            write_coord(&mut out, &p.0);
            out.push(')');
        }
        Geometry::LineString(ls) => {
            out.push_str("LINESTRING");
            write_line(&mut out, ls);
        }
        Geometry::Polygon(poly) => {
            out.push_str("POLYGON");
            write_polygon(&mut out, poly);
        }
        Geometry::MultiPoint(mp) => {
            out.push_str("MULTIPOINT");
            write_joined(&mut out, mp.iter(), |out, p| {
                out.push('(');
                write_coord(out, &p.0);
                out.push(')');
            });
        }
        Geometry::MultiLineString(mls) => {
            out.push_str("MULTILINESTRING");
            write_joined(&mut out, mls.iter(), write_line);
        }
        Geometry::MultiPolygon(mp) => {
            out.push_str("MULTIPOLYGON");
            write_joined(&mut out, mp.iter(), write_polygon);
        }
        other => {
            return Err(GeoError::validation(format!("cannot encode {other:?} as WKT")));
        }
    }
    Ok(out)
}

/// Parse WKT (as returned by a datastore) into a `geo` geometry.
pub fn parse_wkt(text: &str) -> Result<Geometry<f64>> {
    let parsed = ::wkt::Wkt::<f64>::from_str(text)
        .map_err(|e| anyhow!("[parse_wkt] invalid WKT: {e:?}"))?;
    parsed.try_into()
        .map_err(|e: ::wkt::conversion::Error| anyhow!("[parse_wkt] unsupported WKT geometry: {e:?}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use geo::{line_string, point, polygon, MultiPoint, MultiPolygon};

    #[test]
    fn encodes_each_kind() {
        let p = Geometry::Point(point!(x: -99.5, y: 19.25));
        assert_eq!(to_wkt(&p).unwrap(), "POINT(-99.5 19.25)");

        let ls = Geometry::LineString(line_string![(x: 0.0, y: 0.0), (x: 1.5, y: 2.0)]);
        assert_eq!(to_wkt(&ls).unwrap(), "LINESTRING(0 0, 1.5 2)");

        let poly = polygon![(x: 0.0, y: 0.0), (x: 1.0, y: 0.0), (x: 1.0, y: 1.0)];
        assert_eq!(to_wkt(&Geometry::Polygon(poly.clone())).unwrap(), "POLYGON((0 0, 1 0, 1 1, 0 0))");

        let mp = Geometry::MultiPoint(MultiPoint(vec![point!(x: 1.0, y: 2.0), point!(x: 3.0, y: 4.0)]));
        assert_eq!(to_wkt(&mp).unwrap(), "MULTIPOINT((1 2), (3 4))");

        let mpoly = Geometry::MultiPolygon(MultiPolygon(vec![poly]));
        assert_eq!(to_wkt(&mpoly).unwrap(), "MULTIPOLYGON(((0 0, 1 0, 1 1, 0 0)))");
    }

    #[test]
    fn parses_what_it_writes() {
        let poly = polygon![(x: 0.0, y: 0.0), (x: 2.0, y: 0.0), (x: 2.0, y: 2.0), (x: 0.0, y: 2.0)];
        let geometry = Geometry::MultiPolygon(MultiPolygon(vec![poly]));
        let parsed = parse_wkt(&to_wkt(&geometry).unwrap()).unwrap();
        assert_eq!(parsed, geometry);
    }

    #[test]
    fn rejects_garbage() {
        assert!(parse_wkt("POLYGON((0 0, 1").is_err());
    }
}
