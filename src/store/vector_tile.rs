use anyhow::Result;
use geo::{Geometry, LineString, Polygon};
use mvt::{GeomData, GeomEncoder, GeomType, Tile};
use serde_json::Value;

use crate::geom::TileCoord;
use crate::model::StoredFeature;
use super::TileRequest;

type Px = (f64, f64);

/// Clipping window in tile pixels, including the buffer around the tile.
#[derive(Debug, Clone, Copy)]
struct Window {
    min: f64,
    max: f64,
}

impl Window {
    fn new(extent: f64, buffer: f64) -> Self { Self { min: -buffer, max: extent + buffer } }

    #[inline]
    fn contains(&self, p: Px) -> bool {
        p.0 >= self.min && p.0 <= self.max && p.1 >= self.min && p.1 <= self.max
    }
}

/// Clip a polygon ring to the window using Sutherland-Hodgman.
fn clip_ring(ring: &[Px], window: Window) -> Vec<Px> {
    if ring.is_empty() {
        return Vec::new();
    }
    let (lo, hi) = (window.min, window.max);

    let mut output = ring.to_vec();
    output = clip_against_edge(&output, |p| p.0 >= lo, |p1, p2| {
        let t = (lo - p1.0) / (p2.0 - p1.0);
        (lo, p1.1 + t * (p2.1 - p1.1))
    });
    output = clip_against_edge(&output, |p| p.0 <= hi, |p1, p2| {
        let t = (hi - p1.0) / (p2.0 - p1.0);
        (hi, p1.1 + t * (p2.1 - p1.1))
    });
    output = clip_against_edge(&output, |p| p.1 >= lo, |p1, p2| {
        let t = (lo - p1.1) / (p2.1 - p1.1);
        (p1.0 + t * (p2.0 - p1.0), lo)
    });
    output = clip_against_edge(&output, |p| p.1 <= hi, |p1, p2| {
        let t = (hi - p1.1) / (p2.1 - p1.1);
        (p1.0 + t * (p2.0 - p1.0), hi)
    });
    output
}

/// Sutherland-Hodgman step: clip a closed ring against a single edge.
fn clip_against_edge<F, I>(ring: &[Px], inside: F, intersect: I) -> Vec<Px>
where
    F: Fn(&Px) -> bool,
    I: Fn(&Px, &Px) -> Px,
{
    let mut output = Vec::with_capacity(ring.len());
    for (i, current) in ring.iter().enumerate() {
        let next = &ring[(i + 1) % ring.len()];
        match (inside(current), inside(next)) {
            (true, true) => output.push(*next),
            (true, false) => output.push(intersect(current, next)),
            (false, true) => {
                output.push(intersect(current, next));
                output.push(*next);
            }
            (false, false) => {}
        }
    }
    output
}

/// Liang-Barsky: the part of segment a-b inside the window, if any.
fn clip_segment(a: Px, b: Px, window: Window) -> Option<(Px, Px)> {
    let (dx, dy) = (b.0 - a.0, b.1 - a.1);
    let (mut t0, mut t1) = (0.0_f64, 1.0_f64);
    let checks = [
        (-dx, a.0 - window.min),
        (dx, window.max - a.0),
        (-dy, a.1 - window.min),
        (dy, window.max - a.1),
    ];
    for (p, q) in checks {
        if p == 0.0 {
            if q < 0.0 { return None }
        } else {
            let r = q / p;
            if p < 0.0 { t0 = t0.max(r) } else { t1 = t1.min(r) }
            if t0 > t1 { return None }
        }
    }
    Some(((a.0 + t0 * dx, a.1 + t0 * dy), (a.0 + t1 * dx, a.1 + t1 * dy)))
}

/// Clip a polyline, splitting it wherever it leaves the window.
fn clip_line(line: &[Px], window: Window) -> Vec<Vec<Px>> {
    let mut parts: Vec<Vec<Px>> = Vec::new();
    let mut current: Vec<Px> = Vec::new();
    for pair in line.windows(2) {
        match clip_segment(pair[0], pair[1], window) {
            Some((start, end)) => {
                if current.last() != Some(&start) {
                    if current.len() >= 2 { parts.push(std::mem::take(&mut current)) }
                    current.clear();
                    current.push(start);
                }
                current.push(end);
            }
            None => {
                if current.len() >= 2 { parts.push(std::mem::take(&mut current)) }
                current.clear();
            }
        }
    }
    if current.len() >= 2 { parts.push(current) }
    parts
}

/// Snap to the integer grid and drop repeated points.
fn snap(points: impl IntoIterator<Item = Px>) -> Vec<Px> {
    let mut out: Vec<Px> = Vec::new();
    for (x, y) in points {
        let p = (x.round(), y.round());
        if out.last() != Some(&p) { out.push(p) }
    }
    out
}

/// Clean a ring: drop the closing duplicate and A-B-A backtracks; fewer than
/// three distinct points leaves nothing.
fn clean_ring(mut ring: Vec<Px>) -> Vec<Px> {
    if ring.len() > 1 && ring.first() == ring.last() {
        ring.pop();
    }
    let mut cleaned: Vec<Px> = Vec::with_capacity(ring.len());
    for p in ring {
        if cleaned.len() >= 2 && cleaned[cleaned.len() - 2] == p {
            cleaned.pop();
            continue;
        }
        cleaned.push(p);
    }
    if cleaned.len() < 3 { Vec::new() } else { cleaned }
}

/// Shoelace area in tile pixels; positive means clockwise since Y points down.
fn ring_signed_area(ring: &[Px]) -> f64 {
    let n = ring.len();
    (0..n).map(|i| {
        let (a, b) = (ring[i], ring[(i + 1) % n]);
        a.0 * b.1 - b.0 * a.1
    }).sum::<f64>() / 2.0
}

/// Outer rings clockwise, holes counter-clockwise.
fn ensure_winding_order(mut ring: Vec<Px>, is_hole: bool) -> Vec<Px> {
    let is_clockwise = ring_signed_area(&ring) > 0.0;
    if is_clockwise == is_hole { ring.reverse() }
    ring
}

struct Projector<'a> {
    coord: &'a TileCoord,
    extent: f64,
    window: Window,
}

impl Projector<'_> {
    fn line(&self, ls: &LineString<f64>) -> Vec<Px> {
        ls.coords().map(|c| self.coord.project(c.x, c.y, self.extent)).collect()
    }

    fn ring(&self, ring: &LineString<f64>, is_hole: bool) -> Option<Vec<Px>> {
        let clipped = clip_ring(&self.line(ring), self.window);
        let cleaned = clean_ring(snap(clipped));
        (!cleaned.is_empty()).then(|| ensure_winding_order(cleaned, is_hole))
    }

    /// Exterior first, then holes; nothing when the exterior is clipped away.
    fn polygon_rings(&self, poly: &Polygon<f64>) -> Vec<Vec<Px>> {
        let Some(exterior) = self.ring(poly.exterior(), false) else { return Vec::new() };
        let mut rings = vec![exterior];
        rings.extend(poly.interiors().iter().filter_map(|hole| self.ring(hole, true)));
        rings
    }

    fn line_parts(&self, ls: &LineString<f64>) -> Vec<Vec<Px>> {
        clip_line(&self.line(ls), self.window).into_iter()
            .map(snap)
            .filter(|part| part.len() >= 2)
            .collect()
    }

    fn points(&self, points: impl IntoIterator<Item = geo::Point<f64>>) -> Vec<Vec<Px>> {
        let kept: Vec<Px> = points.into_iter()
            .map(|p| self.coord.project(p.x(), p.y(), self.extent))
            .filter(|px| self.window.contains(*px))
            .map(|(x, y)| (x.round(), y.round()))
            .collect();
        if kept.is_empty() { Vec::new() } else { vec![kept] }
    }

    /// Encoded geometry, or `None` when nothing survives clipping.
    fn encode(&self, geometry: &Geometry<f64>) -> Result<Option<GeomData>> {
        let (geom_type, paths) = match geometry {
            Geometry::Point(p) => (GeomType::Point, self.points([*p])),
            Geometry::MultiPoint(mp) => (GeomType::Point, self.points(mp.iter().copied())),
            Geometry::LineString(ls) => (GeomType::Linestring, self.line_parts(ls)),
            Geometry::MultiLineString(mls) => {
                (GeomType::Linestring, mls.iter().flat_map(|ls| self.line_parts(ls)).collect())
            }
            Geometry::Polygon(poly) => (GeomType::Polygon, self.polygon_rings(poly)),
            Geometry::MultiPolygon(mp) => {
                (GeomType::Polygon, mp.iter().flat_map(|poly| self.polygon_rings(poly)).collect())
            }
            _ => return Ok(None),
        };
        if paths.is_empty() {
            return Ok(None);
        }

        // Points go out as one run; lines and rings each end with complete().
        let complete_paths = !matches!(geom_type, GeomType::Point);
        let mut encoder = GeomEncoder::new(geom_type);
        for path in paths {
            for (x, y) in path {
                encoder = encoder.point(x, y)?;
            }
            if complete_paths { encoder = encoder.complete()?; }
        }
        Ok(Some(encoder.encode()?))
    }
}

fn add_property(feature: &mut mvt::Feature, key: &str, value: &Value) {
    match value {
        Value::Null => {}
        Value::Bool(b) => feature.add_tag_bool(key, *b),
        Value::Number(n) => {
            if let Some(i) = n.as_i64() { feature.add_tag_sint(key, i) }
            else if let Some(u) = n.as_u64() { feature.add_tag_uint(key, u) }
            else if let Some(f) = n.as_f64() { feature.add_tag_double(key, f) }
        }
        Value::String(s) => feature.add_tag_string(key, s),
        other => feature.add_tag_string(key, &other.to_string()),
    }
}

/// Encode features (already simplified) into one MVT layer.
/// Returns an empty buffer when no feature survives clipping.
pub(super) fn encode_tile(features: &[StoredFeature], request: &TileRequest) -> Result<Vec<u8>> {
    if features.is_empty() {
        return Ok(Vec::new());
    }

    let extent = request.extent as f64;
    let projector = Projector {
        coord: &request.coord,
        extent,
        window: Window::new(extent, request.buffer as f64),
    };

    let mut tile = Tile::new(request.extent);
    let mut layer = tile.create_layer(&request.layer_name);
    let mut written = 0usize;

    for stored in features {
        let Some(geom_data) = projector.encode(&stored.geometry)? else { continue };
        let mut feature = layer.into_feature(geom_data);
        feature.set_id(stored.index as u64);
        for (key, value) in &stored.properties {
            add_property(&mut feature, key, value);
        }
        feature.add_tag_uint("feature_index", stored.index as u64);
        layer = feature.into_layer();
        written += 1;
    }

    if written == 0 {
        return Ok(Vec::new());
    }
    tile.add_layer(layer)?;
    Ok(tile.to_bytes()?)
}

#[cfg(test)]
mod tests {
    use super::*;

    const WINDOW: Window = Window { min: -256.0, max: 4352.0 };

    #[test]
    fn ring_fully_inside_is_unchanged() {
        let ring = vec![(10.0, 10.0), (100.0, 10.0), (100.0, 100.0), (10.0, 100.0)];
        assert_eq!(clip_ring(&ring, WINDOW).len(), 4);
    }

    #[test]
    fn ring_crossing_edge_is_cut() {
        let ring = vec![(-1000.0, 10.0), (100.0, 10.0), (100.0, 100.0), (-1000.0, 100.0)];
        let clipped = clip_ring(&ring, WINDOW);
        assert!(clipped.iter().all(|p| p.0 >= -256.0));
    }

    #[test]
    fn line_leaving_and_reentering_splits() {
        let line = vec![(0.0, 0.0), (5000.0, 0.0), (5000.0, 100.0), (0.0, 100.0)];
        let parts = clip_line(&line, WINDOW);
        assert_eq!(parts.len(), 2);
        assert!((parts[0][1].0 - 4352.0).abs() < 1e-9);
    }

    #[test]
    fn winding_is_normalized() {
        let ccw = vec![(0.0, 0.0), (0.0, 10.0), (10.0, 10.0), (10.0, 0.0)];
        assert!(ring_signed_area(&ccw) < 0.0);
        let outer = ensure_winding_order(ccw.clone(), false);
        assert!(ring_signed_area(&outer) > 0.0);
        let hole = ensure_winding_order(ccw, true);
        assert!(ring_signed_area(&hole) < 0.0);
    }

    #[test]
    fn backtracks_are_removed() {
        let ring = vec![(0.0, 0.0), (10.0, 0.0), (0.0, 0.0), (10.0, 10.0), (0.0, 10.0), (0.0, 0.0)];
        let cleaned = clean_ring(ring);
        assert_eq!(cleaned, vec![(0.0, 0.0), (10.0, 10.0), (0.0, 10.0)]);
    }
}
