use geo::line_intersection::{line_intersection, LineIntersection};
use geo::{Area, CoordsIter, Geometry, Line, LineString, Polygon, Simplify};
use rstar::primitives::{GeomWithData, Rectangle};
use rstar::{RTree, AABB};
use tracing::debug;

/// Total vertices across every ring and part of a geometry.
#[inline]
pub fn vertex_count(geometry: &Geometry<f64>) -> usize { geometry.coords_count() }

fn line_ok(ls: &LineString<f64>) -> bool { ls.0.len() >= 2 }

fn polygon_ok(poly: &Polygon<f64>) -> bool {
    poly.exterior().0.len() >= 4
        && poly.interiors().iter().all(|ring| ring.0.len() >= 4)
        && poly.unsigned_area() > 0.0
        && rings_are_simple(poly)
}

/// One ring edge: (ring, position in ring, edges in ring).
struct Edge {
    line: Line<f64>,
    ring: usize,
    pos: usize,
    len: usize,
}

impl Edge {
    fn adjacent(&self, other: &Edge) -> bool {
        if self.ring != other.ring { return false }
        let (lo, hi) = (self.pos.min(other.pos), self.pos.max(other.pos));
        hi - lo == 1 || (lo == 0 && hi + 1 == self.len)
    }
}

fn segment_box(line: &Line<f64>) -> ([f64; 2], [f64; 2]) {
    (
        [line.start.x.min(line.end.x), line.start.y.min(line.end.y)],
        [line.start.x.max(line.end.x), line.start.y.max(line.end.y)],
    )
}

/// No two ring edges of the polygon cross or overlap, apart from neighbours
/// sharing their common vertex.
fn rings_are_simple(poly: &Polygon<f64>) -> bool {
    let edges: Vec<Edge> = std::iter::once(poly.exterior())
        .chain(poly.interiors())
        .enumerate()
        .flat_map(|(ring, ls)| {
            let len = ls.0.len().saturating_sub(1);
            ls.lines().enumerate().map(move |(pos, line)| Edge { line, ring, pos, len })
        })
        .collect();

    let tree = RTree::bulk_load(
        edges.iter()
            .enumerate()
            .map(|(i, e)| {
                let (min, max) = segment_box(&e.line);
                GeomWithData::new(Rectangle::from_corners(min, max), i)
            })
            .collect(),
    );

    for (i, edge) in edges.iter().enumerate() {
        let (min, max) = segment_box(&edge.line);
        for cand in tree.locate_in_envelope_intersecting(&AABB::from_corners(min, max)) {
            let j = cand.data;
            if j <= i { continue }
            match line_intersection(edge.line, edges[j].line) {
                None => {}
                Some(LineIntersection::SinglePoint { is_proper: false, .. }) if edge.adjacent(&edges[j]) => {}
                Some(_) => return false,
            }
        }
    }
    true
}

/// Whether simplification left a well-formed geometry of the same kind.
fn is_well_formed(geometry: &Geometry<f64>) -> bool {
    match geometry {
        Geometry::LineString(ls) => line_ok(ls),
        Geometry::MultiLineString(mls) => !mls.0.is_empty() && mls.iter().all(line_ok),
        Geometry::Polygon(poly) => polygon_ok(poly),
        Geometry::MultiPolygon(mp) => !mp.0.is_empty() && mp.iter().all(polygon_ok),
        _ => true,
    }
}

/// Douglas-Peucker simplification with a distance tolerance in degrees: every
/// dropped vertex lies within `tolerance` of the kept outline. Points are
/// returned unchanged; a collapsed line or a polygon whose rings collapse or
/// cross keeps the input.
pub fn simplify_preserving(geometry: &Geometry<f64>, tolerance: f64) -> Geometry<f64> {
    if tolerance <= 0.0 { return geometry.clone() }

    let simplified = match geometry {
        Geometry::LineString(ls) => Geometry::LineString(ls.simplify(&tolerance)),
        Geometry::MultiLineString(mls) => Geometry::MultiLineString(mls.simplify(&tolerance)),
        Geometry::Polygon(poly) => Geometry::Polygon(poly.simplify(&tolerance)),
        Geometry::MultiPolygon(mp) => Geometry::MultiPolygon(mp.simplify(&tolerance)),
        other => return other.clone(),
    };

    if is_well_formed(&simplified) { simplified }
    else {
        debug!("[simplify] degenerate result at tolerance {tolerance}, keeping original geometry");
        geometry.clone()
    }
}
