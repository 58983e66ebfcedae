use geo::{BoundingRect, Coord, Geometry, Point, Polygon, Rect};
use rstar::{RTreeObject, AABB};
use serde::{Deserialize, Serialize};

use crate::error::{GeoError, Result};

/// Axis-aligned lon/lat rectangle, serialized as `[min_lon, min_lat, max_lon, max_lat]`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(into = "[f64; 4]", from = "[f64; 4]")]
pub struct Bounds {
    pub min_lon: f64,
    pub min_lat: f64,
    pub max_lon: f64,
    pub max_lat: f64,
}

impl Bounds {
    /// Validated query rectangle: lon within [-180,180], lat within [-90,90], min < max.
    pub fn new(min_lon: f64, min_lat: f64, max_lon: f64, max_lat: f64) -> Result<Self> {
        let values = [min_lon, min_lat, max_lon, max_lat];
        if values.iter().any(|v| !v.is_finite()) {
            return Err(GeoError::validation("bounding box values must be finite numbers"));
        }
        if !(-180.0..=180.0).contains(&min_lon) || !(-180.0..=180.0).contains(&max_lon) {
            return Err(GeoError::validation("longitude must be between -180 and 180"));
        }
        if !(-90.0..=90.0).contains(&min_lat) || !(-90.0..=90.0).contains(&max_lat) {
            return Err(GeoError::validation("latitude must be between -90 and 90"));
        }
        if min_lon >= max_lon || min_lat >= max_lat {
            return Err(GeoError::validation("bounding box minimum must be less than maximum"));
        }
        Ok(Self { min_lon, min_lat, max_lon, max_lat })
    }

    /// Unchecked constructor for envelopes computed from data.
    #[inline]
    pub fn from_corners(min_lon: f64, min_lat: f64, max_lon: f64, max_lat: f64) -> Self {
        Self { min_lon, min_lat, max_lon, max_lat }
    }

    #[inline]
    pub fn from_rect(rect: Rect<f64>) -> Self {
        Self::from_corners(rect.min().x, rect.min().y, rect.max().x, rect.max().y)
    }

    pub fn of_geometry(geometry: &Geometry<f64>) -> Option<Self> {
        geometry.bounding_rect().map(Self::from_rect)
    }

    /// Envelope of every geometry yielded, or `None` when nothing has coordinates.
    pub fn union_all<'a>(geometries: impl IntoIterator<Item = &'a Geometry<f64>>) -> Option<Self> {
        geometries.into_iter()
            .filter_map(Self::of_geometry)
            .reduce(|acc, b| acc.union(&b))
    }

    #[inline]
    pub fn to_rect(&self) -> Rect<f64> {
        Rect::new(
            Coord { x: self.min_lon, y: self.min_lat },
            Coord { x: self.max_lon, y: self.max_lat },
        )
    }

    #[inline]
    pub fn to_array(&self) -> [f64; 4] { [self.min_lon, self.min_lat, self.max_lon, self.max_lat] }

    #[inline]
    pub fn to_polygon(&self) -> Polygon<f64> { self.to_rect().to_polygon() }

    #[inline]
    pub fn to_aabb(&self) -> AABB<[f64; 2]> {
        AABB::from_corners([self.min_lon, self.min_lat], [self.max_lon, self.max_lat])
    }

    #[inline]
    pub fn width(&self) -> f64 { self.max_lon - self.min_lon }

    #[inline]
    pub fn height(&self) -> f64 { self.max_lat - self.min_lat }

    #[inline]
    pub fn center(&self) -> Point<f64> {
        Point::new((self.min_lon + self.max_lon) / 2.0, (self.min_lat + self.max_lat) / 2.0)
    }

    pub fn union(&self, other: &Bounds) -> Bounds {
        Bounds {
            min_lon: self.min_lon.min(other.min_lon),
            min_lat: self.min_lat.min(other.min_lat),
            max_lon: self.max_lon.max(other.max_lon),
            max_lat: self.max_lat.max(other.max_lat),
        }
    }

    pub fn intersects(&self, other: &Bounds) -> bool {
        self.min_lon <= other.max_lon && other.min_lon <= self.max_lon
            && self.min_lat <= other.max_lat && other.min_lat <= self.max_lat
    }

    /// Whether `other` lies inside this rectangle, allowing `slack` degrees.
    pub fn contains(&self, other: &Bounds, slack: f64) -> bool {
        other.min_lon >= self.min_lon - slack && other.max_lon <= self.max_lon + slack
            && other.min_lat >= self.min_lat - slack && other.max_lat <= self.max_lat + slack
    }

    #[inline]
    pub fn is_point(&self) -> bool { self.width() == 0.0 && self.height() == 0.0 }

    /// A line envelope has zero extent along exactly one axis.
    #[inline]
    pub fn is_line(&self) -> bool { !self.is_point() && (self.width() == 0.0 || self.height() == 0.0) }

    pub fn buffered(&self, distance: f64) -> Bounds {
        Bounds {
            min_lon: self.min_lon - distance,
            min_lat: self.min_lat - distance,
            max_lon: self.max_lon + distance,
            max_lat: self.max_lat + distance,
        }
    }

    /// Expand a degenerate envelope so that it always covers an area.
    pub fn with_area(&self, line_buffer: f64, point_buffer: f64) -> Bounds {
        if self.is_point() { self.buffered(point_buffer) }
        else if self.is_line() { self.buffered(line_buffer) }
        else { *self }
    }
}

impl From<Bounds> for [f64; 4] {
    fn from(bounds: Bounds) -> Self { bounds.to_array() }
}

impl From<[f64; 4]> for Bounds {
    fn from([min_lon, min_lat, max_lon, max_lat]: [f64; 4]) -> Self {
        Bounds::from_corners(min_lon, min_lat, max_lon, max_lat)
    }
}

/// A feature envelope in an R-tree, associated with a stored feature by position.
#[derive(Debug, Clone)]
pub(crate) struct FeatureEnvelope {
    pos: usize, // Position of the feature in its layer's feature list
    bbox: Rect<f64>,
}

impl FeatureEnvelope {
    pub(crate) fn new(pos: usize, bbox: Rect<f64>) -> Self {
        Self { pos, bbox }
    }

    /// Position of the corresponding feature.
    pub(crate) fn pos(&self) -> usize { self.pos }
}

impl RTreeObject for FeatureEnvelope {
    type Envelope = AABB<[f64; 2]>;

    fn envelope(&self) -> Self::Envelope {
        AABB::from_corners(self.bbox.min().into(), self.bbox.max().into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use geo::{line_string, point};

    #[test]
    fn rejects_inverted_and_out_of_range() {
        assert!(Bounds::new(-10.0, -10.0, 10.0, 10.0).is_ok());
        assert!(Bounds::new(10.0, -10.0, -10.0, 10.0).is_err());
        assert!(Bounds::new(-10.0, -10.0, -10.0, 10.0).is_err());
        assert!(Bounds::new(-181.0, -10.0, 10.0, 10.0).is_err());
        assert!(Bounds::new(-10.0, -91.0, 10.0, 10.0).is_err());
    }

    #[test]
    fn degenerate_envelopes_get_area() {
        let point = Geometry::Point(point!(x: 1.0, y: 2.0));
        let b = Bounds::of_geometry(&point).unwrap().with_area(1e-4, 1e-3);
        assert!((b.width() - 2e-3).abs() < 1e-12);

        let line = Geometry::LineString(line_string![(x: 0.0, y: 0.0), (x: 0.0, y: 1.0)]);
        let b = Bounds::of_geometry(&line).unwrap().with_area(1e-4, 1e-3);
        assert!((b.width() - 2e-4).abs() < 1e-12);
        assert!((b.height() - (1.0 + 2e-4)).abs() < 1e-12);
    }

    #[test]
    fn serializes_as_array() {
        let b = Bounds::from_corners(1.0, 2.0, 3.0, 4.0);
        assert_eq!(serde_json::to_string(&b).unwrap(), "[1.0,2.0,3.0,4.0]");
    }
}
