use std::fmt;

use geo::Geometry;
use serde::{Deserialize, Serialize};

/// Geometry kinds accepted for storage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum GeometryKind {
    Point,
    LineString,
    Polygon,
    MultiPoint,
    MultiLineString,
    MultiPolygon,
}

impl GeometryKind {
    pub const ALL: [GeometryKind; 6] = [
        GeometryKind::Point,
        GeometryKind::LineString,
        GeometryKind::Polygon,
        GeometryKind::MultiPoint,
        GeometryKind::MultiLineString,
        GeometryKind::MultiPolygon,
    ];

    /// GeoJSON / WKT spelling of the kind.
    pub fn to_str(&self) -> &'static str {
        match self {
            GeometryKind::Point => "Point",
            GeometryKind::LineString => "LineString",
            GeometryKind::Polygon => "Polygon",
            GeometryKind::MultiPoint => "MultiPoint",
            GeometryKind::MultiLineString => "MultiLineString",
            GeometryKind::MultiPolygon => "MultiPolygon",
        }
    }

    pub fn from_geojson(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.to_str() == name)
    }

    /// Kind of a `geo` geometry, if it is one of the supported six.
    pub fn of(geometry: &Geometry<f64>) -> Option<Self> {
        match geometry {
            Geometry::Point(_) => Some(GeometryKind::Point),
            Geometry::LineString(_) => Some(GeometryKind::LineString),
            Geometry::Polygon(_) => Some(GeometryKind::Polygon),
            Geometry::MultiPoint(_) => Some(GeometryKind::MultiPoint),
            Geometry::MultiLineString(_) => Some(GeometryKind::MultiLineString),
            Geometry::MultiPolygon(_) => Some(GeometryKind::MultiPolygon),
            _ => None,
        }
    }

    /// Point kinds are never simplified.
    #[inline]
    pub fn is_simplifiable(&self) -> bool {
        !matches!(self, GeometryKind::Point | GeometryKind::MultiPoint)
    }
}

impl fmt::Display for GeometryKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.write_str(self.to_str()) }
}

/// Dominant kind of a layer: the single kind present, or `Mixed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LayerKind {
    Point,
    LineString,
    Polygon,
    MultiPoint,
    MultiLineString,
    MultiPolygon,
    Mixed,
}

impl LayerKind {
    pub fn to_str(&self) -> &'static str {
        match self {
            LayerKind::Point => "point",
            LayerKind::LineString => "linestring",
            LayerKind::Polygon => "polygon",
            LayerKind::MultiPoint => "multipoint",
            LayerKind::MultiLineString => "multilinestring",
            LayerKind::MultiPolygon => "multipolygon",
            LayerKind::Mixed => "mixed",
        }
    }

    pub fn parse(name: &str) -> Option<Self> {
        match name.to_ascii_lowercase().as_str() {
            "point" => Some(LayerKind::Point),
            "linestring" => Some(LayerKind::LineString),
            "polygon" => Some(LayerKind::Polygon),
            "multipoint" => Some(LayerKind::MultiPoint),
            "multilinestring" => Some(LayerKind::MultiLineString),
            "multipolygon" => Some(LayerKind::MultiPolygon),
            "mixed" => Some(LayerKind::Mixed),
            _ => None,
        }
    }

    /// Layer kind for a set of present geometry kinds.
    pub fn from_kinds(kinds: &[GeometryKind]) -> Self {
        match kinds {
            [single] => (*single).into(),
            _ => LayerKind::Mixed,
        }
    }

    #[inline]
    pub fn is_multipolygon(&self) -> bool { matches!(self, LayerKind::MultiPolygon) }
}

impl From<GeometryKind> for LayerKind {
    fn from(kind: GeometryKind) -> Self {
        match kind {
            GeometryKind::Point => LayerKind::Point,
            GeometryKind::LineString => LayerKind::LineString,
            GeometryKind::Polygon => LayerKind::Polygon,
            GeometryKind::MultiPoint => LayerKind::MultiPoint,
            GeometryKind::MultiLineString => LayerKind::MultiLineString,
            GeometryKind::MultiPolygon => LayerKind::MultiPolygon,
        }
    }
}

impl fmt::Display for LayerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.write_str(self.to_str()) }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_kind_is_dominant() {
        assert_eq!(LayerKind::from_kinds(&[GeometryKind::MultiPolygon]), LayerKind::MultiPolygon);
        assert_eq!(
            LayerKind::from_kinds(&[GeometryKind::Point, GeometryKind::Polygon]),
            LayerKind::Mixed
        );
        assert_eq!(LayerKind::from_kinds(&[]), LayerKind::Mixed);
    }

    #[test]
    fn names_round_trip() {
        for kind in GeometryKind::ALL {
            assert_eq!(GeometryKind::from_geojson(kind.to_str()), Some(kind));
            let layer: LayerKind = kind.into();
            assert_eq!(LayerKind::parse(layer.to_str()), Some(layer));
        }
        assert_eq!(GeometryKind::from_geojson("GeometryCollection"), None);
    }
}
