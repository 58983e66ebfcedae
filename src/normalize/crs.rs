use std::cell::RefCell;

use anyhow::Context;
use geo::{Coord, Geometry, MapCoordsInPlace};
use proj4rs::{proj::Proj as Proj4, transform::transform};

use crate::config::ProjectedZone;
use crate::error::{GeoError, Result};
use super::parse::ParsedFeature;

const GEOGRAPHIC_PROJ4: &str = "+proj=longlat +datum=WGS84 +no_defs +type=crs";

/// First position of a geometry in coordinate order.
pub(super) fn first_coord(geometry: &Geometry<f64>) -> Option<Coord<f64>> {
    match geometry {
        Geometry::Point(p) => Some(p.0),
        Geometry::LineString(ls) => ls.0.first().copied(),
        Geometry::Polygon(poly) => poly.exterior().0.first().copied(),
        Geometry::MultiPoint(mp) => mp.0.first().map(|p| p.0),
        Geometry::MultiLineString(mls) => mls.0.first().and_then(|ls| ls.0.first().copied()),
        Geometry::MultiPolygon(mp) => mp.0.first().and_then(|poly| poly.exterior().0.first().copied()),
        _ => None,
    }
}

/// A coordinate is projected when either component exceeds the angular range by a wide margin.
#[inline]
pub(super) fn is_projected(c: Coord<f64>, threshold: f64) -> bool {
    c.x.abs() > threshold || c.y.abs() > threshold
}

/// First candidate zone whose magnitude bands contain the sample.
pub(super) fn match_zone(zones: &[ProjectedZone], c: Coord<f64>) -> Option<&ProjectedZone> {
    zones.iter().find(|zone| zone.contains(c.x, c.y))
}

/// Reproject every coordinate of every feature from `zone` into lon/lat degrees.
pub(super) fn reproject(features: &mut [ParsedFeature], zone: &ProjectedZone) -> Result<()> {
    let from = Proj4::from_proj_string(&zone.proj4)
        .with_context(|| format!("[reproject] failed to build source PROJ.4 for {}: {}", zone.code, zone.proj4))?;
    let to = Proj4::from_proj_string(GEOGRAPHIC_PROJ4)
        .with_context(|| format!("[reproject] failed to build target PROJ.4: {GEOGRAPHIC_PROJ4}"))?;

    for (idx, feature) in features.iter_mut().enumerate() {
        let failure: RefCell<Option<GeoError>> = RefCell::new(None);
        // Meters in, radians out. After the first failure the rest pass through untouched.
        feature.geometry.map_coords_in_place(|c: Coord<f64>| {
            if failure.borrow().is_some() { return c }
            let mut point = (c.x, c.y, 0.0);
            match transform(&from, &to, &mut point) {
                Ok(()) => Coord { x: point.0.to_degrees(), y: point.1.to_degrees() },
                Err(e) => {
                    failure.replace(Some(GeoError::at_feature(
                        idx,
                        format!("cannot reproject ({}, {}) from {}: {e:?}", c.x, c.y, zone.code),
                    )));
                    c
                }
            }
        });
        if let Some(err) = failure.into_inner() { return Err(err) }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::NormalizerConfig;
    use crate::geom::GeometryKind;
    use geo::point;
    use serde_json::Map;

    #[test]
    fn classifies_by_easting() {
        let zones = NormalizerConfig::default().projected_zones;
        let west = match_zone(&zones, Coord { x: 300_000.0, y: 3_500_000.0 }).unwrap();
        let east = match_zone(&zones, Coord { x: 700_000.0, y: 3_500_000.0 }).unwrap();
        assert_eq!(west.code, "EPSG:32615");
        assert_eq!(east.code, "EPSG:32616");
        assert!(match_zone(&zones, Coord { x: 2_000_000.0, y: 3_500_000.0 }).is_none());
    }

    #[test]
    fn reprojects_utm_to_degrees() {
        let zones = NormalizerConfig::default().projected_zones;
        // Central meridian of zone 15 is -93 degrees.
        let mut features = vec![ParsedFeature {
            geometry: Geometry::Point(point!(x: 500_000.0, y: 3_320_000.0)),
            kind: GeometryKind::Point,
            properties: Map::new(),
        }];
        reproject(&mut features, &zones[0]).unwrap();
        let c = first_coord(&features[0].geometry).unwrap();
        assert!((c.x + 93.0).abs() < 1e-6, "lon {}", c.x);
        assert!(c.y > 29.0 && c.y < 31.0, "lat {}", c.y);
    }
}
