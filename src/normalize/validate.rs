use std::cell::{Cell, RefCell};

use geo::{Coord, CoordsIter, Geometry, MapCoordsInPlace};

use crate::error::{GeoError, Result};

/// Reject a feature whose vertex count exceeds `max`.
pub(super) fn check_vertex_budget(idx: usize, geometry: &Geometry<f64>, max: usize) -> Result<()> {
    let vertices = geometry.coords_count();
    if vertices > max {
        return Err(GeoError::at_feature(idx, format!("{vertices} vertices exceeds the limit of {max}")));
    }
    Ok(())
}

/// Clamp `value` into `[-limit, limit]` when it overshoots by at most `tolerance`.
fn clamp_axis(value: f64, limit: f64, tolerance: f64) -> Option<f64> {
    if value.abs() <= limit { Some(value) }
    else if value.abs() <= limit + tolerance { Some(limit.copysign(value)) }
    else { None }
}

fn clamp_coord(idx: usize, c: Coord<f64>, tolerance: f64) -> Result<Coord<f64>> {
    if !c.x.is_finite() || !c.y.is_finite() {
        return Err(GeoError::at_feature(idx, format!("coordinate ({}, {}) is not finite", c.x, c.y)));
    }
    let x = clamp_axis(c.x, 180.0, tolerance)
        .ok_or_else(|| GeoError::at_feature(idx, format!("longitude {} out of range [-180, 180]", c.x)))?;
    let y = clamp_axis(c.y, 90.0, tolerance)
        .ok_or_else(|| GeoError::at_feature(idx, format!("latitude {} out of range [-90, 90]", c.y)))?;
    Ok(Coord { x, y })
}

/// Check every coordinate against the lon/lat range, clamping those inside the
/// tolerance band. Returns the number of clamped coordinates.
pub(super) fn check_coordinates(idx: usize, geometry: &mut Geometry<f64>, tolerance: f64) -> Result<usize> {
    let clamped = Cell::new(0usize);
    let failure: RefCell<Option<GeoError>> = RefCell::new(None);
    geometry.map_coords_in_place(|c: Coord<f64>| {
        if failure.borrow().is_some() { return c }
        match clamp_coord(idx, c, tolerance) {
            Ok(fixed) => {
                if fixed != c { clamped.set(clamped.get() + 1) }
                fixed
            }
            Err(err) => {
                failure.replace(Some(err));
                c
            }
        }
    });
    if let Some(err) = failure.into_inner() { return Err(err) }
    Ok(clamped.get())
}

#[cfg(test)]
mod tests {
    use super::*;
    use geo::{line_string, point};

    #[test]
    fn clamps_within_band() {
        let mut g = Geometry::LineString(line_string![(x: 180.0005, y: 10.0), (x: 10.0, y: -90.0002)]);
        assert_eq!(check_coordinates(0, &mut g, 1e-3).unwrap(), 2);
        assert_eq!(g, Geometry::LineString(line_string![(x: 180.0, y: 10.0), (x: 10.0, y: -90.0)]));
    }

    #[test]
    fn rejects_beyond_band() {
        let mut g = Geometry::Point(point!(x: 181.0, y: 10.0));
        let err = check_coordinates(4, &mut g, 1e-3).unwrap_err();
        assert_eq!(err.feature(), Some(4));
        assert!(err.to_string().contains("181"));
    }

    #[test]
    fn first_failure_wins_and_geometry_is_untouched() {
        let original = Geometry::LineString(line_string![(x: 0.0, y: 0.0), (x: 200.0, y: 0.0), (x: 0.0, y: 95.0)]);
        let mut g = original.clone();
        let err = check_coordinates(1, &mut g, 1e-3).unwrap_err();
        assert!(err.to_string().contains("longitude 200"), "{err}");
        assert_eq!(g, original);
    }

    #[test]
    fn vertex_budget() {
        let g = Geometry::LineString(line_string![(x: 0.0, y: 0.0), (x: 1.0, y: 1.0), (x: 2.0, y: 2.0)]);
        assert!(check_vertex_budget(0, &g, 3).is_ok());
        assert!(check_vertex_budget(0, &g, 2).is_err());
    }
}
