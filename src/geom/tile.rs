use std::f64::consts::PI;

use crate::error::{GeoError, Result};
use super::Bounds;

pub const MAX_ZOOM: u8 = 22;

/// Latitude where the square tile pyramid ends.
const MAX_MERCATOR_LAT: f64 = 85.051_128_779_806_59;

/// Lon/lat degrees to spherical-mercator radians, latitude held inside the pyramid.
#[inline]
fn to_mercator(lon: f64, lat: f64) -> (f64, f64) {
    let lat = lat.clamp(-MAX_MERCATOR_LAT, MAX_MERCATOR_LAT).to_radians();
    (lon.to_radians(), (PI / 4.0 + lat / 2.0).tan().ln())
}

#[inline]
fn from_mercator(x: f64, y: f64) -> (f64, f64) {
    (x.to_degrees(), (2.0 * y.exp().atan() - PI / 2.0).to_degrees())
}

/// A (zoom, x, y) address in the web-map tile pyramid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TileCoord {
    z: u8,
    x: u32,
    y: u32,
}

impl TileCoord {
    /// Valid when `z <= 22` and `x, y < 2^z`.
    pub fn new(z: u8, x: u32, y: u32) -> Result<Self> {
        if z > MAX_ZOOM {
            return Err(GeoError::validation(format!("zoom {z} outside 0..={MAX_ZOOM}")));
        }
        let n = 1u64 << z;
        if u64::from(x) >= n || u64::from(y) >= n {
            return Err(GeoError::validation(format!("tile ({x}, {y}) outside the {n}x{n} grid at zoom {z}")));
        }
        Ok(Self { z, x, y })
    }

    #[inline] pub fn z(&self) -> u8 { self.z }
    #[inline] pub fn x(&self) -> u32 { self.x }
    #[inline] pub fn y(&self) -> u32 { self.y }

    /// Side of the tile in mercator radians.
    #[inline]
    fn span(&self) -> f64 { 2.0 * PI / f64::from(1u32 << self.z) }

    /// North-west corner in mercator radians.
    #[inline]
    fn origin(&self) -> (f64, f64) {
        let span = self.span();
        (-PI + f64::from(self.x) * span, PI - f64::from(self.y) * span)
    }

    /// Lon/lat rectangle a query must cover to fill the tile.
    pub fn envelope(&self) -> Bounds {
        let (west, north) = self.origin();
        let span = self.span();
        let (min_lon, min_lat) = from_mercator(west, north - span);
        let (max_lon, max_lat) = from_mercator(west + span, north);
        Bounds::from_corners(min_lon, min_lat, max_lon, max_lat)
    }

    /// Lon/lat to tile pixels with the origin at the north-west corner. Features
    /// beyond the tile land outside [0, extent] and are clipped by the encoder.
    pub fn project(&self, lon: f64, lat: f64, extent: f64) -> (f64, f64) {
        let (west, north) = self.origin();
        let scale = extent / self.span();
        let (x, y) = to_mercator(lon, lat);
        ((x - west) * scale, (north - y) * scale)
    }
}

/// Simplification tolerance (degrees) applied to tile geometries at a zoom level.
pub fn tolerance_for_zoom(z: u8) -> f64 {
    match z {
        14.. => 0.0,
        10..=13 => 0.0001,
        7..=9 => 0.001,
        4..=6 => 0.01,
        _ => 0.05,
    }
}

/// Largest cluster radius (degrees) allowed at a zoom level.
pub fn cluster_radius_for_zoom(z: u8) -> f64 {
    match z {
        15.. => 0.0001,
        10..=14 => 0.001,
        7..=9 => 0.01,
        _ => 0.1,
    }
}
