use geo::{Coord, MapCoordsInPlace};
use serde::Serialize;

use super::crs::first_coord;
use super::parse::ParsedFeature;

/// Votes cast by the sampled features on whether the collection is latitude-first.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct AxisVote {
    pub sampled: usize,
    pub needs_swap: usize,
    pub valid_as_is: usize,
}

impl AxisVote {
    /// Swap only on positive evidence that outweighs the samples already in order.
    #[inline]
    pub fn should_swap(&self) -> bool { self.needs_swap > 0 && self.needs_swap > self.valid_as_is }
}

/// Sample the first position of up to `sample_size` features.
/// Samples beyond `projected_threshold` on either axis abstain.
pub(super) fn vote(features: &[ParsedFeature], sample_size: usize, projected_threshold: f64) -> AxisVote {
    let mut vote = AxisVote::default();
    for c in features.iter().take(sample_size).filter_map(|f| first_coord(&f.geometry)) {
        if c.x.abs() > projected_threshold || c.y.abs() > projected_threshold { continue }
        vote.sampled += 1;
        if c.y.abs() > 90.0 && c.y.abs() <= 180.0 && c.x.abs() <= 90.0 {
            vote.needs_swap += 1;
        } else if c.x.abs() <= 180.0 && c.y.abs() <= 90.0 {
            vote.valid_as_is += 1;
        }
    }
    vote
}

/// Swap both components of every coordinate of every feature.
pub(super) fn swap_all(features: &mut [ParsedFeature]) {
    for feature in features.iter_mut() {
        feature.geometry.map_coords_in_place(|c: Coord<f64>| Coord { x: c.y, y: c.x });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geom::GeometryKind;
    use geo::{point, Geometry};
    use serde_json::Map;

    fn point_feature(x: f64, y: f64) -> ParsedFeature {
        ParsedFeature {
            geometry: Geometry::Point(point!(x: x, y: y)),
            kind: GeometryKind::Point,
            properties: Map::new(),
        }
    }

    #[test]
    fn latitude_first_majority_swaps() {
        let features = vec![point_feature(19.4, -99.1), point_feature(20.1, -98.7), point_feature(-99.0, 19.0)];
        let v = vote(&features, 20, 200.0);
        assert_eq!(v, AxisVote { sampled: 3, needs_swap: 2, valid_as_is: 1 });
        assert!(v.should_swap());
    }

    #[test]
    fn tie_keeps_order() {
        let features = vec![point_feature(19.4, -99.1), point_feature(-99.0, 19.0)];
        assert!(!vote(&features, 20, 200.0).should_swap());
    }

    #[test]
    fn only_first_samples_count() {
        let mut features: Vec<_> = (0..5).map(|_| point_feature(-99.0, 19.0)).collect();
        features.extend((0..30).map(|_| point_feature(19.0, -99.0)));
        let v = vote(&features, 5, 200.0);
        assert_eq!(v.needs_swap, 0);
        assert!(!v.should_swap());
    }

    #[test]
    fn swap_touches_every_coordinate() {
        let mut features = vec![point_feature(1.0, 2.0), point_feature(3.0, 4.0)];
        swap_all(&mut features);
        assert_eq!(features[0].geometry, Geometry::Point(point!(x: 2.0, y: 1.0)));
        assert_eq!(features[1].geometry, Geometry::Point(point!(x: 4.0, y: 3.0)));
    }
}
