use geo::{Coord, Point};
use rand::{rngs::StdRng, Rng, SeedableRng};
use serde_json::{Map, Value};

use crate::model::Cluster;
use super::ClusterParams;

const MAX_ITERATIONS: usize = 50;
const SEED: u64 = 0x6765_6f6c;

/// A clustering input: representative point plus the attributes of its feature.
pub(super) struct ClusterInput<'a> {
    pub(super) point: Coord<f64>,
    pub(super) properties: &'a Map<String, Value>,
}

#[inline]
fn dist2(a: Coord<f64>, b: Coord<f64>) -> f64 {
    let (dx, dy) = (a.x - b.x, a.y - b.y);
    dx * dx + dy * dy
}

fn mean(points: &[Coord<f64>], members: &[usize]) -> Coord<f64> {
    let n = members.len().max(1) as f64;
    let (sx, sy) = members.iter().fold((0.0, 0.0), |(sx, sy), &i| (sx + points[i].x, sy + points[i].y));
    Coord { x: sx / n, y: sy / n }
}

/// k-means++ seeding.
fn seed_centers(points: &[Coord<f64>], members: &[usize], k: usize, rng: &mut StdRng) -> Vec<Coord<f64>> {
    let mut centers = vec![points[members[rng.random_range(0..members.len())]]];
    while centers.len() < k {
        let weights: Vec<f64> = members.iter()
            .map(|&i| centers.iter().map(|c| dist2(points[i], *c)).fold(f64::INFINITY, f64::min))
            .collect();
        let total: f64 = weights.iter().sum();
        if total <= 0.0 { break } // every remaining point coincides with a center
        let mut target = rng.random_range(0.0..total);
        let mut chosen = members[members.len() - 1];
        for (&i, w) in members.iter().zip(&weights) {
            if target < *w { chosen = i; break }
            target -= w;
        }
        centers.push(points[chosen]);
    }
    centers
}

/// Lloyd iterations over `members`; returns the non-empty groups.
fn kmeans(points: &[Coord<f64>], members: &[usize], k: usize, rng: &mut StdRng) -> Vec<Vec<usize>> {
    if members.is_empty() { return Vec::new() }
    let mut centers = seed_centers(points, members, k.min(members.len()), rng);
    let mut assignment = vec![usize::MAX; members.len()];

    for _ in 0..MAX_ITERATIONS {
        let mut changed = false;
        for (slot, &i) in assignment.iter_mut().zip(members) {
            let nearest = (0..centers.len())
                .min_by(|&a, &b| dist2(points[i], centers[a]).total_cmp(&dist2(points[i], centers[b])))
                .unwrap_or(0);
            if *slot != nearest { *slot = nearest; changed = true; }
        }
        let mut groups = vec![Vec::new(); centers.len()];
        for (&c, &i) in assignment.iter().zip(members) { groups[c].push(i) }
        for (center, group) in centers.iter_mut().zip(&groups) {
            if !group.is_empty() { *center = mean(points, group) }
        }
        if !changed { break }
    }

    let mut groups = vec![Vec::new(); centers.len()];
    for (&c, &i) in assignment.iter().zip(members) { groups[c].push(i) }
    groups.retain(|g| !g.is_empty());
    groups
}

/// A group of member indexes with its squared radius around the mean.
struct Group {
    members: Vec<usize>,
    radius2: f64,
    splittable: bool,
}

impl Group {
    fn new(points: &[Coord<f64>], members: Vec<usize>) -> Self {
        let center = mean(points, &members);
        let radius2 = members.iter().map(|&i| dist2(points[i], center)).fold(0.0, f64::max);
        Self { splittable: members.len() > 1, members, radius2 }
    }
}

/// Group inputs with bisecting k-means: the widest group is split in two until
/// every group lies within `max_radius` of its centroid or there are `k` groups.
/// Deterministic for a given input order.
pub(super) fn cluster(inputs: &[ClusterInput<'_>], params: &ClusterParams) -> Vec<Cluster> {
    let k = params.cluster_count(inputs.len());
    if k == 0 { return Vec::new() }

    let points: Vec<Coord<f64>> = inputs.iter().map(|input| input.point).collect();
    let mut rng = StdRng::seed_from_u64(SEED);
    let max_radius2 = params.max_radius * params.max_radius;

    let mut groups = vec![Group::new(&points, (0..points.len()).collect())];
    while groups.len() < k {
        let widest = groups.iter()
            .enumerate()
            .filter(|(_, g)| g.splittable && g.radius2 > max_radius2)
            .max_by(|(_, a), (_, b)| a.radius2.total_cmp(&b.radius2))
            .map(|(i, _)| i);
        let Some(widest) = widest else { break };

        let halves = kmeans(&points, &groups[widest].members, 2, &mut rng);
        if halves.len() < 2 {
            groups[widest].splittable = false;
            continue;
        }
        let mut halves = halves.into_iter().map(|members| Group::new(&points, members));
        if let Some(first) = halves.next() { groups[widest] = first }
        groups.extend(halves);
    }
    let mut groups: Vec<Vec<usize>> = groups.into_iter().map(|g| g.members).collect();

    // Inputs arrive in feature-index order, so the first member is the lowest index.
    groups.sort_by_key(|g| g.iter().copied().min().unwrap_or(usize::MAX));
    groups.into_iter()
        .map(|mut group| {
            group.sort_unstable();
            let center = mean(&points, &group);
            Cluster {
                centroid: Point(center),
                point_count: group.len(),
                sample_properties: inputs[group[0]].properties.clone(),
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params(max_radius: f64) -> ClusterParams {
        ClusterParams { max_clusters: 50, points_per_cluster: 10, max_radius }
    }

    #[test]
    fn separates_distant_groups() {
        let props = Map::new();
        let mut inputs = Vec::new();
        for i in 0..20 {
            let jitter = i as f64 * 1e-4;
            inputs.push(ClusterInput { point: Coord { x: 10.0 + jitter, y: 10.0 }, properties: &props });
            inputs.push(ClusterInput { point: Coord { x: -10.0 - jitter, y: -10.0 }, properties: &props });
        }
        let clusters = cluster(&inputs, &params(0.1));
        assert!(clusters.len() >= 2);
        assert_eq!(clusters.iter().map(|c| c.point_count).sum::<usize>(), 40);
        for c in &clusters {
            assert!((c.centroid.x().abs() - 10.0).abs() < 0.01);
        }
    }

    #[test]
    fn few_points_make_one_cluster() {
        let props = Map::new();
        let inputs: Vec<_> = (0..5)
            .map(|i| ClusterInput { point: Coord { x: i as f64 * 1e-3, y: 0.0 }, properties: &props })
            .collect();
        let clusters = cluster(&inputs, &params(1.0));
        assert_eq!(clusters.len(), 1);
        assert_eq!(clusters[0].point_count, 5);
    }

    #[test]
    fn count_never_exceeds_the_cap() {
        let props = Map::new();
        let inputs: Vec<_> = (0..1000)
            .map(|i| ClusterInput {
                point: Coord { x: (i % 32) as f64 * 0.02, y: (i / 32) as f64 * 0.02 },
                properties: &props,
            })
            .collect();
        let mut previous = 0;
        for radius in [1.0, 0.1, 0.01, 0.001, 0.0001] {
            let clusters = cluster(&inputs, &params(radius));
            assert!(clusters.len() <= 50, "radius {radius}: {} clusters", clusters.len());
            assert!(clusters.len() >= previous, "radius {radius}");
            assert_eq!(clusters.iter().map(|c| c.point_count).sum::<usize>(), 1000);
            previous = clusters.len();
        }
        assert_eq!(previous, 50);
    }

    #[test]
    fn wide_radius_keeps_one_cluster() {
        let props = Map::new();
        let inputs: Vec<_> = (0..100)
            .map(|i| ClusterInput { point: Coord { x: i as f64 * 1e-3, y: 0.0 }, properties: &props })
            .collect();
        assert_eq!(cluster(&inputs, &params(1.0)).len(), 1);
    }

    #[test]
    fn coincident_points_stop_splitting() {
        let props = Map::new();
        let inputs: Vec<_> = (0..200)
            .map(|_| ClusterInput { point: Coord { x: 3.0, y: 4.0 }, properties: &props })
            .collect();
        let clusters = cluster(&inputs, &params(0.0001));
        assert_eq!(clusters.len(), 1);
        assert_eq!(clusters[0].point_count, 200);
    }

    #[test]
    fn empty_input() {
        assert!(cluster(&[], &params(1.0)).is_empty());
    }
}
