//! # Density-Based Cluster Engine
//!
//! DBSCAN over the whole point set of a window.
//!
//! ## Algorithm
//! 1. Index every point in an R-tree keyed on (latitude, longitude) as plane coordinates
//! 2. Scan points in input order; a point with at least `min_points` *other* points within
//!    `epsilon` is a core point and seeds a new cluster
//! 3. Expand the cluster breadth-first: every neighbor joins, and neighbors that are core
//!    points themselves contribute their own neighbors to the queue
//! 4. Points never reached from a core point are noise and appear in no cluster
//!
//! ## Conventions
//! - Distance is planar Euclidean on raw degrees, with `<= epsilon` counting as "within"
//! - A point does not count toward its own neighbor threshold
//! - A border point reachable from two clusters stays with the first one that claimed it
//! - Points are identified by position in the input, so equal coordinates are separate points
//!
//! The engine must see the complete point set at once: splitting it would change the
//! neighborhoods near the split and therefore the clusters.

use std::time::Instant;

use log::{debug, info};
use rstar::{PointDistance, RTree, RTreeObject, AABB};

use crate::GpsPoint;

/// Parameters for density-based clustering.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ClusterConfig {
    /// Neighborhood radius in degrees (planar, not meters).
    /// Default: 0.0005
    pub epsilon: f64,
    /// Number of other points within `epsilon` required for a core point.
    /// Default: 3
    pub min_points: usize,
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            epsilon: 0.0005,
            min_points: 3,
        }
    }
}

/// A group of density-connected points.
#[derive(Debug, Clone, PartialEq)]
pub struct Cluster {
    /// Unique within one run, assigned in discovery order
    pub id: u32,
    /// Member coordinates, raw (uncorrected), in expansion order
    pub members: Vec<GpsPoint>,
    /// Position of each member in the input point set
    pub indices: Vec<usize>,
}

impl Cluster {
    #[inline]
    pub fn len(&self) -> usize {
        self.members.len()
    }

    /// Always false for clusters produced by the engine.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }
}

/// Whole-window clustering step.
///
/// The pipeline treats the engine as an opaque, single-threaded stage.
pub trait ClusterEngine {
    fn cluster(&self, points: &[GpsPoint]) -> Vec<Cluster>;
}

/// DBSCAN with a fixed configuration.
#[derive(Debug, Clone, Default)]
pub struct Dbscan {
    config: ClusterConfig,
}

impl Dbscan {
    pub fn new(config: ClusterConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ClusterConfig {
        &self.config
    }
}

impl ClusterEngine for Dbscan {
    fn cluster(&self, points: &[GpsPoint]) -> Vec<Cluster> {
        cluster_points(points, &self.config)
    }
}

// =============================================================================
// R-tree Indexed Point for Neighborhood Queries
// =============================================================================

/// A point with its input position for R-tree queries
#[derive(Debug, Clone, Copy)]
struct IndexedPoint {
    idx: usize,
    lat: f64,
    lng: f64,
}

impl RTreeObject for IndexedPoint {
    type Envelope = AABB<[f64; 2]>;

    fn envelope(&self) -> Self::Envelope {
        AABB::from_point([self.lat, self.lng])
    }
}

/// Squared [`planar_distance`](crate::geo_utils::planar_distance).
impl PointDistance for IndexedPoint {
    fn distance_2(&self, point: &[f64; 2]) -> f64 {
        let dlat = self.lat - point[0];
        let dlng = self.lng - point[1];
        dlat * dlat + dlng * dlng
    }
}

fn build_rtree(points: &[GpsPoint]) -> RTree<IndexedPoint> {
    let indexed: Vec<IndexedPoint> = points
        .iter()
        .enumerate()
        .map(|(idx, p)| IndexedPoint {
            idx,
            lat: p.latitude,
            lng: p.longitude,
        })
        .collect();
    RTree::bulk_load(indexed)
}

struct Neighborhoods<'a> {
    points: &'a [GpsPoint],
    tree: RTree<IndexedPoint>,
    epsilon_2: f64,
}

impl Neighborhoods<'_> {
    /// Indices of all other points within epsilon, ascending.
    fn of(&self, idx: usize) -> Vec<usize> {
        let p = &self.points[idx];
        let mut found: Vec<usize> = self
            .tree
            .locate_within_distance([p.latitude, p.longitude], self.epsilon_2)
            .map(|ip| ip.idx)
            .filter(|&other| other != idx)
            .collect();
        // Tree traversal order is an implementation detail; pin it
        found.sort_unstable();
        found
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Status {
    Unvisited,
    Noise,
    Clustered,
}

// =============================================================================
// Clustering
// =============================================================================

/// Cluster a point set with DBSCAN.
///
/// Returns clusters in discovery order with ids `0..n`. Noise points are dropped.
///
/// # Example
/// ```
/// use vehicle_hotspots::{GpsPoint, ClusterConfig, cluster_points};
///
/// let mut points: Vec<GpsPoint> = (0..10)
///     .map(|i| GpsPoint::new(34.05 + i as f64 * 0.00001, -118.25))
///     .collect();
/// points.push(GpsPoint::new(34.10, -118.30)); // far away
///
/// let clusters = cluster_points(&points, &ClusterConfig::default());
/// assert_eq!(clusters.len(), 1);
/// assert_eq!(clusters[0].members.len(), 10);
/// ```
pub fn cluster_points(points: &[GpsPoint], config: &ClusterConfig) -> Vec<Cluster> {
    let start = Instant::now();

    if points.len() <= config.min_points {
        // A core point needs min_points others, so at least min_points + 1 points
        info!(
            "[Dbscan] {} points, fewer than needed for a core point (min_points={})",
            points.len(),
            config.min_points
        );
        return vec![];
    }

    let neighborhoods = Neighborhoods {
        points,
        tree: build_rtree(points),
        epsilon_2: config.epsilon * config.epsilon,
    };

    let mut status = vec![Status::Unvisited; points.len()];
    // seed_mark[j] == cluster id + 1 when j is already queued for that cluster
    let mut seed_mark: Vec<u32> = vec![0; points.len()];
    let mut clusters: Vec<Cluster> = Vec::new();

    for idx in 0..points.len() {
        if status[idx] != Status::Unvisited {
            continue;
        }

        let neighbors = neighborhoods.of(idx);
        if neighbors.len() < config.min_points {
            status[idx] = Status::Noise;
            continue;
        }

        let id = clusters.len() as u32;
        let indices = expand_cluster(
            idx,
            neighbors,
            id + 1,
            &neighborhoods,
            config.min_points,
            &mut status,
            &mut seed_mark,
        );

        debug!("[Dbscan] Cluster {} seeded at point {} with {} members", id, idx, indices.len());

        clusters.push(Cluster {
            id,
            members: indices.iter().map(|&i| points[i]).collect(),
            indices,
        });
    }

    let clustered: usize = clusters.iter().map(Cluster::len).sum();
    info!(
        "[Dbscan] {} points -> {} clusters, {} noise points in {}ms (eps={}, min_points={})",
        points.len(),
        clusters.len(),
        points.len() - clustered,
        start.elapsed().as_millis(),
        config.epsilon,
        config.min_points
    );

    clusters
}

fn expand_cluster(
    core: usize,
    neighbors: Vec<usize>,
    mark: u32,
    neighborhoods: &Neighborhoods<'_>,
    min_points: usize,
    status: &mut [Status],
    seed_mark: &mut [u32],
) -> Vec<usize> {
    let mut members = vec![core];
    status[core] = Status::Clustered;
    seed_mark[core] = mark;

    let mut seeds = neighbors;
    for &s in &seeds {
        seed_mark[s] = mark;
    }

    let mut cursor = 0;
    while cursor < seeds.len() {
        let current = seeds[cursor];
        cursor += 1;

        if status[current] == Status::Unvisited {
            let current_neighbors = neighborhoods.of(current);
            if current_neighbors.len() >= min_points {
                for n in current_neighbors {
                    if seed_mark[n] != mark {
                        seed_mark[n] = mark;
                        seeds.push(n);
                    }
                }
            }
        }

        if status[current] != Status::Clustered {
            status[current] = Status::Clustered;
            members.push(current);
        }
    }

    members
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    /// `n` points spaced 0.00001° apart in latitude starting at `(lat, lng)`.
    fn tight_group(lat: f64, lng: f64, n: usize) -> Vec<GpsPoint> {
        (0..n)
            .map(|i| GpsPoint::new(lat + i as f64 * 0.00001, lng))
            .collect()
    }

    fn partition(clusters: &[Cluster]) -> Vec<Vec<usize>> {
        let mut groups: Vec<Vec<usize>> = clusters
            .iter()
            .map(|c| {
                let mut idx = c.indices.clone();
                idx.sort_unstable();
                idx
            })
            .collect();
        groups.sort();
        groups
    }

    #[test]
    fn test_empty_input() {
        assert!(cluster_points(&[], &ClusterConfig::default()).is_empty());
    }

    #[test]
    fn test_fewer_than_min_points() {
        let points = tight_group(34.05, -118.25, 2);
        assert!(cluster_points(&points, &ClusterConfig::default()).is_empty());
    }

    #[test]
    fn test_min_points_excludes_self() {
        // Three mutually close points: each has only two others in range
        let three = tight_group(34.05, -118.25, 3);
        assert!(cluster_points(&three, &ClusterConfig::default()).is_empty());

        // A fourth point makes every one of them core
        let four = tight_group(34.05, -118.25, 4);
        let clusters = cluster_points(&four, &ClusterConfig::default());
        assert_eq!(clusters.len(), 1);
        assert_eq!(clusters[0].len(), 4);
    }

    #[test]
    fn test_ten_packed_one_outlier() {
        let mut points = tight_group(34.05, -118.25, 10);
        points.push(GpsPoint::new(34.06, -118.26));

        let clusters = cluster_points(&points, &ClusterConfig::default());
        assert_eq!(clusters.len(), 1);
        assert_eq!(clusters[0].id, 0);
        assert_eq!(clusters[0].len(), 10);
        assert!(!clusters[0].indices.contains(&10));
    }

    #[test]
    fn test_two_separate_clusters() {
        let mut points = tight_group(34.05, -118.25, 5);
        points.extend(tight_group(34.10, -118.40, 6));

        let clusters = cluster_points(&points, &ClusterConfig::default());
        assert_eq!(clusters.len(), 2);
        assert_eq!(clusters[0].len(), 5);
        assert_eq!(clusters[1].len(), 6);
        assert_eq!(clusters[1].id, 1);
    }

    #[test]
    fn test_chain_of_core_points_joins() {
        // 0.0002° spacing: interior points reach two neighbors on each side,
        // the two ends reach only two points and join as border points
        let points: Vec<GpsPoint> = (0..20)
            .map(|i| GpsPoint::new(34.0 + i as f64 * 0.0002, -118.0))
            .collect();
        let clusters = cluster_points(&points, &ClusterConfig::default());
        assert_eq!(clusters.len(), 1);
        assert_eq!(clusters[0].len(), 20);
    }

    /// Four points 0.0001° apart; each sees the other three.
    fn core_group() -> Vec<GpsPoint> {
        (0..4)
            .map(|i| GpsPoint::new(34.0 + i as f64 * 0.0001, -118.0))
            .collect()
    }

    #[test]
    fn test_border_point_included_but_does_not_extend() {
        let mut points = core_group();
        // Within eps of the top core point only, plus the point beyond it
        points.push(GpsPoint::new(34.00075, -118.0));
        // Within eps of the border point only
        points.push(GpsPoint::new(34.0012, -118.0));

        let clusters = cluster_points(&points, &ClusterConfig::default());
        assert_eq!(clusters.len(), 1);
        let members = &clusters[0].indices;
        assert_eq!(members.len(), 5);
        assert!(members.contains(&4));
        assert!(!members.contains(&5));
    }

    #[test]
    fn test_noise_seen_first_becomes_border() {
        // Scanned first and labelled noise (one neighbor), then claimed by the core group
        let mut points = vec![GpsPoint::new(33.99955, -118.0)];
        points.extend(core_group());

        let clusters = cluster_points(&points, &ClusterConfig::default());
        assert_eq!(clusters.len(), 1);
        assert_eq!(clusters[0].len(), 5);
        assert!(clusters[0].indices.contains(&0));
        assert_eq!(clusters[0].indices[0], 1);
    }

    #[test]
    fn test_duplicate_coordinates_are_distinct_points() {
        let points = vec![GpsPoint::new(34.0, -118.0); 4];
        let clusters = cluster_points(&points, &ClusterConfig::default());
        assert_eq!(clusters.len(), 1);
        assert_eq!(clusters[0].len(), 4);
    }

    #[test]
    fn test_deterministic_partition() {
        let mut points = Vec::new();
        for g in 0..5 {
            points.extend(tight_group(34.0 + g as f64 * 0.01, -118.0 + g as f64 * 0.003, 3 + g));
        }
        points.push(GpsPoint::new(33.5, -117.5));

        let config = ClusterConfig::default();
        let first = cluster_points(&points, &config);
        let second = cluster_points(&points, &config);
        assert_eq!(partition(&first), partition(&second));
        assert_eq!(first, second);
    }

    #[test]
    fn test_every_point_in_at_most_one_cluster() {
        let mut points = tight_group(34.0, -118.0, 8);
        points.extend(tight_group(34.00045, -118.0, 8));
        let clusters = cluster_points(&points, &ClusterConfig::default());

        let mut all: Vec<usize> = clusters.iter().flat_map(|c| c.indices.clone()).collect();
        let before = all.len();
        all.sort_unstable();
        all.dedup();
        assert_eq!(all.len(), before);
    }

    #[test]
    fn test_index_metric_is_planar_distance() {
        use crate::geo_utils::planar_distance;

        let points = [
            GpsPoint::new(34.0, -118.0),
            GpsPoint::new(34.0003, -118.0004),
            GpsPoint::new(-33.9, 151.2),
            GpsPoint::new(0.0, 179.9),
        ];
        for a in &points {
            let indexed = IndexedPoint {
                idx: 0,
                lat: a.latitude,
                lng: a.longitude,
            };
            for b in &points {
                let expected = planar_distance(a, b).powi(2);
                let got = indexed.distance_2(&[b.latitude, b.longitude]);
                assert!((got - expected).abs() <= 1e-9 * expected.max(1.0));
            }
        }
    }

    #[test]
    fn test_neighborhoods_agree_with_planar_distance() {
        use crate::geo_utils::planar_distance;

        let points: Vec<GpsPoint> = (0..30)
            .map(|i| GpsPoint::new(34.0 + (i % 6) as f64 * 0.00017, -118.0 + (i / 6) as f64 * 0.00023))
            .collect();
        let config = ClusterConfig::default();
        let neighborhoods = Neighborhoods {
            points: &points,
            tree: build_rtree(&points),
            epsilon_2: config.epsilon * config.epsilon,
        };

        for i in 0..points.len() {
            let expected: Vec<usize> = (0..points.len())
                .filter(|&j| j != i && planar_distance(&points[i], &points[j]) <= config.epsilon)
                .collect();
            assert_eq!(neighborhoods.of(i), expected);
        }
    }

    #[test]
    fn test_engine_trait_matches_function() {
        let points = tight_group(34.05, -118.25, 6);
        let engine = Dbscan::new(ClusterConfig::default());
        assert_eq!(engine.cluster(&points), cluster_points(&points, engine.config()));
    }
}
