//! Output records and their construction from clusters.
//!
//! Every cluster yields three kinds of records, written to three independent output sets:
//! one [`VehicleClusterDetail`] per member, one [`VehicleCluster`] summary and one
//! [`TiledVehicleCluster`] carrying the same summary keyed by tile.

use chrono::{DateTime, Utc};

use crate::dbscan::Cluster;
use crate::geo_utils::{spherical_centroid, CoordinateCorrection};
use crate::tile::{in_projection, TileMapper};
use crate::{GpsPoint, HotspotError};

/// One member point of a cluster, coordinates corrected.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct VehicleClusterDetail {
    pub cluster_id: u32,
    /// 0-based position within the cluster, in centroid iteration order
    pub point_index: u32,
    pub timestamp: DateTime<Utc>,
    pub latitude: f64,
    pub longitude: f64,
}

/// Per-cluster summary.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct VehicleCluster {
    pub cluster_id: u32,
    pub timestamp: DateTime<Utc>,
    pub center_latitude: f64,
    pub center_longitude: f64,
    /// Number of member points, always >= 1
    pub member_count: u32,
}

/// Per-cluster summary indexed by the quadkey of its centroid.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct TiledVehicleCluster {
    pub tile_key: String,
    pub cluster_id: u32,
    pub timestamp: DateTime<Utc>,
    pub center_latitude: f64,
    pub center_longitude: f64,
    pub amount: u32,
}

/// Everything emitted for a single cluster.
#[derive(Debug, Clone, PartialEq)]
pub struct ClusterRecords {
    pub details: Vec<VehicleClusterDetail>,
    pub summary: VehicleCluster,
    pub tiled: TiledVehicleCluster,
    /// Members rewritten by the coordinate correction
    pub corrected_points: usize,
}

impl ClusterRecords {
    /// Correct the members, compute the centroid, key it by tile and build all records.
    ///
    /// Fails with [`HotspotError::OutOfProjection`] if any corrected member lies outside the
    /// tiling projection.
    ///
    /// Detail `point_index` follows the same member order the centroid is computed over.
    pub fn build(
        cluster: &Cluster,
        timestamp: DateTime<Utc>,
        correction: CoordinateCorrection,
        tiles: &TileMapper,
    ) -> Result<Self, HotspotError> {
        let corrected_points = cluster
            .members
            .iter()
            .filter(|p| correction.rewrites(p))
            .count();
        let members: Vec<GpsPoint> = cluster
            .members
            .iter()
            .map(|&p| correction.apply(p))
            .collect();

        // A member still outside the projection would skew the centroid without failing it
        if let Some(bad) = members.iter().find(|p| !in_projection(p)) {
            return Err(HotspotError::OutOfProjection {
                latitude: bad.latitude,
                longitude: bad.longitude,
            });
        }

        let center = spherical_centroid(members.iter().copied())
            .ok_or(HotspotError::EmptyCluster(cluster.id))?;
        let tile_key = tiles.tile_key(&center)?;

        let details = members
            .iter()
            .enumerate()
            .map(|(i, p)| VehicleClusterDetail {
                cluster_id: cluster.id,
                point_index: i as u32,
                timestamp,
                latitude: p.latitude,
                longitude: p.longitude,
            })
            .collect();

        let member_count = members.len() as u32;

        Ok(Self {
            details,
            summary: VehicleCluster {
                cluster_id: cluster.id,
                timestamp,
                center_latitude: center.latitude,
                center_longitude: center.longitude,
                member_count,
            },
            tiled: TiledVehicleCluster {
                tile_key,
                cluster_id: cluster.id,
                timestamp,
                center_latitude: center.latitude,
                center_longitude: center.longitude,
                amount: member_count,
            },
            corrected_points,
        })
    }
}

/// The three output sets of one run.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct HotspotOutput {
    pub details: Vec<VehicleClusterDetail>,
    pub clusters: Vec<VehicleCluster>,
    pub tiled: Vec<TiledVehicleCluster>,
    /// Members rewritten by the coordinate correction, over all clusters
    pub corrected_points: usize,
}

impl HotspotOutput {
    pub fn is_empty(&self) -> bool {
        self.clusters.is_empty()
    }
}

impl FromIterator<ClusterRecords> for HotspotOutput {
    fn from_iter<I: IntoIterator<Item = ClusterRecords>>(iter: I) -> Self {
        let mut output = HotspotOutput::default();
        for records in iter {
            output.details.extend(records.details);
            output.clusters.push(records.summary);
            output.tiled.push(records.tiled);
            output.corrected_points += records.corrected_points;
        }
        output
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn run_time() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, 8, 0, 0).unwrap()
    }

    fn cluster(id: u32, members: Vec<GpsPoint>) -> Cluster {
        let indices = (0..members.len()).collect();
        Cluster { id, members, indices }
    }

    fn tiles() -> TileMapper {
        TileMapper::new(16).unwrap()
    }

    #[test]
    fn test_build_records_for_cluster() {
        let c = cluster(
            7,
            vec![
                GpsPoint::new(34.0, -118.0),
                GpsPoint::new(34.0, -118.0),
                GpsPoint::new(34.0001, -118.0001),
            ],
        );
        let records = ClusterRecords::build(&c, run_time(), CoordinateCorrection::default(), &tiles()).unwrap();

        assert_eq!(records.summary.cluster_id, 7);
        assert_eq!(records.summary.member_count, 3);
        assert!((records.summary.center_latitude - 34.0000333).abs() < 1e-6);
        assert!((records.summary.center_longitude - -118.0000333).abs() < 1e-6);

        let indices: Vec<u32> = records.details.iter().map(|d| d.point_index).collect();
        assert_eq!(indices, vec![0, 1, 2]);
        assert!(records.details.iter().all(|d| d.cluster_id == 7 && d.timestamp == run_time()));

        assert_eq!(records.tiled.cluster_id, records.summary.cluster_id);
        assert_eq!(records.tiled.center_latitude, records.summary.center_latitude);
        assert_eq!(records.tiled.center_longitude, records.summary.center_longitude);
        assert_eq!(records.tiled.amount, records.summary.member_count);
        assert_eq!(records.tiled.tile_key, "0230132002010132");
    }

    #[test]
    fn test_details_are_corrected() {
        let c = cluster(
            0,
            vec![
                GpsPoint::new(34.05, -118.25),
                GpsPoint::new(-118.25, 34.05), // swapped upstream
                GpsPoint::new(34.05, -118.25),
            ],
        );
        let records = ClusterRecords::build(&c, run_time(), CoordinateCorrection::default(), &tiles()).unwrap();

        assert_eq!(records.corrected_points, 1);
        assert!(records.details.iter().all(|d| d.latitude == 34.05 && d.longitude == -118.25));
        assert!((records.summary.center_latitude - 34.05).abs() < 1e-9);
    }

    #[test]
    fn test_swapped_members_fail_without_correction() {
        let c = cluster(0, vec![GpsPoint::new(-118.25, 34.05); 3]);
        let result = ClusterRecords::build(&c, run_time(), CoordinateCorrection::Disabled, &tiles());
        assert!(matches!(result, Err(HotspotError::OutOfProjection { .. })));
    }

    #[test]
    fn test_member_out_of_range_after_swap_fails() {
        // Swaps to (34.0, -200.0): latitude fixed, longitude still impossible
        let c = cluster(
            2,
            (0..5).map(|i| GpsPoint::new(-200.0, 34.0 + i as f64 * 0.00001)).collect(),
        );
        let result = ClusterRecords::build(&c, run_time(), CoordinateCorrection::default(), &tiles());
        match result {
            Err(HotspotError::OutOfProjection { latitude, longitude }) => {
                assert_eq!(latitude, 34.0);
                assert_eq!(longitude, -200.0);
            }
            other => panic!("expected OutOfProjection, got {:?}", other),
        }
    }

    #[test]
    fn test_single_bad_member_fails_whole_cluster() {
        let c = cluster(
            0,
            vec![
                GpsPoint::new(34.05, -118.25),
                GpsPoint::new(34.05, -118.25),
                GpsPoint::new(f64::NAN, -118.25),
            ],
        );
        let result = ClusterRecords::build(&c, run_time(), CoordinateCorrection::default(), &tiles());
        assert!(matches!(result, Err(HotspotError::OutOfProjection { .. })));
    }

    #[test]
    fn test_empty_cluster_fails() {
        let c = cluster(4, vec![]);
        let result = ClusterRecords::build(&c, run_time(), CoordinateCorrection::default(), &tiles());
        assert!(matches!(result, Err(HotspotError::EmptyCluster(4))));
    }

    #[test]
    fn test_output_collects_all_sets() {
        let a = cluster(0, vec![GpsPoint::new(34.0, -118.0); 4]);
        let b = cluster(1, vec![GpsPoint::new(34.1, -118.1); 5]);
        let output: HotspotOutput = [a, b]
            .iter()
            .map(|c| ClusterRecords::build(c, run_time(), CoordinateCorrection::default(), &tiles()).unwrap())
            .collect();

        assert_eq!(output.clusters.len(), 2);
        assert_eq!(output.tiled.len(), 2);
        assert_eq!(output.details.len(), 9);
        for summary in &output.clusters {
            let count = output
                .details
                .iter()
                .filter(|d| d.cluster_id == summary.cluster_id)
                .count();
            assert_eq!(count as u32, summary.member_count);
        }
    }
}
