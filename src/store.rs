//! Record store collaborator.
//!
//! The pipeline reads position reports for a window and appends to three independently
//! addressed output sets. Anything that can do those four things is a [`RecordStore`];
//! [`MemoryStore`] keeps everything in vectors and backs the tests and demo.

use std::fmt;

use crate::error::StoreError;
use crate::position::{PositionRecord, Window};
use crate::records::{TiledVehicleCluster, VehicleCluster, VehicleClusterDetail};

/// The three output record sets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OutputSet {
    Detail,
    Cluster,
    TiledCluster,
}

impl OutputSet {
    pub const ALL: [OutputSet; 3] = [OutputSet::Detail, OutputSet::Cluster, OutputSet::TiledCluster];

    /// Default series name of the set.
    pub fn name(self) -> &'static str {
        match self {
            OutputSet::Detail => "vehicle_cluster_detail",
            OutputSet::Cluster => "vehicle_cluster",
            OutputSet::TiledCluster => "tiled_vehicle_cluster",
        }
    }
}

impl fmt::Display for OutputSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Read access to position reports and append access to the output sets.
///
/// Implementations own any retry policy; the pipeline propagates errors unchanged.
/// The appends are independent: a failure in one leaves earlier sets written.
pub trait RecordStore {
    /// All position reports with `window.start <= timestamp < window.end`.
    fn query_positions(&self, window: &Window) -> Result<Vec<PositionRecord>, StoreError>;

    fn append_details(&mut self, records: &[VehicleClusterDetail]) -> Result<(), StoreError>;

    fn append_clusters(&mut self, records: &[VehicleCluster]) -> Result<(), StoreError>;

    fn append_tiled(&mut self, records: &[TiledVehicleCluster]) -> Result<(), StoreError>;
}

/// In-memory store.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    positions: Vec<PositionRecord>,
    details: Vec<VehicleClusterDetail>,
    clusters: Vec<VehicleCluster>,
    tiled: Vec<TiledVehicleCluster>,
    appends: Vec<OutputSet>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_positions(positions: Vec<PositionRecord>) -> Self {
        Self {
            positions,
            ..Self::default()
        }
    }

    pub fn insert_position(&mut self, record: PositionRecord) {
        self.positions.push(record);
    }

    pub fn details(&self) -> &[VehicleClusterDetail] {
        &self.details
    }

    pub fn clusters(&self) -> &[VehicleCluster] {
        &self.clusters
    }

    pub fn tiled(&self) -> &[TiledVehicleCluster] {
        &self.tiled
    }

    /// Output sets in the order append calls were received.
    pub fn appends(&self) -> &[OutputSet] {
        &self.appends
    }
}

impl RecordStore for MemoryStore {
    fn query_positions(&self, window: &Window) -> Result<Vec<PositionRecord>, StoreError> {
        Ok(self
            .positions
            .iter()
            .filter(|r| window.contains(r.timestamp))
            .cloned()
            .collect())
    }

    fn append_details(&mut self, records: &[VehicleClusterDetail]) -> Result<(), StoreError> {
        self.details.extend_from_slice(records);
        self.appends.push(OutputSet::Detail);
        Ok(())
    }

    fn append_clusters(&mut self, records: &[VehicleCluster]) -> Result<(), StoreError> {
        self.clusters.extend_from_slice(records);
        self.appends.push(OutputSet::Cluster);
        Ok(())
    }

    fn append_tiled(&mut self, records: &[TiledVehicleCluster]) -> Result<(), StoreError> {
        self.tiled.extend_from_slice(records);
        self.appends.push(OutputSet::TiledCluster);
        Ok(())
    }
}
