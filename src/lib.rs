//! # Vehicle Hotspots
//!
//! Hourly detection of vehicle hotspots from GPS position reports.
//!
//! For one window of reports this library:
//! - Deduplicates reports by vehicle and exact coordinate
//! - Clusters the points with DBSCAN on planar degree coordinates
//! - Computes a spherical centroid per cluster, after correcting swapped lat/lon pairs
//! - Keys each centroid by its Web Mercator quadkey
//! - Writes per-point detail, per-cluster summary and tiled summary records to a store
//!
//! ## Features
//!
//! - **`parallel`** - Build per-cluster records on rayon
//! - **`serde`** - Serialize/deserialize the public types
//! - **`http`** - InfluxDB-style HTTP record store
//! - **`cli`** - The `hotspots` command line runner
//! - **`full`** - Enable all features
//!
//! ## Quick Start
//!
//! ```rust
//! use chrono::{TimeZone, Utc};
//! use vehicle_hotspots::{HotspotConfig, HotspotPipeline, MemoryStore, PositionRecord, Window};
//!
//! let window = Window::hour_starting_at(Utc.with_ymd_and_hms(2024, 3, 1, 8, 0, 0).unwrap());
//!
//! let mut store = MemoryStore::new();
//! for i in 0..6 {
//!     let lat = 34.0522 + i as f64 * 0.00005;
//!     store.insert_position(PositionRecord::new(format!("bus-{}", i), lat, -118.2437, window.start));
//! }
//!
//! let pipeline = HotspotPipeline::new(HotspotConfig::default()).unwrap();
//! let report = pipeline.run(&mut store, &window).unwrap();
//!
//! assert_eq!(report.clusters, 1);
//! assert_eq!(store.tiled()[0].amount, 6);
//! assert_eq!(store.tiled()[0].tile_key.len(), 16);
//! ```

pub mod dbscan;
pub mod error;
pub mod geo_utils;
pub mod pipeline;
pub mod position;
pub mod records;
pub mod store;
pub mod tile;

// HTTP store adapter
#[cfg(feature = "http")]
pub mod http;

pub use dbscan::{cluster_points, Cluster, ClusterConfig, ClusterEngine, Dbscan};
pub use error::{HotspotError, StoreError};
pub use geo_utils::{spherical_centroid, CoordinateCorrection};
pub use pipeline::{HotspotConfig, HotspotPipeline, PipelineReport};
pub use position::{distinct_positions, load_points, PositionRecord, Window};
pub use records::{HotspotOutput, TiledVehicleCluster, VehicleCluster, VehicleClusterDetail};
pub use store::{MemoryStore, OutputSet, RecordStore};
pub use tile::TileMapper;

#[cfg(feature = "http")]
pub use http::{HttpStore, HttpStoreConfig};

/// A GPS coordinate in degrees.
///
/// # Example
/// ```
/// use vehicle_hotspots::GpsPoint;
/// let point = GpsPoint::new(34.0522, -118.2437); // Los Angeles
/// assert!(point.is_valid());
/// ```
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct GpsPoint {
    pub latitude: f64,
    pub longitude: f64,
}

impl GpsPoint {
    /// Create a new GPS point.
    pub fn new(latitude: f64, longitude: f64) -> Self {
        Self { latitude, longitude }
    }

    /// Both coordinates are finite numbers.
    pub fn is_finite(&self) -> bool {
        self.latitude.is_finite() && self.longitude.is_finite()
    }

    /// Check if the point has valid coordinates.
    pub fn is_valid(&self) -> bool {
        self.is_finite()
            && self.latitude >= -90.0
            && self.latitude <= 90.0
            && self.longitude >= -180.0
            && self.longitude <= 180.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_gps_point_validation() {
        assert!(GpsPoint::new(34.0522, -118.2437).is_valid());
        assert!(!GpsPoint::new(91.0, 0.0).is_valid());
        assert!(!GpsPoint::new(0.0, 181.0).is_valid());
        assert!(!GpsPoint::new(f64::NAN, 0.0).is_valid());
    }

    #[test]
    fn test_swapped_point_is_finite_but_invalid() {
        let swapped = GpsPoint::new(-118.2437, 34.0522);
        assert!(swapped.is_finite());
        assert!(!swapped.is_valid());
        assert!(!GpsPoint::new(1.0, f64::INFINITY).is_finite());
    }
}
