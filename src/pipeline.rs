//! Pipeline orchestration: load, cluster, summarise, tile, write.
//!
//! Loading and clustering run sequentially; clustering always sees the whole window's point
//! set in one call. With the `parallel` feature the per-cluster stages (correction, centroid,
//! tile key, records) run on rayon.

use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use log::{debug, info, warn};

use crate::dbscan::{Cluster, ClusterConfig, ClusterEngine, Dbscan};
use crate::geo_utils::CoordinateCorrection;
use crate::position::{distinct_positions, load_points, PositionRecord, Window};
use crate::records::{ClusterRecords, HotspotOutput};
use crate::store::RecordStore;
use crate::tile::{TileMapper, MAX_TILE_LEVEL};
use crate::{GpsPoint, HotspotError};

/// Configuration for a pipeline run.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct HotspotConfig {
    pub cluster: ClusterConfig,
    /// Quadkey level used for tile keys (1..=23)
    pub tile_level: u8,
    pub correction: CoordinateCorrection,
}

impl Default for HotspotConfig {
    fn default() -> Self {
        Self {
            cluster: ClusterConfig::default(),
            tile_level: 16,
            correction: CoordinateCorrection::default(),
        }
    }
}

impl HotspotConfig {
    pub fn validate(&self) -> Result<(), HotspotError> {
        let eps = self.cluster.epsilon;
        if !eps.is_finite() || eps <= 0.0 {
            return Err(HotspotError::InvalidConfig(format!(
                "epsilon must be finite and positive, got {}",
                eps
            )));
        }
        if self.cluster.min_points == 0 {
            return Err(HotspotError::InvalidConfig("min_points must be at least 1".into()));
        }
        if self.tile_level == 0 || self.tile_level > MAX_TILE_LEVEL {
            return Err(HotspotError::InvalidTileLevel(self.tile_level));
        }
        Ok(())
    }
}

/// Summary of one completed run.
#[derive(Debug, Clone, PartialEq)]
pub struct PipelineReport {
    pub window: Window,
    /// Raw reports returned by the store
    pub records_loaded: usize,
    /// Points left after deduplication
    pub distinct_points: usize,
    pub clusters: usize,
    /// Points that ended up in no cluster
    pub noise_points: usize,
    /// Cluster members rewritten by the coordinate correction
    pub corrected_points: usize,
    pub details_written: usize,
    pub elapsed: Duration,
}

type Engine = Box<dyn ClusterEngine + Send + Sync>;

/// The hotspot pipeline for one configuration.
pub struct HotspotPipeline {
    config: HotspotConfig,
    engine: Engine,
    tiles: TileMapper,
}

impl HotspotPipeline {
    /// Validate `config` and build a pipeline clustering with DBSCAN.
    pub fn new(config: HotspotConfig) -> Result<Self, HotspotError> {
        let engine = Box::new(Dbscan::new(config.cluster.clone()));
        Self::with_engine(config, engine)
    }

    /// Build a pipeline around a different cluster engine.
    ///
    /// `config.cluster` is still validated but only the engine decides membership.
    pub fn with_engine(config: HotspotConfig, engine: Engine) -> Result<Self, HotspotError> {
        config.validate()?;
        let tiles = TileMapper::new(config.tile_level)?;
        Ok(Self { config, engine, tiles })
    }

    pub fn config(&self) -> &HotspotConfig {
        &self.config
    }

    /// Run every stage except I/O over already loaded reports.
    ///
    /// ```rust
    /// use chrono::{TimeZone, Utc};
    /// use vehicle_hotspots::{HotspotConfig, HotspotPipeline, PositionRecord, Window};
    ///
    /// let window = Window::hour_starting_at(Utc.with_ymd_and_hms(2024, 3, 1, 8, 0, 0).unwrap());
    /// let records: Vec<PositionRecord> = (0..5)
    ///     .map(|i| PositionRecord::new(format!("bus-{}", i), 34.05, -118.25 + i as f64 * 1e-5, window.start))
    ///     .collect();
    ///
    /// let pipeline = HotspotPipeline::new(HotspotConfig::default()).unwrap();
    /// let output = pipeline.compute(records, &window).unwrap();
    /// assert_eq!(output.clusters.len(), 1);
    /// assert_eq!(output.clusters[0].member_count, 5);
    /// ```
    pub fn compute(&self, records: Vec<PositionRecord>, window: &Window) -> Result<HotspotOutput, HotspotError> {
        let points: Vec<GpsPoint> = distinct_positions(records)
            .iter()
            .map(PositionRecord::point)
            .collect();
        self.compute_points(&points, window)
    }

    /// Cluster distinct points and build all output records, timestamped with the window start.
    pub fn compute_points(&self, points: &[GpsPoint], window: &Window) -> Result<HotspotOutput, HotspotError> {
        let clusters = self.engine.cluster(points);

        let start = Instant::now();
        let output = self.build_records(&clusters, window.start)?;

        if output.corrected_points > 0 {
            warn!(
                "[Pipeline] Coordinate correction rewrote {} cluster members",
                output.corrected_points
            );
        }
        info!(
            "[Pipeline] Built records for {} clusters ({} details) in {}ms",
            output.clusters.len(),
            output.details.len(),
            start.elapsed().as_millis()
        );

        Ok(output)
    }

    #[cfg(not(feature = "parallel"))]
    fn build_records(&self, clusters: &[Cluster], timestamp: DateTime<Utc>) -> Result<HotspotOutput, HotspotError> {
        let built = clusters
            .iter()
            .map(|c| self.build_cluster(c, timestamp))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(built.into_iter().collect())
    }

    #[cfg(feature = "parallel")]
    fn build_records(&self, clusters: &[Cluster], timestamp: DateTime<Utc>) -> Result<HotspotOutput, HotspotError> {
        use rayon::prelude::*;

        let built = clusters
            .par_iter()
            .map(|c| self.build_cluster(c, timestamp))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(built.into_iter().collect())
    }

    fn build_cluster(&self, cluster: &Cluster, timestamp: DateTime<Utc>) -> Result<ClusterRecords, HotspotError> {
        let records = ClusterRecords::build(cluster, timestamp, self.config.correction, &self.tiles)?;
        debug!(
            "[Pipeline] Cluster {}: {} members, center ({:.6}, {:.6}) tile {}",
            cluster.id,
            records.summary.member_count,
            records.summary.center_latitude,
            records.summary.center_longitude,
            records.tiled.tile_key
        );
        Ok(records)
    }

    /// Load the window from `store`, compute, and append the detail, cluster and tiled sets
    /// in that order. Empty sets are not written.
    ///
    /// Every record is built before the first append, so a computation error writes nothing.
    /// A store error stops the run where it happens.
    pub fn run<S>(&self, store: &mut S, window: &Window) -> Result<PipelineReport, HotspotError>
    where
        S: RecordStore + ?Sized,
    {
        let start = Instant::now();

        let loaded = load_points(&*store, window)?;
        let output = self.compute_points(&loaded.points, window)?;

        if !output.details.is_empty() {
            store.append_details(&output.details)?;
        }
        if !output.clusters.is_empty() {
            store.append_clusters(&output.clusters)?;
        }
        if !output.tiled.is_empty() {
            store.append_tiled(&output.tiled)?;
        }

        let report = PipelineReport {
            window: *window,
            records_loaded: loaded.records_loaded,
            distinct_points: loaded.points.len(),
            clusters: output.clusters.len(),
            noise_points: loaded.points.len().saturating_sub(output.details.len()),
            corrected_points: output.corrected_points,
            details_written: output.details.len(),
            elapsed: start.elapsed(),
        };

        info!(
            "[Pipeline] Window starting {}: {} reports, {} points, {} clusters, {} noise in {}ms",
            window.start,
            report.records_loaded,
            report.distinct_points,
            report.clusters,
            report.noise_points,
            report.elapsed.as_millis()
        );

        Ok(report)
    }
}
