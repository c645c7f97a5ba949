//! Position records, the analysis window and the Position Loader.
//!
//! The loader turns the raw reports of one window into the point set handed to the
//! cluster engine. Exact duplicate reports (same vehicle, same latitude, same longitude)
//! collapse to one; different vehicles at the same spot stay separate points.

use std::collections::HashSet;

use chrono::{DateTime, Duration, Utc};
use log::{info, warn};

use crate::store::RecordStore;
use crate::{GpsPoint, HotspotError};

/// Length of one analysis window.
pub const WINDOW_LENGTH_SECS: i64 = 60 * 60;

/// One observed vehicle position report.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct PositionRecord {
    /// Vehicle identity
    pub identity: String,
    pub latitude: f64,
    pub longitude: f64,
    pub timestamp: DateTime<Utc>,
}

impl PositionRecord {
    pub fn new(identity: impl Into<String>, latitude: f64, longitude: f64, timestamp: DateTime<Utc>) -> Self {
        Self {
            identity: identity.into(),
            latitude,
            longitude,
            timestamp,
        }
    }

    /// The reported coordinate, exactly as received.
    pub fn point(&self) -> GpsPoint {
        GpsPoint::new(self.latitude, self.longitude)
    }
}

/// Half-open time interval `[start, end)` processed by one pipeline run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Window {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl Window {
    /// The one-hour window beginning at `start`.
    ///
    /// ```rust
    /// use chrono::{TimeZone, Utc};
    /// use vehicle_hotspots::Window;
    ///
    /// let start = Utc.with_ymd_and_hms(2024, 3, 1, 8, 0, 0).unwrap();
    /// let window = Window::hour_starting_at(start);
    /// assert!(window.contains(start));
    /// assert!(!window.contains(window.end));
    /// ```
    pub fn hour_starting_at(start: DateTime<Utc>) -> Self {
        Self {
            start,
            end: start + Duration::seconds(WINDOW_LENGTH_SECS),
        }
    }

    #[inline]
    pub fn contains(&self, t: DateTime<Utc>) -> bool {
        self.start <= t && t < self.end
    }
}

/// Deduplication key: identity plus the exact bit patterns of both coordinates.
type DedupKey = (String, u64, u64);

fn dedup_key(record: &PositionRecord) -> DedupKey {
    // +0.0 folds -0.0 onto 0.0 so the two compare equal, as they do numerically
    (
        record.identity.clone(),
        (record.latitude + 0.0).to_bits(),
        (record.longitude + 0.0).to_bits(),
    )
}

/// Drop exact duplicate reports, keeping the first occurrence of each
/// (identity, latitude, longitude) triple. Order of the survivors is first-seen order.
///
/// Reports with a non-finite coordinate cannot be placed on the plane and are dropped too.
pub fn distinct_positions(records: Vec<PositionRecord>) -> Vec<PositionRecord> {
    let mut seen: HashSet<DedupKey> = HashSet::with_capacity(records.len());
    let mut non_finite = 0usize;

    let distinct: Vec<PositionRecord> = records
        .into_iter()
        .filter(|r| {
            if r.point().is_finite() {
                true
            } else {
                non_finite += 1;
                false
            }
        })
        .filter(|r| seen.insert(dedup_key(r)))
        .collect();

    if non_finite > 0 {
        warn!("[Loader] Dropped {} reports with non-finite coordinates", non_finite);
    }

    distinct
}

/// Fetch the window's reports from the store and reduce them to the point set.
///
/// Store failures are returned as-is; there is no retry at this layer.
pub fn load_points<S>(store: &S, window: &Window) -> Result<LoadedPoints, HotspotError>
where
    S: RecordStore + ?Sized,
{
    let start = std::time::Instant::now();

    let records = store.query_positions(window)?;
    let records_loaded = records.len();

    let points: Vec<GpsPoint> = distinct_positions(records)
        .iter()
        .map(PositionRecord::point)
        .collect();

    info!(
        "[Loader] {} reports in [{}, {}) -> {} distinct points in {}ms",
        records_loaded,
        window.start,
        window.end,
        points.len(),
        start.elapsed().as_millis()
    );

    Ok(LoadedPoints { records_loaded, points })
}

/// Output of [`load_points`].
#[derive(Debug, Clone)]
pub struct LoadedPoints {
    /// Number of raw reports returned by the store
    pub records_loaded: usize,
    /// Distinct points, in first-seen order
    pub points: Vec<GpsPoint>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(minute: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, 8, minute, 0).unwrap()
    }

    #[test]
    fn test_window_is_half_open_hour() {
        let w = Window::hour_starting_at(at(0));
        assert_eq!((w.end - w.start).num_seconds(), WINDOW_LENGTH_SECS);
        assert!(w.contains(at(0)));
        assert!(w.contains(at(59)));
        assert!(!w.contains(w.end));
        assert!(!w.contains(at(0) - Duration::seconds(1)));
    }

    #[test]
    fn test_duplicates_collapse_to_one() {
        let records = vec![
            PositionRecord::new("bus-1", 34.05, -118.25, at(1)),
            PositionRecord::new("bus-1", 34.05, -118.25, at(7)),
            PositionRecord::new("bus-1", 34.05, -118.25, at(9)),
        ];
        let distinct = distinct_positions(records);
        assert_eq!(distinct.len(), 1);
        assert_eq!(distinct[0].timestamp, at(1));
    }

    #[test]
    fn test_same_spot_different_vehicles_kept() {
        let records = vec![
            PositionRecord::new("bus-1", 34.05, -118.25, at(1)),
            PositionRecord::new("bus-2", 34.05, -118.25, at(1)),
        ];
        assert_eq!(distinct_positions(records).len(), 2);
    }

    #[test]
    fn test_moved_vehicle_kept() {
        let records = vec![
            PositionRecord::new("bus-1", 34.05, -118.25, at(1)),
            PositionRecord::new("bus-1", 34.0501, -118.25, at(2)),
        ];
        assert_eq!(distinct_positions(records).len(), 2);
    }

    #[test]
    fn test_negative_zero_matches_zero() {
        let records = vec![
            PositionRecord::new("car", 0.0, 10.0, at(1)),
            PositionRecord::new("car", -0.0, 10.0, at(2)),
        ];
        assert_eq!(distinct_positions(records).len(), 1);
    }

    #[test]
    fn test_first_seen_order_preserved() {
        let records = vec![
            PositionRecord::new("c", 3.0, 3.0, at(1)),
            PositionRecord::new("a", 1.0, 1.0, at(2)),
            PositionRecord::new("c", 3.0, 3.0, at(3)),
            PositionRecord::new("b", 2.0, 2.0, at(4)),
        ];
        let ids: Vec<String> = distinct_positions(records).into_iter().map(|r| r.identity).collect();
        assert_eq!(ids, vec!["c", "a", "b"]);
    }

    #[test]
    fn test_non_finite_dropped() {
        let records = vec![
            PositionRecord::new("a", f64::NAN, 1.0, at(1)),
            PositionRecord::new("b", 1.0, f64::INFINITY, at(1)),
            PositionRecord::new("c", 1.0, 1.0, at(1)),
        ];
        assert_eq!(distinct_positions(records).len(), 1);
    }
}
