//! # Geographic Utilities
//!
//! Coordinate geometry used by the hotspot pipeline.
//!
//! ## Overview
//!
//! | Function | Description |
//! |----------|-------------|
//! | [`planar_distance`] | Euclidean distance treating (lat, lon) degrees as plane coordinates |
//! | [`spherical_centroid`] | Mean direction of a set of points on the unit sphere |
//! | [`CoordinateCorrection::apply`] | Swap latitude/longitude pairs that were emitted in (lon, lat) order |
//!
//! ## Example
//!
//! ```rust
//! use vehicle_hotspots::{GpsPoint, geo_utils};
//!
//! let cluster = vec![
//!     GpsPoint::new(34.0, -118.0),
//!     GpsPoint::new(34.0, -118.0),
//!     GpsPoint::new(34.0001, -118.0001),
//! ];
//!
//! let center = geo_utils::spherical_centroid(cluster.iter().copied()).unwrap();
//! assert!((center.latitude - 34.00003).abs() < 1e-5);
//! assert!((center.longitude - -118.00003).abs() < 1e-5);
//! ```
//!
//! ## Algorithm Notes
//!
//! ### Spherical averaging
//!
//! Averaging degrees directly breaks near the antimeridian (179° and -179° average to 0°)
//! and near the poles. Each point is instead converted to a unit vector
//! `(cos φ cos λ, cos φ sin λ, sin φ)`, the three components are averaged independently and
//! the mean vector is converted back with `atan2`. The mean vector is not re-normalised:
//! only its direction is read.
//!
//! ### Planar distance
//!
//! Density clustering deliberately measures distance in raw degrees, not meters. A radius of
//! 0.0005° is roughly 55 m of latitude and somewhat less of longitude away from the equator.

use geo::{Distance, Euclidean, Point};

use crate::GpsPoint;

/// Largest latitude representable in the Web Mercator tiling projection.
pub const MERCATOR_MAX_LATITUDE: f64 = 85.05112878;

// =============================================================================
// Distance Functions
// =============================================================================

/// Euclidean distance between two points, in degrees, treating latitude and longitude as
/// plane coordinates.
///
/// This is the clustering metric. The DBSCAN R-tree compares its squared form against
/// `epsilon²` so neighbourhood queries skip the square root.
///
/// ```rust
/// use vehicle_hotspots::{GpsPoint, geo_utils};
///
/// let a = GpsPoint::new(34.0, -118.0);
/// let b = GpsPoint::new(34.0003, -118.0004);
/// assert!((geo_utils::planar_distance(&a, &b) - 0.0005).abs() < 1e-12);
/// ```
#[inline]
pub fn planar_distance(p1: &GpsPoint, p2: &GpsPoint) -> f64 {
    Euclidean::distance(plane_point(p1), plane_point(p2))
}

fn plane_point(p: &GpsPoint) -> Point<f64> {
    Point::new(p.latitude, p.longitude)
}

// =============================================================================
// Centroid Functions
// =============================================================================

/// Running sums of unit-vector components.
#[derive(Debug, Clone, Copy, Default)]
struct VectorSum {
    a: f64,
    b: f64,
    c: f64,
    count: usize,
}

impl VectorSum {
    fn add(self, p: GpsPoint) -> Self {
        let lat = p.latitude.to_radians();
        let lon = p.longitude.to_radians();
        Self {
            a: self.a + lat.cos() * lon.cos(),
            b: self.b + lat.cos() * lon.sin(),
            c: self.c + lat.sin(),
            count: self.count + 1,
        }
    }
}

/// Compute the spherical centroid of a set of points.
///
/// Returns `None` for an empty input. The centroid of a single point is that point.
///
/// Points that straddle the antimeridian average to a longitude near ±180°, not 0°:
///
/// ```rust
/// use vehicle_hotspots::{GpsPoint, geo_utils};
///
/// let points = [GpsPoint::new(0.0, 179.0), GpsPoint::new(0.0, -179.0)];
/// let center = geo_utils::spherical_centroid(points).unwrap();
/// assert!(center.longitude.abs() > 179.9);
/// ```
pub fn spherical_centroid<I>(points: I) -> Option<GpsPoint>
where
    I: IntoIterator<Item = GpsPoint>,
{
    let sum = points.into_iter().fold(VectorSum::default(), VectorSum::add);
    if sum.count == 0 {
        return None;
    }

    let n = sum.count as f64;
    let (a, b, c) = (sum.a / n, sum.b / n, sum.c / n);

    let longitude = b.atan2(a);
    let hypotenuse = (a * a + b * b).sqrt();
    let latitude = c.atan2(hypotenuse);

    Some(GpsPoint::new(latitude.to_degrees(), longitude.to_degrees()))
}

// =============================================================================
// Coordinate Correction
// =============================================================================

/// Repair step applied to every point before centroid and detail computation.
///
/// Upstream producers occasionally emit a pair in (lon, lat) order. For a fleet operating in
/// Los Angeles (latitude ~34°, longitude ~-118°) that shows up as a "latitude" outside the
/// projection range, and swapping the two values recovers the original point. The rule is
/// empirical and only valid for regions where longitude magnitudes exceed
/// [`MERCATOR_MAX_LATITUDE`] and latitude magnitudes do not. Use
/// [`CoordinateCorrection::Disabled`] anywhere else.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
pub enum CoordinateCorrection {
    /// Swap latitude and longitude when |latitude| exceeds the Mercator limit.
    #[default]
    SwapOutOfRangeLatitude,
    /// Leave coordinates untouched.
    Disabled,
}

impl CoordinateCorrection {
    /// Apply the correction to a single point.
    ///
    /// ```rust
    /// use vehicle_hotspots::{GpsPoint, geo_utils::CoordinateCorrection};
    ///
    /// let fix = CoordinateCorrection::SwapOutOfRangeLatitude;
    /// assert_eq!(fix.apply(GpsPoint::new(90.0, 10.0)), GpsPoint::new(10.0, 90.0));
    /// assert_eq!(fix.apply(GpsPoint::new(10.0, 90.0)), GpsPoint::new(10.0, 90.0));
    /// ```
    #[inline]
    pub fn apply(self, p: GpsPoint) -> GpsPoint {
        match self {
            CoordinateCorrection::SwapOutOfRangeLatitude if needs_swap(&p) => {
                GpsPoint::new(p.longitude, p.latitude)
            }
            _ => p,
        }
    }

    /// Whether [`apply`](Self::apply) would change this point.
    #[inline]
    pub fn rewrites(self, p: &GpsPoint) -> bool {
        self == CoordinateCorrection::SwapOutOfRangeLatitude && needs_swap(p)
    }
}

#[inline]
fn needs_swap(p: &GpsPoint) -> bool {
    !(-MERCATOR_MAX_LATITUDE..=MERCATOR_MAX_LATITUDE).contains(&p.latitude)
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn approx_eq(a: f64, b: f64, epsilon: f64) -> bool {
        (a - b).abs() < epsilon
    }

    #[test]
    fn test_planar_distance_same_point() {
        let p = GpsPoint::new(34.05, -118.25);
        assert_eq!(planar_distance(&p, &p), 0.0);
    }

    #[test]
    fn test_planar_distance_is_in_degrees() {
        let a = GpsPoint::new(0.0, 0.0);
        let b = GpsPoint::new(3.0, 4.0);
        assert!(approx_eq(planar_distance(&a, &b), 5.0, 1e-12));
    }

    #[test]
    fn test_centroid_empty() {
        assert!(spherical_centroid(Vec::<GpsPoint>::new()).is_none());
    }

    #[test]
    fn test_centroid_single_point() {
        let p = GpsPoint::new(34.0522, -118.2437);
        let c = spherical_centroid([p]).unwrap();
        assert!(approx_eq(c.latitude, p.latitude, 1e-9));
        assert!(approx_eq(c.longitude, p.longitude, 1e-9));
    }

    #[test]
    fn test_centroid_small_cluster_matches_arithmetic_mean() {
        let points = [
            GpsPoint::new(34.0, -118.0),
            GpsPoint::new(34.0, -118.0),
            GpsPoint::new(34.0001, -118.0001),
        ];
        let c = spherical_centroid(points).unwrap();
        assert!(approx_eq(c.latitude, 34.0000333, 1e-6));
        assert!(approx_eq(c.longitude, -118.0000333, 1e-6));
    }

    #[test]
    fn test_centroid_order_independent() {
        let points = vec![
            GpsPoint::new(34.01, -118.02),
            GpsPoint::new(34.03, -118.01),
            GpsPoint::new(34.02, -118.05),
        ];
        let mut reversed = points.clone();
        reversed.reverse();
        let a = spherical_centroid(points).unwrap();
        let b = spherical_centroid(reversed).unwrap();
        assert!(approx_eq(a.latitude, b.latitude, 1e-12));
        assert!(approx_eq(a.longitude, b.longitude, 1e-12));
    }

    #[test]
    fn test_centroid_across_antimeridian() {
        let c = spherical_centroid([GpsPoint::new(10.0, 179.5), GpsPoint::new(10.0, -179.5)]).unwrap();
        assert!(approx_eq(c.longitude.abs(), 180.0, 1e-6));
        assert!(approx_eq(c.latitude, 10.0, 1e-2));
    }

    #[test]
    fn test_correction_swaps_out_of_range_latitude() {
        let fix = CoordinateCorrection::SwapOutOfRangeLatitude;
        assert_eq!(fix.apply(GpsPoint::new(90.0, 10.0)), GpsPoint::new(10.0, 90.0));
        assert_eq!(fix.apply(GpsPoint::new(-118.25, 34.05)), GpsPoint::new(34.05, -118.25));
        assert!(fix.rewrites(&GpsPoint::new(-200.0, 34.0)));
    }

    #[test]
    fn test_correction_keeps_in_range_points() {
        let fix = CoordinateCorrection::SwapOutOfRangeLatitude;
        assert_eq!(fix.apply(GpsPoint::new(10.0, 90.0)), GpsPoint::new(10.0, 90.0));
        assert_eq!(
            fix.apply(GpsPoint::new(MERCATOR_MAX_LATITUDE, 0.0)),
            GpsPoint::new(MERCATOR_MAX_LATITUDE, 0.0)
        );
        assert!(!fix.rewrites(&GpsPoint::new(34.05, -118.25)));
    }

    #[test]
    fn test_correction_disabled() {
        let fix = CoordinateCorrection::Disabled;
        assert_eq!(fix.apply(GpsPoint::new(90.0, 10.0)), GpsPoint::new(90.0, 10.0));
        assert!(!fix.rewrites(&GpsPoint::new(90.0, 10.0)));
    }
}
