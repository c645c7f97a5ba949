//! Quadtree tile keys for cluster centroids.
//!
//! Uses the Web Mercator quadkey scheme: the world is split into `2^level x 2^level` tiles
//! of 256 pixels, and a tile is named by one base-4 digit per level, each digit selecting a
//! quadrant (`0` top-left, `1` top-right, `2` bottom-left, `3` bottom-right). A key at a
//! coarser level is a prefix of the keys of the tiles it contains.
//!
//! Coordinates outside the projection are rejected rather than clamped: a centroid out there
//! means the coordinate correction did not hold for the input.

use std::f64::consts::PI;

use crate::geo_utils::MERCATOR_MAX_LATITUDE;
use crate::{GpsPoint, HotspotError};

/// Finest supported level; pixel coordinates still fit in a u32.
pub const MAX_TILE_LEVEL: u8 = 23;

const TILE_SIZE: u64 = 256;

/// Maps coordinates to quadkeys at a fixed level.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TileMapper {
    level: u8,
}

impl TileMapper {
    pub fn new(level: u8) -> Result<Self, HotspotError> {
        if level == 0 || level > MAX_TILE_LEVEL {
            return Err(HotspotError::InvalidTileLevel(level));
        }
        Ok(Self { level })
    }

    pub fn level(&self) -> u8 {
        self.level
    }

    /// Quadkey of the tile containing `point`.
    ///
    /// ```rust
    /// use vehicle_hotspots::{GpsPoint, TileMapper};
    ///
    /// let tiles = TileMapper::new(10).unwrap();
    /// let key = tiles.tile_key(&GpsPoint::new(34.05, -118.25)).unwrap();
    /// assert_eq!(key, "0230123111");
    ///
    /// assert!(tiles.tile_key(&GpsPoint::new(89.0, 0.0)).is_err());
    /// ```
    pub fn tile_key(&self, point: &GpsPoint) -> Result<String, HotspotError> {
        if !in_projection(point) {
            return Err(HotspotError::OutOfProjection {
                latitude: point.latitude,
                longitude: point.longitude,
            });
        }

        let (px, py) = pixel_xy(point.latitude, point.longitude, self.level);
        Ok(quadkey(px / TILE_SIZE, py / TILE_SIZE, self.level))
    }
}

/// Inside the Web Mercator projection and finite.
pub(crate) fn in_projection(p: &GpsPoint) -> bool {
    p.is_finite()
        && (-MERCATOR_MAX_LATITUDE..=MERCATOR_MAX_LATITUDE).contains(&p.latitude)
        && (-180.0..=180.0).contains(&p.longitude)
}

/// Pixel coordinates of a point at the given level.
fn pixel_xy(latitude: f64, longitude: f64, level: u8) -> (u64, u64) {
    let map_size = (TILE_SIZE << level) as f64;

    let x = (longitude + 180.0) / 360.0;
    let sin_lat = (latitude * PI / 180.0).sin();
    let y = 0.5 - ((1.0 + sin_lat) / (1.0 - sin_lat)).ln() / (4.0 * PI);

    // The right and bottom edges belong to the last pixel
    let px = (x * map_size + 0.5).clamp(0.0, map_size - 1.0) as u64;
    let py = (y * map_size + 0.5).clamp(0.0, map_size - 1.0) as u64;
    (px, py)
}

fn quadkey(tile_x: u64, tile_y: u64, level: u8) -> String {
    (1..=level)
        .rev()
        .map(|i| {
            let mask = 1u64 << (i - 1);
            let mut digit = b'0';
            if tile_x & mask != 0 {
                digit += 1;
            }
            if tile_y & mask != 0 {
                digit += 2;
            }
            digit as char
        })
        .collect()
}
