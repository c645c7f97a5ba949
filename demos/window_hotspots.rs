//! Example of one hotspot run over an in-memory store.
//!
//! Run with: cargo run --example window_hotspots --features parallel

use chrono::{Duration, TimeZone, Utc};
use std::time::Instant;
use vehicle_hotspots::{HotspotConfig, HotspotPipeline, MemoryStore, PositionRecord, Window};

fn main() {
    println!("Vehicle Hotspots Example\n");

    let Some(start) = Utc.with_ymd_and_hms(2024, 3, 1, 8, 0, 0).single() else {
        return;
    };
    let window = Window::hour_starting_at(start);
    let mut store = MemoryStore::new();

    // Downtown: 12 buses idling around Pershing Square, each reporting every 5 minutes
    for bus in 0..12 {
        for minute in (0..60).step_by(5) {
            let lat = 34.0485 + (bus % 4) as f64 * 0.00008;
            let lon = -118.2524 + (bus / 4) as f64 * 0.00008;
            let t = start + Duration::minutes(minute);
            store.insert_position(PositionRecord::new(format!("bus-{}", bus), lat, lon, t));
        }
    }

    // Santa Monica pier: 5 taxis from a feed that reports (lon, lat)
    for taxi in 0..5 {
        let lat = 34.0095 + taxi as f64 * 0.0001;
        let lon = -118.4970;
        let t = start + Duration::minutes(taxi * 7);
        store.insert_position(PositionRecord::new(format!("taxi-{}", taxi), lon, lat, t));
    }

    // A few lone vehicles that stay noise
    store.insert_position(PositionRecord::new("van-1", 34.1016, -118.3267, start));
    store.insert_position(PositionRecord::new("van-2", 33.9416, -118.4085, start));

    // Reported after the window closes
    store.insert_position(PositionRecord::new("bus-late", 34.0485, -118.2524, window.end));

    let pipeline = match HotspotPipeline::new(HotspotConfig::default()) {
        Ok(p) => p,
        Err(e) => {
            eprintln!("Invalid configuration: {}", e);
            return;
        }
    };

    let timer = Instant::now();
    let report = match pipeline.run(&mut store, &window) {
        Ok(r) => r,
        Err(e) => {
            eprintln!("Run failed: {}", e);
            return;
        }
    };
    let elapsed = timer.elapsed();

    println!("Window: [{}, {})", report.window.start, report.window.end);
    println!("Reports loaded: {}", report.records_loaded);
    println!("Distinct points: {}", report.distinct_points);
    println!("Noise points: {}", report.noise_points);
    println!("Corrected points: {}", report.corrected_points);
    println!("Clusters: {} (in {:?})\n", report.clusters, elapsed);

    for tiled in store.tiled() {
        println!(
            "  Cluster {}: {} vehicles at ({:.5}, {:.5}) tile {}",
            tiled.cluster_id, tiled.amount, tiled.center_latitude, tiled.center_longitude, tiled.tile_key
        );
    }
}
