use chrono::{DateTime, TimeZone, Utc};
use clap::Parser;
use log::{info, LevelFilter};
use simple_logger::SimpleLogger;
use std::{
    error::Error,
    fmt::{self, Display},
};
use vehicle_hotspots::{
    ClusterConfig, CoordinateCorrection, HotspotConfig, HotspotPipeline, HttpStore, HttpStoreConfig, Window,
};

/*-------------------------------------------------------------------------------------------------
 *                                     Command Line Options
 *-----------------------------------------------------------------------------------------------*/

///
/// Detect vehicle hotspots for one hour of position reports.
///
/// Reads the reports in [start, start + 1h) from the store, clusters them and writes the
/// cluster detail, cluster summary and tiled cluster series back to the same database.
///
#[derive(Debug, Parser)]
#[command(name = "hotspots", author, version, about)]
struct HotspotsOptions {
    /// Host name of the time-series store.
    #[arg(long, env = "HOTSPOTS_HOST", default_value = "localhost")]
    host: String,

    /// Port of the time-series store HTTP API.
    #[arg(long, env = "HOTSPOTS_PORT", default_value_t = 8086)]
    port: u16,

    /// Database holding the position reports and receiving the clusters.
    #[arg(long, env = "HOTSPOTS_DATABASE", default_value = "vehicles")]
    database: String,

    /// User name for basic auth.
    #[arg(long, env = "HOTSPOTS_USERNAME")]
    username: Option<String>,

    /// Password for basic auth.
    #[arg(long, env = "HOTSPOTS_PASSWORD", hide_env_values = true)]
    password: Option<String>,

    /// Start of the window, as RFC 3339 or Unix seconds.
    ///
    /// If this is not specified the window starts now.
    #[arg(short, long, value_parser = parse_start)]
    start: Option<DateTime<Utc>>,

    /// Neighborhood radius in degrees.
    #[arg(long, default_value_t = 0.0005)]
    epsilon: f64,

    /// Other points within the radius needed for a core point.
    #[arg(long, default_value_t = 3)]
    min_points: usize,

    /// Quadkey level of the tile keys.
    #[arg(long, default_value_t = 16)]
    tile_level: u8,

    /// Do not swap latitude and longitude of out-of-range reports.
    #[arg(long)]
    no_correction: bool,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,
}

fn parse_start(value: &str) -> Result<DateTime<Utc>, String> {
    if let Ok(t) = DateTime::parse_from_rfc3339(value) {
        return Ok(t.with_timezone(&Utc));
    }
    value
        .parse::<i64>()
        .ok()
        .and_then(|secs| Utc.timestamp_opt(secs, 0).single())
        .ok_or_else(|| format!("not an RFC 3339 time or Unix seconds: {}", value))
}

impl Display for HotspotsOptions {
    fn fmt(&self, f: &mut fmt::Formatter) -> Result<(), fmt::Error> {
        writeln!(f)?;
        writeln!(f, "       Store: {}:{}", self.host, self.port)?;
        writeln!(f, "    Database: {}", self.database)?;
        writeln!(f, "     Epsilon: {}", self.epsilon)?;
        writeln!(f, "  Min points: {}", self.min_points)?;
        writeln!(f, "  Tile level: {}", self.tile_level)?;
        writeln!(f, "  Correction: {}", if self.no_correction { "off" } else { "on" })?;
        Ok(())
    }
}

/*-------------------------------------------------------------------------------------------------
 *                                             MAIN
 *-----------------------------------------------------------------------------------------------*/
fn main() -> Result<(), Box<dyn Error>> {
    let opts = HotspotsOptions::parse();

    let level = if opts.verbose { LevelFilter::Debug } else { LevelFilter::Info };
    SimpleLogger::new().with_level(level).init()?;

    if opts.verbose {
        info!("{}", opts);
    }

    let config = HotspotConfig {
        cluster: ClusterConfig {
            epsilon: opts.epsilon,
            min_points: opts.min_points,
        },
        tile_level: opts.tile_level,
        correction: if opts.no_correction {
            CoordinateCorrection::Disabled
        } else {
            CoordinateCorrection::SwapOutOfRangeLatitude
        },
    };
    let pipeline = HotspotPipeline::new(config)?;

    let mut store_config = HttpStoreConfig::for_host(&opts.host, opts.port, &opts.database);
    store_config.username = opts.username;
    store_config.password = opts.password;
    let mut store = HttpStore::new(store_config)?;

    let window = Window::hour_starting_at(opts.start.unwrap_or_else(Utc::now));
    let report = pipeline.run(&mut store, &window)?;

    info!(
        "Window [{}, {}): {} reports, {} clusters, {} detail records, {} noise points in {:.2}s",
        report.window.start,
        report.window.end,
        report.records_loaded,
        report.clusters,
        report.details_written,
        report.noise_points,
        report.elapsed.as_secs_f64()
    );

    Ok(())
}
