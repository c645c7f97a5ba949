//! HTTP record store for an InfluxDB 1.x compatible time-series database.
//!
//! - Positions are read with one InfluxQL `SELECT` per window (`/query`, epoch milliseconds)
//! - Output sets are written as line protocol (`/write`, millisecond precision)
//! - Large writes are split into batches sent with bounded concurrency
//! - Transport errors, 429 and 5xx responses are retried with exponential backoff
//!
//! The store is synchronous: it owns a tokio runtime and blocks on the async client, so it
//! must not be used from inside another runtime.

use std::time::{Duration, Instant};

use base64::Engine;
use chrono::{DateTime, SecondsFormat, TimeZone, Utc};
use futures::stream::{self, StreamExt, TryStreamExt};
use log::{debug, info, warn};
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::runtime::{Builder, Runtime};

use crate::error::StoreError;
use crate::position::{PositionRecord, Window};
use crate::records::{TiledVehicleCluster, VehicleCluster, VehicleClusterDetail};
use crate::store::{OutputSet, RecordStore};

const MAX_RETRIES: u32 = 3;
const MAX_CONCURRENT_WRITES: usize = 4;

/// Connection settings for [`HttpStore`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpStoreConfig {
    /// Server root, e.g. `http://localhost:8086`
    pub base_url: String,
    pub database: String,
    /// Basic auth, sent only when a username is set
    pub username: Option<String>,
    pub password: Option<String>,
    /// Measurement holding the position reports
    pub positions_series: String,
    pub detail_series: String,
    pub cluster_series: String,
    pub tiled_series: String,
    /// Lines per write request
    pub write_batch_size: usize,
    pub timeout_secs: u64,
}

impl Default for HttpStoreConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8086".to_string(),
            database: "vehicles".to_string(),
            username: None,
            password: None,
            positions_series: "vehicle_position".to_string(),
            detail_series: OutputSet::Detail.name().to_string(),
            cluster_series: OutputSet::Cluster.name().to_string(),
            tiled_series: OutputSet::TiledCluster.name().to_string(),
            write_batch_size: 5000,
            timeout_secs: 30,
        }
    }
}

impl HttpStoreConfig {
    /// Config for `http://{host}:{port}` with everything else defaulted.
    pub fn for_host(host: &str, port: u16, database: &str) -> Self {
        Self {
            base_url: format!("http://{}:{}", host, port),
            database: database.to_string(),
            ..Self::default()
        }
    }

    /// Series name an output set is written to.
    pub fn series(&self, set: OutputSet) -> &str {
        match set {
            OutputSet::Detail => &self.detail_series,
            OutputSet::Cluster => &self.cluster_series,
            OutputSet::TiledCluster => &self.tiled_series,
        }
    }

    fn auth_header(&self) -> Option<String> {
        self.username.as_ref().map(|user| {
            let password = self.password.as_deref().unwrap_or_default();
            let token = base64::engine::general_purpose::STANDARD.encode(format!("{}:{}", user, password));
            format!("Basic {}", token)
        })
    }
}

// ============================================================================
// Query response
// ============================================================================

#[derive(Debug, Deserialize)]
struct QueryResponse {
    #[serde(default)]
    results: Vec<StatementResult>,
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct StatementResult {
    #[serde(default)]
    series: Vec<Series>,
    error: Option<String>,
    /// Set when the server truncated the result (max-row-limit)
    #[serde(default)]
    partial: bool,
}

#[derive(Debug, Deserialize)]
struct Series {
    columns: Vec<String>,
    #[serde(default)]
    values: Vec<Vec<Value>>,
    #[serde(default)]
    partial: bool,
}

/// InfluxQL selecting the reports of `window` from `series`.
fn position_query(series: &str, window: &Window) -> String {
    format!(
        "SELECT \"vehicle_id\",\"latitude\",\"longitude\" FROM \"{}\" WHERE time >= '{}' AND time < '{}'",
        series.replace('"', "\\\""),
        window.start.to_rfc3339_opts(SecondsFormat::Millis, true),
        window.end.to_rfc3339_opts(SecondsFormat::Millis, true)
    )
}

fn column(columns: &[String], name: &str) -> Result<usize, StoreError> {
    columns
        .iter()
        .position(|c| c == name)
        .ok_or_else(|| StoreError::Response(format!("missing column '{}'", name)))
}

/// Decode a `/query` response body (queried with `epoch=ms`) into position records.
///
/// Rows with a null or non-numeric coordinate are skipped. A truncated result is an error:
/// clustering part of a window would change its densities.
fn parse_positions(body: &[u8]) -> Result<Vec<PositionRecord>, StoreError> {
    let response: QueryResponse =
        serde_json::from_slice(body).map_err(|e| StoreError::Response(format!("JSON parse error: {}", e)))?;

    if let Some(error) = response.error {
        return Err(StoreError::Server(error));
    }

    let mut records = Vec::new();
    let mut skipped = 0usize;

    for statement in response.results {
        if let Some(error) = statement.error {
            return Err(StoreError::Server(error));
        }
        if statement.partial || statement.series.iter().any(|s| s.partial) {
            return Err(StoreError::Response(
                "partial result: the server truncated the window (max-row-limit)".to_string(),
            ));
        }
        for series in statement.series {
            let time = column(&series.columns, "time")?;
            let identity = column(&series.columns, "vehicle_id")?;
            let latitude = column(&series.columns, "latitude")?;
            let longitude = column(&series.columns, "longitude")?;

            for row in &series.values {
                let timestamp = row
                    .get(time)
                    .and_then(Value::as_i64)
                    .and_then(|ms| Utc.timestamp_millis_opt(ms).single());
                let lat = row.get(latitude).and_then(Value::as_f64);
                let lon = row.get(longitude).and_then(Value::as_f64);

                match (timestamp, lat, lon) {
                    (Some(timestamp), Some(lat), Some(lon)) => {
                        let id = match row.get(identity) {
                            Some(Value::String(s)) => s.clone(),
                            Some(Value::Null) | None => String::new(),
                            Some(other) => other.to_string(),
                        };
                        records.push(PositionRecord::new(id, lat, lon, timestamp));
                    }
                    _ => skipped += 1,
                }
            }
        }
    }

    if skipped > 0 {
        debug!("[HttpStore] Skipped {} rows without time or coordinates", skipped);
    }

    Ok(records)
}

// ============================================================================
// Line protocol
// ============================================================================

/// Escape a measurement name.
fn escape_measurement(s: &str) -> String {
    s.replace(',', "\\,").replace(' ', "\\ ")
}

/// Escape a tag value.
fn escape_tag(s: &str) -> String {
    s.replace(',', "\\,").replace('=', "\\=").replace(' ', "\\ ")
}

fn millis(t: &DateTime<Utc>) -> i64 {
    t.timestamp_millis()
}

/// A record that can be written as one line-protocol point.
trait LineProtocol {
    fn to_line(&self, measurement: &str) -> String;
}

impl LineProtocol for VehicleClusterDetail {
    fn to_line(&self, measurement: &str) -> String {
        format!(
            "{},cluster_id={},point_index={} latitude={},longitude={} {}",
            escape_measurement(measurement),
            self.cluster_id,
            self.point_index,
            self.latitude,
            self.longitude,
            millis(&self.timestamp)
        )
    }
}

impl LineProtocol for VehicleCluster {
    fn to_line(&self, measurement: &str) -> String {
        format!(
            "{},cluster_id={} center_latitude={},center_longitude={},member_count={}i {}",
            escape_measurement(measurement),
            self.cluster_id,
            self.center_latitude,
            self.center_longitude,
            self.member_count,
            millis(&self.timestamp)
        )
    }
}

impl LineProtocol for TiledVehicleCluster {
    fn to_line(&self, measurement: &str) -> String {
        format!(
            "{},tile_key={},cluster_id={} center_latitude={},center_longitude={},amount={}i {}",
            escape_measurement(measurement),
            escape_tag(&self.tile_key),
            self.cluster_id,
            self.center_latitude,
            self.center_longitude,
            self.amount,
            millis(&self.timestamp)
        )
    }
}

/// Join lines into request bodies of at most `batch_size` lines each.
fn batch_bodies(lines: &[String], batch_size: usize) -> Vec<String> {
    lines
        .chunks(batch_size.max(1))
        .map(|chunk| chunk.join("\n"))
        .collect()
}

// ============================================================================
// Transport
// ============================================================================

fn is_retryable(status: StatusCode) -> bool {
    status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error()
}

/// Errors raised while building the request (bad URL, bad header) fail the same way every time.
fn is_retryable_error(e: &reqwest::Error) -> bool {
    !e.is_builder()
}

/// Exponential backoff before retry number `retry` (1-based): 400ms, 800ms, 1.6s.
fn backoff(retry: u32) -> Duration {
    Duration::from_millis(200 * (1 << retry.min(4)))
}

/// Synchronous InfluxDB record store.
pub struct HttpStore {
    config: HttpStoreConfig,
    client: Client,
    auth_header: Option<String>,
    runtime: Runtime,
}

impl HttpStore {
    pub fn new(config: HttpStoreConfig) -> Result<Self, StoreError> {
        let client = Client::builder()
            .pool_max_idle_per_host(MAX_CONCURRENT_WRITES * 2)
            .pool_idle_timeout(Duration::from_secs(60))
            .tcp_keepalive(Duration::from_secs(30))
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| StoreError::Request(format!("Failed to create HTTP client: {}", e)))?;

        let runtime = Builder::new_multi_thread()
            .worker_threads(2)
            .enable_all()
            .build()
            .map_err(|e| StoreError::Request(format!("Failed to create tokio runtime: {}", e)))?;

        Ok(Self {
            auth_header: config.auth_header(),
            config,
            client,
            runtime,
        })
    }

    pub fn config(&self) -> &HttpStoreConfig {
        &self.config
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.config.base_url.trim_end_matches('/'), path)
    }

    /// Send the request built by `build`, retrying transient failures.
    async fn send(&self, what: &str, build: impl Fn() -> RequestBuilder) -> Result<Response, StoreError> {
        let mut retries = 0;
        let req_start = Instant::now();

        loop {
            let mut request = build();
            if let Some(auth) = &self.auth_header {
                request = request.header("Authorization", auth);
            }

            match request.send().await {
                Ok(resp) => {
                    let status = resp.status();

                    if is_retryable(status) {
                        retries += 1;
                        if retries > MAX_RETRIES {
                            let body = resp.text().await.unwrap_or_default();
                            return Err(StoreError::Server(format!(
                                "{}: HTTP {} after {} retries: {}",
                                what, status, MAX_RETRIES, body
                            )));
                        }
                        let wait = backoff(retries);
                        warn!(
                            "[HttpStore] {} got HTTP {} after {:?}, retry {} in {:?}",
                            what,
                            status,
                            req_start.elapsed(),
                            retries,
                            wait
                        );
                        tokio::time::sleep(wait).await;
                        continue;
                    }

                    if !status.is_success() {
                        let body = resp.text().await.unwrap_or_default();
                        return Err(StoreError::Server(format!("{}: HTTP {}: {}", what, status, body)));
                    }

                    debug!("[HttpStore] {} -> {} in {:?}", what, status, req_start.elapsed());
                    return Ok(resp);
                }
                Err(e) => {
                    if !is_retryable_error(&e) {
                        return Err(StoreError::Request(format!("{}: {}", what, e)));
                    }
                    retries += 1;
                    if retries > MAX_RETRIES {
                        return Err(StoreError::Request(format!("{}: {}", what, e)));
                    }
                    let wait = backoff(retries);
                    warn!("[HttpStore] {} error: {}, retry {} in {:?}", what, e, retries, wait);
                    tokio::time::sleep(wait).await;
                }
            }
        }
    }

    async fn query_async(&self, window: &Window) -> Result<Vec<PositionRecord>, StoreError> {
        let url = self.url("query");
        let q = position_query(&self.config.positions_series, window);

        let resp = self
            .send("query", || {
                self.client.get(&url).query(&[
                    ("db", self.config.database.as_str()),
                    ("epoch", "ms"),
                    ("q", q.as_str()),
                ])
            })
            .await?;

        let body = resp
            .bytes()
            .await
            .map_err(|e| StoreError::Response(format!("Body download error: {}", e)))?;

        parse_positions(&body)
    }

    async fn write_async(&self, set: OutputSet, lines: Vec<String>) -> Result<(), StoreError> {
        let url = self.url("write");
        let bodies = batch_bodies(&lines, self.config.write_batch_size);
        let batches = bodies.len();
        let start = Instant::now();

        stream::iter(bodies)
            .map(|body| {
                let url = &url;
                async move {
                    self.send(set.name(), || {
                        self.client
                            .post(url)
                            .query(&[("db", self.config.database.as_str()), ("precision", "ms")])
                            .body(body.clone())
                    })
                    .await
                    .map(|_| ())
                }
            })
            .buffer_unordered(MAX_CONCURRENT_WRITES)
            .try_collect::<Vec<()>>()
            .await?;

        info!(
            "[HttpStore] Wrote {} {} points in {} batches in {:.2}s",
            lines.len(),
            set,
            batches,
            start.elapsed().as_secs_f64()
        );
        Ok(())
    }

    fn write<R: LineProtocol>(&self, set: OutputSet, records: &[R]) -> Result<(), StoreError> {
        let measurement = self.config.series(set);
        let lines: Vec<String> = records.iter().map(|r| r.to_line(measurement)).collect();
        self.runtime.block_on(self.write_async(set, lines))
    }
}

impl RecordStore for HttpStore {
    fn query_positions(&self, window: &Window) -> Result<Vec<PositionRecord>, StoreError> {
        self.runtime.block_on(self.query_async(window))
    }

    fn append_details(&mut self, records: &[VehicleClusterDetail]) -> Result<(), StoreError> {
        self.write(OutputSet::Detail, records)
    }

    fn append_clusters(&mut self, records: &[VehicleCluster]) -> Result<(), StoreError> {
        self.write(OutputSet::Cluster, records)
    }

    fn append_tiled(&mut self, records: &[TiledVehicleCluster]) -> Result<(), StoreError> {
        self.write(OutputSet::TiledCluster, records)
    }
}
