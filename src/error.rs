//! Error types for the hotspot pipeline.

/// Failure reported by a record store collaborator.
///
/// The pipeline never interprets or retries these; they are propagated to the caller
/// unchanged inside [`HotspotError::Store`].
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// The request could not be sent or the connection failed.
    #[error("store request failed: {0}")]
    Request(String),
    /// The store answered with something we could not decode.
    #[error("invalid store response: {0}")]
    Response(String),
    /// The store rejected the query or write.
    #[error("store error: {0}")]
    Server(String),
}

/// Errors that abort a pipeline run.
#[derive(Debug, thiserror::Error)]
pub enum HotspotError {
    #[error(transparent)]
    Store(#[from] StoreError),

    /// A centroid landed outside the tiling projection after correction.
    #[error("coordinate ({latitude}, {longitude}) is outside the tiling projection")]
    OutOfProjection { latitude: f64, longitude: f64 },

    /// A cluster engine produced a cluster without members.
    #[error("cluster {0} has no members")]
    EmptyCluster(u32),

    #[error("tile level {0} is outside 1..=23")]
    InvalidTileLevel(u8),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}
