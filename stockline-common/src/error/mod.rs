//! Consolidated error handling for the cache fabric.
//!
//! A single crate-level error type covers the fabric's failure modes so that
//! component boundaries stay `Result`-shaped and the HTTP edge can map kinds
//! to status codes without inspecting messages. The type is `Clone` because
//! single-flight delivers one populator outcome, success or failure, to every
//! coalesced waiter.

mod classify;

pub use classify::{retry_once, retry_transient, ErrorCategory, ErrorClassification};

use thiserror::Error;

/// Fabric-wide error taxonomy.
///
/// Variants carry rendered messages rather than wrapped source errors so the
/// type stays `Clone`; conversions from driver errors happen in the `From`
/// impls below.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum FabricError {
    /// Malformed input: bad symbol, bad currency code, missing parameter
    #[error("validation error: {0}")]
    Validation(String),

    /// Entity unknown upstream and downstream, or series too short to serve
    #[error("not found: {0}")]
    NotFound(String),

    /// Upstream provider did not answer before its deadline
    #[error("upstream timeout: {0}")]
    UpstreamTimeout(String),

    /// Upstream provider transport or protocol failure
    #[error("upstream unavailable: {0}")]
    UpstreamUnavailable(String),

    /// Persistent tier unreachable (connectivity, pool exhaustion)
    #[error("storage unavailable: {0}")]
    StorageUnavailable(String),

    /// Persistent tier reachable but the operation failed (rolled back)
    #[error("storage failure: {0}")]
    StorageFailure(String),

    /// No FX rate obtainable from cache or any provider
    #[error("no exchange rate available: {0}")]
    FxUnavailable(String),

    /// Normalization rejected a batch; nothing was stored
    #[error("data quality: {0}")]
    DataQuality(String),

    /// Distributed cache tier failure
    #[error("cache error: {0}")]
    Cache(String),

    /// Bad or missing configuration, or a disabled subsystem was invoked
    #[error("configuration error: {0}")]
    Config(String),

    /// Unexpected condition
    #[error("internal error: {0}")]
    Internal(String),
}

pub type FabricResult<T> = Result<T, FabricError>;

impl FabricError {
    /// HTTP status the edge should map this error to.
    pub fn http_status(&self) -> u16 {
        match self {
            FabricError::Validation(_) => 400,
            FabricError::NotFound(_) => 404,
            FabricError::Config(_) => 503,
            FabricError::UpstreamTimeout(_)
            | FabricError::UpstreamUnavailable(_)
            | FabricError::StorageUnavailable(_)
            | FabricError::StorageFailure(_)
            | FabricError::FxUnavailable(_)
            | FabricError::DataQuality(_)
            | FabricError::Cache(_)
            | FabricError::Internal(_) => 500,
        }
    }

    /// Shorthand used by validators.
    pub fn validation(msg: impl Into<String>) -> Self {
        FabricError::Validation(msg.into())
    }

    /// Shorthand used when an entity or series is missing.
    pub fn not_found(msg: impl Into<String>) -> Self {
        FabricError::NotFound(msg.into())
    }
}

impl From<sqlx::Error> for FabricError {
    fn from(err: sqlx::Error) -> Self {
        match &err {
            sqlx::Error::Io(_)
            | sqlx::Error::PoolTimedOut
            | sqlx::Error::PoolClosed
            | sqlx::Error::Tls(_) => FabricError::StorageUnavailable(err.to_string()),
            sqlx::Error::RowNotFound => FabricError::NotFound(err.to_string()),
            _ => FabricError::StorageFailure(err.to_string()),
        }
    }
}

impl From<redis::RedisError> for FabricError {
    fn from(err: redis::RedisError) -> Self {
        FabricError::Cache(err.to_string())
    }
}

impl From<reqwest::Error> for FabricError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            FabricError::UpstreamTimeout(err.to_string())
        } else {
            FabricError::UpstreamUnavailable(err.to_string())
        }
    }
}

impl From<serde_json::Error> for FabricError {
    fn from(err: serde_json::Error) -> Self {
        FabricError::Internal(format!("serialization: {}", err))
    }
}
