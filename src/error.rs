use thiserror::Error;
use tracing::warn;

/// Failures raised while talking to an upstream booking or weather API.
#[derive(Debug, Error)]
pub enum FetchError {
    /// A single attempt failed at the network level. Retried by the transport.
    #[error("[{label}] request failed: {message}")]
    Network { label: String, message: String },

    /// A single attempt came back non-2xx. Retried by the transport.
    #[error("[{label}] HTTP {status} - {body}")]
    Status {
        label: String,
        status: u16,
        body: String,
    },

    /// Every attempt in the retry budget failed.
    #[error("[{label}] failed after {attempts} attempts (last status: {}, proxy: {via_proxy}) - {body}", .status.map(|s| s.to_string()).unwrap_or_else(|| "none".to_string()))]
    Exhausted {
        label: String,
        attempts: u32,
        status: Option<u16>,
        body: String,
        via_proxy: bool,
    },

    #[error("[{label}] unexpected response shape: {message}")]
    Parse { label: String, message: String },

    #[error("failed to build HTTP client: {0}")]
    Client(#[from] reqwest::Error),
}

impl FetchError {
    pub fn network(label: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Network {
            label: label.into(),
            message: message.into(),
        }
    }

    pub fn parse(label: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Parse {
            label: label.into(),
            message: message.into(),
        }
    }

    /// Last HTTP status seen, if the failure carried one.
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Status { status, .. } => Some(*status),
            Self::Exhausted { status, .. } => *status,
            _ => None,
        }
    }

    pub fn is_exhausted(&self) -> bool {
        matches!(self, Self::Exhausted { .. })
    }
}

/// A stored venue row that cannot be turned into a typed [`crate::models::Venue`].
#[derive(Debug, Error)]
pub enum VenueError {
    #[error("venue row {row}: {message}")]
    MalformedRow { row: String, message: String },

    #[error("venue {venue_id}: unsupported external API '{kind}'")]
    UnsupportedIntegration { venue_id: i64, kind: String },

    #[error("venue {venue_id}: invalid integration attributes: {message}")]
    InvalidAttributes { venue_id: i64, message: String },

    #[error("venue {venue_id}: unknown timezone '{timezone}'")]
    InvalidTimezone { venue_id: i64, timezone: String },

    #[error("venue {venue_id}: invalid booking visibility start time '{value}'")]
    InvalidStartTime { venue_id: i64, value: String },
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("data store request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("data store rejected request ({status}): {message}")]
    Rejected { status: u16, message: String },

    #[error("failed to serialize rows: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("batch affects row {key} more than once")]
    Conflict { key: String },
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing required setting {0}")]
    Missing(&'static str),

    #[error("invalid value for {key}: {message}")]
    Invalid { key: &'static str, message: String },
}

/// What a call site does with an upstream failure.
///
/// Fail-soft scopes (one party-size bucket, one holes variant, one venue/date) use
/// `TreatAsEmpty`; everything else propagates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FailurePolicy {
    #[default]
    TreatAsEmpty,
    Propagate,
}

impl FailurePolicy {
    pub fn resolve<T>(
        self,
        result: Result<Vec<T>, FetchError>,
        scope: &str,
    ) -> Result<Vec<T>, FetchError> {
        match (self, result) {
            (_, Ok(items)) => Ok(items),
            (Self::TreatAsEmpty, Err(e)) => {
                warn!(scope, error = %e, "treating upstream failure as empty result");
                Ok(Vec::new())
            }
            (Self::Propagate, Err(e)) => Err(e),
        }
    }
}
