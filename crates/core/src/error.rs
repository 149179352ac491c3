use thiserror::Error;

/// Result alias used across the updater.
pub type Result<T> = std::result::Result<T, UpdateError>;

/// Every way a single update invocation can fail.
///
/// None of these are retried in-process; the next scheduled tick is the retry.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum UpdateError {
    /// Missing or malformed local configuration or blob table entry.
    #[error("config error: {0}")]
    Config(String),
    /// The endpoint did not answer the reachability probe.
    #[error("health check failed: {0}")]
    HealthCheck(String),
    /// Bad credentials or session failure.
    #[error("auth error: {0}")]
    Auth(String),
    /// The profile record does not exist on the remote repo.
    #[error("record not found: {0}")]
    NotFound(String),
    /// Network failure, timeout or server-side error on fetch or write.
    #[error("transient error: {0}")]
    Transient(String),
    /// Remote revision mismatch; another writer got there first.
    #[error("conflict: {0}")]
    Conflict(String),
}

impl UpdateError {
    /// Short, stable reason tag used in log lines.
    pub fn reason(&self) -> &'static str {
        match self {
            Self::Config(_) => "config",
            Self::HealthCheck(_) => "unhealthy",
            Self::Auth(_) => "auth",
            Self::NotFound(_) => "not_found",
            Self::Transient(_) => "transient",
            Self::Conflict(_) => "conflict",
        }
    }

    pub(crate) fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }
}

impl From<serde_json::Error> for UpdateError {
    fn from(e: serde_json::Error) -> Self {
        Self::Config(format!("invalid json: {e}"))
    }
}
