use thiserror::Error;

/// Error kinds surfaced by the gateway core.
///
/// `Domain` carries a human-readable message for bad input at an external
/// boundary. `Database` wraps storage failures and is only ever seen by the
/// ingest pipeline and the read services, which log it and replace it with
/// `Internal` before anything leaves the core.
#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("{0}")]
    Domain(String),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("internal server error")]
    Internal,
}

impl GatewayError {
    pub fn domain(message: impl Into<String>) -> Self {
        Self::Domain(message.into())
    }

    /// Read-path propagation policy: domain errors pass through with their
    /// message, everything else is logged by the caller and collapsed into
    /// the opaque internal error.
    pub fn internalize(self) -> Self {
        match self {
            err @ GatewayError::Domain(_) => err,
            _ => GatewayError::Internal,
        }
    }
}
