use thiserror::Error;

/// Failure taxonomy shared by the vendor clients, the store and the HTTP layer.
///
/// The HTTP status each variant maps to lives in `api::errors`.
#[derive(Debug, Error)]
pub enum Error {
    /// A required secret or identifier is not configured.
    #[error("configuration error: {0}")]
    Config(String),

    /// The vendor rejected the credential exchange or a cached access token,
    /// or the exchange response was unusable (missing token, non-positive TTL).
    #[error("authentication failed: {0}")]
    Auth(String),

    /// A required request field is missing or malformed.
    #[error("{0}")]
    Validation(String),

    /// Inbound webhook failed signature verification.
    #[error("unauthorized")]
    Unauthorized,

    /// Vendor HTTP call failed or answered with a `success=false` envelope.
    #[error("upstream error: {0:#}")]
    Upstream(anyhow::Error),

    /// Nothing stored for the requested key or range.
    #[error("{0}")]
    NotFound(String),

    #[error("store error: {0:#}")]
    Store(anyhow::Error),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

impl Error {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn upstream(err: impl Into<anyhow::Error>) -> Self {
        Self::Upstream(err.into())
    }

    pub fn store(err: impl Into<anyhow::Error>) -> Self {
        Self::Store(err.into())
    }
}

impl From<sqlx::Error> for Error {
    fn from(e: sqlx::Error) -> Self {
        Self::Store(e.into())
    }
}
