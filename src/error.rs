use thiserror::Error;

/// Reasons a visitor can be refused or a visitor operation can fail.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum VisitorError {
    #[error("visitor is not active")]
    Inactive,
    #[error("visitor token has expired")]
    Expired,
    #[error("visitor has no visits remaining")]
    NoVisitsRemaining,
    #[error("invalid url: {0}")]
    InvalidUrl(String),
    #[error("invalid email address")]
    InvalidEmail,
    #[error("missing scope")]
    MissingScope,
    #[error("expiry is out of range")]
    ExpiryOutOfRange,
}
