use thiserror::Error;

pub type DomainResult<T> = Result<T, DomainError>;

#[derive(Error, Debug)]
pub enum DomainError {
    #[error("Invalid MAC address: {0}")]
    InvalidMacAddress(String),

    #[error("Invalid topic '{0}': {1}")]
    InvalidTopic(String, String),

    #[error("Identity not found: {0}")]
    IdentityNotFound(String),

    #[error("Malformed envelope: {0}")]
    MalformedEnvelope(String),

    #[error("Directory error: {0}")]
    DirectoryError(String),

    #[error("Scan error: {0}")]
    ScanError(String),

    #[error("Bus error: {0}")]
    BusError(#[from] anyhow::Error),
}
