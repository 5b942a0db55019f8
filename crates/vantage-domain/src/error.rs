use thiserror::Error;

#[derive(Error, Debug)]
pub enum DomainError {
    #[error("Codec error: {0}")]
    Codec(#[from] serde_json::Error),

    #[error("Invalid device key: {0:?}")]
    InvalidDeviceKey(String),

    #[error("Alert publish error: {0}")]
    AlertPublishError(anyhow::Error),

    #[error("State store error: {0}")]
    StateStoreError(#[from] anyhow::Error),
}

pub type DomainResult<T> = Result<T, DomainError>;
