use thiserror::Error;

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("checkpoint for partition {partition} would regress from {durable} to {attempted}")]
    CheckpointRegression {
        partition: u32,
        durable: u64,
        attempted: u64,
    },

    #[error("lease store error: {0}")]
    LeaseStore(anyhow::Error),

    #[error("checkpoint store error: {0}")]
    CheckpointStore(anyhow::Error),

    #[error("stream transport error: {0}")]
    Transport(#[from] anyhow::Error),
}

pub type EngineResult<T> = Result<T, EngineError>;
