use derive_more::From;
use orion_error::{ErrorCode, StructError, UvsReason};

#[derive(Debug, Clone, PartialEq, thiserror::Error, From)]
pub enum StoreReason {
    /// Retryable: connection lost, timeout, server busy.
    #[error("transient store error")]
    Transient,
    /// Terminal: retries exhausted or a non-retryable server reply.
    #[error("store failure")]
    Failure,
    #[error("value decode error")]
    Decode,
    #[error("connection pool error")]
    Pool,
    #[error("{0}")]
    Uvs(UvsReason),
}

impl ErrorCode for StoreReason {
    fn error_code(&self) -> i32 {
        match self {
            Self::Transient => 3001,
            Self::Failure => 3002,
            Self::Decode => 3003,
            Self::Pool => 3004,
            Self::Uvs(u) => u.error_code(),
        }
    }
}

pub type StoreError = StructError<StoreReason>;
pub type StoreResult<T> = Result<T, StoreError>;

/// Whether a redis error is worth retrying.
pub fn is_transient(err: &redis::RedisError) -> bool {
    use redis::ErrorKind;
    if err.is_timeout() || err.is_connection_dropped() {
        return true;
    }
    matches!(
        err.kind(),
        ErrorKind::IoError
            | ErrorKind::TryAgain
            | ErrorKind::BusyLoadingError
            | ErrorKind::ClusterDown
            | ErrorKind::MasterDown
    )
}
