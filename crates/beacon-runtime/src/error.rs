use derive_more::From;
use orion_error::{ErrorCode, StructError, UvsReason};

use beacon_store::StoreReason;

#[derive(Debug, Clone, PartialEq, thiserror::Error, From)]
pub enum RuntimeReason {
    #[error("bootstrap error")]
    Bootstrap,
    #[error("cycle error")]
    Cycle,
    #[error("shutdown error")]
    Shutdown,
    #[error("{0}")]
    Store(StoreReason),
    #[error("{0}")]
    Uvs(UvsReason),
}

impl ErrorCode for RuntimeReason {
    fn error_code(&self) -> i32 {
        match self {
            Self::Bootstrap => 2001,
            Self::Cycle => 2002,
            Self::Shutdown => 2003,
            Self::Store(s) => s.error_code(),
            Self::Uvs(u) => u.error_code(),
        }
    }
}

pub type RuntimeError = StructError<RuntimeReason>;
pub type RuntimeResult<T> = Result<T, RuntimeError>;
