#[macro_use]
mod log_macros;

pub mod lifecycle;
pub mod metrics;
pub mod scheduler;
pub mod tracing_init;
pub(crate) mod publisher_task;
mod error;

pub use error::{RuntimeError, RuntimeReason, RuntimeResult};
