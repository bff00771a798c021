use std::time::Duration;

use orion_error::prelude::*;
use orion_error::ErrorOweBase;
use tokio::task::JoinHandle;

use crate::error::{RuntimeReason, RuntimeResult};

// ---------------------------------------------------------------------------
// TaskGroup — named collection of async tasks for ordered shutdown
// ---------------------------------------------------------------------------

/// A named group of async tasks that are shut down together.
///
/// Groups are assembled in *start order* and joined in *reverse order*
/// (LIFO) during shutdown:
///
///   start:  publisher → metrics → health → scheduler
///   join:   scheduler → health → metrics → publisher
///
/// The scheduler finishes its final cycle first; the publisher then drains
/// whatever that cycle staged, bounded by its join timeout (the publish
/// grace period).
pub(crate) struct TaskGroup {
    pub(super) name: &'static str,
    handles: Vec<JoinHandle<anyhow::Result<()>>>,
    join_timeout: Option<Duration>,
}

impl TaskGroup {
    pub(super) fn new(name: &'static str) -> Self {
        Self {
            name,
            handles: Vec::new(),
            join_timeout: None,
        }
    }

    /// Bound each join in this group; tasks still running at the deadline
    /// are aborted.
    pub(super) fn with_join_timeout(mut self, timeout: Duration) -> Self {
        self.join_timeout = Some(timeout);
        self
    }

    pub(super) fn push(&mut self, handle: JoinHandle<anyhow::Result<()>>) {
        self.handles.push(handle);
    }

    /// Join all tasks in this group, returning the first error.
    pub(super) async fn wait(self) -> RuntimeResult<()> {
        for handle in self.handles {
            let abort = handle.abort_handle();
            let joined = match self.join_timeout {
                Some(timeout) => match tokio::time::timeout(timeout, handle).await {
                    Ok(joined) => joined,
                    Err(_) => {
                        bcn_warn!(
                            sys,
                            task_group = self.name,
                            timeout_ms = timeout.as_millis() as u64,
                            "task did not finish within grace period, aborting"
                        );
                        abort.abort();
                        continue;
                    }
                },
                None => handle.await,
            };
            joined
                .map_err(|e| {
                    StructError::from(RuntimeReason::Shutdown)
                        .with_detail(format!("task join error: {e}"))
                })?
                .owe(RuntimeReason::Shutdown)?;
        }
        Ok(())
    }
}
