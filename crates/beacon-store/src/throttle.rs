//! Per-kind log suppression.
//!
//! A persistently failing store would otherwise emit the same error every
//! cycle; each error kind logs once per window, and the next allowed log
//! reports how many were swallowed in between.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

struct KindState {
    last_logged: Instant,
    suppressed: u64,
}

pub struct LogThrottle {
    window: Duration,
    kinds: Mutex<HashMap<&'static str, KindState>>,
}

impl LogThrottle {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            kinds: Mutex::new(HashMap::new()),
        }
    }

    /// Whether a message of this kind may log now. `Some(n)` allows it and
    /// carries the number suppressed since the previous allowed log.
    pub fn allow(&self, kind: &'static str) -> Option<u64> {
        let mut kinds = self.kinds.lock().expect("throttle lock poisoned");
        let now = Instant::now();
        match kinds.get_mut(kind) {
            None => {
                kinds.insert(
                    kind,
                    KindState {
                        last_logged: now,
                        suppressed: 0,
                    },
                );
                Some(0)
            }
            Some(state) if now.duration_since(state.last_logged) >= self.window => {
                let n = state.suppressed;
                state.last_logged = now;
                state.suppressed = 0;
                Some(n)
            }
            Some(state) => {
                state.suppressed += 1;
                None
            }
        }
    }
}

impl Default for LogThrottle {
    fn default() -> Self {
        Self::new(Duration::from_secs(60))
    }
}
