use std::sync::atomic::{AtomicBool, Ordering::Relaxed};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Cooperative stop signal. Solvers poll it between pipeline phases and
/// refinement generations; they never abort mid-assignment.
#[derive(Clone, Debug, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
    deadline: Option<Instant>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy sharing the same flag, with a wall-clock budget on top.
    pub fn with_time_limit_ms(&self, limit_ms: u64) -> Self {
        Self {
            flag: Arc::clone(&self.flag),
            deadline: Some(Instant::now() + Duration::from_millis(limit_ms)),
        }
    }

    pub fn cancel(&self) {
        self.flag.store(true, Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Relaxed) || self.deadline.map_or(false, |d| Instant::now() >= d)
    }
}
