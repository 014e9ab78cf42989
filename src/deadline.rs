use super::error::EngineError;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

/// Request scoped deadline shared between the caller awaiting a result and the worker doing
/// the store work. Once the caller gives up it marks the deadline abandoned, and the worker
/// bails out at its next [`Deadline::check`] instead of committing.
#[derive(Debug, Clone)]
pub struct Deadline {
    op: &'static str,
    budget: Duration,
    expires_at: Instant,
    abandoned: Arc<AtomicBool>,
}

impl Deadline {
    pub fn new(op: &'static str, budget: Duration) -> Self {
        Self {
            op,
            budget,
            expires_at: Instant::now() + budget,
            abandoned: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn op(&self) -> &'static str {
        self.op
    }

    pub fn budget(&self) -> Duration {
        self.budget
    }

    pub fn abandon(&self) {
        self.abandoned.store(true, Ordering::SeqCst);
    }

    pub fn is_expired(&self) -> bool {
        self.abandoned.load(Ordering::SeqCst) || Instant::now() >= self.expires_at
    }

    pub fn expired(&self) -> EngineError {
        EngineError::Timeout {
            op: self.op,
            after: self.budget,
        }
    }

    pub fn check(&self) -> Result<(), EngineError> {
        if self.is_expired() {
            return Err(self.expired());
        }
        Ok(())
    }
}
