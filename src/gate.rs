//! Global bound on concurrently running synthesis calls.
//!
//! Every language shares one gate: the compute device is the bottleneck, not
//! the individual model.  Waiters are admitted in arrival order (tokio's
//! semaphore is fair), so none starves.

use std::sync::Arc;

use tokio::sync::{OwnedSemaphorePermit, Semaphore};

/// Default number of simultaneous synthesis calls.
pub const DEFAULT_CONCURRENCY: usize = 4;

#[derive(Debug, Clone)]
pub struct ConcurrencyGate {
    semaphore: Arc<Semaphore>,
    limit: usize,
}

/// A held slot.  Dropping it releases the slot, on every exit path.
#[derive(Debug)]
pub struct GateToken {
    _permit: OwnedSemaphorePermit,
}

impl ConcurrencyGate {
    /// A gate admitting `limit` concurrent holders (at least one).
    pub fn new(limit: usize) -> Self {
        let limit = limit.max(1);
        Self { semaphore: Arc::new(Semaphore::new(limit)), limit }
    }

    /// Wait for a free slot.
    pub async fn acquire(&self) -> GateToken {
        let permit = Arc::clone(&self.semaphore)
            .acquire_owned()
            .await
            .expect("gate semaphore is never closed");
        GateToken { _permit: permit }
    }

    /// Take a slot only if one is free right now.
    pub fn try_acquire(&self) -> Option<GateToken> {
        Arc::clone(&self.semaphore)
            .try_acquire_owned()
            .ok()
            .map(|permit| GateToken { _permit: permit })
    }

    /// Explicit release; equivalent to dropping the token.
    pub fn release(&self, token: GateToken) {
        drop(token);
    }

    pub fn limit(&self) -> usize {
        self.limit
    }

    /// Slots currently held.
    pub fn outstanding(&self) -> usize {
        self.limit - self.semaphore.available_permits()
    }
}

impl Default for ConcurrencyGate {
    fn default() -> Self {
        Self::new(DEFAULT_CONCURRENCY)
    }
}
