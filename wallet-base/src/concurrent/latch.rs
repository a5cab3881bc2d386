use std::any::Any;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::Mutex;

/// The failure that ends a concurrent map.
pub(crate) enum Failure<E> {
    /// The transform returned an error.
    Task(E),
    /// The transform panicked, the payload is re-raised once every task is joined.
    Panic(Box<dyn Any + Send>),
}

/// Holds the first failure observed across all tasks of one map call. The first claim wins and
/// is never overwritten; later claims are rejected.
pub(crate) struct FailureLatch<E> {
    /// Set once a failure is stored, read without the lock to gate admission.
    claimed: AtomicBool,
    failure: Mutex<Option<Failure<E>>>,
}

impl<E> FailureLatch<E> {
    pub(crate) fn new() -> Self {
        Self {
            claimed: AtomicBool::new(false),
            failure: Mutex::new(None),
        }
    }

    pub(crate) fn is_claimed(&self) -> bool {
        self.claimed.load(Ordering::Acquire)
    }

    /// Stores `failure` if no other failure was stored before. Returns whether this call won.
    pub(crate) fn claim(&self, failure: Failure<E>) -> bool {
        let mut slot = self.failure.lock();
        if self.claimed.load(Ordering::Acquire) {
            return false;
        }
        *slot = Some(failure);
        self.claimed.store(true, Ordering::Release);
        true
    }

    /// Takes the winning failure out. The latch stays claimed.
    pub(crate) fn take(&self) -> Option<Failure<E>> {
        self.failure.lock().take()
    }
}
