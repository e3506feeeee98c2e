//! Take-once slot shared between racing events.

use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};

/// A shared optional value that can be taken at most once.
///
/// Every clone refers to the same slot. Whichever holder calls `take` first
/// receives the value; everybody else observes `None`. The read-and-clear
/// happens under one lock, so two terminal events can never both win, even
/// when they are delivered from different threads.
pub struct OnceSlot<T> {
    inner: Arc<Mutex<Option<T>>>,
}

impl<T> OnceSlot<T> {
    pub fn new(value: T) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Some(value))),
        }
    }

    pub fn take(&self) -> Option<T> {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
    }

    pub fn is_taken(&self) -> bool {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_none()
    }
}

impl<T> Clone for OnceSlot<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T> fmt::Debug for OnceSlot<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OnceSlot")
            .field("taken", &self.is_taken())
            .finish()
    }
}
