//! Atomic shared variable.
//!
//! A read-mostly holder for routing state that is replaced wholesale by
//! background refreshers. Readers get a consistent `Arc` snapshot and never
//! wait on a writer for longer than a pointer swap.

use arc_swap::ArcSwap;
use std::fmt;
use std::sync::Arc;

/// Concurrency-safe holder whose value is only ever replaced as a whole.
pub struct AtomicVar<T> {
    inner: ArcSwap<T>,
}

impl<T> AtomicVar<T> {
    /// Create a new variable holding `value`.
    pub fn new(value: T) -> Self {
        Self {
            inner: ArcSwap::from_pointee(value),
        }
    }

    /// Return a consistent snapshot of the current value.
    pub fn get(&self) -> Arc<T> {
        self.inner.load_full()
    }

    /// Replace the current value. Readers holding an older snapshot keep it.
    pub fn set(&self, value: T) {
        self.inner.store(Arc::new(value));
    }
}

impl<T: Default> Default for AtomicVar<T> {
    fn default() -> Self {
        Self::new(T::default())
    }
}

impl<T: fmt::Debug> fmt::Debug for AtomicVar<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(&*self.inner.load(), f)
    }
}
