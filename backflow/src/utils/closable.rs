//! # Closable state
//!
//! Two levels of ownership over a "closed" flag shared between tasks:
//!
//! * [`Closer`] is owned by the resource that decides when to stop. It is closed explicitly or
//!   when it goes out of scope. It is intentionally not [`Clone`].
//! * [`Closable`] is a read-only view handed to dependent tasks (channel event loops, the idle
//!   sweep) which stop once the owner is gone.

use std::sync::atomic::AtomicBool;
use std::sync::{atomic, Arc};

/// State of a resource governed by a single owner.
///
/// ```rust
/// use backflow::utils::Closer;
///
/// let closer = Closer::new();
/// let closable = closer.to_closable();
/// assert!(!closable.is_closed());
///
/// drop(closer);
/// assert!(closable.is_closed());
/// ```
#[derive(Debug)]
#[must_use]
pub struct Closer(Arc<AtomicBool>);

/// Read-only view of a [`Closer`] state.
#[derive(Clone, Debug)]
pub struct Closable(Arc<AtomicBool>);

impl Closer {
    /// Creates an open closer.
    pub fn new() -> Self {
        Self(Arc::new(AtomicBool::new(false)))
    }

    /// Returns a read-only accessor to the internal state.
    pub fn to_closable(&self) -> Closable {
        Closable(self.0.clone())
    }

    /// Closes the resource.
    ///
    /// Returns `true` if this call performed the transition.
    pub fn close(&self) -> bool {
        !self.0.swap(true, atomic::Ordering::AcqRel)
    }

    /// Returns `true` if resource is closed.
    pub fn is_closed(&self) -> bool {
        self.0.load(atomic::Ordering::Acquire)
    }
}

impl Default for Closer {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for Closer {
    fn drop(&mut self) {
        self.close();
    }
}

impl Closable {
    /// Returns `true` if resource is closed.
    pub fn is_closed(&self) -> bool {
        self.0.load(atomic::Ordering::Acquire)
    }
}

#[cfg(test)]
mod closable_tests {
    use super::*;

    #[test]
    fn closer_closes_dependents_once() {
        let closer = Closer::new();
        let closable_1 = closer.to_closable();
        let closable_2 = closable_1.clone();

        assert!(!closable_1.is_closed());
        assert!(closer.close());
        assert!(!closer.close());

        assert!(closable_1.is_closed());
        assert!(closable_2.is_closed());
    }

    #[test]
    fn dropping_closer_closes_dependents() {
        let closer = Closer::new();
        let closable = closer.to_closable();

        drop(closer);
        assert!(closable.is_closed());
    }
}
