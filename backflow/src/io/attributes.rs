//! # Channel attributes
//!
//! Flags shared between a connection handle, its event loop and the pool.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

const NO_KEEP_ALIVE: u64 = 0;

/// Attributes attached to a single channel.
#[derive(Debug, Default)]
pub struct ChannelAttributes {
    discard: AtomicBool,
    pooled: AtomicBool,
    keep_alive_timeout_ms: AtomicU64,
}

impl ChannelAttributes {
    /// Forces the pool to discard the connection instead of reusing it.
    pub fn mark_discard(&self) {
        self.discard.store(true, Ordering::Release);
    }

    /// Returns `true` if connection must never be reused.
    pub fn is_marked_for_discard(&self) -> bool {
        self.discard.load(Ordering::Acquire)
    }

    /// Sets a keep-alive hint supplied by the protocol layer.
    ///
    /// The hint replaces the maximum idle time of a pooled connection on its next release.
    pub fn set_keep_alive_timeout(&self, timeout: Duration) {
        let millis = (timeout.as_millis() as u64).max(1);
        self.keep_alive_timeout_ms.store(millis, Ordering::Release);
    }

    /// Keep-alive hint if one was supplied.
    pub fn keep_alive_timeout(&self) -> Option<Duration> {
        match self.keep_alive_timeout_ms.load(Ordering::Acquire) {
            NO_KEEP_ALIVE => None,
            millis => Some(Duration::from_millis(millis)),
        }
    }

    /// Returns `true` if the connection is managed by a pool.
    pub fn is_pooled(&self) -> bool {
        self.pooled.load(Ordering::Acquire)
    }

    pub(crate) fn set_pooled(&self, pooled: bool) {
        self.pooled.store(pooled, Ordering::Release);
    }
}

#[cfg(test)]
mod attributes_tests {
    use super::*;

    #[test]
    fn keep_alive_hint_is_absent_by_default() {
        let attributes = ChannelAttributes::default();
        assert!(attributes.keep_alive_timeout().is_none());

        attributes.set_keep_alive_timeout(Duration::from_secs(5));
        assert_eq!(attributes.keep_alive_timeout(), Some(Duration::from_secs(5)));
    }

    #[test]
    fn zero_keep_alive_is_not_confused_with_absence() {
        let attributes = ChannelAttributes::default();
        attributes.set_keep_alive_timeout(Duration::ZERO);
        assert_eq!(
            attributes.keep_alive_timeout(),
            Some(Duration::from_millis(1))
        );
    }
}
