//! Backflow test utils.
//!
//! These utils are generated only when `#[cfg(test)]` enabled.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, Once};

use crate::io::producer::{InputControl, InputId};

static INIT_LOGGER: Once = Once::new();
pub const LOG_LEVEL: log::LevelFilter = log::LevelFilter::Debug;

pub fn init_logger() {
    INIT_LOGGER.call_once(|| {
        env_logger::builder()
            // Suppress everything below `warn` for third-party modules
            .filter_level(log::LevelFilter::Warn)
            // Allow everything above `LOG_LEVEL` from current package
            .filter_module(env!("CARGO_PKG_NAME"), LOG_LEVEL)
            .is_test(true)
            .try_init()
            .ok();
    });
}

/// [`InputControl`] recording every call instead of talking to an event loop.
#[derive(Debug, Default)]
pub struct RecordingControl {
    reads: AtomicUsize,
    unsubscribed: Mutex<Vec<InputId>>,
}

impl RecordingControl {
    pub fn reads(&self) -> usize {
        self.reads.load(Ordering::Acquire)
    }

    pub fn unsubscribed_ids(&self) -> Vec<InputId> {
        match self.unsubscribed.lock() {
            Ok(ids) => ids.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }
}

impl InputControl for RecordingControl {
    fn request_read(&self) {
        self.reads.fetch_add(1, Ordering::AcqRel);
    }

    fn unsubscribed(&self, id: InputId) {
        if let Ok(mut ids) = self.unsubscribed.lock() {
            ids.push(id);
        }
    }
}
