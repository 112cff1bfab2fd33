//! # Default values

use std::time::Duration;

/// Default time a pooled connection may stay idle before it is considered expired.
pub const DEFAULT_MAX_IDLE_TIME: Duration = Duration::from_millis(30_000);

/// Default minimum period of the idle-connection sweep.
pub const DEFAULT_CLEANUP_FLOOR: Duration = Duration::from_millis(30);

/// Default capacity of the pool state-change broadcast channel.
pub const DEFAULT_STATE_CHANGE_CAPACITY: usize = 1024 * 32;

/// Default capacity of a channel read buffer.
pub const DEFAULT_READ_BUFFER_CAPACITY: usize = 8 * 1024;

/// Default capacity of in-memory duplex transports.
pub const DEFAULT_MEMORY_TRANSPORT_CAPACITY: usize = 64 * 1024;

pub(crate) const SHARED_RUNTIME_THREAD_NAME: &str = "backflow-event-loop";
