//! # Channel configuration

use crate::consts::DEFAULT_READ_BUFFER_CAPACITY;

/// Per-channel options.
///
/// A [`PipelineConfigurator`](crate::io::PipelineConfigurator) receives a mutable reference to the
/// default configuration before the bridge attaches to the channel.
///
/// With `auto_read` the channel reads the socket continuously. Inbound data is then pushed
/// regardless of demand, so an input subscriber has to be registered eagerly (see
/// [`ChannelConfig::eager_input`]); eager inputs of auto-read channels start with unbounded
/// demand. A lazy input subscription on an auto-read channel is rejected with
/// [`Error::LazyInputSubscription`](crate::Error::LazyInputSubscription).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ChannelConfig {
    auto_read: bool,
    eager_input: bool,
    read_buffer_capacity: usize,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            auto_read: false,
            eager_input: false,
            read_buffer_capacity: DEFAULT_READ_BUFFER_CAPACITY,
        }
    }
}

impl ChannelConfig {
    /// Returns `true` if channel reads without waiting for demand.
    pub fn auto_read(&self) -> bool {
        self.auto_read
    }

    /// Returns `true` if an input subscriber is registered before the connection is handed out.
    pub fn eager_input(&self) -> bool {
        self.eager_input
    }

    /// Initial capacity of the read buffer.
    pub fn read_buffer_capacity(&self) -> usize {
        self.read_buffer_capacity
    }

    /// Returns a copy with automatic reads enabled or disabled.
    pub fn with_auto_read(mut self, auto_read: bool) -> Self {
        self.auto_read = auto_read;
        self
    }

    /// Returns a copy with eager input registration enabled or disabled.
    pub fn with_eager_input(mut self, eager_input: bool) -> Self {
        self.eager_input = eager_input;
        self
    }

    /// Returns a copy with a different read buffer capacity.
    pub fn with_read_buffer_capacity(mut self, capacity: usize) -> Self {
        self.read_buffer_capacity = capacity;
        self
    }

    /// Enables or disables automatic reads in place.
    pub fn set_auto_read(&mut self, auto_read: bool) {
        self.auto_read = auto_read;
    }

    /// Enables or disables eager input registration in place.
    pub fn set_eager_input(&mut self, eager_input: bool) {
        self.eager_input = eager_input;
    }
}
