use std::fmt::{Debug, Formatter};
use std::sync::Arc;
use std::time::Duration;

use crate::consts::{DEFAULT_CLEANUP_FLOOR, DEFAULT_MAX_IDLE_TIME, DEFAULT_STATE_CHANGE_CAPACITY};
use crate::io::TransportEvents;
use crate::pool::{MaxConnectionsStrategy, PoolLimitStrategy, StateChangeListener};
use crate::runtime::EventLoopProvider;

use crate::prelude::*;

/// Where the idle-connection sweep runs.
#[derive(Clone, Debug, Default)]
pub enum IdleCleanup {
    /// On the default provider, see [`EventLoopProvider::global`].
    #[default]
    Shared,
    /// On a specific provider.
    Custom(EventLoopProvider),
    /// Sweep is disabled, expired connections are only evicted when an acquire meets them.
    Disabled,
}

/// Connection pool configuration.
///
/// Use [`PoolConfig::builder`] to create one.
#[derive(Clone)]
pub struct PoolConfig {
    pub(crate) max_connections: Option<usize>,
    pub(crate) max_idle_time: Duration,
    pub(crate) idle_cleanup: IdleCleanup,
    pub(crate) cleanup_floor: Duration,
    pub(crate) limit_strategy: Option<Arc<dyn PoolLimitStrategy>>,
    pub(crate) listeners: Vec<Arc<dyn StateChangeListener>>,
    pub(crate) state_change_capacity: usize,
    pub(crate) transport_events: TransportEvents,
}

impl PoolConfig {
    /// Creates a builder with default values.
    pub fn builder() -> PoolConfigBuilder {
        PoolConfigBuilder::default()
    }

    /// Maximum number of physical connections, `None` when unbounded.
    pub fn max_connections(&self) -> Option<usize> {
        self.max_connections
    }

    /// Time an idle connection stays usable.
    pub fn max_idle_time(&self) -> Duration {
        self.max_idle_time
    }

    /// Idle sweep mode.
    pub fn idle_cleanup(&self) -> &IdleCleanup {
        &self.idle_cleanup
    }

    /// Minimum period of the idle sweep.
    pub fn cleanup_floor(&self) -> Duration {
        self.cleanup_floor
    }

    /// Period of the idle sweep: the maximum idle time, but never below the floor.
    pub fn cleanup_period(&self) -> Duration {
        self.max_idle_time.max(self.cleanup_floor)
    }

    /// Capacity of the state change broadcast.
    pub fn state_change_capacity(&self) -> usize {
        self.state_change_capacity
    }

    pub(crate) fn make_strategy(&self) -> Arc<dyn PoolLimitStrategy> {
        match (&self.limit_strategy, self.max_connections) {
            (Some(strategy), _) => strategy.clone(),
            (None, Some(max_connections)) => Arc::new(MaxConnectionsStrategy::new(max_connections)),
            (None, None) => Arc::new(MaxConnectionsStrategy::unbounded()),
        }
    }
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_connections: None,
            max_idle_time: DEFAULT_MAX_IDLE_TIME,
            idle_cleanup: IdleCleanup::default(),
            cleanup_floor: DEFAULT_CLEANUP_FLOOR,
            limit_strategy: None,
            listeners: Vec::new(),
            state_change_capacity: DEFAULT_STATE_CHANGE_CAPACITY,
            transport_events: TransportEvents::none(),
        }
    }
}

impl Debug for PoolConfig {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PoolConfig")
            .field("max_connections", &self.max_connections)
            .field("max_idle_time", &self.max_idle_time)
            .field("idle_cleanup", &self.idle_cleanup)
            .field("cleanup_floor", &self.cleanup_floor)
            .field("limit_strategy", &self.limit_strategy)
            .field("listeners", &self.listeners.len())
            .field("state_change_capacity", &self.state_change_capacity)
            .field("transport_events", &self.transport_events)
            .finish()
    }
}

/// Builder for [`PoolConfig`].
#[derive(Debug, Default)]
pub struct PoolConfigBuilder {
    config: PoolConfig,
}

impl PoolConfigBuilder {
    /// Limits the number of physical connections.
    ///
    /// Ignored when a custom [`PoolConfigBuilder::limit_strategy`] is set.
    pub fn max_connections(mut self, max_connections: usize) -> Self {
        self.config.max_connections = Some(max_connections);
        self
    }

    /// Time an idle connection stays usable.
    pub fn max_idle_time(mut self, max_idle_time: Duration) -> Self {
        self.config.max_idle_time = max_idle_time;
        self
    }

    /// Idle sweep mode.
    pub fn idle_cleanup(mut self, idle_cleanup: IdleCleanup) -> Self {
        self.config.idle_cleanup = idle_cleanup;
        self
    }

    /// Minimum period of the idle sweep.
    pub fn cleanup_floor(mut self, cleanup_floor: Duration) -> Self {
        self.config.cleanup_floor = cleanup_floor;
        self
    }

    /// Replaces the default [`MaxConnectionsStrategy`].
    pub fn limit_strategy(mut self, strategy: Arc<dyn PoolLimitStrategy>) -> Self {
        self.config.limit_strategy = Some(strategy);
        self
    }

    /// Adds a synchronous state change listener.
    pub fn listener(mut self, listener: Arc<dyn StateChangeListener>) -> Self {
        self.config.listeners.push(listener);
        self
    }

    /// Capacity of the state change broadcast.
    pub fn state_change_capacity(mut self, capacity: usize) -> Self {
        self.config.state_change_capacity = capacity;
        self
    }

    /// Listener of transport events emitted by pooled connections.
    pub fn transport_events(mut self, transport_events: TransportEvents) -> Self {
        self.config.transport_events = transport_events;
        self
    }

    /// Validates and builds the configuration.
    pub fn build(self) -> Result<PoolConfig> {
        let config = self.config;

        if config.max_connections == Some(0) {
            return Err(Error::InvalidConfig(
                "max connections must be positive".into(),
            ));
        }
        if config.cleanup_floor.is_zero() {
            return Err(Error::InvalidConfig(
                "idle cleanup floor must be positive".into(),
            ));
        }
        if config.max_idle_time.is_zero() {
            return Err(Error::InvalidConfig("max idle time must be positive".into()));
        }
        if config.state_change_capacity == 0 || config.state_change_capacity > usize::MAX / 2 {
            return Err(Error::InvalidConfig(format!(
                "invalid state change capacity: {}",
                config.state_change_capacity
            )));
        }

        Ok(config)
    }
}
