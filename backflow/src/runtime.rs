//! # Event loop provider
//!
//! Channel event loops and the idle sweep run on an [`EventLoopProvider`]. There is a single
//! process-wide default slot which is read when factories, servers and pools are constructed:
//!
//! * when a provider was installed with [`EventLoopProvider::set_global`], it is used;
//! * otherwise the runtime of the calling context is used;
//! * outside of any runtime a shared multi-threaded background runtime is created once.

use std::fmt::{Debug, Formatter};
use std::future::Future;
use std::sync::{Arc, OnceLock};

use arc_swap::ArcSwapOption;
use tokio::runtime::{Builder, Handle, Runtime};
use tokio::task::JoinHandle;

use crate::consts::SHARED_RUNTIME_THREAD_NAME;

use crate::prelude::*;

static SHARED_RUNTIME: OnceLock<Runtime> = OnceLock::new();

fn global_slot() -> &'static ProviderSlot {
    static GLOBAL_PROVIDER: OnceLock<ProviderSlot> = OnceLock::new();
    GLOBAL_PROVIDER.get_or_init(ProviderSlot::default)
}

/// Runtime on which channel event loops are spawned.
#[derive(Clone)]
pub struct EventLoopProvider {
    handle: Handle,
}

impl EventLoopProvider {
    /// Creates a provider spawning onto the runtime behind `handle`.
    pub fn new(handle: Handle) -> Self {
        Self { handle }
    }

    /// Provider of the current runtime, or the shared background runtime outside of one.
    pub fn current() -> Result<Self> {
        match Handle::try_current() {
            Ok(handle) => Ok(Self::new(handle)),
            Err(_) => Self::shared(),
        }
    }

    /// Provider backed by the shared background runtime.
    ///
    /// The runtime is created on first use and lives until the process exits.
    pub fn shared() -> Result<Self> {
        if let Some(runtime) = SHARED_RUNTIME.get() {
            return Ok(Self::new(runtime.handle().clone()));
        }

        let runtime = Builder::new_multi_thread()
            .thread_name(SHARED_RUNTIME_THREAD_NAME)
            .enable_all()
            .build()?;
        let runtime = SHARED_RUNTIME.get_or_init(move || runtime);
        Ok(Self::new(runtime.handle().clone()))
    }

    /// Default provider.
    pub fn global() -> Result<Self> {
        match global_slot().load() {
            Some(provider) => Ok(provider),
            None => Self::current(),
        }
    }

    /// Installs `provider` as the default and returns the previous one.
    pub fn set_global(provider: EventLoopProvider) -> Option<EventLoopProvider> {
        global_slot().swap(Some(provider))
    }

    /// Removes the installed default and returns it.
    pub fn reset_global() -> Option<EventLoopProvider> {
        global_slot().swap(None)
    }

    /// Runtime handle.
    pub fn handle(&self) -> &Handle {
        &self.handle
    }

    pub(crate) fn spawn<F>(&self, future: F) -> JoinHandle<F::Output>
    where
        F: Future + Send + 'static,
        F::Output: Send + 'static,
    {
        self.handle.spawn(future)
    }
}

impl Debug for EventLoopProvider {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventLoopProvider")
            .field("flavor", &self.handle.runtime_flavor())
            .finish()
    }
}

#[derive(Default)]
struct ProviderSlot {
    inner: ArcSwapOption<EventLoopProvider>,
}

impl ProviderSlot {
    fn load(&self) -> Option<EventLoopProvider> {
        self.inner.load_full().map(|provider| (*provider).clone())
    }

    fn swap(&self, provider: Option<EventLoopProvider>) -> Option<EventLoopProvider> {
        self.inner
            .swap(provider.map(Arc::new))
            .map(|previous| (*previous).clone())
    }
}
