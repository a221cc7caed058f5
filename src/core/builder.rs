use std::marker::PhantomData;
use std::sync::Arc;

use super::bus::Bus;
use crate::config::Config;
use crate::events::Factory;
use crate::executor::Executor;
use crate::report::{Report, TracingReporter};

/// Builder for a root [`Bus`].
///
/// Derived buses are never built this way: they inherit executor and reporter
/// from their parent.
pub struct BusBuilder<T> {
    name: Option<String>,
    cfg: Config,
    executor: Option<Arc<dyn Executor>>,
    reporter: Option<Arc<dyn Report>>,
    first_sequence: u64,
    _payload: PhantomData<fn() -> T>,
}

impl<T: Send + Sync + 'static> BusBuilder<T> {
    /// Creates a builder for a bus called `name` with the default config.
    pub fn new(name: impl Into<String>) -> Self {
        Self::with_name(Some(name.into()))
    }

    pub(crate) fn anonymous() -> Self {
        Self::with_name(None)
    }

    fn with_name(name: Option<String>) -> Self {
        Self {
            name,
            cfg: Config::default(),
            executor: None,
            reporter: None,
            first_sequence: 0,
            _payload: PhantomData,
        }
    }

    /// Sets the config used to provision the executor.
    pub fn with_config(mut self, cfg: Config) -> Self {
        self.cfg = cfg;
        self
    }

    /// Uses `executor` instead of provisioning one from the config.
    ///
    /// Sharing one executor between several root buses makes propagation
    /// between them run inline.
    pub fn with_executor(mut self, executor: Arc<dyn Executor>) -> Self {
        self.executor = Some(executor);
        self
    }

    /// Sets the collaborator receiving dispatch faults
    /// (default: [`TracingReporter`]).
    pub fn with_reporter(mut self, reporter: Arc<dyn Report>) -> Self {
        self.reporter = Some(reporter);
        self
    }

    /// First sequence number stamped by the bus factory.
    pub fn starting_at(mut self, sequence: u64) -> Self {
        self.first_sequence = sequence;
        self
    }

    /// Builds the bus.
    ///
    /// A pooled config needs a tokio runtime; without one the bus falls back
    /// to the direct executor.
    pub fn build(self) -> Bus<T> {
        let executor = self
            .executor
            .unwrap_or_else(|| self.cfg.build_executor());
        let reporter = self
            .reporter
            .unwrap_or_else(|| Arc::new(TracingReporter));
        Bus::from_parts(
            self.name,
            Factory::starting_at(self.first_sequence),
            executor,
            reporter,
        )
    }
}
