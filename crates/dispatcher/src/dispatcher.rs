//! Dispatcher - subscribes to every configured destination and routes
//! deliveries to registered handlers

use std::sync::Arc;
use std::time::Duration;

use codec::Codec;
use contracts::{
    Broker, BusBlueprint, DestinationConfig, DestinationName, DispatcherSettings, RetryPolicy,
};
use tokio::sync::watch;
use tokio::time::{timeout_at, Instant};
use tracing::{info, instrument, warn};

use crate::delivery::DeliveryContext;
use crate::error::DispatcherError;
use crate::handler::Handler;
use crate::metrics::{DestinationMetrics, MetricsSnapshot};
use crate::registry::DestinationRegistry;
use crate::worker::DestinationWorker;

/// Builder for creating a Dispatcher
pub struct DispatcherBuilder<B> {
    broker: Arc<B>,
    codec: Arc<Codec>,
    settings: DispatcherSettings,
    destinations: Vec<DestinationConfig>,
    handlers: Vec<(String, Handler, Option<RetryPolicy>)>,
}

impl<B> DispatcherBuilder<B>
where
    B: Broker + Sync + 'static,
{
    pub fn new(broker: Arc<B>, codec: Arc<Codec>) -> Self {
        Self {
            broker,
            codec,
            settings: DispatcherSettings::default(),
            destinations: Vec::new(),
            handlers: Vec::new(),
        }
    }

    /// Take settings and destinations from a blueprint
    pub fn blueprint(mut self, blueprint: &BusBlueprint) -> Self {
        self.settings = blueprint.dispatcher.clone();
        self.destinations.extend(blueprint.destinations.iter().cloned());
        self
    }

    pub fn settings(mut self, settings: DispatcherSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn destination(mut self, config: DestinationConfig) -> Self {
        self.destinations.push(config);
        self
    }

    /// Register a handler with the destination's default retry policy
    pub fn handler(mut self, destination: impl Into<String>, handler: Handler) -> Self {
        self.handlers.push((destination.into(), handler, None));
        self
    }

    /// Register a handler with its own retry policy
    pub fn handler_with_retry(
        mut self,
        destination: impl Into<String>,
        handler: Handler,
        retry: RetryPolicy,
    ) -> Self {
        self.handlers.push((destination.into(), handler, Some(retry)));
        self
    }

    /// Build the dispatcher
    ///
    /// # Errors
    /// `Registry` if a destination is declared twice or a handler targets an
    /// undeclared destination
    #[instrument(
        name = "dispatcher_builder_build",
        skip(self),
        fields(destinations = self.destinations.len(), handlers = self.handlers.len())
    )]
    pub fn build(self) -> Result<Dispatcher<B>, DispatcherError> {
        let registry = DestinationRegistry::with_jitter(self.settings.jitter);
        for config in self.destinations {
            registry.configure(config)?;
        }
        for (destination, handler, retry) in self.handlers {
            registry.register(&destination, handler, retry)?;
        }

        Ok(Dispatcher::new(
            self.broker,
            self.codec,
            Arc::new(registry),
            self.settings,
        ))
    }
}

/// The dispatcher, ready to start
pub struct Dispatcher<B> {
    broker: Arc<B>,
    codec: Arc<Codec>,
    registry: Arc<DestinationRegistry>,
    settings: DispatcherSettings,
}

impl<B> Dispatcher<B>
where
    B: Broker + Sync + 'static,
{
    /// Create a dispatcher around an existing registry
    pub fn new(
        broker: Arc<B>,
        codec: Arc<Codec>,
        registry: Arc<DestinationRegistry>,
        settings: DispatcherSettings,
    ) -> Self {
        Self {
            broker,
            codec,
            registry,
            settings,
        }
    }

    /// Shared registry; handlers can be added or removed while running
    pub fn registry(&self) -> &Arc<DestinationRegistry> {
        &self.registry
    }

    /// Subscribe to every configured destination and spawn its worker.
    ///
    /// The registry's destination set is fixed from here on; `configure`
    /// fails with `DispatcherRunning` while handlers stay dynamic.
    ///
    /// # Errors
    /// `Subscribe` if any subscription fails; workers already started are
    /// stopped again.
    #[instrument(name = "dispatcher_start", skip(self))]
    pub async fn start(self) -> Result<DispatcherHandle, DispatcherError> {
        let (stop_tx, stop_rx) = watch::channel(false);
        let (force_tx, force_rx) = watch::channel(false);
        let mut workers = Vec::new();

        for destination in self.registry.seal() {
            let Some(config) = self.registry.config(&destination) else {
                continue;
            };

            let subscription = match self.broker.subscribe(&destination).await {
                Ok(subscription) => subscription,
                Err(source) => {
                    warn!(destination = %destination, error = %source, "Subscribe failed");
                    let _ = stop_tx.send(true);
                    return Err(DispatcherError::Subscribe {
                        destination,
                        source,
                    });
                }
            };

            let ctx = DeliveryContext {
                broker: Arc::clone(&self.broker),
                codec: Arc::clone(&self.codec),
                registry: Arc::clone(&self.registry),
                config,
                destination,
                metrics: Arc::new(DestinationMetrics::new()),
            };
            workers.push(DestinationWorker::spawn(
                ctx,
                subscription,
                stop_rx.clone(),
                force_rx.clone(),
            ));
        }

        info!(destinations = workers.len(), "Dispatcher started");

        Ok(DispatcherHandle {
            workers,
            registry: self.registry,
            stop: stop_tx,
            force: force_tx,
            shutdown_deadline: self.settings.shutdown_deadline(),
        })
    }
}

/// Convenience function to create a dispatcher from a blueprint
pub fn create_dispatcher<B>(
    blueprint: &BusBlueprint,
    broker: Arc<B>,
    codec: Arc<Codec>,
) -> Result<Dispatcher<B>, DispatcherError>
where
    B: Broker + Sync + 'static,
{
    DispatcherBuilder::new(broker, codec).blueprint(blueprint).build()
}

/// Handle to a running dispatcher
///
/// Dropping it detaches the workers; call [`DispatcherHandle::shutdown`] to
/// stop them.
pub struct DispatcherHandle {
    workers: Vec<DestinationWorker>,
    registry: Arc<DestinationRegistry>,
    stop: watch::Sender<bool>,
    force: watch::Sender<bool>,
    shutdown_deadline: Duration,
}

impl DispatcherHandle {
    /// Live registry; handlers can be added or removed, destinations cannot
    pub fn registry(&self) -> &Arc<DestinationRegistry> {
        &self.registry
    }

    /// Get metrics for all destinations
    pub fn metrics(&self) -> Vec<(DestinationName, MetricsSnapshot)> {
        self.workers
            .iter()
            .map(|w| (w.destination().clone(), w.metrics().snapshot()))
            .collect()
    }

    /// Metrics of one destination
    pub fn destination_metrics(&self, destination: &str) -> Option<MetricsSnapshot> {
        self.workers
            .iter()
            .find(|w| w.destination() == destination)
            .map(|w| w.metrics().snapshot())
    }

    /// Destinations whose worker has exited (broker closure or panic)
    pub fn finished_workers(&self) -> Vec<DestinationName> {
        self.workers
            .iter()
            .filter(|w| w.is_finished())
            .map(|w| w.destination().clone())
            .collect()
    }

    /// Shut down with the configured deadline
    pub async fn shutdown(self) -> ShutdownReport {
        let deadline = self.shutdown_deadline;
        self.shutdown_with_deadline(deadline).await
    }

    /// Stop pulling, wait up to `deadline` for in-flight deliveries, then
    /// nack whatever is still running with reason `shutdown`.
    #[instrument(name = "dispatcher_shutdown", skip(self))]
    pub async fn shutdown_with_deadline(self, deadline: Duration) -> ShutdownReport {
        info!(workers = self.workers.len(), "Dispatcher shutting down");
        let _ = self.stop.send(true);

        let deadline_at = Instant::now() + deadline;
        let mut forced = false;
        let mut destinations = Vec::with_capacity(self.workers.len());

        for worker in self.workers {
            let (destination, metrics, mut task) = worker.into_parts();

            let joined = match timeout_at(deadline_at, &mut task).await {
                Ok(joined) => joined,
                Err(_) => {
                    if !forced {
                        warn!(
                            deadline_ms = deadline.as_millis() as u64,
                            "Shutdown deadline passed, forcing in-flight deliveries"
                        );
                        let _ = self.force.send(true);
                        forced = true;
                    }
                    task.await
                }
            };

            let result = joined.unwrap_or_else(|e| {
                Err(DispatcherError::WorkerPanicked {
                    destination: destination.clone(),
                    message: e.to_string(),
                })
            });

            destinations.push(DestinationReport {
                destination,
                metrics: metrics.snapshot(),
                result,
            });
        }

        let report = ShutdownReport {
            forced,
            destinations,
        };
        info!(
            forced = report.forced,
            settled = report.total().settled(),
            "Dispatcher shutdown complete"
        );
        report
    }
}

/// Outcome of one destination worker
#[derive(Debug)]
pub struct DestinationReport {
    pub destination: DestinationName,
    pub metrics: MetricsSnapshot,
    /// `Err` for fatal worker failures such as broker closure
    pub result: Result<(), DispatcherError>,
}

/// Result of [`DispatcherHandle::shutdown`]
#[derive(Debug)]
pub struct ShutdownReport {
    /// True if the deadline passed and in-flight deliveries were nacked
    pub forced: bool,
    pub destinations: Vec<DestinationReport>,
}

impl ShutdownReport {
    /// Fatal worker errors, distinct from per-message outcomes
    pub fn fatal_errors(&self) -> Vec<&DispatcherError> {
        self.destinations
            .iter()
            .filter_map(|d| d.result.as_ref().err())
            .collect()
    }

    /// Metrics summed across destinations
    pub fn total(&self) -> MetricsSnapshot {
        self.destinations
            .iter()
            .fold(MetricsSnapshot::default(), |mut acc, d| {
                acc.received += d.metrics.received;
                acc.acked += d.metrics.acked;
                acc.dropped += d.metrics.dropped;
                acc.nacked += d.metrics.nacked;
                acc.retries += d.metrics.retries;
                acc.decode_failures += d.metrics.decode_failures;
                acc.exhausted += d.metrics.exhausted;
                acc.settle_failures += d.metrics.settle_failures;
                acc.in_flight += d.metrics.in_flight;
                acc
            })
    }

    pub fn destination(&self, name: &str) -> Option<&DestinationReport> {
        self.destinations.iter().find(|d| d.destination == name)
    }
}
