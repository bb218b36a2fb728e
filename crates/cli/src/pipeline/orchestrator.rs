//! Pipeline orchestrator - wires broker, codec, dispatcher and publisher.

use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use codec::Codec;
use contracts::BusBlueprint;
use dispatcher::{DispatcherBuilder, Handler};
use memory_broker::InMemoryBroker;
use observability::DeliveryStatsAggregator;
use publisher::Publisher;
use tracing::{info, warn};

use super::PipelineStats;
use crate::error::CliError;
use crate::mail::Email;

/// Pipeline configuration
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// The bus configuration
    pub blueprint: BusBlueprint,

    /// Destination the emails go to
    pub destination: String,

    /// Number of emails to send
    pub count: u32,

    pub to: String,
    pub body: String,

    /// How long to wait for settlement (None = until the shutdown signal)
    pub settle_timeout: Option<Duration>,
}

/// Main pipeline orchestrator
pub struct Pipeline {
    config: PipelineConfig,
}

impl Pipeline {
    /// Create a new pipeline with the given configuration
    pub fn new(config: PipelineConfig) -> Self {
        Self { config }
    }

    /// Send the emails, wait until they are settled or `shutdown` fires,
    /// then shut the dispatcher down.
    pub async fn run(self, shutdown: impl Future<Output = ()>) -> Result<PipelineStats> {
        let start_time = Instant::now();
        let blueprint = &self.config.blueprint;

        if blueprint.destination(&self.config.destination).is_none() {
            return Err(CliError::unknown_destination(&self.config.destination).into());
        }

        let broker = Arc::new(InMemoryBroker::from_blueprint(blueprint));

        let mut codec = Codec::new();
        codec
            .register_checked(&Email::new(&self.config.to, &self.config.body, 0))
            .map_err(|e| CliError::startup(e.to_string()))?;
        let codec = Arc::new(codec);

        let delivery = Arc::new(Mutex::new(DeliveryStatsAggregator::new()));
        let dispatcher = DispatcherBuilder::new(Arc::clone(&broker), Arc::clone(&codec))
            .blueprint(blueprint)
            .handler(&self.config.destination, receiver(Arc::clone(&delivery)))
            .build()
            .map_err(|e| CliError::startup(e.to_string()))?;

        let handle = dispatcher
            .start()
            .await
            .map_err(|e| CliError::startup(e.to_string()))?;

        info!(
            destination = %self.config.destination,
            count = self.config.count,
            "Dispatcher started"
        );

        let publisher = Publisher::new(Arc::clone(&broker), codec);
        let mut published = 0usize;

        println!("Sending an email message.");
        for sequence in 0..self.config.count {
            let email = Email::new(&self.config.to, &self.config.body, sequence);
            let result = publisher
                .publish(&self.config.destination, &email, None)
                .await;
            lock(&delivery).record_publish(result.is_ok());
            match result {
                Ok(_) => published += 1,
                Err(e) => warn!(sequence, error = %e, "Publish failed"),
            }
        }

        let settled_in_time = self.wait_for_settlement(&broker, published, shutdown).await;

        info!("Shutting down dispatcher...");
        let report = handle.shutdown().await;

        let mut stats = PipelineStats {
            delivery: lock(&delivery).clone(),
            settled_in_time,
            ..Default::default()
        };
        stats.absorb(&broker.settlements(), &report);
        stats.duration = start_time.elapsed();

        let fatal = report.fatal_errors();
        if !fatal.is_empty() {
            let message = fatal
                .iter()
                .map(ToString::to_string)
                .collect::<Vec<_>>()
                .join("; ");
            return Err(CliError::WorkerFailure {
                count: fatal.len(),
                message,
            })
            .context("Dispatcher did not shut down cleanly");
        }

        info!(
            duration_secs = stats.duration.as_secs_f64(),
            settled = stats.delivery.settled(),
            forced = stats.forced_shutdown,
            "Pipeline shutdown complete"
        );

        Ok(stats)
    }

    /// True if every published email reached a final outcome (acked or
    /// dead-lettered) before the timeout or signal
    async fn wait_for_settlement(
        &self,
        broker: &InMemoryBroker,
        published: usize,
        shutdown: impl Future<Output = ()>,
    ) -> bool {
        if published == 0 {
            return true;
        }

        let timeout = self.config.settle_timeout.unwrap_or(Duration::MAX);
        let settled = async { broker.wait_for_outcomes(published, timeout).await.is_ok() };

        tokio::select! {
            done = settled => {
                if !done {
                    warn!(
                        published,
                        unsettled = broker.unsettled(),
                        "Timed out waiting for settlement"
                    );
                }
                done
            }
            _ = shutdown => {
                warn!("Received shutdown signal, stopping...");
                false
            }
        }
    }
}

/// The mailbox receiver: prints what arrives
fn receiver(delivery: Arc<Mutex<DeliveryStatsAggregator>>) -> Handler {
    Handler::new("receiver", move |email: Arc<Email>| {
        let delivery = Arc::clone(&delivery);
        async move {
            let started = Instant::now();
            println!("Received <{email}>");

            let mut stats = lock(&delivery);
            stats.record_end_to_end_ms(email.age_ms());
            stats.record_handler_latency_ms(started.elapsed().as_secs_f64() * 1000.0);
            Ok(())
        }
    })
}

fn lock(stats: &Mutex<DeliveryStatsAggregator>) -> MutexGuard<'_, DeliveryStatsAggregator> {
    stats.lock().unwrap_or_else(PoisonError::into_inner)
}
