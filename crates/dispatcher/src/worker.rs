//! DestinationWorker - one subscription loop per destination

use std::sync::Arc;

use contracts::{Broker, DestinationName, Subscription};
use tokio::sync::{watch, Semaphore};
use tokio::task::{JoinHandle, JoinSet};
use tracing::{debug, error, info, instrument};

use crate::delivery::{self, raised, DeliveryContext};
use crate::error::DispatcherError;
use crate::metrics::DestinationMetrics;

/// Handle to a running destination worker
///
/// Dropping the handle detaches the worker; it does not abort it.
pub(crate) struct DestinationWorker {
    destination: DestinationName,
    metrics: Arc<DestinationMetrics>,
    task: JoinHandle<Result<(), DispatcherError>>,
}

impl DestinationWorker {
    /// Spawn the worker task
    pub(crate) fn spawn<B>(
        ctx: DeliveryContext<B>,
        subscription: Subscription,
        stop: watch::Receiver<bool>,
        force: watch::Receiver<bool>,
    ) -> Self
    where
        B: Broker + Sync + 'static,
    {
        let destination = ctx.destination.clone();
        let metrics = Arc::clone(&ctx.metrics);
        let task = tokio::spawn(worker_loop(Arc::new(ctx), subscription, stop, force));

        Self {
            destination,
            metrics,
            task,
        }
    }

    pub(crate) fn destination(&self) -> &DestinationName {
        &self.destination
    }

    pub(crate) fn metrics(&self) -> &Arc<DestinationMetrics> {
        &self.metrics
    }

    pub(crate) fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    pub(crate) fn into_parts(
        self,
    ) -> (
        DestinationName,
        Arc<DestinationMetrics>,
        JoinHandle<Result<(), DispatcherError>>,
    ) {
        (self.destination, self.metrics, self.task)
    }
}

/// Pull deliveries until stopped or the broker closes.
///
/// A permit is taken before each pull, so at most `parallelism` deliveries
/// are in flight and `parallelism = 1` handles them in broker order.
#[instrument(
    name = "destination_worker_loop",
    skip_all,
    fields(destination = %ctx.destination, parallelism = ctx.config.parallelism)
)]
async fn worker_loop<B>(
    ctx: Arc<DeliveryContext<B>>,
    mut subscription: Subscription,
    stop: watch::Receiver<bool>,
    force: watch::Receiver<bool>,
) -> Result<(), DispatcherError>
where
    B: Broker + Sync + 'static,
{
    info!("Destination worker started");

    let permits = Arc::new(Semaphore::new(ctx.config.parallelism.max(1)));
    let mut in_flight = JoinSet::new();

    let exit = loop {
        while let Some(joined) = in_flight.try_join_next() {
            log_task_result(&ctx.destination, joined);
        }

        let permit = tokio::select! {
            biased;
            _ = raised(stop.clone()) => break Ok(()),
            permit = Arc::clone(&permits).acquire_owned() => match permit {
                Ok(permit) => permit,
                Err(_) => break Ok(()),
            },
        };

        let delivery = tokio::select! {
            biased;
            _ = raised(stop.clone()) => break Ok(()),
            next = subscription.next() => match next {
                Some(delivery) => delivery,
                None => break Err(DispatcherError::BrokerClosed {
                    destination: ctx.destination.clone(),
                }),
            },
        };

        let (envelope, ack) = delivery.into_parts();
        ctx.metrics.inc_received();
        observability::record_envelope_received(&ctx.destination, envelope.redelivery_count);

        let ctx = Arc::clone(&ctx);
        let force = force.clone();
        in_flight.spawn(async move {
            let _permit = permit;
            delivery::process(ctx, envelope, ack, force).await
        });
    };

    debug!(in_flight = in_flight.len(), "Draining in-flight deliveries");
    while let Some(joined) = in_flight.join_next().await {
        log_task_result(&ctx.destination, joined);
    }

    match &exit {
        Ok(()) => info!("Destination worker stopped"),
        Err(e) => error!(error = %e, "Destination worker failed"),
    }
    exit
}

fn log_task_result(
    destination: &DestinationName,
    joined: Result<delivery::Settlement, tokio::task::JoinError>,
) {
    if let Err(e) = joined {
        error!(destination = %destination, error = %e, "Delivery task panicked");
    }
}
