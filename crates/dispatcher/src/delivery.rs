//! Processing of a single delivery
//!
//! Decode, select handlers, run them with retry, then settle exactly once.
//! Settlement happens outside the cancellable part, so a delivery is acked
//! or nacked even when shutdown forces it.

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Instant;

use codec::{Codec, DecodedPayload};
use contracts::{
    AckHandle, Broker, DeliveryMode, DestinationConfig, DestinationName, EmptyRegistryPolicy,
    Envelope, HandlerError, HandlerExhausted, NackReason,
};
use futures::FutureExt;
use tokio::sync::watch;
use tokio::task::JoinSet;
use tracing::{debug, error, info, instrument, warn};

use crate::backoff;
use crate::metrics::DestinationMetrics;
use crate::registry::{DestinationRegistry, Registration};

/// Final decision for one delivery
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Settlement {
    /// Handled successfully
    Ack,
    /// No eligible handler under the drop policy; acked
    Drop,
    /// Negative acknowledgement
    Nack(NackReason),
}

impl Settlement {
    /// Label used in logs and metrics
    pub fn label(&self) -> &'static str {
        match self {
            Self::Ack => "ack",
            Self::Drop => "drop",
            Self::Nack(reason) => reason.as_str(),
        }
    }
}

/// Everything a delivery task needs, shared by all tasks of one destination
pub(crate) struct DeliveryContext<B> {
    pub broker: Arc<B>,
    pub codec: Arc<Codec>,
    pub registry: Arc<DestinationRegistry>,
    pub config: Arc<DestinationConfig>,
    pub destination: DestinationName,
    pub metrics: Arc<DestinationMetrics>,
}

/// Resolves once `signal` turns true; pends forever if the sender is gone.
pub(crate) async fn raised(mut signal: watch::Receiver<bool>) {
    if signal.wait_for(|raised| *raised).await.is_err() {
        std::future::pending::<()>().await;
    }
}

/// Process and settle one delivery
pub(crate) async fn process<B>(
    ctx: Arc<DeliveryContext<B>>,
    envelope: Envelope,
    ack: AckHandle,
    force: watch::Receiver<bool>,
) -> Settlement
where
    B: Broker + Sync + 'static,
{
    let in_flight = ctx.metrics.delivery_started();
    observability::record_in_flight(&ctx.destination, in_flight);

    let settlement = tokio::select! {
        biased;
        _ = raised(force) => {
            warn!(
                destination = %ctx.destination,
                message_id = %envelope.message_id,
                "Shutdown deadline passed, abandoning delivery"
            );
            Settlement::Nack(NackReason::Shutdown)
        }
        settlement = evaluate(&ctx, &envelope) => settlement,
    };

    settle(&ctx, &envelope, ack, settlement).await;

    let in_flight = ctx.metrics.delivery_finished();
    observability::record_in_flight(&ctx.destination, in_flight);
    settlement
}

#[instrument(
    name = "dispatcher_evaluate",
    skip(ctx, envelope),
    fields(destination = %ctx.destination, message_id = %envelope.message_id)
)]
async fn evaluate<B>(ctx: &DeliveryContext<B>, envelope: &Envelope) -> Settlement {
    if envelope.redelivery_count > 0 {
        debug!(
            redelivery_count = envelope.redelivery_count,
            "Broker redelivery"
        );
    }

    let payload = match ctx.codec.decode(&envelope.body, &envelope.headers) {
        Ok(payload) => payload,
        Err(e) => {
            ctx.metrics.inc_decode_failures();
            warn!(error = %e, "Decode failed");
            return Settlement::Nack(NackReason::DecodeError);
        }
    };

    let registrations = ctx.registry.lookup(&ctx.destination);
    let mut eligible = registrations
        .iter()
        .filter(|r| r.handler().accepts(&payload))
        .cloned();

    let selected: Vec<Arc<Registration>> = match ctx.config.mode {
        DeliveryMode::PointToPoint => eligible.next().into_iter().collect(),
        DeliveryMode::Broadcast => eligible.collect(),
    };

    if selected.is_empty() {
        return match ctx.config.empty_registry_policy {
            EmptyRegistryPolicy::Drop => {
                info!(payload_type = payload.type_id(), "No handler registered, dropping");
                Settlement::Drop
            }
            EmptyRegistryPolicy::DeadLetter => {
                warn!(payload_type = payload.type_id(), "No handler registered");
                Settlement::Nack(NackReason::NoHandler)
            }
        };
    }

    run_handlers(ctx, envelope, payload, selected).await
}

/// Run the selected handlers concurrently and wait for all of them.
///
/// Dropping this future aborts the handler tasks.
async fn run_handlers<B>(
    ctx: &DeliveryContext<B>,
    envelope: &Envelope,
    payload: DecodedPayload,
    selected: Vec<Arc<Registration>>,
) -> Settlement {
    let mut tasks = JoinSet::new();
    for registration in selected {
        tasks.spawn(invoke_with_retry(
            registration,
            payload.clone(),
            Arc::clone(&ctx.metrics),
            envelope.message_id.clone(),
        ));
    }

    let mut failed = 0usize;
    while let Some(joined) = tasks.join_next().await {
        match joined {
            Ok(Ok(attempts)) => {
                debug!(attempts, "Handler succeeded");
            }
            Ok(Err(exhausted)) => {
                failed += 1;
                ctx.metrics.inc_exhausted();
                error!(
                    attempts = exhausted.attempts,
                    error = %exhausted.last_error,
                    "Handler exhausted its retries"
                );
            }
            Err(e) => {
                failed += 1;
                ctx.metrics.inc_exhausted();
                error!(error = %e, "Handler task panicked");
            }
        }
    }

    if failed == 0 {
        Settlement::Ack
    } else {
        Settlement::Nack(NackReason::HandlerExhausted)
    }
}

/// Invoke one handler until it succeeds or the retry budget runs out.
///
/// Returns the number of attempts made.
async fn invoke_with_retry(
    registration: Arc<Registration>,
    payload: DecodedPayload,
    metrics: Arc<DestinationMetrics>,
    message_id: String,
) -> Result<u32, HandlerExhausted> {
    let destination = registration.destination().clone();
    let handler = registration.handler();
    let policy = registration.retry();
    let mut attempt: u32 = 0;

    loop {
        let started = Instant::now();
        // a panic anywhere in the attempt is a failed attempt
        let outcome = AssertUnwindSafe(async {
            match handler.invoke(payload.clone()) {
                Some(call) => Some(call.await),
                None => None,
            }
        })
        .catch_unwind()
        .await;

        let result = match outcome {
            Ok(Some(result)) => result,
            Ok(None) => {
                return Err(HandlerExhausted {
                    destination,
                    attempts: attempt,
                    last_error: HandlerError::new("payload type mismatch"),
                });
            }
            Err(panic) => Err(HandlerError::new(format!(
                "handler panicked: {}",
                panic_message(panic.as_ref())
            ))),
        };
        observability::record_handler_attempt(
            &destination,
            handler.name(),
            result.is_ok(),
            started.elapsed().as_secs_f64() * 1_000.0,
        );

        match result {
            Ok(()) => return Ok(attempt + 1),
            Err(e) if attempt < policy.max_retries => {
                let delay = backoff::delay(&policy.backoff, attempt);
                metrics.inc_retries();
                observability::record_retry_delay_ms(&destination, delay.as_secs_f64() * 1_000.0);
                warn!(
                    destination = %destination,
                    message_id = %message_id,
                    handler = handler.name(),
                    attempt = attempt + 1,
                    delay_ms = delay.as_millis() as u64,
                    error = %e,
                    "Handler failed, retrying"
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(e) => {
                return Err(HandlerExhausted {
                    destination,
                    attempts: attempt + 1,
                    last_error: e,
                });
            }
        }
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> &str {
    if let Some(message) = panic.downcast_ref::<&str>() {
        message
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message
    } else {
        "non-string panic payload"
    }
}

async fn settle<B>(ctx: &DeliveryContext<B>, envelope: &Envelope, ack: AckHandle, settlement: Settlement)
where
    B: Broker + Sync + 'static,
{
    let result = match settlement {
        Settlement::Ack | Settlement::Drop => ctx.broker.ack(ack).await,
        Settlement::Nack(reason) => ctx.broker.nack(ack, reason).await,
    };

    match settlement {
        Settlement::Ack => ctx.metrics.inc_acked(),
        Settlement::Drop => ctx.metrics.inc_dropped(),
        Settlement::Nack(_) => ctx.metrics.inc_nacked(),
    }
    observability::record_settlement(&ctx.destination, settlement.label(), result.is_ok());

    match result {
        Ok(()) => debug!(
            destination = %ctx.destination,
            message_id = %envelope.message_id,
            outcome = settlement.label(),
            "Delivery settled"
        ),
        Err(e) => {
            ctx.metrics.inc_settle_failures();
            error!(
                destination = %ctx.destination,
                message_id = %envelope.message_id,
                outcome = settlement.label(),
                error = %e,
                "Settlement failed"
            );
        }
    }
}
