//! In-process broker
//!
//! Queue destinations share one channel between all subscribers (competing
//! consumers). Topic destinations give every subscriber its own copy; a
//! message sent to a topic nobody listens to is discarded.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_channel::{Receiver, Sender};
use bytes::Bytes;
use chrono::Utc;
use contracts::{
    AckHandle, Broker, BrokerKind, BrokerSettings, BusBlueprint, Delivery, DestinationName,
    Envelope, Headers, NackReason, SendReceipt, Subscription, TransportError,
};
use tokio::sync::watch;
use tokio::time::error::Elapsed;
use tracing::{debug, info, warn};

/// How one delivery was settled
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SettlementRecord {
    Acked,
    Nacked(NackReason),
}

/// An envelope the broker gave up on
#[derive(Debug, Clone)]
pub struct DeadLetter {
    pub envelope: Envelope,
    pub reason: NackReason,
}

enum Route {
    Queue {
        tx: Sender<Delivery>,
        rx: Receiver<Delivery>,
    },
    Topic {
        subscribers: Vec<Sender<Delivery>>,
    },
}

impl Route {
    fn new(kind: BrokerKind) -> Self {
        match kind {
            BrokerKind::Queue => {
                let (tx, rx) = async_channel::unbounded();
                Self::Queue { tx, rx }
            }
            BrokerKind::Topic => Self::Topic {
                subscribers: Vec::new(),
            },
        }
    }

    fn close(&self) {
        match self {
            Self::Queue { tx, .. } => {
                tx.close();
            }
            Self::Topic { subscribers } => {
                for tx in subscribers {
                    tx.close();
                }
            }
        }
    }
}

/// A delivery handed out but not settled yet
struct Pending {
    envelope: Envelope,
    target: Sender<Delivery>,
}

#[derive(Default)]
struct State {
    kinds: HashMap<DestinationName, BrokerKind>,
    routes: HashMap<DestinationName, Route>,
    unsettled: HashMap<u64, Pending>,
    settlements: Vec<SettlementRecord>,
    dead_letters: Vec<DeadLetter>,
    closed: bool,
}

struct Inner {
    settings: BrokerSettings,
    state: Mutex<State>,
    online: AtomicBool,
    next_tag: AtomicU64,
    next_message: AtomicU64,
    progress: watch::Sender<Progress>,
}

/// Counters behind the `wait_for_*` helpers
#[derive(Debug, Clone, Copy, Default)]
struct Progress {
    /// Every ack or nack, including nacks that were requeued
    settled: usize,
    /// Acks plus dead letters; a message reaches this at most once per copy
    finished: usize,
}

/// In-process broker, cheap to clone
#[derive(Clone)]
pub struct InMemoryBroker {
    inner: Arc<Inner>,
}

impl Default for InMemoryBroker {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryBroker {
    /// Broker with default settings: nacked messages are dead-lettered
    pub fn new() -> Self {
        Self::with_settings(BrokerSettings::default())
    }

    pub fn with_settings(settings: BrokerSettings) -> Self {
        let (progress, _) = watch::channel(Progress::default());
        Self {
            inner: Arc::new(Inner {
                settings,
                state: Mutex::new(State::default()),
                online: AtomicBool::new(true),
                next_tag: AtomicU64::new(1),
                next_message: AtomicU64::new(1),
                progress,
            }),
        }
    }

    /// Broker with the blueprint's settings and destination kinds
    pub fn from_blueprint(blueprint: &BusBlueprint) -> Self {
        let broker = Self::with_settings(blueprint.broker.clone());
        for destination in &blueprint.destinations {
            broker.declare(destination.name.as_str(), destination.broker_kind);
        }
        broker
    }

    /// Set the distribution kind of a destination.
    ///
    /// Undeclared destinations are queues. Has no effect once the
    /// destination is in use.
    pub fn declare(&self, destination: &str, kind: BrokerKind) {
        let mut state = self.state();
        if state.routes.contains_key(destination) {
            warn!(destination, "Destination already in use, kind unchanged");
            return;
        }
        state.kinds.insert(DestinationName::new(destination), kind);
    }

    /// Simulate a transient outage: while offline, `send` and `subscribe` fail
    pub fn set_online(&self, online: bool) {
        self.inner.online.store(online, Ordering::SeqCst);
        info!(online, "Broker availability changed");
    }

    /// Permanently close the broker; every subscription ends
    pub fn close(&self) {
        let mut state = self.state();
        state.closed = true;
        for route in state.routes.values() {
            route.close();
        }
        info!("Broker closed");
    }

    pub fn is_closed(&self) -> bool {
        self.state().closed
    }

    /// Settlements in the order they happened
    pub fn settlements(&self) -> Vec<SettlementRecord> {
        self.state().settlements.clone()
    }

    /// Envelopes the broker gave up on
    pub fn dead_letters(&self) -> Vec<DeadLetter> {
        self.state().dead_letters.clone()
    }

    /// Deliveries handed out or queued but not settled yet
    pub fn unsettled(&self) -> usize {
        self.state().unsettled.len()
    }

    /// Wait until at least `count` deliveries have been settled.
    ///
    /// Counts every ack and nack, so a nack that gets requeued counts too.
    ///
    /// # Errors
    /// `Elapsed` if `timeout` passes first
    pub async fn wait_for_settlements(&self, count: usize, timeout: Duration) -> Result<(), Elapsed> {
        self.wait_for_progress(timeout, move |p| p.settled >= count).await
    }

    /// Wait until at least `count` messages reached a final outcome: acked,
    /// or dead-lettered once redelivery gave up.
    ///
    /// # Errors
    /// `Elapsed` if `timeout` passes first
    pub async fn wait_for_outcomes(&self, count: usize, timeout: Duration) -> Result<(), Elapsed> {
        self.wait_for_progress(timeout, move |p| p.finished >= count).await
    }

    async fn wait_for_progress(
        &self,
        timeout: Duration,
        done: impl FnMut(&Progress) -> bool,
    ) -> Result<(), Elapsed> {
        let mut progress = self.inner.progress.subscribe();
        tokio::time::timeout(timeout, async move {
            // the sender lives as long as `self`
            let _ = progress.wait_for(done).await;
        })
        .await
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.inner
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn check_available(&self, state: &State) -> Result<(), TransportError> {
        if state.closed {
            return Err(TransportError::Closed);
        }
        if !self.inner.online.load(Ordering::SeqCst) {
            return Err(TransportError::unavailable("broker is offline"));
        }
        Ok(())
    }

    /// Hand `envelope` to `target` under a fresh delivery tag
    fn enqueue(&self, state: &mut State, envelope: Envelope, target: &Sender<Delivery>) -> bool {
        let tag = self.inner.next_tag.fetch_add(1, Ordering::Relaxed);
        let delivery = Delivery::new(envelope.clone(), AckHandle::new(tag));
        if target.try_send(delivery).is_err() {
            return false;
        }
        state.unsettled.insert(
            tag,
            Pending {
                envelope,
                target: target.clone(),
            },
        );
        true
    }

    fn take_pending(&self, state: &mut State, handle: &AckHandle) -> Result<Pending, TransportError> {
        state
            .unsettled
            .remove(&handle.tag())
            .ok_or(TransportError::UnknownHandle { tag: handle.tag() })
    }

    fn record(&self, state: &mut State, record: SettlementRecord) {
        state.settlements.push(record);
        let finished = record == SettlementRecord::Acked;
        self.inner.progress.send_modify(|p| {
            p.settled += 1;
            if finished {
                p.finished += 1;
            }
        });
    }

    fn dead_letter(&self, state: &mut State, envelope: Envelope, reason: NackReason) {
        state.dead_letters.push(DeadLetter { envelope, reason });
        self.inner.progress.send_modify(|p| p.finished += 1);
    }

    /// Dead-letter the deliveries still buffered for a topic subscriber
    /// that went away.
    ///
    /// Deliveries it already pulled stay in the ledger so a late ack or nack
    /// still works. Channel order equals tag order, so the buffered ones are
    /// the newest `target.len()` tags of that channel.
    fn abandon_buffered(&self, state: &mut State, target: &Sender<Delivery>) {
        let buffered = target.len();
        if buffered == 0 {
            return;
        }

        let mut tags: Vec<u64> = state
            .unsettled
            .iter()
            .filter(|(_, pending)| pending.target.same_channel(target))
            .map(|(tag, _)| *tag)
            .collect();
        tags.sort_unstable();
        let pulled = tags.len().saturating_sub(buffered);

        for tag in tags.into_iter().skip(pulled) {
            if let Some(Pending { envelope, .. }) = state.unsettled.remove(&tag) {
                warn!(
                    message_id = %envelope.message_id,
                    destination = %envelope.destination,
                    "Topic subscriber gone, dead-lettering buffered delivery"
                );
                self.dead_letter(state, envelope, NackReason::Shutdown);
            }
        }
    }
}

impl Broker for InMemoryBroker {
    async fn send(
        &self,
        destination: &DestinationName,
        body: Bytes,
        headers: Headers,
    ) -> Result<SendReceipt, TransportError> {
        let mut state = self.state();
        self.check_available(&state)?;

        let message_id = format!(
            "msg-{}",
            self.inner.next_message.fetch_add(1, Ordering::Relaxed)
        );
        let envelope = Envelope {
            message_id: message_id.clone(),
            destination: destination.clone(),
            body,
            headers,
            redelivery_count: 0,
            timestamp: Utc::now(),
        };

        let kind = state.kinds.get(destination).copied().unwrap_or_default();
        let (targets, gone): (Vec<Sender<Delivery>>, Vec<Sender<Delivery>>) = {
            let route = state
                .routes
                .entry(destination.clone())
                .or_insert_with(|| Route::new(kind));
            match route {
                Route::Queue { tx, .. } => (vec![tx.clone()], Vec::new()),
                Route::Topic { subscribers } => {
                    let (open, gone): (Vec<_>, Vec<_>) =
                        subscribers.drain(..).partition(|tx| !tx.is_closed());
                    *subscribers = open;
                    (subscribers.clone(), gone)
                }
            }
        };
        for tx in &gone {
            self.abandon_buffered(&mut state, tx);
        }

        if targets.is_empty() {
            debug!(destination = %destination, message_id, "No topic subscriber, message discarded");
        }
        for target in &targets {
            if !self.enqueue(&mut state, envelope.clone(), target) {
                return Err(TransportError::rejected(destination.clone(), "destination closed"));
            }
        }

        debug!(destination = %destination, message_id, "Message enqueued");
        Ok(SendReceipt {
            message_id,
            destination: destination.clone(),
        })
    }

    async fn subscribe(&self, destination: &DestinationName) -> Result<Subscription, TransportError> {
        let mut state = self.state();
        self.check_available(&state)?;

        let kind = state.kinds.get(destination).copied().unwrap_or_default();
        let route = state
            .routes
            .entry(destination.clone())
            .or_insert_with(|| Route::new(kind));

        let rx = match route {
            Route::Queue { rx, .. } => rx.clone(),
            Route::Topic { subscribers } => {
                let (tx, rx) = async_channel::unbounded();
                subscribers.push(tx);
                rx
            }
        };

        debug!(destination = %destination, ?kind, "Subscription opened");
        Ok(Subscription::new(destination.clone(), rx))
    }

    async fn ack(&self, handle: AckHandle) -> Result<(), TransportError> {
        let mut state = self.state();
        let pending = self.take_pending(&mut state, &handle)?;
        debug!(message_id = %pending.envelope.message_id, "Acked");
        self.record(&mut state, SettlementRecord::Acked);
        Ok(())
    }

    async fn nack(&self, handle: AckHandle, reason: NackReason) -> Result<(), TransportError> {
        let mut state = self.state();
        let Pending { mut envelope, target } = self.take_pending(&mut state, &handle)?;
        self.record(&mut state, SettlementRecord::Nacked(reason));

        let settings = &self.inner.settings;
        if settings.redeliver_on_nack
            && envelope.redelivery_count < settings.max_redeliveries
            && !state.closed
        {
            envelope.redelivery_count += 1;
            debug!(
                message_id = %envelope.message_id,
                redelivery_count = envelope.redelivery_count,
                %reason,
                "Nacked, requeueing"
            );
            if self.enqueue(&mut state, envelope.clone(), &target) {
                return Ok(());
            }
        }

        warn!(message_id = %envelope.message_id, %reason, "Nacked, dead-lettered");
        self.dead_letter(&mut state, envelope, reason);
        Ok(())
    }
}
