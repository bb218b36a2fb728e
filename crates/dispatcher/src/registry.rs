//! Destination registry
//!
//! Maps destination names to their configuration and registered handlers.
//! Read on every delivery, written rarely: writers rebuild the handler list
//! and swap it in under the write lock, readers clone an `Arc` snapshot. A
//! delivery that already holds a snapshot keeps its handlers alive even if
//! they are unregistered meanwhile.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

use contracts::{BackoffConfig, BusBlueprint, DestinationConfig, DestinationName, RetryPolicy};
use tracing::{debug, info};

use crate::error::RegistryError;
use crate::handler::Handler;

/// Identifies one registration for `unregister`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RegistrationId(u64);

impl RegistrationId {
    pub fn get(&self) -> u64 {
        self.0
    }
}

/// A handler bound to a destination with its retry policy
#[derive(Debug)]
pub struct Registration {
    id: RegistrationId,
    destination: DestinationName,
    handler: Handler,
    retry: RetryPolicy,
}

impl Registration {
    pub fn id(&self) -> RegistrationId {
        self.id
    }

    pub fn destination(&self) -> &DestinationName {
        &self.destination
    }

    pub fn handler(&self) -> &Handler {
        &self.handler
    }

    pub fn retry(&self) -> &RetryPolicy {
        &self.retry
    }
}

/// Ordered, immutable view of a destination's registrations
pub type Registrations = Arc<[Arc<Registration>]>;

struct DestinationEntry {
    config: Arc<DestinationConfig>,
    registrations: Registrations,
}

/// Destination registry
pub struct DestinationRegistry {
    destinations: RwLock<HashMap<DestinationName, DestinationEntry>>,
    next_id: AtomicU64,
    /// Set once a dispatcher has subscribed; the destination set is then fixed
    sealed: AtomicBool,
    jitter: f64,
}

impl Default for DestinationRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl DestinationRegistry {
    pub fn new() -> Self {
        Self::with_jitter(BackoffConfig::default().jitter)
    }

    /// Registry whose default retry policies use `jitter`
    pub fn with_jitter(jitter: f64) -> Self {
        Self {
            destinations: RwLock::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            sealed: AtomicBool::new(false),
            jitter,
        }
    }

    /// Registry with every destination of the blueprint configured
    ///
    /// # Errors
    /// `AlreadyConfigured` if the blueprint names a destination twice
    pub fn from_blueprint(blueprint: &BusBlueprint) -> Result<Self, RegistryError> {
        let registry = Self::with_jitter(blueprint.dispatcher.jitter);
        for config in &blueprint.destinations {
            registry.configure(config.clone())?;
        }
        Ok(registry)
    }

    /// Declare a destination
    ///
    /// # Errors
    /// `AlreadyConfigured` if the destination exists, `DispatcherRunning` if
    /// a dispatcher already subscribed to this registry's destinations
    pub fn configure(&self, config: DestinationConfig) -> Result<(), RegistryError> {
        let name = DestinationName::new(config.name.as_str());
        let mut destinations = self
            .destinations
            .write()
            .unwrap_or_else(PoisonError::into_inner);

        if self.sealed.load(Ordering::Acquire) {
            return Err(RegistryError::DispatcherRunning { destination: name });
        }
        if destinations.contains_key(&name) {
            return Err(RegistryError::AlreadyConfigured { destination: name });
        }

        info!(
            destination = %name,
            mode = ?config.mode,
            empty_registry_policy = ?config.empty_registry_policy,
            parallelism = config.parallelism,
            "Destination configured"
        );
        destinations.insert(
            name,
            DestinationEntry {
                config: Arc::new(config),
                registrations: Arc::from(Vec::new()),
            },
        );
        Ok(())
    }

    /// Freeze the destination set and return it, sorted by name.
    ///
    /// Handlers can still be registered and unregistered afterwards.
    pub(crate) fn seal(&self) -> Vec<DestinationName> {
        let destinations = self
            .destinations
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        self.sealed.store(true, Ordering::Release);

        let mut names: Vec<_> = destinations.keys().cloned().collect();
        names.sort_unstable_by(|a, b| a.as_str().cmp(b.as_str()));
        names
    }

    pub fn is_sealed(&self) -> bool {
        self.sealed.load(Ordering::Acquire)
    }

    /// Register a handler.
    ///
    /// `retry` overrides the destination's default retry policy.
    ///
    /// # Errors
    /// `UnknownDestination` if the destination was never configured
    pub fn register(
        &self,
        destination: &str,
        handler: Handler,
        retry: Option<RetryPolicy>,
    ) -> Result<RegistrationId, RegistryError> {
        let mut destinations = self
            .destinations
            .write()
            .unwrap_or_else(PoisonError::into_inner);

        let Some((name, entry)) = destinations.get_key_value(destination) else {
            return Err(RegistryError::UnknownDestination {
                destination: DestinationName::new(destination),
            });
        };
        let name = name.clone();

        let id = RegistrationId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let retry = retry.unwrap_or_else(|| entry.config.retry_policy(self.jitter));
        debug!(
            destination = %name,
            handler = handler.name(),
            payload_type = handler.payload_type(),
            registration_id = id.get(),
            max_retries = retry.max_retries,
            "Handler registered"
        );

        let registration = Arc::new(Registration {
            id,
            destination: name.clone(),
            handler,
            retry,
        });

        if let Some(entry) = destinations.get_mut(&name) {
            let mut next: Vec<_> = entry.registrations.iter().cloned().collect();
            next.push(registration);
            entry.registrations = Arc::from(next);
        }
        Ok(id)
    }

    /// Remove a registration; returns false if it was not registered
    pub fn unregister(&self, id: RegistrationId) -> bool {
        let mut destinations = self
            .destinations
            .write()
            .unwrap_or_else(PoisonError::into_inner);

        for (name, entry) in destinations.iter_mut() {
            if entry.registrations.iter().any(|r| r.id == id) {
                let next: Vec<_> = entry
                    .registrations
                    .iter()
                    .filter(|r| r.id != id)
                    .cloned()
                    .collect();
                entry.registrations = Arc::from(next);
                debug!(destination = %name, registration_id = id.get(), "Handler unregistered");
                return true;
            }
        }
        false
    }

    /// Registrations of a destination in registration order.
    ///
    /// Unknown destinations yield an empty sequence.
    pub fn lookup(&self, destination: &str) -> Registrations {
        self.destinations
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(destination)
            .map(|entry| Arc::clone(&entry.registrations))
            .unwrap_or_else(|| Arc::from(Vec::new()))
    }

    /// Configuration of a destination
    pub fn config(&self, destination: &str) -> Option<Arc<DestinationConfig>> {
        self.destinations
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(destination)
            .map(|entry| Arc::clone(&entry.config))
    }

    /// Configured destinations, sorted by name
    pub fn destinations(&self) -> Vec<DestinationName> {
        let mut names: Vec<_> = self
            .destinations
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect();
        names.sort_unstable_by(|a, b| a.as_str().cmp(b.as_str()));
        names
    }

    /// Total number of registrations across destinations
    pub fn registration_count(&self) -> usize {
        self.destinations
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .map(|entry| entry.registrations.len())
            .sum()
    }
}
