//! The address registry: emission, subscription, lazy loading, recovery.
//!
//! A [`Registry`] maps opaque string addresses to slots. Each slot caches the
//! last value delivered to it, keeps its subscribers and interceptor chain in
//! registration order, and optionally carries a loader with a recovery
//! handler. Slots are created lazily on first reference and never removed.
//!
//! # Ordering guarantees
//!
//! Within one emission, interceptor steps run strictly in registration order
//! and subscriber notifications run strictly in registration order, each
//! awaited to completion before the next begins. Across independent emissions
//! to the same address issued without awaiting each other, the registry
//! enforces no serialization: interleaving at suspension points is the
//! caller's responsibility.
//!
//! # Locking
//!
//! The slot map lock is held only to snapshot or commit state, never across
//! an `await`. Interceptors, subscribers, and loaders may therefore re-enter
//! the registry freely, including emitting to other addresses through the
//! handle they receive.
//!
//! # Runtime
//!
//! [`listen`](Registry::listen) and [`set_loader`](Registry::set_loader) can
//! spawn work (a replay invocation or a triggered load) onto the ambient
//! Tokio runtime, so they must be called from within one whenever a cached
//! value or a loader is present.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use parking_lot::RwLock;
use serde_json::Value;

use crate::error::BusError;
use crate::handlers::{Interceptor, Listener, Loader, LoadRecovery};
use crate::slot::{next_registration_id, InterceptorEntry, SlotState, SlotView, SubscriberEntry};

// ---------------------------------------------------------------------------
// Registry
// ---------------------------------------------------------------------------

/// A keyed publish/subscribe value cache.
///
/// Cheap to clone: clones share the same slot map. Independent instances
/// share nothing.
///
/// # Example
///
/// ```
/// use livebus::Registry;
///
/// tokio_test::block_on(async {
///     let bus: Registry<i64> = Registry::new();
///     bus.send("sensor.temp", 21).await.unwrap();
///     assert_eq!(bus.get("sensor.temp").value, Some(21));
/// });
/// ```
pub struct Registry<T> {
    inner: Arc<RegistryInner<T>>,
}

struct RegistryInner<T> {
    /// Name used as the log prefix.
    name: String,
    slots: RwLock<HashMap<String, SlotState<T>>>,
}

impl<T> Clone for Registry<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T> fmt::Debug for Registry<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Registry")
            .field("name", &self.inner.name)
            .field("slots", &self.inner.slots.read().len())
            .finish()
    }
}

/// Side effect owed after registering a subscriber, decided under the lock
/// and performed after releasing it.
enum Registered<T> {
    Replay(T),
    TriggerLoad,
    Idle,
}

impl<T: Clone + Send + Sync + 'static> Default for Registry<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Clone + Send + Sync + 'static> Registry<T> {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::named("livebus")
    }

    /// Create an empty registry with a name used in log output.
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            inner: Arc::new(RegistryInner {
                name: name.into(),
                slots: RwLock::new(HashMap::new()),
            }),
        }
    }

    // -----------------------------------------------------------------------
    // Observation
    // -----------------------------------------------------------------------

    /// Snapshot an address's observable state, creating the slot if needed.
    pub fn get(&self, address: &str) -> SlotView<T> {
        self.with_slot(address, |slot| SlotView {
            address: address.to_string(),
            value: slot.last_value.clone(),
            last_updated: slot.last_updated,
            subscriber_count: slot.subscribers.len(),
            interceptor_count: slot.interceptors.len(),
            has_loader: slot.loader.is_some(),
            load_in_flight: slot.load_in_flight(),
        })
    }

    // -----------------------------------------------------------------------
    // Emission
    // -----------------------------------------------------------------------

    /// Emit a value to an address.
    ///
    /// The value is passed through the address's interceptor chain in
    /// registration order; the final output is committed as the cached value
    /// and then delivered to each subscriber in registration order, each
    /// awaited before the next.
    ///
    /// On success, returns the final (post-interceptor) value.
    ///
    /// # Errors
    ///
    /// - [`BusError::Interceptor`]: a step rejected the value. The slot is
    ///   untouched and no subscriber was notified.
    /// - [`BusError::Subscriber`]: a subscriber failed. The committed value
    ///   stays committed; subscribers after the failing one were skipped.
    ///
    /// The returned future does nothing until polled, so a caller that never
    /// awaits it observes no failure.
    pub async fn send(&self, address: &str, value: T) -> Result<T, BusError> {
        let steps: Vec<Interceptor<T>> = self.with_slot(address, |slot| {
            slot.interceptors.iter().map(|e| e.step.clone()).collect()
        });

        let mut value = value;
        for step in steps {
            value = step(address.to_string(), value, self.clone())
                .await
                .map_err(|cause| BusError::Interceptor {
                    address: address.to_string(),
                    cause,
                })?;
        }

        // Commit and snapshot subscribers in one critical section, so a
        // subscriber registered mid-notification waits for the next emission
        // and one removed mid-notification still sees the current pass out.
        let subscribers: Vec<Listener<T>> = self.with_slot(address, |slot| {
            slot.commit(value.clone());
            slot.subscribers.iter().map(|e| e.listener.clone()).collect()
        });

        for subscriber in subscribers {
            subscriber(value.clone())
                .await
                .map_err(|cause| BusError::Subscriber {
                    address: address.to_string(),
                    cause,
                })?;
        }

        Ok(value)
    }

    // -----------------------------------------------------------------------
    // Subscription
    // -----------------------------------------------------------------------

    /// Register a subscriber for an address.
    ///
    /// If the address already has a cached value, the listener is invoked
    /// with it right away; the invocation is spawned, not awaited, and a
    /// failure is logged rather than raised (there is no caller to surface it
    /// to). Otherwise, if a loader is configured and no triggered load is
    /// already running, a load is triggered as a side effect.
    ///
    /// The returned [`Subscription`] removes exactly this registration; it is
    /// safe to consume from within the listener's own invocation. Dropping it
    /// without calling [`unsubscribe`](Subscription::unsubscribe) leaves the
    /// listener registered.
    pub fn listen(&self, address: &str, listener: Listener<T>) -> Subscription<T> {
        let id = next_registration_id();
        let effect = self.with_slot(address, |slot| {
            slot.subscribers.push(SubscriberEntry {
                id,
                listener: listener.clone(),
            });
            if let Some(value) = slot.last_value.clone() {
                Registered::Replay(value)
            } else if slot.loader.is_some() && !slot.load_in_flight() {
                Registered::TriggerLoad
            } else {
                Registered::Idle
            }
        });

        match effect {
            Registered::Replay(value) => {
                let name = self.inner.name.clone();
                let addr = address.to_string();
                tokio::spawn(async move {
                    if let Err(cause) = listener(value).await {
                        log::warn!("[{}] replay listener failed for `{}`: {}", name, addr, cause);
                    }
                });
            }
            Registered::TriggerLoad => self.trigger_load(address),
            Registered::Idle => {}
        }

        Subscription {
            registry: self.clone(),
            address: address.to_string(),
            id,
        }
    }

    /// Remove the first registration of `listener` on `address`, if any.
    ///
    /// Identity is the `Arc` allocation: a listener registered twice needs
    /// two calls to disappear entirely. No-op when the listener (or the
    /// address) is unknown.
    pub fn unlisten(&self, address: &str, listener: &Listener<T>) {
        let mut slots = self.inner.slots.write();
        if let Some(slot) = slots.get_mut(address) {
            if let Some(pos) = slot
                .subscribers
                .iter()
                .position(|e| Arc::ptr_eq(&e.listener, listener))
            {
                slot.subscribers.remove(pos);
            }
        }
    }

    // -----------------------------------------------------------------------
    // Interceptors
    // -----------------------------------------------------------------------

    /// Append a transform step to an address's interceptor chain.
    ///
    /// Steps run on every emission, in registration order; each step's output
    /// feeds the next. The returned handle removes exactly this step.
    pub fn add_interceptor(&self, address: &str, step: Interceptor<T>) -> InterceptorHandle<T> {
        let id = next_registration_id();
        self.with_slot(address, |slot| {
            slot.interceptors.push(InterceptorEntry { id, step });
        });
        InterceptorHandle {
            registry: self.clone(),
            address: address.to_string(),
            id,
        }
    }

    // -----------------------------------------------------------------------
    // Loading
    // -----------------------------------------------------------------------

    /// Configure the loader for an address, replacing any previous one.
    ///
    /// If the address has no cached value but already has subscribers (and no
    /// triggered load is running), a load is triggered immediately. This
    /// covers subscribers that registered before any loader existed.
    pub fn set_loader(&self, address: &str, loader: Loader<T>) {
        self.install_loader(address, loader, None);
    }

    /// Configure the loader and its recovery handler together.
    pub fn set_loader_with_recovery(
        &self,
        address: &str,
        loader: Loader<T>,
        recovery: LoadRecovery<T>,
    ) {
        self.install_loader(address, loader, Some(recovery));
    }

    /// Configure just the load-recovery handler for an address.
    pub fn set_load_recovery(&self, address: &str, recovery: LoadRecovery<T>) {
        self.with_slot(address, |slot| {
            slot.recovery = Some(recovery);
        });
    }

    /// Run the address's loader and resolve with the resulting cached value.
    ///
    /// Equivalent to [`load_with`](Self::load_with) with no extra arguments.
    pub async fn load(&self, address: &str) -> Result<Option<T>, BusError> {
        self.load_with(address, Vec::new()).await
    }

    /// Run the address's loader with extra arguments.
    ///
    /// With no loader configured, resolves immediately with the current
    /// cached value (possibly `None`) and performs no emission. Otherwise the
    /// loader is invoked with a registry handle, the address, and `args`; it
    /// is expected to deliver its value by emitting to the address itself.
    ///
    /// On loader failure the recovery handler, when configured, decides the
    /// outcome: a substituted value is emitted through the full pipeline and
    /// returned; declining re-signals the original failure as
    /// [`BusError::Loader`]; a failing handler surfaces as
    /// [`BusError::Recovery`] with the original failure attached.
    pub async fn load_with(&self, address: &str, args: Vec<Value>) -> Result<Option<T>, BusError> {
        let (loader, recovery) = self.with_slot(address, |slot| {
            (slot.loader.clone(), slot.recovery.clone())
        });

        let loader = match loader {
            Some(loader) => loader,
            None => return Ok(self.with_slot(address, |slot| slot.last_value.clone())),
        };

        match loader(self.clone(), address.to_string(), args).await {
            Ok(()) => Ok(self.with_slot(address, |slot| slot.last_value.clone())),
            Err(original) => match recovery {
                None => Err(BusError::Loader {
                    address: address.to_string(),
                    cause: original,
                }),
                Some(handler) => match handler(address.to_string(), original.clone()).await {
                    Ok(Some(recovered)) => {
                        let emitted = self.send(address, recovered).await?;
                        Ok(Some(emitted))
                    }
                    Ok(None) => Err(BusError::Loader {
                        address: address.to_string(),
                        cause: original,
                    }),
                    Err(cause) => Err(BusError::Recovery {
                        address: address.to_string(),
                        cause,
                        original,
                    }),
                },
            },
        }
    }

    // -----------------------------------------------------------------------
    // Internals
    // -----------------------------------------------------------------------

    fn install_loader(&self, address: &str, loader: Loader<T>, recovery: Option<LoadRecovery<T>>) {
        let should_trigger = self.with_slot(address, |slot| {
            slot.loader = Some(loader);
            if let Some(recovery) = recovery {
                slot.recovery = Some(recovery);
            }
            slot.last_value.is_none() && !slot.subscribers.is_empty() && !slot.load_in_flight()
        });
        if should_trigger {
            self.trigger_load(address);
        }
    }

    /// Spawn a load for `address` and track its handle on the slot.
    ///
    /// The handle is overwritten, never queued: an unfinished predecessor is
    /// detached and runs on untracked. Spawned loads have no awaiting caller,
    /// so their failures are logged here.
    fn trigger_load(&self, address: &str) {
        let registry = self.clone();
        let addr = address.to_string();
        let name = self.inner.name.clone();
        log::debug!("[{}] triggering load for `{}`", name, address);

        let handle = tokio::spawn(async move {
            let result = registry.load_with(&addr, Vec::new()).await;
            if let Err(ref err) = result {
                log::warn!("[{}] triggered load failed for `{}`: {}", name, addr, err);
            }
            result
        });

        self.with_slot(address, |slot| {
            if slot.load_in_flight() {
                log::warn!(
                    "[{}] replacing in-flight load handle for `{}`",
                    self.inner.name,
                    address
                );
            }
            slot.pending_load = Some(handle);
        });
    }

    /// Run `f` against the slot for `address`, creating it first if needed.
    /// The map lock is held only for the duration of `f`.
    fn with_slot<R>(&self, address: &str, f: impl FnOnce(&mut SlotState<T>) -> R) -> R {
        let mut slots = self.inner.slots.write();
        let slot = slots.entry(address.to_string()).or_insert_with(|| {
            log::debug!("[{}] created slot `{}`", self.inner.name, address);
            SlotState::new()
        });
        f(slot)
    }
}

// ---------------------------------------------------------------------------
// Registration handles
// ---------------------------------------------------------------------------

/// Handle to one subscriber registration.
///
/// Consuming it with [`unsubscribe`](Self::unsubscribe) removes exactly the
/// registration it was returned for, even when the same listener is
/// registered multiple times. Dropping the handle leaves the registration in
/// place.
pub struct Subscription<T> {
    registry: Registry<T>,
    address: String,
    id: u64,
}

impl<T: Clone + Send + Sync + 'static> Subscription<T> {
    /// The address this subscription is registered on.
    pub fn address(&self) -> &str {
        &self.address
    }

    /// Remove this registration. Takes effect for all future emissions; a
    /// notification pass already in progress completes with its snapshot.
    pub fn unsubscribe(self) {
        let mut slots = self.registry.inner.slots.write();
        if let Some(slot) = slots.get_mut(&self.address) {
            slot.subscribers.retain(|e| e.id != self.id);
        }
    }
}

impl<T> fmt::Debug for Subscription<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Subscription({}:{})", self.address, self.id)
    }
}

/// Handle to one interceptor registration.
pub struct InterceptorHandle<T> {
    registry: Registry<T>,
    address: String,
    id: u64,
}

impl<T: Clone + Send + Sync + 'static> InterceptorHandle<T> {
    /// The address this step is registered on.
    pub fn address(&self) -> &str {
        &self.address
    }

    /// Remove exactly this step from the chain. Emissions already past their
    /// snapshot are unaffected.
    pub fn remove(self) {
        let mut slots = self.registry.inner.slots.write();
        if let Some(slot) = slots.get_mut(&self.address) {
            slot.interceptors.retain(|e| e.id != self.id);
        }
    }
}

impl<T> fmt::Debug for InterceptorHandle<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "InterceptorHandle({}:{})", self.address, self.id)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
