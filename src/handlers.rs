//! Callable types accepted by the registry.
//!
//! All four kinds of callables are shared async closures: an `Arc`'d `Fn`
//! returning a [`BoxFuture`]. The `Arc` is the callable's identity; the same
//! handle registered twice counts as two registrations, and identity-based
//! removal ([`Registry::unlisten`](crate::registry::Registry::unlisten))
//! compares allocations, not behaviour.
//!
//! The adapter functions ([`listener`], [`interceptor`], [`loader`],
//! [`recovery`]) lift ordinary async closures into the aliases so call sites
//! do not have to box futures by hand.

use std::future::Future;
use std::sync::Arc;

use futures::future::BoxFuture;
use futures::FutureExt;
use serde_json::Value;

use crate::error::Cause;
use crate::registry::Registry;

// ---------------------------------------------------------------------------
// Type aliases
// ---------------------------------------------------------------------------

/// A subscriber callback, invoked with each value delivered to its address.
///
/// During an emission, subscribers run strictly in registration order and
/// each is awaited to completion before the next begins. A failing listener
/// aborts the rest of the notification pass.
pub type Listener<T> = Arc<dyn Fn(T) -> BoxFuture<'static, Result<(), Cause>> + Send + Sync>;

/// A transform step applied to every value emitted to its address.
///
/// Receives the address, the current value (the previous step's output), and
/// a registry handle so the step may read or mutate other addresses. The
/// returned value feeds the next step; the final step's output is what gets
/// cached and fanned out.
pub type Interceptor<T> =
    Arc<dyn Fn(String, T, Registry<T>) -> BoxFuture<'static, Result<T, Cause>> + Send + Sync>;

/// An address-scoped value producer.
///
/// Invoked with a registry handle, the address, and any extra arguments from
/// the `load` call. A loader does not return its value; it is expected to
/// deliver it by calling [`send`](crate::registry::Registry::send) on the
/// address itself.
pub type Loader<T> =
    Arc<dyn Fn(Registry<T>, String, Vec<Value>) -> BoxFuture<'static, Result<(), Cause>> + Send + Sync>;

/// A recovery routine invoked when an address's loader fails.
///
/// Receives the address and the loader's failure cause. Returning
/// `Ok(Some(value))` substitutes a recovered value, which is emitted through
/// the address's full pipeline. Returning `Ok(None)` declines recovery and
/// re-signals the original loader failure. Failing rejects the load with the
/// handler's own cause, with the original attached as context.
pub type LoadRecovery<T> =
    Arc<dyn Fn(String, Cause) -> BoxFuture<'static, Result<Option<T>, Cause>> + Send + Sync>;

// ---------------------------------------------------------------------------
// Adapters
// ---------------------------------------------------------------------------

/// Lift an async closure into a [`Listener`].
pub fn listener<T, F, Fut>(f: F) -> Listener<T>
where
    F: Fn(T) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), Cause>> + Send + 'static,
{
    Arc::new(move |value| f(value).boxed())
}

/// Lift an async closure into an [`Interceptor`].
pub fn interceptor<T, F, Fut>(f: F) -> Interceptor<T>
where
    F: Fn(String, T, Registry<T>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<T, Cause>> + Send + 'static,
{
    Arc::new(move |address, value, registry| f(address, value, registry).boxed())
}

/// Lift an async closure into a [`Loader`].
pub fn loader<T, F, Fut>(f: F) -> Loader<T>
where
    F: Fn(Registry<T>, String, Vec<Value>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), Cause>> + Send + 'static,
{
    Arc::new(move |registry, address, args| f(registry, address, args).boxed())
}

/// Lift an async closure into a [`LoadRecovery`].
pub fn recovery<T, F, Fut>(f: F) -> LoadRecovery<T>
where
    F: Fn(String, Cause) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Option<T>, Cause>> + Send + 'static,
{
    Arc::new(move |address, cause| f(address, cause).boxed())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
