//! # livebus
//!
//! An in-process publish/subscribe value cache. A [`Registry`] maps opaque
//! string addresses to slots; each slot holds the last value delivered to it,
//! an ordered set of subscribers, an optional asynchronous loader invoked on
//! first subscription, and an ordered chain of interceptors applied to every
//! emitted value before it is cached and fanned out.
//!
//! Four protocols interact on each slot:
//!
//! - **Emission**: [`Registry::send`] runs the interceptor chain, commits the
//!   result as the cached value, and notifies subscribers in registration
//!   order, each awaited before the next.
//! - **Subscription**: [`Registry::listen`] registers a subscriber and
//!   replays the cached value to it when one exists.
//! - **Lazy loading**: the first subscription to an empty slot with a
//!   configured loader triggers the loader, which delivers its value by
//!   emitting to the address itself.
//! - **Recovery**: a failing loader can be rescued by a recovery handler that
//!   substitutes a value or re-signals the failure.
//!
//! All state lives in one process's memory; delivery is synchronous per call.
//! There is no batching, no backpressure, and no cross-process transport.
//!
//! # Example
//!
//! ```
//! use livebus::{listener, Registry};
//!
//! tokio_test::block_on(async {
//!     let bus: Registry<i64> = Registry::new();
//!
//!     let sub = bus.listen("metrics.cpu", listener(|v: i64| async move {
//!         assert!(v >= 0);
//!         Ok(())
//!     }));
//!
//!     let delivered = bus.send("metrics.cpu", 42).await.unwrap();
//!     assert_eq!(delivered, 42);
//!     assert_eq!(bus.get("metrics.cpu").value, Some(42));
//!
//!     sub.unsubscribe();
//! });
//! ```

pub mod error;
pub mod handlers;
pub mod registry;
pub mod slot;

pub use error::{BusError, Cause};
pub use handlers::{
    interceptor, listener, loader, recovery, Interceptor, Listener, Loader, LoadRecovery,
};
pub use registry::{InterceptorHandle, Registry, Subscription};
pub use slot::SlotView;

use std::sync::OnceLock;

// ---------------------------------------------------------------------------
// Shared default instance
// ---------------------------------------------------------------------------

/// Conventionally shared registry carrying JSON payloads.
///
/// Initialized on first access. This is a convenience for applications that
/// want one well-known bus; it shares nothing with caller-constructed
/// registries, which remain fully independent.
static SHARED_REGISTRY: OnceLock<Registry<serde_json::Value>> = OnceLock::new();

/// The process-wide shared registry, created on first call.
pub fn shared() -> &'static Registry<serde_json::Value> {
    SHARED_REGISTRY.get_or_init(|| Registry::named("shared"))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
