//! Error types for the registry.
//!
//! Failures inside the registry originate in caller-supplied callables:
//! interceptor steps, subscribers, loaders, and load-recovery handlers. Those
//! callables fail with a [`Cause`], a tagged raw-cause value that preserves
//! whatever the callable produced (a message, structured data, or a real
//! error object) without flattening it into a string. The registry wraps the
//! cause in a [`BusError`] variant that records which protocol stage failed
//! and for which address.

use std::fmt;
use std::sync::Arc;

use serde_json::Value;
use thiserror::Error;

// ---------------------------------------------------------------------------
// Cause -- the raw failure payload produced by a callable
// ---------------------------------------------------------------------------

/// The raw payload of a callable failure.
///
/// Callbacks are free to fail with a plain message, an arbitrary JSON value,
/// or a real error object; the registry carries the payload through
/// unchanged, including across loader recovery.
#[derive(Debug, Clone)]
pub enum Cause {
    /// A plain textual message.
    Message(String),
    /// Arbitrary structured data.
    Data(Value),
    /// A boxed error object (shared so the cause stays cheaply clonable).
    Error(Arc<dyn std::error::Error + Send + Sync>),
}

impl Cause {
    /// Wrap a concrete error object.
    pub fn error<E>(err: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Cause::Error(Arc::new(err))
    }

    /// The textual message, if this cause is [`Cause::Message`].
    pub fn as_message(&self) -> Option<&str> {
        match self {
            Cause::Message(m) => Some(m),
            _ => None,
        }
    }

    /// The structured payload, if this cause is [`Cause::Data`].
    pub fn as_data(&self) -> Option<&Value> {
        match self {
            Cause::Data(v) => Some(v),
            _ => None,
        }
    }
}

impl fmt::Display for Cause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Cause::Message(m) => f.write_str(m),
            Cause::Data(v) => write!(f, "{}", v),
            Cause::Error(e) => write!(f, "{}", e),
        }
    }
}

impl From<String> for Cause {
    fn from(message: String) -> Self {
        Cause::Message(message)
    }
}

impl From<&str> for Cause {
    fn from(message: &str) -> Self {
        Cause::Message(message.to_string())
    }
}

impl From<Value> for Cause {
    fn from(data: Value) -> Self {
        Cause::Data(data)
    }
}

impl From<anyhow::Error> for Cause {
    fn from(err: anyhow::Error) -> Self {
        let boxed: Box<dyn std::error::Error + Send + Sync> = err.into();
        Cause::Error(Arc::from(boxed))
    }
}

// ---------------------------------------------------------------------------
// BusError -- stage-tagged registry failure
// ---------------------------------------------------------------------------

/// A failed registry operation.
///
/// Every variant records the address and the raw [`Cause`] produced by the
/// failing callable. The variant tells the caller which stage failed, which
/// determines how much state was mutated:
///
/// - [`Interceptor`](BusError::Interceptor): the emission aborted before the
///   slot was touched; no subscriber was notified.
/// - [`Subscriber`](BusError::Subscriber): the emitted value is already
///   committed to the slot; subscribers after the failing one were skipped.
/// - [`Loader`](BusError::Loader): the loader failed and recovery declined
///   (or was not configured); `cause` is the original loader failure.
/// - [`Recovery`](BusError::Recovery): the recovery handler itself failed;
///   the original loader failure rides along as `original`.
#[derive(Debug, Clone, Error)]
pub enum BusError {
    /// An interceptor step rejected the value; the emission was aborted.
    #[error("interceptor rejected value for `{address}`: {cause}")]
    Interceptor {
        /// Address the emission targeted.
        address: String,
        /// Failure payload from the rejecting step.
        cause: Cause,
    },

    /// A subscriber failed during notification; later subscribers were skipped.
    #[error("subscriber failed for `{address}`: {cause}")]
    Subscriber {
        /// Address the emission targeted.
        address: String,
        /// Failure payload from the failing subscriber.
        cause: Cause,
    },

    /// The loader failed and no recovery value was substituted.
    #[error("loader failed for `{address}`: {cause}")]
    Loader {
        /// Address being loaded.
        address: String,
        /// The original loader failure.
        cause: Cause,
    },

    /// The load-recovery handler itself failed.
    #[error("load recovery failed for `{address}`: {cause} (loader originally failed with: {original})")]
    Recovery {
        /// Address being loaded.
        address: String,
        /// Failure payload from the recovery handler.
        cause: Cause,
        /// The loader failure the handler was recovering from.
        original: Cause,
    },
}

impl BusError {
    /// The address the failing operation targeted.
    pub fn address(&self) -> &str {
        match self {
            BusError::Interceptor { address, .. }
            | BusError::Subscriber { address, .. }
            | BusError::Loader { address, .. }
            | BusError::Recovery { address, .. } => address,
        }
    }

    /// The raw failure payload of the stage that failed.
    pub fn cause(&self) -> &Cause {
        match self {
            BusError::Interceptor { cause, .. }
            | BusError::Subscriber { cause, .. }
            | BusError::Loader { cause, .. }
            | BusError::Recovery { cause, .. } => cause,
        }
    }

    /// The original loader failure, when this error wraps a failed recovery.
    pub fn original(&self) -> Option<&Cause> {
        match self {
            BusError::Recovery { original, .. } => Some(original),
            _ => None,
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
