//! Per-address slot state and its observable view.
//!
//! A slot is born the first time its address is referenced and lives for the
//! registry's lifetime. All mutation goes through the registry's public
//! operations; nothing outside the crate touches a slot directly.

use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::task::JoinHandle;

use crate::error::BusError;
use crate::handlers::{Interceptor, Listener, Loader, LoadRecovery};

// ---------------------------------------------------------------------------
// Registration ids
// ---------------------------------------------------------------------------

static REGISTRATION_ID_COUNTER: AtomicU64 = AtomicU64::new(1);

/// Next unique id for a subscriber or interceptor registration.
///
/// Ids are process-wide and monotonically increasing, so a registration can
/// be removed precisely even when the same callable is registered twice.
pub(crate) fn next_registration_id() -> u64 {
    REGISTRATION_ID_COUNTER.fetch_add(1, Ordering::Relaxed)
}

// ---------------------------------------------------------------------------
// Registration entries
// ---------------------------------------------------------------------------

/// A registered subscriber: insertion order is notification order.
pub(crate) struct SubscriberEntry<T> {
    pub(crate) id: u64,
    pub(crate) listener: Listener<T>,
}

/// A registered interceptor step: insertion order is application order.
pub(crate) struct InterceptorEntry<T> {
    pub(crate) id: u64,
    pub(crate) step: Interceptor<T>,
}

// ---------------------------------------------------------------------------
// SlotState
// ---------------------------------------------------------------------------

/// The mutable state of one address.
pub(crate) struct SlotState<T> {
    /// Most recently committed value. `None` until the first successful
    /// emission; never cleared afterwards.
    pub(crate) last_value: Option<T>,
    /// Commit timestamp. Set together with `last_value`, so presence of one
    /// implies presence of the other.
    pub(crate) last_updated: Option<DateTime<Utc>>,
    pub(crate) subscribers: Vec<SubscriberEntry<T>>,
    pub(crate) interceptors: Vec<InterceptorEntry<T>>,
    pub(crate) loader: Option<Loader<T>>,
    pub(crate) recovery: Option<LoadRecovery<T>>,
    /// Handle to the most recently spawned load. Overwritten, never queued:
    /// replacing an unfinished handle detaches the earlier task, which runs
    /// on untracked (last-write-wins).
    pub(crate) pending_load: Option<JoinHandle<Result<Option<T>, BusError>>>,
}

impl<T> SlotState<T> {
    pub(crate) fn new() -> Self {
        Self {
            last_value: None,
            last_updated: None,
            subscribers: Vec::new(),
            interceptors: Vec::new(),
            loader: None,
            recovery: None,
            pending_load: None,
        }
    }

    /// Commit a value: store it and stamp the update time.
    pub(crate) fn commit(&mut self, value: T) {
        self.last_value = Some(value);
        self.last_updated = Some(Utc::now());
    }

    /// Whether a spawned load for this slot is still running.
    pub(crate) fn load_in_flight(&self) -> bool {
        self.pending_load
            .as_ref()
            .map(|handle| !handle.is_finished())
            .unwrap_or(false)
    }
}

// ---------------------------------------------------------------------------
// SlotView
// ---------------------------------------------------------------------------

/// A snapshot of one address's observable state.
///
/// Returned by [`Registry::get`](crate::registry::Registry::get). The view is
/// detached: it does not track later changes to the slot.
#[derive(Debug, Clone, Serialize)]
pub struct SlotView<T> {
    /// The address this view describes.
    pub address: String,
    /// The cached value, if any emission has completed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<T>,
    /// When the cached value was committed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_updated: Option<DateTime<Utc>>,
    /// Number of registered subscribers (duplicates counted).
    pub subscriber_count: usize,
    /// Number of registered interceptor steps.
    pub interceptor_count: usize,
    /// Whether a loader is configured.
    pub has_loader: bool,
    /// Whether a triggered load is still running.
    pub load_in_flight: bool,
}

impl<T> SlotView<T> {
    /// Whether any successful emission has completed for this address.
    pub fn has_value(&self) -> bool {
        self.value.is_some()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_slot_is_empty() {
        let slot: SlotState<i64> = SlotState::new();
        assert!(slot.last_value.is_none());
        assert!(slot.last_updated.is_none());
        assert!(slot.subscribers.is_empty());
        assert!(slot.interceptors.is_empty());
        assert!(slot.loader.is_none());
        assert!(slot.recovery.is_none());
        assert!(!slot.load_in_flight());
    }

    #[test]
    fn test_commit_stamps_timestamp() {
        let mut slot: SlotState<i64> = SlotState::new();
        slot.commit(9);
        assert_eq!(slot.last_value, Some(9));
        assert!(slot.last_updated.is_some());
    }

    #[test]
    fn test_registration_ids_are_unique() {
        let a = next_registration_id();
        let b = next_registration_id();
        assert_ne!(a, b);
        assert!(b > a);
    }

    #[test]
    fn test_view_serializes_without_empty_fields() {
        let view: SlotView<i64> = SlotView {
            address: "cfg.theme".to_string(),
            value: None,
            last_updated: None,
            subscriber_count: 0,
            interceptor_count: 0,
            has_loader: false,
            load_in_flight: false,
        };
        let json = serde_json::to_value(&view).unwrap();
        assert_eq!(json["address"], "cfg.theme");
        assert!(json.get("value").is_none());
        assert!(json.get("last_updated").is_none());
        assert_eq!(json["subscriber_count"], 0);
    }

    #[test]
    fn test_view_has_value() {
        let view: SlotView<i64> = SlotView {
            address: "a".to_string(),
            value: Some(1),
            last_updated: Some(Utc::now()),
            subscriber_count: 1,
            interceptor_count: 0,
            has_loader: false,
            load_in_flight: false,
        };
        assert!(view.has_value());
    }
}
