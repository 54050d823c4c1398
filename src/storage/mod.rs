//! Swap Storage
//!
//! In-memory store for swap records and their append-only event log.
//! Records are keyed by hash lock. State-changing writes go through
//! [`SwapStore::update_if_state`], a compare-and-swap that rejects the
//! write when the record has moved on, so two concurrent drivers can
//! never both commit the same transition.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::error::{Result, SwapError};
use crate::swap::{SwapRecord, SwapState};

// ============================================================================
// EVENT LOG
// ============================================================================

/// One entry in a swap's audit trail.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SwapEvent {
    /// Hash lock of the swap this event belongs to
    pub htlc_hash: String,
    /// Event discriminator, e.g. "state_transition" or "broadcast_failed"
    pub event_type: String,
    /// State before the event, for transitions
    pub from_state: Option<SwapState>,
    /// State after the event, for transitions
    pub to_state: Option<SwapState>,
    /// Free-form details (txids, provider messages)
    pub details: Option<String>,
    /// When the event was recorded
    pub created_at: DateTime<Utc>,
}

// ============================================================================
// STORE
// ============================================================================

/// Shared store of swap records and events.
///
/// Cheap to clone; all clones see the same data.
#[derive(Debug, Clone, Default)]
pub struct SwapStore {
    swaps: Arc<RwLock<HashMap<String, SwapRecord>>>,
    events: Arc<RwLock<Vec<SwapEvent>>>,
}

impl SwapStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts a new swap record, keyed by its hash lock.
    ///
    /// # Returns
    ///
    /// * `Err(SwapError::Validation)` - A record with this hash lock exists
    pub async fn insert(&self, record: SwapRecord) -> Result<()> {
        let mut swaps = self.swaps.write().await;
        if swaps.contains_key(&record.htlc_hash) {
            return Err(SwapError::DuplicateSwap(record.htlc_hash.clone()));
        }
        swaps.insert(record.htlc_hash.clone(), record);
        Ok(())
    }

    /// Fetches a snapshot of a swap record.
    pub async fn get(&self, htlc_hash: &str) -> Result<SwapRecord> {
        let swaps = self.swaps.read().await;
        swaps
            .get(htlc_hash)
            .cloned()
            .ok_or_else(|| SwapError::SwapNotFound(htlc_hash.to_string()))
    }

    /// Compare-and-swap update: applies `mutate` and moves the record to
    /// `next` only if it is still in `expected`.
    ///
    /// The transition is validated against the lifecycle table, a rejected
    /// transition leaves the record (including `updated_at`) untouched. On
    /// success a `state_transition` event is appended.
    ///
    /// # Arguments
    ///
    /// * `htlc_hash` - Record key
    /// * `expected` - State the caller observed
    /// * `next` - State to move to
    /// * `mutate` - Field updates applied atomically with the transition
    pub async fn update_if_state<F>(
        &self,
        htlc_hash: &str,
        expected: SwapState,
        next: SwapState,
        mutate: F,
    ) -> Result<SwapRecord>
    where
        F: FnOnce(&mut SwapRecord),
    {
        let mut swaps = self.swaps.write().await;
        let record = swaps
            .get_mut(htlc_hash)
            .ok_or_else(|| SwapError::SwapNotFound(htlc_hash.to_string()))?;

        if record.state != expected {
            return Err(SwapError::InvalidTransition {
                from: record.state.as_str().to_string(),
                to: next.as_str().to_string(),
            });
        }
        if !expected.can_transition_to(next) {
            return Err(SwapError::InvalidTransition {
                from: expected.as_str().to_string(),
                to: next.as_str().to_string(),
            });
        }

        mutate(record);
        record.state = next;
        record.updated_at = Utc::now();
        let snapshot = record.clone();
        drop(swaps);

        self.append_event(SwapEvent {
            htlc_hash: htlc_hash.to_string(),
            event_type: "state_transition".to_string(),
            from_state: Some(expected),
            to_state: Some(next),
            details: None,
            created_at: Utc::now(),
        })
        .await;

        Ok(snapshot)
    }

    /// Applies a field update without changing state, only if the record is
    /// still in `expected`.
    ///
    /// For observation progress that belongs on the record (confirmation
    /// depth, funding details) while the swap stays in the same state. No
    /// transition event is appended and `updated_at` is left alone, so the
    /// write never masks a state change.
    pub async fn update_fields<F>(
        &self,
        htlc_hash: &str,
        expected: SwapState,
        mutate: F,
    ) -> Result<SwapRecord>
    where
        F: FnOnce(&mut SwapRecord),
    {
        let mut swaps = self.swaps.write().await;
        let record = swaps
            .get_mut(htlc_hash)
            .ok_or_else(|| SwapError::SwapNotFound(htlc_hash.to_string()))?;

        if record.state != expected {
            return Err(SwapError::InvalidTransition {
                from: record.state.as_str().to_string(),
                to: expected.as_str().to_string(),
            });
        }

        mutate(record);
        Ok(record.clone())
    }

    /// Lists swaps currently in any of the given states.
    pub async fn list_in_states(&self, states: &[SwapState]) -> Vec<SwapRecord> {
        let swaps = self.swaps.read().await;
        swaps
            .values()
            .filter(|r| states.contains(&r.state))
            .cloned()
            .collect()
    }

    /// Lists all non-terminal swaps.
    pub async fn list_active(&self) -> Vec<SwapRecord> {
        let swaps = self.swaps.read().await;
        swaps
            .values()
            .filter(|r| !r.state.is_terminal())
            .cloned()
            .collect()
    }

    /// Appends an audit event.
    pub async fn append_event(&self, event: SwapEvent) {
        let mut events = self.events.write().await;
        events.push(event);
    }

    /// Returns all events recorded for a swap, in insertion order.
    pub async fn events_for(&self, htlc_hash: &str) -> Vec<SwapEvent> {
        let events = self.events.read().await;
        events
            .iter()
            .filter(|e| e.htlc_hash == htlc_hash)
            .cloned()
            .collect()
    }
}

// ============================================================================
// TESTS
// ============================================================================
