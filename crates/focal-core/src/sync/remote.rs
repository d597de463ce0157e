//! Remote store seam
//!
//! The cloud backend is reached through a server-side sync RPC (keeping
//! privileged credentials off the client) plus a realtime change feed.
//! Only the interface shape lives here; transports are injected.

use crate::error::Result;
use crate::models::EditorRank;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::mpsc;

/// Result of one sync RPC call
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncCallOutcome {
    pub success: bool,
    pub error: Option<String>,
}

impl SyncCallOutcome {
    /// A successful call
    pub const fn ok() -> Self {
        Self {
            success: true,
            error: None,
        }
    }

    /// A failed call carrying the server error message
    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            success: false,
            error: Some(error.into()),
        }
    }

    /// Whether the failure is a unique-key conflict, which routes to the
    /// conflict resolver instead of the error path
    pub fn is_duplicate_key(&self) -> bool {
        self.error.as_ref().is_some_and(|e| {
            let e = e.to_lowercase();
            e.contains("duplicate key")
                || e.contains("unique constraint")
                || e.contains("23505")
        })
    }
}

/// The remote row fields needed for conflict comparison
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RemoteBookingMeta {
    pub last_editor_rank: Option<String>,
    pub updated_by_name: Option<String>,
}

impl RemoteBookingMeta {
    /// Ordinal authority of the remote editor
    pub fn rank(&self) -> EditorRank {
        EditorRank::from_role(self.last_editor_rank.as_deref())
    }
}

/// Change feed event kind
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeKind {
    Insert,
    Update,
    Delete,
}

/// One row change pushed from the remote's replication feed
#[derive(Debug, Clone)]
pub struct ChangeEvent {
    /// Watched table name
    pub table: String,
    pub kind: ChangeKind,
    /// Row after the change (INSERT/UPDATE)
    pub new_row: Option<Value>,
    /// Row before the change (UPDATE/DELETE)
    pub old_row: Option<Value>,
}

/// Remote store reachable over the network.
///
/// Every method suspends; implementations own timeouts for their transport.
#[async_trait]
pub trait RemoteStore: Send + Sync {
    /// Invoke the server-side sync function for one mutation.
    /// Transport failures are `Err`; server-side rejections come back as
    /// `Ok` with `success == false` and an error message.
    async fn call_sync_function(
        &self,
        action: &str,
        entity: &str,
        payload: &Value,
    ) -> Result<SyncCallOutcome>;

    /// Read-only fetch of the remote booking's conflict metadata.
    /// `Ok(None)` when the row does not exist.
    async fn fetch_booking_meta(&self, booking_id: &str) -> Result<Option<RemoteBookingMeta>>;

    /// Cheap connectivity probe used before a drain pass
    async fn test_connectivity(&self) -> Result<()>;

    /// Subscribe to the realtime change feed for the given tables
    async fn subscribe_changes(&self, tables: &[&str]) -> Result<mpsc::Receiver<ChangeEvent>>;
}

#[cfg(test)]
pub(crate) mod testing {
    //! Scripted remote used by conflict and manager tests

    use super::{ChangeEvent, RemoteBookingMeta, RemoteStore, SyncCallOutcome};
    use crate::error::{Error, Result};
    use async_trait::async_trait;
    use serde_json::Value;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use tokio::sync::mpsc;

    /// One recorded sync RPC call
    #[derive(Debug, Clone, PartialEq)]
    pub struct RecordedCall {
        pub action: String,
        pub entity: String,
        pub payload: Value,
    }

    #[derive(Default)]
    pub struct MockRemote {
        calls: Mutex<Vec<RecordedCall>>,
        /// Remote booking rows visible to `fetch_booking_meta`
        pub booking_meta: Mutex<HashMap<String, RemoteBookingMeta>>,
        /// Outcome script per call, consumed front-to-back; `ok()` after exhaustion
        outcomes: Mutex<Vec<SyncCallOutcome>>,
        /// Transport errors to return before any outcome is consulted
        transport_failures: AtomicUsize,
        /// Concurrency tracking for single-flight assertions
        active: AtomicUsize,
        pub max_active: AtomicUsize,
        feed_tx: Mutex<Option<mpsc::Sender<ChangeEvent>>>,
    }

    impl MockRemote {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn script_outcome(&self, outcome: SyncCallOutcome) {
            self.outcomes.lock().unwrap().push(outcome);
        }

        pub fn script_transport_failures(&self, count: usize) {
            self.transport_failures.store(count, Ordering::SeqCst);
        }

        pub fn set_booking_meta(&self, id: &str, meta: RemoteBookingMeta) {
            self.booking_meta.lock().unwrap().insert(id.to_string(), meta);
        }

        pub fn calls(&self) -> Vec<RecordedCall> {
            self.calls.lock().unwrap().clone()
        }

        pub fn call_count(&self) -> usize {
            self.calls.lock().unwrap().len()
        }

        /// Push a change event into the subscribed feed. Silently dropped
        /// when no subscriber is listening, matching a paused feed.
        pub async fn push_change(&self, event: ChangeEvent) {
            let tx = self.feed_tx.lock().unwrap().clone();
            if let Some(tx) = tx {
                let _ = tx.send(event).await;
            }
        }
    }

    #[async_trait]
    impl RemoteStore for MockRemote {
        async fn call_sync_function(
            &self,
            action: &str,
            entity: &str,
            payload: &Value,
        ) -> Result<SyncCallOutcome> {
            let active = self.active.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_active.fetch_max(active, Ordering::SeqCst);
            // Hold the "in flight" window open so overlapping drains would show up
            tokio::task::yield_now().await;
            self.active.fetch_sub(1, Ordering::SeqCst);

            self.calls.lock().unwrap().push(RecordedCall {
                action: action.to_string(),
                entity: entity.to_string(),
                payload: payload.clone(),
            });

            let failures = self.transport_failures.load(Ordering::SeqCst);
            if failures > 0 {
                self.transport_failures.store(failures - 1, Ordering::SeqCst);
                return Err(Error::Remote("connection reset".to_string()));
            }

            let mut outcomes = self.outcomes.lock().unwrap();
            if outcomes.is_empty() {
                Ok(SyncCallOutcome::ok())
            } else {
                Ok(outcomes.remove(0))
            }
        }

        async fn fetch_booking_meta(
            &self,
            booking_id: &str,
        ) -> Result<Option<RemoteBookingMeta>> {
            Ok(self.booking_meta.lock().unwrap().get(booking_id).cloned())
        }

        async fn test_connectivity(&self) -> Result<()> {
            Ok(())
        }

        async fn subscribe_changes(
            &self,
            _tables: &[&str],
        ) -> Result<mpsc::Receiver<ChangeEvent>> {
            let (tx, rx) = mpsc::channel(16);
            *self.feed_tx.lock().unwrap() = Some(tx);
            Ok(rx)
        }
    }
}
