//! Booking conflict resolution
//!
//! Pure last-write-wins would let a low-authority edit silently clobber a
//! high-authority one after a network partition heals. Instead, editor
//! authority decides: the local edit wins on equal or higher rank (and
//! always when the same person made both edits), otherwise it is parked
//! as a draft for manual review rather than lost.

use crate::db::{ConflictRepository, Database, LibSqlConflictRepository};
use crate::error::{Error, Result};
use crate::models::EditorRank;
use crate::sync::remote::RemoteStore;
use serde_json::Value;
use std::sync::Arc;

/// Resolves write conflicts on the booking entity
pub struct ConflictResolver {
    remote: Arc<dyn RemoteStore>,
    db: Arc<Database>,
}

impl ConflictResolver {
    pub fn new(remote: Arc<dyn RemoteStore>, db: Arc<Database>) -> Self {
        Self { remote, db }
    }

    /// Decide the outcome of a booking write conflict.
    ///
    /// Returns `Ok(true)` when the item is handled: either the local payload
    /// was upserted to the remote, or it was durably parked as a draft.
    /// `Ok(false)` means the remote rejected the forced upsert.
    ///
    /// Deterministic given (local rank, remote rank, editor names).
    pub async fn resolve_booking_conflict(&self, local: &Value) -> Result<bool> {
        let booking_id = local
            .get("id")
            .and_then(Value::as_str)
            .filter(|s| !s.is_empty())
            .ok_or_else(|| Error::InvalidInput("conflict payload missing booking id".to_string()))?;

        // A fetch failure is treated the same as a missing row: no conflict
        let meta = match self.remote.fetch_booking_meta(booking_id).await {
            Ok(meta) => meta,
            Err(e) => {
                tracing::warn!(booking_id, error = %e, "Conflict-check fetch failed, assuming no remote row");
                None
            }
        };

        let Some(meta) = meta else {
            tracing::debug!(booking_id, "No remote row, forcing upsert");
            return self.force_upsert(booking_id, local).await;
        };

        let local_editor = local
            .get("updated_by_name")
            .and_then(Value::as_str)
            .unwrap_or_default();
        let remote_editor = meta.updated_by_name.as_deref().unwrap_or_default();

        // Same human on both sides: an offline edit retried by the same
        // session is self-correction, not a conflict
        if !local_editor.is_empty() && local_editor == remote_editor {
            tracing::debug!(booking_id, editor = local_editor, "Same editor on both sides, local wins");
            return self.force_upsert(booking_id, local).await;
        }

        let local_rank =
            EditorRank::from_role(local.get("last_editor_rank").and_then(Value::as_str));
        let remote_rank = meta.rank();

        if local_rank >= remote_rank {
            // Tie goes to the item actively being synced
            tracing::debug!(
                booking_id,
                local_rank = local_rank.value(),
                remote_rank = remote_rank.value(),
                "Local authority wins, forcing upsert"
            );
            return self.force_upsert(booking_id, local).await;
        }

        // Local loses: park the payload for manual review instead of
        // overwriting the higher-authority remote edit
        let conflicts = LibSqlConflictRepository::new(self.db.connection());
        conflicts
            .park_draft(booking_id, local, local_editor, remote_editor)
            .await?;
        tracing::info!(
            booking_id,
            local_editor,
            remote_editor,
            "Lower-authority edit parked as conflict draft"
        );
        Ok(true)
    }

    async fn force_upsert(&self, booking_id: &str, local: &Value) -> Result<bool> {
        let outcome = self
            .remote
            .call_sync_function("upsert", "booking", local)
            .await?;
        if !outcome.success {
            tracing::warn!(
                booking_id,
                error = outcome.error.as_deref().unwrap_or("unknown"),
                "Forced upsert rejected by remote"
            );
        }
        Ok(outcome.success)
    }
}
