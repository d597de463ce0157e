//! Sync conflict model

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Resolution tag for conflicts parked for manual review
pub const RESOLUTION_DRAFT: &str = "draft";

/// A booking edit that lost a conflict against a higher-authority remote
/// edit, stored as a draft awaiting manual reconciliation rather than
/// applied destructively.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncConflict {
    /// Conflict row identifier
    pub id: i64,
    /// Booking involved in the conflict
    pub booking_id: String,
    /// The losing local payload, kept verbatim
    pub local_payload: Value,
    /// Resolution tag ("draft" until manually reconciled)
    pub resolution: String,
    /// Display name of the local editor whose edit was parked
    pub local_editor: String,
    /// Display name of the remote editor whose edit was kept
    pub remote_editor: String,
    /// Creation timestamp (Unix ms)
    pub created_at: i64,
}
