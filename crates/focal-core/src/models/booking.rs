//! Booking model and editor authority ranking

use serde::{Deserialize, Serialize};

/// Authority rank derived from the role string attached to a booking edit.
///
/// Not stored as its own entity; computed transiently from
/// `last_editor_rank` during conflict comparison.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum EditorRank {
    Staff = 1,
    Supervisor = 2,
    Manager = 3,
}

impl EditorRank {
    /// Map a role string to its ordinal rank.
    ///
    /// MANAGER=3, ADMIN/SUPERVISOR=2, everything else (reception,
    /// photographer, unknown, missing) = 1.
    pub fn from_role(role: Option<&str>) -> Self {
        match role.map(str::trim).map(str::to_uppercase).as_deref() {
            Some("MANAGER") => Self::Manager,
            Some("ADMIN" | "SUPERVISOR") => Self::Supervisor,
            _ => Self::Staff,
        }
    }

    /// Ordinal value used for conflict comparison
    pub const fn value(self) -> u8 {
        self as u8
    }
}

/// A booking in the local store.
///
/// Carries only the fields the sync engine needs; the full business schema
/// lives in the application layer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Booking {
    /// Unique identifier (shared with the remote store)
    pub id: String,
    /// Session title
    pub title: String,
    /// Session category (wedding, portrait, product, ...)
    pub category: String,
    /// Client display name
    pub client_name: String,
    /// Total amount in minor units
    pub total_amount: i64,
    /// ISO currency code
    pub currency: String,
    /// Session start (Unix ms)
    pub start_at: i64,
    /// Session end (Unix ms)
    pub end_at: i64,
    /// Role string of the last editor, drives conflict authority
    pub last_editor_rank: Option<String>,
    /// Display name of the last editor
    pub updated_by_name: Option<String>,
    /// Creation timestamp (Unix ms)
    pub created_at: i64,
    /// Last update timestamp (Unix ms)
    pub updated_at: i64,
    /// Soft delete flag for sync
    pub is_deleted: bool,
}

/// A staff member row in the local store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StaffUser {
    pub id: String,
    pub full_name: String,
    pub email: String,
    pub role: String,
    pub created_at: i64,
    pub updated_at: i64,
}
