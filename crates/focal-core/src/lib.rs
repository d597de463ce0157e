//! focal-core - Core library for Focal
//!
//! This crate contains the shared models, local database layer, and the
//! offline-first sync engine used by all Focal interfaces.

pub mod config;
pub mod db;
pub mod error;
pub mod models;
pub mod state;
pub mod sync;
pub mod util;

pub use error::{Error, Result};
pub use models::{Booking, EditorRank, QueueItem, QueueItemId, StaffUser, SyncAction};
pub use state::SyncState;
pub use sync::{SyncEvent, SyncManager};
