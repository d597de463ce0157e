//! Data models for focal-core

mod booking;
mod queue_item;
mod sync_conflict;

pub use booking::{Booking, EditorRank, StaffUser};
pub use queue_item::{QueueItem, QueueItemId, QueueItemStatus, SyncAction};
pub use sync_conflict::{SyncConflict, RESOLUTION_DRAFT};
