//! Database layer for Focal

mod booking_repository;
mod conflict_repository;
mod connection;
mod migrations;
mod queue_repository;

pub use booking_repository::{
    BookingRepository, LibSqlBookingRepository, LibSqlUserRepository, UserRepository,
};
pub use conflict_repository::{ConflictRepository, LibSqlConflictRepository};
pub use connection::Database;
pub use queue_repository::{LibSqlSyncQueueRepository, SyncQueueRepository};
