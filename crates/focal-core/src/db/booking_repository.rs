//! Local booking and staff user repositories
//!
//! The change-feed side of the sync engine applies remote rows through
//! these; the UI layer writes through them too (and enqueues the mutation).

use crate::error::{Error, Result};
use crate::models::{Booking, StaffUser};
use crate::util::unix_timestamp_ms;
use libsql::{params, Connection};

/// Trait for local booking storage operations (async)
#[allow(async_fn_in_trait)]
pub trait BookingRepository {
    /// Get a booking by ID (excluding soft-deleted rows)
    async fn get(&self, id: &str) -> Result<Option<Booking>>;

    /// Whether any row with this id exists, deleted or not
    async fn exists(&self, id: &str) -> Result<bool>;

    /// Insert a new booking row
    async fn create(&self, booking: &Booking) -> Result<()>;

    /// Overwrite an existing booking row
    async fn update(&self, booking: &Booking) -> Result<()>;

    /// Soft delete a booking (sets the deleted marker). No-op for unknown
    /// ids: the change feed may deliver deletes for rows never seen locally.
    async fn soft_delete(&self, id: &str) -> Result<()>;
}

/// Trait for local staff user storage operations (async)
#[allow(async_fn_in_trait)]
pub trait UserRepository {
    /// Get a user by ID
    async fn get(&self, id: &str) -> Result<Option<StaffUser>>;

    /// Insert or overwrite a user row. Returns true when a new row was created.
    async fn upsert(&self, user: &StaffUser) -> Result<bool>;
}

/// libSQL implementation of `BookingRepository`
pub struct LibSqlBookingRepository<'a> {
    conn: &'a Connection,
}

impl<'a> LibSqlBookingRepository<'a> {
    /// Create a new repository with the given connection
    pub const fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    /// Parse a booking from a database row
    fn parse_booking(row: &libsql::Row) -> Result<Booking> {
        Ok(Booking {
            id: row.get(0)?,
            title: row.get(1)?,
            category: row.get(2)?,
            client_name: row.get(3)?,
            total_amount: row.get(4)?,
            currency: row.get(5)?,
            start_at: row.get(6)?,
            end_at: row.get(7)?,
            last_editor_rank: row.get(8)?,
            updated_by_name: row.get(9)?,
            created_at: row.get(10)?,
            updated_at: row.get(11)?,
            is_deleted: row.get::<i32>(12)? != 0,
        })
    }
}

const BOOKING_COLUMNS: &str = "id, title, category, client_name, total_amount, currency, \
     start_at, end_at, last_editor_rank, updated_by_name, created_at, updated_at, is_deleted";

impl BookingRepository for LibSqlBookingRepository<'_> {
    async fn get(&self, id: &str) -> Result<Option<Booking>> {
        let sql = format!("SELECT {BOOKING_COLUMNS} FROM bookings WHERE id = ? AND is_deleted = 0");
        let mut rows = self.conn.query(&sql, params![id]).await?;

        match rows.next().await? {
            Some(row) => Ok(Some(Self::parse_booking(&row)?)),
            None => Ok(None),
        }
    }

    async fn exists(&self, id: &str) -> Result<bool> {
        let mut rows = self
            .conn
            .query(
                "SELECT EXISTS(SELECT 1 FROM bookings WHERE id = ?)",
                params![id],
            )
            .await?;
        let exists = match rows.next().await? {
            Some(row) => row.get::<i32>(0)? != 0,
            None => false,
        };
        Ok(exists)
    }

    async fn create(&self, booking: &Booking) -> Result<()> {
        self.conn
            .execute(
                "INSERT INTO bookings (id, title, category, client_name, total_amount, currency,
                     start_at, end_at, last_editor_rank, updated_by_name, created_at, updated_at, is_deleted)
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
                params![
                    booking.id.as_str(),
                    booking.title.as_str(),
                    booking.category.as_str(),
                    booking.client_name.as_str(),
                    booking.total_amount,
                    booking.currency.as_str(),
                    booking.start_at,
                    booking.end_at,
                    booking.last_editor_rank.clone(),
                    booking.updated_by_name.clone(),
                    booking.created_at,
                    booking.updated_at,
                    i32::from(booking.is_deleted)
                ],
            )
            .await?;
        Ok(())
    }

    async fn update(&self, booking: &Booking) -> Result<()> {
        let rows = self
            .conn
            .execute(
                "UPDATE bookings SET title = ?, category = ?, client_name = ?, total_amount = ?,
                     currency = ?, start_at = ?, end_at = ?, last_editor_rank = ?,
                     updated_by_name = ?, updated_at = ?, is_deleted = ?
                 WHERE id = ?",
                params![
                    booking.title.as_str(),
                    booking.category.as_str(),
                    booking.client_name.as_str(),
                    booking.total_amount,
                    booking.currency.as_str(),
                    booking.start_at,
                    booking.end_at,
                    booking.last_editor_rank.clone(),
                    booking.updated_by_name.clone(),
                    booking.updated_at,
                    i32::from(booking.is_deleted),
                    booking.id.as_str()
                ],
            )
            .await?;

        if rows == 0 {
            return Err(Error::NotFound(booking.id.clone()));
        }
        Ok(())
    }

    async fn soft_delete(&self, id: &str) -> Result<()> {
        self.conn
            .execute(
                "UPDATE bookings SET is_deleted = 1, updated_at = ? WHERE id = ? AND is_deleted = 0",
                params![unix_timestamp_ms(), id],
            )
            .await?;
        Ok(())
    }
}

/// libSQL implementation of `UserRepository`
pub struct LibSqlUserRepository<'a> {
    conn: &'a Connection,
}

impl<'a> LibSqlUserRepository<'a> {
    /// Create a new repository with the given connection
    pub const fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }
}

impl UserRepository for LibSqlUserRepository<'_> {
    async fn get(&self, id: &str) -> Result<Option<StaffUser>> {
        let mut rows = self
            .conn
            .query(
                "SELECT id, full_name, email, role, created_at, updated_at
                 FROM staff_users WHERE id = ?",
                params![id],
            )
            .await?;

        match rows.next().await? {
            Some(row) => Ok(Some(StaffUser {
                id: row.get(0)?,
                full_name: row.get(1)?,
                email: row.get(2)?,
                role: row.get(3)?,
                created_at: row.get(4)?,
                updated_at: row.get(5)?,
            })),
            None => Ok(None),
        }
    }

    async fn upsert(&self, user: &StaffUser) -> Result<bool> {
        let created = self.get(&user.id).await?.is_none();
        self.conn
            .execute(
                "INSERT INTO staff_users (id, full_name, email, role, created_at, updated_at)
                 VALUES (?, ?, ?, ?, ?, ?)
                 ON CONFLICT(id) DO UPDATE SET
                     full_name = excluded.full_name,
                     email = excluded.email,
                     role = excluded.role,
                     updated_at = excluded.updated_at",
                params![
                    user.id.as_str(),
                    user.full_name.as_str(),
                    user.email.as_str(),
                    user.role.as_str(),
                    user.created_at,
                    user.updated_at
                ],
            )
            .await?;
        Ok(created)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Database;
    use pretty_assertions::assert_eq;

    fn sample_booking(id: &str) -> Booking {
        Booking {
            id: id.to_string(),
            title: "Wedding shoot".to_string(),
            category: "wedding".to_string(),
            client_name: "Alice".to_string(),
            total_amount: 150_000,
            currency: "USD".to_string(),
            start_at: 1_700_000_000_000,
            end_at: 1_700_003_600_000,
            last_editor_rank: Some("MANAGER".to_string()),
            updated_by_name: Some("Grace".to_string()),
            created_at: 1_699_000_000_000,
            updated_at: 1_699_000_000_000,
            is_deleted: false,
        }
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_create_and_get() {
        let db = Database::open_in_memory().await.unwrap();
        let repo = LibSqlBookingRepository::new(db.connection());

        let booking = sample_booking("b1");
        repo.create(&booking).await.unwrap();

        let fetched = repo.get("b1").await.unwrap().unwrap();
        assert_eq!(fetched, booking);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_update() {
        let db = Database::open_in_memory().await.unwrap();
        let repo = LibSqlBookingRepository::new(db.connection());

        let mut booking = sample_booking("b1");
        repo.create(&booking).await.unwrap();

        booking.title = "Rescheduled wedding shoot".to_string();
        booking.updated_at += 1_000;
        repo.update(&booking).await.unwrap();

        let fetched = repo.get("b1").await.unwrap().unwrap();
        assert_eq!(fetched.title, "Rescheduled wedding shoot");
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_update_missing_row_is_not_found() {
        let db = Database::open_in_memory().await.unwrap();
        let repo = LibSqlBookingRepository::new(db.connection());

        let booking = sample_booking("ghost");
        assert!(matches!(
            repo.update(&booking).await,
            Err(Error::NotFound(_))
        ));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_soft_delete() {
        let db = Database::open_in_memory().await.unwrap();
        let repo = LibSqlBookingRepository::new(db.connection());

        repo.create(&sample_booking("b1")).await.unwrap();
        repo.soft_delete("b1").await.unwrap();

        // Hidden from reads, but the row still exists
        assert!(repo.get("b1").await.unwrap().is_none());
        assert!(repo.exists("b1").await.unwrap());

        // Deleting an unknown id is a no-op
        repo.soft_delete("ghost").await.unwrap();
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_user_upsert() {
        let db = Database::open_in_memory().await.unwrap();
        let repo = LibSqlUserRepository::new(db.connection());

        let mut user = StaffUser {
            id: "u1".to_string(),
            full_name: "Grace".to_string(),
            email: "grace@example.com".to_string(),
            role: "MANAGER".to_string(),
            created_at: 0,
            updated_at: 0,
        };

        assert!(repo.upsert(&user).await.unwrap());

        user.full_name = "Grace H.".to_string();
        user.updated_at = 1;
        assert!(!repo.upsert(&user).await.unwrap());

        let fetched = repo.get("u1").await.unwrap().unwrap();
        assert_eq!(fetched.full_name, "Grace H.");
    }
}
