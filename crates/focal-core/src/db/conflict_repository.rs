//! Parked conflict draft repository

use crate::error::Result;
use crate::models::{SyncConflict, RESOLUTION_DRAFT};
use crate::util::unix_timestamp_ms;
use libsql::{params, Connection};
use serde_json::Value;

/// Trait for conflict draft storage operations (async)
#[allow(async_fn_in_trait)]
pub trait ConflictRepository {
    /// Park a losing local payload as a draft awaiting manual review.
    /// Returns the new conflict row id.
    async fn park_draft(
        &self,
        booking_id: &str,
        local_payload: &Value,
        local_editor: &str,
        remote_editor: &str,
    ) -> Result<i64>;

    /// Drafts awaiting review, newest first
    async fn list_drafts(&self) -> Result<Vec<SyncConflict>>;
}

/// libSQL implementation of `ConflictRepository`
pub struct LibSqlConflictRepository<'a> {
    conn: &'a Connection,
}

impl<'a> LibSqlConflictRepository<'a> {
    /// Create a new repository with the given connection
    pub const fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }
}

impl ConflictRepository for LibSqlConflictRepository<'_> {
    async fn park_draft(
        &self,
        booking_id: &str,
        local_payload: &Value,
        local_editor: &str,
        remote_editor: &str,
    ) -> Result<i64> {
        let payload = serde_json::to_string(local_payload)?;
        self.conn
            .execute(
                "INSERT INTO sync_conflicts
                     (booking_id, local_payload, resolution, local_editor, remote_editor, created_at)
                 VALUES (?, ?, ?, ?, ?, ?)",
                params![
                    booking_id,
                    payload,
                    RESOLUTION_DRAFT,
                    local_editor,
                    remote_editor,
                    unix_timestamp_ms()
                ],
            )
            .await?;

        Ok(self.conn.last_insert_rowid())
    }

    async fn list_drafts(&self) -> Result<Vec<SyncConflict>> {
        let mut rows = self
            .conn
            .query(
                "SELECT id, booking_id, local_payload, resolution, local_editor, remote_editor, created_at
                 FROM sync_conflicts WHERE resolution = ? ORDER BY created_at DESC",
                params![RESOLUTION_DRAFT],
            )
            .await?;

        let mut drafts = Vec::new();
        while let Some(row) = rows.next().await? {
            let payload: String = row.get(2)?;
            drafts.push(SyncConflict {
                id: row.get(0)?,
                booking_id: row.get(1)?,
                local_payload: serde_json::from_str(&payload)?,
                resolution: row.get(3)?,
                local_editor: row.get(4)?,
                remote_editor: row.get(5)?,
                created_at: row.get(6)?,
            });
        }
        Ok(drafts)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Database;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[tokio::test(flavor = "multi_thread")]
    async fn test_park_and_list_drafts() {
        let db = Database::open_in_memory().await.unwrap();
        let repo = LibSqlConflictRepository::new(db.connection());

        let payload = json!({"id": "b1", "title": "Reception edit"});
        let id = repo
            .park_draft("b1", &payload, "Rita", "Grace")
            .await
            .unwrap();
        assert!(id > 0);

        let drafts = repo.list_drafts().await.unwrap();
        assert_eq!(drafts.len(), 1);
        assert_eq!(drafts[0].booking_id, "b1");
        assert_eq!(drafts[0].resolution, RESOLUTION_DRAFT);
        assert_eq!(drafts[0].local_payload, payload);
        assert_eq!(drafts[0].local_editor, "Rita");
        assert_eq!(drafts[0].remote_editor, "Grace");
    }
}
