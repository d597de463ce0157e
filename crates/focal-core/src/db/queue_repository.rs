//! Durable sync queue repository
//!
//! Every local mutation is written here unconditionally (online or offline)
//! and removed only on confirmed remote success or an explicit failed
//! marking, so nothing is lost across a process crash.

use crate::error::{Error, Result};
use crate::models::{QueueItem, QueueItemId, QueueItemStatus, SyncAction};
use crate::util::{is_canonical_uuid, unix_timestamp_ms};
use libsql::{params, Connection};
use serde_json::Value;
use std::str::FromStr;

/// Trait for durable sync queue operations (async)
#[allow(async_fn_in_trait)]
pub trait SyncQueueRepository {
    /// Append a pending mutation. Never fails the caller: a mutation that
    /// cannot be queued must not block the local-first write that triggered
    /// it, so persistence errors are logged and swallowed.
    async fn enqueue(&self, action: SyncAction, entity: &str, data: Value) -> Option<QueueItemId>;

    /// All pending items in insertion order, non-destructively.
    /// Returns an empty vec (never an error) when the store is unavailable.
    async fn peek_all(&self) -> Vec<QueueItem>;

    /// Remove a confirmed-successful item. Idempotent.
    async fn dequeue(&self, id: &QueueItemId) -> Result<()>;

    /// Persist a bumped retry counter for a still-pending item
    async fn update_retry_count(&self, id: &QueueItemId, count: u32) -> Result<()>;

    /// Transition an item to failed; retained for audit, excluded from drains
    async fn mark_as_failed(&self, id: &QueueItemId) -> Result<()>;

    /// Remove pending attendance items whose staff reference can never sync
    /// (non-canonical UUID). One-time hygiene hook, returns removed count.
    async fn purge_invalid_attendance_items(&self) -> Result<u64>;

    /// Reset failed items for the given entity tags back to pending with
    /// retry count 0. Returns the number of revived items.
    async fn revive_failed_by_entities(&self, entities: &[&str]) -> Result<u64>;

    /// Number of items awaiting a drain pass
    async fn pending_count(&self) -> Result<u64>;

    /// Failed items retained for operator review, newest first
    async fn failed_items(&self) -> Result<Vec<QueueItem>>;
}

/// libSQL implementation of `SyncQueueRepository`
pub struct LibSqlSyncQueueRepository<'a> {
    conn: &'a Connection,
}

impl<'a> LibSqlSyncQueueRepository<'a> {
    /// Create a new repository with the given connection
    pub const fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    async fn try_enqueue(
        &self,
        action: SyncAction,
        entity: &str,
        data: &Value,
    ) -> Result<QueueItemId> {
        let id = QueueItemId::new();
        let payload = serde_json::to_string(data)?;

        self.conn
            .execute(
                "INSERT INTO sync_queue (id, entity, action, data, retry_count, status, created_at)
                 VALUES (?, ?, ?, ?, 0, 'pending', ?)",
                params![
                    id.to_string(),
                    entity,
                    action.as_str(),
                    payload,
                    unix_timestamp_ms()
                ],
            )
            .await?;

        Ok(id)
    }

    /// Parse a queue item from a database row
    fn parse_item(row: &libsql::Row) -> Result<QueueItem> {
        let id: String = row.get(0)?;
        let entity: String = row.get(1)?;
        let action: String = row.get(2)?;
        let data: String = row.get(3)?;
        let retry_count: i64 = row.get(4)?;
        let status: String = row.get(5)?;
        let created_at: i64 = row.get(6)?;

        Ok(QueueItem {
            id: QueueItemId::from_str(&id)
                .map_err(|e| Error::Database(format!("bad queue item id {id}: {e}")))?,
            entity,
            action: SyncAction::from_str(&action).map_err(Error::Database)?,
            data: serde_json::from_str(&data)?,
            retry_count: u32::try_from(retry_count).unwrap_or(0),
            status: QueueItemStatus::from_str(&status).map_err(Error::Database)?,
            created_at,
        })
    }

    async fn query_items(&self, sql: &str) -> Result<Vec<QueueItem>> {
        let mut rows = self.conn.query(sql, ()).await?;
        let mut items = Vec::new();
        while let Some(row) = rows.next().await? {
            items.push(Self::parse_item(&row)?);
        }
        Ok(items)
    }
}

impl SyncQueueRepository for LibSqlSyncQueueRepository<'_> {
    async fn enqueue(&self, action: SyncAction, entity: &str, data: Value) -> Option<QueueItemId> {
        match self.try_enqueue(action, entity, &data).await {
            Ok(id) => {
                tracing::debug!(%id, entity, %action, "Enqueued sync item");
                Some(id)
            }
            Err(e) => {
                // Accepted risk: the local write already landed, losing the
                // queue row is better than failing the user action.
                tracing::error!(entity, %action, error = %e, "Failed to enqueue sync item");
                None
            }
        }
    }

    async fn peek_all(&self) -> Vec<QueueItem> {
        match self
            .query_items(
                "SELECT id, entity, action, data, retry_count, status, created_at
                 FROM sync_queue WHERE status = 'pending' ORDER BY seq ASC",
            )
            .await
        {
            Ok(items) => items,
            Err(e) => {
                tracing::error!(error = %e, "Failed to read sync queue, returning empty");
                Vec::new()
            }
        }
    }

    async fn dequeue(&self, id: &QueueItemId) -> Result<()> {
        // Idempotent: dequeuing a missing id is a no-op
        self.conn
            .execute("DELETE FROM sync_queue WHERE id = ?", params![id.to_string()])
            .await?;
        Ok(())
    }

    async fn update_retry_count(&self, id: &QueueItemId, count: u32) -> Result<()> {
        self.conn
            .execute(
                "UPDATE sync_queue SET retry_count = ? WHERE id = ? AND status = 'pending'",
                params![i64::from(count), id.to_string()],
            )
            .await?;
        Ok(())
    }

    async fn mark_as_failed(&self, id: &QueueItemId) -> Result<()> {
        self.conn
            .execute(
                "UPDATE sync_queue SET status = 'failed' WHERE id = ?",
                params![id.to_string()],
            )
            .await?;
        Ok(())
    }

    async fn purge_invalid_attendance_items(&self) -> Result<u64> {
        let items = self
            .query_items(
                "SELECT id, entity, action, data, retry_count, status, created_at
                 FROM sync_queue WHERE entity = 'attendance' ORDER BY seq ASC",
            )
            .await?;

        let mut removed = 0;
        for item in items {
            let staff_id = item.data.get("staff_id").and_then(Value::as_str);
            let valid = staff_id.is_some_and(is_canonical_uuid);
            if !valid {
                self.conn
                    .execute(
                        "DELETE FROM sync_queue WHERE id = ?",
                        params![item.id.to_string()],
                    )
                    .await?;
                removed += 1;
            }
        }

        if removed > 0 {
            tracing::info!(removed, "Purged attendance items with non-canonical staff ids");
        }
        Ok(removed)
    }

    async fn revive_failed_by_entities(&self, entities: &[&str]) -> Result<u64> {
        if entities.is_empty() {
            return Ok(0);
        }

        let placeholders = vec!["?"; entities.len()].join(", ");
        let sql = format!(
            "UPDATE sync_queue SET status = 'pending', retry_count = 0
             WHERE status = 'failed' AND entity IN ({placeholders})"
        );
        let args: Vec<libsql::Value> = entities
            .iter()
            .map(|e| libsql::Value::from((*e).to_string()))
            .collect();

        let revived = self.conn.execute(&sql, args).await?;
        if revived > 0 {
            tracing::info!(revived, ?entities, "Revived failed sync items");
        }
        Ok(revived)
    }

    async fn pending_count(&self) -> Result<u64> {
        let mut rows = self
            .conn
            .query("SELECT COUNT(*) FROM sync_queue WHERE status = 'pending'", ())
            .await?;
        let count: i64 = if let Some(row) = rows.next().await? {
            row.get(0)?
        } else {
            0
        };
        Ok(u64::try_from(count).unwrap_or(0))
    }

    async fn failed_items(&self) -> Result<Vec<QueueItem>> {
        self.query_items(
            "SELECT id, entity, action, data, retry_count, status, created_at
             FROM sync_queue WHERE status = 'failed' ORDER BY seq DESC",
        )
        .await
    }
}
