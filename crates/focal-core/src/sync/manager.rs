//! Sync orchestration
//!
//! Owns network-state and session-lifecycle triggers, drains the durable
//! queue into the remote store, applies the remote change feed to the local
//! store, and emits typed events so observers react without polling.
//!
//! Any number of trigger sources (network-online, auth events, deferred
//! timers, explicit pushes) may fire concurrently; they are serialized
//! through one in-flight guard and at most one scheduled retry timer.

use crate::config::SyncSettings;
use crate::db::{
    BookingRepository, Database, LibSqlBookingRepository, LibSqlSyncQueueRepository,
    LibSqlUserRepository, SyncQueueRepository, UserRepository,
};
use crate::error::{Error, Result};
use crate::models::{QueueItem, SyncAction};
use crate::sync::circuit_breaker::BreakerRegistry;
use crate::sync::conflict::ConflictResolver;
use crate::sync::events::{ListenerId, SyncEvent, SyncEventHub};
use crate::sync::mapper;
use crate::sync::remote::{ChangeEvent, ChangeKind, RemoteStore, SyncCallOutcome};
use crate::sync::retry::process_batch_with_retry;
use crate::state::SyncState;
use crate::util::compact_text;
use serde_json::Value;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, Weak};
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;

/// Auth-state transitions consumed from the host session lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthEvent {
    SignedIn,
    TokenRefreshed,
    InitialSession,
    SignedOut,
}

/// Entity tags whose failed items are revived at startup, after the
/// queue-format compatibility fix shipped
const REVIVABLE_ENTITIES: &[&str] = &["session", "session_image"];

/// Tables watched on the remote change feed
const WATCHED_TABLES: &[&str] = &["bookings", "staff_users"];

/// Breaker name for the remote database dependency
const REMOTE_BREAKER: &str = "remote-db";

/// Orchestrates bidirectional sync between the local store and the remote
pub struct SyncManager {
    self_ref: Weak<Self>,
    db: Arc<Database>,
    remote: Arc<dyn RemoteStore>,
    settings: SyncSettings,
    events: SyncEventHub,
    resolver: ConflictResolver,
    breakers: BreakerRegistry,
    network_online: watch::Receiver<bool>,
    state: Mutex<SyncState>,
    sync_in_progress: AtomicBool,
    initialized: AtomicBool,
    retry_task: Mutex<Option<JoinHandle<()>>>,
    feed_task: Mutex<Option<JoinHandle<()>>>,
    listener_tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl SyncManager {
    /// Create a manager over the given local database and remote store.
    /// `network_online` carries the host's online/offline signal.
    pub fn new(
        db: Arc<Database>,
        remote: Arc<dyn RemoteStore>,
        settings: SyncSettings,
        network_online: watch::Receiver<bool>,
    ) -> Arc<Self> {
        Arc::new_cyclic(|self_ref| Self {
            self_ref: self_ref.clone(),
            resolver: ConflictResolver::new(Arc::clone(&remote), Arc::clone(&db)),
            db,
            remote,
            settings,
            events: SyncEventHub::new(),
            breakers: BreakerRegistry::new(),
            network_online,
            state: Mutex::new(SyncState::Offline),
            sync_in_progress: AtomicBool::new(false),
            initialized: AtomicBool::new(false),
            retry_task: Mutex::new(None),
            feed_task: Mutex::new(None),
            listener_tasks: Mutex::new(Vec::new()),
        })
    }

    /// One-time initialization: queue maintenance plus network and auth
    /// listeners. Safe to call repeatedly; listeners attach only once.
    pub async fn init(&self, auth_events: broadcast::Receiver<AuthEvent>) -> Result<()> {
        if self.initialized.swap(true, Ordering::SeqCst) {
            tracing::debug!("Sync manager already initialized");
            return Ok(());
        }

        let queue = LibSqlSyncQueueRepository::new(self.db.connection());
        let purged = queue.purge_invalid_attendance_items().await?;
        let revived = queue.revive_failed_by_entities(REVIVABLE_ENTITIES).await?;
        tracing::info!(purged, revived, "Sync queue maintenance complete");

        self.spawn_network_listener();
        self.spawn_auth_listener(auth_events);
        Ok(())
    }

    /// Subscribe to sync events; returns a handle for `off_sync`
    pub fn on_sync(&self, listener: impl Fn(&SyncEvent) + Send + Sync + 'static) -> ListenerId {
        self.events.subscribe(listener)
    }

    /// Unsubscribe a previously registered listener
    pub fn off_sync(&self, id: ListenerId) -> bool {
        self.events.unsubscribe(id)
    }

    /// Record a local mutation in the durable queue (always, even offline)
    /// and opportunistically drain while online.
    pub async fn enqueue_mutation(&self, action: SyncAction, entity: &str, data: Value) {
        let queue = LibSqlSyncQueueRepository::new(self.db.connection());
        queue.enqueue(action, entity, data).await;

        if *self.network_online.borrow() {
            if let Err(e) = self.push_changes().await {
                tracing::error!(error = %e, "Opportunistic push after enqueue failed");
            }
        }
    }

    /// Current engine state for status indicators
    pub fn sync_state(&self) -> SyncState {
        *self.state.lock().expect("state lock poisoned")
    }

    fn set_state(&self, next: SyncState) {
        *self.state.lock().expect("state lock poisoned") = next;
    }

    /// Failed items retained for operator review
    pub async fn failed_items(&self) -> Result<Vec<QueueItem>> {
        LibSqlSyncQueueRepository::new(self.db.connection())
            .failed_items()
            .await
    }

    /// Drain pending queue items to the remote. No-op while offline; safe
    /// to call redundantly (a concurrent call defers to one scheduled retry).
    pub async fn push_changes(&self) -> Result<()> {
        if !*self.network_online.borrow() {
            tracing::debug!("Network offline, skipping push");
            self.set_state(SyncState::Offline);
            return Ok(());
        }
        self.process_sync_queue().await
    }

    /// Stop background tasks. The queue and local store are untouched.
    pub fn shutdown(&self) {
        for handle in self.listener_tasks.lock().expect("task lock poisoned").drain(..) {
            handle.abort();
        }
        if let Some(handle) = self.feed_task.lock().expect("feed lock poisoned").take() {
            handle.abort();
        }
        if let Some(handle) = self.retry_task.lock().expect("retry lock poisoned").take() {
            handle.abort();
        }
        tracing::debug!("Sync manager shut down");
    }

    fn spawn_network_listener(&self) {
        let Some(manager) = self.self_ref.upgrade() else {
            return;
        };
        let mut rx = self.network_online.clone();
        let handle = tokio::spawn(async move {
            while rx.changed().await.is_ok() {
                let online = *rx.borrow_and_update();
                if online {
                    tracing::info!("Network online, pushing pending changes");
                    if let Err(e) = manager.push_changes().await {
                        tracing::error!(error = %e, "Push on network-online failed");
                    }
                } else {
                    tracing::info!("Network offline");
                }
            }
        });
        self.listener_tasks
            .lock()
            .expect("task lock poisoned")
            .push(handle);
    }

    fn spawn_auth_listener(&self, mut rx: broadcast::Receiver<AuthEvent>) {
        let Some(manager) = self.self_ref.upgrade() else {
            return;
        };
        let handle = tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(AuthEvent::SignedOut) => {
                        tracing::info!("Session ended, pausing cloud sync");
                        manager.pause();
                    }
                    Ok(event) => {
                        tracing::debug!(?event, "Session active, resuming cloud sync");
                        manager.activate().await;
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        tracing::warn!(skipped, "Auth event stream lagged");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        });
        self.listener_tasks
            .lock()
            .expect("task lock poisoned")
            .push(handle);
    }

    /// Session became active: probe connectivity, drain, subscribe to the feed
    async fn activate(&self) {
        if let Err(e) = self.remote.test_connectivity().await {
            tracing::warn!(error = %e, "Connectivity test failed, deferring sync");
            self.schedule_drain_retry();
            return;
        }
        if let Err(e) = self.push_changes().await {
            tracing::error!(error = %e, "Push on session-active failed");
        }
        if let Err(e) = self.start_change_feed().await {
            tracing::error!(error = %e, "Change feed subscription failed");
        }
    }

    /// Session ended: unsubscribe the change feed, leave the queue alone
    fn pause(&self) {
        if let Some(handle) = self.feed_task.lock().expect("feed lock poisoned").take() {
            handle.abort();
            tracing::info!("Unsubscribed from remote change feed");
        }
    }

    async fn process_sync_queue(&self) -> Result<()> {
        // Single-flight: a redundant concurrent call defers to one retry
        if self
            .sync_in_progress
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            tracing::debug!("Drain already in flight, scheduling deferred retry");
            self.schedule_drain_retry();
            return Ok(());
        }

        self.set_state(SyncState::Syncing);
        let result = self.drain_once().await;
        self.sync_in_progress.store(false, Ordering::SeqCst);

        match result {
            Ok((processed, failed)) => {
                if failed > 0 {
                    tracing::warn!(processed, failed, "Sync batch completed with failures");
                } else if processed > 0 {
                    tracing::info!(processed, "Sync batch completed");
                }
                self.set_state(if failed > 0 {
                    SyncState::Error
                } else {
                    SyncState::Synced
                });
                self.events.emit(&SyncEvent::SyncComplete { processed, failed });

                let queue = LibSqlSyncQueueRepository::new(self.db.connection());
                if queue.pending_count().await.unwrap_or(0) > 0 {
                    self.schedule_drain_retry();
                }
                Ok(())
            }
            Err(e) => {
                // The queue storage itself misbehaved. Keep the engine alive
                // and try again later instead of entering a broken state.
                tracing::error!(error = %e, "Critical sync error");
                self.set_state(SyncState::Error);
                self.schedule_drain_retry();
                Err(e)
            }
        }
    }

    /// One full drain pass over a snapshot of pending items
    async fn drain_once(&self) -> Result<(usize, usize)> {
        let queue = LibSqlSyncQueueRepository::new(self.db.connection());
        let items = queue.peek_all().await;
        if items.is_empty() {
            return Ok((0, 0));
        }
        tracing::debug!(count = items.len(), "Draining sync queue");

        // Items are independent by contract: outcomes are keyed per entity
        // id, never per queue position, so batches may run concurrently
        let results = process_batch_with_retry(
            "sync-queue-drain",
            items.clone(),
            self.settings.batch_size,
            &self.settings.retry,
            |item| async move { self.sync_item(item).await },
            |done, total| tracing::debug!(done, total, "Drain progress"),
        )
        .await;

        let mut processed = 0;
        let mut failed = 0;
        for (item, result) in items.iter().zip(results) {
            match result {
                Ok(()) => {
                    queue.dequeue(&item.id).await?;
                    processed += 1;
                }
                Err(e) if e.is_permanent_sync_error() => {
                    tracing::warn!(
                        id = %item.id,
                        entity = %item.entity,
                        error = %e,
                        "Permanent sync error, marking failed"
                    );
                    queue.mark_as_failed(&item.id).await?;
                    failed += 1;
                }
                Err(e) => {
                    let attempts = item.retry_count + 1;
                    queue.update_retry_count(&item.id, attempts).await?;
                    if attempts >= self.settings.max_sync_retries {
                        tracing::warn!(
                            id = %item.id,
                            attempts,
                            error = %e,
                            "Retries exhausted, marking failed"
                        );
                        queue.mark_as_failed(&item.id).await?;
                        failed += 1;
                    } else {
                        tracing::debug!(
                            id = %item.id,
                            attempts,
                            error = %e,
                            "Transient failure, leaving pending for next drain"
                        );
                    }
                }
            }
        }

        Ok((processed, failed))
    }

    /// Dispatch one queue item by (entity, action)
    async fn sync_item(&self, item: QueueItem) -> Result<()> {
        let data = mapper::sanitize_for_remote(&item.entity, &item.data);

        match (item.entity.as_str(), item.action) {
            ("booking", SyncAction::Create) => {
                let outcome = self.remote_call("create", "booking", &data).await?;
                if outcome.success {
                    return Ok(());
                }
                if outcome.is_duplicate_key() {
                    tracing::debug!(id = %item.id, "Duplicate key on create, resolving conflict");
                    return self.resolve_conflict(&data).await;
                }
                Err(outcome_error(outcome, "booking create rejected"))
            }
            // An update is inherently a potential conflict
            ("booking", SyncAction::Update) => self.resolve_conflict(&data).await,
            ("booking", SyncAction::Delete) => {
                let outcome = self.remote_call("delete", "booking", &data).await?;
                expect_success(outcome, "booking delete rejected")
            }
            (entity, action) => {
                let outcome = self.remote_call(action.as_str(), entity, &data).await?;
                expect_success(outcome, "sync call rejected")
            }
        }
    }

    async fn resolve_conflict(&self, data: &Value) -> Result<()> {
        if self.resolver.resolve_booking_conflict(data).await? {
            Ok(())
        } else {
            Err(Error::Remote("forced upsert rejected by remote".to_string()))
        }
    }

    /// Single remote call behind the per-dependency circuit breaker
    async fn remote_call(
        &self,
        action: &str,
        entity: &str,
        payload: &Value,
    ) -> Result<SyncCallOutcome> {
        let breaker = self
            .breakers
            .get_or_create(REMOTE_BREAKER, &self.settings.breaker);
        breaker
            .execute(|| self.remote.call_sync_function(action, entity, payload))
            .await
    }

    /// Schedule exactly one deduplicated drain retry, replacing (and
    /// canceling) any previously scheduled timer to prevent retry storms
    fn schedule_drain_retry(&self) {
        let Some(manager) = self.self_ref.upgrade() else {
            return;
        };
        let delay = self.settings.drain_retry_delay;
        let mut slot = self.retry_task.lock().expect("retry lock poisoned");
        if let Some(previous) = slot.take() {
            previous.abort();
        }
        *slot = Some(tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if let Err(e) = manager.push_changes().await {
                tracing::error!(error = %e, "Deferred sync retry failed");
            }
        }));
    }

    /// Subscribe to the remote change feed and apply rows as they arrive
    async fn start_change_feed(&self) -> Result<()> {
        let Some(manager) = self.self_ref.upgrade() else {
            return Ok(());
        };
        let mut rx = self.remote.subscribe_changes(WATCHED_TABLES).await?;
        let handle = tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                if let Err(e) = manager.apply_remote_change(event).await {
                    tracing::error!(error = %e, "Failed to apply remote change");
                }
            }
            tracing::debug!("Remote change feed closed");
        });

        if let Some(previous) = self
            .feed_task
            .lock()
            .expect("feed lock poisoned")
            .replace(handle)
        {
            previous.abort();
        }
        tracing::info!(tables = ?WATCHED_TABLES, "Subscribed to remote change feed");
        Ok(())
    }

    async fn apply_remote_change(&self, event: ChangeEvent) -> Result<()> {
        match event.table.as_str() {
            "bookings" => self.apply_booking_change(&event).await,
            "staff_users" => self.apply_user_change(&event).await,
            other => {
                tracing::debug!(table = other, "Ignoring change for unwatched table");
                Ok(())
            }
        }
    }

    async fn apply_booking_change(&self, event: &ChangeEvent) -> Result<()> {
        let repo = LibSqlBookingRepository::new(self.db.connection());
        match event.kind {
            ChangeKind::Insert | ChangeKind::Update => {
                let row = event.new_row.as_ref().ok_or_else(|| {
                    Error::InvalidInput("change event missing new row".to_string())
                })?;
                let booking = mapper::booking_from_remote(row)?;

                if booking.is_deleted {
                    repo.soft_delete(&booking.id).await?;
                    self.events
                        .emit(&SyncEvent::BookingDeleted { id: booking.id });
                } else if repo.exists(&booking.id).await? {
                    repo.update(&booking).await?;
                    self.events.emit(&SyncEvent::BookingUpdated(booking));
                } else {
                    repo.create(&booking).await?;
                    self.events.emit(&SyncEvent::BookingCreated(booking));
                }
            }
            ChangeKind::Delete => {
                let id = event
                    .old_row
                    .as_ref()
                    .and_then(|row| row.get("id"))
                    .and_then(Value::as_str)
                    .ok_or_else(|| {
                        Error::InvalidInput("delete event missing old row id".to_string())
                    })?;
                repo.soft_delete(id).await?;
                self.events
                    .emit(&SyncEvent::BookingDeleted { id: id.to_string() });
            }
        }
        Ok(())
    }

    async fn apply_user_change(&self, event: &ChangeEvent) -> Result<()> {
        match event.kind {
            ChangeKind::Insert | ChangeKind::Update => {
                let row = event.new_row.as_ref().ok_or_else(|| {
                    Error::InvalidInput("change event missing new row".to_string())
                })?;
                let user = mapper::user_from_remote(row)?;
                let repo = LibSqlUserRepository::new(self.db.connection());
                let created = repo.upsert(&user).await?;
                self.events.emit(&if created {
                    SyncEvent::UserCreated(user)
                } else {
                    SyncEvent::UserUpdated(user)
                });
            }
            ChangeKind::Delete => {
                tracing::debug!("User deletes are not applied locally");
            }
        }
        Ok(())
    }
}

fn expect_success(outcome: SyncCallOutcome, context: &str) -> Result<()> {
    if outcome.success {
        Ok(())
    } else {
        Err(outcome_error(outcome, context))
    }
}

fn outcome_error(outcome: SyncCallOutcome, context: &str) -> Error {
    // Server messages can carry whole failed statements; keep them short
    Error::Remote(
        outcome
            .error
            .map_or_else(|| context.to_string(), |e| compact_text(&e)),
    )
}
