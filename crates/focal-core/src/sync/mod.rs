//! Bidirectional offline-first sync engine
//!
//! Local mutations are recorded in a durable queue and drained to the
//! remote when the network and session allow; remote changes stream back
//! through a change feed and are applied to the local store. Conflicting
//! booking edits are settled by editor authority.

pub mod circuit_breaker;
pub mod conflict;
pub mod events;
pub mod manager;
pub mod mapper;
pub mod remote;
pub mod retry;

pub use circuit_breaker::{BreakerConfig, BreakerRegistry, CircuitBreaker, CircuitState};
pub use conflict::ConflictResolver;
pub use events::{ListenerId, SyncEvent, SyncEventHub};
pub use manager::{AuthEvent, SyncManager};
pub use remote::{ChangeEvent, ChangeKind, RemoteBookingMeta, RemoteStore, SyncCallOutcome};
pub use retry::{process_batch_with_retry, with_retry, RetryConfig};
