//! Audit event storage trait and backend implementations
//!
//! The `AuditStorage` trait defines the interface for persisting audit events.
//! The in-memory backend enforces immutability at the application level: it
//! exposes no update/delete surface, only `append`.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use super::event::AuditEvent;
use crate::error::Error;

mod memory;

pub use memory::InMemoryAuditStorage;

/// Trait for audit event persistence backends
///
/// Implementations MUST enforce append-only semantics to prevent tampering.
#[async_trait]
pub trait AuditStorage: Send + Sync {
    /// Append a sealed event to storage
    ///
    /// The event must have `hash`, `previous_hash`, and `sequence` already set
    /// by `AuditChain::seal()`.
    async fn append(&self, event: &AuditEvent) -> Result<(), Error>;

    /// Get the most recent event (for chain resumption on startup)
    async fn latest(&self) -> Result<Option<AuditEvent>, Error>;

    /// Query events within a time range
    async fn query_range(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<AuditEvent>, Error>;

    /// Query up to `limit` events with a timestamp strictly before `before`, oldest first
    ///
    /// Used by retention cleanup to find candidates for archival/purge.
    async fn query_before(&self, before: DateTime<Utc>, limit: usize) -> Result<Vec<AuditEvent>, Error>;

    /// Permanently remove every event with a timestamp strictly before `before`
    ///
    /// Returns the number of events purged.
    async fn purge_before(&self, before: DateTime<Utc>) -> Result<u64, Error>;

    /// Verify chain integrity from a given sequence number
    ///
    /// Returns `Ok(None)` if the chain is intact, or `Ok(Some(sequence))` with
    /// the first broken sequence number.
    async fn verify_chain(&self, from_sequence: u64) -> Result<Option<u64>, Error>;
}
