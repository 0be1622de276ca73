//! In-memory audit storage backend
//!
//! Keeps the sealed event trail in a `Vec` behind a `RwLock`, in append order.
//! Suitable for single-node deployments and as the default when no durable
//! sink is configured; it does not survive a process restart.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::RwLock;

use super::AuditStorage;
use crate::audit::event::AuditEvent;
use crate::error::Error;

#[derive(Default)]
pub struct InMemoryAuditStorage {
    events: RwLock<Vec<AuditEvent>>,
}

impl InMemoryAuditStorage {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, Vec<AuditEvent>> {
        self.events.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, Vec<AuditEvent>> {
        self.events.write().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[async_trait]
impl AuditStorage for InMemoryAuditStorage {
    async fn append(&self, event: &AuditEvent) -> Result<(), Error> {
        self.write().push(event.clone());
        Ok(())
    }

    async fn latest(&self) -> Result<Option<AuditEvent>, Error> {
        Ok(self.read().last().cloned())
    }

    async fn query_range(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<AuditEvent>, Error> {
        Ok(self
            .read()
            .iter()
            .filter(|e| e.timestamp >= from && e.timestamp <= to)
            .take(limit)
            .cloned()
            .collect())
    }

    async fn query_before(&self, before: DateTime<Utc>, limit: usize) -> Result<Vec<AuditEvent>, Error> {
        Ok(self
            .read()
            .iter()
            .filter(|e| e.timestamp < before)
            .take(limit)
            .cloned()
            .collect())
    }

    async fn purge_before(&self, before: DateTime<Utc>) -> Result<u64, Error> {
        let mut events = self.write();
        let before_len = events.len();
        events.retain(|e| e.timestamp >= before);
        Ok((before_len - events.len()) as u64)
    }

    async fn verify_chain(&self, from_sequence: u64) -> Result<Option<u64>, Error> {
        let events = self.read();
        let mut previous_hash: Option<String> = None;
        for event in events.iter().filter(|e| e.sequence >= from_sequence) {
            if event.previous_hash != previous_hash {
                return Ok(Some(event.sequence));
            }
            previous_hash = event.hash.clone();
        }
        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::chain::AuditChain;
    use crate::audit::event::{AuditEventKind, AuditSeverity};

    fn event(service: &str) -> AuditEvent {
        AuditEvent::new(AuditEventKind::HttpRequest, AuditSeverity::Informational, service.to_string())
    }

    #[tokio::test]
    async fn append_then_latest_roundtrips() {
        let storage = InMemoryAuditStorage::new();
        let mut chain = AuditChain::new("gateway".to_string());
        let sealed = chain.seal(event("gateway"));
        storage.append(&sealed).await.unwrap();

        let latest = storage.latest().await.unwrap().expect("one event");
        assert_eq!(latest.sequence, sealed.sequence);
        assert_eq!(latest.hash, sealed.hash);
    }

    #[tokio::test]
    async fn verify_chain_detects_tamper() {
        let storage = InMemoryAuditStorage::new();
        let mut chain = AuditChain::new("gateway".to_string());
        for _ in 0..3 {
            let sealed = chain.seal(event("gateway"));
            storage.append(&sealed).await.unwrap();
        }
        assert_eq!(storage.verify_chain(0).await.unwrap(), None);

        // Corrupt the middle event's previous_hash to simulate tampering.
        {
            let mut events = storage.write();
            events[1].previous_hash = Some("tampered".to_string());
        }
        assert_eq!(storage.verify_chain(0).await.unwrap(), Some(1));
    }

    #[tokio::test]
    async fn purge_before_removes_only_older_events() {
        let storage = InMemoryAuditStorage::new();
        let mut chain = AuditChain::new("gateway".to_string());
        let mut old = chain.seal(event("gateway"));
        old.timestamp = Utc::now() - chrono::Duration::days(30);
        storage.append(&old).await.unwrap();
        let recent = chain.seal(event("gateway"));
        storage.append(&recent).await.unwrap();

        let cutoff = Utc::now() - chrono::Duration::days(1);
        let purged = storage.purge_before(cutoff).await.unwrap();
        assert_eq!(purged, 1);
        assert_eq!(storage.read().len(), 1);
    }
}
