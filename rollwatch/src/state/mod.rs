//! Session state persistence.
//!
//! The engine is in-memory; this trait is the seam a durable store plugs
//! into later. The default implementation keeps blobs in process memory.

use crate::core::SessionId;
use crate::errors::Result;
use async_trait::async_trait;
use dashmap::DashMap;

/// Opaque per-session blob storage.
#[async_trait]
pub trait StateStore: Send + Sync {
    /// Stores (or replaces) the blob of one session.
    async fn save(&self, session: SessionId, blob: Vec<u8>) -> Result<()>;

    /// Loads the blob of one session, if present.
    async fn load(&self, session: SessionId) -> Result<Option<Vec<u8>>>;
}

/// In-memory [`StateStore`].
#[derive(Debug, Default)]
pub struct MemoryStateStore {
    blobs: DashMap<SessionId, Vec<u8>>,
}

impl MemoryStateStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored blobs.
    #[must_use]
    pub fn len(&self) -> usize {
        self.blobs.len()
    }

    /// True when nothing is stored.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.blobs.is_empty()
    }
}

#[async_trait]
impl StateStore for MemoryStateStore {
    async fn save(&self, session: SessionId, blob: Vec<u8>) -> Result<()> {
        self.blobs.insert(session, blob);
        Ok(())
    }

    async fn load(&self, session: SessionId) -> Result<Option<Vec<u8>>> {
        Ok(self.blobs.get(&session).map(|b| b.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{HeuristicKind, Network};

    #[tokio::test]
    async fn test_round_trip() {
        let store = MemoryStateStore::new();
        let session = SessionId::generate(Network::Layer1, HeuristicKind::ContractEvent);

        assert!(store.load(session).await.unwrap().is_none());

        store.save(session, b"snapshot".to_vec()).await.unwrap();
        assert_eq!(
            store.load(session).await.unwrap(),
            Some(b"snapshot".to_vec())
        );
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn test_save_replaces() {
        let store = MemoryStateStore::new();
        let session = SessionId::generate(Network::Layer1, HeuristicKind::ContractEvent);

        store.save(session, b"one".to_vec()).await.unwrap();
        store.save(session, b"two".to_vec()).await.unwrap();

        assert_eq!(store.load(session).await.unwrap(), Some(b"two".to_vec()));
        assert_eq!(store.len(), 1);
    }
}
