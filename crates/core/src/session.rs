//! Session store seam — durable credential/session persistence lives in an
//! external collaborator; the pool only needs to enumerate known accounts.

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::error::RelayResult;

/// Enumerates previously-authenticated account ids for pool restoration.
#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn list_account_ids(&self) -> RelayResult<Vec<String>>;
}

/// In-memory store for tests and single-process bring-up.
#[derive(Default)]
pub struct MemorySessionStore {
    ids: Mutex<Vec<String>>,
}

impl MemorySessionStore {
    pub fn new(ids: Vec<String>) -> Self {
        Self { ids: Mutex::new(ids) }
    }

    pub fn add(&self, id: impl Into<String>) {
        self.ids.lock().push(id.into());
    }
}

#[async_trait]
impl SessionStore for MemorySessionStore {
    async fn list_account_ids(&self) -> RelayResult<Vec<String>> {
        Ok(self.ids.lock().clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_memory_store_roundtrip() {
        let store = MemorySessionStore::new(vec!["chip-1".into()]);
        store.add("chip-2");
        let ids = store.list_account_ids().await.unwrap();
        assert_eq!(ids, vec!["chip-1".to_string(), "chip-2".to_string()]);
    }
}
