use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::{
    creds::{CredentialRecord, CredentialStore},
    domain::SessionId,
    Result,
};

/// In-memory credential store.
///
/// Useful for development and tests. Data is lost on restart.
#[derive(Default)]
pub struct MemoryCredentialStore {
    records: RwLock<HashMap<SessionId, CredentialRecord>>,
}

impl MemoryCredentialStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CredentialStore for MemoryCredentialStore {
    async fn get(&self, session_id: &SessionId) -> Result<Option<CredentialRecord>> {
        Ok(self.records.read().await.get(session_id).cloned())
    }

    async fn put(&self, session_id: &SessionId, record: CredentialRecord) -> Result<()> {
        self.records
            .write()
            .await
            .insert(session_id.clone(), record);
        Ok(())
    }

    async fn delete(&self, session_id: &SessionId) -> Result<()> {
        self.records.write().await.remove(session_id);
        Ok(())
    }
}
