//! Credential persistence: the store port plus file and in-memory backends.

pub mod file;
pub mod memory;

use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::{domain::SessionId, Result};

/// Persisted authentication material for one session identity.
///
/// The blob is opaque to the core: long-term identity keys plus rotating
/// session keys, in whatever shape the transport emits them. We only stamp
/// when it was saved.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CredentialRecord {
    pub blob: serde_json::Value,
    pub saved_at: String,
}

impl CredentialRecord {
    pub fn new(blob: serde_json::Value) -> Self {
        Self {
            blob,
            saved_at: Utc::now().to_rfc3339(),
        }
    }
}

/// Durable credential storage keyed by session id.
///
/// Writes for a given session id are serialized by the backend; the
/// lifecycle controller is the only writer for a live session.
#[async_trait]
pub trait CredentialStore: Send + Sync {
    async fn get(&self, session_id: &SessionId) -> Result<Option<CredentialRecord>>;

    /// Overwrite the record for this session. Idempotent, safe to replay.
    async fn put(&self, session_id: &SessionId, record: CredentialRecord) -> Result<()>;

    /// Remove the record. Only explicit operator logout does this.
    async fn delete(&self, session_id: &SessionId) -> Result<()>;
}
