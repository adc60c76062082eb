use std::{
    collections::HashMap,
    path::{Path, PathBuf},
    sync::Arc,
};

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::{
    creds::{CredentialRecord, CredentialStore},
    domain::SessionId,
    Error, Result,
};

/// File-backed credential store: one `creds.json` per session under the
/// sessions directory, surviving process restarts.
pub struct FileCredentialStore {
    root: PathBuf,
    // Serializes writes per session id without blocking other sessions.
    locks: Mutex<HashMap<SessionId, Arc<Mutex<()>>>>,
}

impl FileCredentialStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            locks: Mutex::new(HashMap::new()),
        }
    }

    fn record_path(&self, session_id: &SessionId) -> PathBuf {
        self.root.join(&session_id.0).join("creds.json")
    }

    async fn lock_for(&self, session_id: &SessionId) -> Arc<Mutex<()>> {
        let mut map = self.locks.lock().await;
        map.entry(session_id.clone())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }
}

#[async_trait]
impl CredentialStore for FileCredentialStore {
    async fn get(&self, session_id: &SessionId) -> Result<Option<CredentialRecord>> {
        let lock = self.lock_for(session_id).await;
        let _guard = lock.lock().await;
        load_record(&self.record_path(session_id)).await
    }

    async fn put(&self, session_id: &SessionId, record: CredentialRecord) -> Result<()> {
        let lock = self.lock_for(session_id).await;
        let _guard = lock.lock().await;

        let path = self.record_path(session_id);
        if let Some(dir) = path.parent() {
            tokio::fs::create_dir_all(dir).await?;
        }

        // Write-then-rename so a crash mid-write never clobbers a good record.
        let tmp = path.with_extension("json.tmp");
        let txt = serde_json::to_string(&record)?;
        tokio::fs::write(&tmp, txt).await?;
        tokio::fs::rename(&tmp, &path).await?;
        Ok(())
    }

    async fn delete(&self, session_id: &SessionId) -> Result<()> {
        let lock = self.lock_for(session_id).await;
        let _guard = lock.lock().await;

        let path = self.record_path(session_id);
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(Error::Io(e)),
        }
    }
}

async fn load_record(path: &Path) -> Result<Option<CredentialRecord>> {
    let txt = match tokio::fs::read_to_string(path).await {
        Ok(txt) => txt,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(Error::Io(e)),
    };
    if txt.trim().is_empty() {
        return Ok(None);
    }
    let record: CredentialRecord = serde_json::from_str(&txt)?;
    Ok(Some(record))
}
