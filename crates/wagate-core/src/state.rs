use std::collections::HashMap;
use std::sync::Arc;

use serde::Serialize;
use tokio::sync::RwLock;
use tracing::info;

use crate::domain::{PairingCode, Phase, SessionId};

/// Externally pollable view of one session: current phase plus any pending
/// pairing code.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct StateSnapshot {
    pub phase: Phase,
    pub pairing_code: Option<PairingCode>,
}

impl Default for StateSnapshot {
    fn default() -> Self {
        Self {
            phase: Phase::Disconnected,
            pairing_code: None,
        }
    }
}

/// Process-wide session state, written only by the lifecycle controller and
/// read by the operator control surface.
#[derive(Clone, Default)]
pub struct StatePublisher {
    inner: Arc<RwLock<HashMap<SessionId, StateSnapshot>>>,
}

impl StatePublisher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sessions that never connected read as `disconnected`.
    pub async fn snapshot(&self, session_id: &SessionId) -> StateSnapshot {
        self.inner
            .read()
            .await
            .get(session_id)
            .cloned()
            .unwrap_or_default()
    }

    // Only the lifecycle controller transitions phases.
    pub(crate) async fn publish(
        &self,
        session_id: &SessionId,
        phase: Phase,
        pairing_code: Option<PairingCode>,
    ) {
        info!(session = %session_id, ?phase, "session phase");
        self.inner.write().await.insert(
            session_id.clone(),
            StateSnapshot {
                phase,
                pairing_code,
            },
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn unknown_session_reads_disconnected() {
        let publisher = StatePublisher::new();
        let snap = publisher.snapshot(&SessionId::new("nobody")).await;
        assert_eq!(snap.phase, Phase::Disconnected);
        assert!(snap.pairing_code.is_none());
    }

    #[tokio::test]
    async fn publish_replaces_whole_snapshot() {
        let publisher = StatePublisher::new();
        let id = SessionId::new("s1");

        publisher
            .publish(
                &id,
                Phase::AwaitingPairing,
                Some(PairingCode("ABCD-1234".to_string())),
            )
            .await;
        assert_eq!(
            publisher.snapshot(&id).await.pairing_code,
            Some(PairingCode("ABCD-1234".to_string()))
        );

        // Reaching connected clears the code.
        publisher.publish(&id, Phase::Connected, None).await;
        let snap = publisher.snapshot(&id).await;
        assert_eq!(snap.phase, Phase::Connected);
        assert!(snap.pairing_code.is_none());
    }
}
