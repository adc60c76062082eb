use std::sync::Arc;

use crate::{
    domain::{Jid, MessagePayload, SessionId},
    transport::TransportLink,
    Result,
};

/// One live transport connection bound to a session identity.
///
/// The lifecycle controller creates a fresh handle per connection attempt
/// and is the only component that tears one down; the dispatcher borrows the
/// currently connected handle to emit messages.
pub struct SessionHandle {
    id: SessionId,
    link: Arc<dyn TransportLink>,
}

impl std::fmt::Debug for SessionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionHandle")
            .field("id", &self.id)
            .finish_non_exhaustive()
    }
}

impl SessionHandle {
    pub(crate) fn new(id: SessionId, link: Arc<dyn TransportLink>) -> Self {
        Self { id, link }
    }

    pub fn id(&self) -> &SessionId {
        &self.id
    }

    /// Whether the underlying identity was paired before this connection.
    pub fn registered(&self) -> bool {
        self.link.registered()
    }

    pub async fn send_message(&self, target: &Jid, payload: &MessagePayload) -> Result<()> {
        self.link.send_message(target, payload).await
    }

    pub(crate) fn link(&self) -> &Arc<dyn TransportLink> {
        &self.link
    }
}
