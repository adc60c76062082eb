//! The opaque transport port.
//!
//! The actual wire protocol of the messaging network (framing, crypto,
//! retries below the session layer) is the transport's business. The core
//! only consumes connection events and send/receive primitives.

pub mod memory;

use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::mpsc;

use crate::{
    creds::CredentialRecord,
    domain::{Jid, MessageEnvelope, MessagePayload, PairingCode, SessionId},
    Result,
};

/// Why a connection closed. Classification drives the single most important
/// lifecycle policy: a logged-out close is terminal, everything else
/// reconnects.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DisconnectReason {
    /// Explicit deauthorization, local or remote. Never reconnect.
    LoggedOut,
    /// Anything else (stream error, timed out, restart required, ...).
    ConnectionLost(String),
}

impl DisconnectReason {
    pub fn is_logged_out(&self) -> bool {
        matches!(self, DisconnectReason::LoggedOut)
    }
}

/// Events a live transport emits to its single consumer (the lifecycle
/// controller).
#[derive(Clone, Debug)]
pub enum TransportEvent {
    /// Full current credential blob; persist by overwrite, safe to replay.
    CredentialsChanged(serde_json::Value),
    Opened,
    Closed(DisconnectReason),
    Message(MessageEnvelope),
}

/// A freshly opened transport: the command side plus the event stream.
pub struct OpenedTransport {
    pub link: Arc<dyn TransportLink>,
    pub events: mpsc::UnboundedReceiver<TransportEvent>,
}

/// Factory for transport connections.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn open(
        &self,
        session_id: &SessionId,
        creds: Option<CredentialRecord>,
    ) -> Result<OpenedTransport>;
}

/// Command side of one live connection.
#[async_trait]
pub trait TransportLink: Send + Sync {
    /// Whether this connection carries a previously paired identity.
    fn registered(&self) -> bool;

    /// Ask the network for a pairing code bound to a digits-only phone
    /// number. Only meaningful on an unregistered link.
    async fn request_pairing_code(&self, phone_digits: &str) -> Result<PairingCode>;

    async fn send_message(&self, target: &Jid, payload: &MessagePayload) -> Result<()>;

    /// Release the connection. Idempotent.
    async fn close(&self) -> Result<()>;
}
