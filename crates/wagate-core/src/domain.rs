use serde::{Deserialize, Serialize};

/// Opaque session identity (string), chosen by the caller.
///
/// Never reused concurrently for two live transports.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionId(pub String);

impl SessionId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }
}

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Messaging-network address of a user or group.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Jid(pub String);

impl Jid {
    pub fn new(jid: impl Into<String>) -> Self {
        Self(jid.into())
    }
}

impl std::fmt::Display for Jid {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Short-lived code entered on a trusted device to pair a new session.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PairingCode(pub String);

impl std::fmt::Display for PairingCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Lifecycle phase of one session connection.
///
/// Transitions are owned by the lifecycle controller; everything else only
/// reads snapshots through the state publisher.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Disconnected,
    Connecting,
    AwaitingPairing,
    Connected,
    LoggedOut,
    Error,
}

impl Phase {
    /// Terminal phases never re-enter `connecting` on their own.
    pub fn is_terminal(self) -> bool {
        matches!(self, Phase::LoggedOut)
    }
}

/// Outbound message body. The network payload format is the transport's
/// concern; the core only carries text through.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessagePayload {
    pub text: String,
}

impl MessagePayload {
    pub fn text(text: impl Into<String>) -> Self {
        Self { text: text.into() }
    }
}

/// Inbound message as surfaced by the transport.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct MessageEnvelope {
    pub from: Jid,
    pub push_name: Option<String>,
    pub text: Option<String>,
    /// Set for messages the session itself sent (echoed back by the network).
    pub from_me: bool,
}
