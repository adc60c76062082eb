use crate::domain::{Jid, SessionId};

/// Core error type for the gateway.
///
/// Adapter crates should map their specific errors into this type so the
/// core can handle failures consistently (request-time error vs phase
/// change vs per-target report entry).
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("config error: {0}")]
    Config(String),

    #[error("no stored credentials for {0} and no phone number supplied")]
    PairingRequiredWithoutPhone(SessionId),

    #[error("a connect attempt for {0} is already in progress")]
    AlreadyConnecting(SessionId),

    #[error("pairing code request failed: {0}")]
    PairingRequestFailed(String),

    #[error("session {0} is not connected")]
    NotConnected(SessionId),

    #[error("target {0} is protected and cannot be dispatched to")]
    ProtectedTarget(Jid),

    #[error("dispatch job of {requested} targets exceeds the cap of {cap}")]
    DispatchTooLarge { requested: usize, cap: usize },

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("credential store error: {0}")]
    Store(String),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
