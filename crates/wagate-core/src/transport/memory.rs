//! In-memory transport stand-in.
//!
//! Useful for development and single-process demos until a real protocol
//! adapter is wired in: pairing completes instantly, sends are recorded
//! instead of hitting a network.

use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc, Mutex,
};

use async_trait::async_trait;
use serde_json::json;
use tokio::sync::mpsc;

use crate::{
    creds::CredentialRecord,
    domain::{Jid, MessagePayload, PairingCode, SessionId},
    transport::{OpenedTransport, Transport, TransportEvent, TransportLink},
    Error, Result,
};

type SentLog = Arc<Mutex<Vec<(SessionId, Jid, MessagePayload)>>>;

#[derive(Default)]
pub struct MemoryTransport {
    sent: SentLog,
}

impl MemoryTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every message sent over any link opened by this transport.
    pub fn sent(&self) -> Vec<(SessionId, Jid, MessagePayload)> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl Transport for MemoryTransport {
    async fn open(
        &self,
        session_id: &SessionId,
        creds: Option<CredentialRecord>,
    ) -> Result<OpenedTransport> {
        let (tx, events) = mpsc::unbounded_channel();
        let registered = creds.is_some();

        let link = Arc::new(MemoryLink {
            sent: self.sent.clone(),
            session_id: session_id.clone(),
            registered,
            closed: AtomicBool::new(false),
            events: tx.clone(),
        });

        if registered {
            // Resumed identity: the connection opens right away.
            let _ = tx.send(TransportEvent::Opened);
        }

        Ok(OpenedTransport { link, events })
    }
}

struct MemoryLink {
    sent: SentLog,
    session_id: SessionId,
    registered: bool,
    closed: AtomicBool,
    events: mpsc::UnboundedSender<TransportEvent>,
}

#[async_trait]
impl TransportLink for MemoryLink {
    fn registered(&self) -> bool {
        self.registered
    }

    async fn request_pairing_code(&self, phone_digits: &str) -> Result<PairingCode> {
        if phone_digits.is_empty() {
            return Err(Error::Transport("empty phone number".to_string()));
        }

        // Pairing always succeeds here: emit fresh credentials and open.
        let _ = self.events.send(TransportEvent::CredentialsChanged(json!({
            "registered": true,
            "phone": phone_digits,
        })));
        let _ = self.events.send(TransportEvent::Opened);

        // Deterministic 8-char display code derived from the number.
        let tail: String = {
            let digits: Vec<char> = phone_digits.chars().collect();
            let start = digits.len().saturating_sub(8);
            digits[start..].iter().collect()
        };
        let code = format!("{:0>8}", tail);
        Ok(PairingCode(format!("{}-{}", &code[..4], &code[4..])))
    }

    async fn send_message(&self, target: &Jid, payload: &MessagePayload) -> Result<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(Error::Transport("link closed".to_string()));
        }
        self.sent.lock().unwrap().push((
            self.session_id.clone(),
            target.clone(),
            payload.clone(),
        ));
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn pairing_emits_creds_then_open() {
        let transport = MemoryTransport::new();
        let mut opened = transport.open(&SessionId::new("s1"), None).await.unwrap();
        assert!(!opened.link.registered());

        let code = opened
            .link
            .request_pairing_code("6281234567890")
            .await
            .unwrap();
        assert_eq!(code.0, "3456-7890");

        let first = opened.events.recv().await.unwrap();
        assert!(matches!(first, TransportEvent::CredentialsChanged(_)));
        let second = opened.events.recv().await.unwrap();
        assert!(matches!(second, TransportEvent::Opened));
    }

    #[tokio::test]
    async fn resumed_identity_opens_immediately() {
        let transport = MemoryTransport::new();
        let creds = CredentialRecord::new(json!({"registered": true}));
        let mut opened = transport
            .open(&SessionId::new("s1"), Some(creds))
            .await
            .unwrap();
        assert!(opened.link.registered());
        assert!(matches!(
            opened.events.recv().await.unwrap(),
            TransportEvent::Opened
        ));
    }

    #[tokio::test]
    async fn send_after_close_fails() {
        let transport = MemoryTransport::new();
        let opened = transport.open(&SessionId::new("s1"), None).await.unwrap();
        opened.link.close().await.unwrap();
        let err = opened
            .link
            .send_message(&Jid::new("u@host"), &MessagePayload::text("hi"))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Transport(_)));
    }
}
