//! Connection lifecycle controller.
//!
//! Owns every live session: the per-id connect guard, the supervised
//! reconnect loop, pairing-code acquisition, credential write-back and the
//! logged-out-vs-recoverable close classification.

use std::{collections::HashMap, future::Future, pin::Pin, sync::Arc};

use async_trait::async_trait;
use regex::Regex;
use tokio::sync::{mpsc, Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::{
    config::Config,
    creds::{CredentialRecord, CredentialStore},
    domain::{MessageEnvelope, PairingCode, Phase, SessionId},
    session::SessionHandle,
    state::{StatePublisher, StateSnapshot},
    transport::{DisconnectReason, Transport, TransportEvent},
    Error, Result,
};

/// Receiver for inbound messages. Messages are forwarded as they arrive and
/// are never buffered; with no observer registered they are dropped.
#[async_trait]
pub trait MessageObserver: Send + Sync {
    async fn on_message(&self, session_id: &SessionId, envelope: MessageEnvelope);
}

type SharedObserver = Arc<RwLock<Option<Arc<dyn MessageObserver>>>>;
type LiveHandle = Arc<RwLock<Option<Arc<SessionHandle>>>>;

pub struct LifecycleController {
    cfg: Arc<Config>,
    store: Arc<dyn CredentialStore>,
    transport: Arc<dyn Transport>,
    publisher: StatePublisher,
    observer: SharedObserver,
    sessions: Mutex<HashMap<SessionId, SessionEntry>>,
}

struct SessionEntry {
    cancel: CancellationToken,
    live: LiveHandle,
    // None while the first connect is still setting up.
    task: Option<JoinHandle<()>>,
}

impl SessionEntry {
    fn in_progress(&self) -> bool {
        self.task.as_ref().map_or(true, |t| !t.is_finished())
    }
}

impl LifecycleController {
    pub fn new(
        cfg: Arc<Config>,
        store: Arc<dyn CredentialStore>,
        transport: Arc<dyn Transport>,
        publisher: StatePublisher,
    ) -> Self {
        Self {
            cfg,
            store,
            transport,
            publisher,
            observer: Arc::new(RwLock::new(None)),
            sessions: Mutex::new(HashMap::new()),
        }
    }

    pub async fn set_observer(&self, observer: Arc<dyn MessageObserver>) {
        *self.observer.write().await = Some(observer);
    }

    pub async fn current_state(&self, session_id: &SessionId) -> StateSnapshot {
        self.publisher.snapshot(session_id).await
    }

    /// Establish a session: resume from stored credentials, or pair fresh
    /// against the supplied phone number.
    ///
    /// Fails with [`Error::PairingRequiredWithoutPhone`] when neither stored
    /// credentials nor a phone number exist, and with
    /// [`Error::AlreadyConnecting`] while a live attempt for the same id is
    /// in progress. The returned handle becomes usable for sends once the
    /// session reaches `connected`.
    pub async fn connect(
        &self,
        session_id: &SessionId,
        phone: Option<&str>,
    ) -> Result<Arc<SessionHandle>> {
        let cancel = CancellationToken::new();
        let live: LiveHandle = Arc::new(RwLock::new(None));

        {
            let mut sessions = self.sessions.lock().await;
            if let Some(entry) = sessions.get(session_id) {
                if entry.in_progress() {
                    return Err(Error::AlreadyConnecting(session_id.clone()));
                }
            }
            // Reserve the id before any await so concurrent connects lose.
            sessions.insert(
                session_id.clone(),
                SessionEntry {
                    cancel: cancel.clone(),
                    live: live.clone(),
                    task: None,
                },
            );
        }

        match self.start_session(session_id, phone, cancel, live).await {
            Ok(handle) => Ok(handle),
            Err(e) => {
                // Release the reservation; nobody else could have claimed it.
                self.sessions.lock().await.remove(session_id);
                Err(e)
            }
        }
    }

    async fn start_session(
        &self,
        session_id: &SessionId,
        phone: Option<&str>,
        cancel: CancellationToken,
        live: LiveHandle,
    ) -> Result<Arc<SessionHandle>> {
        let creds = self.store.get(session_id).await?;
        let digits = phone.map(normalize_phone).filter(|d| !d.is_empty());
        if creds.is_none() && digits.is_none() {
            return Err(Error::PairingRequiredWithoutPhone(session_id.clone()));
        }

        self.publisher
            .publish(session_id, Phase::Connecting, None)
            .await;

        let opened = match self.transport.open(session_id, creds).await {
            Ok(opened) => opened,
            Err(e) => {
                self.publisher.publish(session_id, Phase::Error, None).await;
                return Err(e);
            }
        };

        let handle = Arc::new(SessionHandle::new(session_id.clone(), opened.link));

        let ctx = SessionCtx {
            id: session_id.clone(),
            cfg: self.cfg.clone(),
            store: self.store.clone(),
            transport: self.transport.clone(),
            publisher: self.publisher.clone(),
            observer: self.observer.clone(),
            live,
            cancel,
        };
        let task = tokio::spawn(supervise(ctx, handle.clone(), opened.events, digits));

        if let Some(entry) = self.sessions.lock().await.get_mut(session_id) {
            entry.task = Some(task);
        }

        Ok(handle)
    }

    /// Explicit operator logout: interrupts any in-flight reconnect,
    /// releases the transport, deletes the stored credential record and
    /// leaves the session in the terminal `logged_out` phase.
    pub async fn logout(&self, session_id: &SessionId) -> Result<()> {
        let entry = self.sessions.lock().await.remove(session_id);
        if let Some(entry) = entry {
            entry.cancel.cancel();
            if let Some(handle) = entry.live.read().await.clone() {
                let _ = handle.link().close().await;
            }
            if let Some(task) = entry.task {
                let _ = task.await;
            }
        }

        self.store.delete(session_id).await?;
        self.publisher
            .publish(session_id, Phase::LoggedOut, None)
            .await;
        Ok(())
    }

    /// The currently connected handle for this session, if any.
    pub async fn connected_handle(&self, session_id: &SessionId) -> Result<Arc<SessionHandle>> {
        let live = self
            .sessions
            .lock()
            .await
            .get(session_id)
            .map(|e| e.live.clone());
        let Some(live) = live else {
            return Err(Error::NotConnected(session_id.clone()));
        };
        let handle = live.read().await.clone();
        handle.ok_or_else(|| Error::NotConnected(session_id.clone()))
    }
}

struct SessionCtx {
    id: SessionId,
    cfg: Arc<Config>,
    store: Arc<dyn CredentialStore>,
    transport: Arc<dyn Transport>,
    publisher: StatePublisher,
    observer: SharedObserver,
    live: LiveHandle,
    cancel: CancellationToken,
}

enum AttemptOutcome {
    Cancelled,
    LoggedOut,
    Lost(String),
}

/// Supervisory loop for one session: runs connection attempts until the
/// session is logged out, cancelled, or the reconnect budget is spent.
/// Replaces the original's recursive self-reconnect with an explicit loop
/// plus attempt counter.
async fn supervise(
    ctx: SessionCtx,
    first_handle: Arc<SessionHandle>,
    first_events: mpsc::UnboundedReceiver<TransportEvent>,
    phone_digits: Option<String>,
) {
    let mut attempts: u32 = 0;
    let mut current = Some((first_handle, first_events));

    loop {
        let (handle, events) = match current.take() {
            Some(pair) => pair,
            None => match reopen(&ctx).await {
                Ok(pair) => pair,
                Err(e) => {
                    warn!(session = %ctx.id, error = %e, "reconnect open failed");
                    ctx.publisher.publish(&ctx.id, Phase::Error, None).await;
                    attempts += 1;
                    if retries_exhausted(&ctx.cfg, attempts) {
                        return;
                    }
                    if !pause_before_retry(&ctx).await {
                        return;
                    }
                    ctx.publisher.publish(&ctx.id, Phase::Connecting, None).await;
                    continue;
                }
            },
        };

        let outcome = run_attempt(&ctx, handle.clone(), events, phone_digits.as_deref()).await;

        *ctx.live.write().await = None;
        let _ = handle.link().close().await;

        match outcome {
            AttemptOutcome::Cancelled => return,
            AttemptOutcome::LoggedOut => {
                info!(session = %ctx.id, "logged out, session torn down");
                ctx.publisher.publish(&ctx.id, Phase::LoggedOut, None).await;
                return;
            }
            AttemptOutcome::Lost(reason) => {
                warn!(session = %ctx.id, %reason, "connection closed, reconnecting");
                attempts += 1;
                if retries_exhausted(&ctx.cfg, attempts) {
                    ctx.publisher.publish(&ctx.id, Phase::Error, None).await;
                    return;
                }
                ctx.publisher.publish(&ctx.id, Phase::Connecting, None).await;
                if !pause_before_retry(&ctx).await {
                    return;
                }
            }
        }
    }
}

fn retries_exhausted(cfg: &Config, attempts: u32) -> bool {
    cfg.max_reconnect_attempts > 0 && attempts >= cfg.max_reconnect_attempts
}

/// Returns false when cancelled while waiting.
async fn pause_before_retry(ctx: &SessionCtx) -> bool {
    tokio::select! {
        _ = ctx.cancel.cancelled() => false,
        _ = sleep(ctx.cfg.reconnect_delay) => true,
    }
}

async fn reopen(
    ctx: &SessionCtx,
) -> Result<(Arc<SessionHandle>, mpsc::UnboundedReceiver<TransportEvent>)> {
    let creds = ctx.store.get(&ctx.id).await?;
    let opened = ctx.transport.open(&ctx.id, creds).await?;
    let handle = Arc::new(SessionHandle::new(ctx.id.clone(), opened.link));
    Ok((handle, opened.events))
}

type PairingFut = Pin<Box<dyn Future<Output = Result<PairingCode>> + Send>>;

/// Drive one connection attempt to its close, handling pairing, credential
/// rotation and inbound messages along the way.
async fn run_attempt(
    ctx: &SessionCtx,
    handle: Arc<SessionHandle>,
    mut events: mpsc::UnboundedReceiver<TransportEvent>,
    phone_digits: Option<&str>,
) -> AttemptOutcome {
    let mut pairing: Option<PairingFut> = None;
    if !handle.registered() {
        if let Some(digits) = phone_digits {
            let link = handle.link().clone();
            let digits = digits.to_string();
            let settle = ctx.cfg.pairing_settle_delay;
            pairing = Some(Box::pin(async move {
                // The transport rejects pairing requests until the socket
                // settles; it exposes no readiness signal, so wait it out.
                sleep(settle).await;
                link.request_pairing_code(&digits).await
            }));
        } else {
            // Nothing to pair with this attempt; stay in connecting until
            // the operator supplies a number or the transport closes.
            warn!(session = %ctx.id, "transport unregistered and no phone number available");
        }
    }

    loop {
        tokio::select! {
            _ = ctx.cancel.cancelled() => return AttemptOutcome::Cancelled,

            code = async {
                match pairing.as_mut() {
                    Some(fut) => fut.await,
                    None => std::future::pending().await,
                }
            }, if pairing.is_some() => {
                pairing = None;
                match code {
                    Ok(code) => {
                        info!(session = %ctx.id, %code, "pairing code issued");
                        ctx.publisher
                            .publish(&ctx.id, Phase::AwaitingPairing, Some(code))
                            .await;
                    }
                    Err(e) => {
                        // Non-fatal: the session stays in connecting and a
                        // later operator retry may succeed.
                        let e = Error::PairingRequestFailed(e.to_string());
                        warn!(session = %ctx.id, error = %e, "pairing code request failed");
                    }
                }
            }

            ev = events.recv() => match ev {
                Some(TransportEvent::CredentialsChanged(blob)) => {
                    // Overwrite of the full blob; idempotent and replayable.
                    if let Err(e) = ctx.store.put(&ctx.id, CredentialRecord::new(blob)).await {
                        warn!(session = %ctx.id, error = %e, "credential persist failed");
                    }
                }
                Some(TransportEvent::Opened) => {
                    // A pairing code is meaningless once the identity opened;
                    // abandon any request still in flight so it can never
                    // overwrite the connected snapshot.
                    pairing = None;
                    *ctx.live.write().await = Some(handle.clone());
                    ctx.publisher.publish(&ctx.id, Phase::Connected, None).await;
                }
                Some(TransportEvent::Closed(DisconnectReason::LoggedOut)) => {
                    return AttemptOutcome::LoggedOut;
                }
                Some(TransportEvent::Closed(DisconnectReason::ConnectionLost(why))) => {
                    return AttemptOutcome::Lost(why);
                }
                Some(TransportEvent::Message(envelope)) => {
                    forward_message(ctx, envelope).await;
                }
                None => return AttemptOutcome::Lost("event stream ended".to_string()),
            }
        }
    }
}

async fn forward_message(ctx: &SessionCtx, envelope: MessageEnvelope) {
    if envelope.from_me {
        return;
    }
    let observer = ctx.observer.read().await.clone();
    match observer {
        Some(observer) => observer.on_message(&ctx.id, envelope).await,
        None => debug!(session = %ctx.id, from = %envelope.from, "inbound message dropped (no observer)"),
    }
}

/// Digits-only phone normalization, as the pairing endpoint requires.
pub fn normalize_phone(raw: &str) -> String {
    let re = Regex::new(r"[^0-9]").expect("valid regex");
    re.replace_all(raw, "").into_owned()
}
