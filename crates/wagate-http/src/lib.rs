//! Operator control surface.
//!
//! Thin HTTP pass-throughs into the core: session state, connect/logout and
//! the two dispatch entry points. Dashboard auth (cookies, OTP) lives in the
//! external admin stack, not here.

use std::{net::SocketAddr, sync::Arc};

use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tower_http::cors::CorsLayer;
use tracing::info;

use wagate_core::{
    config::Config,
    dispatch::{DispatchReport, Dispatcher},
    domain::{Jid, MessagePayload, PairingCode, Phase, SessionId},
    lifecycle::LifecycleController,
    Error, Result,
};

/// Burst payload presets looked up by attack `type`; unknown or missing
/// kinds fall back to the `crash` entry. Content is plain text; the core
/// only paces and polices it.
const BURST_DEFAULT: &str = "SYSTEM RECALIBRATION REQUIRED";
const BURST_PRESETS: &[(&str, &str)] = &[
    ("crash", BURST_DEFAULT),
    ("freeze", "CONNECTION QUALITY CHECK IN PROGRESS"),
    ("spam", "SCHEDULED MAINTENANCE NOTICE"),
];

#[derive(Clone)]
pub struct AppState {
    pub cfg: Arc<Config>,
    pub controller: Arc<LifecycleController>,
    pub dispatcher: Arc<Dispatcher>,
}

impl AppState {
    fn session_id(&self) -> SessionId {
        SessionId::new(self.cfg.default_session_id.clone())
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/api/admin/bot-state", get(bot_state))
        .route("/api/admin/bot-connect", post(bot_connect))
        .route("/api/admin/bot-logout", post(bot_logout))
        .route("/api/blast/attack", post(blast_attack))
        .route("/api/blast/promote", post(blast_promote))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

pub async fn serve(state: AppState, addr: SocketAddr) -> Result<()> {
    let app = router(state);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(%addr, "operator control surface listening");
    axum::serve(listener, app).await?;
    Ok(())
}

/// Core errors rendered as the dashboard expects: `{"error": "..."}` plus a
/// meaningful status.
#[derive(Debug)]
struct ApiError(Error);

impl From<Error> for ApiError {
    fn from(e: Error) -> Self {
        Self(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            Error::PairingRequiredWithoutPhone(_) | Error::InvalidRequest(_) => {
                StatusCode::BAD_REQUEST
            }
            Error::AlreadyConnecting(_) => StatusCode::CONFLICT,
            Error::ProtectedTarget(_) | Error::DispatchTooLarge { .. } => StatusCode::FORBIDDEN,
            Error::NotConnected(_) => StatusCode::SERVICE_UNAVAILABLE,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        (status, Json(json!({ "error": self.0.to_string() }))).into_response()
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct BotStateResponse {
    success: bool,
    state: Phase,
    pairing_code: Option<PairingCode>,
    session_id: String,
}

async fn bot_state(State(st): State<AppState>) -> Json<BotStateResponse> {
    let snap = st.controller.current_state(&st.session_id()).await;
    Json(BotStateResponse {
        success: true,
        state: snap.phase,
        pairing_code: snap.pairing_code,
        session_id: st.cfg.default_session_id.clone(),
    })
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ConnectRequest {
    phone_number: Option<String>,
}

async fn bot_connect(
    State(st): State<AppState>,
    Json(req): Json<ConnectRequest>,
) -> std::result::Result<Json<serde_json::Value>, ApiError> {
    st.controller
        .connect(&st.session_id(), req.phone_number.as_deref())
        .await?;
    Ok(Json(json!({ "success": true })))
}

async fn bot_logout(
    State(st): State<AppState>,
) -> std::result::Result<Json<serde_json::Value>, ApiError> {
    st.controller.logout(&st.session_id()).await?;
    Ok(Json(json!({ "success": true })))
}

#[derive(Deserialize)]
struct AttackRequest {
    jid: Option<String>,
    #[serde(rename = "type")]
    kind: Option<String>,
}

#[derive(Debug, Serialize)]
struct AttackResponse {
    success: bool,
    target: String,
    attempted: usize,
    succeeded: usize,
}

async fn blast_attack(
    State(st): State<AppState>,
    Json(req): Json<AttackRequest>,
) -> std::result::Result<Json<AttackResponse>, ApiError> {
    let Some(jid) = req.jid.filter(|j| !j.trim().is_empty()) else {
        return Err(Error::InvalidRequest("target identifier required".to_string()).into());
    };

    let kind = req.kind.unwrap_or_default();
    let text = BURST_PRESETS
        .iter()
        .find(|(name, _)| *name == kind)
        .map(|(_, text)| *text)
        .unwrap_or(BURST_DEFAULT);

    let job = st.dispatcher.burst(
        &st.session_id(),
        Jid::new(jid.clone()),
        MessagePayload::text(text),
    )?;
    let DispatchReport {
        attempted,
        succeeded,
    } = job.wait().await;

    Ok(Json(AttackResponse {
        success: true,
        target: jid,
        attempted,
        succeeded,
    }))
}

#[derive(Deserialize)]
struct PromoteRequest {
    contacts: Option<Vec<String>>,
    text: Option<String>,
}

async fn blast_promote(
    State(st): State<AppState>,
    Json(req): Json<PromoteRequest>,
) -> std::result::Result<Json<serde_json::Value>, ApiError> {
    let contacts = req.contacts.unwrap_or_default();
    let Some(text) = req.text.filter(|t| !t.trim().is_empty()) else {
        return Err(Error::InvalidRequest("text required".to_string()).into());
    };

    let targets: Vec<(Jid, MessagePayload)> = contacts
        .iter()
        .map(|jid| (Jid::new(jid.clone()), MessagePayload::text(text.clone())))
        .collect();

    // Long-running: detach and answer right away, like the original did.
    let count = targets.len();
    let _job = st.dispatcher.dispatch(&st.session_id(), targets, None)?;

    Ok(Json(json!({ "success": true, "count": count })))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::time::sleep;
    use wagate_core::{
        creds::memory::MemoryCredentialStore, state::StatePublisher,
        transport::memory::MemoryTransport,
    };

    fn app_state() -> (AppState, Arc<MemoryTransport>) {
        let cfg = Arc::new(Config::default());
        let transport = Arc::new(MemoryTransport::new());
        let controller = Arc::new(LifecycleController::new(
            cfg.clone(),
            Arc::new(MemoryCredentialStore::new()),
            transport.clone(),
            StatePublisher::new(),
        ));
        let dispatcher = Arc::new(Dispatcher::new(cfg.clone(), controller.clone()));
        (
            AppState {
                cfg,
                controller,
                dispatcher,
            },
            transport,
        )
    }

    // Budget well past the default settle delay so paired connects land.
    async fn wait_for_connected(st: &AppState) {
        for _ in 0..4_000 {
            if st.controller.current_state(&st.session_id()).await.phase == Phase::Connected {
                return;
            }
            sleep(Duration::from_millis(5)).await;
        }
        panic!("session never connected");
    }

    #[tokio::test]
    async fn bot_state_defaults_to_disconnected() {
        let (st, _) = app_state();
        let Json(resp) = bot_state(State(st)).await;
        assert!(resp.success);
        assert_eq!(resp.state, Phase::Disconnected);
        assert!(resp.pairing_code.is_none());
        assert_eq!(resp.session_id, "server_main");
    }

    #[tokio::test(start_paused = true)]
    async fn connect_then_state_reports_connected() {
        let (st, _) = app_state();
        bot_connect(
            State(st.clone()),
            Json(ConnectRequest {
                phone_number: Some("+62 812 345".to_string()),
            }),
        )
        .await
        .unwrap();

        wait_for_connected(&st).await;
        let Json(resp) = bot_state(State(st)).await;
        assert_eq!(resp.state, Phase::Connected);
    }

    #[tokio::test]
    async fn connect_without_phone_is_bad_request() {
        let (st, _) = app_state();
        let err = bot_connect(State(st), Json(ConnectRequest { phone_number: None }))
            .await
            .unwrap_err();
        assert_eq!(err.into_response().status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test(start_paused = true)]
    async fn attack_on_protected_target_is_forbidden() {
        let (st, transport) = app_state();
        let err = blast_attack(
            State(st),
            Json(AttackRequest {
                jid: Some("status@broadcast".to_string()),
                kind: Some("spam".to_string()),
            }),
        )
        .await
        .unwrap_err();
        assert_eq!(err.into_response().status(), StatusCode::FORBIDDEN);
        assert!(transport.sent().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn unknown_attack_kind_falls_back_to_crash_preset() {
        let (st, transport) = app_state();
        bot_connect(
            State(st.clone()),
            Json(ConnectRequest {
                phone_number: Some("628123".to_string()),
            }),
        )
        .await
        .unwrap();
        wait_for_connected(&st).await;

        let Json(resp) = blast_attack(
            State(st),
            Json(AttackRequest {
                jid: Some("victim@host".to_string()),
                kind: Some("bogus".to_string()),
            }),
        )
        .await
        .unwrap();
        assert_eq!(resp.attempted, 5);
        assert_eq!(resp.succeeded, 5);

        let sent = transport.sent();
        assert_eq!(sent.len(), 5);
        assert!(sent.iter().all(|(_, _, payload)| payload.text == BURST_DEFAULT));
    }

    #[tokio::test(start_paused = true)]
    async fn promote_sends_to_each_contact() {
        let (st, transport) = app_state();
        bot_connect(
            State(st.clone()),
            Json(ConnectRequest {
                phone_number: Some("628123".to_string()),
            }),
        )
        .await
        .unwrap();
        wait_for_connected(&st).await;

        let Json(resp) = blast_promote(
            State(st),
            Json(PromoteRequest {
                contacts: Some(vec!["a@host".to_string(), "b@host".to_string()]),
                text: Some("promo".to_string()),
            }),
        )
        .await
        .unwrap();
        assert_eq!(resp["count"], 2);

        // The detached job drains with pacing in between.
        for _ in 0..1_000 {
            if transport.sent().len() == 2 {
                break;
            }
            sleep(Duration::from_millis(50)).await;
        }
        assert_eq!(transport.sent().len(), 2);
    }

    #[tokio::test]
    async fn promote_without_contacts_is_bad_request() {
        let (st, _) = app_state();
        let err = blast_promote(
            State(st),
            Json(PromoteRequest {
                contacts: None,
                text: Some("promo".to_string()),
            }),
        )
        .await
        .unwrap_err();
        assert_eq!(err.into_response().status(), StatusCode::BAD_REQUEST);
    }
}
