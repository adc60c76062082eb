use std::sync::Arc;

use async_trait::async_trait;
use tracing::info;

use wagate_core::{
    config::Config,
    creds::file::FileCredentialStore,
    dispatch::Dispatcher,
    domain::{MessageEnvelope, SessionId},
    lifecycle::{LifecycleController, MessageObserver},
    state::StatePublisher,
    transport::memory::MemoryTransport,
};
use wagate_http::AppState;

/// Default observer: log inbound traffic, nothing more. Command handling
/// for inbound chats plugs in here.
struct LogObserver;

#[async_trait]
impl MessageObserver for LogObserver {
    async fn on_message(&self, session_id: &SessionId, envelope: MessageEnvelope) {
        info!(
            session = %session_id,
            from = %envelope.from,
            push_name = envelope.push_name.as_deref().unwrap_or("-"),
            "inbound message"
        );
    }
}

#[tokio::main]
async fn main() -> Result<(), wagate_core::Error> {
    wagate_core::logging::init("wagate");

    let cfg = Arc::new(Config::load()?);

    let store = Arc::new(FileCredentialStore::new(cfg.sessions_dir.clone()));
    // Development transport; a real protocol adapter slots in here.
    let transport = Arc::new(MemoryTransport::new());

    let controller = Arc::new(LifecycleController::new(
        cfg.clone(),
        store,
        transport,
        StatePublisher::new(),
    ));
    controller.set_observer(Arc::new(LogObserver)).await;

    let dispatcher = Arc::new(Dispatcher::new(cfg.clone(), controller.clone()));

    let state = AppState {
        cfg: cfg.clone(),
        controller,
        dispatcher,
    };
    wagate_http::serve(state, cfg.http_addr).await
}
