//! Paced outbound dispatch.
//!
//! Bulk jobs run as detached background tasks: strictly ordered sends, a
//! fixed pacing sleep between consecutive targets to stay under host-side
//! anti-abuse limits, per-target failures recorded and skipped. Jobs are
//! capped and abortable.

use std::sync::{
    atomic::{AtomicUsize, Ordering},
    Arc,
};
use std::time::Duration;

use async_trait::async_trait;
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::{
    config::Config,
    domain::{Jid, MessagePayload, SessionId},
    lifecycle::LifecycleController,
    session::SessionHandle,
    Error, Result,
};

/// System addresses that must never receive dispatched traffic.
pub const PROTECTED_TARGETS: &[&str] = &["status@broadcast"];

pub fn is_protected_target(target: &Jid) -> bool {
    PROTECTED_TARGETS.iter().any(|p| target.0.contains(p))
}

/// Resolves the currently connected handle for a session. Implemented by
/// the lifecycle controller; tests substitute fakes.
#[async_trait]
pub trait SessionResolver: Send + Sync {
    async fn connected_handle(&self, session_id: &SessionId) -> Result<Arc<SessionHandle>>;
}

#[async_trait]
impl SessionResolver for LifecycleController {
    async fn connected_handle(&self, session_id: &SessionId) -> Result<Arc<SessionHandle>> {
        LifecycleController::connected_handle(self, session_id).await
    }
}

/// Final (or in-flight) tally of one dispatch job.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct DispatchReport {
    pub attempted: usize,
    pub succeeded: usize,
}

#[derive(Debug, Default)]
struct Progress {
    attempted: AtomicUsize,
    succeeded: AtomicUsize,
}

impl Progress {
    fn report(&self) -> DispatchReport {
        DispatchReport {
            attempted: self.attempted.load(Ordering::SeqCst),
            succeeded: self.succeeded.load(Ordering::SeqCst),
        }
    }
}

/// Handle to a detached dispatch job: poll progress, abort between sends,
/// or wait for the final report.
#[derive(Debug)]
pub struct DispatchJob {
    abort: CancellationToken,
    progress: Arc<Progress>,
    task: JoinHandle<()>,
}

impl DispatchJob {
    /// Stop the job at the next inter-send checkpoint.
    pub fn abort(&self) {
        self.abort.cancel();
    }

    pub fn progress(&self) -> DispatchReport {
        self.progress.report()
    }

    pub async fn wait(self) -> DispatchReport {
        let _ = self.task.await;
        self.progress.report()
    }
}

pub struct Dispatcher {
    cfg: Arc<Config>,
    resolver: Arc<dyn SessionResolver>,
}

impl Dispatcher {
    pub fn new(cfg: Arc<Config>, resolver: Arc<dyn SessionResolver>) -> Self {
        Self { cfg, resolver }
    }

    /// Submit a bulk job: one payload per target, strictly in input order.
    ///
    /// Per-target failures never abort the job; they are logged and show up
    /// as `attempted - succeeded` in the report. Returns request-time errors
    /// only for an empty or oversized target list.
    pub fn dispatch(
        &self,
        session_id: &SessionId,
        targets: Vec<(Jid, MessagePayload)>,
        pacing: Option<Duration>,
    ) -> Result<DispatchJob> {
        if targets.is_empty() {
            return Err(Error::InvalidRequest("target list required".to_string()));
        }
        if targets.len() > self.cfg.dispatch_max_targets {
            return Err(Error::DispatchTooLarge {
                requested: targets.len(),
                cap: self.cfg.dispatch_max_targets,
            });
        }
        Ok(self.spawn_job(session_id.clone(), targets, pacing))
    }

    /// Burst mode: a small fixed number of sends to one target.
    ///
    /// Protected system targets are rejected here, before anything reaches
    /// the transport.
    pub fn burst(
        &self,
        session_id: &SessionId,
        target: Jid,
        payload: MessagePayload,
    ) -> Result<DispatchJob> {
        if is_protected_target(&target) {
            return Err(Error::ProtectedTarget(target));
        }
        let targets = std::iter::repeat_with(|| (target.clone(), payload.clone()))
            .take(self.cfg.burst_count)
            .collect();
        Ok(self.spawn_job(session_id.clone(), targets, None))
    }

    fn spawn_job(
        &self,
        session_id: SessionId,
        targets: Vec<(Jid, MessagePayload)>,
        pacing: Option<Duration>,
    ) -> DispatchJob {
        let pacing = pacing.unwrap_or(self.cfg.dispatch_pacing);
        let abort = CancellationToken::new();
        let progress = Arc::new(Progress::default());
        let resolver = self.resolver.clone();

        let task = tokio::spawn(run_job(
            resolver,
            session_id,
            targets,
            pacing,
            abort.clone(),
            progress.clone(),
        ));

        DispatchJob {
            abort,
            progress,
            task,
        }
    }
}

async fn run_job(
    resolver: Arc<dyn SessionResolver>,
    session_id: SessionId,
    targets: Vec<(Jid, MessagePayload)>,
    pacing: Duration,
    abort: CancellationToken,
    progress: Arc<Progress>,
) {
    let total = targets.len();
    info!(session = %session_id, total, pacing_ms = pacing.as_millis() as u64, "dispatch job started");

    for (i, (target, payload)) in targets.into_iter().enumerate() {
        if abort.is_cancelled() {
            warn!(session = %session_id, done = i, total, "dispatch job aborted");
            return;
        }

        progress.attempted.fetch_add(1, Ordering::SeqCst);
        match send_one(resolver.as_ref(), &session_id, &target, &payload).await {
            Ok(()) => {
                progress.succeeded.fetch_add(1, Ordering::SeqCst);
            }
            Err(e) => {
                // Recorded and skipped; the job carries on.
                warn!(session = %session_id, %target, error = %e, "dispatch target failed");
            }
        }

        if i + 1 < total {
            tokio::select! {
                _ = abort.cancelled() => {
                    warn!(session = %session_id, done = i + 1, total, "dispatch job aborted");
                    return;
                }
                _ = sleep(pacing) => {}
            }
        }
    }

    let report = progress.report();
    info!(
        session = %session_id,
        attempted = report.attempted,
        succeeded = report.succeeded,
        "dispatch job finished"
    );
}

async fn send_one(
    resolver: &dyn SessionResolver,
    session_id: &SessionId,
    target: &Jid,
    payload: &MessagePayload,
) -> Result<()> {
    if is_protected_target(target) {
        return Err(Error::ProtectedTarget(target.clone()));
    }
    // Resolved per send so a mid-job reconnect picks up the new handle.
    let handle = resolver.connected_handle(session_id).await?;
    handle.send_message(target, payload).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::TransportLink;
    use crate::domain::PairingCode;
    use std::collections::HashSet;
    use std::sync::Mutex as StdMutex;
    use tokio::time::Instant;

    struct FakeLink {
        sent: StdMutex<Vec<Jid>>,
        failing: HashSet<String>,
    }

    #[async_trait]
    impl TransportLink for FakeLink {
        fn registered(&self) -> bool {
            true
        }

        async fn request_pairing_code(&self, _phone_digits: &str) -> Result<PairingCode> {
            Err(Error::Transport("already registered".to_string()))
        }

        async fn send_message(&self, target: &Jid, _payload: &MessagePayload) -> Result<()> {
            if self.failing.contains(&target.0) {
                return Err(Error::Transport("send refused".to_string()));
            }
            self.sent.lock().unwrap().push(target.clone());
            Ok(())
        }

        async fn close(&self) -> Result<()> {
            Ok(())
        }
    }

    struct FakeResolver {
        link: Arc<FakeLink>,
    }

    #[async_trait]
    impl SessionResolver for FakeResolver {
        async fn connected_handle(&self, session_id: &SessionId) -> Result<Arc<SessionHandle>> {
            Ok(Arc::new(SessionHandle::new(
                session_id.clone(),
                self.link.clone(),
            )))
        }
    }

    fn setup(failing: &[&str]) -> (Dispatcher, Arc<FakeLink>) {
        let link = Arc::new(FakeLink {
            sent: StdMutex::new(Vec::new()),
            failing: failing.iter().map(|s| s.to_string()).collect(),
        });
        let dispatcher = Dispatcher::new(
            Arc::new(Config::default()),
            Arc::new(FakeResolver { link: link.clone() }),
        );
        (dispatcher, link)
    }

    fn targets(names: &[&str]) -> Vec<(Jid, MessagePayload)> {
        names
            .iter()
            .map(|n| (Jid::new(*n), MessagePayload::text("hi")))
            .collect()
    }

    #[tokio::test(start_paused = true)]
    async fn failed_target_is_counted_and_skipped() {
        let (dispatcher, link) = setup(&["b"]);
        let start = Instant::now();

        let job = dispatcher
            .dispatch(
                &SessionId::new("s1"),
                targets(&["a", "b", "c"]),
                Some(Duration::from_secs(2)),
            )
            .unwrap();
        let report = job.wait().await;

        assert_eq!(report.attempted, 3);
        assert_eq!(report.succeeded, 2);
        let sent = link.sent.lock().unwrap().clone();
        assert_eq!(sent, vec![Jid::new("a"), Jid::new("c")]);
        // Two inter-send gaps, failure or not.
        assert!(start.elapsed() >= Duration::from_secs(4));
    }

    #[tokio::test(start_paused = true)]
    async fn protected_target_never_reaches_transport() {
        let (dispatcher, link) = setup(&[]);

        let job = dispatcher
            .dispatch(
                &SessionId::new("s1"),
                targets(&["a", "status@broadcast", "c"]),
                Some(Duration::from_millis(1)),
            )
            .unwrap();
        let report = job.wait().await;

        assert_eq!(report.attempted, 3);
        assert_eq!(report.succeeded, 2);
        let sent = link.sent.lock().unwrap().clone();
        assert!(!sent.iter().any(|j| j.0.contains("status@broadcast")));
    }

    #[tokio::test]
    async fn burst_to_protected_target_is_rejected_up_front() {
        let (dispatcher, link) = setup(&[]);

        let err = dispatcher
            .burst(
                &SessionId::new("s1"),
                Jid::new("status@broadcast"),
                MessagePayload::text("x"),
            )
            .unwrap_err();
        assert!(matches!(err, Error::ProtectedTarget(_)));
        assert!(link.sent.lock().unwrap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn burst_repeats_fixed_count_to_one_target() {
        let (dispatcher, link) = setup(&[]);

        let job = dispatcher
            .burst(
                &SessionId::new("s1"),
                Jid::new("victim@host"),
                MessagePayload::text("x"),
            )
            .unwrap();
        let report = job.wait().await;

        assert_eq!(report.attempted, 5);
        assert_eq!(report.succeeded, 5);
        assert_eq!(link.sent.lock().unwrap().len(), 5);
    }

    #[tokio::test]
    async fn empty_and_oversized_jobs_fail_at_submit() {
        let (dispatcher, _) = setup(&[]);
        let id = SessionId::new("s1");

        let err = dispatcher.dispatch(&id, Vec::new(), None).unwrap_err();
        assert!(matches!(err, Error::InvalidRequest(_)));

        let too_many = (0..1_001)
            .map(|i| (Jid::new(format!("u{i}@host")), MessagePayload::text("hi")))
            .collect();
        let err = dispatcher.dispatch(&id, too_many, None).unwrap_err();
        assert!(matches!(
            err,
            Error::DispatchTooLarge {
                requested: 1_001,
                cap: 1_000
            }
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn abort_stops_between_sends() {
        let (dispatcher, link) = setup(&[]);

        let job = dispatcher
            .dispatch(
                &SessionId::new("s1"),
                targets(&["a", "b", "c"]),
                Some(Duration::from_secs(3600)),
            )
            .unwrap();

        // Let the first send land, then abort during the pacing sleep.
        while job.progress().attempted < 1 {
            tokio::task::yield_now().await;
        }
        job.abort();
        let report = job.wait().await;

        assert_eq!(report.attempted, 1);
        assert_eq!(report.succeeded, 1);
        assert_eq!(link.sent.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn report_never_exceeds_input_length() {
        let (dispatcher, _) = setup(&["a", "b", "c"]);

        let job = dispatcher
            .dispatch(
                &SessionId::new("s1"),
                targets(&["a", "b", "c"]),
                Some(Duration::from_millis(1)),
            )
            .unwrap();
        let report = job.wait().await;

        assert_eq!(report.attempted, 3);
        assert_eq!(report.succeeded, 0);
    }
}
