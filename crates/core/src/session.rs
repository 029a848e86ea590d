//! Session root: owns the store, the transition controller and every
//! background task for one signed-in client.
//!
//! All collaborators are injected through [`SessionDeps`]. Work spawned here
//! shares one cancellation token and never writes to the store once that
//! token is cancelled.
//!
//! `start` returns as soon as the store is seeded from the saved snapshot;
//! the first fetch runs on the reconciler. Await [`Session::synced`] for
//! fresh data.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::auth::{AuthState, Authenticator};
use crate::catalog::{StageCatalog, StageList};
use crate::config::{DEFAULT_POLL_INTERVAL_SECS, DEFAULT_SESSION_BUDGET_SECS};
use crate::error::{AuthError, GatewayError};
use crate::gateway::LeadGateway;
use crate::notify::{Notice, Notifier};
use crate::persist::LocalStore;
use crate::scheduler::{Scheduler, SessionSignal};
use crate::store::{LeadStore, RefetchReason};
use crate::transition::TransitionController;
use crate::types::{ClientId, Lead};

pub const EXPIRED_TITLE: &str = "Session expired";
pub const EXPIRED_MESSAGE: &str = "For your security, please log in again.";

pub struct SessionDeps {
    pub gateway: Arc<dyn LeadGateway>,
    pub catalog: Arc<StageCatalog>,
    pub auth: Arc<Authenticator>,
    pub notifier: Arc<dyn Notifier>,
    /// Snapshot storage; `None` disables the lead snapshot.
    pub local: Option<LocalStore>,
    pub poll_interval: Duration,
    pub session_budget: Duration,
}

impl SessionDeps {
    pub fn new(
        gateway: Arc<dyn LeadGateway>,
        catalog: Arc<StageCatalog>,
        auth: Arc<Authenticator>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        Self {
            gateway,
            catalog,
            auth,
            notifier,
            local: None,
            poll_interval: Duration::from_secs(DEFAULT_POLL_INTERVAL_SECS),
            session_budget: Duration::from_secs(DEFAULT_SESSION_BUDGET_SECS),
        }
    }
}

struct LeadSync {
    gateway: Arc<dyn LeadGateway>,
    store: LeadStore,
    stages: Arc<StageList>,
    local: Option<LocalStore>,
    client: ClientId,
}

impl LeadSync {
    async fn fetch(&self) -> Result<Vec<Lead>, GatewayError> {
        let leads = self.gateway.try_fetch_leads(&self.client).await?;
        Ok(self.stages.retain_known(leads))
    }

    fn save_snapshot(&self, leads: &[Lead]) {
        if let Some(local) = &self.local {
            if let Err(e) = local.save_snapshot(&self.client, leads) {
                warn!(client = %self.client, error = %e, "Could not save lead snapshot");
            }
        }
    }

    fn seed_from_snapshot(&self) {
        let Some(local) = &self.local else { return };
        match local.load_snapshot(&self.client) {
            Ok(leads) if !leads.is_empty() => {
                self.store.set_leads(self.stages.retain_known(leads));
            }
            Ok(_) => {}
            Err(e) => warn!(client = %self.client, error = %e, "Ignoring unreadable lead snapshot"),
        }
    }
}

pub struct Session {
    client: ClientId,
    store: LeadStore,
    stages: Arc<StageList>,
    controller: Arc<TransitionController>,
    cancel: CancellationToken,
    synced: watch::Receiver<bool>,
    scheduler: Scheduler,
}

impl Session {
    /// Start a session for the currently signed-in client.
    pub async fn start(deps: SessionDeps) -> Result<Self, AuthError> {
        let client = deps
            .auth
            .state()
            .client()
            .cloned()
            .ok_or(AuthError::NotSignedIn)?;

        let stages = deps.catalog.fetch_stages().await;
        let store = LeadStore::new();
        let sync = LeadSync {
            gateway: Arc::clone(&deps.gateway),
            store: store.clone(),
            stages: Arc::clone(&stages),
            local: deps.local.clone(),
            client: client.clone(),
        };

        sync.seed_from_snapshot();
        store.request_refetch(RefetchReason::Refresh);
        info!(%client, seeded = store.len(), stages = stages.len(), "Session started");

        let controller = Arc::new(TransitionController::new(
            Arc::clone(&deps.gateway),
            store.clone(),
            Arc::clone(&stages),
            Arc::clone(&deps.notifier),
            client.clone(),
        ));

        let cancel = CancellationToken::new();
        let mut scheduler = Scheduler::new(cancel.clone());
        let (signals_tx, signals_rx) = mpsc::channel(4);
        let (synced_tx, synced) = watch::channel(false);

        scheduler.spawn("reconciler", reconcile_loop(cancel.clone(), sync, synced_tx));
        scheduler.spawn_refresh_timer(
            deps.poll_interval,
            deps.session_budget,
            deps.auth.subscribe(),
            store.clone(),
        );
        scheduler.spawn_expiry_timer(deps.session_budget, signals_tx);
        scheduler.spawn(
            "session-signals",
            signal_loop(
                cancel.clone(),
                signals_rx,
                deps.auth.subscribe(),
                Arc::clone(&deps.auth),
                Arc::clone(&deps.notifier),
            ),
        );

        Ok(Self {
            client,
            store,
            stages,
            controller,
            cancel,
            synced,
            scheduler,
        })
    }

    pub fn client(&self) -> &ClientId {
        &self.client
    }

    pub fn store(&self) -> &LeadStore {
        &self.store
    }

    pub fn stages(&self) -> &Arc<StageList> {
        &self.stages
    }

    pub fn controller(&self) -> &Arc<TransitionController> {
        &self.controller
    }

    /// Resolves once the first fetch has landed, or the session has ended
    /// before it could.
    pub async fn synced(&self) {
        let mut rx = self.synced.clone();
        let _ = rx.wait_for(|done| *done).await;
    }

    /// User-initiated refresh.
    pub fn refresh(&self) {
        self.store.request_refetch(RefetchReason::Refresh);
    }

    pub fn is_active(&self) -> bool {
        !self.cancel.is_cancelled()
    }

    /// Resolves when the session ended (expiry, sign-out or shutdown).
    pub async fn closed(&self) {
        self.cancel.cancelled().await;
    }

    /// Stop all background work and wait for it.
    pub async fn shutdown(self) {
        debug!(client = %self.client, "Shutting down session");
        self.scheduler.shutdown().await;
    }
}

/// Consume store refetch requests one fetch at a time.
async fn reconcile_loop(cancel: CancellationToken, sync: LeadSync, synced: watch::Sender<bool>) {
    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            _ = sync.store.refetch_requested() => {}
        }

        while let Some(reason) = sync.store.begin_refetch() {
            debug!(client = %sync.client, ?reason, "Reconciling lead list");
            let fetched = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    sync.store.abandon_refetch();
                    return;
                }
                fetched = sync.fetch() => fetched,
            };
            if cancel.is_cancelled() {
                sync.store.abandon_refetch();
                return;
            }
            let leads = match fetched {
                Ok(leads) => {
                    sync.save_snapshot(&leads);
                    leads
                }
                Err(e) => {
                    warn!(client = %sync.client, error = %e, "Lead fetch failed, snapshot left as is");
                    Vec::new()
                }
            };
            sync.store.complete_refetch(leads);
            synced.send_replace(true);
        }
    }
}

/// React to timer signals and to sign-out from elsewhere.
async fn signal_loop(
    cancel: CancellationToken,
    mut signals: mpsc::Receiver<SessionSignal>,
    mut auth_rx: watch::Receiver<AuthState>,
    auth: Arc<Authenticator>,
    notifier: Arc<dyn Notifier>,
) {
    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            signal = signals.recv() => match signal {
                Some(SessionSignal::Expired) => {
                    if let Err(e) = auth.sign_out().await {
                        warn!(error = %e, "Sign-out on session expiry failed");
                    }
                    notifier.notify(Notice::info(EXPIRED_TITLE, EXPIRED_MESSAGE));
                    cancel.cancel();
                    break;
                }
                None => break,
            },
            changed = auth_rx.changed() => {
                if changed.is_err() || *auth_rx.borrow_and_update() == AuthState::SignedOut {
                    info!("Signed out, ending session");
                    cancel.cancel();
                    break;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::{Identity, IdentityProvider};
    use crate::catalog::StageSource;
    use crate::error::GatewayError;
    use crate::notify::{NoticeLevel, RecordingNotifier};
    use crate::store::StorePhase;
    use crate::types::{LeadId, Stage, StageId};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::Mutex;
    use tokio::sync::Notify;

    struct FakeGateway {
        leads: Mutex<Vec<Lead>>,
        fetches: AtomicUsize,
        hold: Mutex<Option<Arc<Notify>>>,
        offline: AtomicBool,
    }

    impl FakeGateway {
        fn new(leads: Vec<Lead>) -> Arc<Self> {
            Arc::new(Self {
                leads: Mutex::new(leads),
                fetches: AtomicUsize::new(0),
                hold: Mutex::new(None),
                offline: AtomicBool::new(false),
            })
        }

        fn fetches(&self) -> usize {
            self.fetches.load(Ordering::SeqCst)
        }

        fn set_leads(&self, leads: Vec<Lead>) {
            *self.leads.lock().unwrap() = leads;
        }
    }

    #[async_trait]
    impl LeadGateway for FakeGateway {
        async fn fetch_leads(&self, _client: &ClientId) -> Vec<Lead> {
            self.fetches.fetch_add(1, Ordering::SeqCst);
            let hold = self.hold.lock().unwrap().clone();
            if let Some(hold) = hold {
                hold.notified().await;
            }
            self.leads.lock().unwrap().clone()
        }

        async fn try_fetch_leads(&self, client: &ClientId) -> Result<Vec<Lead>, GatewayError> {
            let leads = self.fetch_leads(client).await;
            if self.offline.load(Ordering::SeqCst) {
                return Err(GatewayError::Status {
                    url: "fake://leads".into(),
                    status: 503,
                });
            }
            Ok(leads)
        }

        async fn update_lead_stage(&self, lead: &LeadId, stage: StageId, _client: &ClientId) -> bool {
            let mut leads = self.leads.lock().unwrap();
            match leads.iter_mut().find(|l| &l.id == lead) {
                Some(l) => {
                    l.current_stage_id = stage;
                    true
                }
                None => false,
            }
        }

        fn name(&self) -> &str {
            "fake"
        }
    }

    struct TwoStages;

    #[async_trait]
    impl StageSource for TwoStages {
        async fn fetch_stages(&self) -> Result<Vec<Stage>, GatewayError> {
            Ok(vec![Stage::new(1, "New Lead"), Stage::new(2, "Contacted")])
        }
    }

    struct StaticProvider;

    #[async_trait]
    impl IdentityProvider for StaticProvider {
        async fn current_session(&self) -> Result<Option<Identity>, AuthError> {
            Ok(Some(Identity {
                user_id: "u1".into(),
                email: None,
                client: Some(ClientId::new("acme")),
            }))
        }

        async fn sign_in(&self, _email: &str, _password: &str) -> Result<Identity, AuthError> {
            Err(AuthError::SignInFailed("not used".into()))
        }

        async fn sign_out(&self) -> Result<(), AuthError> {
            Ok(())
        }
    }

    struct Harness {
        gateway: Arc<FakeGateway>,
        auth: Arc<Authenticator>,
        notifier: Arc<RecordingNotifier>,
        local: LocalStore,
        _dir: tempfile::TempDir,
    }

    impl Harness {
        async fn new(leads: Vec<Lead>) -> Self {
            let dir = tempfile::tempdir().unwrap();
            let local = LocalStore::new(dir.path());
            let auth = Arc::new(Authenticator::new(Arc::new(StaticProvider), local.clone()));
            auth.restore().await;
            Self {
                gateway: FakeGateway::new(leads),
                auth,
                notifier: Arc::new(RecordingNotifier::new()),
                local,
                _dir: dir,
            }
        }

        fn deps(&self) -> SessionDeps {
            let mut deps = SessionDeps::new(
                self.gateway.clone(),
                Arc::new(StageCatalog::new(Arc::new(TwoStages))),
                Arc::clone(&self.auth),
                self.notifier.clone(),
            );
            deps.local = Some(self.local.clone());
            deps
        }
    }

    async fn wait_until(cond: impl Fn() -> bool) {
        tokio::time::timeout(Duration::from_secs(5), async {
            while !cond() {
                tokio::task::yield_now().await;
            }
        })
        .await
        .expect("condition not reached");
    }

    async fn next_version(rx: &mut watch::Receiver<u64>) {
        tokio::time::timeout(Duration::from_secs(5), rx.changed())
            .await
            .expect("store change")
            .unwrap();
    }

    #[tokio::test]
    async fn start_requires_signed_in_client() {
        let dir = tempfile::tempdir().unwrap();
        let auth = Arc::new(Authenticator::new(
            Arc::new(StaticProvider),
            LocalStore::new(dir.path()),
        ));
        let deps = SessionDeps::new(
            FakeGateway::new(vec![]),
            Arc::new(StageCatalog::new(Arc::new(TwoStages))),
            auth,
            Arc::new(RecordingNotifier::new()),
        );
        assert!(matches!(Session::start(deps).await, Err(AuthError::NotSignedIn)));
    }

    #[tokio::test]
    async fn start_fetches_filters_and_snapshots() {
        let h = Harness::new(vec![
            Lead::new("L1", "Ada", StageId(1)),
            Lead::new("L9", "Stray", StageId(42)),
        ])
        .await;
        let session = Session::start(h.deps()).await.unwrap();
        session.synced().await;

        assert_eq!(session.client(), &ClientId::new("acme"));
        assert_eq!(session.stages().len(), 2);
        assert_eq!(session.store().len(), 1);
        assert_eq!(h.gateway.fetches(), 1);
        assert_eq!(h.local.load_snapshot(&ClientId::new("acme")).unwrap().len(), 1);
        session.shutdown().await;
    }

    #[tokio::test]
    async fn snapshot_seeds_store_with_known_stages() {
        let h = Harness::new(vec![]).await;
        let acme = ClientId::new("acme");
        h.local
            .save_snapshot(
                &acme,
                &[
                    Lead::new("S1", "Saved", StageId(2)),
                    Lead::new("S2", "Stray", StageId(42)),
                ],
            )
            .unwrap();

        let sync = LeadSync {
            gateway: h.gateway.clone(),
            store: LeadStore::new(),
            stages: Arc::new(StageList::defaults()),
            local: Some(h.local.clone()),
            client: acme,
        };
        sync.seed_from_snapshot();

        let ids: Vec<String> = sync.store.leads().into_iter().map(|l| l.id.0).collect();
        assert_eq!(ids, vec!["S1"]);
        assert_eq!(h.gateway.fetches(), 0);
    }

    #[tokio::test]
    async fn snapshot_is_visible_until_first_fetch_lands() {
        let h = Harness::new(vec![Lead::new("L1", "Fresh", StageId(2))]).await;
        let acme = ClientId::new("acme");
        h.local
            .save_snapshot(&acme, &[Lead::new("S1", "Saved", StageId(1))])
            .unwrap();
        let hold = Arc::new(Notify::new());
        h.gateway.hold.lock().unwrap().replace(Arc::clone(&hold));

        let session = Session::start(h.deps()).await.unwrap();
        let ids: Vec<String> = session.store().leads().into_iter().map(|l| l.id.0).collect();
        assert_eq!(ids, vec!["S1"]);

        let gateway = h.gateway.clone();
        wait_until(move || gateway.fetches() >= 1).await;
        assert_eq!(session.store().get(&LeadId::from("S1")).unwrap().name, "Saved");

        hold.notify_one();
        session.synced().await;
        let ids: Vec<String> = session.store().leads().into_iter().map(|l| l.id.0).collect();
        assert_eq!(ids, vec!["L1"]);
        assert_eq!(h.local.load_snapshot(&acme).unwrap()[0].id.as_str(), "L1");
        session.shutdown().await;
    }

    #[tokio::test]
    async fn unreachable_backend_keeps_saved_snapshot() {
        let h = Harness::new(vec![]).await;
        let acme = ClientId::new("acme");
        h.local
            .save_snapshot(&acme, &[Lead::new("S1", "Saved", StageId(1))])
            .unwrap();
        h.gateway.offline.store(true, Ordering::SeqCst);

        let session = Session::start(h.deps()).await.unwrap();
        assert_eq!(session.store().len(), 1);
        session.synced().await;

        assert!(session.store().is_empty());
        let saved = h.local.load_snapshot(&acme).unwrap();
        assert_eq!(saved.len(), 1);
        assert_eq!(saved[0].id.as_str(), "S1");
        session.shutdown().await;
    }

    #[tokio::test]
    async fn reachable_empty_result_replaces_snapshot() {
        let h = Harness::new(vec![]).await;
        let acme = ClientId::new("acme");
        h.local
            .save_snapshot(&acme, &[Lead::new("S1", "Saved", StageId(1))])
            .unwrap();

        let session = Session::start(h.deps()).await.unwrap();
        session.synced().await;

        assert!(session.store().is_empty());
        assert!(h.local.load_snapshot(&acme).unwrap().is_empty());
        session.shutdown().await;
    }

    #[tokio::test]
    async fn mutation_triggers_reconciling_fetch() {
        let h = Harness::new(vec![Lead::new("L1", "Ada", StageId(1))]).await;
        let session = Session::start(h.deps()).await.unwrap();
        session.synced().await;
        let mut changes = session.store().subscribe();
        changes.borrow_and_update();

        let lead = session.store().get(&LeadId::from("L1")).unwrap();
        session.controller().advance(&lead).await;
        // Local apply, then the reconciler's fetch.
        next_version(&mut changes).await;
        let store = session.store().clone();
        let gateway = h.gateway.clone();
        wait_until(move || gateway.fetches() >= 2 && store.phase() == StorePhase::Idle).await;

        assert_eq!(
            session.store().get(&lead.id).unwrap().current_stage_id,
            StageId(2)
        );
        assert!(!session.store().mutation_flag());
        session.shutdown().await;
    }

    #[tokio::test]
    async fn manual_refresh_replaces_store() {
        let h = Harness::new(vec![Lead::new("L1", "Ada", StageId(1))]).await;
        let session = Session::start(h.deps()).await.unwrap();
        session.synced().await;
        let mut changes = session.store().subscribe();
        changes.borrow_and_update();

        h.gateway.set_leads(vec![
            Lead::new("L1", "Ada", StageId(1)),
            Lead::new("L2", "Bea", StageId(2)),
        ]);
        session.refresh();
        next_version(&mut changes).await;

        assert_eq!(session.store().len(), 2);
        session.shutdown().await;
    }

    #[tokio::test]
    async fn fetch_result_after_shutdown_is_discarded() {
        let h = Harness::new(vec![Lead::new("L1", "Ada", StageId(1))]).await;
        let session = Session::start(h.deps()).await.unwrap();
        session.synced().await;
        let store = session.store().clone();
        let hold = Arc::new(Notify::new());
        h.gateway.hold.lock().unwrap().replace(Arc::clone(&hold));
        h.gateway.set_leads(vec![]);

        session.refresh();
        let gateway = h.gateway.clone();
        wait_until(move || gateway.fetches() >= 2).await;
        session.shutdown().await;
        hold.notify_waiters();

        assert_eq!(store.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn expiry_signs_out_and_notifies_once() {
        let h = Harness::new(vec![]).await;
        let session = Session::start(h.deps()).await.unwrap();

        session.closed().await;
        assert!(!session.is_active());
        assert_eq!(h.auth.state(), AuthState::SignedOut);
        let notices = h.notifier.notices();
        assert_eq!(notices.len(), 1);
        assert_eq!(notices[0].level, NoticeLevel::Info);
        assert_eq!(notices[0].title, EXPIRED_TITLE);
        assert_eq!(notices[0].description, EXPIRED_MESSAGE);
        session.shutdown().await;
    }

    #[tokio::test]
    async fn external_sign_out_ends_session() {
        let h = Harness::new(vec![]).await;
        let session = Session::start(h.deps()).await.unwrap();

        h.auth.sign_out().await.unwrap();
        tokio::time::timeout(Duration::from_secs(5), session.closed())
            .await
            .expect("session should close");
        assert!(h.notifier.notices().is_empty());
        session.shutdown().await;
    }
}
