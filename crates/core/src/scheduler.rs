//! Session background timers.
//!
//! Every task spawned here is tied to one [`CancellationToken`]; cancelling
//! it stops all of them and [`Scheduler::shutdown`] joins them.
//!
//! - refresh timer: each `poll_interval`, if a client is signed in, raise a
//!   refresh request on the store. Stops on its own once `session_budget`
//!   has elapsed since it started.
//! - expiry timer: each `session_budget`, post [`SessionSignal::Expired`].

use std::future::Future;
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{interval_at, sleep_until, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::auth::AuthState;
use crate::store::{LeadStore, RefetchReason};

/// Messages from background timers to the session root.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionSignal {
    Expired,
}

pub struct Scheduler {
    cancel: CancellationToken,
    tasks: Vec<(&'static str, JoinHandle<()>)>,
}

impl Scheduler {
    pub fn new(cancel: CancellationToken) -> Self {
        Self {
            cancel,
            tasks: Vec::new(),
        }
    }

    pub fn token(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Spawn a session-scoped task. The future is expected to watch the token.
    pub fn spawn<F>(&mut self, name: &'static str, fut: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        debug!(task = name, "Spawning session task");
        self.tasks.push((name, tokio::spawn(fut)));
    }

    pub fn spawn_refresh_timer(
        &mut self,
        period: Duration,
        budget: Duration,
        auth: watch::Receiver<AuthState>,
        store: LeadStore,
    ) {
        let cancel = self.cancel.clone();
        self.spawn("refresh-timer", refresh_loop(cancel, period, budget, auth, store));
    }

    pub fn spawn_expiry_timer(&mut self, budget: Duration, signals: mpsc::Sender<SessionSignal>) {
        let cancel = self.cancel.clone();
        self.spawn("expiry-timer", expiry_loop(cancel, budget, signals));
    }

    /// Cancel every task and wait for them to finish.
    pub async fn shutdown(self) {
        self.cancel.cancel();
        for (name, task) in self.tasks {
            if let Err(e) = task.await {
                warn!(task = name, error = %e, "Session task join failed");
            }
        }
    }
}

async fn refresh_loop(
    cancel: CancellationToken,
    period: Duration,
    budget: Duration,
    auth: watch::Receiver<AuthState>,
    store: LeadStore,
) {
    let start = Instant::now();
    let mut ticker = interval_at(start + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let budget_elapsed = sleep_until(start + budget);
    tokio::pin!(budget_elapsed);

    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            _ = &mut budget_elapsed => {
                info!(budget_secs = budget.as_secs(), "Session budget elapsed, refresh timer stopped");
                break;
            }
            _ = ticker.tick() => {
                let state = auth.borrow().clone();
                match state {
                    AuthState::SignedIn(client) => {
                        debug!(%client, "Background refresh requested");
                        store.request_refetch(RefetchReason::Refresh);
                    }
                    AuthState::Resolving | AuthState::SignedOut => {
                        debug!(?state, "Skipping background refresh");
                    }
                }
            }
        }
    }
}

async fn expiry_loop(cancel: CancellationToken, budget: Duration, signals: mpsc::Sender<SessionSignal>) {
    let mut ticker = interval_at(Instant::now() + budget, budget);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {
                info!("Session expired");
                if signals.send(SessionSignal::Expired).await.is_err() {
                    debug!("Session signal receiver dropped, expiry timer stopped");
                    break;
                }
            }
        }
    }
}
