//! Session-wide lead cache.
//!
//! [`LeadStore`] holds the last known lead list for the session and a small
//! refetch state machine:
//!
//! ```text
//!   Idle ──request_refetch──▶ StalePendingRefetch ──begin_refetch──▶ Fetching
//!    ▲                                ▲                                 │
//!    └──────── complete (no flags) ───┴──── complete (flag re-raised) ──┘
//! ```
//!
//! Requests raise `refresh_flag` or `mutation_flag`; the session reconciler
//! consumes them through [`LeadStore::begin_refetch`]. A request raised while
//! a fetch is running keeps its flag, so completion lands in
//! `StalePendingRefetch` and another fetch follows.
//!
//! There is no merge logic: [`LeadStore::set_leads`] replaces the whole list
//! and the last writer wins.

use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use chrono::{DateTime, Utc};
use tokio::sync::{watch, Notify};

use crate::types::{Lead, LeadId, StageId};

/// Refetch state of the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorePhase {
    /// Cache reflects the most recent fetch; nothing requested.
    Idle,
    /// A reconciling fetch is in flight.
    Fetching,
    /// A refetch was requested and has not started yet.
    StalePendingRefetch,
}

/// Why a refetch was requested.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefetchReason {
    /// Unconditional refresh (user or timer).
    Refresh,
    /// Reconcile after a confirmed stage mutation.
    Mutation,
}

#[derive(Debug)]
struct StoreInner {
    leads: Vec<Lead>,
    phase: StorePhase,
    refresh_flag: bool,
    mutation_flag: bool,
    version: u64,
}

impl StoreInner {
    fn any_flag(&self) -> bool {
        self.refresh_flag || self.mutation_flag
    }

    fn settle_phase(&mut self) {
        self.phase = match (self.phase, self.any_flag()) {
            (StorePhase::Fetching, _) => StorePhase::Fetching,
            (_, true) => StorePhase::StalePendingRefetch,
            (_, false) => StorePhase::Idle,
        };
    }
}

/// Shared, cloneable handle to the session's lead cache.
#[derive(Clone)]
pub struct LeadStore {
    inner: Arc<RwLock<StoreInner>>,
    wake: Arc<Notify>,
    changes: Arc<watch::Sender<u64>>,
}

impl LeadStore {
    pub fn new() -> Self {
        Self::with_leads(Vec::new())
    }

    pub fn with_leads(leads: Vec<Lead>) -> Self {
        let (changes, _) = watch::channel(0);
        Self {
            inner: Arc::new(RwLock::new(StoreInner {
                leads,
                phase: StorePhase::Idle,
                refresh_flag: false,
                mutation_flag: false,
                version: 0,
            })),
            wake: Arc::new(Notify::new()),
            changes: Arc::new(changes),
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, StoreInner> {
        self.inner.read().unwrap_or_else(|e| {
            tracing::error!("LeadStore lock poisoned during read, recovering");
            e.into_inner()
        })
    }

    fn write(&self) -> RwLockWriteGuard<'_, StoreInner> {
        self.inner.write().unwrap_or_else(|e| {
            tracing::error!("LeadStore lock poisoned during write, recovering");
            e.into_inner()
        })
    }

    // -- Leads ----------------------------------------------------------------

    /// Snapshot of the cached leads in server response order.
    pub fn leads(&self) -> Vec<Lead> {
        self.read().leads.clone()
    }

    pub fn get(&self, id: &LeadId) -> Option<Lead> {
        self.read().leads.iter().find(|l| &l.id == id).cloned()
    }

    pub fn len(&self) -> usize {
        self.read().leads.len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().leads.is_empty()
    }

    /// Replace the cached list wholesale.
    pub fn set_leads(&self, leads: Vec<Lead>) {
        let version = {
            let mut inner = self.write();
            inner.leads = leads;
            inner.version += 1;
            inner.version
        };
        self.changes.send_replace(version);
    }

    /// Update one lead's stage after a confirmed mutation.
    /// Returns `false` if the lead is not cached.
    pub fn apply_stage_change(&self, id: &LeadId, stage: StageId, at: DateTime<Utc>) -> bool {
        let version = {
            let mut inner = self.write();
            let Some(lead) = inner.leads.iter_mut().find(|l| &l.id == id) else {
                return false;
            };
            lead.current_stage_id = stage;
            lead.last_update = at;
            inner.version += 1;
            inner.version
        };
        self.changes.send_replace(version);
        true
    }

    /// Monotonic counter bumped on every change to the lead list.
    pub fn version(&self) -> u64 {
        self.read().version
    }

    /// Receiver that observes [`Self::version`] changes.
    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.changes.subscribe()
    }

    // -- Flags ----------------------------------------------------------------

    pub fn refresh_flag(&self) -> bool {
        self.read().refresh_flag
    }

    pub fn mutation_flag(&self) -> bool {
        self.read().mutation_flag
    }

    pub fn set_refresh_flag(&self, value: bool) {
        if value {
            self.request_refetch(RefetchReason::Refresh);
        } else {
            let mut inner = self.write();
            inner.refresh_flag = false;
            inner.settle_phase();
        }
    }

    pub fn set_mutation_flag(&self, value: bool) {
        if value {
            self.request_refetch(RefetchReason::Mutation);
        } else {
            let mut inner = self.write();
            inner.mutation_flag = false;
            inner.settle_phase();
        }
    }

    // -- Refetch state machine ------------------------------------------------

    pub fn phase(&self) -> StorePhase {
        self.read().phase
    }

    /// Raise a refetch request and wake the reconciler.
    pub fn request_refetch(&self, reason: RefetchReason) {
        {
            let mut inner = self.write();
            match reason {
                RefetchReason::Refresh => inner.refresh_flag = true,
                RefetchReason::Mutation => inner.mutation_flag = true,
            }
            inner.settle_phase();
        }
        self.wake.notify_one();
    }

    /// Consume pending requests and enter `Fetching`.
    ///
    /// Returns `None` when nothing is pending or a fetch is already running.
    /// A pending mutation takes precedence as the reported reason; both flags
    /// are cleared either way since one fetch satisfies both.
    pub fn begin_refetch(&self) -> Option<RefetchReason> {
        let mut inner = self.write();
        if inner.phase == StorePhase::Fetching || !inner.any_flag() {
            return None;
        }
        let reason = if inner.mutation_flag {
            RefetchReason::Mutation
        } else {
            RefetchReason::Refresh
        };
        inner.refresh_flag = false;
        inner.mutation_flag = false;
        inner.phase = StorePhase::Fetching;
        Some(reason)
    }

    /// Apply the result of a fetch started by [`Self::begin_refetch`].
    pub fn complete_refetch(&self, leads: Vec<Lead>) {
        let (version, pending) = {
            let mut inner = self.write();
            inner.leads = leads;
            inner.version += 1;
            inner.phase = StorePhase::Idle;
            inner.settle_phase();
            (inner.version, inner.any_flag())
        };
        self.changes.send_replace(version);
        if pending {
            self.wake.notify_one();
        }
    }

    /// Leave `Fetching` without touching the cache (session torn down mid-fetch).
    pub fn abandon_refetch(&self) {
        let mut inner = self.write();
        if inner.phase == StorePhase::Fetching {
            inner.phase = StorePhase::Idle;
            inner.settle_phase();
        }
    }

    /// Resolves once a refetch request has been raised since the last wake-up.
    pub async fn refetch_requested(&self) {
        self.wake.notified().await;
    }
}

impl Default for LeadStore {
    fn default() -> Self {
        Self::new()
    }
}
