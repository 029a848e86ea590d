//! Per-lead stage transitions.
//!
//! A lead's state is its current stage id; the only moves are one step
//! forward (the primary action) or one step back. The gateway call is fully
//! settled before any local change: on confirmed success the store entry and
//! the selected-lead view are updated and a reconciling refetch is requested;
//! on failure nothing local changes and exactly one error notice is raised.

use std::collections::HashSet;
use std::sync::{Arc, Mutex, RwLock};

use chrono::Utc;
use tracing::{debug, info, warn};

use crate::catalog::StageList;
use crate::gateway::LeadGateway;
use crate::notify::{Notice, Notifier};
use crate::store::{LeadStore, RefetchReason};
use crate::types::{ClientId, Lead, LeadId, StageId};

/// Title/description of the notice raised when the backend refuses a move.
pub const UPDATE_FAILED_TITLE: &str = "Error";
pub const UPDATE_FAILED_MESSAGE: &str = "Failed to update lead stage. Please try again.";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Forward,
    Backward,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransitionOutcome {
    /// Backend confirmed the move and local state was updated.
    Applied {
        lead: LeadId,
        from: StageId,
        to: StageId,
    },
    /// No legal move in that direction (boundary stage or unknown stage id).
    NoTransition,
    /// A transition for this lead is still in flight.
    AlreadyPending,
    /// The lead is not in the store.
    UnknownLead,
    /// The backend refused or the request failed. Local state is unchanged.
    Failed,
}

/// Removes the lead from the in-flight set however the transition ends.
struct PendingGuard<'a> {
    pending: &'a Mutex<HashSet<LeadId>>,
    id: LeadId,
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        match self.pending.lock() {
            Ok(mut set) => {
                set.remove(&self.id);
            }
            Err(e) => tracing::error!("TransitionController pending lock poisoned during release: {e}"),
        }
    }
}

pub struct TransitionController {
    gateway: Arc<dyn LeadGateway>,
    store: LeadStore,
    stages: Arc<StageList>,
    notifier: Arc<dyn Notifier>,
    client: ClientId,
    pending: Mutex<HashSet<LeadId>>,
    selected: RwLock<Option<Lead>>,
}

impl TransitionController {
    pub fn new(
        gateway: Arc<dyn LeadGateway>,
        store: LeadStore,
        stages: Arc<StageList>,
        notifier: Arc<dyn Notifier>,
        client: ClientId,
    ) -> Self {
        Self {
            gateway,
            store,
            stages,
            notifier,
            client,
            pending: Mutex::new(HashSet::new()),
            selected: RwLock::new(None),
        }
    }

    pub fn stages(&self) -> &Arc<StageList> {
        &self.stages
    }

    /// Target of a move in `direction`, or `None` if no move is offered.
    pub fn target_for(&self, lead: &Lead, direction: Direction) -> Option<StageId> {
        let target = match direction {
            Direction::Forward => self.stages.next_stage_id(lead.current_stage_id),
            Direction::Backward => self.stages.previous_stage_id(lead.current_stage_id),
        }?;
        (target != lead.current_stage_id).then_some(target)
    }

    /// The forward move a front end should offer; `None` at the terminal stage.
    pub fn offered_next(&self, lead: &Lead) -> Option<StageId> {
        self.target_for(lead, Direction::Forward)
    }

    pub fn is_pending(&self, id: &LeadId) -> bool {
        match self.pending.lock() {
            Ok(set) => set.contains(id),
            Err(e) => {
                tracing::error!("TransitionController pending lock poisoned during read: {e}");
                false
            }
        }
    }

    pub async fn advance(&self, lead: &Lead) -> TransitionOutcome {
        self.transition(lead, Direction::Forward).await
    }

    pub async fn retreat(&self, lead: &Lead) -> TransitionOutcome {
        self.transition(lead, Direction::Backward).await
    }

    /// Look the lead up in the store, then transition it.
    pub async fn transition_by_id(&self, id: &LeadId, direction: Direction) -> TransitionOutcome {
        match self.store.get(id) {
            Some(lead) => self.transition(&lead, direction).await,
            None => {
                debug!(lead_id = %id, "Transition requested for unknown lead");
                TransitionOutcome::UnknownLead
            }
        }
    }

    /// Moves are computed from the cached lead when there is one, not from
    /// the caller's copy.
    pub async fn transition(&self, lead: &Lead, direction: Direction) -> TransitionOutcome {
        let cached = self.store.get(&lead.id);
        let lead = cached.as_ref().unwrap_or(lead);
        let Some(target) = self.target_for(lead, direction) else {
            debug!(lead_id = %lead.id, stage_id = %lead.current_stage_id, ?direction, "No transition offered");
            return TransitionOutcome::NoTransition;
        };

        let Some(_guard) = self.try_begin(&lead.id) else {
            debug!(lead_id = %lead.id, "Transition already pending");
            return TransitionOutcome::AlreadyPending;
        };

        let confirmed = self
            .gateway
            .update_lead_stage(&lead.id, target, &self.client)
            .await;

        if !confirmed {
            warn!(
                lead_id = %lead.id,
                from = %lead.current_stage_id,
                to = %target,
                gateway = self.gateway.name(),
                "Stage transition failed"
            );
            self.notifier
                .notify(Notice::error(UPDATE_FAILED_TITLE, UPDATE_FAILED_MESSAGE));
            return TransitionOutcome::Failed;
        }

        let at = Utc::now();
        if !self.store.apply_stage_change(&lead.id, target, at) {
            debug!(lead_id = %lead.id, "Confirmed lead is not cached, waiting for refetch");
        }
        self.update_selected(&lead.id, target, at);
        self.store.request_refetch(RefetchReason::Mutation);

        let stage_name = self.stages.name_of(target);
        info!(
            lead_id = %lead.id,
            from = %lead.current_stage_id,
            to = %target,
            stage = %stage_name,
            "Stage transition applied"
        );
        self.notifier.notify(Notice::success(
            "Stage Updated",
            format!("Lead moved to {stage_name}"),
        ));

        TransitionOutcome::Applied {
            lead: lead.id.clone(),
            from: lead.current_stage_id,
            to: target,
        }
    }

    fn try_begin(&self, id: &LeadId) -> Option<PendingGuard<'_>> {
        let inserted = match self.pending.lock() {
            Ok(mut set) => set.insert(id.clone()),
            Err(e) => {
                tracing::error!("TransitionController pending lock poisoned during begin: {e}");
                false
            }
        };
        inserted.then(|| PendingGuard {
            pending: &self.pending,
            id: id.clone(),
        })
    }

    // -- Selected lead (detail view) -------------------------------------------

    /// Select a cached lead for the detail view.
    pub fn select(&self, id: &LeadId) -> Option<Lead> {
        let lead = self.store.get(id);
        match self.selected.write() {
            Ok(mut guard) => *guard = lead.clone(),
            Err(e) => tracing::error!("TransitionController selection lock poisoned during select: {e}"),
        }
        lead
    }

    pub fn selected(&self) -> Option<Lead> {
        match self.selected.read() {
            Ok(guard) => guard.clone(),
            Err(e) => {
                tracing::error!("TransitionController selection lock poisoned during read: {e}");
                None
            }
        }
    }

    pub fn clear_selection(&self) {
        match self.selected.write() {
            Ok(mut guard) => *guard = None,
            Err(e) => tracing::error!("TransitionController selection lock poisoned during clear: {e}"),
        }
    }

    fn update_selected(&self, id: &LeadId, stage: StageId, at: chrono::DateTime<Utc>) {
        match self.selected.write() {
            Ok(mut guard) => {
                if let Some(lead) = guard.as_mut().filter(|l| &l.id == id) {
                    lead.current_stage_id = stage;
                    lead.last_update = at;
                }
            }
            Err(e) => tracing::error!("TransitionController selection lock poisoned during update: {e}"),
        }
    }
}
