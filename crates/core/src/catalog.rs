//! Stage catalog: the ordered pipeline stages for the session.
//!
//! [`StageCatalog`] fetches the stage list from the backend once and memoizes
//! it. When the backend is unreachable, misconfigured or returns nothing, the
//! built-in seven-stage pipeline is returned instead and **not** cached, so a
//! later call retries the backend.
//!
//! All navigation (index, next, previous, validity) lives on [`StageList`],
//! the immutable resolved sequence.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use tracing::{debug, info, warn};

use crate::error::GatewayError;
use crate::types::{Lead, Stage, StageId};

/// Names of the built-in pipeline, ids `1..=7` in order.
pub const DEFAULT_STAGE_NAMES: [&str; 7] = [
    "New Lead",
    "Contacted",
    "Follow-Up",
    "Proposal Sent",
    "Sold",
    "In Progress",
    "Completed",
];

/// Remote source of the stage list.
#[async_trait]
pub trait StageSource: Send + Sync {
    async fn fetch_stages(&self) -> Result<Vec<Stage>, GatewayError>;
}

/// Immutable, strictly ordered stage sequence. Order defines progression.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StageList {
    stages: Vec<Stage>,
}

impl StageList {
    /// Build a list from catalog order. Later entries repeating an earlier id
    /// are dropped so ids stay unique.
    pub fn new(stages: Vec<Stage>) -> Self {
        let mut unique: Vec<Stage> = Vec::with_capacity(stages.len());
        for stage in stages {
            if unique.iter().any(|s| s.id == stage.id) {
                warn!(stage_id = %stage.id, name = %stage.name, "Dropping duplicate stage id");
                continue;
            }
            unique.push(stage);
        }
        Self { stages: unique }
    }

    /// The built-in pipeline: `New Lead` (1) through `Completed` (7).
    pub fn defaults() -> Self {
        Self {
            stages: DEFAULT_STAGE_NAMES
                .iter()
                .zip(1..)
                .map(|(name, id)| Stage::new(id, *name))
                .collect(),
        }
    }

    pub fn stages(&self) -> &[Stage] {
        &self.stages
    }

    pub fn len(&self) -> usize {
        self.stages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    pub fn get(&self, id: StageId) -> Option<&Stage> {
        self.stages.iter().find(|s| s.id == id)
    }

    pub fn index_of(&self, id: StageId) -> Option<usize> {
        self.stages.iter().position(|s| s.id == id)
    }

    /// Stage immediately after `id`, or `None` at the end or for unknown ids.
    pub fn next_stage_id(&self, id: StageId) -> Option<StageId> {
        let idx = self.index_of(id)?;
        self.stages.get(idx + 1).map(|s| s.id)
    }

    /// Stage immediately before `id`, or `None` at the start or for unknown ids.
    pub fn previous_stage_id(&self, id: StageId) -> Option<StageId> {
        let idx = self.index_of(id)?;
        idx.checked_sub(1).map(|i| self.stages[i].id)
    }

    pub fn is_valid(&self, id: StageId) -> bool {
        self.index_of(id).is_some()
    }

    /// True for the last catalog entry.
    pub fn is_terminal(&self, id: StageId) -> bool {
        self.stages.last().is_some_and(|s| s.id == id)
    }

    /// Display name for `id`, falling back to the built-in names while the
    /// catalog is not loaded. Unknown ids render as an empty string.
    pub fn name_of(&self, id: StageId) -> String {
        if let Some(stage) = self.get(id) {
            return stage.name.clone();
        }
        usize::try_from(id.0)
            .ok()
            .and_then(|n| n.checked_sub(1))
            .and_then(|i| DEFAULT_STAGE_NAMES.get(i))
            .map(|s| s.to_string())
            .unwrap_or_default()
    }

    /// Keep only leads whose stage is in this list. An empty list keeps
    /// everything since nothing is known yet.
    pub fn retain_known(&self, leads: Vec<Lead>) -> Vec<Lead> {
        if self.is_empty() {
            return leads;
        }
        let total = leads.len();
        let kept: Vec<Lead> = leads
            .into_iter()
            .filter(|l| self.is_valid(l.current_stage_id))
            .collect();
        if kept.len() < total {
            debug!(dropped = total - kept.len(), "Dropped leads with unknown stage ids");
        }
        kept
    }
}

/// Memoizing client for the remote stage list.
pub struct StageCatalog {
    source: Arc<dyn StageSource>,
    cached: RwLock<Option<Arc<StageList>>>,
    loading: AtomicBool,
}

/// Clears the in-flight flag however the fetch future ends.
struct LoadingGuard<'a>(&'a AtomicBool);

impl Drop for LoadingGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

impl StageCatalog {
    pub fn new(source: Arc<dyn StageSource>) -> Self {
        Self {
            source,
            cached: RwLock::new(None),
            loading: AtomicBool::new(false),
        }
    }

    /// Resolve the stage list.
    ///
    /// Returns the memoized list after the first successful fetch. A caller
    /// arriving while another fetch is in flight gets [`Self::current`]
    /// immediately (possibly empty) rather than waiting.
    pub async fn fetch_stages(&self) -> Arc<StageList> {
        if let Some(list) = self.cached() {
            return list;
        }

        if self
            .loading
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            debug!("Stage fetch already in flight, returning known catalog");
            return self.current();
        }
        let _guard = LoadingGuard(&self.loading);

        // A fetch may have completed between the cache check and the flag swap.
        if let Some(list) = self.cached() {
            return list;
        }

        match self.source.fetch_stages().await {
            Ok(stages) if !stages.is_empty() => {
                let list = Arc::new(StageList::new(stages));
                info!(count = list.len(), "Fetched stages from backend");
                match self.cached.write() {
                    Ok(mut guard) => *guard = Some(Arc::clone(&list)),
                    Err(e) => tracing::error!("StageCatalog cache lock poisoned during store: {e}"),
                }
                list
            }
            Ok(_) => {
                warn!("Backend returned an empty stage list, using default stages");
                Arc::new(StageList::defaults())
            }
            Err(e) => {
                warn!(error = %e, "Stage fetch failed, using default stages");
                Arc::new(StageList::defaults())
            }
        }
    }

    /// The memoized list, or an empty list when nothing has been fetched yet.
    pub fn current(&self) -> Arc<StageList> {
        self.cached().unwrap_or_default()
    }

    fn cached(&self) -> Option<Arc<StageList>> {
        match self.cached.read() {
            Ok(guard) => guard.clone(),
            Err(e) => {
                tracing::error!("StageCatalog cache lock poisoned during read: {e}");
                None
            }
        }
    }
}
