//! Lead counts per pipeline stage.

use serde::Serialize;

use crate::catalog::StageList;
use crate::types::{Lead, StageId};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FunnelRow {
    pub stage_id: StageId,
    pub name: String,
    pub count: usize,
    /// Share of all leads, `0.0..=100.0`.
    pub percent: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FunnelSummary {
    pub total: usize,
    pub rows: Vec<FunnelRow>,
    /// Leads whose stage id is not in the catalog.
    pub unstaged: usize,
}

impl FunnelSummary {
    pub fn compute(stages: &StageList, leads: &[Lead]) -> Self {
        let total = leads.len();
        let rows: Vec<FunnelRow> = stages
            .stages()
            .iter()
            .map(|stage| {
                let count = leads
                    .iter()
                    .filter(|l| l.current_stage_id == stage.id)
                    .count();
                FunnelRow {
                    stage_id: stage.id,
                    name: stage.name.clone(),
                    count,
                    percent: share(count, total),
                }
            })
            .collect();
        let staged: usize = rows.iter().map(|r| r.count).sum();

        Self {
            total,
            unstaged: total - staged,
            rows,
        }
    }

    pub fn row(&self, id: StageId) -> Option<&FunnelRow> {
        self.rows.iter().find(|r| r.stage_id == id)
    }
}

fn share(count: usize, total: usize) -> f64 {
    if total == 0 {
        0.0
    } else {
        count as f64 * 100.0 / total as f64
    }
}
