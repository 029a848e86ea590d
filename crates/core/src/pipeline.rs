//! Per-lead pipeline view: where a lead sits in the ordered stage list.

use serde::Serialize;

use crate::catalog::StageList;
use crate::types::{Lead, StageId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum StepStatus {
    Completed,
    Current,
    /// The single forward move offered from the current stage.
    Next,
    Pending,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PipelineStep {
    pub stage_id: StageId,
    pub name: String,
    pub status: StepStatus,
}

/// One step per catalog stage, in catalog order.
///
/// A lead whose stage is unknown to the catalog gets every step `Pending`.
pub fn pipeline_view(stages: &StageList, lead: &Lead) -> Vec<PipelineStep> {
    let current = stages.index_of(lead.current_stage_id);
    stages
        .stages()
        .iter()
        .enumerate()
        .map(|(i, stage)| {
            let status = match current {
                Some(c) if i < c => StepStatus::Completed,
                Some(c) if i == c => StepStatus::Current,
                Some(c) if i == c + 1 => StepStatus::Next,
                _ => StepStatus::Pending,
            };
            PipelineStep {
                stage_id: stage.id,
                name: stage.name.clone(),
                status,
            }
        })
        .collect()
}

/// True once the lead reached the last catalog stage.
pub fn is_terminal(stages: &StageList, lead: &Lead) -> bool {
    stages.is_terminal(lead.current_stage_id)
}
