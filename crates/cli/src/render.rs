//! Plain-text rendering for terminal output.

use std::fmt::Write as _;

use leadstream_core::{
    FunnelSummary, Lead, Notice, NoticeLevel, Notifier, PipelineStep, StageList, StepStatus,
    TransitionOutcome,
};

/// Prints notices to stderr as they are raised.
#[derive(Debug, Default)]
pub struct ConsoleNotifier;

impl Notifier for ConsoleNotifier {
    fn notify(&self, notice: Notice) {
        tracing::debug!(title = %notice.title, level = ?notice.level, "Notice raised");
        eprintln!("{}", notice_line(&notice));
    }
}

pub fn notice_line(notice: &Notice) -> String {
    let tag = match notice.level {
        NoticeLevel::Info => "info",
        NoticeLevel::Success => "ok",
        NoticeLevel::Error => "error",
    };
    format!("[{tag}] {}: {}", notice.title, notice.description)
}

pub fn stages_table(stages: &StageList) -> String {
    let mut out = String::new();
    for (i, stage) in stages.stages().iter().enumerate() {
        let _ = writeln!(out, "{:>2}. {:<16} (id {})", i + 1, stage.name, stage.id);
    }
    out
}

pub fn leads_table(stages: &StageList, leads: &[Lead]) -> String {
    if leads.is_empty() {
        return "No leads found.\n".to_string();
    }
    let mut out = String::new();
    let _ = writeln!(out, "{:<14} {:<24} {:<16} {}", "ID", "NAME", "STAGE", "UPDATED");
    for lead in leads {
        let _ = writeln!(
            out,
            "{:<14} {:<24} {:<16} {}",
            lead.id,
            lead.name,
            stages.name_of(lead.current_stage_id),
            lead.last_update.format("%Y-%m-%d %H:%M"),
        );
    }
    out
}

pub fn lead_detail(lead: &Lead, steps: &[PipelineStep], terminal: bool) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "{} ({})", lead.name, lead.id);
    if !lead.phone.is_empty() {
        let _ = writeln!(out, "  phone: {}", lead.phone);
    }
    if !lead.email.is_empty() {
        let _ = writeln!(out, "  email: {}", lead.email);
    }
    if let Some(offer) = &lead.offer_type {
        let _ = writeln!(out, "  offer: {offer}");
    }
    let _ = writeln!(out, "  updated: {}", lead.last_update.to_rfc3339());
    out.push('\n');
    for step in steps {
        let marker = match step.status {
            StepStatus::Completed => "[x]",
            StepStatus::Current => "[>]",
            StepStatus::Next => "[ ] next",
            StepStatus::Pending => "[ ]",
        };
        let _ = writeln!(out, "  {marker} {}", step.name);
    }
    if terminal {
        out.push_str("\nLead Completed\n");
    }
    out
}

pub fn funnel_table(summary: &FunnelSummary) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "Total leads: {}", summary.total);
    for row in &summary.rows {
        let _ = writeln!(out, "  {:<16} {:>4}  {:>5.1}%", row.name, row.count, row.percent);
    }
    if summary.unstaged > 0 {
        let _ = writeln!(out, "  {:<16} {:>4}", "(unknown stage)", summary.unstaged);
    }
    out
}

pub fn outcome_line(outcome: &TransitionOutcome, stages: &StageList) -> String {
    match outcome {
        TransitionOutcome::Applied { lead, from, to } => format!(
            "{lead}: {} -> {}",
            stages.name_of(*from),
            stages.name_of(*to)
        ),
        TransitionOutcome::NoTransition => "No stage change available.".to_string(),
        TransitionOutcome::AlreadyPending => "A stage change for this lead is in progress.".to_string(),
        TransitionOutcome::UnknownLead => "Lead not found.".to_string(),
        TransitionOutcome::Failed => "Stage change failed.".to_string(),
    }
}
