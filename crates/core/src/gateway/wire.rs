//! Wire JSON ↔ internal types.
//!
//! Lead records arrive loosely typed (ids may be strings or numbers, contact
//! fields may be missing), so they are read as `serde_json::Value` and mapped
//! field by field. Records without a numeric `stageid` are dropped.

use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::GatewayError;
use crate::types::{Lead, LeadId, Stage, StageId};

#[derive(Debug, Deserialize)]
struct LeadsEnvelope {
    #[serde(default)]
    success: bool,
    #[serde(default)]
    leads: Option<Value>,
    #[serde(default)]
    error: Option<Value>,
}

#[derive(Debug, Deserialize)]
struct SuccessEnvelope {
    #[serde(default)]
    success: bool,
}

#[derive(Debug, Deserialize)]
struct StagesEnvelope {
    #[serde(default)]
    success: bool,
    #[serde(default)]
    stages: Option<Vec<WireStage>>,
}

#[derive(Debug, Deserialize)]
struct WireStage {
    idstage: i64,
    name: String,
}

/// Parse a `{ success, leads: [...] }` body.
pub(crate) fn parse_leads(url: &str, body: &str) -> Result<Vec<Lead>, GatewayError> {
    let envelope: LeadsEnvelope =
        serde_json::from_str(body).map_err(|e| GatewayError::malformed(url, e.to_string()))?;

    if !envelope.success {
        let detail = envelope
            .error
            .map(|e| e.to_string())
            .unwrap_or_else(|| "success=false".to_string());
        return Err(GatewayError::Rejected(detail));
    }

    let Some(Value::Array(records)) = envelope.leads else {
        return Err(GatewayError::malformed(url, "leads is not an array"));
    };

    let now = Utc::now();
    let total = records.len();
    let leads: Vec<Lead> = records.iter().filter_map(|r| lead_from_wire(r, now)).collect();
    if leads.len() < total {
        debug!(
            dropped = total - leads.len(),
            kept = leads.len(),
            "Dropped lead records without a numeric stageid"
        );
    }
    Ok(leads)
}

/// Parse a `{ success }` body into the reported flag.
pub(crate) fn parse_success(url: &str, body: &str) -> Result<bool, GatewayError> {
    serde_json::from_str::<SuccessEnvelope>(body)
        .map(|e| e.success)
        .map_err(|e| GatewayError::malformed(url, e.to_string()))
}

/// Parse a `{ success, stages: [{ idstage, name }] }` body.
pub(crate) fn parse_stages(url: &str, body: &str) -> Result<Vec<Stage>, GatewayError> {
    let envelope: StagesEnvelope =
        serde_json::from_str(body).map_err(|e| GatewayError::malformed(url, e.to_string()))?;

    match envelope.stages {
        Some(stages) if envelope.success => Ok(stages
            .into_iter()
            .map(|s| Stage {
                id: StageId(s.idstage),
                name: s.name,
            })
            .collect()),
        Some(_) => Err(GatewayError::Rejected("success=false".to_string())),
        None => Err(GatewayError::malformed(url, "stages is not an array")),
    }
}

fn lead_from_wire(record: &Value, now: DateTime<Utc>) -> Option<Lead> {
    let stage = stage_number(record.get("stageid")?)?;

    let id = ["id", "leadid"]
        .iter()
        .filter_map(|k| record.get(*k))
        .find_map(scalar_text)
        .unwrap_or_else(|| {
            let generated = generated_lead_id(now);
            warn!(id = %generated, "Lead record has no id, generated a display-only id");
            generated
        });

    let last_update = record
        .get("lastUpdate")
        .and_then(Value::as_str)
        .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or(now);

    Some(Lead {
        id: LeadId(id),
        name: text_field(record, "name"),
        phone: text_field(record, "phone"),
        email: text_field(record, "email"),
        offer_type: record
            .get("offerType")
            .and_then(scalar_text),
        current_stage_id: StageId(stage),
        last_update,
    })
}

/// Integral JSON number, including `3.0`.
fn stage_number(v: &Value) -> Option<i64> {
    v.as_i64().or_else(|| {
        v.as_f64()
            .filter(|f| f.fract() == 0.0 && f.is_finite())
            .map(|f| f as i64)
    })
}

/// Non-empty string or number rendered as text.
fn scalar_text(v: &Value) -> Option<String> {
    match v {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn text_field(record: &Value, key: &str) -> String {
    record.get(key).and_then(scalar_text).unwrap_or_default()
}

fn generated_lead_id(now: DateTime<Utc>) -> String {
    format!("lead-{}-{}", now.timestamp_millis(), Uuid::new_v4().simple())
}
