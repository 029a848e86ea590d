//! Automation webhook gateway.
//!
//! Talks to third-party automation hooks instead of the backend API. Each
//! request carries an `action` discriminator. Hooks commonly answer with a
//! plain-text `Accepted` instead of JSON, which counts as success for
//! updates and as "no leads" for fetches.

use async_trait::async_trait;
use serde_json::json;
use tracing::{debug, info, warn};

use super::{post_json, request_timestamp, require_client, wire, LeadGateway};
use crate::error::GatewayError;
use crate::types::{ClientId, Lead, LeadId, StageId};

/// Value of the `source` field on update payloads.
pub const UPDATE_SOURCE: &str = "leadstream";

#[derive(Debug, Clone)]
pub struct WebhookGateway {
    http: reqwest::Client,
    fetch_url: Option<String>,
    update_urls: Vec<String>,
}

impl WebhookGateway {
    pub fn new(http: reqwest::Client, fetch_url: Option<String>, update_urls: Vec<String>) -> Self {
        Self {
            http,
            fetch_url: fetch_url.filter(|u| !u.trim().is_empty()),
            update_urls: update_urls
                .into_iter()
                .filter(|u| !u.trim().is_empty())
                .collect(),
        }
    }

    pub async fn try_fetch_leads(&self, client: &ClientId) -> Result<Vec<Lead>, GatewayError> {
        require_client(client)?;
        let url = self
            .fetch_url
            .as_deref()
            .ok_or(GatewayError::NotConfigured("fetch leads webhook"))?;
        let body = json!({
            "action": "fetch_leads",
            "clientName": client.as_str(),
            "timestamp": request_timestamp(),
        });
        let text = post_json(&self.http, url, &body).await?;
        if !looks_like_json(&text) {
            debug!(url, body = %text.trim(), "Fetch hook answered with plain text, no leads");
            return Ok(Vec::new());
        }
        wire::parse_leads(url, &text)
    }

    /// Post to a single update hook.
    async fn send_update(&self, url: &str, body: &serde_json::Value) -> Result<bool, GatewayError> {
        let text = post_json(&self.http, url, body).await?;
        if looks_like_json(&text) {
            wire::parse_success(url, &text)
        } else {
            // 2xx with a text body ("Accepted") means the hook queued the job.
            Ok(true)
        }
    }

    /// Fan out to every update hook; succeeds if at least one hook accepted.
    pub async fn try_update_lead_stage(
        &self,
        lead: &LeadId,
        stage: StageId,
        client: &ClientId,
    ) -> Result<bool, GatewayError> {
        require_client(client)?;
        if self.update_urls.is_empty() {
            return Err(GatewayError::NotConfigured("update lead webhook"));
        }
        let body = json!({
            "action": "update_lead_stage",
            "clientName": client.as_str(),
            "leadID": lead.as_str(),
            "newStageId": stage.0,
            "timestamp": request_timestamp(),
            "source": UPDATE_SOURCE,
        });

        let mut accepted = 0usize;
        for url in &self.update_urls {
            match self.send_update(url, &body).await {
                Ok(true) => accepted += 1,
                Ok(false) => warn!(url = %url, lead_id = %lead, "Update hook reported failure"),
                Err(e) => warn!(url = %url, lead_id = %lead, error = %e, "Update hook failed"),
            }
        }
        info!(
            lead_id = %lead,
            stage_id = %stage,
            accepted,
            hooks = self.update_urls.len(),
            "Stage update sent to automation hooks"
        );
        Ok(accepted > 0)
    }
}

fn looks_like_json(text: &str) -> bool {
    matches!(text.trim_start().as_bytes().first(), Some(b'{') | Some(b'['))
}

#[async_trait]
impl LeadGateway for WebhookGateway {
    async fn fetch_leads(&self, client: &ClientId) -> Vec<Lead> {
        self.try_fetch_leads(client).await.unwrap_or_else(|e| {
            warn!(%client, error = %e, "Webhook lead fetch failed, returning no leads");
            Vec::new()
        })
    }

    async fn try_fetch_leads(&self, client: &ClientId) -> Result<Vec<Lead>, GatewayError> {
        WebhookGateway::try_fetch_leads(self, client).await
    }

    async fn update_lead_stage(&self, lead: &LeadId, stage: StageId, client: &ClientId) -> bool {
        self.try_update_lead_stage(lead, stage, client)
            .await
            .unwrap_or_else(|e| {
                warn!(%client, lead_id = %lead, error = %e, "Webhook stage update failed");
                false
            })
    }

    fn name(&self) -> &str {
        "webhook"
    }
}
