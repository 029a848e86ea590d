//! Backend HTTP API gateway.

use async_trait::async_trait;
use serde_json::json;
use tracing::{debug, error, warn};

use super::{post_json, request_timestamp, require_client, wire, LeadGateway};
use crate::catalog::StageSource;
use crate::error::GatewayError;
use crate::types::{ClientId, Lead, LeadId, Stage, StageId};

/// Gateway for the lead backend at a configurable base URL.
///
/// With no base URL every call degrades: reads are empty, writes are `false`,
/// stage fetches fall back to the catalog defaults.
#[derive(Debug, Clone)]
pub struct ApiGateway {
    http: reqwest::Client,
    base_url: Option<String>,
}

impl ApiGateway {
    pub fn new(http: reqwest::Client, base_url: Option<String>) -> Self {
        let base_url = base_url
            .map(|u| u.trim().trim_end_matches('/').to_string())
            .filter(|u| !u.is_empty());
        Self { http, base_url }
    }

    pub fn base_url(&self) -> Option<&str> {
        self.base_url.as_deref()
    }

    fn endpoint(&self, path: &str) -> Result<String, GatewayError> {
        self.base_url
            .as_ref()
            .map(|base| format!("{base}{path}"))
            .ok_or(GatewayError::NotConfigured("api base url"))
    }

    /// `POST {base}/api/leads`
    pub async fn try_fetch_leads(&self, client: &ClientId) -> Result<Vec<Lead>, GatewayError> {
        require_client(client)?;
        let url = self.endpoint("/api/leads")?;
        let body = json!({
            "clientName": client.as_str(),
            "timestamp": request_timestamp(),
        });
        let text = post_json(&self.http, &url, &body).await?;
        wire::parse_leads(&url, &text)
    }

    /// `POST {base}/api/leads/update`
    pub async fn try_update_lead_stage(
        &self,
        lead: &LeadId,
        stage: StageId,
        client: &ClientId,
    ) -> Result<bool, GatewayError> {
        require_client(client)?;
        let url = self.endpoint("/api/leads/update")?;
        let body = json!({
            "clientName": client.as_str(),
            "leadID": lead.as_str(),
            "newStageId": stage.0,
            "timestamp": request_timestamp(),
        });
        let text = post_json(&self.http, &url, &body).await?;
        wire::parse_success(&url, &text)
    }

    /// `GET {base}/api/stages`
    pub async fn try_fetch_stages(&self) -> Result<Vec<Stage>, GatewayError> {
        let url = self.endpoint("/api/stages")?;
        let resp = self
            .http
            .get(&url)
            .header("Content-Type", "application/json")
            .send()
            .await
            .map_err(|e| GatewayError::transport(&url, e))?;

        let status = resp.status();
        if !status.is_success() {
            return Err(GatewayError::Status {
                url,
                status: status.as_u16(),
            });
        }

        let text = resp
            .text()
            .await
            .map_err(|e| GatewayError::transport(&url, e))?;
        wire::parse_stages(&url, &text)
    }
}

#[async_trait]
impl LeadGateway for ApiGateway {
    async fn fetch_leads(&self, client: &ClientId) -> Vec<Lead> {
        match self.try_fetch_leads(client).await {
            Ok(leads) => {
                debug!(%client, count = leads.len(), "Fetched leads");
                leads
            }
            Err(e @ GatewayError::NotConfigured(_)) => {
                warn!(%client, error = %e, "Lead fetch skipped, returning no leads");
                Vec::new()
            }
            Err(e) => {
                error!(%client, error = %e, "Lead fetch failed, returning no leads");
                Vec::new()
            }
        }
    }

    async fn try_fetch_leads(&self, client: &ClientId) -> Result<Vec<Lead>, GatewayError> {
        ApiGateway::try_fetch_leads(self, client).await
    }

    async fn update_lead_stage(&self, lead: &LeadId, stage: StageId, client: &ClientId) -> bool {
        match self.try_update_lead_stage(lead, stage, client).await {
            Ok(true) => true,
            Ok(false) => {
                warn!(%client, lead_id = %lead, stage_id = %stage, "Backend refused stage update");
                false
            }
            Err(e) => {
                error!(%client, lead_id = %lead, stage_id = %stage, error = %e, "Stage update failed");
                false
            }
        }
    }

    fn name(&self) -> &str {
        "api"
    }
}

#[async_trait]
impl StageSource for ApiGateway {
    async fn fetch_stages(&self) -> Result<Vec<Stage>, GatewayError> {
        self.try_fetch_stages().await
    }
}
