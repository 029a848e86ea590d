//! Remote lead gateways.
//!
//! Provides the [`LeadGateway`] trait and two implementations:
//! - [`ApiGateway`]: the backend HTTP API (`/api/leads`, `/api/leads/update`, `/api/stages`)
//! - [`WebhookGateway`]: automation webhooks with an `action` discriminator
//!
//! Both make exactly one attempt per call. Apart from `try_fetch_leads`, no
//! trait method returns an error: failed reads are an empty list, failed
//! writes are `false`.

pub mod api;
pub mod webhook;
pub(crate) mod wire;

pub use api::ApiGateway;
pub use webhook::WebhookGateway;

use async_trait::async_trait;
use chrono::{SecondsFormat, Utc};

use crate::error::GatewayError;
use crate::types::{ClientId, Lead, LeadId, StageId};

/// Fetch/update operations against the remote lead store.
#[async_trait]
pub trait LeadGateway: Send + Sync {
    /// All leads visible to `client`. Any failure yields an empty list.
    async fn fetch_leads(&self, client: &ClientId) -> Vec<Lead>;

    /// Like [`Self::fetch_leads`], but keeps the failure so an unreachable
    /// backend can be told apart from a client with no leads.
    async fn try_fetch_leads(&self, client: &ClientId) -> Result<Vec<Lead>, GatewayError> {
        Ok(self.fetch_leads(client).await)
    }

    /// Move `lead` to `stage`. Returns the backend's success flag, `false` on
    /// any transport or parsing failure.
    async fn update_lead_stage(&self, lead: &LeadId, stage: StageId, client: &ClientId) -> bool;

    /// Gateway name for logging/display (e.g. "api", "webhook").
    fn name(&self) -> &str;
}

/// RFC 3339 UTC timestamp with milliseconds and a `Z` suffix.
pub(crate) fn request_timestamp() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Send a JSON POST and return the body text of a 2xx response.
pub(crate) async fn post_json(
    http: &reqwest::Client,
    url: &str,
    body: &serde_json::Value,
) -> Result<String, GatewayError> {
    let resp = http
        .post(url)
        .header("Content-Type", "application/json")
        .json(body)
        .send()
        .await
        .map_err(|e| GatewayError::transport(url, e))?;

    let status = resp.status();
    if !status.is_success() {
        return Err(GatewayError::Status {
            url: url.to_string(),
            status: status.as_u16(),
        });
    }

    resp.text().await.map_err(|e| GatewayError::transport(url, e))
}

/// Reject calls without a usable client identifier before any network I/O.
pub(crate) fn require_client(client: &ClientId) -> Result<(), GatewayError> {
    if client.as_str().trim().is_empty() {
        Err(GatewayError::NotConfigured("client identifier"))
    } else {
        Ok(())
    }
}
