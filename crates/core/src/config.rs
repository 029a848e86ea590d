//! Runtime configuration.
//!
//! Resolution order: built-in defaults, then an optional TOML file, then
//! `LEADSTREAM_*` environment variables. Missing values never fail startup;
//! they degrade the gateways to empty results or fallback stages.

use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::catalog::StageSource;
use crate::error::{ConfigError, PersistError};
use crate::gateway::{ApiGateway, LeadGateway, WebhookGateway};

pub const DEFAULT_POLL_INTERVAL_SECS: u64 = 60;
pub const DEFAULT_SESSION_BUDGET_SECS: u64 = 30 * 60;

pub const ENV_API_BASE_URL: &str = "LEADSTREAM_API_BASE_URL";
pub const ENV_BACKEND: &str = "LEADSTREAM_BACKEND";
pub const ENV_FETCH_LEADS_WEBHOOK_URL: &str = "LEADSTREAM_FETCH_LEADS_WEBHOOK_URL";
pub const ENV_UPDATE_LEAD_WEBHOOK_URLS: &str = "LEADSTREAM_UPDATE_LEAD_WEBHOOK_URLS";
pub const ENV_POLL_INTERVAL_SECS: &str = "LEADSTREAM_POLL_INTERVAL_SECS";
pub const ENV_SESSION_BUDGET_SECS: &str = "LEADSTREAM_SESSION_BUDGET_SECS";
pub const ENV_DATA_DIR: &str = "LEADSTREAM_DATA_DIR";
pub const ENV_CLIENT_NAME: &str = "LEADSTREAM_CLIENT_NAME";

/// Which remote the lead gateway talks to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    #[default]
    Api,
    Webhook,
}

impl FromStr for BackendKind {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "api" => Ok(Self::Api),
            "webhook" => Ok(Self::Webhook),
            _ => Err(ConfigError::InvalidValue {
                key: ENV_BACKEND,
                value: s.to_string(),
            }),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub api_base_url: Option<String>,
    pub backend: BackendKind,
    pub fetch_leads_webhook: Option<String>,
    pub update_lead_webhooks: Vec<String>,
    pub poll_interval_secs: u64,
    pub session_budget_secs: u64,
    pub data_dir: Option<PathBuf>,
    /// Client identifier granted by the local identity provider on sign-in.
    pub client_name: Option<String>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            api_base_url: None,
            backend: BackendKind::Api,
            fetch_leads_webhook: None,
            update_lead_webhooks: Vec::new(),
            poll_interval_secs: DEFAULT_POLL_INTERVAL_SECS,
            session_budget_secs: DEFAULT_SESSION_BUDGET_SECS,
            data_dir: None,
            client_name: None,
        }
    }
}

impl AppConfig {
    /// Defaults, then `path` (if given), then the process environment.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        config.apply_env_with(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        toml::from_str(&text).map_err(|e| ConfigError::Parse {
            path: path.to_path_buf(),
            message: e.to_string(),
        })
    }

    /// Apply overrides from `lookup`. Blank values count as unset.
    pub fn apply_env_with<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(v) = get(ENV_API_BASE_URL) {
            self.api_base_url = Some(v);
        }
        if let Some(v) = get(ENV_BACKEND) {
            self.backend = v.parse()?;
        }
        if let Some(v) = get(ENV_FETCH_LEADS_WEBHOOK_URL) {
            self.fetch_leads_webhook = Some(v);
        }
        if let Some(v) = get(ENV_UPDATE_LEAD_WEBHOOK_URLS) {
            self.update_lead_webhooks = v
                .split(',')
                .map(str::trim)
                .filter(|u| !u.is_empty())
                .map(String::from)
                .collect();
        }
        if let Some(v) = get(ENV_POLL_INTERVAL_SECS) {
            self.poll_interval_secs = parse_secs(ENV_POLL_INTERVAL_SECS, &v)?;
        }
        if let Some(v) = get(ENV_SESSION_BUDGET_SECS) {
            self.session_budget_secs = parse_secs(ENV_SESSION_BUDGET_SECS, &v)?;
        }
        if let Some(v) = get(ENV_DATA_DIR) {
            self.data_dir = Some(PathBuf::from(v));
        }
        if let Some(v) = get(ENV_CLIENT_NAME) {
            self.client_name = Some(v);
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.poll_interval_secs == 0 {
            return Err(ConfigError::InvalidValue {
                key: "poll_interval_secs",
                value: "0".into(),
            });
        }
        if self.session_budget_secs == 0 {
            return Err(ConfigError::InvalidValue {
                key: "session_budget_secs",
                value: "0".into(),
            });
        }
        Ok(())
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    pub fn session_budget(&self) -> Duration {
        Duration::from_secs(self.session_budget_secs)
    }

    /// Local persistence root: configured path, else `<data_dir>/leadstream`.
    pub fn resolve_data_dir(&self) -> Result<PathBuf, PersistError> {
        match &self.data_dir {
            Some(dir) => Ok(dir.clone()),
            None => dirs::data_dir()
                .map(|d| d.join("leadstream"))
                .ok_or(PersistError::DataDirNotFound),
        }
    }

    /// Lead gateway for the configured backend.
    pub fn lead_gateway(&self, http: reqwest::Client) -> Arc<dyn LeadGateway> {
        match self.backend {
            BackendKind::Api => Arc::new(ApiGateway::new(http, self.api_base_url.clone())),
            BackendKind::Webhook => Arc::new(WebhookGateway::new(
                http,
                self.fetch_leads_webhook.clone(),
                self.update_lead_webhooks.clone(),
            )),
        }
    }

    /// Stage list source. Stages always come from the backend API, whichever
    /// gateway serves leads.
    pub fn stage_source(&self, http: reqwest::Client) -> Arc<dyn StageSource> {
        Arc::new(ApiGateway::new(http, self.api_base_url.clone()))
    }
}

fn parse_secs(key: &'static str, value: &str) -> Result<u64, ConfigError> {
    value
        .trim()
        .parse::<u64>()
        .ok()
        .filter(|n| *n > 0)
        .ok_or_else(|| ConfigError::InvalidValue {
            key,
            value: value.to_string(),
        })
}
