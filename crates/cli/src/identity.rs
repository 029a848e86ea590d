//! File-backed identity provider for the terminal front end.
//!
//! Sign-in accepts any non-empty credentials and grants the client name from
//! configuration. The resulting session lives in `identity.json` under the
//! data directory until sign-out.

use async_trait::async_trait;
use leadstream_core::{AuthError, ClientId, Identity, IdentityProvider, LocalStore};
use serde::{Deserialize, Serialize};

const IDENTITY_FILE: &str = "identity.json";

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct IdentityRecord {
    user_id: String,
    email: String,
    #[serde(default)]
    client_name: Option<String>,
}

impl From<IdentityRecord> for Identity {
    fn from(r: IdentityRecord) -> Self {
        Identity {
            user_id: r.user_id,
            email: Some(r.email),
            client: r.client_name.map(ClientId::new),
        }
    }
}

pub struct LocalIdentityProvider {
    local: LocalStore,
    client_name: Option<String>,
}

impl LocalIdentityProvider {
    pub fn new(local: LocalStore, client_name: Option<String>) -> Self {
        Self { local, client_name }
    }
}

#[async_trait]
impl IdentityProvider for LocalIdentityProvider {
    async fn current_session(&self) -> Result<Option<Identity>, AuthError> {
        let record: Option<IdentityRecord> = self.local.read_json(IDENTITY_FILE)?;
        Ok(record.map(Identity::from))
    }

    async fn sign_in(&self, email: &str, password: &str) -> Result<Identity, AuthError> {
        if email.trim().is_empty() || password.is_empty() {
            return Err(AuthError::SignInFailed("Invalid login credentials".into()));
        }
        let record = IdentityRecord {
            user_id: format!("local:{}", email.trim().to_ascii_lowercase()),
            email: email.trim().to_string(),
            client_name: self.client_name.clone(),
        };
        self.local.write_json(IDENTITY_FILE, &record)?;
        Ok(record.into())
    }

    async fn sign_out(&self) -> Result<(), AuthError> {
        self.local.remove(IDENTITY_FILE)?;
        Ok(())
    }
}
