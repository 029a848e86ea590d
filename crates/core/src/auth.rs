//! Login state on top of an external identity provider.
//!
//! The provider owns credentials and sessions; this module only tracks which
//! client identifier the session is scoped to and persists it so a restart
//! can restore the signed-in state before the provider answers.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::watch;
use tracing::{info, warn};

use crate::error::AuthError;
use crate::persist::LocalStore;
use crate::types::ClientId;

/// What the identity provider knows about the signed-in user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub user_id: String,
    pub email: Option<String>,
    /// From the user's metadata; the tenant the user may see.
    pub client: Option<ClientId>,
}

#[async_trait]
pub trait IdentityProvider: Send + Sync {
    /// The live session, if any.
    async fn current_session(&self) -> Result<Option<Identity>, AuthError>;
    async fn sign_in(&self, email: &str, password: &str) -> Result<Identity, AuthError>;
    async fn sign_out(&self) -> Result<(), AuthError>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthState {
    /// Startup, before the provider answered.
    Resolving,
    SignedIn(ClientId),
    SignedOut,
}

impl AuthState {
    pub fn client(&self) -> Option<&ClientId> {
        match self {
            Self::SignedIn(client) => Some(client),
            Self::Resolving | Self::SignedOut => None,
        }
    }

    pub fn is_resolving(&self) -> bool {
        matches!(self, Self::Resolving)
    }
}

pub struct Authenticator {
    provider: Arc<dyn IdentityProvider>,
    local: LocalStore,
    state: watch::Sender<AuthState>,
}

impl Authenticator {
    pub fn new(provider: Arc<dyn IdentityProvider>, local: LocalStore) -> Self {
        let (state, _) = watch::channel(AuthState::Resolving);
        Self {
            provider,
            local,
            state,
        }
    }

    pub fn state(&self) -> AuthState {
        self.state.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<AuthState> {
        self.state.subscribe()
    }

    fn publish(&self, next: AuthState) {
        self.state.send_if_modified(|current| {
            if *current == next {
                false
            } else {
                *current = next;
                true
            }
        });
    }

    /// Restore login state at startup.
    ///
    /// A persisted client name signs in immediately; the provider session is
    /// then re-validated. No session, or a session without a client name,
    /// clears the persisted key. If the provider cannot be reached the
    /// persisted state is kept.
    pub async fn restore(&self) -> AuthState {
        let persisted = self.local.client_name().unwrap_or_else(|e| {
            warn!(error = %e, "Could not read persisted client name");
            None
        });
        if let Some(client) = &persisted {
            self.publish(AuthState::SignedIn(client.clone()));
        }

        match self.provider.current_session().await {
            Ok(Some(Identity {
                client: Some(client),
                ..
            })) => {
                if persisted.as_ref() != Some(&client) {
                    if let Err(e) = self.local.set_client_name(&client) {
                        warn!(error = %e, "Could not persist client name");
                    }
                }
                info!(%client, "Session restored");
                self.publish(AuthState::SignedIn(client));
            }
            Ok(Some(_)) => {
                warn!("Session has no clientName, signing out");
                self.forget_local();
                self.publish(AuthState::SignedOut);
            }
            Ok(None) => {
                self.forget_local();
                self.publish(AuthState::SignedOut);
            }
            Err(e) => {
                warn!(error = %e, "Identity provider unavailable during restore");
                if persisted.is_none() {
                    self.publish(AuthState::SignedOut);
                }
            }
        }
        self.state()
    }

    /// Sign in and scope the session to the user's client identifier.
    pub async fn sign_in(&self, email: &str, password: &str) -> Result<ClientId, AuthError> {
        let identity = match self.provider.sign_in(email, password).await {
            Ok(identity) => identity,
            Err(e) => {
                self.publish(AuthState::SignedOut);
                return Err(e);
            }
        };

        let Some(client) = identity.client.filter(|c| !c.as_str().trim().is_empty()) else {
            if let Err(e) = self.provider.sign_out().await {
                warn!(error = %e, "Sign-out after missing clientName failed");
            }
            self.publish(AuthState::SignedOut);
            return Err(AuthError::MissingClient);
        };

        self.local.set_client_name(&client)?;
        info!(%client, "Signed in");
        self.publish(AuthState::SignedIn(client.clone()));
        Ok(client)
    }

    /// End the session locally and at the provider.
    pub async fn sign_out(&self) -> Result<(), AuthError> {
        if let Err(e) = self.provider.sign_out().await {
            warn!(error = %e, "Identity provider sign-out failed, clearing local state anyway");
        }
        self.publish(AuthState::SignedOut);
        self.local.clear_client_name()?;
        info!("Signed out");
        Ok(())
    }

    fn forget_local(&self) {
        if let Err(e) = self.local.clear_client_name() {
            warn!(error = %e, "Could not clear persisted client name");
        }
    }
}
