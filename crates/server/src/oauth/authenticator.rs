//! Provider registry and the state/nonce checks around a provider exchange.

use crate::error::{AuthError, EnvError, ProviderError};
use crate::oauth::{IdentityProvider, User};
use crate::session::Env;
use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};
use subtle::ConstantTimeEq;

/// Session keys written by [`Authenticator::login_url`].
pub const STATE_KEY: &str = "state";
pub const NONCE_KEY: &str = "nonce";

/// The authentication capability the auth service depends on.
#[async_trait::async_trait]
pub trait Authenticate: Send + Sync {
    /// Persists `state` and `nonce` into `env` and returns the provider's login URL.
    fn login_url(
        &self,
        env: &mut dyn Env,
        provider: &str,
        state: &str,
        nonce: &str,
    ) -> Result<String, AuthError>;

    /// Exchanges `code` with the provider after checking `state` against the session.
    async fn exchange(
        &self,
        env: &dyn Env,
        provider: &str,
        code: &str,
        state: &str,
    ) -> Result<User, AuthError>;
}

/// Registry of identity providers keyed by name.
///
/// Providers are registered at startup and looked up on every request. The lock
/// guarantees a lookup never observes a half-registered provider.
#[derive(Default)]
pub struct Authenticator {
    providers: RwLock<HashMap<String, Arc<dyn IdentityProvider>>>,
}

impl Authenticator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a registry from a fixed list, failing on the first duplicate name.
    pub fn with_providers<I, S>(providers: I) -> Result<Self, AuthError>
    where
        I: IntoIterator<Item = (S, Arc<dyn IdentityProvider>)>,
        S: Into<String>,
    {
        let auth = Self::new();
        for (name, provider) in providers {
            auth.register(name, provider)?;
        }
        Ok(auth)
    }

    /// Registers `provider` under `name`. Existing registrations are never overwritten.
    pub fn register(
        &self,
        name: impl Into<String>,
        provider: Arc<dyn IdentityProvider>,
    ) -> Result<(), AuthError> {
        let name = name.into();
        let mut providers = self
            .providers
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        if providers.contains_key(&name) {
            return Err(AuthError::ProviderConflict(name));
        }
        tracing::info!(provider = %name, "registered identity provider");
        providers.insert(name, provider);
        Ok(())
    }

    pub fn provider_names(&self) -> Vec<String> {
        let providers = self.providers.read().unwrap_or_else(PoisonError::into_inner);
        let mut names: Vec<String> = providers.keys().cloned().collect();
        names.sort();
        names
    }

    fn provider(&self, name: &str) -> Result<Arc<dyn IdentityProvider>, AuthError> {
        self.providers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .cloned()
            .ok_or_else(|| AuthError::ProviderNotFound(name.to_string()))
    }
}

/// Loads a value the login leg saved. A missing value fails closed.
fn load_saved(env: &dyn Env, key: &str) -> Result<String, AuthError> {
    match env.load(key) {
        Ok(v) => Ok(v),
        Err(EnvError::NotFound(_)) => {
            tracing::debug!(key, "login session value missing");
            Err(AuthError::AuthFailed)
        }
        Err(source) => Err(AuthError::Session {
            context: "load session",
            source,
        }),
    }
}

fn matches(expected: &str, got: &str) -> bool {
    !expected.is_empty() && bool::from(expected.as_bytes().ct_eq(got.as_bytes()))
}

#[async_trait::async_trait]
impl Authenticate for Authenticator {
    fn login_url(
        &self,
        env: &mut dyn Env,
        provider: &str,
        state: &str,
        nonce: &str,
    ) -> Result<String, AuthError> {
        let p = self.provider(provider)?;

        env.save(STATE_KEY, state)
            .map_err(|source| AuthError::Session {
                context: "save state",
                source,
            })?;
        env.save(NONCE_KEY, nonce)
            .map_err(|source| AuthError::Session {
                context: "save nonce",
                source,
            })?;

        Ok(p.login_url(state, nonce)?)
    }

    #[tracing::instrument(skip(self, env, code, state))]
    async fn exchange(
        &self,
        env: &dyn Env,
        provider: &str,
        code: &str,
        state: &str,
    ) -> Result<User, AuthError> {
        let p = self.provider(provider)?;

        // CSRF check happens before any call to the provider.
        let saved_state = load_saved(env, STATE_KEY)?;
        if !matches(&saved_state, state) {
            tracing::debug!("state mismatch");
            return Err(AuthError::AuthFailed);
        }

        let user = match p.exchange(code).await {
            Ok(user) => user,
            Err(ProviderError::Rejected(status)) => {
                tracing::debug!(%status, "provider rejected authorization code");
                return Err(AuthError::AuthFailed);
            }
            Err(e) => return Err(e.into()),
        };

        // The session is the source of truth for this transaction, even though the
        // provider already bound the nonce into the ID token.
        let saved_nonce = load_saved(env, NONCE_KEY)?;
        if user.nonce.is_empty() || !matches(&saved_nonce, &user.nonce) {
            tracing::debug!("nonce missing or mismatched");
            return Err(AuthError::AuthFailed);
        }

        Ok(user)
    }
}
