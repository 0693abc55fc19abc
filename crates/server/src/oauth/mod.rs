//! Federated login through third-party identity providers.
//!
//! - [`IdentityProvider`] is the per-provider contract (build a login URL, exchange a code)
//! - [`OidcProvider`] implements it for any OpenID Connect provider
//! - [`Authenticator`] keeps the provider registry and binds `state`/`nonce` to the
//!   browser session

pub mod authenticator;
pub mod oidc;

pub use authenticator::{Authenticate, Authenticator};
pub use oidc::{OidcConfig, OidcProvider, ProviderMetadata};

use crate::error::ProviderError;

/// A user as reported by an identity provider after a successful exchange.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct User {
    /// Provider account id (`sub`).
    pub id: String,
    pub email: String,
    pub email_verified: bool,
    pub name: String,
    pub picture: String,
    /// Nonce echoed back in the ID token.
    pub nonce: String,
}

impl User {
    /// The email if the provider verified it, otherwise an empty string.
    pub fn verified_email(&self) -> &str {
        if self.email_verified { &self.email } else { "" }
    }
}

/// Capability every identity provider adapter implements.
#[async_trait::async_trait]
pub trait IdentityProvider: Send + Sync {
    fn login_url(&self, state: &str, nonce: &str) -> Result<String, ProviderError>;

    /// Swaps an authorization code for the provider's view of the user.
    ///
    /// A token endpoint refusing the code must be reported as
    /// [`ProviderError::Rejected`].
    async fn exchange(&self, code: &str) -> Result<User, ProviderError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_verified_email_drops_unverified() {
        let mut user = User {
            id: "g1".into(),
            email: "x@y.com".into(),
            ..Default::default()
        };
        assert_eq!(user.verified_email(), "");

        user.email_verified = true;
        assert_eq!(user.verified_email(), "x@y.com");
    }
}
