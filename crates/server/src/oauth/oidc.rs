//! Generic OpenID Connect provider adapter.
//!
//! Discovery, the authorization-code exchange and ID token verification against the
//! provider's JWKS. Google is configured through this adapter.

use crate::error::ProviderError;
use crate::oauth::{IdentityProvider, User};
use jsonwebtoken::jwk::JwkSet;
use jsonwebtoken::{Algorithm, DecodingKey, Validation, decode, decode_header};
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use sha2::{Digest, Sha256};
use std::str::FromStr;
use std::time::Duration;
use tokio::sync::RwLock;
use url::Url;

pub const GOOGLE_ISSUER: &str = "https://accounts.google.com";

/// Clock skew accepted on `exp`/`iat` of ID tokens, in seconds.
const ID_TOKEN_LEEWAY_SECS: u64 = 60;

#[derive(Debug, Clone)]
pub struct OidcConfig {
    /// Provider name, also used as the prefix of generated display names.
    pub name: String,
    pub issuer_url: String,
    pub client_id: String,
    pub client_secret: String,
    pub redirect_url: String,
    pub scopes: Vec<String>,
}

/// The subset of `/.well-known/openid-configuration` this adapter needs.
#[derive(Debug, Clone, Deserialize)]
pub struct ProviderMetadata {
    pub issuer: String,
    pub authorization_endpoint: String,
    pub token_endpoint: String,
    pub jwks_uri: String,
    #[serde(default)]
    pub id_token_signing_alg_values_supported: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    id_token: Option<String>,
}

#[derive(Debug, Deserialize)]
struct IdTokenClaims {
    sub: String,
    #[serde(default)]
    email: String,
    #[serde(default)]
    email_verified: bool,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    picture: String,
    #[serde(default)]
    nonce: String,
}

pub struct OidcProvider {
    config: OidcConfig,
    metadata: ProviderMetadata,
    http: Client,
    jwks: RwLock<Option<JwkSet>>,
}

fn http_client() -> Result<Client, ProviderError> {
    Ok(Client::builder()
        .timeout(Duration::from_secs(10))
        .user_agent(concat!("federated-auth/", env!("CARGO_PKG_VERSION")))
        .build()?)
}

impl OidcProvider {
    /// Fetches the provider's discovery document and builds the adapter from it.
    #[tracing::instrument(skip(config), fields(provider = %config.name, issuer = %config.issuer_url))]
    pub async fn discover(config: OidcConfig) -> Result<Self, ProviderError> {
        let http = http_client()?;
        let issuer = config.issuer_url.trim_end_matches('/');
        let url = format!("{issuer}/.well-known/openid-configuration");

        let resp = http.get(&url).send().await?;
        if !resp.status().is_success() {
            return Err(ProviderError::Discovery(format!(
                "{url} returned HTTP {}",
                resp.status()
            )));
        }
        let metadata: ProviderMetadata = resp.json().await?;

        if metadata.issuer.trim_end_matches('/') != issuer {
            return Err(ProviderError::Discovery(format!(
                "issuer mismatch: configured {issuer}, discovered {}",
                metadata.issuer
            )));
        }

        tracing::info!(
            token_endpoint = %metadata.token_endpoint,
            jwks_uri = %metadata.jwks_uri,
            "discovered OIDC provider"
        );
        Self::with_metadata(config, metadata)
    }

    /// Builds the adapter from already-known metadata, skipping discovery.
    pub fn with_metadata(
        config: OidcConfig,
        metadata: ProviderMetadata,
    ) -> Result<Self, ProviderError> {
        Ok(Self {
            config,
            metadata,
            http: http_client()?,
            jwks: RwLock::new(None),
        })
    }

    pub fn name(&self) -> &str {
        &self.config.name
    }

    pub fn metadata(&self) -> &ProviderMetadata {
        &self.metadata
    }

    async fn fetch_jwks(&self) -> Result<JwkSet, ProviderError> {
        let resp = self.http.get(&self.metadata.jwks_uri).send().await?;
        if !resp.status().is_success() {
            return Err(ProviderError::Http {
                status: resp.status(),
                context: "fetch jwks".to_string(),
            });
        }
        let set: JwkSet = resp.json().await?;
        tracing::debug!(keys = set.keys.len(), "fetched provider JWKS");
        *self.jwks.write().await = Some(set.clone());
        Ok(set)
    }

    /// Resolves the decoding key for `kid`, refetching the key set once on a miss
    /// to pick up rotated keys.
    async fn decoding_key(&self, kid: Option<&str>) -> Result<DecodingKey, ProviderError> {
        let cached = self.jwks.read().await.clone();
        let set = match cached {
            Some(set) => set,
            None => self.fetch_jwks().await?,
        };

        let key = match select_jwk(&set, kid) {
            Some(key) => key,
            None => {
                let fresh = self.fetch_jwks().await?;
                select_jwk(&fresh, kid).ok_or_else(|| {
                    ProviderError::InvalidIdToken(format!(
                        "no signing key for kid {}",
                        kid.unwrap_or("<none>")
                    ))
                })?
            }
        };

        DecodingKey::from_jwk(&key).map_err(|e| ProviderError::InvalidIdToken(e.to_string()))
    }

    fn check_algorithm(&self, alg: Algorithm) -> Result<(), ProviderError> {
        if matches!(alg, Algorithm::HS256 | Algorithm::HS384 | Algorithm::HS512) {
            return Err(ProviderError::InvalidIdToken(format!(
                "symmetric algorithm {alg:?} not accepted"
            )));
        }
        let supported = &self.metadata.id_token_signing_alg_values_supported;
        if !supported.is_empty()
            && !supported
                .iter()
                .filter_map(|s| Algorithm::from_str(s).ok())
                .any(|a| a == alg)
        {
            return Err(ProviderError::InvalidIdToken(format!(
                "algorithm {alg:?} not advertised by provider"
            )));
        }
        Ok(())
    }

    async fn verify_id_token(&self, id_token: &str) -> Result<IdTokenClaims, ProviderError> {
        let header =
            decode_header(id_token).map_err(|e| ProviderError::InvalidIdToken(e.to_string()))?;
        self.check_algorithm(header.alg)?;

        let key = self.decoding_key(header.kid.as_deref()).await?;

        let mut validation = Validation::new(header.alg);
        validation.set_issuer(&accepted_issuers(&self.metadata.issuer));
        validation.set_audience(&[&self.config.client_id]);
        validation.leeway = ID_TOKEN_LEEWAY_SECS;

        let data = decode::<IdTokenClaims>(id_token, &key, &validation)
            .map_err(|e| ProviderError::InvalidIdToken(e.to_string()))?;
        Ok(data.claims)
    }
}

fn select_jwk(set: &JwkSet, kid: Option<&str>) -> Option<jsonwebtoken::jwk::Jwk> {
    match kid {
        Some(kid) => set.find(kid).cloned(),
        // Without a kid only an unambiguous single-key set is usable.
        None if set.keys.len() == 1 => set.keys.first().cloned(),
        None => None,
    }
}

/// Google issues `iss` both with and without the scheme.
fn accepted_issuers(issuer: &str) -> Vec<String> {
    let mut issuers = vec![issuer.to_string()];
    if let Some(bare) = issuer.strip_prefix("https://") {
        issuers.push(bare.to_string());
    }
    issuers
}

/// Display name for accounts that did not share one: `{provider}_{hex}` where the
/// hex part is derived from the subject, so it is stable across logins.
pub fn default_display_name(provider: &str, subject: &str) -> String {
    let digest = Sha256::digest(subject.as_bytes());
    let suffix: String = digest[..8].iter().map(|b| format!("{b:02x}")).collect();
    format!("{provider}_{suffix}")
}

#[async_trait::async_trait]
impl IdentityProvider for OidcProvider {
    fn login_url(&self, state: &str, nonce: &str) -> Result<String, ProviderError> {
        let mut url = Url::parse(&self.metadata.authorization_endpoint)?;
        url.query_pairs_mut()
            .append_pair("response_type", "code")
            .append_pair("client_id", &self.config.client_id)
            .append_pair("redirect_uri", &self.config.redirect_url)
            .append_pair("scope", &self.config.scopes.join(" "))
            .append_pair("state", state)
            .append_pair("nonce", nonce);
        Ok(url.into())
    }

    #[tracing::instrument(skip(self, code), fields(provider = %self.config.name))]
    async fn exchange(&self, code: &str) -> Result<User, ProviderError> {
        let resp = self
            .http
            .post(&self.metadata.token_endpoint)
            .form(&[
                ("grant_type", "authorization_code"),
                ("code", code),
                ("redirect_uri", self.config.redirect_url.as_str()),
                ("client_id", self.config.client_id.as_str()),
                ("client_secret", self.config.client_secret.as_str()),
            ])
            .send()
            .await?;

        let status = resp.status();
        if status == StatusCode::BAD_REQUEST || status == StatusCode::UNAUTHORIZED {
            return Err(ProviderError::Rejected(status));
        }
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(ProviderError::Http {
                status,
                context: body.chars().take(200).collect(),
            });
        }

        let token: TokenResponse = resp.json().await?;
        let id_token = token
            .id_token
            .filter(|t| !t.is_empty())
            .ok_or(ProviderError::MissingIdToken)?;
        let claims = self.verify_id_token(&id_token).await?;

        let name = match claims.name {
            Some(name) if !name.trim().is_empty() => name,
            _ => default_display_name(&self.config.name, &claims.sub),
        };

        Ok(User {
            id: claims.sub,
            email: claims.email,
            email_verified: claims.email_verified,
            name,
            picture: claims.picture,
            nonce: claims.nonce,
        })
    }
}
