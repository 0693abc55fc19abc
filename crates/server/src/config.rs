use crate::error::TokenError;
use crate::oauth::OidcConfig;
use crate::oauth::oidc::GOOGLE_ISSUER;
use crate::token::{JwtIssuer, KeyMaterial, MAX_TTL, is_hmac, parse_algorithm};
use serde::Deserialize;
use std::time::Duration;
use thiserror::Error;

/// Smallest accepted HMAC secret, in bytes.
pub const MIN_HMAC_SECRET_LEN: usize = 32;

const DEFAULT_ACCESS_TTL_SECS: u64 = 15 * 60;
const DEFAULT_REFRESH_TTL_SECS: u64 = 7 * 24 * 60 * 60;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Configuration build error: {0}")]
    Build(#[from] config::ConfigError),
    #[error("Invalid configuration: {0}")]
    Validation(String),
}

#[derive(Clone, Debug, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub http: HttpConfig,
    pub database_url: String,
    #[serde(default)]
    pub jwt: JwtConfig,
    #[serde(default)]
    pub oauth: OAuthConfig,
    pub otc: OtcConfig,
}

#[derive(Clone, Debug, Deserialize)]
pub struct HttpConfig {
    #[serde(default = "default_listen_addr")]
    pub listen_addr: String,
    #[serde(default = "default_shutdown_timeout")]
    pub shutdown_timeout_secs: u64,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            listen_addr: default_listen_addr(),
            shutdown_timeout_secs: default_shutdown_timeout(),
        }
    }
}

fn default_listen_addr() -> String {
    "0.0.0.0:8080".to_string()
}

fn default_shutdown_timeout() -> u64 {
    10
}

#[derive(Clone, Debug, Deserialize)]
pub struct JwtConfig {
    #[serde(default = "default_issuer")]
    pub issuer: String,
    #[serde(default)]
    pub access: JwtKeyConfig,
    #[serde(default)]
    pub refresh: JwtKeyConfig,
}

impl Default for JwtConfig {
    fn default() -> Self {
        Self {
            issuer: default_issuer(),
            access: JwtKeyConfig::default(),
            refresh: JwtKeyConfig::default(),
        }
    }
}

fn default_issuer() -> String {
    "lexigo-auth-service".to_string()
}

/// Signing setup for one token kind. `ttl_secs` falls back to the kind's default.
#[derive(Clone, Deserialize)]
pub struct JwtKeyConfig {
    #[serde(default = "default_algorithm")]
    pub algorithm: String,
    pub secret: Option<String>,
    pub private_key_pem: Option<String>,
    pub public_key_pem: Option<String>,
    pub ttl_secs: Option<u64>,
}

impl Default for JwtKeyConfig {
    fn default() -> Self {
        Self {
            algorithm: default_algorithm(),
            secret: None,
            private_key_pem: None,
            public_key_pem: None,
            ttl_secs: None,
        }
    }
}

impl std::fmt::Debug for JwtKeyConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JwtKeyConfig")
            .field("algorithm", &self.algorithm)
            .field("secret", &self.secret.as_ref().map(|_| "<redacted>"))
            .field(
                "private_key_pem",
                &self.private_key_pem.as_ref().map(|_| "<redacted>"),
            )
            .field("public_key_pem", &self.public_key_pem.is_some())
            .field("ttl_secs", &self.ttl_secs)
            .finish()
    }
}

fn default_algorithm() -> String {
    "HS256".to_string()
}

impl JwtKeyConfig {
    fn validate(&self, kind: &str) -> Result<(), ConfigError> {
        let alg = parse_algorithm(&self.algorithm).map_err(|_| {
            ConfigError::Validation(format!(
                "jwt.{kind}.algorithm: unknown algorithm {}",
                self.algorithm
            ))
        })?;

        if is_hmac(alg) {
            let secret = self.secret.as_deref().unwrap_or_default();
            if secret.is_empty() {
                return Err(ConfigError::Validation(format!(
                    "jwt.{kind}.secret is required for {}",
                    self.algorithm
                )));
            }
            if secret.len() < MIN_HMAC_SECRET_LEN {
                return Err(ConfigError::Validation(format!(
                    "jwt.{kind}.secret must be at least {MIN_HMAC_SECRET_LEN} bytes"
                )));
            }
        } else if self.private_key_pem.as_deref().unwrap_or_default().is_empty()
            || self.public_key_pem.as_deref().unwrap_or_default().is_empty()
        {
            return Err(ConfigError::Validation(format!(
                "jwt.{kind}.private_key_pem and jwt.{kind}.public_key_pem are required for {}",
                self.algorithm
            )));
        }

        if self.ttl_secs == Some(0) {
            return Err(ConfigError::Validation(format!(
                "jwt.{kind}.ttl_secs must be > 0"
            )));
        }
        if self.ttl_secs.is_some_and(|ttl| ttl > MAX_TTL.as_secs()) {
            return Err(ConfigError::Validation(format!(
                "jwt.{kind}.ttl_secs must be at most {}",
                MAX_TTL.as_secs()
            )));
        }
        Ok(())
    }

    fn build(&self, issuer: &str, default_ttl: u64) -> Result<JwtIssuer, TokenError> {
        let alg = parse_algorithm(&self.algorithm)?;
        let keys = if is_hmac(alg) {
            KeyMaterial::Secret(self.secret.clone().unwrap_or_default().into_bytes())
        } else {
            KeyMaterial::Pem {
                private: self.private_key_pem.clone().unwrap_or_default(),
                public: self.public_key_pem.clone().unwrap_or_default(),
            }
        };
        let ttl = Duration::from_secs(self.ttl_secs.unwrap_or(default_ttl));
        JwtIssuer::new(alg, issuer, ttl, keys)
    }
}

impl JwtConfig {
    pub fn access_issuer(&self) -> Result<JwtIssuer, TokenError> {
        self.access.build(&self.issuer, DEFAULT_ACCESS_TTL_SECS)
    }

    pub fn refresh_issuer(&self) -> Result<JwtIssuer, TokenError> {
        self.refresh.build(&self.issuer, DEFAULT_REFRESH_TTL_SECS)
    }
}

#[derive(Clone, Debug, Default, Deserialize)]
pub struct OAuthConfig {
    pub google: Option<OidcClientConfig>,
}

impl OAuthConfig {
    /// Settings of every configured provider, named by registration name.
    pub fn providers(&self) -> Vec<OidcConfig> {
        let mut out = Vec::new();
        if let Some(google) = &self.google {
            out.push(google.to_oidc_config("google"));
        }
        out
    }
}

#[derive(Clone, Deserialize)]
pub struct OidcClientConfig {
    pub client_id: String,
    pub client_secret: String,
    pub redirect_url: String,
    #[serde(default = "default_issuer_url")]
    pub issuer_url: String,
    #[serde(default = "default_scopes")]
    pub scopes: Vec<String>,
}

impl std::fmt::Debug for OidcClientConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OidcClientConfig")
            .field("client_id", &self.client_id)
            .field("client_secret", &"<redacted>")
            .field("redirect_url", &self.redirect_url)
            .field("issuer_url", &self.issuer_url)
            .field("scopes", &self.scopes)
            .finish()
    }
}

fn default_issuer_url() -> String {
    GOOGLE_ISSUER.to_string()
}

fn default_scopes() -> Vec<String> {
    ["openid", "profile", "email"]
        .into_iter()
        .map(String::from)
        .collect()
}

impl OidcClientConfig {
    pub fn to_oidc_config(&self, name: &str) -> OidcConfig {
        OidcConfig {
            name: name.to_string(),
            issuer_url: self.issuer_url.clone(),
            client_id: self.client_id.clone(),
            client_secret: self.client_secret.clone(),
            redirect_url: self.redirect_url.clone(),
            scopes: self.scopes.clone(),
        }
    }
}

#[derive(Clone, Debug, Deserialize)]
pub struct OtcConfig {
    pub redis_url: String,
    #[serde(default = "default_code_ttl")]
    pub code_ttl_secs: u64,
}

fn default_code_ttl() -> u64 {
    10
}

impl OtcConfig {
    pub fn code_ttl(&self) -> Duration {
        Duration::from_secs(self.code_ttl_secs)
    }
}

impl AppConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.database_url.is_empty() {
            return Err(ConfigError::Validation("database_url is required".into()));
        }
        self.jwt.access.validate("access")?;
        self.jwt.refresh.validate("refresh")?;

        // A shared key would let a leaked refresh key mint access tokens.
        if let (Some(a), Some(r)) = (&self.jwt.access.secret, &self.jwt.refresh.secret)
            && a == r
        {
            return Err(ConfigError::Validation(
                "jwt.access.secret and jwt.refresh.secret must differ".into(),
            ));
        }

        if self.otc.redis_url.is_empty() {
            return Err(ConfigError::Validation("otc.redis_url is required".into()));
        }
        if self.otc.code_ttl_secs == 0 {
            return Err(ConfigError::Validation("otc.code_ttl_secs must be > 0".into()));
        }
        if self.otc.code_ttl_secs > MAX_TTL.as_secs() {
            return Err(ConfigError::Validation(format!(
                "otc.code_ttl_secs must be at most {}",
                MAX_TTL.as_secs()
            )));
        }
        for provider in self.oauth.providers() {
            if provider.client_id.is_empty() || provider.redirect_url.is_empty() {
                return Err(ConfigError::Validation(format!(
                    "oauth.{}: client_id and redirect_url are required",
                    provider.name
                )));
            }
        }
        Ok(())
    }
}

/// Deserializes and validates an already assembled [`config::Config`].
pub fn parse_config(cfg: config::Config) -> Result<AppConfig, ConfigError> {
    let app: AppConfig = cfg.try_deserialize()?;
    app.validate()?;
    Ok(app)
}

/// Load application configuration from `config.yaml` + environment overrides.
///
/// The file is optional. Any environment variable matching a key path separated by
/// double underscores (e.g. `JWT__ACCESS__SECRET`) overrides the file value.
pub fn load_config() -> Result<AppConfig, ConfigError> {
    use config::{Config, Environment, File};
    let cfg = Config::builder()
        .add_source(File::with_name("config.yaml").required(false))
        .add_source(Environment::default().separator("__"))
        .build()?;
    parse_config(cfg)
}
