//! Signing and validation of the service's own access and refresh tokens.

use crate::error::TokenError;
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation, decode, encode};
use serde::ser::SerializeMap;
use serde::{Deserialize, Serialize, Serializer};
use std::str::FromStr;
use std::time::Duration;
use time::OffsetDateTime;

/// Longest accepted token lifetime.
pub const MAX_TTL: Duration = Duration::from_secs(366 * 24 * 60 * 60);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TokenType {
    Access,
    Refresh,
}

/// Caller-supplied part of a token.
///
/// Access tokens always carry `email`, `name` and `picture`, empty or not. Refresh
/// tokens never carry them.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct UserClaims {
    pub typ: TokenType,
    pub sub: String,
    #[serde(default)]
    pub provider: String,
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub picture: String,
}

impl Serialize for UserClaims {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(None)?;
        map.serialize_entry("typ", &self.typ)?;
        map.serialize_entry("sub", &self.sub)?;
        map.serialize_entry("provider", &self.provider)?;
        if self.typ == TokenType::Access {
            map.serialize_entry("email", &self.email)?;
            map.serialize_entry("name", &self.name)?;
            map.serialize_entry("picture", &self.picture)?;
        }
        map.end()
    }
}

impl UserClaims {
    pub fn access(
        uid: impl Into<String>,
        provider: impl Into<String>,
        email: impl Into<String>,
        name: impl Into<String>,
        picture: impl Into<String>,
    ) -> Self {
        Self {
            typ: TokenType::Access,
            sub: uid.into(),
            provider: provider.into(),
            email: email.into(),
            name: name.into(),
            picture: picture.into(),
        }
    }

    /// Refresh claims: subject and provider only.
    pub fn refresh(uid: impl Into<String>, provider: impl Into<String>) -> Self {
        Self {
            typ: TokenType::Refresh,
            sub: uid.into(),
            provider: provider.into(),
            email: String::new(),
            name: String::new(),
            picture: String::new(),
        }
    }
}

/// A validated token: the user claims plus the registered claims stamped at issue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claims {
    #[serde(flatten)]
    pub user: UserClaims,
    pub iss: String,
    pub iat: i64,
    pub exp: i64,
}

pub trait TokenIssuer: Send + Sync {
    fn issue(&self, claims: &UserClaims) -> Result<String, TokenError>;
    fn validate(&self, token: &str) -> Result<Claims, TokenError>;
}

/// Key material for a [`JwtIssuer`].
#[derive(Clone)]
pub enum KeyMaterial {
    /// Shared secret for the HS* family.
    Secret(Vec<u8>),
    /// PEM encoded key pair for the RS*, PS*, ES* and EdDSA families.
    Pem { private: String, public: String },
}

impl std::fmt::Debug for KeyMaterial {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            KeyMaterial::Secret(_) => f.write_str("Secret(..)"),
            KeyMaterial::Pem { .. } => f.write_str("Pem { .. }"),
        }
    }
}

pub fn is_hmac(alg: Algorithm) -> bool {
    matches!(alg, Algorithm::HS256 | Algorithm::HS384 | Algorithm::HS512)
}

pub fn parse_algorithm(name: &str) -> Result<Algorithm, TokenError> {
    Algorithm::from_str(name).map_err(|_| TokenError::UnsupportedAlgorithm(name.to_string()))
}

/// JWT issuer bound to exactly one algorithm, issuer name and lifetime.
pub struct JwtIssuer {
    algorithm: Algorithm,
    issuer: String,
    ttl: Duration,
    encoding: EncodingKey,
    decoding: DecodingKey,
    validation: Validation,
}

impl std::fmt::Debug for JwtIssuer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JwtIssuer")
            .field("algorithm", &self.algorithm)
            .field("issuer", &self.issuer)
            .field("ttl", &self.ttl)
            .finish_non_exhaustive()
    }
}

impl JwtIssuer {
    pub fn new(
        algorithm: Algorithm,
        issuer: impl Into<String>,
        ttl: Duration,
        keys: KeyMaterial,
    ) -> Result<Self, TokenError> {
        if ttl.is_zero() || ttl > MAX_TTL {
            return Err(TokenError::InvalidTtl(ttl));
        }

        let (encoding, decoding) = match (&keys, algorithm) {
            (KeyMaterial::Secret(secret), alg) if is_hmac(alg) => (
                EncodingKey::from_secret(secret),
                DecodingKey::from_secret(secret),
            ),
            (
                KeyMaterial::Pem { private, public },
                Algorithm::RS256
                | Algorithm::RS384
                | Algorithm::RS512
                | Algorithm::PS256
                | Algorithm::PS384
                | Algorithm::PS512,
            ) => (
                EncodingKey::from_rsa_pem(private.as_bytes()).map_err(TokenError::Key)?,
                DecodingKey::from_rsa_pem(public.as_bytes()).map_err(TokenError::Key)?,
            ),
            (KeyMaterial::Pem { private, public }, Algorithm::ES256 | Algorithm::ES384) => (
                EncodingKey::from_ec_pem(private.as_bytes()).map_err(TokenError::Key)?,
                DecodingKey::from_ec_pem(public.as_bytes()).map_err(TokenError::Key)?,
            ),
            (KeyMaterial::Pem { private, public }, Algorithm::EdDSA) => (
                EncodingKey::from_ed_pem(private.as_bytes()).map_err(TokenError::Key)?,
                DecodingKey::from_ed_pem(public.as_bytes()).map_err(TokenError::Key)?,
            ),
            (keys, alg) => {
                return Err(TokenError::UnsupportedAlgorithm(format!(
                    "{alg:?} cannot be used with {keys:?}"
                )));
            }
        };

        let issuer = issuer.into();
        // Only the configured algorithm is accepted; a token signed with anything
        // else fails with InvalidAlgorithm before the signature is checked.
        let mut validation = Validation::new(algorithm);
        validation.set_issuer(&[&issuer]);
        validation.set_required_spec_claims(&["exp", "iss"]);
        validation.validate_exp = true;
        validation.leeway = 5;

        Ok(Self {
            algorithm,
            issuer,
            ttl,
            encoding,
            decoding,
            validation,
        })
    }

    pub fn algorithm(&self) -> Algorithm {
        self.algorithm
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    fn issue_at(&self, claims: &UserClaims, now: OffsetDateTime) -> Result<String, TokenError> {
        let iat = now.unix_timestamp();
        let exp = i64::try_from(self.ttl.as_secs())
            .ok()
            .and_then(|ttl| iat.checked_add(ttl))
            .ok_or(TokenError::InvalidTtl(self.ttl))?;
        let wire = Claims {
            user: claims.clone(),
            iss: self.issuer.clone(),
            iat,
            exp,
        };
        encode(&Header::new(self.algorithm), &wire, &self.encoding).map_err(TokenError::Sign)
    }
}

impl TokenIssuer for JwtIssuer {
    fn issue(&self, claims: &UserClaims) -> Result<String, TokenError> {
        self.issue_at(claims, OffsetDateTime::now_utc())
    }

    fn validate(&self, token: &str) -> Result<Claims, TokenError> {
        let data =
            decode::<Claims>(token, &self.decoding, &self.validation).map_err(TokenError::Parse)?;
        Ok(data.claims)
    }
}
