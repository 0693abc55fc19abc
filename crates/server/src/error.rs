use axum::http::StatusCode;
use std::collections::BTreeMap;
use thiserror::Error;

type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Errors raised by a session store ([`crate::session::Env`]).
#[derive(Debug, Error)]
pub enum EnvError {
    #[error("session value not found: {0}")]
    NotFound(String),
    #[error("session store error: {0}")]
    Other(String),
}

/// Errors raised by an identity provider adapter.
#[derive(Debug, Error)]
pub enum ProviderError {
    /// The token endpoint refused the authorization code.
    #[error("provider rejected the code with HTTP {0}")]
    Rejected(StatusCode),
    #[error("provider returned HTTP {status}: {context}")]
    Http { status: StatusCode, context: String },
    #[error("transport error talking to provider: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("OIDC discovery failed: {0}")]
    Discovery(String),
    #[error("token response did not contain an id_token")]
    MissingIdToken,
    #[error("invalid id token: {0}")]
    InvalidIdToken(String),
    #[error("invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),
}

/// Failure taxonomy of the authenticator.
///
/// `AuthFailed` is deliberately coarse: a wrong state, a wrong or missing nonce and a
/// provider refusing the code all collapse into it.
#[derive(Debug, Error)]
pub enum AuthError {
    #[error("provider already exists: {0}")]
    ProviderConflict(String),
    #[error("provider not found: {0}")]
    ProviderNotFound(String),
    #[error("auth failed")]
    AuthFailed,
    #[error("{context}: {source}")]
    Session {
        context: &'static str,
        #[source]
        source: EnvError,
    },
    #[error(transparent)]
    Provider(#[from] ProviderError),
}

#[derive(Debug, Error)]
pub enum TokenError {
    #[error("sign token: {0}")]
    Sign(#[source] jsonwebtoken::errors::Error),
    #[error("parse token: {0}")]
    Parse(#[source] jsonwebtoken::errors::Error),
    #[error("invalid key material: {0}")]
    Key(#[source] jsonwebtoken::errors::Error),
    #[error("unsupported signing algorithm: {0}")]
    UnsupportedAlgorithm(String),
    #[error("token lifetime out of range: {0:?}")]
    InvalidTtl(std::time::Duration),
}

#[derive(Debug, Error)]
pub enum OtcError {
    /// Unknown, expired and already redeemed codes are indistinguishable.
    #[error("code not found")]
    NotFound,
    #[error("failed to generate unique code after {0} attempts")]
    Exhausted(usize),
    #[error("code store backend: {0}")]
    Backend(#[source] BoxError),
    #[error("serialize code entry: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("random source: {0}")]
    Random(String),
}

impl From<redis::RedisError> for OtcError {
    fn from(e: redis::RedisError) -> Self {
        OtcError::Backend(Box::new(e))
    }
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("not found")]
    NotFound,
    /// A unique constraint rejected the write; another request created the row first.
    #[error("already exists")]
    AlreadyExists,
    #[error("database error: {0}")]
    Database(#[source] sea_orm::DbErr),
}

impl From<sea_orm::DbErr> for StoreError {
    fn from(e: sea_orm::DbErr) -> Self {
        match e.sql_err() {
            Some(sea_orm::SqlErr::UniqueConstraintViolation(_)) => StoreError::AlreadyExists,
            _ => StoreError::Database(e),
        }
    }
}

/// An error that has been classified for the client.
///
/// This is the only error type the orchestration layer returns; the transport layer
/// renders `status` and `message` and logs everything else.
#[derive(Debug, Error)]
#[error("{message}: {source}")]
pub struct ServiceError {
    pub status: StatusCode,
    pub message: String,
    /// Structured context (e.g. the offending provider name) for logs.
    pub context: BTreeMap<String, String>,
    #[source]
    pub source: BoxError,
}

impl ServiceError {
    pub fn new(
        source: impl Into<BoxError>,
        status: StatusCode,
        message: impl Into<String>,
    ) -> Self {
        Self {
            status,
            message: message.into(),
            context: BTreeMap::new(),
            source: source.into(),
        }
    }

    /// Wraps an unexpected failure as a 500. `op` names the failing step and is kept
    /// in the context only; clients see a generic message.
    pub fn internal(source: impl Into<BoxError>, op: &str) -> Self {
        Self::new(
            source,
            StatusCode::INTERNAL_SERVER_ERROR,
            "Internal Server Error",
        )
        .with_context("op", op)
    }

    pub fn with_context(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.context.insert(key.into(), value.into());
        self
    }

    pub fn is_internal(&self) -> bool {
        self.status.is_server_error()
    }
}
