//! One-time codes: single-use handles that stand in for a token pair across the
//! final browser redirect of a login.

mod memory;
mod redis_store;

pub use memory::MemoryBackend;
pub use redis_store::RedisBackend;

use crate::error::OtcError;
use crate::utils::random_token;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

/// Number of reservation attempts before [`OtcStore::create_code`] gives up.
pub const MAX_ATTEMPTS: usize = 3;

/// Random bytes in a generated code, before base64.
const CODE_BYTES: usize = 32;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, utoipa::ToSchema)]
pub struct TokenPair {
    pub access_token: String,
    pub refresh_token: String,
}

#[async_trait::async_trait]
pub trait OneTimeCodes: Send + Sync {
    async fn create_code(&self, pair: &TokenPair) -> Result<String, OtcError>;
    async fn redeem_code(&self, code: &str) -> Result<TokenPair, OtcError>;

    /// Connectivity check for readiness probes.
    async fn ping(&self) -> Result<(), OtcError> {
        Ok(())
    }
}

/// Key/value primitives a code store needs. Both operations must be atomic.
#[async_trait::async_trait]
pub trait CodeBackend: Send + Sync {
    /// Stores `value` under `key` unless the key exists. Returns whether it was stored.
    async fn set_if_absent(&self, key: &str, value: &str, ttl: Duration)
    -> Result<bool, OtcError>;

    /// Removes and returns the value under `key`.
    async fn take(&self, key: &str) -> Result<Option<String>, OtcError>;

    async fn ping(&self) -> Result<(), OtcError> {
        Ok(())
    }
}

pub type CodeGenerator = Arc<dyn Fn() -> Result<String, OtcError> + Send + Sync>;

pub struct OtcStore<B> {
    backend: B,
    ttl: Duration,
    generate: CodeGenerator,
}

impl<B: CodeBackend> OtcStore<B> {
    pub fn new(backend: B, ttl: Duration) -> Self {
        Self {
            backend,
            ttl,
            generate: Arc::new(|| {
                random_token(CODE_BYTES).map_err(|e| OtcError::Random(e.to_string()))
            }),
        }
    }

    pub fn with_generator(mut self, generate: CodeGenerator) -> Self {
        self.generate = generate;
        self
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }
}

#[async_trait::async_trait]
impl<B: CodeBackend> OneTimeCodes for OtcStore<B> {
    #[tracing::instrument(skip_all)]
    async fn create_code(&self, pair: &TokenPair) -> Result<String, OtcError> {
        let value = serde_json::to_string(pair)?;

        for attempt in 1..=MAX_ATTEMPTS {
            let code = (self.generate)()?;
            if self.backend.set_if_absent(&code, &value, self.ttl).await? {
                return Ok(code);
            }
            tracing::warn!(attempt, "one-time code collision");
        }

        Err(OtcError::Exhausted(MAX_ATTEMPTS))
    }

    #[tracing::instrument(skip_all)]
    async fn redeem_code(&self, code: &str) -> Result<TokenPair, OtcError> {
        let value = self.backend.take(code).await?.ok_or(OtcError::NotFound)?;
        Ok(serde_json::from_str(&value)?)
    }

    async fn ping(&self) -> Result<(), OtcError> {
        self.backend.ping().await
    }
}
