//! Login orchestration: the operations the HTTP layer exposes, composed from the
//! authenticator, the identity store, the token issuers and the one-time code store.

use crate::error::{AuthError, EnvError, ServiceError, StoreError};
use crate::oauth::{Authenticate, User};
use crate::otc::{OneTimeCodes, TokenPair};
use crate::session::Env;
use crate::store::{CreateIdentity, Identity, IdentityStore};
use crate::token::{TokenIssuer, TokenType, UserClaims};
use crate::utils::{random_token, with_otc};
use axum::http::StatusCode;
use std::sync::Arc;
use thiserror::Error;

/// Session key holding the caller's post-login redirect target.
pub const REDIRECT_URL_KEY: &str = "redirect_url";

/// Random bytes in `state` and `nonce`.
const CHALLENGE_BYTES: usize = 32;

#[derive(Debug, Error)]
#[error("{0} is required")]
pub struct MissingComponent(pub &'static str);

#[derive(Debug, Clone)]
pub struct LoginRequest {
    pub provider: String,
    pub redirect_url: String,
}

#[derive(Debug, Clone)]
pub struct AuthCallbackRequest {
    pub provider: String,
    pub code: String,
    pub state: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthCallbackResponse {
    pub uid: String,
    pub name: String,
    pub email: String,
    pub picture: String,
    pub access_token: String,
    pub refresh_token: String,
    /// `{redirect_url}?otc={otc}`
    pub redirect_url: String,
    pub otc: String,
}

#[derive(Clone)]
pub struct AuthService {
    auth: Arc<dyn Authenticate>,
    store: Arc<dyn IdentityStore>,
    access_token: Arc<dyn TokenIssuer>,
    refresh_token: Arc<dyn TokenIssuer>,
    otc: Arc<dyn OneTimeCodes>,
}

#[derive(Default)]
pub struct AuthServiceBuilder {
    auth: Option<Arc<dyn Authenticate>>,
    store: Option<Arc<dyn IdentityStore>>,
    access_token: Option<Arc<dyn TokenIssuer>>,
    refresh_token: Option<Arc<dyn TokenIssuer>>,
    otc: Option<Arc<dyn OneTimeCodes>>,
}

impl AuthServiceBuilder {
    pub fn authenticator(mut self, auth: Arc<dyn Authenticate>) -> Self {
        self.auth = Some(auth);
        self
    }

    pub fn store(mut self, store: Arc<dyn IdentityStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn access_token(mut self, issuer: Arc<dyn TokenIssuer>) -> Self {
        self.access_token = Some(issuer);
        self
    }

    pub fn refresh_token(mut self, issuer: Arc<dyn TokenIssuer>) -> Self {
        self.refresh_token = Some(issuer);
        self
    }

    pub fn otc(mut self, otc: Arc<dyn OneTimeCodes>) -> Self {
        self.otc = Some(otc);
        self
    }

    pub fn build(self) -> Result<AuthService, MissingComponent> {
        Ok(AuthService {
            auth: self.auth.ok_or(MissingComponent("authenticator"))?,
            store: self.store.ok_or(MissingComponent("identity store"))?,
            access_token: self
                .access_token
                .ok_or(MissingComponent("access token issuer"))?,
            refresh_token: self
                .refresh_token
                .ok_or(MissingComponent("refresh token issuer"))?,
            otc: self.otc.ok_or(MissingComponent("one-time code store"))?,
        })
    }
}

fn access_claims(id: &Identity) -> UserClaims {
    UserClaims::access(&id.uid, &id.provider, &id.email, &id.name, &id.picture)
}

impl AuthService {
    pub fn builder() -> AuthServiceBuilder {
        AuthServiceBuilder::default()
    }

    /// Starts a login: saves the redirect target, state and nonce into `env` and
    /// returns the provider's authorization URL.
    #[tracing::instrument(skip(self, env, req), fields(provider = %req.provider))]
    pub fn login_url(&self, env: &mut dyn Env, req: LoginRequest) -> Result<String, ServiceError> {
        let state = random_token(CHALLENGE_BYTES)
            .map_err(|e| ServiceError::internal(e, "generate state"))?;
        let nonce = random_token(CHALLENGE_BYTES)
            .map_err(|e| ServiceError::internal(e, "generate nonce"))?;

        env.save(REDIRECT_URL_KEY, &req.redirect_url)
            .map_err(|e| ServiceError::internal(e, "save redirect url"))?;

        match self.auth.login_url(env, &req.provider, &state, &nonce) {
            Ok(url) => Ok(url),
            Err(e @ AuthError::ProviderNotFound(_)) => Err(ServiceError::new(
                e,
                StatusCode::NOT_FOUND,
                "oauth provider not found",
            )
            .with_context("provider", &req.provider)),
            Err(e) => Err(ServiceError::internal(e, "login url")),
        }
    }

    /// Completes a login: verifies the callback, provisions the identity on first
    /// login, issues a token pair and parks it behind a one-time code.
    #[tracing::instrument(skip(self, env, req), fields(provider = %req.provider))]
    pub async fn auth_callback(
        &self,
        env: &dyn Env,
        req: AuthCallbackRequest,
    ) -> Result<AuthCallbackResponse, ServiceError> {
        let user = self
            .auth
            .exchange(env, &req.provider, &req.code, &req.state)
            .await
            .map_err(|e| match e {
                AuthError::ProviderNotFound(_) => {
                    ServiceError::new(e, StatusCode::NOT_FOUND, "provider not found")
                        .with_context("provider", &req.provider)
                }
                AuthError::AuthFailed => {
                    ServiceError::new(e, StatusCode::UNAUTHORIZED, "authentication failed")
                        .with_context("provider", &req.provider)
                }
                e => ServiceError::internal(e, "exchange"),
            })?;

        let redirect_url = env.load(REDIRECT_URL_KEY).map_err(|e| match e {
            EnvError::NotFound(_) => ServiceError::new(
                e,
                StatusCode::BAD_REQUEST,
                "login session has no redirect url",
            ),
            e => ServiceError::internal(e, "load redirect url"),
        })?;

        let id = self
            .get_or_create_identity(&req.provider, &user)
            .await
            .map_err(|e| ServiceError::internal(e, "get or create identity"))?;

        let access_token = self
            .access_token
            .issue(&access_claims(&id))
            .map_err(|e| ServiceError::internal(e, "issue access token"))?;
        let refresh_token = self
            .refresh_token
            .issue(&UserClaims::refresh(&id.uid, &id.provider))
            .map_err(|e| ServiceError::internal(e, "issue refresh token"))?;

        let pair = TokenPair {
            access_token,
            refresh_token,
        };
        let code = self
            .otc
            .create_code(&pair)
            .await
            .map_err(|e| ServiceError::internal(e, "create one-time code"))?;

        tracing::info!(uid = %id.uid, "login completed");

        Ok(AuthCallbackResponse {
            uid: id.uid,
            name: id.name,
            email: id.email,
            picture: id.picture,
            access_token: pair.access_token,
            refresh_token: pair.refresh_token,
            redirect_url: with_otc(&redirect_url, &code),
            otc: code,
        })
    }

    /// Issues a new access token for a valid refresh token. The refresh token
    /// itself is not rotated.
    #[tracing::instrument(skip_all)]
    pub async fn refresh(&self, refresh_token: &str) -> Result<String, ServiceError> {
        let claims = self.refresh_token.validate(refresh_token).map_err(|e| {
            ServiceError::new(e, StatusCode::UNAUTHORIZED, "invalid refresh token")
        })?;
        if claims.user.typ != TokenType::Refresh {
            return Err(ServiceError::new(
                "token is not a refresh token",
                StatusCode::UNAUTHORIZED,
                "invalid refresh token",
            ));
        }

        let id = self
            .store
            .get_user_identity(&claims.user.sub, &claims.user.provider)
            .await
            .map_err(|e| match e {
                StoreError::NotFound => {
                    ServiceError::new(e, StatusCode::UNAUTHORIZED, "invalid user identity")
                }
                e => ServiceError::internal(e, "get user identity"),
            })?;

        self.access_token
            .issue(&access_claims(&id))
            .map_err(|e| ServiceError::internal(e, "issue access token"))
    }

    /// Trades a one-time code for the token pair it stands for. Works once per code.
    #[tracing::instrument(skip_all)]
    pub async fn redeem_code(&self, code: &str) -> Result<TokenPair, ServiceError> {
        self.otc.redeem_code(code).await.map_err(|e| {
            ServiceError::new(
                e,
                StatusCode::INTERNAL_SERVER_ERROR,
                "failed to redeem code",
            )
        })
    }

    /// Checks the database and the code store.
    pub async fn ready(&self) -> Result<(), ServiceError> {
        self.store.ping().await.map_err(|e| {
            ServiceError::new(e, StatusCode::SERVICE_UNAVAILABLE, "database unavailable")
        })?;
        self.otc.ping().await.map_err(|e| {
            ServiceError::new(e, StatusCode::SERVICE_UNAVAILABLE, "code store unavailable")
        })
    }

    async fn get_or_create_identity(
        &self,
        provider: &str,
        user: &User,
    ) -> Result<Identity, StoreError> {
        match self.store.get_identity(&user.id, provider).await {
            Ok(id) => return Ok(id),
            Err(StoreError::NotFound) => {}
            Err(e) => return Err(e),
        }

        match self.create_identity(provider, user).await {
            Err(StoreError::AlreadyExists) => {
                // A concurrent first login for the same account won the insert.
                tracing::debug!("identity created concurrently, reading it back");
                self.store.get_identity(&user.id, provider).await
            }
            other => other,
        }
    }

    async fn create_identity(&self, provider: &str, user: &User) -> Result<Identity, StoreError> {
        let tx = self.store.begin().await?;

        let record = tx.create_user().await?;
        tx.create_user_identity(&CreateIdentity {
            provider_account_id: user.id.clone(),
            provider: provider.to_string(),
            user_id: record.id,
            email: user.verified_email().to_string(),
            name: user.name.clone(),
            picture: user.picture.clone(),
        })
        .await?;
        let id = tx.get_identity(&user.id, provider).await?;

        tx.commit().await?;
        tracing::info!(uid = %id.uid, "provisioned new user");
        Ok(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::user;
    use crate::error::ProviderError;
    use crate::oauth::{Authenticator, IdentityProvider};
    use crate::otc::{MemoryBackend, OtcStore};
    use crate::session::MemoryEnv;
    use crate::store::testing::setup_test_db;
    use crate::store::{IdentityReader, IdentityTx, SeaOrmStore};
    use crate::token::{JwtIssuer, KeyMaterial};
    use jsonwebtoken::Algorithm;
    use sea_orm::{DatabaseConnection, EntityTrait, PaginatorTrait};
    use std::sync::Mutex;
    use std::time::Duration;

    /// Provider that echoes the nonce it was given at login.
    struct FakeProvider {
        user: User,
        nonce: Mutex<String>,
    }

    #[async_trait::async_trait]
    impl IdentityProvider for FakeProvider {
        fn login_url(&self, state: &str, nonce: &str) -> Result<String, ProviderError> {
            *self.nonce.lock().unwrap() = nonce.to_string();
            Ok(format!("https://idp.example/auth?state={state}"))
        }

        async fn exchange(&self, code: &str) -> Result<User, ProviderError> {
            if code != "abc" {
                return Err(ProviderError::Rejected(StatusCode::BAD_REQUEST));
            }
            Ok(User {
                nonce: self.nonce.lock().unwrap().clone(),
                ..self.user.clone()
            })
        }
    }

    fn google_user(email_verified: bool) -> User {
        User {
            id: "g1".into(),
            email: "a@b.com".into(),
            email_verified,
            name: "Alice".into(),
            picture: "https://pic".into(),
            nonce: String::new(),
        }
    }

    fn issuer(secret: &[u8], ttl: u64) -> Arc<dyn TokenIssuer> {
        Arc::new(
            JwtIssuer::new(
                Algorithm::HS256,
                "lexigo-auth-service",
                Duration::from_secs(ttl),
                KeyMaterial::Secret(secret.to_vec()),
            )
            .unwrap(),
        )
    }

    struct Harness {
        service: AuthService,
        db: Arc<DatabaseConnection>,
        access: Arc<dyn TokenIssuer>,
    }

    async fn harness_with_store(
        user: User,
        store: impl FnOnce(Arc<DatabaseConnection>) -> Arc<dyn IdentityStore>,
    ) -> Harness {
        let db = setup_test_db().await;
        let auth = Authenticator::new();
        auth.register(
            "google",
            Arc::new(FakeProvider {
                user,
                nonce: Mutex::new(String::new()),
            }),
        )
        .unwrap();
        let access = issuer(b"access-secret-access-secret-0000", 900);
        let service = AuthService::builder()
            .authenticator(Arc::new(auth))
            .store(store(db.clone()))
            .access_token(access.clone())
            .refresh_token(issuer(b"refresh-secret-refresh-secret-00", 3600))
            .otc(Arc::new(OtcStore::new(
                MemoryBackend::new(),
                Duration::from_secs(10),
            )))
            .build()
            .unwrap();
        Harness {
            service,
            db,
            access,
        }
    }

    async fn harness(user: User) -> Harness {
        harness_with_store(user, |db| Arc::new(SeaOrmStore::new(db))).await
    }

    fn login(service: &AuthService, redirect_url: &str) -> MemoryEnv {
        let mut env = MemoryEnv::new();
        service
            .login_url(
                &mut env,
                LoginRequest {
                    provider: "google".into(),
                    redirect_url: redirect_url.into(),
                },
            )
            .unwrap();
        env
    }

    async fn callback(
        service: &AuthService,
        env: &MemoryEnv,
    ) -> Result<AuthCallbackResponse, ServiceError> {
        service
            .auth_callback(
                env,
                AuthCallbackRequest {
                    provider: "google".into(),
                    code: "abc".into(),
                    state: env.load("state").unwrap(),
                },
            )
            .await
    }

    #[tokio::test]
    async fn test_login_to_redeem_flow() {
        let h = harness(google_user(true)).await;

        let env = login(&h.service, "/app");
        assert_eq!(env.load(REDIRECT_URL_KEY).unwrap(), "/app");

        let resp = callback(&h.service, &env).await.unwrap();
        assert_eq!(resp.redirect_url, format!("/app?otc={}", resp.otc));
        assert_eq!(resp.email, "a@b.com");
        assert_eq!(resp.name, "Alice");

        let pair = h.service.redeem_code(&resp.otc).await.unwrap();
        assert_eq!(pair.access_token, resp.access_token);
        assert_eq!(pair.refresh_token, resp.refresh_token);

        let claims = h.access.validate(&pair.access_token).unwrap();
        assert_eq!(claims.user.sub, resp.uid);
        assert_eq!(claims.user.provider, "google");
        assert_eq!(claims.user.email, "a@b.com");

        let again = h.service.redeem_code(&resp.otc).await.unwrap_err();
        assert_eq!(again.status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(again.message, "failed to redeem code");
    }

    #[tokio::test]
    async fn test_repeat_login_reuses_user() {
        let h = harness(google_user(true)).await;

        let first = callback(&h.service, &login(&h.service, "/app"))
            .await
            .unwrap();
        let second = callback(&h.service, &login(&h.service, "/app"))
            .await
            .unwrap();

        assert_eq!(first.uid, second.uid);
        assert_eq!(user::Entity::find().count(h.db.as_ref()).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_unverified_email_is_not_stored() {
        let h = harness(google_user(false)).await;

        let resp = callback(&h.service, &login(&h.service, "/app"))
            .await
            .unwrap();
        assert_eq!(resp.email, "");

        let stored = SeaOrmStore::new(h.db.clone())
            .get_identity("g1", "google")
            .await
            .unwrap();
        assert_eq!(stored.email, "");
        assert_eq!(stored.name, "Alice");
    }

    #[tokio::test]
    async fn test_wrong_state_is_unauthorized() {
        let h = harness(google_user(true)).await;
        let env = login(&h.service, "/app");

        let err = h
            .service
            .auth_callback(
                &env,
                AuthCallbackRequest {
                    provider: "google".into(),
                    code: "abc".into(),
                    state: "forged".into(),
                },
            )
            .await
            .unwrap_err();
        assert_eq!(err.status, StatusCode::UNAUTHORIZED);
        assert_eq!(err.message, "authentication failed");
        assert_eq!(err.context.get("provider").map(String::as_str), Some("google"));
    }

    #[tokio::test]
    async fn test_rejected_code_is_unauthorized() {
        let h = harness(google_user(true)).await;
        let env = login(&h.service, "/app");

        let err = h
            .service
            .auth_callback(
                &env,
                AuthCallbackRequest {
                    provider: "google".into(),
                    code: "stale".into(),
                    state: env.load("state").unwrap(),
                },
            )
            .await
            .unwrap_err();
        assert_eq!(err.status, StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_unknown_provider_is_not_found() {
        let h = harness(google_user(true)).await;
        let mut env = MemoryEnv::new();

        let err = h
            .service
            .login_url(
                &mut env,
                LoginRequest {
                    provider: "myspace".into(),
                    redirect_url: "/app".into(),
                },
            )
            .unwrap_err();
        assert_eq!(err.status, StatusCode::NOT_FOUND);
        assert_eq!(
            err.context.get("provider").map(String::as_str),
            Some("myspace")
        );

        let err = h
            .service
            .auth_callback(
                &env,
                AuthCallbackRequest {
                    provider: "myspace".into(),
                    code: "abc".into(),
                    state: "s".into(),
                },
            )
            .await
            .unwrap_err();
        assert_eq!(err.status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_refresh_issues_new_access_token() {
        let h = harness(google_user(true)).await;
        let resp = callback(&h.service, &login(&h.service, "/app"))
            .await
            .unwrap();

        let access = h.service.refresh(&resp.refresh_token).await.unwrap();
        let claims = h.access.validate(&access).unwrap();
        assert_eq!(claims.user.sub, resp.uid);
        assert_eq!(claims.user.typ, TokenType::Access);
        assert_eq!(claims.user.name, "Alice");
    }

    #[tokio::test]
    async fn test_refresh_rejects_access_token() {
        let h = harness(google_user(true)).await;
        let resp = callback(&h.service, &login(&h.service, "/app"))
            .await
            .unwrap();

        let err = h.service.refresh(&resp.access_token).await.unwrap_err();
        assert_eq!(err.status, StatusCode::UNAUTHORIZED);
        assert_eq!(err.message, "invalid refresh token");
    }

    #[tokio::test]
    async fn test_refresh_rejects_access_typ_signed_with_refresh_key() {
        let h = harness(google_user(true)).await;
        let refresh_key = issuer(b"refresh-secret-refresh-secret-00", 3600);
        let forged = refresh_key
            .issue(&UserClaims::access("uid", "google", "", "", ""))
            .unwrap();

        let err = h.service.refresh(&forged).await.unwrap_err();
        assert_eq!(err.status, StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_refresh_for_unknown_identity() {
        let h = harness(google_user(true)).await;
        let refresh_key = issuer(b"refresh-secret-refresh-secret-00", 3600);
        let token = refresh_key
            .issue(&UserClaims::refresh("ghost", "google"))
            .unwrap();

        let err = h.service.refresh(&token).await.unwrap_err();
        assert_eq!(err.status, StatusCode::UNAUTHORIZED);
        assert_eq!(err.message, "invalid user identity");
    }

    /// Store whose first transaction loses the insert race to another login.
    struct RacingStore {
        inner: SeaOrmStore,
        raced: Mutex<bool>,
    }

    #[async_trait::async_trait]
    impl IdentityReader for RacingStore {
        async fn get_identity(
            &self,
            provider_account_id: &str,
            provider: &str,
        ) -> Result<Identity, StoreError> {
            self.inner.get_identity(provider_account_id, provider).await
        }

        async fn get_user_identity(
            &self,
            uid: &str,
            provider: &str,
        ) -> Result<Identity, StoreError> {
            self.inner.get_user_identity(uid, provider).await
        }
    }

    #[async_trait::async_trait]
    impl IdentityStore for RacingStore {
        async fn begin(&self) -> Result<Box<dyn IdentityTx>, StoreError> {
            let first = std::mem::replace(&mut *self.raced.lock().unwrap(), true);
            if !first {
                let winner = self.inner.begin().await?;
                let record = winner.create_user().await?;
                winner
                    .create_user_identity(&CreateIdentity {
                        provider_account_id: "g1".into(),
                        provider: "google".into(),
                        user_id: record.id,
                        ..Default::default()
                    })
                    .await?;
                winner.commit().await?;
            }
            self.inner.begin().await
        }

        async fn ping(&self) -> Result<(), StoreError> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_concurrent_first_login_reads_back_winner() {
        let h = harness_with_store(google_user(true), |db| {
            Arc::new(RacingStore {
                inner: SeaOrmStore::new(db),
                raced: Mutex::new(false),
            })
        })
        .await;

        let resp = callback(&h.service, &login(&h.service, "/app"))
            .await
            .unwrap();

        let stored = SeaOrmStore::new(h.db.clone())
            .get_identity("g1", "google")
            .await
            .unwrap();
        assert_eq!(resp.uid, stored.uid);
        // The loser's user row was rolled back with its transaction.
        assert_eq!(user::Entity::find().count(h.db.as_ref()).await.unwrap(), 1);
    }

    #[test]
    fn test_builder_names_missing_component() {
        let err = AuthService::builder().build().err().unwrap();
        assert_eq!(err.to_string(), "authenticator is required");
    }
}
