//! Shared fixtures for integration tests.
#![allow(dead_code)]

use federated_auth::api::AuthAppState;
use federated_auth::oauth::{Authenticator, IdentityProvider};
use federated_auth::otc::{MemoryBackend, OtcStore};
use federated_auth::service::AuthService;
use federated_auth::store::SeaOrmStore;
use federated_auth::token::{JwtIssuer, KeyMaterial, TokenIssuer};
use jsonwebtoken::Algorithm;
use sea_orm::{ConnectionTrait, Database, DatabaseConnection, DbBackend, Statement};
use std::sync::Arc;
use std::time::Duration;

pub const ISSUER: &str = "lexigo-auth-service";
pub const ACCESS_SECRET: &[u8] = b"access-secret-access-secret-0000";
pub const REFRESH_SECRET: &[u8] = b"refresh-secret-refresh-secret-00";

/// In-memory SQLite database with the users and identities tables.
pub async fn create_test_db() -> Arc<DatabaseConnection> {
    let db = Database::connect("sqlite::memory:").await.expect("connect");

    db.execute(Statement::from_string(
        DbBackend::Sqlite,
        r#"CREATE TABLE users (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            uid TEXT NOT NULL UNIQUE,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        );"#,
    ))
    .await
    .expect("create users table");

    db.execute(Statement::from_string(
        DbBackend::Sqlite,
        r#"CREATE TABLE identities (
            id TEXT NOT NULL,
            provider TEXT NOT NULL,
            user_id INTEGER NOT NULL REFERENCES users(id) ON DELETE CASCADE,
            email TEXT NOT NULL DEFAULT '',
            name TEXT NOT NULL DEFAULT '',
            picture TEXT NOT NULL DEFAULT '',
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL,
            PRIMARY KEY (id, provider)
        );"#,
    ))
    .await
    .expect("create identities table");

    Arc::new(db)
}

pub fn access_issuer() -> JwtIssuer {
    JwtIssuer::new(
        Algorithm::HS256,
        ISSUER,
        Duration::from_secs(900),
        KeyMaterial::Secret(ACCESS_SECRET.to_vec()),
    )
    .expect("access issuer")
}

pub fn refresh_issuer() -> JwtIssuer {
    JwtIssuer::new(
        Algorithm::HS256,
        ISSUER,
        Duration::from_secs(3600),
        KeyMaterial::Secret(REFRESH_SECRET.to_vec()),
    )
    .expect("refresh issuer")
}

/// App state wired to SQLite and an in-memory code store, with `providers` registered.
pub async fn create_test_state(
    providers: Vec<(&str, Arc<dyn IdentityProvider>)>,
) -> (AuthAppState, Arc<DatabaseConnection>) {
    let db = create_test_db().await;
    let authenticator = Authenticator::with_providers(providers).expect("providers");
    let access: Arc<dyn TokenIssuer> = Arc::new(access_issuer());
    let refresh: Arc<dyn TokenIssuer> = Arc::new(refresh_issuer());

    let service = AuthService::builder()
        .authenticator(Arc::new(authenticator))
        .store(Arc::new(SeaOrmStore::new(db.clone())))
        .access_token(access)
        .refresh_token(refresh)
        .otc(Arc::new(OtcStore::new(
            MemoryBackend::new(),
            Duration::from_secs(10),
        )))
        .build()
        .expect("service");

    (
        AuthAppState {
            service: Arc::new(service),
        },
        db,
    )
}
