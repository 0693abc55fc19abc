//! User and identity persistence.
//!
//! Reads go through [`IdentityReader`]. Writes only happen inside a transaction
//! obtained from [`IdentityStore::begin`]; a transaction handle that is dropped
//! without [`IdentityTx::commit`] rolls back.

use crate::entity::{identity, user};
use crate::error::StoreError;
use sea_orm::{
    ActiveValue::{NotSet, Set},
    ActiveModelTrait, ColumnTrait, ConnectionTrait, DatabaseConnection, DatabaseTransaction,
    EntityTrait, QueryFilter, TransactionTrait,
};
use std::sync::Arc;
use time::OffsetDateTime;

/// A provider identity joined with the internal user it belongs to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub uid: String,
    pub user_id: i64,
    pub provider_account_id: String,
    pub provider: String,
    pub email: String,
    pub name: String,
    pub picture: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserRecord {
    pub id: i64,
    pub uid: String,
}

#[derive(Debug, Clone, Default)]
pub struct CreateIdentity {
    pub provider_account_id: String,
    pub provider: String,
    pub user_id: i64,
    pub email: String,
    pub name: String,
    pub picture: String,
}

#[async_trait::async_trait]
pub trait IdentityReader: Send + Sync {
    /// Looks up an identity by the provider's account id.
    async fn get_identity(
        &self,
        provider_account_id: &str,
        provider: &str,
    ) -> Result<Identity, StoreError>;

    /// Looks up the identity a user holds at `provider`.
    async fn get_user_identity(&self, uid: &str, provider: &str) -> Result<Identity, StoreError>;
}

#[async_trait::async_trait]
pub trait IdentityStore: IdentityReader {
    async fn begin(&self) -> Result<Box<dyn IdentityTx>, StoreError>;

    /// Cheap connectivity check for readiness probes.
    async fn ping(&self) -> Result<(), StoreError>;
}

#[async_trait::async_trait]
pub trait IdentityTx: IdentityReader {
    /// Creates a user with a fresh uid.
    async fn create_user(&self) -> Result<UserRecord, StoreError>;
    async fn create_user_identity(&self, req: &CreateIdentity) -> Result<(), StoreError>;
    async fn commit(self: Box<Self>) -> Result<(), StoreError>;
}

fn to_identity(
    (identity, user): (identity::Model, Option<user::Model>),
) -> Result<Identity, StoreError> {
    // The foreign key makes a missing user impossible outside of a broken schema.
    let user = user.ok_or(StoreError::NotFound)?;
    Ok(Identity {
        uid: user.uid,
        user_id: user.id,
        provider_account_id: identity.id,
        provider: identity.provider,
        email: identity.email,
        name: identity.name,
        picture: identity.picture,
    })
}

async fn find_identity<C: ConnectionTrait>(
    conn: &C,
    provider_account_id: &str,
    provider: &str,
) -> Result<Identity, StoreError> {
    let row = identity::Entity::find_by_id((provider_account_id.to_string(), provider.to_string()))
        .find_also_related(user::Entity)
        .one(conn)
        .await?
        .ok_or(StoreError::NotFound)?;
    to_identity(row)
}

async fn find_user_identity<C: ConnectionTrait>(
    conn: &C,
    uid: &str,
    provider: &str,
) -> Result<Identity, StoreError> {
    let row = identity::Entity::find()
        .find_also_related(user::Entity)
        .filter(user::Column::Uid.eq(uid))
        .filter(identity::Column::Provider.eq(provider))
        .one(conn)
        .await?
        .ok_or(StoreError::NotFound)?;
    to_identity(row)
}

/// sea-orm backed [`IdentityStore`].
#[derive(Clone, Debug)]
pub struct SeaOrmStore {
    db: Arc<DatabaseConnection>,
}

impl SeaOrmStore {
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }
}

#[async_trait::async_trait]
impl IdentityReader for SeaOrmStore {
    async fn get_identity(
        &self,
        provider_account_id: &str,
        provider: &str,
    ) -> Result<Identity, StoreError> {
        find_identity(self.db.as_ref(), provider_account_id, provider).await
    }

    async fn get_user_identity(&self, uid: &str, provider: &str) -> Result<Identity, StoreError> {
        find_user_identity(self.db.as_ref(), uid, provider).await
    }
}

#[async_trait::async_trait]
impl IdentityStore for SeaOrmStore {
    async fn begin(&self) -> Result<Box<dyn IdentityTx>, StoreError> {
        let txn = self.db.begin().await?;
        Ok(Box::new(SeaOrmTx { txn }))
    }

    async fn ping(&self) -> Result<(), StoreError> {
        self.db.ping().await?;
        Ok(())
    }
}

/// A running transaction. Dropping it uncommitted rolls back.
pub struct SeaOrmTx {
    txn: DatabaseTransaction,
}

#[async_trait::async_trait]
impl IdentityReader for SeaOrmTx {
    async fn get_identity(
        &self,
        provider_account_id: &str,
        provider: &str,
    ) -> Result<Identity, StoreError> {
        find_identity(&self.txn, provider_account_id, provider).await
    }

    async fn get_user_identity(&self, uid: &str, provider: &str) -> Result<Identity, StoreError> {
        find_user_identity(&self.txn, uid, provider).await
    }
}

#[async_trait::async_trait]
impl IdentityTx for SeaOrmTx {
    async fn create_user(&self) -> Result<UserRecord, StoreError> {
        let now = OffsetDateTime::now_utc();
        let model = user::ActiveModel {
            id: NotSet,
            uid: Set(uuid::Uuid::new_v4().to_string()),
            created_at: Set(now),
            updated_at: Set(now),
        }
        .insert(&self.txn)
        .await?;
        Ok(UserRecord {
            id: model.id,
            uid: model.uid,
        })
    }

    async fn create_user_identity(&self, req: &CreateIdentity) -> Result<(), StoreError> {
        let now = OffsetDateTime::now_utc();
        let model = identity::ActiveModel {
            id: Set(req.provider_account_id.clone()),
            provider: Set(req.provider.clone()),
            user_id: Set(req.user_id),
            email: Set(req.email.clone()),
            name: Set(req.name.clone()),
            picture: Set(req.picture.clone()),
            created_at: Set(now),
            updated_at: Set(now),
        };
        identity::Entity::insert(model)
            .exec_without_returning(&self.txn)
            .await?;
        Ok(())
    }

    async fn commit(self: Box<Self>) -> Result<(), StoreError> {
        self.txn.commit().await?;
        Ok(())
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use sea_orm::{ConnectionTrait, Database, DatabaseConnection, DbBackend, Statement};
    use std::sync::Arc;

    pub(crate) async fn setup_test_db() -> Arc<DatabaseConnection> {
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
}

#[cfg(test)]
mod tests {
    use super::testing::setup_test_db;
    use super::*;

    fn request(user_id: i64) -> CreateIdentity {
        CreateIdentity {
            provider_account_id: "g1".into(),
            provider: "google".into(),
            user_id,
            email: "a@b.com".into(),
            name: "Alice".into(),
            picture: "https://pic".into(),
        }
    }

    #[tokio::test]
    async fn test_commit_makes_identity_visible() {
        let store = SeaOrmStore::new(setup_test_db().await);

        let tx = store.begin().await.unwrap();
        let user = tx.create_user().await.unwrap();
        tx.create_user_identity(&request(user.id)).await.unwrap();
        let inside = tx.get_identity("g1", "google").await.unwrap();
        tx.commit().await.unwrap();

        let found = store.get_identity("g1", "google").await.unwrap();
        assert_eq!(found, inside);
        assert_eq!(found.uid, user.uid);
        assert_eq!(found.email, "a@b.com");

        let by_uid = store.get_user_identity(&user.uid, "google").await.unwrap();
        assert_eq!(by_uid.provider_account_id, "g1");
    }

    #[tokio::test]
    async fn test_dropped_tx_rolls_back() {
        let store = SeaOrmStore::new(setup_test_db().await);

        {
            let tx = store.begin().await.unwrap();
            let user = tx.create_user().await.unwrap();
            tx.create_user_identity(&request(user.id)).await.unwrap();
        }

        assert!(matches!(
            store.get_identity("g1", "google").await,
            Err(StoreError::NotFound)
        ));
    }

    #[tokio::test]
    async fn test_duplicate_identity_is_already_exists() {
        let store = SeaOrmStore::new(setup_test_db().await);

        let tx = store.begin().await.unwrap();
        let user = tx.create_user().await.unwrap();
        tx.create_user_identity(&request(user.id)).await.unwrap();
        tx.commit().await.unwrap();

        let tx = store.begin().await.unwrap();
        let other = tx.create_user().await.unwrap();
        let err = tx.create_user_identity(&request(other.id)).await.unwrap_err();
        assert!(matches!(err, StoreError::AlreadyExists), "got {err:?}");
    }

    #[tokio::test]
    async fn test_same_account_on_other_provider_is_distinct() {
        let store = SeaOrmStore::new(setup_test_db().await);

        let tx = store.begin().await.unwrap();
        let user = tx.create_user().await.unwrap();
        tx.create_user_identity(&request(user.id)).await.unwrap();
        let mut github = request(user.id);
        github.provider = "github".into();
        tx.create_user_identity(&github).await.unwrap();
        tx.commit().await.unwrap();

        assert_eq!(
            store.get_identity("g1", "github").await.unwrap().uid,
            user.uid
        );
        assert!(store.get_user_identity(&user.uid, "gitlab").await.is_err());
    }

    #[tokio::test]
    async fn test_unknown_identity_not_found() {
        let store = SeaOrmStore::new(setup_test_db().await);
        assert!(matches!(
            store.get_identity("nobody", "google").await,
            Err(StoreError::NotFound)
        ));
        assert!(matches!(
            store.get_user_identity("no-uid", "google").await,
            Err(StoreError::NotFound)
        ));
    }
}
