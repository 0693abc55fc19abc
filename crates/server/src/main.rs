use federated_auth::api::{AuthAppState, start_webserver};
use federated_auth::config::load_config;
use federated_auth::oauth::{Authenticator, OidcProvider};
use federated_auth::otc::{OtcStore, RedisBackend};
use federated_auth::service::AuthService;
use federated_auth::store::SeaOrmStore;
use sea_orm::Database;
use std::sync::Arc;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

fn initialize_tracing() {
    let default_directives = "federated_auth=info,tower_http=info,sea_orm=warn";
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_directives));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt::layer().with_target(true).with_level(true))
        .init();
}

#[tokio::main]
async fn main() -> color_eyre::eyre::Result<()> {
    color_eyre::install()?;
    dotenvy::dotenv().ok();
    initialize_tracing();

    let config = load_config()?;

    let db = Arc::new(Database::connect(&config.database_url).await?);
    tracing::info!("connected to database");

    let codes = OtcStore::new(
        RedisBackend::connect(&config.otc.redis_url).await?,
        config.otc.code_ttl(),
    );
    tracing::info!(ttl_secs = config.otc.code_ttl_secs, "connected to one-time code store");

    let authenticator = Authenticator::new();
    for provider in config.oauth.providers() {
        let name = provider.name.clone();
        let discovered = OidcProvider::discover(provider).await?;
        authenticator.register(name, Arc::new(discovered))?;
    }
    if authenticator.provider_names().is_empty() {
        tracing::warn!("no identity providers configured, every login will fail with 404");
    }

    let service = AuthService::builder()
        .authenticator(Arc::new(authenticator))
        .store(Arc::new(SeaOrmStore::new(db)))
        .access_token(Arc::new(config.jwt.access_issuer()?))
        .refresh_token(Arc::new(config.jwt.refresh_issuer()?))
        .otc(Arc::new(codes))
        .build()?;

    let state = AuthAppState {
        service: Arc::new(service),
    };
    start_webserver(state, &config.http).await
}
