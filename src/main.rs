use payment_integrity_backend::api::{self, AppState};
use payment_integrity_backend::config::Config;
use payment_integrity_backend::database::{self, store::PgPaymentStore, PoolConfig};
use payment_integrity_backend::payments::alerts::TracingAlertSink;
use payment_integrity_backend::payments::entitlements::HttpEntitlementClient;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let json = std::env::var("LOG_FORMAT")
        .map(|format| format.eq_ignore_ascii_case("json"))
        .unwrap_or(false);

    if json {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables from .env file
    dotenv::dotenv().ok();

    init_tracing();

    // Load configuration
    let config = Config::from_env()?;

    // Log startup info
    tracing::info!("Starting payment integrity service");
    tracing::info!("Environment: {}", config.server.environment);
    tracing::info!("Gateway mode: {}", config.gateway.mode);

    let pool = database::init_pool(
        &config.database.url,
        Some(PoolConfig::with_max_connections(config.database.max_connections)),
    )
    .await?;
    database::run_migrations(&pool).await?;

    let store = Arc::new(PgPaymentStore::new(
        pool,
        config.reconciliation.claim_lease(),
    ));
    let entitlements = Arc::new(HttpEntitlementClient::new(&config.entitlements)?);
    let alerts = Arc::new(TracingAlertSink);

    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port).parse()?;
    let state = AppState::new(config, store, entitlements, alerts);

    // Build router
    let app = api::router(state);

    // Start server
    tracing::info!("Server listening on {}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
