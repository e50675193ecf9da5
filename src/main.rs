use std::{path::Path, sync::Arc};

use dotenvy::dotenv;
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;
use wish_credits::{
    api::{self, AppState},
    config::{database, packages, settings::Settings},
    core::poller::PollerConfig,
    errors::{Error, Result},
    provider::{
        PaymentProvider, UnconfiguredProvider, lemon_squeezy::LemonSqueezyClient,
        signature::WebhookVerifier,
    },
};

/// Creates the directory holding a file-backed `SQLite` database.
fn ensure_database_dir(database_url: &str) -> Result<()> {
    let Some(rest) = database_url.strip_prefix("sqlite://") else {
        return Ok(());
    };
    let path = rest.split('?').next().unwrap_or(rest);
    if path.contains(":memory:") {
        return Ok(());
    }
    if let Some(parent) = Path::new(path).parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    // 1. Initialize tracing (as early as possible)
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    // 2. Load .env file; env vars can also be set externally
    dotenv().ok();

    // 3. Settings and package catalog
    let settings = Settings::from_env()
        .inspect_err(|e| error!("Invalid configuration: {}", e))?;
    info!(environment = ?settings.environment, "Configuration loaded");

    let catalog = packages::load_catalog_or_default(&settings.packages_path)
        .inspect_err(|e| error!("Failed to load package catalog: {}", e))?;

    // 4. Database
    ensure_database_dir(&settings.database_url)?;
    let db = database::create_connection(&settings.database_url)
        .await
        .inspect_err(|e| error!("Failed to connect to database: {}", e))?;
    database::create_tables(&db)
        .await
        .inspect(|_| info!("Database initialized successfully."))
        .inspect_err(|e| error!("Failed to create tables: {}", e))?;

    // 5. Payment provider and webhook verification
    let provider: Arc<dyn PaymentProvider> = match &settings.lemon_squeezy {
        Some(ls) => Arc::new(
            LemonSqueezyClient::new(ls.api_url.clone(), ls.api_key.clone(), ls.store_id.clone())
                .map_err(Error::from)?,
        ),
        None => {
            warn!("Lemon Squeezy credentials not set; checkout and order lookups are disabled");
            Arc::new(UnconfiguredProvider)
        }
    };
    let verifier = WebhookVerifier::new(settings.webhook_secret.clone(), settings.environment)
        .inspect_err(|e| error!("{}", e))?;
    if !verifier.is_enforced() {
        warn!("LEMON_SQUEEZY_WEBHOOK_SECRET not set; webhook signatures will NOT be verified");
    }

    // 6. Serve
    let state = AppState {
        db: Arc::new(db),
        catalog: Arc::new(catalog),
        provider,
        verifier: Arc::new(verifier),
        poller: PollerConfig {
            interval: settings.poll_interval,
            window: settings.poll_window,
        },
        free_credits: settings.default_free_credits,
    };
    let app = api::router(state).layer(TraceLayer::new_for_http());

    let listener = tokio::net::TcpListener::bind(settings.bind_addr)
        .await
        .inspect_err(|e| error!("Failed to bind {}: {}", settings.bind_addr, e))?;
    info!("Listening on {}", settings.bind_addr);

    axum::serve(listener, app).await?;
    Ok(())
}
