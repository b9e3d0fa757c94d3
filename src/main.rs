use std::sync::Arc;

use anyhow::Context;
use rbac_gate::{
    AppState, CredentialState, TemplateState,
    bootstrap::{BootstrapPlan, Bootstrapper},
    config::{AppConfig, Env},
    create_router,
    memory::{InMemoryCredentialStore, InMemoryTemplateStore},
    repository::{PostgresCredentialStore, PostgresTemplateStore},
};
use sqlx::postgres::PgPoolOptions;
use tokio::net::TcpListener;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// main
///
/// Loads configuration, initializes logging, connects the stores, converges the
/// RBAC seed data, schedules the periodic bootstrap and serves HTTP.
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // 1. Configuration (fail-fast on missing production secrets)
    dotenv::dotenv().ok();
    let config = AppConfig::load().context("invalid configuration")?;

    // 2. Logging: RUST_LOG wins, otherwise crate debug + HTTP info.
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "rbac_gate=debug,tower_http=info".into());

    match config.env {
        Env::Local => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(tracing_subscriber::fmt::layer().pretty())
                .init();
        }
        Env::Production => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(tracing_subscriber::fmt::layer().json())
                .init();
        }
    }

    tracing::info!("Application starting in {:?} mode", config.env);

    // 3. Stores: Postgres when configured, in-process otherwise.
    let (store, templates): (CredentialState, TemplateState) = match &config.database_url {
        Some(url) => {
            let pool = PgPoolOptions::new()
                .max_connections(config.db_max_connections)
                .min_connections(config.db_min_connections)
                .acquire_timeout(config.db_acquire_timeout)
                .max_lifetime(config.db_max_lifetime)
                .connect(url)
                .await
                .context("failed to connect to Postgres, check DATABASE_URL")?;

            sqlx::migrate!("./migrations")
                .run(&pool)
                .await
                .context("failed to apply migrations")?;

            (
                Arc::new(PostgresCredentialStore::new(pool.clone())),
                Arc::new(PostgresTemplateStore::new(pool)),
            )
        }
        None => {
            tracing::warn!("DATABASE_URL not set, using the in-memory store; data is lost on exit");
            (
                Arc::new(InMemoryCredentialStore::new()),
                Arc::new(InMemoryTemplateStore::new()),
            )
        }
    };

    let state = AppState::new(config.clone(), store, templates);

    // 4. Bootstrap once now, then on a fixed interval.
    let plan = BootstrapPlan::from_config(&config, state.catalog.clone())
        .context("failed to hash the admin password")?;
    let bootstrapper = Bootstrapper::new(state.store.clone(), plan);
    if bootstrapper.run_logged().await {
        let stored = state.store.list_permissions().await?;
        let missing = state.catalog.verify(&stored);
        if !missing.is_empty() {
            tracing::warn!(?missing, "permission catalog entries absent from the store");
        }
    }
    let _scheduler = bootstrapper.spawn(config.bootstrap_interval);

    // 5. Router and server
    let app = create_router(state);
    let listener = TcpListener::bind(&config.bind_addr)
        .await
        .with_context(|| format!("failed to bind {}", config.bind_addr))?;

    tracing::info!("Listening on {}", config.bind_addr);
    tracing::info!("API Documentation (Swagger UI) available at /swagger-ui");

    axum::serve(listener, app).await.context("server error")?;
    Ok(())
}
