mod auth;
mod config;
mod dto;
mod error;
mod jobs;
mod routes;
mod state;

use std::sync::Arc;

use rt_db::models::{InstallationStatus, RadiusServer};
use rt_infra::linode::LinodeProvisioner;
use rt_infra::{CloudProvisioner, SshOptions, UnconfiguredProvisioner};
use rt_ops::{RadiusService, RegistrySource, SshConnector};
use sqlx::PgPool;
use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;

use crate::config::AppConfig;
use crate::jobs::JobRegistry;
use crate::routes::api_router;
use crate::state::AppState;

#[tokio::main]
async fn main() {
    // Load .env if present
    let _ = dotenvy::dotenv();

    // Init tracing
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let config = AppConfig::from_env();

    // Database
    let db = rt_db::create_pool(&config.database_url)
        .await
        .expect("failed to connect to database");

    rt_db::run_migrations(&db)
        .await
        .expect("failed to run migrations");

    fail_interrupted_provisioning(&db)
        .await
        .expect("failed to recover interrupted provisioning runs");

    // Cloud provider
    let provisioner: Arc<dyn CloudProvisioner> = match LinodeProvisioner::from_env() {
        Ok(p) => Arc::new(p),
        Err(e) => {
            tracing::warn!(error = %e, "cloud provisioning disabled");
            Arc::new(UnconfiguredProvisioner::new(e.to_string()))
        }
    };
    tracing::info!(provider = provisioner.name(), "cloud provider ready");

    // Release registry
    let mut releases = releases_api::ReleasesClient::with_urls(
        config.releases_repo.clone(),
        config.releases_api_url.clone(),
        releases_api::ARCHIVE_URL,
    );
    if let Some(token) = &config.releases_token {
        releases = releases.with_token(token.clone());
    }

    let settings = Arc::new(config.settings.clone());
    let connector = SshConnector::new(SshOptions {
        connect_timeout: settings.timeouts.connect,
        inactivity_timeout: settings.timeouts.install,
    });

    let service = RadiusService::new(
        Arc::new(db.clone()),
        provisioner,
        Arc::new(connector),
        Arc::new(RegistrySource::new(releases, config.releases_tag_prefix.clone())),
        settings,
    );

    let state = AppState {
        db,
        service: Arc::new(service),
        jobs: JobRegistry::default(),
        config: config.clone(),
    };

    let app = api_router(state).layer(TraceLayer::new_for_http());

    let listener = tokio::net::TcpListener::bind(config.listen_addr)
        .await
        .expect("failed to bind listener");

    tracing::info!(addr = %config.listen_addr, "starting radius lifecycle API");

    axum::serve(listener, app).await.expect("server error");
}

/// A record still `creating` at startup lost its provisioning task with the
/// previous process. Mark it failed so it can be provisioned again.
async fn fail_interrupted_provisioning(db: &PgPool) -> Result<(), sqlx::Error> {
    for server in RadiusServer::list_by_status(db, InstallationStatus::Creating).await? {
        tracing::warn!(server_id = %server.id, "provisioning interrupted by restart");
        RadiusServer::append_log(db, server.id, "Provisioning interrupted by a service restart").await?;
        RadiusServer::set_status(db, server.id, InstallationStatus::Failed).await?;
    }
    Ok(())
}
