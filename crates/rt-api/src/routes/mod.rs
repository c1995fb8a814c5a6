pub mod servers;

use axum::Router;
use axum::middleware;
use axum::routing::{get, post};

use crate::auth::auth_middleware;
use crate::state::AppState;

pub fn api_router(state: AppState) -> Router {
    Router::new()
        // Records
        .route("/servers", post(servers::create_server).get(servers::list_servers))
        .route("/servers/{id}", get(servers::get_server))
        // Installation
        .route("/servers/{id}/provision", post(servers::start_provisioning))
        .route("/servers/{id}/provision/cancel", post(servers::cancel_provisioning))
        .route("/servers/{id}/install", post(servers::start_install))
        .route("/servers/{id}/installation", get(servers::installation_progress))
        .route("/servers/{id}/installation/check", get(servers::check_installation))
        // Configuration
        .route("/servers/{id}/configure", post(servers::configure_secrets))
        // Health
        .route("/servers/{id}/services", get(servers::service_status))
        .route("/servers/{id}/health", get(servers::system_health))
        .route("/servers/{id}/radius-test", post(servers::radius_test))
        .route("/servers/{id}/logs", get(servers::recent_logs))
        .route("/servers/{id}/restart", post(servers::restart_services))
        .route("/servers/{id}/connection", get(servers::test_connection))
        // Updates
        .route(
            "/servers/{id}/updates",
            get(servers::check_for_updates).post(servers::apply_update),
        )
        .route("/servers/{id}/backups", get(servers::list_backups))
        .route("/servers/{id}/backups/restore", post(servers::restore_backup))
        // Cloud instance
        .route("/servers/{id}/reboot", post(servers::reboot_instance))
        .route("/servers/{id}/instance", axum::routing::delete(servers::delete_instance))
        .layer(middleware::from_fn_with_state(state.clone(), auth_middleware))
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use rt_infra::UnconfiguredProvisioner;
    use rt_ops::{MemoryStore, RadiusService, RegistrySource, Settings, SshConnector};
    use sqlx::postgres::PgPoolOptions;
    use tower::ServiceExt;

    use super::*;
    use crate::config::AppConfig;
    use crate::jobs::JobRegistry;

    fn state() -> AppState {
        let settings = Settings::default();
        let service = RadiusService::new(
            Arc::new(MemoryStore::new()),
            Arc::new(UnconfiguredProvisioner::new("no cloud in tests")),
            Arc::new(SshConnector::new(rt_infra::SshOptions::default())),
            Arc::new(RegistrySource::new(
                releases_api::ReleasesClient::new("ahmadfoysal/radtik-radius"),
                "v",
            )),
            Arc::new(settings.clone()),
        );
        AppState {
            db: PgPoolOptions::new()
                .connect_lazy("postgres://localhost/radtik_test")
                .unwrap(),
            service: Arc::new(service),
            jobs: JobRegistry::default(),
            config: AppConfig {
                database_url: "postgres://localhost/radtik_test".into(),
                listen_addr: "127.0.0.1:0".parse().unwrap(),
                admin_api_key: "admin-key".into(),
                releases_repo: "ahmadfoysal/radtik-radius".into(),
                releases_api_url: releases_api::API_URL.into(),
                releases_tag_prefix: "v".into(),
                releases_token: None,
                settings,
            },
        }
    }

    #[tokio::test]
    async fn requests_without_the_admin_key_are_rejected() {
        let app = api_router(state());
        let response = app
            .oneshot(Request::get("/servers").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn unknown_server_progress_is_not_found() {
        let app = api_router(state());
        let response = app
            .oneshot(
                Request::get(format!("/servers/{}/installation", uuid::Uuid::new_v4()))
                    .header("authorization", "Bearer admin-key")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn cancelling_without_a_job_is_not_found() {
        let app = api_router(state());
        let response = app
            .oneshot(
                Request::post(format!("/servers/{}/provision/cancel", uuid::Uuid::new_v4()))
                    .header("authorization", "Bearer admin-key")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }
}
