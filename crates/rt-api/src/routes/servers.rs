use axum::Json;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use rt_db::models::{InstallationStatus, NewRadiusServer, RadiusServer};
use rt_ops::health::{ConnectionTest, InstallationCheck, RadiusTest, RecentLogs, ServiceStatus, SystemHealth};
use rt_ops::secrets::SecretsReport;
use rt_ops::updates::{BackupList, RestoreReport, UpdateCheck, UpdateReport};
use rt_ops::{InstallationProgress, Outcome, TargetVersion, credentials};
use uuid::Uuid;

use crate::dto::{
    ConfigureRequest, CreateServerRequest, InstanceActionResponse, JobResponse, LogsQuery, RadiusTestRequest,
    RestoreRequest, ServerResponse, UpdateRequest,
};
use crate::error::ApiError;
use crate::state::AppState;

// ── Records ─────────────────────────────────────────────────────────

pub async fn create_server(
    State(state): State<AppState>,
    Json(req): Json<CreateServerRequest>,
) -> Result<(StatusCode, Json<ServerResponse>), ApiError> {
    req.validate()?;

    let shared_secret = req.shared_secret.clone().unwrap_or_else(credentials::generate_secret);
    let new = NewRadiusServer {
        name: req.name.trim(),
        label: req.label.as_deref().filter(|l| !l.is_empty()),
        region: &req.region,
        plan: &req.plan,
        image: &req.image,
        host: req.host.as_deref().filter(|h| !h.is_empty()),
        ssh_port: req.ssh_port,
        ssh_username: &req.ssh_username,
        ssh_private_key: req.ssh_private_key.as_deref().filter(|k| !k.trim().is_empty()),
        auth_port: req.auth_port,
        acct_port: req.acct_port,
        shared_secret: Some(&shared_secret),
    };
    let server = RadiusServer::insert(&state.db, &new).await?;
    tracing::info!(server_id = %server.id, name = %server.name, "radius server created");

    Ok((StatusCode::CREATED, Json(server.into())))
}

pub async fn list_servers(State(state): State<AppState>) -> Result<Json<Vec<ServerResponse>>, ApiError> {
    let servers = RadiusServer::list(&state.db).await?;
    Ok(Json(servers.into_iter().map(ServerResponse::from).collect()))
}

pub async fn get_server(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<ServerResponse>, ApiError> {
    let server = RadiusServer::get_by_id(&state.db, id).await?;
    Ok(Json(server.into()))
}

// ── Installation jobs ───────────────────────────────────────────────

/// Start provisioning and installation in the background. Progress is read
/// back through `GET /servers/{id}/installation`.
pub async fn start_provisioning(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<(StatusCode, Json<JobResponse>), ApiError> {
    let server = RadiusServer::get_by_id(&state.db, id).await?;
    if !server.installation_status.can_provision() {
        return Err(ApiError::Conflict(format!(
            "cannot provision a server that is {}",
            server.installation_status
        )));
    }

    let service = state.service.clone();
    state.jobs.spawn(id, move |cancel| async move {
        match service.provision_and_install(id, cancel).await {
            Ok(_) => tracing::info!(server_id = %id, "provisioning job finished"),
            Err(e) => tracing::error!(server_id = %id, error = %e, "provisioning job failed"),
        }
    })?;

    Ok((
        StatusCode::ACCEPTED,
        Json(JobResponse {
            server_id: id,
            job: "provision",
            status: "started",
        }),
    ))
}

/// Re-run only the install script on a record left `installing`.
pub async fn start_install(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<(StatusCode, Json<JobResponse>), ApiError> {
    let server = RadiusServer::get_by_id(&state.db, id).await?;
    if server.installation_status != InstallationStatus::Installing {
        return Err(ApiError::Conflict(format!(
            "cannot install a server that is {}",
            server.installation_status
        )));
    }

    let service = state.service.clone();
    state.jobs.spawn(id, move |cancel| async move {
        match service.install(id, cancel).await {
            Ok(_) => tracing::info!(server_id = %id, "install job finished"),
            Err(e) => tracing::error!(server_id = %id, error = %e, "install job failed"),
        }
    })?;

    Ok((
        StatusCode::ACCEPTED,
        Json(JobResponse {
            server_id: id,
            job: "install",
            status: "started",
        }),
    ))
}

pub async fn cancel_provisioning(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<(StatusCode, Json<JobResponse>), ApiError> {
    if !state.jobs.cancel(id) {
        return Err(ApiError::NotFound);
    }
    tracing::info!(server_id = %id, "provisioning job cancellation requested");
    Ok((
        StatusCode::ACCEPTED,
        Json(JobResponse {
            server_id: id,
            job: "provision",
            status: "cancelling",
        }),
    ))
}

pub async fn installation_progress(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<InstallationProgress>, ApiError> {
    Ok(Json(state.service.installation_progress(id).await?))
}

pub async fn check_installation(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Json<Outcome<InstallationCheck>> {
    Json(state.service.check_installation_status(id).await)
}

// ── Configuration ───────────────────────────────────────────────────

pub async fn configure_secrets(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    body: Option<Json<ConfigureRequest>>,
) -> Json<SecretsReport> {
    let req = body.map(|Json(req)| req).unwrap_or_default();
    Json(
        state
            .service
            .configure_secrets(id, req.shared_secret, req.auth_token)
            .await,
    )
}

// ── Health ──────────────────────────────────────────────────────────

pub async fn service_status(State(state): State<AppState>, Path(id): Path<Uuid>) -> Json<Outcome<ServiceStatus>> {
    Json(state.service.service_status(id).await)
}

pub async fn system_health(State(state): State<AppState>, Path(id): Path<Uuid>) -> Json<Outcome<SystemHealth>> {
    Json(state.service.system_health(id).await)
}

pub async fn radius_test(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(req): Json<RadiusTestRequest>,
) -> Json<Outcome<RadiusTest>> {
    Json(state.service.test_radius_auth(id, &req.username, &req.password).await)
}

pub async fn recent_logs(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Query(query): Query<LogsQuery>,
) -> Json<Outcome<RecentLogs>> {
    Json(state.service.recent_logs(id, query.lines).await)
}

pub async fn restart_services(State(state): State<AppState>, Path(id): Path<Uuid>) -> Json<Outcome<ServiceStatus>> {
    Json(state.service.restart_services(id).await)
}

pub async fn test_connection(State(state): State<AppState>, Path(id): Path<Uuid>) -> Json<Outcome<ConnectionTest>> {
    Json(state.service.test_connection(id).await)
}

// ── Updates ─────────────────────────────────────────────────────────

pub async fn check_for_updates(State(state): State<AppState>, Path(id): Path<Uuid>) -> Json<Outcome<UpdateCheck>> {
    Json(state.service.check_for_updates(id).await)
}

pub async fn apply_update(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    body: Option<Json<UpdateRequest>>,
) -> Result<Json<UpdateReport>, ApiError> {
    let req = body.map(|Json(req)| req).unwrap_or_default();
    let target: TargetVersion = req
        .version
        .as_deref()
        .unwrap_or("latest")
        .parse()
        .map_err(ApiError::BadRequest)?;
    Ok(Json(state.service.apply_update(id, &target).await))
}

pub async fn list_backups(State(state): State<AppState>, Path(id): Path<Uuid>) -> Json<Outcome<BackupList>> {
    Json(state.service.list_backups(id).await)
}

pub async fn restore_backup(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(req): Json<RestoreRequest>,
) -> Json<RestoreReport> {
    Json(state.service.restore_backup(id, &req.location).await)
}

// ── Cloud instance ──────────────────────────────────────────────────

pub async fn reboot_instance(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<InstanceActionResponse>, ApiError> {
    let success = state.service.reboot_instance(id).await?;
    Ok(Json(InstanceActionResponse { success }))
}

pub async fn delete_instance(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<InstanceActionResponse>, ApiError> {
    if state.jobs.is_running(id) {
        return Err(ApiError::Conflict(format!("a job is running for server {id}")));
    }
    let success = state.service.delete_instance(id).await?;
    Ok(Json(InstanceActionResponse { success }))
}
