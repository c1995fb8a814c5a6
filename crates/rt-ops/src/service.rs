use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use chrono::{DateTime, Utc};
use rt_db::models::{InstallationStatus, PushedConfig, RadiusServer};
use rt_infra::types::InstanceId;
use rt_infra::{CloudProvisioner, RemoteShell};
use serde::Serialize;
use tokio::sync::OwnedMutexGuard;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use uuid::Uuid;

use crate::credentials;
use crate::health::{
    ConnectionTest, HealthMonitor, InstallationCheck, RadiusTest, RecentLogs, ServiceStatus, SystemHealth,
};
use crate::orchestrator::Orchestrator;
use crate::outcome::{Outcome, Verdict};
use crate::secrets::{ConfigManager, SecretsReport};
use crate::session::ShellConnector;
use crate::settings::Settings;
use crate::store::ServerStore;
use crate::updates::{BackupList, ReleaseSource, RestoreReport, UpdateCheck, UpdateManager, UpdateReport};
use crate::versions::TargetVersion;
use crate::{Error, ErrorKind, Result};

/// Read path for a running or finished installation.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct InstallationProgress {
    pub status: InstallationStatus,
    pub log: String,
    pub installed_at: Option<DateTime<Utc>>,
}

/// One open remote session and the record it belongs to.
struct Session {
    server: RadiusServer,
    shell: Box<dyn RemoteShell>,
}

impl Session {
    async fn close(mut self) {
        self.shell.disconnect().await;
    }
}

/// Caller-facing lifecycle operations on stored RADIUS servers.
///
/// Every operation loads the record, opens at most one remote session,
/// runs one manager and disconnects before returning. Mutating operations
/// hold a per-record lock and fail with `Busy` while another one runs.
pub struct RadiusService {
    store: Arc<dyn ServerStore>,
    provisioner: Arc<dyn CloudProvisioner>,
    connector: Arc<dyn ShellConnector>,
    releases: Arc<dyn ReleaseSource>,
    settings: Arc<Settings>,
    locks: Mutex<HashMap<Uuid, Arc<tokio::sync::Mutex<()>>>>,
}

impl RadiusService {
    pub fn new(
        store: Arc<dyn ServerStore>,
        provisioner: Arc<dyn CloudProvisioner>,
        connector: Arc<dyn ShellConnector>,
        releases: Arc<dyn ReleaseSource>,
        settings: Arc<Settings>,
    ) -> Self {
        Self {
            store,
            provisioner,
            connector,
            releases,
            settings,
            locks: Mutex::default(),
        }
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    // ── Installation ────────────────────────────────────────────────

    /// Create the cloud instance and wait for it to boot.
    pub async fn provision(&self, id: Uuid, cancel: CancellationToken) -> Result<RadiusServer> {
        let _guard = self.lock(id)?;
        let mut server = self.store.get(id).await?;
        self.orchestrator(cancel).provision(&mut server).await?;
        Ok(server)
    }

    /// Run the install script on a provisioned record. Returns the script output.
    pub async fn install(&self, id: Uuid, cancel: CancellationToken) -> Result<String> {
        let _guard = self.lock(id)?;
        let mut server = self.store.get(id).await?;
        self.orchestrator(cancel)
            .connect_and_install(&mut server, self.connector.as_ref())
            .await
    }

    /// Provision, then install. The body of the background provisioning job.
    pub async fn provision_and_install(&self, id: Uuid, cancel: CancellationToken) -> Result<String> {
        let _guard = self.lock(id)?;
        let mut server = self.store.get(id).await?;
        let orchestrator = self.orchestrator(cancel);
        orchestrator.provision(&mut server).await?;
        orchestrator
            .connect_and_install(&mut server, self.connector.as_ref())
            .await
    }

    pub async fn installation_progress(&self, id: Uuid) -> Result<InstallationProgress> {
        let server = self.store.get(id).await?;
        Ok(InstallationProgress {
            status: server.installation_status,
            log: server.installation_log,
            installed_at: server.installed_at,
        })
    }

    // ── Cloud instance ──────────────────────────────────────────────

    /// Destroy the record's cloud instance. Never called automatically.
    pub async fn delete_instance(&self, id: Uuid) -> Result<bool> {
        let _guard = self.lock(id)?;
        let (server, instance) = self.instance_of(id).await?;
        let deleted = self.provisioner.delete_instance(&instance).await;
        if deleted {
            info!(server_id = %id, instance_id = %instance, "instance deleted");
            self.store
                .append_log(server.id, &format!("Instance {instance} deleted"))
                .await?;
        }
        Ok(deleted)
    }

    pub async fn reboot_instance(&self, id: Uuid) -> Result<bool> {
        let _guard = self.lock(id)?;
        let (_, instance) = self.instance_of(id).await?;
        let rebooted = self.provisioner.reboot_instance(&instance).await;
        if rebooted {
            info!(server_id = %id, instance_id = %instance, "instance rebooted");
        }
        Ok(rebooted)
    }

    // ── Configuration ───────────────────────────────────────────────

    /// Push the NAS shared secret and API token to the server and, once they
    /// are in place, store them with the sync endpoint.
    ///
    /// Missing values fall back to the record's, then to fresh random ones.
    pub async fn configure_secrets(
        &self,
        id: Uuid,
        shared_secret: Option<String>,
        auth_token: Option<String>,
    ) -> SecretsReport {
        let _guard = match self.lock(id) {
            Ok(guard) => guard,
            Err(e) => return SecretsReport::failed(&e),
        };
        let mut session = match self.installed_session(id).await {
            Ok(session) => session,
            Err(e) => {
                let report = SecretsReport::failed(&e);
                self.note_failure(id, &report.verdict, None).await;
                return report;
            }
        };

        let shared_secret = shared_secret
            .or_else(|| session.server.shared_secret.clone())
            .filter(|s| !s.is_empty())
            .unwrap_or_else(credentials::generate_secret);
        let auth_token = auth_token
            .or_else(|| session.server.auth_token.clone())
            .filter(|t| !t.is_empty())
            .unwrap_or_else(credentials::generate_secret);

        let mut report = ConfigManager::new(session.shell.as_mut(), &self.settings)
            .configure_secrets(&shared_secret, &auth_token)
            .await;
        let host = session.server.ssh_host().unwrap_or_default().to_string();
        session.close().await;

        if report.applied() {
            let sync_endpoint = format!("http://{host}:{}", self.settings.services.api_port);
            let pushed = PushedConfig {
                shared_secret: &shared_secret,
                auth_token: &auth_token,
                sync_endpoint: &sync_endpoint,
            };
            if let Err(e) = self.store.record_config(id, &pushed).await {
                error!(server_id = %id, error = %e, "secrets applied but not saved");
                report.verdict = Verdict::failed(e.kind(), format!("Configuration failed: {e}"));
            }
        }
        self.note_failure(id, &report.verdict, report.backup.as_deref()).await;
        report
    }

    // ── Health ──────────────────────────────────────────────────────

    pub async fn service_status(&self, id: Uuid) -> Outcome<ServiceStatus> {
        let mut session = match self.session(id).await {
            Ok(session) => session,
            Err(e) => return Outcome::failed(&e),
        };
        let outcome = HealthMonitor::new(session.shell.as_mut(), &self.settings)
            .service_status()
            .await;
        session.close().await;
        outcome
    }

    pub async fn system_health(&self, id: Uuid) -> Outcome<SystemHealth> {
        let mut session = match self.session(id).await {
            Ok(session) => session,
            Err(e) => return Outcome::failed(&e),
        };
        let outcome = HealthMonitor::new(session.shell.as_mut(), &self.settings)
            .system_health()
            .await;
        session.close().await;
        outcome
    }

    /// Authenticate `username` against the daemon on the server itself.
    /// The daemon's `localhost` client secret is used; the record's shared
    /// secret only when that cannot be read.
    pub async fn test_radius_auth(&self, id: Uuid, username: &str, password: &str) -> Outcome<RadiusTest> {
        let mut session = match self.session(id).await {
            Ok(session) => session,
            Err(e) => return Outcome::failed(&e),
        };
        let secret = session
            .server
            .shared_secret
            .clone()
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| self.settings.fallback_radius_secret.clone());
        let outcome = match u16::try_from(session.server.auth_port) {
            Ok(port) => {
                HealthMonitor::new(session.shell.as_mut(), &self.settings)
                    .test_radius_auth(username, password, &secret, port)
                    .await
            }
            Err(_) => Outcome::failed(&Error::configuration(format!(
                "invalid auth port {}",
                session.server.auth_port
            ))),
        };
        session.close().await;
        outcome
    }

    pub async fn recent_logs(&self, id: Uuid, lines: u32) -> Outcome<RecentLogs> {
        let mut session = match self.session(id).await {
            Ok(session) => session,
            Err(e) => return Outcome::failed(&e),
        };
        let outcome = HealthMonitor::new(session.shell.as_mut(), &self.settings)
            .recent_logs(lines)
            .await;
        session.close().await;
        outcome
    }

    pub async fn restart_services(&self, id: Uuid) -> Outcome<ServiceStatus> {
        let _guard = match self.lock(id) {
            Ok(guard) => guard,
            Err(e) => return Outcome::failed(&e),
        };
        let mut session = match self.session(id).await {
            Ok(session) => session,
            Err(e) => return Outcome::failed(&e),
        };
        let outcome = HealthMonitor::new(session.shell.as_mut(), &self.settings)
            .restart_services()
            .await;
        session.close().await;
        outcome
    }

    pub async fn check_installation_status(&self, id: Uuid) -> Outcome<InstallationCheck> {
        let mut session = match self.session(id).await {
            Ok(session) => session,
            Err(e) => return Outcome::failed(&e),
        };
        let outcome = HealthMonitor::new(session.shell.as_mut(), &self.settings)
            .check_installation_status()
            .await;
        session.close().await;
        outcome
    }

    pub async fn test_connection(&self, id: Uuid) -> Outcome<ConnectionTest> {
        let mut session = match self.session(id).await {
            Ok(session) => session,
            Err(e) => return Outcome::failed(&e),
        };
        let outcome = HealthMonitor::new(session.shell.as_mut(), &self.settings)
            .test_connection()
            .await;
        session.close().await;
        outcome
    }

    // ── Updates ─────────────────────────────────────────────────────

    pub async fn check_for_updates(&self, id: Uuid) -> Outcome<UpdateCheck> {
        let mut session = match self.session(id).await {
            Ok(session) => session,
            Err(e) => return Outcome::failed(&e),
        };
        let outcome = UpdateManager::new(session.shell.as_mut(), &self.settings, self.releases.as_ref())
            .check_for_updates()
            .await;
        session.close().await;
        outcome
    }

    pub async fn apply_update(&self, id: Uuid, target: &TargetVersion) -> UpdateReport {
        let _guard = match self.lock(id) {
            Ok(guard) => guard,
            Err(e) => return UpdateReport::failed(&e),
        };
        let mut session = match self.installed_session(id).await {
            Ok(session) => session,
            Err(e) => {
                let report = UpdateReport::failed(&e);
                self.note_failure(id, &report.verdict, None).await;
                return report;
            }
        };
        let report = UpdateManager::new(session.shell.as_mut(), &self.settings, self.releases.as_ref())
            .apply_update(target)
            .await;
        session.close().await;
        if report.verdict.success() {
            self.note(id, report.verdict.message()).await;
        } else {
            self.note_failure(id, &report.verdict, report.backup_location.as_deref())
                .await;
        }
        report
    }

    pub async fn restore_backup(&self, id: Uuid, location: &str) -> RestoreReport {
        let _guard = match self.lock(id) {
            Ok(guard) => guard,
            Err(e) => return RestoreReport::failed(location, &e),
        };
        let mut session = match self.installed_session(id).await {
            Ok(session) => session,
            Err(e) => {
                let report = RestoreReport::failed(location, &e);
                self.note_failure(id, &report.verdict, None).await;
                return report;
            }
        };
        let report = UpdateManager::new(session.shell.as_mut(), &self.settings, self.releases.as_ref())
            .restore_backup(location)
            .await;
        session.close().await;
        if report.verdict.success() {
            self.note(id, report.verdict.message()).await;
        } else {
            self.note_failure(id, &report.verdict, None).await;
        }
        report
    }

    pub async fn list_backups(&self, id: Uuid) -> Outcome<BackupList> {
        let mut session = match self.session(id).await {
            Ok(session) => session,
            Err(e) => return Outcome::failed(&e),
        };
        let outcome = UpdateManager::new(session.shell.as_mut(), &self.settings, self.releases.as_ref())
            .list_backups()
            .await;
        session.close().await;
        outcome
    }

    // ── Helpers ─────────────────────────────────────────────────────

    fn orchestrator(&self, cancel: CancellationToken) -> Orchestrator<'_> {
        Orchestrator::new(self.store.as_ref(), self.provisioner.as_ref(), &self.settings).with_cancel(cancel)
    }

    /// Take the record's operation lock without waiting.
    fn lock(&self, id: Uuid) -> Result<OwnedMutexGuard<()>> {
        let lock = {
            let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
            locks.retain(|_, lock| Arc::strong_count(lock) > 1);
            locks.entry(id).or_default().clone()
        };
        lock.try_lock_owned()
            .map_err(|_| Error::Busy(format!("another operation is running on server {id}")))
    }

    async fn session(&self, id: Uuid) -> Result<Session> {
        let server = self.store.get(id).await?;
        let shell = self.connector.open(&server).await?;
        Ok(Session { server, shell })
    }

    /// A session on a record whose installation completed.
    async fn installed_session(&self, id: Uuid) -> Result<Session> {
        let server = self.store.get(id).await?;
        if server.installation_status != InstallationStatus::Completed {
            return Err(Error::InvalidState(format!(
                "server {id} is {}, not installed",
                server.installation_status
            )));
        }
        let shell = self.connector.open(&server).await?;
        Ok(Session { server, shell })
    }

    async fn instance_of(&self, id: Uuid) -> Result<(RadiusServer, InstanceId)> {
        let server = self.store.get(id).await?;
        let instance = server
            .instance_id
            .clone()
            .filter(|i| !i.is_empty())
            .map(InstanceId)
            .ok_or_else(|| Error::InvalidState(format!("server {id} has no cloud instance")))?;
        Ok((server, instance))
    }

    /// Append a failed verdict to the record's log, with the backup that
    /// survives it. Missing records have no log to write to.
    async fn note_failure(&self, id: Uuid, verdict: &Verdict, backup: Option<&str>) {
        let Verdict::Failed { kind, message } = verdict else {
            return;
        };
        if *kind == ErrorKind::NotFound {
            return;
        }
        match backup.filter(|b| !b.is_empty() && !message.contains(*b)) {
            Some(backup) => self.note(id, &format!("{message}; backup at {backup}")).await,
            None => self.note(id, message).await,
        }
    }

    async fn note(&self, id: Uuid, line: &str) {
        if let Err(e) = self.store.append_log(id, line).await {
            error!(server_id = %id, error = %e, "failed to append to installation log");
        }
    }
}
