use chrono::{DateTime, Utc};
use rt_infra::{Executor, RemoteShell, shell};
use serde::Serialize;
use tracing::{error, info, warn};

use crate::config_files::{set_client_secret, set_ini_value};
use crate::outcome::Verdict;
use crate::settings::Settings;
use crate::{Error, ErrorKind, Result};

pub const ACTIVE: &str = "active";
const UNKNOWN: &str = "unknown";

/// Result of pushing secrets to a server.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SecretsReport {
    #[serde(flatten)]
    pub verdict: Verdict,
    pub api_status: String,
    pub radius_status: String,
    /// Copy of the client config taken before editing.
    pub backup: Option<String>,
}

impl SecretsReport {
    pub fn failed(err: &Error) -> Self {
        Self {
            verdict: Verdict::failed(err.kind(), format!("Configuration failed: {err}")),
            api_status: UNKNOWN.into(),
            radius_status: UNKNOWN.into(),
            backup: None,
        }
    }

    /// Whether the new secrets reached the server's files, even if the
    /// services did not come back cleanly.
    pub fn applied(&self) -> bool {
        match &self.verdict {
            Verdict::Succeeded { .. } => true,
            Verdict::Failed { kind, .. } => *kind == ErrorKind::PartialUpdate,
        }
    }
}

/// Pushes the NAS shared secret and the API token into the remote config
/// files and restarts the services.
pub struct ConfigManager<'a> {
    exec: Executor<'a>,
    settings: &'a Settings,
}

impl<'a> ConfigManager<'a> {
    pub fn new(shell: &'a mut dyn RemoteShell, settings: &'a Settings) -> Self {
        let mut exec = Executor::new(shell, settings.timeouts.command);
        exec.set_phase("configure");
        Self { exec, settings }
    }

    /// Apply `(shared_secret, auth_token)`. Never returns an error: failures
    /// are reported in the verdict with service statuses `unknown`.
    pub async fn configure_secrets(&mut self, shared_secret: &str, auth_token: &str) -> SecretsReport {
        self.exec.redact(shared_secret);
        self.exec.redact(auth_token);
        match self.apply(shared_secret, auth_token, Utc::now()).await {
            Ok(report) => report,
            Err(e) => {
                error!(error = %e, "failed to configure radius server secrets");
                SecretsReport::failed(&e)
            }
        }
    }

    async fn apply(&mut self, shared_secret: &str, auth_token: &str, now: DateTime<Utc>) -> Result<SecretsReport> {
        for (name, value) in [("shared secret", shared_secret), ("auth token", auth_token)] {
            if value.is_empty() || shell::has_control_chars(value) {
                return Err(Error::configuration(format!("{name} is empty or contains control characters")));
            }
        }

        let settings = self.settings;
        let layout = &settings.layout;

        let clients = self.read(&layout.staging_clients).await?;
        let backup = backup_path(&layout.staging_clients, now);
        self.exec
            .execute(&settings.sudo(&format!(
                "cp -p {} {}",
                shell::quote(&layout.staging_clients),
                shell::quote(&backup)
            )))
            .await?;

        let ini = self.read(&layout.config_ini).await?;
        let ini = set_ini_value(&ini, &layout.auth_token_key, auth_token);
        let clients = set_client_secret(&clients, &layout.nas_block, shared_secret)?;

        self.exec
            .upload(&layout.config_ini, &ini, &settings.privilege)
            .await?;
        self.exec
            .upload(&layout.staging_clients, &clients, &settings.privilege)
            .await?;
        self.exec
            .execute(&settings.sudo(&format!(
                "cp {} {}",
                shell::quote(&layout.staging_clients),
                shell::quote(&layout.active_clients)
            )))
            .await?;

        let services = &settings.services;
        for service in [&services.api, &services.radius] {
            restart(&mut self.exec, settings, service).await?;
        }
        self.exec.settle(settings.settle.secrets).await?;

        let api_status = is_active(&mut self.exec, settings, &services.api).await?;
        let radius_status = is_active(&mut self.exec, settings, &services.radius).await?;

        let verdict = if api_status == ACTIVE && radius_status == ACTIVE {
            info!("radius server secrets configured");
            Verdict::succeeded("Configuration applied successfully")
        } else {
            warn!(%api_status, %radius_status, "secrets applied but services are not active");
            Verdict::failed(
                ErrorKind::PartialUpdate,
                "Configuration applied but services need attention",
            )
        };

        Ok(SecretsReport {
            verdict,
            api_status,
            radius_status,
            backup: Some(backup),
        })
    }

    async fn read(&mut self, path: &str) -> Result<String> {
        Ok(self
            .exec
            .execute(&self.settings.sudo(&format!("cat {}", shell::quote(path))))
            .await?)
    }
}

/// `path` with a `.bak-YYYYmmddHHMMSS` suffix.
pub fn backup_path(path: &str, at: DateTime<Utc>) -> String {
    format!("{path}.bak-{}", at.format("%Y%m%d%H%M%S"))
}

/// Restart `service`. A failed restart is logged; the follow-up
/// `is-active` check reports it.
pub(crate) async fn restart(exec: &mut Executor<'_>, settings: &Settings, service: &str) -> Result<()> {
    let output = exec
        .run(&settings.sudo(&format!("systemctl restart {}", shell::quote(service))))
        .await?;
    if !output.success() {
        warn!(service, exit_status = output.exit_status, output = %exec.scrub(&output.combined()), "service restart failed");
    }
    Ok(())
}

/// `systemctl is-active` state of `service` (`active`, `failed`, ...).
pub(crate) async fn is_active(exec: &mut Executor<'_>, settings: &Settings, service: &str) -> Result<String> {
    let state = exec
        .probe(&settings.sudo(&format!("systemctl is-active {}", shell::quote(service))))
        .await?;
    Ok(if state.is_empty() { UNKNOWN.into() } else { state })
}
