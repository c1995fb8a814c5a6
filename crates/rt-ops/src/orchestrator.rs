use std::future::Future;
use std::time::Duration;

use chrono::Utc;
use rt_db::models::{InstallationStatus, InstanceRefs, RadiusServer};
use rt_infra::types::{InstanceId, InstanceSpec};
use rt_infra::{CloudProvisioner, Executor, RemoteShell};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::credentials;
use crate::install_script::InstallScript;
use crate::session::ShellConnector;
use crate::settings::Settings;
use crate::store::ServerStore;
use crate::{Error, ErrorKind, Result};

/// Status the cloud reports once an instance has booted.
const RUNNING: &str = "running";

/// Drives a record through `pending → creating → installing → completed`.
///
/// Both entry points record state before returning an error: the record
/// is `failed` and its log names the cause.
pub struct Orchestrator<'a> {
    store: &'a dyn ServerStore,
    provisioner: &'a dyn CloudProvisioner,
    settings: &'a Settings,
    cancel: CancellationToken,
}

impl<'a> Orchestrator<'a> {
    pub fn new(
        store: &'a dyn ServerStore,
        provisioner: &'a dyn CloudProvisioner,
        settings: &'a Settings,
    ) -> Self {
        Self {
            store,
            provisioner,
            settings,
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Create the cloud instance and wait for it to boot.
    ///
    /// Returns with the record `installing` on success and `failed` on any
    /// error after the start transition.
    pub async fn provision(&self, server: &mut RadiusServer) -> Result<()> {
        let id = server.id;
        match self.store.begin_provisioning(id).await? {
            Some(fresh) => *server = fresh,
            None => {
                let current = self.store.get(id).await?;
                return Err(match current.installation_status {
                    status @ (InstallationStatus::Creating | InstallationStatus::Installing) => {
                        Error::Busy(format!("server {id} is already {status}"))
                    }
                    status => Error::InvalidState(format!("cannot provision a server that is {status}")),
                });
            }
        }

        info!(server_id = %id, provider = self.provisioner.name(), "provisioning started");
        if let Err(e) = self.create_and_boot(server).await {
            self.fail(server, "Provisioning failed", &e).await;
            return Err(e);
        }
        info!(server_id = %id, "instance ready for installation");
        Ok(())
    }

    /// Run the install script on a record that finished provisioning.
    ///
    /// Returns the (redacted) script output, which is also appended to the log.
    pub async fn install(&self, server: &mut RadiusServer, shell: &mut dyn RemoteShell) -> Result<String> {
        require_installing(server)?;

        info!(server_id = %server.id, "installation started");
        match self.run_install(server, shell).await {
            Ok(output) => {
                info!(server_id = %server.id, "installation completed");
                Ok(output)
            }
            Err(e) => {
                self.fail(server, "Installation failed", &e).await;
                Err(e)
            }
        }
    }

    /// Open a session through `connector`, install, and disconnect.
    ///
    /// A session that cannot be opened fails the record like a failing
    /// script does.
    pub async fn connect_and_install(
        &self,
        server: &mut RadiusServer,
        connector: &dyn ShellConnector,
    ) -> Result<String> {
        require_installing(server)?;

        let mut shell = match self.guard(connector.open(server)).await {
            Ok(shell) => shell,
            Err(e) => {
                self.fail(server, "Installation failed", &e).await;
                return Err(e);
            }
        };
        let result = self.install(server, shell.as_mut()).await;
        shell.disconnect().await;
        result
    }

    async fn create_and_boot(&self, server: &mut RadiusServer) -> Result<()> {
        self.log(server, "Starting instance creation...").await?;

        let password = credentials::generate_root_password();
        let spec = InstanceSpec {
            label: server.instance_label(),
            region: server.region.clone(),
            plan: server.plan.clone(),
            image: server.image.clone(),
            root_password: password.clone(),
        };
        let info = self.guard(self.provisioner.create_instance(&spec)).await?;

        let ipv4 = info.primary_ipv4();
        let refs = InstanceRefs {
            instance_id: &info.id.0,
            ipv4,
            ipv6: info.ipv6.as_deref(),
            host: ipv4,
            ssh_password: &password,
        };
        self.store.record_instance(server.id, &refs).await?;
        server.instance_id = Some(info.id.0.clone());
        server.ipv4 = ipv4.map(str::to_string);
        server.ipv6 = info.ipv6.clone();
        server.host = ipv4.map(str::to_string);
        server.ssh_password = Some(password);

        let Some(ipv4) = ipv4 else {
            return Err(Error::configuration(format!(
                "instance {} has no public IPv4 address",
                info.id.0
            )));
        };
        self.log(server, &format!("Instance created: {} ({ipv4})", info.id.0))
            .await?;

        self.transition(server, InstallationStatus::Installing).await?;
        self.log(server, "Waiting for instance to boot...").await?;
        self.wait_until_running(server, &info.id).await
    }

    /// Poll until the instance runs, then wait the settle delay.
    ///
    /// At most `attempts` polls with `interval` between them. A failed
    /// status query counts as a non-running attempt.
    async fn wait_until_running(&self, server: &mut RadiusServer, id: &InstanceId) -> Result<()> {
        let poll = &self.settings.poll;
        for attempt in 1..=poll.attempts {
            match self.guard(self.provisioner.instance_status(id)).await {
                Ok(status) if status == RUNNING => {
                    self.log(server, "Instance is running, waiting for SSH to come up...")
                        .await?;
                    self.sleep(poll.settle).await?;
                    return Ok(());
                }
                Ok(status) => {
                    debug!(server_id = %server.id, instance_id = %id.0, attempt, %status, "instance not running yet");
                }
                Err(e) if e.kind() == ErrorKind::Cancelled => return Err(e),
                Err(e) => {
                    warn!(server_id = %server.id, instance_id = %id.0, attempt, error = %e, "instance status check failed");
                }
            }
            if attempt < poll.attempts {
                self.sleep(poll.interval).await?;
            }
        }

        Err(Error::ProvisioningTimeout {
            attempts: poll.attempts,
            interval: poll.interval,
        })
    }

    async fn run_install(&self, server: &mut RadiusServer, shell: &mut dyn RemoteShell) -> Result<String> {
        let secret = server
            .shared_secret
            .clone()
            .ok_or_else(|| Error::configuration("server has no shared secret"))?;
        let script = InstallScript::new(&secret, server.auth_port, server.acct_port, self.settings)?;

        self.log(server, "Starting FreeRADIUS installation...").await?;

        let output = {
            let mut exec = Executor::new(shell, self.settings.timeouts.command)
                .with_cancel(self.cancel.clone());
            exec.set_phase("install");
            exec.redact(script.shared_secret());
            if let Some(password) = &server.ssh_password {
                exec.redact(password.as_str());
            }
            let output = exec
                .pipe(
                    &self.settings.sudo("bash -s"),
                    &script.render(),
                    self.settings.timeouts.install,
                )
                .await?;
            exec.scrub(&output)
        };

        if !server
            .installation_status
            .can_transition_to(InstallationStatus::Completed)
        {
            return Err(Error::InvalidState(format!(
                "server left installing while the script ran (now {})",
                server.installation_status
            )));
        }
        let now = Utc::now();
        self.store.mark_completed(server.id, now).await?;
        server.installation_status = InstallationStatus::Completed;
        server.installed_at.get_or_insert(now);

        self.log(
            server,
            &format!(
                "FreeRADIUS installed successfully!\nInstallation Output:\n{}",
                output.trim_end()
            ),
        )
        .await?;
        Ok(output)
    }

    // ── Helpers ─────────────────────────────────────────────────────

    async fn log(&self, server: &mut RadiusServer, line: &str) -> Result<()> {
        self.store.append_log(server.id, line).await?;
        server.push_log(line);
        Ok(())
    }

    async fn transition(&self, server: &mut RadiusServer, next: InstallationStatus) -> Result<()> {
        let current = server.installation_status;
        if !current.can_transition_to(next) {
            return Err(Error::InvalidState(format!(
                "illegal status transition {current} → {next}"
            )));
        }
        self.store.set_status(server.id, next).await?;
        server.installation_status = next;
        Ok(())
    }

    /// Mark the record failed and log the cause. Storage errors here are
    /// logged, never returned, so the original error reaches the caller.
    async fn fail(&self, server: &mut RadiusServer, context: &str, err: &Error) {
        error!(server_id = %server.id, status = %server.installation_status, error = %err, "{context}");

        let line = failure_line(context, err);
        if let Err(e) = self.store.set_status(server.id, InstallationStatus::Failed).await {
            error!(server_id = %server.id, error = %e, "failed to record failed status");
        }
        server.installation_status = InstallationStatus::Failed;
        if let Err(e) = self.store.append_log(server.id, &line).await {
            error!(server_id = %server.id, error = %e, "failed to append to installation log");
        }
        server.push_log(&line);
    }

    async fn guard<T, E, F>(&self, fut: F) -> Result<T>
    where
        F: Future<Output = std::result::Result<T, E>>,
        E: Into<Error>,
    {
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(rt_infra::Error::Cancelled.into()),
            r = fut => r.map_err(Into::into),
        }
    }

    async fn sleep(&self, delay: Duration) -> Result<()> {
        self.guard(async {
            tokio::time::sleep(delay).await;
            Ok::<_, Error>(())
        })
        .await
    }
}

fn require_installing(server: &RadiusServer) -> Result<()> {
    if server.installation_status != InstallationStatus::Installing {
        return Err(Error::InvalidState(format!(
            "cannot install a server that is {}",
            server.installation_status
        )));
    }
    Ok(())
}

fn failure_line(context: &str, err: &Error) -> String {
    match err {
        Error::ProvisioningTimeout { .. } => err.to_string(),
        Error::Infra(rt_infra::Error::CommandExecution {
            exit_status, output, ..
        }) => format!("{context} (exit status {exit_status}):\n{}", output.trim_end()),
        _ => format!("{context}: {err}"),
    }
}
