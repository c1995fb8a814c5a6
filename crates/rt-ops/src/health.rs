use std::time::Instant;

use rt_infra::{Executor, RemoteShell, shell};
use serde::Serialize;
use tracing::error;

use crate::config_files::client_secret;
use crate::outcome::Outcome;
use crate::secrets::{ACTIVE, is_active, restart};
use crate::settings::Settings;
use crate::Result;

const MAX_LOG_LINES: u32 = 1000;
const NOT_AVAILABLE: &str = "N/A";
const CONNECTION_MARKER: &str = "connection_test_successful";

// ── Reports ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ServiceState {
    pub status: String,
    pub active: bool,
    pub enabled: bool,
    pub running: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ApiServiceState {
    #[serde(flatten)]
    pub service: ServiceState,
    pub listening: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ServiceStatus {
    pub freeradius: ServiceState,
    pub api: ApiServiceState,
}

impl ServiceStatus {
    pub fn all_active(&self) -> bool {
        self.freeradius.active && self.api.service.active
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SystemHealth {
    pub cpu_usage: f64,
    pub memory_total: u64,
    pub memory_used: u64,
    pub memory_percent: f64,
    pub disk_usage_percent: u32,
    pub uptime: String,
    pub load_average: String,
    pub database_size: String,
    pub radius_users: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RadiusTest {
    /// The daemon answered, with either an accept or a reject.
    pub success: bool,
    pub can_communicate: bool,
    pub accepted: bool,
    pub output: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RecentLogs {
    pub lines: u32,
    pub freeradius_log: String,
    pub api_log: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct InstallationCheck {
    pub installed: bool,
    pub radius_installed: bool,
    pub api_dir_exists: bool,
    pub services: ServiceStatus,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConnectionTest {
    pub connected: bool,
    pub latency_ms: u64,
}

// ── HealthMonitor ───────────────────────────────────────────────────

/// Read-mostly diagnostics over one remote session.
///
/// Every public method reports failures in its [`Outcome`] instead of
/// returning an error.
pub struct HealthMonitor<'a> {
    exec: Executor<'a>,
    settings: &'a Settings,
}

impl<'a> HealthMonitor<'a> {
    pub fn new(shell: &'a mut dyn RemoteShell, settings: &'a Settings) -> Self {
        let mut exec = Executor::new(shell, settings.timeouts.command);
        exec.set_phase("health");
        Self { exec, settings }
    }

    pub async fn service_status(&mut self) -> Outcome<ServiceStatus> {
        report("service status", self.try_service_status().await)
    }

    pub async fn system_health(&mut self) -> Outcome<SystemHealth> {
        report("system health", self.try_system_health().await)
    }

    /// Authenticate against the local daemon with the secret of its
    /// `localhost` client. `fallback_secret` is used when the active client
    /// config has none.
    pub async fn test_radius_auth(
        &mut self,
        username: &str,
        password: &str,
        fallback_secret: &str,
        auth_port: u16,
    ) -> Outcome<RadiusTest> {
        self.exec.redact(password);
        self.exec.redact(fallback_secret);
        report("radius test", self.try_radius_auth(username, password, fallback_secret, auth_port).await)
    }

    /// Tail both services' journals. `lines` is clamped to `1..=1000`.
    pub async fn recent_logs(&mut self, lines: u32) -> Outcome<RecentLogs> {
        report("recent logs", self.try_recent_logs(lines).await)
    }

    pub async fn restart_services(&mut self) -> Outcome<ServiceStatus> {
        report("restart services", self.try_restart().await)
    }

    pub async fn check_installation_status(&mut self) -> Outcome<InstallationCheck> {
        report("installation check", self.try_installation_check().await)
    }

    pub async fn test_connection(&mut self) -> Outcome<ConnectionTest> {
        report("connection test", self.try_connection().await)
    }

    async fn try_service_status(&mut self) -> Result<ServiceStatus> {
        let settings = self.settings;
        let freeradius = self.service_state(&settings.services.radius).await?;
        let api = self.service_state(&settings.services.api).await?;
        let sockets = self.exec.probe(&settings.sudo("ss -tuln")).await?;
        Ok(ServiceStatus {
            freeradius,
            api: ApiServiceState {
                service: api,
                listening: parse_listening(&sockets, settings.services.api_port),
            },
        })
    }

    async fn service_state(&mut self, service: &str) -> Result<ServiceState> {
        let settings = self.settings;
        let status = is_active(&mut self.exec, settings, service).await?;
        let enabled = self
            .exec
            .probe(&settings.sudo(&format!("systemctl is-enabled {}", shell::quote(service))))
            .await?;
        let active = status == ACTIVE;
        Ok(ServiceState {
            status,
            active,
            enabled: enabled == "enabled",
            running: active,
        })
    }

    async fn try_system_health(&mut self) -> Result<SystemHealth> {
        let settings = self.settings;
        let database = shell::quote(&settings.layout.database);

        let top = self.exec.probe("top -bn1 | head -n 5").await?;
        let free = self.exec.probe("free -m").await?;
        let df = self.exec.probe("df -P /").await?;
        let uptime = self.exec.probe("uptime -p").await?;
        let loadavg = self.exec.probe("cat /proc/loadavg").await?;
        let db_size = self
            .exec
            .probe(&settings.sudo(&format!("du -sh {database} 2>/dev/null")))
            .await?;
        let users = self
            .exec
            .probe(&settings.sudo(&format!(
                "sqlite3 {database} 'SELECT COUNT(*) FROM radcheck;' 2>/dev/null"
            )))
            .await?;

        let (memory_total, memory_used, memory_percent) = parse_memory(&free);
        Ok(SystemHealth {
            cpu_usage: parse_cpu_usage(&top),
            memory_total,
            memory_used,
            memory_percent,
            disk_usage_percent: parse_disk_usage(&df),
            uptime,
            load_average: parse_load_average(&loadavg),
            database_size: db_size
                .split_whitespace()
                .next()
                .unwrap_or(NOT_AVAILABLE)
                .to_string(),
            radius_users: users.lines().next().and_then(|l| l.trim().parse().ok()).unwrap_or(0),
        })
    }

    async fn try_radius_auth(
        &mut self,
        username: &str,
        password: &str,
        fallback_secret: &str,
        auth_port: u16,
    ) -> Result<RadiusTest> {
        let secret = self
            .localhost_secret()
            .await?
            .unwrap_or_else(|| fallback_secret.to_string());
        self.exec.redact(secret.as_str());
        let command = format!(
            "radtest {} {} {} 0 {}",
            shell::quote(username),
            shell::quote(password),
            shell::quote(&format!("localhost:{auth_port}")),
            shell::quote(&secret),
        );
        let output = self.exec.run(&command).await?;
        let text = self.exec.scrub(&output.combined());
        let accepted = text.contains("Access-Accept");
        let can_communicate = accepted || text.contains("Access-Reject");
        Ok(RadiusTest {
            success: can_communicate,
            can_communicate,
            accepted,
            output: text,
        })
    }

    /// Secret the daemon holds for `client localhost`, if readable.
    async fn localhost_secret(&mut self) -> Result<Option<String>> {
        let settings = self.settings;
        let output = self
            .exec
            .run(&settings.sudo(&format!("cat {}", shell::quote(&settings.layout.active_clients))))
            .await?;
        if !output.success() {
            return Ok(None);
        }
        Ok(client_secret(&output.stdout, "localhost").filter(|s| !s.is_empty()))
    }

    async fn try_recent_logs(&mut self, lines: u32) -> Result<RecentLogs> {
        let settings = self.settings;
        let lines = lines.clamp(1, MAX_LOG_LINES);
        let mut logs = Vec::with_capacity(2);
        for service in settings.service_names() {
            let log = self
                .exec
                .execute(&settings.sudo(&format!(
                    "journalctl -u {} -n {lines} --no-pager",
                    shell::quote(service)
                )))
                .await?;
            logs.push(self.exec.scrub(&log));
        }
        let api_log = logs.pop().unwrap_or_default();
        let freeradius_log = logs.pop().unwrap_or_default();
        Ok(RecentLogs {
            lines,
            freeradius_log,
            api_log,
        })
    }

    async fn try_restart(&mut self) -> Result<ServiceStatus> {
        let settings = self.settings;
        for service in settings.service_names() {
            restart(&mut self.exec, settings, service).await?;
        }
        self.exec.settle(settings.settle.restart).await?;
        self.try_service_status().await
    }

    async fn try_installation_check(&mut self) -> Result<InstallationCheck> {
        let settings = self.settings;
        let radius_installed = !self.exec.probe("command -v freeradius").await?.is_empty();
        let api_dir_exists = self
            .exec
            .run(&format!("test -d {}", shell::quote(&settings.layout.install_dir)))
            .await?
            .success();
        let services = self.try_service_status().await?;
        Ok(InstallationCheck {
            installed: radius_installed && api_dir_exists && services.all_active(),
            radius_installed,
            api_dir_exists,
            services,
        })
    }

    async fn try_connection(&mut self) -> Result<ConnectionTest> {
        let started = Instant::now();
        let output = self.exec.probe(&format!("echo {CONNECTION_MARKER}")).await?;
        Ok(ConnectionTest {
            connected: output.contains(CONNECTION_MARKER),
            latency_ms: u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX),
        })
    }
}

fn report<T>(what: &str, result: Result<T>) -> Outcome<T> {
    if let Err(e) = &result {
        error!(error = %e, "{what} failed");
    }
    result.into()
}

// ── Parsers ─────────────────────────────────────────────────────────

/// Busy CPU percentage from `top -bn1`: 100 minus the idle share.
pub fn parse_cpu_usage(top: &str) -> f64 {
    top.lines()
        .find(|l| l.contains("Cpu(s)"))
        .and_then(|line| {
            line.split(',').find_map(|field| {
                let field = field.trim();
                let idle = field.strip_suffix("id")?.trim().trim_end_matches('%');
                idle.rsplit(|c: char| c.is_whitespace() || c == ':').next()?.parse::<f64>().ok()
            })
        })
        .map(|idle| ((100.0 - idle) * 10.0).round() / 10.0)
        .unwrap_or(0.0)
}

/// `(total_mb, used_mb, used_percent)` from `free -m`.
pub fn parse_memory(free: &str) -> (u64, u64, f64) {
    let Some(line) = free.lines().find(|l| l.trim_start().starts_with("Mem:")) else {
        return (0, 0, 0.0);
    };
    let mut numbers = line.split_whitespace().skip(1).map(|n| n.parse::<u64>().ok());
    let total = numbers.next().flatten().unwrap_or(0);
    let used = numbers.next().flatten().unwrap_or(0);
    let percent = if total > 0 {
        (used as f64 / total as f64 * 10_000.0).round() / 100.0
    } else {
        0.0
    };
    (total, used, percent)
}

/// Use% of the root filesystem from `df -P /`.
pub fn parse_disk_usage(df: &str) -> u32 {
    df.lines()
        .skip(1)
        .last()
        .and_then(|line| line.split_whitespace().nth(4))
        .and_then(|capacity| capacity.trim_end_matches('%').parse().ok())
        .unwrap_or(0)
}

/// The three load averages from `/proc/loadavg`.
pub fn parse_load_average(loadavg: &str) -> String {
    let fields: Vec<&str> = loadavg.split_whitespace().take(3).collect();
    if fields.len() == 3 {
        fields.join(" ")
    } else {
        NOT_AVAILABLE.to_string()
    }
}

/// Whether `ss -tuln` shows a socket listening on `port`.
pub fn parse_listening(ss: &str, port: u16) -> bool {
    let suffix = format!(":{port}");
    ss.lines()
        .skip(1)
        .filter_map(|line| line.split_whitespace().nth(4))
        .any(|local| local.ends_with(&suffix))
}
