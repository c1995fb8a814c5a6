use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDateTime, Utc};
use releases_api::ReleasesClient;
use rt_infra::{Executor, RemoteShell, shell};
use semver::Version;
use serde::Serialize;
use tracing::{error, info, warn};

use crate::outcome::{Outcome, Verdict};
use crate::secrets::{ACTIVE, is_active, restart};
use crate::settings::Settings;
use crate::versions::{TargetVersion, parse_version};
use crate::{Error, ErrorKind, Result};

const BACKUP_STAMP: &str = "%Y%m%d%H%M%S";

// ── Release source ──────────────────────────────────────────────────

/// The newest published release.
#[derive(Debug, Clone, PartialEq)]
pub struct ReleaseInfo {
    pub tag: String,
    pub version: Version,
    pub notes: Option<String>,
    pub url: Option<String>,
    pub published_at: Option<DateTime<Utc>>,
}

/// Where releases are published.
#[async_trait]
pub trait ReleaseSource: Send + Sync + 'static {
    async fn latest(&self) -> Result<ReleaseInfo>;

    /// Release tag for a version (`2.1.0` -> `v2.1.0`).
    fn tag_for(&self, version: &Version) -> String;

    /// Tarball URL the remote host downloads for `tag`.
    fn archive_url(&self, tag: &str) -> String;
}

/// [`ReleaseSource`] backed by the release registry API.
pub struct RegistrySource {
    client: ReleasesClient,
    tag_prefix: String,
}

impl RegistrySource {
    pub fn new(client: ReleasesClient, tag_prefix: impl Into<String>) -> Self {
        Self {
            client,
            tag_prefix: tag_prefix.into(),
        }
    }
}

#[async_trait]
impl ReleaseSource for RegistrySource {
    async fn latest(&self) -> Result<ReleaseInfo> {
        let release = self.client.latest_release().await?;
        let version = parse_version(&release.tag_name).ok_or_else(|| {
            Error::Registry(format!("release tag `{}` is not a version", release.tag_name))
        })?;
        Ok(ReleaseInfo {
            tag: release.tag_name,
            version,
            notes: release.body,
            url: release.html_url,
            published_at: release.published_at,
        })
    }

    fn tag_for(&self, version: &Version) -> String {
        format!("{}{version}", self.tag_prefix)
    }

    fn archive_url(&self, tag: &str) -> String {
        self.client.archive_url(tag)
    }
}

// ── Reports ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UpdateCheck {
    pub installed_version: String,
    pub latest_version: String,
    pub update_available: bool,
    pub notes: Option<String>,
    pub release_url: Option<String>,
    pub published_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UpdateReport {
    #[serde(flatten)]
    pub verdict: Verdict,
    pub old_version: Option<String>,
    pub new_version: Option<String>,
    pub target_version: Option<String>,
    /// Set as soon as the backup path is chosen, so it survives later failures.
    pub backup_location: Option<String>,
    pub service_statuses: BTreeMap<String, String>,
}

impl UpdateReport {
    pub fn failed(err: &Error) -> Self {
        Self {
            verdict: Verdict::failed(err.kind(), format!("Update failed: {err}")),
            old_version: None,
            new_version: None,
            target_version: None,
            backup_location: None,
            service_statuses: BTreeMap::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RestoreReport {
    #[serde(flatten)]
    pub verdict: Verdict,
    pub restored_from: String,
    /// Where the replaced install was moved.
    pub previous_install: Option<String>,
    pub version: Option<String>,
    pub service_statuses: BTreeMap<String, String>,
}

impl RestoreReport {
    pub fn failed(location: &str, err: &Error) -> Self {
        Self {
            verdict: Verdict::failed(err.kind(), format!("Restore failed: {err}")),
            restored_from: location.to_string(),
            previous_install: None,
            version: None,
            service_statuses: BTreeMap::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BackupEntry {
    pub name: String,
    pub location: String,
    pub created_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BackupList {
    pub backups: Vec<BackupEntry>,
}

// ── UpdateManager ───────────────────────────────────────────────────

/// Checks, applies and rolls back software updates of the install directory.
pub struct UpdateManager<'a> {
    exec: Executor<'a>,
    settings: &'a Settings,
    releases: &'a dyn ReleaseSource,
}

impl<'a> UpdateManager<'a> {
    pub fn new(shell: &'a mut dyn RemoteShell, settings: &'a Settings, releases: &'a dyn ReleaseSource) -> Self {
        let mut exec = Executor::new(shell, settings.timeouts.command);
        exec.set_phase("update");
        Self {
            exec,
            settings,
            releases,
        }
    }

    pub async fn check_for_updates(&mut self) -> Outcome<UpdateCheck> {
        let result = self.check().await.map(|(installed, latest)| UpdateCheck {
            installed_version: installed.to_string(),
            latest_version: latest.version.to_string(),
            update_available: latest.version > installed,
            notes: latest.notes,
            release_url: latest.url,
            published_at: latest.published_at,
        });
        if let Err(e) = &result {
            error!(error = %e, "update check failed");
        }
        result.into()
    }

    /// Install `target` over the live install. Never returns an error and
    /// never rolls back: a failure after the backup reports its location.
    pub async fn apply_update(&mut self, target: &TargetVersion) -> UpdateReport {
        let mut report = UpdateReport::failed(&Error::InvalidState("update did not start".into()));
        match self.try_apply(target, Utc::now(), &mut report).await {
            Ok(verdict) => report.verdict = verdict,
            Err(e) => {
                error!(error = %e, backup = ?report.backup_location, "update failed");
                report.verdict = UpdateReport::failed(&e).verdict;
            }
        }
        report
    }

    /// Replace the install directory with a copy of the backup at `location`.
    pub async fn restore_backup(&mut self, location: &str) -> RestoreReport {
        let mut report = RestoreReport::failed(location, &Error::InvalidState("restore did not start".into()));
        match self.try_restore(location, Utc::now(), &mut report).await {
            Ok(verdict) => report.verdict = verdict,
            Err(e) => {
                error!(error = %e, location, "restore failed");
                report.verdict = RestoreReport::failed(location, &e).verdict;
            }
        }
        report
    }

    /// Backup directories, newest first. A missing backup root is an empty list.
    pub async fn list_backups(&mut self) -> Outcome<BackupList> {
        let root = &self.settings.layout.backup_root;
        let command = self.settings.sudo(&format!("ls -1 {}", shell::quote(root)));
        let result = self.exec.run(&command).await.map_err(Error::from).map(|output| {
            let mut names: Vec<&str> = if output.success() {
                output.stdout.lines().map(str::trim).filter(|n| !n.is_empty()).collect()
            } else {
                Vec::new()
            };
            names.sort_unstable_by(|a, b| b.cmp(a));
            BackupList {
                backups: names
                    .into_iter()
                    .map(|name| BackupEntry {
                        name: name.to_string(),
                        location: format!("{root}/{name}"),
                        created_at: backup_created_at(name),
                    })
                    .collect(),
            }
        });
        result.into()
    }

    async fn check(&mut self) -> Result<(Version, ReleaseInfo)> {
        let settings = self.settings;
        let path = &settings.layout.version_file;
        let raw = self.read_version().await?.ok_or_else(|| {
            Error::NotInstalled(format!("No VERSION file at {path}; is the server installed?"))
        })?;
        let installed = parse_version(&raw)
            .ok_or_else(|| Error::NotInstalled(format!("VERSION file holds `{raw}`, not a version")))?;
        let latest = self.releases.latest().await?;
        Ok((installed, latest))
    }

    async fn try_apply(&mut self, target: &TargetVersion, now: DateTime<Utc>, report: &mut UpdateReport) -> Result<Verdict> {
        let settings = self.settings;
        let layout = &settings.layout;

        let (installed, latest) = self.check().await?;
        report.old_version = Some(installed.to_string());
        let (version, tag) = match target {
            TargetVersion::Latest if latest.version <= installed => {
                return Err(Error::UpToDate(format!("Already running the latest version ({installed})")));
            }
            TargetVersion::Latest => (latest.version, latest.tag),
            TargetVersion::Exact(v) => (v.clone(), self.releases.tag_for(v)),
        };
        report.target_version = Some(version.to_string());

        let backup = format!("{}/{}-v{installed}", layout.backup_root, now.format(BACKUP_STAMP));
        report.backup_location = Some(backup.clone());
        self.exec
            .execute(&settings.sudo(&format!("mkdir -p {}", shell::quote(&layout.backup_root))))
            .await?;
        self.exec
            .execute(&settings.sudo(&format!(
                "cp -a {} {}",
                shell::quote(&layout.install_dir),
                shell::quote(&backup)
            )))
            .await?;
        info!(%backup, from = %installed, to = %version, "install directory backed up");

        let tmp = self.exec.execute("mktemp -d -t radtik-update.XXXXXX").await?.trim().to_string();
        if tmp.is_empty() {
            return Err(Error::configuration("mktemp returned no directory"));
        }
        let installed_release = self.install_release(&tmp, &tag, &backup).await;
        let cleanup = format!("rm -rf {}", shell::quote(&tmp));
        let statuses = match installed_release {
            Ok(statuses) => {
                self.exec.execute(&cleanup).await?;
                statuses
            }
            Err(e) => {
                if let Err(cleanup_err) = self.exec.run(&cleanup).await {
                    warn!(error = %cleanup_err, %tmp, "failed to remove update temp directory");
                }
                return Err(e);
            }
        };
        report.service_statuses = statuses;

        let new_version = self.read_version().await?;
        report.new_version = new_version.clone();
        let new_version = new_version.unwrap_or_else(|| "unknown".into());

        if report.service_statuses.values().all(|s| s == ACTIVE) {
            info!(from = %installed, to = %new_version, "update applied");
            Ok(Verdict::succeeded(format!("Updated from {installed} to {new_version}")))
        } else {
            warn!(statuses = ?report.service_statuses, "update applied but services are not active");
            Ok(Verdict::failed(
                ErrorKind::PartialUpdate,
                format!("Update applied but services need attention; backup at {backup}"),
            ))
        }
    }

    /// Download, unpack and copy the release over the install directory,
    /// carry the preserved files over from `backup`, and restart.
    async fn install_release(&mut self, tmp: &str, tag: &str, backup: &str) -> Result<BTreeMap<String, String>> {
        let settings = self.settings;
        let layout = &settings.layout;
        let archive = format!("{tmp}/release.tar.gz");
        let source = format!("{tmp}/src");

        self.exec
            .execute_with_timeout(
                &format!(
                    "curl -fsSL -o {} {}",
                    shell::quote(&archive),
                    shell::quote(&self.releases.archive_url(tag))
                ),
                settings.timeouts.install,
            )
            .await?;
        self.exec.execute(&format!("mkdir -p {}", shell::quote(&source))).await?;
        self.exec
            .execute(&format!(
                "tar -xzf {} -C {} --strip-components=1",
                shell::quote(&archive),
                shell::quote(&source)
            ))
            .await?;

        let copy = format!(
            "tar -C {} --exclude=.git -cf - . | tar -C {} -xf -",
            shell::quote(&source),
            shell::quote(&layout.install_dir)
        );
        self.exec
            .execute(&settings.sudo(&format!("bash -o pipefail -c {}", shell::quote(&copy))))
            .await?;

        for relative in &layout.preserved {
            let saved = format!("{backup}/{relative}");
            let exists = self
                .exec
                .run(&settings.sudo(&format!("test -e {}", shell::quote(&saved))))
                .await?
                .success();
            if exists {
                self.exec
                    .execute(&settings.sudo(&format!(
                        "cp -p {} {}",
                        shell::quote(&saved),
                        shell::quote(&format!("{}/{relative}", layout.install_dir))
                    )))
                    .await?;
            }
        }

        self.fix_permissions().await?;
        self.restart_and_collect().await
    }

    async fn try_restore(&mut self, location: &str, now: DateTime<Utc>, report: &mut RestoreReport) -> Result<Verdict> {
        let settings = self.settings;
        let layout = &settings.layout;
        validate_backup_location(&layout.backup_root, location)?;

        let found = self
            .exec
            .run(&settings.sudo(&format!("test -d {}", shell::quote(location))))
            .await?
            .success();
        if !found {
            return Err(Error::configuration(format!("backup {location} does not exist")));
        }

        let staging = format!("{}.restore", layout.install_dir);
        let aside = format!("{}/{}-pre-restore", layout.backup_root, now.format(BACKUP_STAMP));
        for command in [
            format!("rm -rf {}", shell::quote(&staging)),
            format!("cp -a {} {}", shell::quote(location), shell::quote(&staging)),
            format!("mv {} {}", shell::quote(&layout.install_dir), shell::quote(&aside)),
        ] {
            self.exec.execute(&settings.sudo(&command)).await?;
        }
        report.previous_install = Some(aside);
        self.exec
            .execute(&settings.sudo(&format!(
                "mv {} {}",
                shell::quote(&staging),
                shell::quote(&layout.install_dir)
            )))
            .await?;
        info!(location, "install directory restored from backup");

        self.fix_permissions().await?;
        report.service_statuses = self.restart_and_collect().await?;
        report.version = self.read_version().await?;

        if report.service_statuses.values().all(|s| s == ACTIVE) {
            Ok(Verdict::succeeded(format!(
                "Restored {} from {location}",
                report.version.as_deref().unwrap_or("install")
            )))
        } else {
            Ok(Verdict::failed(
                ErrorKind::PartialUpdate,
                "Backup restored but services need attention",
            ))
        }
    }

    async fn fix_permissions(&mut self) -> Result<()> {
        let settings = self.settings;
        let install = shell::quote(&settings.layout.install_dir);
        self.exec
            .execute(&settings.sudo(&format!("chown -R root:root {install}")))
            .await?;
        self.exec
            .execute(&settings.sudo(&format!(
                "find {install} -name '*.py' -exec chmod 755 {{}} +"
            )))
            .await?;
        Ok(())
    }

    async fn restart_and_collect(&mut self) -> Result<BTreeMap<String, String>> {
        let settings = self.settings;
        for service in settings.service_names() {
            restart(&mut self.exec, settings, service).await?;
        }
        self.exec.settle(settings.settle.update).await?;

        let mut statuses = BTreeMap::new();
        for service in settings.service_names() {
            let status = is_active(&mut self.exec, settings, service).await?;
            statuses.insert(service.to_string(), status);
        }
        Ok(statuses)
    }

    /// Trimmed VERSION file body, `None` when absent or empty.
    async fn read_version(&mut self) -> Result<Option<String>> {
        let settings = self.settings;
        let output = self
            .exec
            .run(&settings.sudo(&format!("cat {}", shell::quote(&settings.layout.version_file))))
            .await?;
        let raw = output.stdout.trim();
        Ok((output.success() && !raw.is_empty()).then(|| raw.to_string()))
    }
}

/// `location` must name a directory directly under `root`.
fn validate_backup_location(root: &str, location: &str) -> Result<()> {
    let name = location
        .strip_prefix(root)
        .and_then(|rest| rest.strip_prefix('/'))
        .unwrap_or_default();
    if name.is_empty() || name.contains('/') || name == "." || name == ".." || shell::has_control_chars(name) {
        return Err(Error::configuration(format!(
            "backup location must be a directory directly under {root}"
        )));
    }
    Ok(())
}

fn backup_created_at(name: &str) -> Option<DateTime<Utc>> {
    let stamp = name.get(..14)?;
    NaiveDateTime::parse_from_str(stamp, BACKUP_STAMP)
        .ok()
        .map(|t| t.and_utc())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{FakeReleases, ScriptedShell};

    const INSTALL: &str = "/opt/radtik-radius";
    const LIVE_INI: &str = "[api]\nauth_token = tok123\n";

    fn installed(version: &str) -> ScriptedShell {
        ScriptedShell::new()
            .file("/opt/radtik-radius/VERSION", &format!("{version}\n"))
            .file("/opt/radtik-radius/scripts/config.ini", LIVE_INI)
            .file("/opt/radtik-radius/clients.conf", "client mikrotik {\n    secret = s3cr3t\n}\n")
            .file("/opt/radtik-radius/scripts/sync.py", "# old\n")
    }

    /// The release copy step overwrites the tree with the release's defaults.
    fn releasing(shell: ScriptedShell, version: &str) -> ScriptedShell {
        shell
            .writes_on("--exclude=.git", "/opt/radtik-radius/VERSION", &format!("{version}\n"))
            .writes_on("--exclude=.git", "/opt/radtik-radius/scripts/config.ini", "[api]\nauth_token = changeme\n")
            .writes_on("--exclude=.git", "/opt/radtik-radius/scripts/sync.py", "# new\n")
    }

    #[tokio::test]
    async fn newer_release_is_available() {
        let settings = Settings::default();
        let releases = FakeReleases::latest("v2.1.0");
        let mut shell = installed("2.0.0");

        let check = UpdateManager::new(&mut shell, &settings, &releases)
            .check_for_updates()
            .await
            .ok()
            .unwrap();
        assert_eq!(check.installed_version, "2.0.0");
        assert_eq!(check.latest_version, "2.1.0");
        assert!(check.update_available);
        assert_eq!(check.notes.as_deref(), Some("Bug fixes"));
    }

    #[tokio::test]
    async fn same_or_older_release_is_not_available() {
        let settings = Settings::default();
        for (installed_version, tag) in [("1.3.0", "v1.3.0"), ("1.10.0", "v1.9.0")] {
            let releases = FakeReleases::latest(tag);
            let mut shell = installed(installed_version);
            let check = UpdateManager::new(&mut shell, &settings, &releases)
                .check_for_updates()
                .await
                .ok()
                .unwrap();
            assert!(!check.update_available, "{installed_version} vs {tag}");
        }
    }

    #[tokio::test]
    async fn missing_version_file_is_not_installed() {
        let settings = Settings::default();
        let releases = FakeReleases::latest("v2.1.0");
        let mut shell = ScriptedShell::new();

        let outcome = UpdateManager::new(&mut shell, &settings, &releases)
            .check_for_updates()
            .await;
        assert_eq!(outcome.kind(), Some(ErrorKind::NotInstalled));
    }

    #[tokio::test]
    async fn unreachable_registry_is_a_registry_failure() {
        let settings = Settings::default();
        let releases = FakeReleases::unreachable();
        let mut shell = installed("2.0.0");

        let outcome = UpdateManager::new(&mut shell, &settings, &releases)
            .check_for_updates()
            .await;
        assert_eq!(outcome.kind(), Some(ErrorKind::Registry));
    }

    #[tokio::test(start_paused = true)]
    async fn update_backs_up_then_installs_and_keeps_local_config() {
        let settings = Settings::default();
        let releases = FakeReleases::latest("v2.1.0");
        let mut shell = releasing(installed("2.0.0"), "2.1.0");
        let handle = shell.clone();

        let report = UpdateManager::new(&mut shell, &settings, &releases)
            .apply_update(&TargetVersion::Latest)
            .await;

        assert!(report.verdict.success(), "{report:?}");
        assert_eq!(report.verdict.message(), "Updated from 2.0.0 to 2.1.0");
        assert_eq!(report.old_version.as_deref(), Some("2.0.0"));
        assert_eq!(report.new_version.as_deref(), Some("2.1.0"));
        assert_eq!(report.service_statuses.get("freeradius").map(String::as_str), Some("active"));
        assert_eq!(report.service_statuses.get("radtik-radius-api").map(String::as_str), Some("active"));

        let backup = report.backup_location.unwrap();
        assert!(backup.starts_with("/opt/radtik-radius-backups/") && backup.ends_with("-v2.0.0"));
        assert_eq!(handle.contents(&format!("{backup}/VERSION")).as_deref(), Some("2.0.0\n"));
        assert_eq!(handle.contents(&format!("{backup}/scripts/sync.py")).as_deref(), Some("# old\n"));

        assert_eq!(handle.contents(&format!("{INSTALL}/scripts/sync.py")).as_deref(), Some("# new\n"));
        assert_eq!(handle.contents(&format!("{INSTALL}/scripts/config.ini")).as_deref(), Some(LIVE_INI));

        let commands = handle.commands();
        let backed_up = commands.iter().position(|c| c.contains("cp -a '/opt/radtik-radius' ")).unwrap();
        let copied = commands.iter().position(|c| c.contains("--exclude=.git")).unwrap();
        assert!(backed_up < copied);
        assert!(handle.ran("curl -fsSL -o '/tmp/radtik-update.test/release.tar.gz' 'https://example.test/archive/v2.1.0.tar.gz'"));
        assert!(handle.ran("rm -rf '/tmp/radtik-update.test'"));
    }

    #[tokio::test]
    async fn latest_when_up_to_date_is_refused_before_any_change() {
        let settings = Settings::default();
        let releases = FakeReleases::latest("v2.0.0");
        let mut shell = installed("2.0.0");
        let handle = shell.clone();

        let report = UpdateManager::new(&mut shell, &settings, &releases)
            .apply_update(&TargetVersion::Latest)
            .await;
        assert!(matches!(report.verdict, Verdict::Failed { kind: ErrorKind::UpToDate, .. }));
        assert!(report.verdict.message().contains("Already running the latest version (2.0.0)"));
        assert_eq!(report.backup_location, None);
        assert!(!handle.ran("mkdir"));
    }

    #[tokio::test(start_paused = true)]
    async fn exact_target_reinstalls_the_same_version() {
        let settings = Settings::default();
        let releases = FakeReleases::latest("v2.0.0");
        let mut shell = releasing(installed("2.0.0"), "2.0.0");
        let handle = shell.clone();

        let report = UpdateManager::new(&mut shell, &settings, &releases)
            .apply_update(&"2.0.0".parse().unwrap())
            .await;
        assert!(report.verdict.success(), "{report:?}");
        assert_eq!(report.target_version.as_deref(), Some("2.0.0"));
        assert!(handle.ran("https://example.test/archive/v2.0.0.tar.gz"));
    }

    #[tokio::test]
    async fn failed_download_keeps_the_backup_location() {
        let settings = Settings::default();
        let releases = FakeReleases::latest("v2.1.0");
        let mut shell = installed("2.0.0").reply("curl", 22, "");
        let handle = shell.clone();

        let report = UpdateManager::new(&mut shell, &settings, &releases)
            .apply_update(&TargetVersion::Latest)
            .await;
        assert!(matches!(report.verdict, Verdict::Failed { kind: ErrorKind::CommandExecution, .. }));
        assert!(report.verdict.message().starts_with("Update failed:"));
        let backup = report.backup_location.unwrap();
        assert_eq!(handle.contents(&format!("{backup}/VERSION")).as_deref(), Some("2.0.0\n"));
        assert!(handle.ran("rm -rf '/tmp/radtik-update.test'"));
        assert!(!handle.ran("systemctl restart"));
        assert_eq!(handle.contents(&format!("{INSTALL}/VERSION")).as_deref(), Some("2.0.0\n"));
    }

    #[tokio::test(start_paused = true)]
    async fn inactive_service_after_update_is_partial() {
        let settings = Settings::default();
        let releases = FakeReleases::latest("v2.1.0");
        let mut shell = releasing(installed("2.0.0"), "2.1.0").service("radtik-radius-api", "failed");

        let report = UpdateManager::new(&mut shell, &settings, &releases)
            .apply_update(&TargetVersion::Latest)
            .await;
        assert!(matches!(report.verdict, Verdict::Failed { kind: ErrorKind::PartialUpdate, .. }));
        assert_eq!(report.new_version.as_deref(), Some("2.1.0"));
        assert_eq!(report.service_statuses.get("radtik-radius-api").map(String::as_str), Some("failed"));
    }

    #[tokio::test(start_paused = true)]
    async fn restore_swaps_in_the_backup() {
        let settings = Settings::default();
        let releases = FakeReleases::latest("v2.1.0");
        let backup = "/opt/radtik-radius-backups/20260301120000-v2.0.0";
        let mut shell = installed("2.1.0").file(&format!("{backup}/VERSION"), "2.0.0\n");
        let handle = shell.clone();

        let report = UpdateManager::new(&mut shell, &settings, &releases)
            .restore_backup(backup)
            .await;
        assert!(report.verdict.success(), "{report:?}");
        assert_eq!(report.version.as_deref(), Some("2.0.0"));
        assert_eq!(handle.contents("/opt/radtik-radius/VERSION").as_deref(), Some("2.0.0\n"));

        let aside = report.previous_install.unwrap();
        assert!(aside.ends_with("-pre-restore"));
        assert_eq!(handle.contents(&format!("{aside}/VERSION")).as_deref(), Some("2.1.0\n"));
        assert!(handle.paths_under("/opt/radtik-radius.restore").is_empty());
    }

    #[tokio::test]
    async fn restore_rejects_paths_outside_the_backup_root() {
        let settings = Settings::default();
        let releases = FakeReleases::latest("v2.1.0");
        for location in [
            "/etc",
            "/opt/radtik-radius-backups",
            "/opt/radtik-radius-backups/",
            "/opt/radtik-radius-backups/..",
            "/opt/radtik-radius-backups/../etc",
            "/opt/radtik-radius-backups/a/b",
            "/opt/radtik-radius-backupsX/a",
        ] {
            let mut shell = installed("2.1.0");
            let handle = shell.clone();
            let report = UpdateManager::new(&mut shell, &settings, &releases)
                .restore_backup(location)
                .await;
            assert!(matches!(report.verdict, Verdict::Failed { kind: ErrorKind::Configuration, .. }), "{location}");
            assert!(handle.commands().is_empty(), "{location}");
        }
    }

    #[tokio::test]
    async fn restore_of_missing_backup_changes_nothing() {
        let settings = Settings::default();
        let releases = FakeReleases::latest("v2.1.0");
        let mut shell = installed("2.1.0");
        let handle = shell.clone();

        let report = UpdateManager::new(&mut shell, &settings, &releases)
            .restore_backup("/opt/radtik-radius-backups/20260301120000-v2.0.0")
            .await;
        assert!(!report.verdict.success());
        assert!(!handle.ran("mv "));
    }

    #[tokio::test]
    async fn backups_are_listed_newest_first() {
        let settings = Settings::default();
        let releases = FakeReleases::latest("v2.1.0");
        let mut shell = ScriptedShell::new()
            .file("/opt/radtik-radius-backups/20260101000000-v1.9.0/VERSION", "1.9.0\n")
            .file("/opt/radtik-radius-backups/20260301120000-v2.0.0/VERSION", "2.0.0\n");

        let list = UpdateManager::new(&mut shell, &settings, &releases)
            .list_backups()
            .await
            .ok()
            .unwrap();
        let names: Vec<_> = list.backups.iter().map(|b| b.name.as_str()).collect();
        assert_eq!(names, ["20260301120000-v2.0.0", "20260101000000-v1.9.0"]);
        assert_eq!(list.backups[0].location, "/opt/radtik-radius-backups/20260301120000-v2.0.0");
        assert_eq!(
            list.backups[0].created_at.map(|t| t.to_rfc3339()).as_deref(),
            Some("2026-03-01T12:00:00+00:00")
        );

        let mut empty = ScriptedShell::new();
        let list = UpdateManager::new(&mut empty, &settings, &releases)
            .list_backups()
            .await
            .ok()
            .unwrap();
        assert!(list.backups.is_empty());
    }

    #[tokio::test]
    async fn registry_source_reads_the_latest_release() {
        use wiremock::matchers::{method, path};
        use wiremock::{Mock, MockServer, ResponseTemplate};

        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/repos/acme/radius/releases/latest"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "tag_name": "v2.1.0",
                "html_url": "https://github.com/acme/radius/releases/tag/v2.1.0",
                "body": "Bug fixes",
            })))
            .mount(&server)
            .await;

        let source = RegistrySource::new(
            ReleasesClient::with_urls("acme/radius", server.uri(), "https://github.com"),
            "v",
        );
        let latest = source.latest().await.unwrap();
        assert_eq!(latest.version, Version::new(2, 1, 0));
        assert_eq!(source.tag_for(&latest.version), "v2.1.0");
        assert_eq!(
            source.archive_url("v2.1.0"),
            "https://github.com/acme/radius/archive/refs/tags/v2.1.0.tar.gz"
        );
    }

    #[tokio::test]
    async fn unparseable_tag_is_a_registry_error() {
        use wiremock::matchers::method;
        use wiremock::{Mock, MockServer, ResponseTemplate};

        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({ "tag_name": "nightly" })))
            .mount(&server)
            .await;

        let source = RegistrySource::new(
            ReleasesClient::with_urls("acme/radius", server.uri(), "https://github.com"),
            "v",
        );
        assert!(matches!(source.latest().await, Err(Error::Registry(_))));
    }
}
