//! In-crate fakes shared by the unit tests.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use chrono::Utc;
use rt_db::models::{InstallationStatus, RadiusServer};
use rt_infra::types::{InstanceId, InstanceInfo, InstanceSpec};
use rt_infra::{CloudProvisioner, CommandOutput, RemoteShell};
use uuid::Uuid;

use crate::session::ShellConnector;
use crate::updates::{ReleaseInfo, ReleaseSource};
use crate::versions::parse_version;
use crate::{Error, Result};

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

/// A provisioned record: host, root password and shared secret set.
pub fn server(status: InstallationStatus) -> RadiusServer {
    let now = Utc::now();
    RadiusServer {
        id: Uuid::new_v4(),
        name: "Main Hotspot".into(),
        label: None,
        instance_id: Some("555".into()),
        region: "us-east".into(),
        plan: "g6-nanode-1".into(),
        image: "linode/ubuntu22.04".into(),
        ipv4: Some("203.0.113.9".into()),
        ipv6: None,
        host: Some("203.0.113.9".into()),
        ssh_port: 22,
        ssh_username: "root".into(),
        ssh_password: Some("root-pass".into()),
        ssh_private_key: None,
        auth_port: 1812,
        acct_port: 1813,
        shared_secret: Some("s3cr3t".into()),
        auth_token: None,
        sync_endpoint: None,
        installation_status: status,
        installation_log: String::new(),
        installed_at: None,
        created_at: now,
        updated_at: now,
    }
}

// ── ScriptedShell ───────────────────────────────────────────────────

struct Reply {
    pattern: String,
    output: CommandOutput,
    writes: Vec<(String, String)>,
}

#[derive(Default)]
struct ShellState {
    files: BTreeMap<String, String>,
    dirs: BTreeSet<String>,
    services: BTreeMap<String, String>,
    replies: Vec<Reply>,
    commands: Vec<(String, Option<String>)>,
    disconnects: usize,
}

impl ShellState {
    fn dir_exists(&self, path: &str) -> bool {
        let prefix = format!("{path}/");
        self.dirs.contains(path)
            || self.dirs.iter().any(|d| d.starts_with(&prefix))
            || self.files.keys().any(|f| f.starts_with(&prefix))
    }

    fn copy(&mut self, src: &str, dst: &str) -> bool {
        if let Some(contents) = self.files.get(src).cloned() {
            self.files.insert(dst.to_string(), contents);
            return true;
        }
        if !self.dir_exists(src) {
            return false;
        }
        let prefix = format!("{src}/");
        let copied: Vec<(String, String)> = self
            .files
            .iter()
            .filter_map(|(path, contents)| {
                path.strip_prefix(&prefix)
                    .map(|rel| (format!("{dst}/{rel}"), contents.clone()))
            })
            .collect();
        self.files.extend(copied);
        self.dirs.insert(dst.to_string());
        true
    }

    fn remove(&mut self, path: &str) {
        let prefix = format!("{path}/");
        self.files.retain(|f, _| f != path && !f.starts_with(&prefix));
        self.dirs.retain(|d| d != path && !d.starts_with(&prefix));
    }

    fn children(&self, path: &str) -> Vec<String> {
        let prefix = format!("{path}/");
        let names: BTreeSet<String> = self
            .files
            .keys()
            .chain(self.dirs.iter())
            .filter_map(|p| p.strip_prefix(&prefix))
            .filter_map(|rest| rest.split('/').next())
            .filter(|name| !name.is_empty())
            .map(str::to_string)
            .collect();
        names.into_iter().collect()
    }

    fn builtin(&mut self, command: &str, stdin: Option<&str>) -> CommandOutput {
        let command = command.strip_prefix("sudo -n ").unwrap_or(command);
        let args = quoted_args(command);
        let arg = |i: usize| args.get(i).map(String::as_str).unwrap_or_default();
        let verb = command.split_whitespace().take(2).collect::<Vec<_>>().join(" ");

        match verb.as_str() {
            v if v.starts_with("cat ") && !args.is_empty() => match self.files.get(arg(0)) {
                Some(contents) => ok(contents),
                None => exit(1, "", "cat: No such file or directory"),
            },
            v if v.starts_with("tee ") => {
                self.files
                    .insert(arg(0).to_string(), stdin.unwrap_or_default().to_string());
                ok("")
            }
            v if v.starts_with("cp ") => {
                if self.copy(arg(0), arg(1)) {
                    ok("")
                } else {
                    exit(1, "", "cp: cannot stat: No such file or directory")
                }
            }
            v if v.starts_with("mv ") => {
                if self.copy(arg(0), arg(1)) {
                    self.remove(arg(0));
                    ok("")
                } else {
                    exit(1, "", "mv: cannot stat: No such file or directory")
                }
            }
            "rm -rf" => {
                self.remove(arg(0));
                ok("")
            }
            "mkdir -p" => {
                self.dirs.insert(arg(0).to_string());
                ok("")
            }
            "mktemp -d" => {
                let dir = "/tmp/radtik-update.test".to_string();
                self.dirs.insert(dir.clone());
                ok(&format!("{dir}\n"))
            }
            "test -d" => status(self.dir_exists(arg(0))),
            "test -e" | "test -f" => {
                status(self.files.contains_key(arg(0)) || (verb == "test -e" && self.dir_exists(arg(0))))
            }
            "ls -1" => {
                if self.dir_exists(arg(0)) {
                    ok(&self.children(arg(0)).iter().map(|c| format!("{c}\n")).collect::<String>())
                } else {
                    exit(2, "", "ls: cannot access: No such file or directory")
                }
            }
            "systemctl is-active" => {
                let state = self.services.get(arg(0)).cloned().unwrap_or_else(|| "active".into());
                let code = if state == "active" { 0 } else { 3 };
                exit(code, &format!("{state}\n"), "")
            }
            "systemctl is-enabled" => ok("enabled\n"),
            _ => ok(""),
        }
    }
}

fn ok(stdout: &str) -> CommandOutput {
    exit(0, stdout, "")
}

fn status(success: bool) -> CommandOutput {
    exit(if success { 0 } else { 1 }, "", "")
}

fn exit(code: u32, stdout: &str, stderr: &str) -> CommandOutput {
    CommandOutput {
        exit_status: code,
        stdout: stdout.into(),
        stderr: stderr.into(),
    }
}

/// Single-quoted words of a command line, unescaping `'\''`.
fn quoted_args(command: &str) -> Vec<String> {
    let mut args = Vec::new();
    let mut word = String::new();
    let mut quoted = false;
    let mut chars = command.chars().peekable();
    while let Some(c) = chars.next() {
        if !quoted {
            if c == '\'' {
                quoted = true;
                word.clear();
            }
            continue;
        }
        if c != '\'' {
            word.push(c);
            continue;
        }
        if chars.peek() == Some(&'\\') {
            // `'\''` continues the same word with a literal quote.
            chars.nth(2);
            word.push('\'');
        } else {
            args.push(std::mem::take(&mut word));
            quoted = false;
        }
    }
    args
}

/// Remote shell over an in-memory host.
///
/// Understands the handful of commands the managers issue (`cat`, `tee`,
/// `cp`, `mv`, `rm -rf`, `mkdir -p`, `test`, `ls -1`, `mktemp -d`,
/// `systemctl is-active|is-enabled`), with or without the `sudo -n`
/// prefix. Scripted replies, matched by substring in registration order,
/// take precedence. Clones share state, so a test can keep a handle while
/// the code under test owns another.
#[derive(Clone, Default)]
pub struct ScriptedShell {
    state: Arc<Mutex<ShellState>>,
}

impl ScriptedShell {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn file(self, path: &str, contents: &str) -> Self {
        lock(&self.state).files.insert(path.into(), contents.into());
        self
    }

    pub fn service(self, name: &str, state: &str) -> Self {
        lock(&self.state).services.insert(name.into(), state.into());
        self
    }

    pub fn reply(self, pattern: &str, exit_status: u32, stdout: &str) -> Self {
        lock(&self.state).replies.push(Reply {
            pattern: pattern.into(),
            output: exit(exit_status, stdout, ""),
            writes: Vec::new(),
        });
        self
    }

    /// Succeed on commands matching `pattern` and write `path` as a side effect.
    pub fn writes_on(self, pattern: &str, path: &str, contents: &str) -> Self {
        {
            let mut state = lock(&self.state);
            match state.replies.iter_mut().find(|r| r.pattern == pattern) {
                Some(reply) => reply.writes.push((path.into(), contents.into())),
                None => state.replies.push(Reply {
                    pattern: pattern.into(),
                    output: ok(""),
                    writes: vec![(path.into(), contents.into())],
                }),
            }
        }
        self
    }

    pub fn commands(&self) -> Vec<String> {
        lock(&self.state).commands.iter().map(|(c, _)| c.clone()).collect()
    }

    pub fn ran(&self, pattern: &str) -> bool {
        self.commands().iter().any(|c| c.contains(pattern))
    }

    pub fn last_piped(&self) -> Option<(String, String)> {
        lock(&self.state)
            .commands
            .iter()
            .rev()
            .find_map(|(c, stdin)| stdin.clone().map(|s| (c.clone(), s)))
    }

    pub fn contents(&self, path: &str) -> Option<String> {
        lock(&self.state).files.get(path).cloned()
    }

    pub fn paths_under(&self, dir: &str) -> Vec<String> {
        let prefix = format!("{dir}/");
        lock(&self.state)
            .files
            .keys()
            .filter(|p| p.starts_with(&prefix))
            .cloned()
            .collect()
    }

    pub fn disconnects(&self) -> usize {
        lock(&self.state).disconnects
    }
}

#[async_trait]
impl RemoteShell for ScriptedShell {
    async fn run(&mut self, command: &str, stdin: Option<&[u8]>) -> rt_infra::Result<CommandOutput> {
        let stdin = stdin.map(|b| String::from_utf8_lossy(b).into_owned());
        let mut state = lock(&self.state);
        state.commands.push((command.to_string(), stdin.clone()));

        let scripted = state
            .replies
            .iter()
            .find(|r| command.contains(&r.pattern))
            .map(|r| (r.output.clone(), r.writes.clone()));
        if let Some((output, writes)) = scripted {
            state.files.extend(writes);
            return Ok(output);
        }
        Ok(state.builtin(command, stdin.as_deref()))
    }

    async fn disconnect(&mut self) {
        lock(&self.state).disconnects += 1;
    }
}

/// Hands out clones of one [`ScriptedShell`].
pub struct FakeConnector {
    pub shell: ScriptedShell,
}

#[async_trait]
impl ShellConnector for FakeConnector {
    async fn open(&self, server: &RadiusServer) -> Result<Box<dyn RemoteShell>> {
        crate::session::target_for(server)?;
        Ok(Box::new(self.shell.clone()))
    }
}

// ── FakeProvisioner ─────────────────────────────────────────────────

#[derive(Default)]
struct ProvisionerState {
    created: Vec<InstanceSpec>,
    status_calls: usize,
    deleted: Vec<String>,
    rebooted: Vec<String>,
}

/// Cloud with a scripted status sequence; the last status repeats.
/// A status of `"error"` makes that query fail.
pub struct FakeProvisioner {
    id: i64,
    ipv4: String,
    statuses: Vec<String>,
    reject: Option<(u16, String)>,
    state: Mutex<ProvisionerState>,
}

impl FakeProvisioner {
    pub fn new(id: i64, ipv4: &str, statuses: &[&str]) -> Self {
        Self {
            id,
            ipv4: ipv4.into(),
            statuses: statuses.iter().map(|s| s.to_string()).collect(),
            reject: None,
            state: Mutex::default(),
        }
    }

    pub fn rejecting(status_code: u16, body: &str) -> Self {
        Self {
            reject: Some((status_code, body.into())),
            ..Self::new(0, "", &[])
        }
    }

    pub fn created(&self) -> InstanceSpec {
        lock(&self.state).created.last().cloned().expect("no instance created")
    }

    pub fn create_calls(&self) -> usize {
        lock(&self.state).created.len()
    }

    pub fn status_calls(&self) -> usize {
        lock(&self.state).status_calls
    }

    pub fn deleted(&self) -> Vec<String> {
        lock(&self.state).deleted.clone()
    }

    pub fn rebooted(&self) -> Vec<String> {
        lock(&self.state).rebooted.clone()
    }
}

#[async_trait]
impl CloudProvisioner for FakeProvisioner {
    async fn create_instance(&self, spec: &InstanceSpec) -> rt_infra::Result<InstanceInfo> {
        if let Some((status_code, body)) = &self.reject {
            return Err(rt_infra::Error::Provisioning {
                status_code: *status_code,
                body: body.clone(),
            });
        }
        lock(&self.state).created.push(spec.clone());
        Ok(InstanceInfo {
            id: InstanceId(self.id.to_string()),
            ipv4: vec![self.ipv4.clone()],
            ipv6: None,
        })
    }

    async fn instance_status(&self, _id: &InstanceId) -> rt_infra::Result<String> {
        let call = {
            let mut state = lock(&self.state);
            state.status_calls += 1;
            state.status_calls
        };
        let status = self
            .statuses
            .get(call - 1)
            .or(self.statuses.last())
            .cloned()
            .unwrap_or_else(|| "running".into());
        if status == "error" {
            return Err(rt_infra::Error::Connection("linode api: timed out".into()));
        }
        Ok(status)
    }

    async fn delete_instance(&self, id: &InstanceId) -> bool {
        lock(&self.state).deleted.push(id.0.clone());
        true
    }

    async fn reboot_instance(&self, id: &InstanceId) -> bool {
        lock(&self.state).rebooted.push(id.0.clone());
        true
    }

    fn name(&self) -> &'static str {
        "fake"
    }
}

// ── FakeReleases ────────────────────────────────────────────────────

/// Registry whose latest release is a fixed tag, or unreachable.
pub struct FakeReleases {
    latest_tag: Option<String>,
}

impl FakeReleases {
    pub fn latest(tag: &str) -> Self {
        Self {
            latest_tag: Some(tag.into()),
        }
    }

    pub fn unreachable() -> Self {
        Self { latest_tag: None }
    }
}

#[async_trait]
impl ReleaseSource for FakeReleases {
    async fn latest(&self) -> Result<ReleaseInfo> {
        let tag = self
            .latest_tag
            .clone()
            .ok_or_else(|| Error::Registry("GET /releases/latest returned 503".into()))?;
        let version = parse_version(&tag)
            .ok_or_else(|| Error::Registry(format!("unparseable tag {tag}")))?;
        Ok(ReleaseInfo {
            tag,
            version,
            notes: Some("Bug fixes".into()),
            url: None,
            published_at: None,
        })
    }

    fn tag_for(&self, version: &semver::Version) -> String {
        format!("v{version}")
    }

    fn archive_url(&self, tag: &str) -> String {
        format!("https://example.test/archive/{tag}.tar.gz")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quoted_args_unescape_embedded_quotes() {
        assert_eq!(
            quoted_args("cp -p 'a b' 'it'\\''s'"),
            vec!["a b".to_string(), "it's".to_string()]
        );
    }
}
