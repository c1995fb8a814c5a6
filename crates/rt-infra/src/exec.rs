use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::shell;
use crate::ssh::{CommandOutput, RemoteShell};
use crate::{Error, Result};

const REDACTED: &str = "***";

/// Runs commands on a borrowed [`RemoteShell`].
///
/// Adds what the bare shell does not have: a per-command timeout, a
/// cancellation token, a phase label for error reports, and redaction of
/// registered secrets in debug logs and error output.
pub struct Executor<'a> {
    shell: &'a mut dyn RemoteShell,
    timeout: Duration,
    cancel: CancellationToken,
    phase: &'static str,
    secrets: Vec<String>,
}

impl<'a> Executor<'a> {
    pub fn new(shell: &'a mut dyn RemoteShell, timeout: Duration) -> Self {
        Self {
            shell,
            timeout,
            cancel: CancellationToken::new(),
            phase: "remote",
            secrets: Vec::new(),
        }
    }

    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Label attached to failures until the next call.
    pub fn set_phase(&mut self, phase: &'static str) {
        self.phase = phase;
    }

    pub fn phase(&self) -> &'static str {
        self.phase
    }

    /// Mask `secret` wherever it would otherwise be logged or reported.
    pub fn redact(&mut self, secret: impl Into<String>) {
        let secret = secret.into();
        if !secret.is_empty() && !self.secrets.contains(&secret) {
            self.secrets.push(secret);
        }
    }

    /// `text` with every registered secret masked.
    pub fn scrub(&self, text: &str) -> String {
        let mut out = text.to_string();
        for secret in &self.secrets {
            out = out.replace(secret.as_str(), REDACTED);
            let quoted = shell::quote(secret);
            let inner = &quoted[1..quoted.len() - 1];
            if inner != secret {
                out = out.replace(inner, REDACTED);
            }
        }
        out
    }

    async fn dispatch(
        &mut self,
        command: &str,
        stdin: Option<&[u8]>,
        timeout: Duration,
    ) -> Result<CommandOutput> {
        let cancel = self.cancel.clone();
        let result = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(Error::Cancelled),
            r = tokio::time::timeout(timeout, self.shell.run(command, stdin)) => r,
        };

        let output = match result {
            Ok(output) => output?,
            Err(_) => {
                return Err(Error::CommandTimeout {
                    command: self.scrub(command),
                    after: timeout,
                });
            }
        };

        debug!(
            phase = self.phase,
            command = %self.scrub(command),
            exit_status = output.exit_status,
            output = %self.scrub(&output.combined()),
            "remote command executed"
        );
        Ok(output)
    }

    fn check(&self, command: &str, output: CommandOutput) -> Result<String> {
        if !output.success() {
            return Err(Error::CommandExecution {
                command: self.scrub(command),
                phase: self.phase,
                exit_status: output.exit_status,
                output: self.scrub(&output.combined()),
            });
        }
        Ok(output.stdout)
    }

    /// Run without judging the exit status.
    pub async fn run(&mut self, command: &str) -> Result<CommandOutput> {
        let timeout = self.timeout;
        self.dispatch(command, None, timeout).await
    }

    /// Trimmed stdout of a probe whose exit status is informative only
    /// (`systemctl is-active`, `which`, ...).
    pub async fn probe(&mut self, command: &str) -> Result<String> {
        Ok(self.run(command).await?.stdout.trim().to_string())
    }

    /// Run and return stdout, failing with `CommandExecution` on a non-zero exit.
    pub async fn execute(&mut self, command: &str) -> Result<String> {
        let timeout = self.timeout;
        self.execute_with_timeout(command, timeout).await
    }

    pub async fn execute_with_timeout(&mut self, command: &str, timeout: Duration) -> Result<String> {
        let output = self.dispatch(command, None, timeout).await?;
        self.check(command, output)
    }

    /// Run `command` with `input` on its stdin, failing on a non-zero exit.
    pub async fn pipe(&mut self, command: &str, input: &str, timeout: Duration) -> Result<String> {
        let output = self.dispatch(command, Some(input.as_bytes()), timeout).await?;
        self.check(command, output)
    }

    /// Write `contents` to `path` through `tee`, so the data travels on stdin
    /// and never appears on a command line.
    pub async fn upload(&mut self, path: &str, contents: &str, privileged: &str) -> Result<()> {
        let command = format!("{privileged}tee {} > /dev/null", shell::quote(path));
        let timeout = self.timeout;
        self.pipe(&command, contents, timeout).await.map(|_| ())
    }

    /// Wait for `delay` unless cancelled first.
    pub async fn settle(&mut self, delay: Duration) -> Result<()> {
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(Error::Cancelled),
            _ = tokio::time::sleep(delay) => Ok(()),
        }
    }
}
