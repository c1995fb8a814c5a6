use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use russh::client::{self, Handle};
use russh::{ChannelMsg, Disconnect};
use russh_keys::key;
use tracing::{debug, info};

use crate::{Error, Result};

/// Exit status reported when the remote side closes without one
/// (process killed by a signal).
const MISSING_EXIT_STATUS: u32 = 255;

/// Captured result of one remote command.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    pub exit_status: u32,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.exit_status == 0
    }

    /// stdout followed by stderr, for error reports and logs.
    pub fn combined(&self) -> String {
        match (self.stdout.is_empty(), self.stderr.is_empty()) {
            (_, true) => self.stdout.clone(),
            (true, false) => self.stderr.clone(),
            (false, false) => format!("{}\n{}", self.stdout.trim_end(), self.stderr),
        }
    }
}

/// A shell on one remote host.
///
/// Implementations connect lazily on the first command and keep the
/// connection for the lifetime of the value.
#[async_trait]
pub trait RemoteShell: Send {
    /// Run `command` through the remote shell, optionally feeding `stdin`.
    /// A non-zero exit is reported in the output, not as an error.
    async fn run(&mut self, command: &str, stdin: Option<&[u8]>) -> Result<CommandOutput>;

    /// Close the connection. Idempotent.
    async fn disconnect(&mut self);
}

/// SSH credentials. The private key wins when both are stored on a record.
#[derive(Clone)]
pub enum SshAuth {
    PrivateKey(String),
    Password(String),
    None,
}

impl fmt::Debug for SshAuth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::PrivateKey(_) => "PrivateKey(***)",
            Self::Password(_) => "Password(***)",
            Self::None => "None",
        })
    }
}

#[derive(Debug, Clone)]
pub struct SshTarget {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub auth: SshAuth,
}

#[derive(Debug, Clone)]
pub struct SshOptions {
    pub connect_timeout: Duration,
    pub inactivity_timeout: Duration,
}

impl Default for SshOptions {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(30),
            inactivity_timeout: Duration::from_secs(1800),
        }
    }
}

struct HostKeyLogger {
    host: String,
}

#[async_trait]
impl client::Handler for HostKeyLogger {
    type Error = russh::Error;

    async fn check_server_key(
        &mut self,
        server_public_key: &key::PublicKey,
    ) -> std::result::Result<bool, Self::Error> {
        info!(
            host = %self.host,
            fingerprint = %server_public_key.fingerprint(),
            "ssh: accepting host key"
        );
        Ok(true)
    }
}

/// `russh`-backed [`RemoteShell`].
///
/// Owned by exactly one caller. Dropping the session drops the client
/// handle, which tears the connection down; [`RemoteShell::disconnect`]
/// does the same with a polite SSH disconnect message.
pub struct SshSession {
    target: SshTarget,
    options: SshOptions,
    handle: Option<Handle<HostKeyLogger>>,
}

impl SshSession {
    pub fn new(target: SshTarget, options: SshOptions) -> Self {
        Self {
            target,
            options,
            handle: None,
        }
    }

    pub fn target(&self) -> &SshTarget {
        &self.target
    }

    pub fn is_connected(&self) -> bool {
        self.handle.is_some()
    }

    async fn open(&self) -> Result<Handle<HostKeyLogger>> {
        let target = &self.target;
        if matches!(target.auth, SshAuth::None) {
            return Err(Error::Authentication(
                "no SSH authentication credentials configured".into(),
            ));
        }

        let config = Arc::new(client::Config {
            inactivity_timeout: Some(self.options.inactivity_timeout),
            ..Default::default()
        });
        let handler = HostKeyLogger {
            host: target.host.clone(),
        };

        let mut handle = tokio::time::timeout(
            self.options.connect_timeout,
            client::connect(config, (target.host.as_str(), target.port), handler),
        )
        .await
        .map_err(|_| {
            Error::Connection(format!(
                "timed out connecting to {}:{} after {:?}",
                target.host, target.port, self.options.connect_timeout
            ))
        })?
        .map_err(|e| Error::Connection(format!("{}:{}: {e}", target.host, target.port)))?;

        let (method, authenticated) = match &target.auth {
            SshAuth::PrivateKey(pem) => {
                let key_pair = russh_keys::decode_secret_key(pem, None)
                    .map_err(|e| Error::Authentication(format!("invalid private key: {e}")))?;
                let ok = handle
                    .authenticate_publickey(target.username.clone(), Arc::new(key_pair))
                    .await;
                ("private key", ok)
            }
            SshAuth::Password(password) => {
                let ok = handle
                    .authenticate_password(target.username.clone(), password.clone())
                    .await;
                ("password", ok)
            }
            SshAuth::None => {
                return Err(Error::Authentication(
                    "no SSH authentication credentials configured".into(),
                ));
            }
        };

        let authenticated = authenticated
            .map_err(|e| Error::Connection(format!("ssh authentication exchange failed: {e}")))?;
        if !authenticated {
            return Err(Error::Authentication(format!(
                "SSH authentication failed ({method}) for {}@{}",
                target.username, target.host
            )));
        }

        info!(host = %target.host, port = target.port, method, "ssh: connected");
        Ok(handle)
    }

    async fn connect(&mut self) -> Result<&Handle<HostKeyLogger>> {
        if self.handle.is_none() {
            let handle = self.open().await?;
            self.handle = Some(handle);
        }
        self.handle
            .as_ref()
            .ok_or_else(|| Error::Connection("ssh session unavailable".into()))
    }
}

#[async_trait]
impl RemoteShell for SshSession {
    async fn run(&mut self, command: &str, stdin: Option<&[u8]>) -> Result<CommandOutput> {
        let opened = self.connect().await?.channel_open_session().await;
        let mut channel = match opened {
            Ok(channel) => channel,
            Err(e) => {
                // The cached connection is dead; reconnect on the next command.
                self.handle = None;
                return Err(Error::Connection(format!("failed to open ssh channel: {e}")));
            }
        };

        let io_err = |e: russh::Error| Error::Connection(format!("ssh channel: {e}"));

        channel.exec(true, command).await.map_err(io_err)?;
        if let Some(input) = stdin {
            channel.data(input).await.map_err(io_err)?;
        }
        channel.eof().await.map_err(io_err)?;

        let mut stdout = Vec::new();
        let mut stderr = Vec::new();
        let mut exit_status = None;
        while let Some(msg) = channel.wait().await {
            match msg {
                ChannelMsg::Data { ref data } => stdout.extend_from_slice(data),
                ChannelMsg::ExtendedData { ref data, ext: 1 } => stderr.extend_from_slice(data),
                ChannelMsg::ExitStatus { exit_status: code } => exit_status = Some(code),
                _ => {}
            }
        }

        Ok(CommandOutput {
            exit_status: exit_status.unwrap_or(MISSING_EXIT_STATUS),
            stdout: String::from_utf8_lossy(&stdout).into_owned(),
            stderr: String::from_utf8_lossy(&stderr).into_owned(),
        })
    }

    async fn disconnect(&mut self) {
        if let Some(handle) = self.handle.take() {
            if let Err(e) = handle
                .disconnect(Disconnect::ByApplication, "", "en")
                .await
            {
                debug!(host = %self.target.host, error = %e, "ssh: disconnect failed");
            }
            debug!(host = %self.target.host, "ssh: disconnected");
        }
    }
}
