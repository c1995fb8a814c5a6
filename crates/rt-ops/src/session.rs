use async_trait::async_trait;
use rt_db::models::RadiusServer;
use rt_infra::{RemoteShell, SshAuth, SshOptions, SshSession, SshTarget};

use crate::{Error, Result};

/// Opens a remote shell for a server record.
///
/// The returned shell connects lazily and is owned by the caller for one
/// operation; the caller disconnects it when done. Dropping it also closes
/// the connection.
#[async_trait]
pub trait ShellConnector: Send + Sync + 'static {
    async fn open(&self, server: &RadiusServer) -> Result<Box<dyn RemoteShell>>;
}

pub struct SshConnector {
    options: SshOptions,
}

impl SshConnector {
    pub fn new(options: SshOptions) -> Self {
        Self { options }
    }
}

#[async_trait]
impl ShellConnector for SshConnector {
    async fn open(&self, server: &RadiusServer) -> Result<Box<dyn RemoteShell>> {
        let target = target_for(server)?;
        Ok(Box::new(SshSession::new(target, self.options.clone())))
    }
}

/// Connection target of a record. A stored private key wins over the password.
pub fn target_for(server: &RadiusServer) -> Result<SshTarget> {
    let host = server
        .ssh_host()
        .ok_or_else(|| Error::configuration(format!("server {} has no host", server.id)))?;
    let port = u16::try_from(server.ssh_port)
        .ok()
        .filter(|p| *p != 0)
        .ok_or_else(|| Error::configuration(format!("invalid ssh port {}", server.ssh_port)))?;

    let auth = match (
        non_empty(server.ssh_private_key.as_deref()),
        non_empty(server.ssh_password.as_deref()),
    ) {
        (Some(key), _) => SshAuth::PrivateKey(key.to_string()),
        (None, Some(password)) => SshAuth::Password(password.to_string()),
        (None, None) => SshAuth::None,
    };

    Ok(SshTarget {
        host: host.to_string(),
        port,
        username: server.ssh_username.clone(),
        auth,
    })
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.filter(|v| !v.trim().is_empty())
}
