pub mod exec;
pub mod linode;
pub mod shell;
pub mod ssh;
pub mod types;

use std::time::Duration;

use async_trait::async_trait;
use types::{InstanceId, InstanceInfo, InstanceSpec};

pub use exec::Executor;
pub use ssh::{CommandOutput, RemoteShell, SshAuth, SshOptions, SshSession, SshTarget};

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("connection error: {0}")]
    Connection(String),

    #[error("authentication error: {0}")]
    Authentication(String),

    #[error("instance provisioning failed ({status_code}): {body}")]
    Provisioning { status_code: u16, body: String },

    #[error("{phase}: command `{command}` exited with status {exit_status}: {output}")]
    CommandExecution {
        command: String,
        phase: &'static str,
        exit_status: u32,
        output: String,
    },

    #[error("command `{command}` timed out after {after:?}")]
    CommandTimeout { command: String, after: Duration },

    #[error("operation cancelled")]
    Cancelled,
}

pub type Result<T> = std::result::Result<T, Error>;

impl From<linode_api::Error> for Error {
    fn from(e: linode_api::Error) -> Self {
        match e {
            linode_api::Error::Api { status, body, .. } => Error::Provisioning {
                status_code: status.as_u16(),
                body,
            },
            linode_api::Error::Request(e) => Error::Connection(format!("linode api: {e}")),
        }
    }
}

/// Backend-agnostic interface for the cloud instance hosting a RADIUS server.
///
/// `delete_instance` and `reboot_instance` are operator conveniences: they
/// log failures and report a boolean instead of erroring.
#[async_trait]
pub trait CloudProvisioner: Send + Sync + 'static {
    /// Create an instance and return its identity and addresses.
    async fn create_instance(&self, spec: &InstanceSpec) -> Result<InstanceInfo>;

    /// Provider status string, `"unknown"` when the response cannot be parsed.
    async fn instance_status(&self, id: &InstanceId) -> Result<String>;

    /// Destroy an instance permanently.
    async fn delete_instance(&self, id: &InstanceId) -> bool;

    /// Reboot an instance.
    async fn reboot_instance(&self, id: &InstanceId) -> bool;

    /// Provider identifier.
    fn name(&self) -> &'static str;
}

/// Provisioner used when no cloud credentials are configured. Creation and
/// status queries fail with `Configuration`; delete and reboot report `false`.
pub struct UnconfiguredProvisioner {
    reason: String,
}

impl UnconfiguredProvisioner {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}

#[async_trait]
impl CloudProvisioner for UnconfiguredProvisioner {
    async fn create_instance(&self, _spec: &InstanceSpec) -> Result<InstanceInfo> {
        Err(Error::Configuration(self.reason.clone()))
    }

    async fn instance_status(&self, _id: &InstanceId) -> Result<String> {
        Err(Error::Configuration(self.reason.clone()))
    }

    async fn delete_instance(&self, id: &InstanceId) -> bool {
        tracing::error!(instance_id = %id, reason = %self.reason, "cannot delete instance without a cloud provider");
        false
    }

    async fn reboot_instance(&self, id: &InstanceId) -> bool {
        tracing::error!(instance_id = %id, reason = %self.reason, "cannot reboot instance without a cloud provider");
        false
    }

    fn name(&self) -> &'static str {
        "unconfigured"
    }
}
