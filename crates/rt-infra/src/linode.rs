use async_trait::async_trait;
use tracing::{error, info};

use crate::types::{InstanceId, InstanceInfo, InstanceSpec};
use crate::{CloudProvisioner, Error, Result};

/// Linode API provider.
///
/// Delegates to `linode_api::LinodeClient` for all HTTP calls.
pub struct LinodeProvisioner {
    client: linode_api::LinodeClient,
}

impl LinodeProvisioner {
    pub fn new(client: linode_api::LinodeClient) -> Self {
        Self { client }
    }

    /// Create from env vars: `LINODE_API_TOKEN` (required), `LINODE_API_URL`.
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();

        let token = std::env::var("LINODE_API_TOKEN")
            .map_err(|_| Error::Configuration("LINODE_API_TOKEN is not set".into()))?;
        let client = match std::env::var("LINODE_API_URL") {
            Ok(url) => linode_api::LinodeClient::with_base_url(token, url),
            Err(_) => linode_api::LinodeClient::new(token),
        };

        Ok(Self { client })
    }

    fn parse_id(id: &InstanceId) -> Result<i64> {
        id.0.parse::<i64>()
            .map_err(|_| Error::Configuration(format!("invalid linode id: {}", id.0)))
    }
}

#[async_trait]
impl CloudProvisioner for LinodeProvisioner {
    async fn create_instance(&self, spec: &InstanceSpec) -> Result<InstanceInfo> {
        let instance = self
            .client
            .create_instance(&linode_api::CreateInstanceRequest {
                label: spec.label.clone(),
                region: spec.region.clone(),
                plan: spec.plan.clone(),
                image: spec.image.clone(),
                root_pass: spec.root_password.clone(),
                authorized_keys: vec![],
                backups_enabled: false,
                private_ip: false,
            })
            .await?;

        info!(instance_id = instance.id, ipv4 = ?instance.ipv4, "linode: instance created");

        Ok(InstanceInfo {
            id: InstanceId(instance.id.to_string()),
            ipv4: instance.ipv4,
            ipv6: instance.ipv6,
        })
    }

    async fn instance_status(&self, id: &InstanceId) -> Result<String> {
        let instance_id = Self::parse_id(id)?;
        Ok(self.client.instance_status(instance_id).await?)
    }

    async fn delete_instance(&self, id: &InstanceId) -> bool {
        let result = match Self::parse_id(id) {
            Ok(instance_id) => self.client.delete_instance(instance_id).await.map_err(Error::from),
            Err(e) => Err(e),
        };
        match result {
            Ok(()) => {
                info!(instance_id = %id.0, "linode: instance deleted");
                true
            }
            Err(e) => {
                error!(instance_id = %id.0, error = %e, "linode: failed to delete instance");
                false
            }
        }
    }

    async fn reboot_instance(&self, id: &InstanceId) -> bool {
        let result = match Self::parse_id(id) {
            Ok(instance_id) => self.client.reboot_instance(instance_id).await.map_err(Error::from),
            Err(e) => Err(e),
        };
        match result {
            Ok(()) => {
                info!(instance_id = %id.0, "linode: instance rebooting");
                true
            }
            Err(e) => {
                error!(instance_id = %id.0, error = %e, "linode: failed to reboot instance");
                false
            }
        }
    }

    fn name(&self) -> &'static str {
        "linode"
    }
}
