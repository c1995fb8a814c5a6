use chrono::{DateTime, Utc};
use rt_db::models::{InstallationStatus, RadiusServer};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::ApiError;

// ── Requests ───────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct CreateServerRequest {
    pub name: String,
    pub label: Option<String>,
    #[serde(default = "default_region")]
    pub region: String,
    #[serde(default = "default_plan")]
    pub plan: String,
    #[serde(default = "default_image")]
    pub image: String,
    /// Existing host to manage instead of provisioning one.
    pub host: Option<String>,
    #[serde(default = "default_ssh_port")]
    pub ssh_port: i32,
    #[serde(default = "default_ssh_username")]
    pub ssh_username: String,
    pub ssh_private_key: Option<String>,
    #[serde(default = "default_auth_port")]
    pub auth_port: i32,
    #[serde(default = "default_acct_port")]
    pub acct_port: i32,
    pub shared_secret: Option<String>,
}

fn default_region() -> String {
    "us-east".into()
}

fn default_plan() -> String {
    "g6-nanode-1".into()
}

fn default_image() -> String {
    "linode/ubuntu22.04".into()
}

fn default_ssh_port() -> i32 {
    22
}

fn default_ssh_username() -> String {
    "root".into()
}

fn default_auth_port() -> i32 {
    1812
}

fn default_acct_port() -> i32 {
    1813
}

impl CreateServerRequest {
    pub fn validate(&self) -> Result<(), ApiError> {
        if self.name.trim().is_empty() {
            return Err(ApiError::BadRequest("name must not be empty".into()));
        }
        for (field, port) in [
            ("ssh_port", self.ssh_port),
            ("auth_port", self.auth_port),
            ("acct_port", self.acct_port),
        ] {
            if !(1..=65535).contains(&port) {
                return Err(ApiError::BadRequest(format!("{field} must be between 1 and 65535")));
            }
        }
        if self.auth_port == self.acct_port {
            return Err(ApiError::BadRequest("auth_port and acct_port must differ".into()));
        }
        if self
            .shared_secret
            .as_deref()
            .is_some_and(|s| s.is_empty() || s.chars().any(char::is_control))
        {
            return Err(ApiError::BadRequest(
                "shared_secret must be non-empty without control characters".into(),
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct ConfigureRequest {
    pub shared_secret: Option<String>,
    pub auth_token: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct RadiusTestRequest {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Deserialize)]
pub struct LogsQuery {
    #[serde(default = "default_log_lines")]
    pub lines: u32,
}

fn default_log_lines() -> u32 {
    50
}

#[derive(Debug, Default, Deserialize)]
pub struct UpdateRequest {
    /// `latest` or a version such as `2.1.0`.
    pub version: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct RestoreRequest {
    pub location: String,
}

// ── Responses ──────────────────────────────────────────────────────

/// A server record without credentials or secrets.
#[derive(Debug, Serialize)]
pub struct ServerResponse {
    pub id: Uuid,
    pub name: String,
    pub label: Option<String>,
    pub instance_id: Option<String>,
    pub region: String,
    pub plan: String,
    pub image: String,
    pub ipv4: Option<String>,
    pub ipv6: Option<String>,
    pub host: Option<String>,
    pub ssh_port: i32,
    pub ssh_username: String,
    pub auth_port: i32,
    pub acct_port: i32,
    pub has_shared_secret: bool,
    pub has_auth_token: bool,
    pub sync_endpoint: Option<String>,
    pub installation_status: InstallationStatus,
    pub installed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<RadiusServer> for ServerResponse {
    fn from(s: RadiusServer) -> Self {
        Self {
            id: s.id,
            name: s.name,
            label: s.label,
            instance_id: s.instance_id,
            region: s.region,
            plan: s.plan,
            image: s.image,
            ipv4: s.ipv4,
            ipv6: s.ipv6,
            host: s.host,
            ssh_port: s.ssh_port,
            ssh_username: s.ssh_username,
            auth_port: s.auth_port,
            acct_port: s.acct_port,
            has_shared_secret: s.shared_secret.is_some_and(|v| !v.is_empty()),
            has_auth_token: s.auth_token.is_some_and(|v| !v.is_empty()),
            sync_endpoint: s.sync_endpoint,
            installation_status: s.installation_status,
            installed_at: s.installed_at,
            created_at: s.created_at,
            updated_at: s.updated_at,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct JobResponse {
    pub server_id: Uuid,
    pub job: &'static str,
    pub status: &'static str,
}

#[derive(Debug, Serialize)]
pub struct InstanceActionResponse {
    pub success: bool,
}
