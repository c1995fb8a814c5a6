use serde::{Deserialize, Serialize};

// ── Instance types ───────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize)]
pub struct CreateInstanceRequest {
    pub label: String,
    pub region: String,
    #[serde(rename = "type")]
    pub plan: String,
    pub image: String,
    pub root_pass: String,
    pub authorized_keys: Vec<String>,
    pub backups_enabled: bool,
    pub private_ip: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Instance {
    pub id: i64,
    #[serde(default)]
    pub label: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub region: Option<String>,
    #[serde(default)]
    pub ipv4: Vec<String>,
    #[serde(default)]
    pub ipv6: Option<String>,
}

/// Minimal view of `GET /linode/instances/{id}` used for status polling.
#[derive(Debug, Clone, Deserialize)]
pub(crate) struct InstanceStatusBody {
    #[serde(default)]
    pub status: Option<String>,
}
