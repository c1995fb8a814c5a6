use std::fmt;

use serde::{Deserialize, Serialize};

/// Opaque provider-side instance identifier (e.g. a Linode ID).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct InstanceId(pub String);

impl fmt::Display for InstanceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Specification for creating a cloud instance.
#[derive(Debug, Clone)]
pub struct InstanceSpec {
    pub label: String,
    pub region: String,
    pub plan: String,
    pub image: String,
    pub root_password: String,
}

/// Instance identity and addresses returned by the provider on creation.
#[derive(Debug, Clone)]
pub struct InstanceInfo {
    pub id: InstanceId,
    pub ipv4: Vec<String>,
    pub ipv6: Option<String>,
}

impl InstanceInfo {
    /// First public IPv4 address, used as the SSH host.
    pub fn primary_ipv4(&self) -> Option<&str> {
        self.ipv4.first().map(String::as_str)
    }
}
