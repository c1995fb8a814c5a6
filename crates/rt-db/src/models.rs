use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, PgPool};
use uuid::Uuid;

// ── InstallationStatus ──────────────────────────────────────────────

/// Provisioning/installation state machine of a server record.
///
/// `pending → creating → installing → completed`, with `creating` and
/// `installing` falling to `failed`. `failed` only leaves through a new
/// provisioning attempt (`failed → creating`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, sqlx::Type, Serialize, Deserialize)]
#[sqlx(type_name = "installation_status", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum InstallationStatus {
    Pending,
    Creating,
    Installing,
    Completed,
    Failed,
}

impl InstallationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Creating => "creating",
            Self::Installing => "installing",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    /// Whether a provisioning run may start from this state.
    pub fn can_provision(&self) -> bool {
        matches!(self, Self::Pending | Self::Failed)
    }

    pub fn can_transition_to(&self, next: Self) -> bool {
        use InstallationStatus::*;
        matches!(
            (self, next),
            (Pending | Failed, Creating)
                | (Creating, Installing | Failed)
                | (Installing, Installing | Completed | Failed)
        )
    }
}

impl fmt::Display for InstallationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ── RadiusServer ────────────────────────────────────────────────────

#[derive(Clone, FromRow, Serialize, Deserialize)]
pub struct RadiusServer {
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
    pub ssh_password: Option<String>,
    pub ssh_private_key: Option<String>,

    pub auth_port: i32,
    pub acct_port: i32,
    pub shared_secret: Option<String>,
    pub auth_token: Option<String>,
    pub sync_endpoint: Option<String>,

    pub installation_status: InstallationStatus,
    pub installation_log: String,
    pub installed_at: Option<DateTime<Utc>>,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

// Credentials and secrets stay out of debug output.
impl fmt::Debug for RadiusServer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RadiusServer")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("instance_id", &self.instance_id)
            .field("region", &self.region)
            .field("host", &self.host)
            .field("ssh_port", &self.ssh_port)
            .field("ssh_username", &self.ssh_username)
            .field("installation_status", &self.installation_status)
            .field("installed_at", &self.installed_at)
            .finish_non_exhaustive()
    }
}

pub struct NewRadiusServer<'a> {
    pub name: &'a str,
    pub label: Option<&'a str>,
    pub region: &'a str,
    pub plan: &'a str,
    pub image: &'a str,
    pub host: Option<&'a str>,
    pub ssh_port: i32,
    pub ssh_username: &'a str,
    pub ssh_private_key: Option<&'a str>,
    pub auth_port: i32,
    pub acct_port: i32,
    pub shared_secret: Option<&'a str>,
}

/// Cloud references recorded once an instance exists.
#[derive(Debug, Clone)]
pub struct InstanceRefs<'a> {
    pub instance_id: &'a str,
    pub ipv4: Option<&'a str>,
    pub ipv6: Option<&'a str>,
    pub host: Option<&'a str>,
    pub ssh_password: &'a str,
}

/// Secrets pushed to the server after installation.
#[derive(Debug, Clone)]
pub struct PushedConfig<'a> {
    pub shared_secret: &'a str,
    pub auth_token: &'a str,
    pub sync_endpoint: &'a str,
}

impl RadiusServer {
    /// Host to connect to: explicit host, else the instance's IPv4.
    pub fn ssh_host(&self) -> Option<&str> {
        self.host
            .as_deref()
            .filter(|h| !h.is_empty())
            .or(self.ipv4.as_deref())
    }

    /// Label used for the cloud instance.
    pub fn instance_label(&self) -> String {
        if let Some(label) = self.label.as_deref().filter(|l| !l.is_empty()) {
            return label.to_string();
        }
        let slug: String = self
            .name
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() { c.to_ascii_lowercase() } else { '-' })
            .collect();
        let slug = slug.trim_matches('-');
        if slug.is_empty() {
            format!("radius-{}", self.id.simple())
        } else {
            format!("radius-{slug}")
        }
    }

    /// Append one entry to the in-memory log the same way `append_log` does in SQL.
    pub fn push_log(&mut self, line: &str) {
        if !self.installation_log.is_empty() {
            self.installation_log.push('\n');
        }
        self.installation_log.push_str(line);
    }

    pub async fn insert(pool: &PgPool, new: &NewRadiusServer<'_>) -> sqlx::Result<Self> {
        sqlx::query_as(
            r#"INSERT INTO radius_servers (name, label, region, plan, image, host, ssh_port, ssh_username,
                                           ssh_private_key, auth_port, acct_port, shared_secret)
               VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
               RETURNING *"#,
        )
        .bind(new.name)
        .bind(new.label)
        .bind(new.region)
        .bind(new.plan)
        .bind(new.image)
        .bind(new.host)
        .bind(new.ssh_port)
        .bind(new.ssh_username)
        .bind(new.ssh_private_key)
        .bind(new.auth_port)
        .bind(new.acct_port)
        .bind(new.shared_secret)
        .fetch_one(pool)
        .await
    }

    pub async fn get_by_id(pool: &PgPool, id: Uuid) -> sqlx::Result<Self> {
        sqlx::query_as("SELECT * FROM radius_servers WHERE id = $1")
            .bind(id)
            .fetch_one(pool)
            .await
    }

    pub async fn list(pool: &PgPool) -> sqlx::Result<Vec<Self>> {
        sqlx::query_as("SELECT * FROM radius_servers ORDER BY created_at")
            .fetch_all(pool)
            .await
    }

    pub async fn list_by_status(pool: &PgPool, status: InstallationStatus) -> sqlx::Result<Vec<Self>> {
        sqlx::query_as("SELECT * FROM radius_servers WHERE installation_status = $1 ORDER BY created_at")
            .bind(status)
            .fetch_all(pool)
            .await
    }

    pub async fn set_status(pool: &PgPool, id: Uuid, status: InstallationStatus) -> sqlx::Result<()> {
        sqlx::query("UPDATE radius_servers SET installation_status = $1 WHERE id = $2")
            .bind(status)
            .bind(id)
            .execute(pool)
            .await?;
        Ok(())
    }

    /// Compare-and-set `pending|failed → creating`.
    ///
    /// Returns `None` when the record is in any other state, i.e. another
    /// provisioning run owns it or it is already installed.
    pub async fn begin_provisioning(pool: &PgPool, id: Uuid) -> sqlx::Result<Option<Self>> {
        sqlx::query_as(
            r#"UPDATE radius_servers
               SET installation_status = 'creating'
               WHERE id = $1 AND installation_status IN ('pending', 'failed')
               RETURNING *"#,
        )
        .bind(id)
        .fetch_optional(pool)
        .await
    }

    /// Append-only log write; existing text is never rewritten.
    pub async fn append_log(pool: &PgPool, id: Uuid, line: &str) -> sqlx::Result<()> {
        sqlx::query(
            r#"UPDATE radius_servers
               SET installation_log = CASE
                       WHEN installation_log = '' THEN $1
                       ELSE installation_log || E'\n' || $1
                   END
               WHERE id = $2"#,
        )
        .bind(line)
        .bind(id)
        .execute(pool)
        .await?;
        Ok(())
    }

    pub async fn record_instance(pool: &PgPool, id: Uuid, refs: &InstanceRefs<'_>) -> sqlx::Result<()> {
        sqlx::query(
            r#"UPDATE radius_servers
               SET instance_id  = $1,
                   ipv4         = $2,
                   ipv6         = $3,
                   host         = $4,
                   ssh_password = $5
               WHERE id = $6"#,
        )
        .bind(refs.instance_id)
        .bind(refs.ipv4)
        .bind(refs.ipv6)
        .bind(refs.host)
        .bind(refs.ssh_password)
        .bind(id)
        .execute(pool)
        .await?;
        Ok(())
    }

    /// Mark the install complete. `installed_at` keeps its first value.
    pub async fn mark_completed(pool: &PgPool, id: Uuid, at: DateTime<Utc>) -> sqlx::Result<()> {
        sqlx::query(
            r#"UPDATE radius_servers
               SET installation_status = 'completed',
                   installed_at        = COALESCE(installed_at, $1)
               WHERE id = $2"#,
        )
        .bind(at)
        .bind(id)
        .execute(pool)
        .await?;
        Ok(())
    }

    pub async fn record_config(pool: &PgPool, id: Uuid, config: &PushedConfig<'_>) -> sqlx::Result<()> {
        sqlx::query(
            r#"UPDATE radius_servers
               SET shared_secret = $1,
                   auth_token    = $2,
                   sync_endpoint = $3
               WHERE id = $4"#,
        )
        .bind(config.shared_secret)
        .bind(config.auth_token)
        .bind(config.sync_endpoint)
        .bind(id)
        .execute(pool)
        .await?;
        Ok(())
    }
}
