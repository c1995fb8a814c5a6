use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rt_db::models::{InstallationStatus, InstanceRefs, PushedConfig, RadiusServer};
use sqlx::PgPool;
use uuid::Uuid;

use crate::{Error, Result};

/// Persistence of server records as seen by the lifecycle operations.
#[async_trait]
pub trait ServerStore: Send + Sync + 'static {
    async fn get(&self, id: Uuid) -> Result<RadiusServer>;

    /// Compare-and-set `pending|failed → creating`; `None` if the record is
    /// in any other state.
    async fn begin_provisioning(&self, id: Uuid) -> Result<Option<RadiusServer>>;

    async fn set_status(&self, id: Uuid, status: InstallationStatus) -> Result<()>;

    async fn append_log(&self, id: Uuid, line: &str) -> Result<()>;

    async fn record_instance(&self, id: Uuid, refs: &InstanceRefs<'_>) -> Result<()>;

    async fn mark_completed(&self, id: Uuid, at: DateTime<Utc>) -> Result<()>;

    async fn record_config(&self, id: Uuid, config: &PushedConfig<'_>) -> Result<()>;
}

#[async_trait]
impl ServerStore for PgPool {
    async fn get(&self, id: Uuid) -> Result<RadiusServer> {
        RadiusServer::get_by_id(self, id).await.map_err(|e| match e {
            sqlx::Error::RowNotFound => Error::NotFound(id),
            e => Error::Database(e),
        })
    }

    async fn begin_provisioning(&self, id: Uuid) -> Result<Option<RadiusServer>> {
        Ok(RadiusServer::begin_provisioning(self, id).await?)
    }

    async fn set_status(&self, id: Uuid, status: InstallationStatus) -> Result<()> {
        Ok(RadiusServer::set_status(self, id, status).await?)
    }

    async fn append_log(&self, id: Uuid, line: &str) -> Result<()> {
        Ok(RadiusServer::append_log(self, id, line).await?)
    }

    async fn record_instance(&self, id: Uuid, refs: &InstanceRefs<'_>) -> Result<()> {
        Ok(RadiusServer::record_instance(self, id, refs).await?)
    }

    async fn mark_completed(&self, id: Uuid, at: DateTime<Utc>) -> Result<()> {
        Ok(RadiusServer::mark_completed(self, id, at).await?)
    }

    async fn record_config(&self, id: Uuid, config: &PushedConfig<'_>) -> Result<()> {
        Ok(RadiusServer::record_config(self, id, config).await?)
    }
}

// ── MemoryStore ─────────────────────────────────────────────────────

/// Process-local store with the same semantics as the SQL one.
#[derive(Default)]
pub struct MemoryStore {
    records: Mutex<HashMap<Uuid, RadiusServer>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, server: RadiusServer) {
        self.lock().insert(server.id, server);
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<Uuid, RadiusServer>> {
        self.records.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn update<F>(&self, id: Uuid, f: F) -> Result<()>
    where
        F: FnOnce(&mut RadiusServer),
    {
        let mut records = self.lock();
        let server = records.get_mut(&id).ok_or(Error::NotFound(id))?;
        f(server);
        server.updated_at = Utc::now();
        Ok(())
    }
}

#[async_trait]
impl ServerStore for MemoryStore {
    async fn get(&self, id: Uuid) -> Result<RadiusServer> {
        self.lock().get(&id).cloned().ok_or(Error::NotFound(id))
    }

    async fn begin_provisioning(&self, id: Uuid) -> Result<Option<RadiusServer>> {
        let mut records = self.lock();
        let server = records.get_mut(&id).ok_or(Error::NotFound(id))?;
        if !server.installation_status.can_provision() {
            return Ok(None);
        }
        server.installation_status = InstallationStatus::Creating;
        server.updated_at = Utc::now();
        Ok(Some(server.clone()))
    }

    async fn set_status(&self, id: Uuid, status: InstallationStatus) -> Result<()> {
        self.update(id, |s| s.installation_status = status)
    }

    async fn append_log(&self, id: Uuid, line: &str) -> Result<()> {
        self.update(id, |s| s.push_log(line))
    }

    async fn record_instance(&self, id: Uuid, refs: &InstanceRefs<'_>) -> Result<()> {
        self.update(id, |s| {
            s.instance_id = Some(refs.instance_id.to_string());
            s.ipv4 = refs.ipv4.map(str::to_string);
            s.ipv6 = refs.ipv6.map(str::to_string);
            s.host = refs.host.map(str::to_string);
            s.ssh_password = Some(refs.ssh_password.to_string());
        })
    }

    async fn mark_completed(&self, id: Uuid, at: DateTime<Utc>) -> Result<()> {
        self.update(id, |s| {
            s.installation_status = InstallationStatus::Completed;
            s.installed_at.get_or_insert(at);
        })
    }

    async fn record_config(&self, id: Uuid, config: &PushedConfig<'_>) -> Result<()> {
        self.update(id, |s| {
            s.shared_secret = Some(config.shared_secret.to_string());
            s.auth_token = Some(config.auth_token.to_string());
            s.sync_endpoint = Some(config.sync_endpoint.to_string());
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::server;

    #[tokio::test]
    async fn provisioning_cas_admits_one_caller() {
        let store = MemoryStore::new();
        let record = server(InstallationStatus::Pending);
        let id = record.id;
        store.insert(record);

        assert!(store.begin_provisioning(id).await.unwrap().is_some());
        assert!(store.begin_provisioning(id).await.unwrap().is_none());

        store.set_status(id, InstallationStatus::Failed).await.unwrap();
        assert!(store.begin_provisioning(id).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn installed_at_keeps_first_completion() {
        let store = MemoryStore::new();
        let record = server(InstallationStatus::Installing);
        let id = record.id;
        store.insert(record);

        let first = Utc::now() - chrono::Duration::days(1);
        store.mark_completed(id, first).await.unwrap();
        store.mark_completed(id, Utc::now()).await.unwrap();
        assert_eq!(store.get(id).await.unwrap().installed_at, Some(first));
    }

    #[tokio::test]
    async fn missing_records_are_not_found() {
        let store = MemoryStore::new();
        let err = store.append_log(Uuid::new_v4(), "x").await.unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));
    }
}
