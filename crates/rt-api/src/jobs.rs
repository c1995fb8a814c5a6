use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::error::ApiError;

/// Background jobs, at most one per server, each with its own cancellation token.
#[derive(Clone, Default)]
pub struct JobRegistry {
    running: Arc<Mutex<HashMap<Uuid, CancellationToken>>>,
}

impl JobRegistry {
    fn jobs(&self) -> MutexGuard<'_, HashMap<Uuid, CancellationToken>> {
        self.running.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Run `job` in the background for server `id`. Fails with `Conflict`
    /// while a previous job for the same server is still running.
    pub fn spawn<F, Fut>(&self, id: Uuid, job: F) -> Result<(), ApiError>
    where
        F: FnOnce(CancellationToken) -> Fut,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let token = {
            let mut jobs = self.jobs();
            if jobs.contains_key(&id) {
                return Err(ApiError::Conflict(format!("a job is already running for server {id}")));
            }
            let token = CancellationToken::new();
            jobs.insert(id, token.clone());
            token
        };

        // The job runs in its own task so a panic still releases the slot.
        let handle = tokio::spawn(job(token));
        let registry = self.clone();
        tokio::spawn(async move {
            if let Err(e) = handle.await {
                tracing::error!(server_id = %id, error = %e, "background job aborted");
            }
            registry.jobs().remove(&id);
        });
        Ok(())
    }

    /// Signal the running job for `id`. Returns `false` if there is none.
    pub fn cancel(&self, id: Uuid) -> bool {
        match self.jobs().get(&id) {
            Some(token) => {
                token.cancel();
                true
            }
            None => false,
        }
    }

    pub fn is_running(&self, id: Uuid) -> bool {
        self.jobs().contains_key(&id)
    }
}
