//! Typed Rust client for the Linode v4 API.
//!
//! Covers the subset needed for hosting a RADIUS server:
//! instances (create, status, delete, reboot).

mod types;

pub use types::*;

pub const BASE_URL: &str = "https://api.linode.com/v4";

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("linode api request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("linode api {endpoint} returned {status}: {body}")]
    Api {
        endpoint: &'static str,
        status: reqwest::StatusCode,
        body: String,
    },
}

pub type Result<T> = std::result::Result<T, Error>;

/// Client for the Linode REST API.
#[derive(Clone)]
pub struct LinodeClient {
    token: String,
    base_url: String,
    http: reqwest::Client,
}

impl LinodeClient {
    pub fn new(token: impl Into<String>) -> Self {
        Self::with_base_url(token, BASE_URL)
    }

    /// Point the client at a different API root (tests, proxies).
    pub fn with_base_url(token: impl Into<String>, base_url: impl Into<String>) -> Self {
        Self {
            token: token.into(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            http: reqwest::Client::new(),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}/linode/instances{path}", self.base_url)
    }

    fn auth(&self) -> String {
        format!("Bearer {}", self.token)
    }

    async fn check(resp: reqwest::Response, endpoint: &'static str) -> Result<reqwest::Response> {
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(Error::Api { endpoint, status, body });
        }
        Ok(resp)
    }

    /// Like `check` but also treats 404 as success (for delete idempotency).
    async fn check_allow_404(resp: reqwest::Response, endpoint: &'static str) -> Result<reqwest::Response> {
        let status = resp.status();
        if !status.is_success() && status.as_u16() != 404 {
            let body = resp.text().await.unwrap_or_default();
            return Err(Error::Api { endpoint, status, body });
        }
        Ok(resp)
    }

    // ── Instances ────────────────────────────────────────────────────

    pub async fn create_instance(&self, req: &CreateInstanceRequest) -> Result<Instance> {
        let resp = self
            .http
            .post(self.url(""))
            .header("Authorization", self.auth())
            .json(req)
            .send()
            .await?;

        Self::check(resp, "create instance")
            .await?
            .json()
            .await
            .map_err(Error::from)
    }

    /// Current provider status (`provisioning`, `booting`, `running`, ...).
    ///
    /// An unparseable body yields `"unknown"` rather than an error.
    pub async fn instance_status(&self, instance_id: i64) -> Result<String> {
        let resp = self
            .http
            .get(self.url(&format!("/{instance_id}")))
            .header("Authorization", self.auth())
            .send()
            .await?;

        let body = Self::check(resp, "get instance").await?.text().await?;

        Ok(serde_json::from_str::<types::InstanceStatusBody>(&body)
            .ok()
            .and_then(|b| b.status)
            .unwrap_or_else(|| "unknown".into()))
    }

    pub async fn delete_instance(&self, instance_id: i64) -> Result<()> {
        let resp = self
            .http
            .delete(self.url(&format!("/{instance_id}")))
            .header("Authorization", self.auth())
            .send()
            .await?;

        Self::check_allow_404(resp, "delete instance").await?;
        Ok(())
    }

    pub async fn reboot_instance(&self, instance_id: i64) -> Result<()> {
        let resp = self
            .http
            .post(self.url(&format!("/{instance_id}/reboot")))
            .header("Authorization", self.auth())
            .send()
            .await?;

        Self::check(resp, "reboot instance").await?;
        Ok(())
    }
}
