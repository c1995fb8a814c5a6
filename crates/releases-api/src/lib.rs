//! Typed Rust client for a GitHub-style release registry.
//!
//! Covers the latest-release lookup and the tarball URL for a tag.
//! Archives are downloaded by the remote host itself, so this crate
//! only builds their URLs.

mod types;

pub use types::*;

pub const API_URL: &str = "https://api.github.com";
pub const ARCHIVE_URL: &str = "https://github.com";

const USER_AGENT: &str = concat!("radtik-ops/", env!("CARGO_PKG_VERSION"));

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("release registry request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("release registry {endpoint} returned {status}: {body}")]
    Api {
        endpoint: &'static str,
        status: reqwest::StatusCode,
        body: String,
    },
}

pub type Result<T> = std::result::Result<T, Error>;

/// Client for the releases of one repository (`owner/name`).
#[derive(Clone)]
pub struct ReleasesClient {
    repo: String,
    api_url: String,
    archive_url: String,
    token: Option<String>,
    http: reqwest::Client,
}

impl ReleasesClient {
    pub fn new(repo: impl Into<String>) -> Self {
        Self::with_urls(repo, API_URL, ARCHIVE_URL)
    }

    pub fn with_urls(
        repo: impl Into<String>,
        api_url: impl Into<String>,
        archive_url: impl Into<String>,
    ) -> Self {
        Self {
            repo: repo.into(),
            api_url: api_url.into().trim_end_matches('/').to_string(),
            archive_url: archive_url.into().trim_end_matches('/').to_string(),
            token: None,
            http: reqwest::Client::new(),
        }
    }

    /// Authenticate registry requests (raises the anonymous rate limit).
    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    pub fn repo(&self) -> &str {
        &self.repo
    }

    async fn check(resp: reqwest::Response, endpoint: &'static str) -> Result<reqwest::Response> {
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(Error::Api {
                endpoint,
                status,
                body,
            });
        }
        Ok(resp)
    }

    pub async fn latest_release(&self) -> Result<Release> {
        let mut req = self
            .http
            .get(format!("{}/repos/{}/releases/latest", self.api_url, self.repo))
            .header("User-Agent", USER_AGENT)
            .header("Accept", "application/vnd.github+json");
        if let Some(token) = &self.token {
            req = req.header("Authorization", format!("Bearer {token}"));
        }

        Self::check(req.send().await?, "latest release")
            .await?
            .json()
            .await
            .map_err(Error::from)
    }

    /// Tarball URL for a release tag.
    pub fn archive_url(&self, tag: &str) -> String {
        format!("{}/{}/archive/refs/tags/{tag}.tar.gz", self.archive_url, self.repo)
    }
}
