use std::env;
use std::net::SocketAddr;
use std::str::FromStr;
use std::time::Duration;

use rt_ops::Settings;
use rt_ops::settings::Bootstrap;

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub database_url: String,
    pub listen_addr: SocketAddr,
    pub admin_api_key: String,
    pub releases_repo: String,
    pub releases_api_url: String,
    pub releases_tag_prefix: String,
    pub releases_token: Option<String>,
    pub settings: Settings,
}

impl AppConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    fn from_lookup(var: impl Fn(&str) -> Option<String>) -> Self {
        let mut settings = Settings::default();

        settings.poll.attempts = parse_or(&var, "PROVISION_POLL_ATTEMPTS", settings.poll.attempts);
        settings.poll.interval = secs_or(&var, "PROVISION_POLL_INTERVAL_SECS", settings.poll.interval);
        settings.poll.settle = secs_or(&var, "PROVISION_SETTLE_SECS", settings.poll.settle);
        settings.timeouts.connect = secs_or(&var, "SSH_CONNECT_TIMEOUT_SECS", settings.timeouts.connect);
        settings.timeouts.command = secs_or(&var, "SSH_COMMAND_TIMEOUT_SECS", settings.timeouts.command);
        settings.timeouts.install = secs_or(&var, "INSTALL_TIMEOUT_SECS", settings.timeouts.install);

        // An empty repository turns the API bootstrap off.
        let default_bootstrap = Bootstrap::default();
        settings.bootstrap = match var("RADTIK_BOOTSTRAP_REPO") {
            Some(repo) if repo.trim().is_empty() => None,
            repo => Some(Bootstrap {
                repo_url: repo.unwrap_or(default_bootstrap.repo_url),
                branch: var("RADTIK_BOOTSTRAP_BRANCH").unwrap_or(default_bootstrap.branch),
            }),
        };

        Self {
            database_url: var("DATABASE_URL").expect("DATABASE_URL must be set"),
            listen_addr: var("LISTEN_ADDR")
                .unwrap_or_else(|| "0.0.0.0:8080".into())
                .parse()
                .expect("LISTEN_ADDR must be a valid socket address"),
            admin_api_key: var("ADMIN_API_KEY").expect("ADMIN_API_KEY must be set"),
            releases_repo: var("RELEASES_REPO").unwrap_or_else(|| "ahmadfoysal/radtik-radius".into()),
            releases_api_url: var("RELEASES_API_URL").unwrap_or_else(|| releases_api::API_URL.into()),
            releases_tag_prefix: var("RELEASES_TAG_PREFIX").unwrap_or_else(|| "v".into()),
            releases_token: var("RELEASES_TOKEN").filter(|t| !t.is_empty()),
            settings,
        }
    }
}

fn parse_or<T: FromStr>(var: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> T {
    match var(key) {
        Some(raw) => raw
            .trim()
            .parse()
            .unwrap_or_else(|_| panic!("{key} must be a valid number")),
        None => default,
    }
}

fn secs_or(var: &impl Fn(&str) -> Option<String>, key: &str, default: Duration) -> Duration {
    Duration::from_secs(parse_or(var, key, default.as_secs()))
}
