use std::time::Duration;

/// Tunables for the lifecycle operations. `Default` carries the production values.
#[derive(Debug, Clone)]
pub struct Settings {
    pub poll: PollSettings,
    pub timeouts: Timeouts,
    pub settle: SettleDelays,
    pub layout: RemoteLayout,
    pub services: Services,
    /// API bootstrap run at the end of the install script; `None` skips it.
    pub bootstrap: Option<Bootstrap>,
    /// Prepended to privileged commands, including its trailing space.
    pub privilege: String,
    /// Secret used by `radtest` when the record has none.
    pub fallback_radius_secret: String,
}

#[derive(Debug, Clone)]
pub struct PollSettings {
    pub attempts: u32,
    pub interval: Duration,
    /// Extra wait after the instance reports `running`, for sshd to come up.
    pub settle: Duration,
}

#[derive(Debug, Clone)]
pub struct Timeouts {
    pub connect: Duration,
    pub command: Duration,
    pub install: Duration,
}

#[derive(Debug, Clone)]
pub struct SettleDelays {
    pub secrets: Duration,
    pub restart: Duration,
    pub update: Duration,
}

#[derive(Debug, Clone)]
pub struct RemoteLayout {
    pub install_dir: String,
    pub config_ini: String,
    pub auth_token_key: String,
    pub staging_clients: String,
    pub nas_block: String,
    pub active_clients: String,
    pub version_file: String,
    pub database: String,
    pub backup_root: String,
    /// Paths relative to `install_dir` carried over from the live install on update.
    pub preserved: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct Services {
    pub radius: String,
    pub api: String,
    pub api_port: u16,
}

#[derive(Debug, Clone)]
pub struct Bootstrap {
    pub repo_url: String,
    pub branch: String,
}

impl Default for PollSettings {
    fn default() -> Self {
        Self {
            attempts: 30,
            interval: Duration::from_secs(10),
            settle: Duration::from_secs(30),
        }
    }
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            connect: Duration::from_secs(30),
            command: Duration::from_secs(120),
            install: Duration::from_secs(1800),
        }
    }
}

impl Default for SettleDelays {
    fn default() -> Self {
        Self {
            secrets: Duration::from_secs(2),
            restart: Duration::from_secs(3),
            update: Duration::from_secs(5),
        }
    }
}

impl Default for RemoteLayout {
    fn default() -> Self {
        Self {
            install_dir: "/opt/radtik-radius".into(),
            config_ini: "/opt/radtik-radius/scripts/config.ini".into(),
            auth_token_key: "auth_token".into(),
            staging_clients: "/opt/radtik-radius/clients.conf".into(),
            nas_block: "mikrotik".into(),
            active_clients: "/etc/freeradius/3.0/clients.conf".into(),
            version_file: "/opt/radtik-radius/VERSION".into(),
            database: "/etc/freeradius/3.0/sqlite/radius.db".into(),
            backup_root: "/opt/radtik-radius-backups".into(),
            preserved: vec!["scripts/config.ini".into(), "clients.conf".into()],
        }
    }
}

impl Default for Services {
    fn default() -> Self {
        Self {
            radius: "freeradius".into(),
            api: "radtik-radius-api".into(),
            api_port: 5000,
        }
    }
}

impl Default for Bootstrap {
    fn default() -> Self {
        Self {
            repo_url: "https://github.com/ahmadfoysal/radtik-radius.git".into(),
            branch: "main".into(),
        }
    }
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            poll: PollSettings::default(),
            timeouts: Timeouts::default(),
            settle: SettleDelays::default(),
            layout: RemoteLayout::default(),
            services: Services::default(),
            bootstrap: Some(Bootstrap::default()),
            privilege: "sudo -n ".into(),
            fallback_radius_secret: "testing123".into(),
        }
    }
}

impl Settings {
    /// `command` with the privilege prefix.
    pub fn sudo(&self, command: &str) -> String {
        format!("{}{command}", self.privilege)
    }

    /// Both managed services, AAA daemon first.
    pub fn service_names(&self) -> [&str; 2] {
        [self.services.radius.as_str(), self.services.api.as_str()]
    }
}
