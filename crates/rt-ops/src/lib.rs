//! Lifecycle of managed RADIUS servers: provisioning, installation,
//! secret rotation, health checks and software updates.

pub mod config_files;
pub mod credentials;
pub mod error;
pub mod health;
pub mod install_script;
pub mod orchestrator;
pub mod outcome;
pub mod secrets;
pub mod service;
pub mod session;
pub mod settings;
pub mod store;
pub mod updates;
pub mod versions;

#[cfg(test)]
mod testing;

pub use error::{Error, ErrorKind, Result};
pub use outcome::{Outcome, Verdict};
pub use service::{InstallationProgress, RadiusService};
pub use session::{ShellConnector, SshConnector};
pub use settings::Settings;
pub use store::{MemoryStore, ServerStore};
pub use updates::{RegistrySource, ReleaseSource};
pub use versions::TargetVersion;
