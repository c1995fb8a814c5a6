use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    Infra(#[from] rt_infra::Error),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Instance did not start within expected time")]
    ProvisioningTimeout { attempts: u32, interval: Duration },

    #[error("{0}")]
    PartialUpdate(String),

    #[error("version registry: {0}")]
    Registry(String),

    #[error("{0}")]
    NotInstalled(String),

    #[error("{0}")]
    UpToDate(String),

    #[error("{0}")]
    InvalidState(String),

    #[error("{0}")]
    Busy(String),

    #[error("server {0} not found")]
    NotFound(Uuid),
}

pub type Result<T> = std::result::Result<T, Error>;

impl From<releases_api::Error> for Error {
    fn from(e: releases_api::Error) -> Self {
        Error::Registry(e.to_string())
    }
}

impl Error {
    pub fn configuration(message: impl Into<String>) -> Self {
        Error::Infra(rt_infra::Error::Configuration(message.into()))
    }

    pub fn kind(&self) -> ErrorKind {
        use rt_infra::Error as Infra;
        match self {
            Error::Infra(e) => match e {
                Infra::Configuration(_) => ErrorKind::Configuration,
                Infra::Connection(_) => ErrorKind::Connection,
                Infra::Authentication(_) => ErrorKind::Authentication,
                Infra::Provisioning { .. } => ErrorKind::Provisioning,
                Infra::CommandExecution { .. } | Infra::CommandTimeout { .. } => {
                    ErrorKind::CommandExecution
                }
                Infra::Cancelled => ErrorKind::Cancelled,
            },
            Error::Database(sqlx::Error::RowNotFound) => ErrorKind::NotFound,
            Error::Database(_) => ErrorKind::Storage,
            Error::ProvisioningTimeout { .. } => ErrorKind::ProvisioningTimeout,
            Error::PartialUpdate(_) => ErrorKind::PartialUpdate,
            Error::Registry(_) => ErrorKind::Registry,
            Error::NotInstalled(_) => ErrorKind::NotInstalled,
            Error::UpToDate(_) => ErrorKind::UpToDate,
            Error::InvalidState(_) => ErrorKind::InvalidState,
            Error::Busy(_) => ErrorKind::Busy,
            Error::NotFound(_) => ErrorKind::NotFound,
        }
    }
}

/// Closed failure taxonomy carried by non-throwing results.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Configuration,
    Connection,
    Authentication,
    Provisioning,
    ProvisioningTimeout,
    CommandExecution,
    PartialUpdate,
    Registry,
    NotInstalled,
    UpToDate,
    InvalidState,
    Busy,
    Cancelled,
    NotFound,
    Storage,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Configuration => "configuration",
            Self::Connection => "connection",
            Self::Authentication => "authentication",
            Self::Provisioning => "provisioning",
            Self::ProvisioningTimeout => "provisioning_timeout",
            Self::CommandExecution => "command_execution",
            Self::PartialUpdate => "partial_update",
            Self::Registry => "registry",
            Self::NotInstalled => "not_installed",
            Self::UpToDate => "up_to_date",
            Self::InvalidState => "invalid_state",
            Self::Busy => "busy",
            Self::Cancelled => "cancelled",
            Self::NotFound => "not_found",
            Self::Storage => "storage",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
