//! Result shapes for operations that report instead of propagating.

use serde::{Deserialize, Serialize};

use crate::error::{Error, ErrorKind};

/// Value or classified failure.
///
/// Serialized with an `outcome` tag (`"ok"` / `"failed"`); the payload of
/// `Ok` is flattened next to the tag, so `T` must serialize as a map.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum Outcome<T> {
    Ok(T),
    Failed { kind: ErrorKind, message: String },
}

impl<T> Outcome<T> {
    pub fn failed(err: &Error) -> Self {
        Outcome::Failed {
            kind: err.kind(),
            message: err.to_string(),
        }
    }

    pub fn is_ok(&self) -> bool {
        matches!(self, Outcome::Ok(_))
    }

    pub fn ok(self) -> Option<T> {
        match self {
            Outcome::Ok(value) => Some(value),
            Outcome::Failed { .. } => None,
        }
    }

    pub fn kind(&self) -> Option<ErrorKind> {
        match self {
            Outcome::Ok(_) => None,
            Outcome::Failed { kind, .. } => Some(*kind),
        }
    }
}

impl<T> From<crate::Result<T>> for Outcome<T> {
    fn from(result: crate::Result<T>) -> Self {
        match result {
            Ok(value) => Outcome::Ok(value),
            Err(e) => Outcome::failed(&e),
        }
    }
}

/// Success flag of a report that carries data on both paths.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "verdict", rename_all = "snake_case")]
pub enum Verdict {
    Succeeded { message: String },
    Failed { kind: ErrorKind, message: String },
}

impl Verdict {
    pub fn succeeded(message: impl Into<String>) -> Self {
        Verdict::Succeeded {
            message: message.into(),
        }
    }

    pub fn failed(kind: ErrorKind, message: impl Into<String>) -> Self {
        Verdict::Failed {
            kind,
            message: message.into(),
        }
    }

    pub fn from_error(err: &Error) -> Self {
        Verdict::failed(err.kind(), err.to_string())
    }

    pub fn success(&self) -> bool {
        matches!(self, Verdict::Succeeded { .. })
    }

    pub fn message(&self) -> &str {
        match self {
            Verdict::Succeeded { message } | Verdict::Failed { message, .. } => message,
        }
    }
}
