use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use rt_ops::ErrorKind;

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("not found")]
    NotFound,

    #[error("{0}")]
    BadRequest(String),

    #[error("unauthorized")]
    Unauthorized,

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error(transparent)]
    Ops(#[from] rt_ops::Error),
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match self {
            ApiError::NotFound => StatusCode::NOT_FOUND,
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Unauthorized => StatusCode::UNAUTHORIZED,
            ApiError::Conflict(_) => StatusCode::CONFLICT,
            ApiError::Database(sqlx::Error::RowNotFound) => StatusCode::NOT_FOUND,
            ApiError::Database(_) => StatusCode::INTERNAL_SERVER_ERROR,
            ApiError::Ops(e) => status_for(e.kind()),
        }
    }
}

/// HTTP status for an operation failure of `kind`.
pub fn status_for(kind: ErrorKind) -> StatusCode {
    match kind {
        ErrorKind::NotFound => StatusCode::NOT_FOUND,
        ErrorKind::Busy | ErrorKind::InvalidState | ErrorKind::UpToDate | ErrorKind::Cancelled => {
            StatusCode::CONFLICT
        }
        ErrorKind::Configuration | ErrorKind::NotInstalled => StatusCode::BAD_REQUEST,
        ErrorKind::Storage => StatusCode::INTERNAL_SERVER_ERROR,
        ErrorKind::Connection
        | ErrorKind::Authentication
        | ErrorKind::Provisioning
        | ErrorKind::ProvisioningTimeout
        | ErrorKind::CommandExecution
        | ErrorKind::PartialUpdate
        | ErrorKind::Registry => StatusCode::BAD_GATEWAY,
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(error = %self, "request failed");
        }

        let body = match &self {
            ApiError::Ops(e) => serde_json::json!({ "error": self.to_string(), "kind": e.kind() }),
            _ => serde_json::json!({ "error": self.to_string() }),
        };
        (status, axum::Json(body)).into_response()
    }
}
