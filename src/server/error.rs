use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use tracing::{error, warn};

use crate::session::CommandError;
use crate::source::SourceError;

const LOG_TARGET: &str = "server::error";

#[derive(Debug)]
pub enum ApiError {
    BadRequest(String),
    Forbidden(String),
    Conflict(String),
    Unprocessable(String),
    BadGateway(String),
    Unavailable(String),
}

impl ApiError {
    pub fn bad_request(message: impl Into<String>) -> Self {
        ApiError::BadRequest(message.into())
    }

    fn status(&self) -> StatusCode {
        match self {
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Forbidden(_) => StatusCode::FORBIDDEN,
            ApiError::Conflict(_) => StatusCode::CONFLICT,
            ApiError::Unprocessable(_) => StatusCode::UNPROCESSABLE_ENTITY,
            ApiError::BadGateway(_) => StatusCode::BAD_GATEWAY,
            ApiError::Unavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
        }
    }

    fn message(&self) -> &str {
        match self {
            ApiError::BadRequest(message)
            | ApiError::Forbidden(message)
            | ApiError::Conflict(message)
            | ApiError::Unprocessable(message)
            | ApiError::BadGateway(message)
            | ApiError::Unavailable(message) => message,
        }
    }
}

impl From<CommandError> for ApiError {
    fn from(err: CommandError) -> Self {
        let message = err.to_string();
        match err {
            CommandError::NotHost { .. } => ApiError::Forbidden(message),
            CommandError::PhaseMismatch { .. }
            | CommandError::RevealInProgress
            | CommandError::DrawInFlight
            | CommandError::NoNewOutcome
            | CommandError::Buffer(_) => ApiError::Conflict(message),
            CommandError::NoLocalParticipant => ApiError::BadRequest(message),
            CommandError::Source(SourceError::Rejected(_)) => ApiError::Unprocessable(message),
            CommandError::Source(_) | CommandError::Reveal(_) => ApiError::BadGateway(message),
            CommandError::DriverClosed => ApiError::Unavailable(message),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let message = self.message();
        if status.is_server_error() {
            error!(target: LOG_TARGET, status = status.as_u16(), message, "command failed");
        } else {
            warn!(target: LOG_TARGET, status = status.as_u16(), message, "command refused");
        }
        (status, Json(json!({ "error": message }))).into_response()
    }
}
